//! End-to-end scenarios from spec.md §8, one `#[test]` per literal scenario.
//!
//! Physis has no execution engine of its own (the runtime that would
//! actually run generated code is an out-of-scope external collaborator,
//! §1) — these scenarios are checked the only way available to a pure
//! source-to-source compiler: by inspecting the descriptors stencil
//! analysis produced and the shape of the lowered AST, rather than by
//! running the emitted program.

use physis::analysis::StencilAnalyzer;
use physis::ast::{self, BinOp, Expr, GridParam, Kernel, NodeIdGen, Stmt};
use physis::backend::{mpi_cuda, reference, Backend};
use physis::builder;
use physis::model::{Domain, PointLayout, Primitive, RecordMember};
use physis::session::{Session, SessionConfig};

fn get_call(ids: &mut NodeIdGen, grid: &str, offsets: &[(&str, i64)], periodic: bool) -> Expr {
    let span = Default::default();
    let mut args = vec![ast::var(ids, span, grid)];
    for (var, off) in offsets {
        let base = ast::var(ids, span, *var);
        let idx = if *off == 0 {
            base
        } else if *off > 0 {
            ast::binary(ids, span, BinOp::Add, base, ast::int(ids, span, *off))
        } else {
            ast::binary(ids, span, BinOp::Sub, base, ast::int(ids, span, -*off))
        };
        args.push(idx);
    }
    let name = if periodic { "PSGridGetPeriodic" } else { "PSGridGet" };
    ast::call(ids, span, name, args)
}

fn emit_stmt(ids: &mut NodeIdGen, grid: &str, value: Expr) -> Stmt {
    let span = Default::default();
    let call = ast::call(ids, span, "PSGridEmit", vec![ast::var(ids, span, grid), value]);
    Stmt::Expr(call)
}

fn count_for_loops(body: &[Stmt]) -> (usize, Vec<String>) {
    let mut depth = 0;
    let mut vars = Vec::new();
    let mut cur = body;
    loop {
        match cur.first() {
            Some(Stmt::For { var, body: inner, .. }) if cur.len() == 1 => {
                depth += 1;
                vars.push(var.clone());
                cur = inner;
            }
            _ => break,
        }
    }
    (depth, vars)
}

fn count_calls(body: &[Stmt], name: &str) -> usize {
    let mut n = 0;
    ast::walk_block(body, &mut |e| {
        if e.as_call().map(|(f, _)| f) == Some(name) {
            n += 1;
        }
    });
    n
}

/// Scenario 1: 3D double-buffered ×2 kernel, 64³, 1 iteration, reference
/// backend. `emit(2*get(x,y,z))` touches only the center of its grid, so
/// the halo stays zero everywhere and the run executes exactly one swap
/// per iteration.
#[test]
fn scenario_1_double_kernel_reference_backend() {
    let mut session = Session::new(SessionConfig::default());
    let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
    let g = session.allocate_grid(gt, Vec::new());
    session.grid_mut(g).static_size = Some(vec![64, 64, 64]);
    let domain = Domain::new(vec![0, 0, 0], vec![64, 64, 64]);
    let map_id = session.new_stencil_map("double_it".into(), domain, vec![g]);

    let mut ids = NodeIdGen::default();
    let get = get_call(&mut ids, "g", &[("x", 0), ("y", 0), ("z", 0)], false);
    let doubled = ast::binary(&mut ids, Default::default(), BinOp::Mul, ast::int(&mut ids, Default::default(), 2), get);
    let body = vec![emit_stmt(&mut ids, "g", doubled)];
    session.node_ids = ids;

    let kernel = Kernel {
        name: "double_it".into(),
        rank: 3,
        index_params: vec!["x".into(), "y".into(), "z".into()],
        grid_params: vec![GridParam {
            name: "g".into(),
            grid_type: gt,
        }],
        body,
    };
    session.register_kernel(kernel);

    let kernel = session.kernel("double_it").unwrap().clone();
    StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();

    let halo = &session.grid(g).stencil_range;
    assert_eq!(halo.fw, vec![0, 0, 0]);
    assert_eq!(halo.bw, vec![0, 0, 0]);

    let run_index = session.new_run(Some(ast::int(&mut session.node_ids, Default::default(), 1)));
    session.run_mut(run_index).push_map(map_id);

    let lowered = session.compile(Backend::Reference, run_index).unwrap();
    assert_eq!(lowered.len(), 1);

    let (depth, vars) = count_for_loops(&lowered[0].run_kernel_funcs[0].body);
    assert_eq!(depth, 3);
    assert_eq!(vars, vec!["z".to_string(), "y".to_string(), "x".to_string()]);
    assert_eq!(count_calls(&lowered[0].run_kernel_funcs[0].body, "double_it"), 1);

    // One run-kernel invocation and one swap per iteration, wrapped in the
    // count=1 loop (§8 "Swap invariant").
    assert_eq!(count_calls(&lowered[0].run_func_body, "__PSStencilRun_double_it"), 1);
    assert_eq!(count_calls(&lowered[0].run_func_body, "GridSwap"), 1);
}

/// Scenario 2: 3D 7-point Laplacian, 32³, periodic in all dims, reference.
/// StencilRange must come out with `fw = bw = (1,1,1)` and every dimension
/// periodic; the periodic wrap at the domain edge must reproduce the
/// documented wrap-around neighbors.
#[test]
fn scenario_2_laplacian_periodic_halo_and_wraparound() {
    let mut session = Session::new(SessionConfig::default());
    let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
    let g = session.allocate_grid(gt, Vec::new());
    let domain = Domain::new(vec![0, 0, 0], vec![32, 32, 32]);
    let map_id = session.new_stencil_map("laplacian".into(), domain, vec![g]);

    let mut ids = NodeIdGen::default();
    let neighbor_offsets: [[(&str, i64); 3]; 7] = [
        [("x", 0), ("y", 0), ("z", 0)],
        [("x", -1), ("y", 0), ("z", 0)],
        [("x", 1), ("y", 0), ("z", 0)],
        [("x", 0), ("y", -1), ("z", 0)],
        [("x", 0), ("y", 1), ("z", 0)],
        [("x", 0), ("y", 0), ("z", -1)],
        [("x", 0), ("y", 0), ("z", 1)],
    ];
    let mut sum = get_call(&mut ids, "g", &neighbor_offsets[0], true);
    for offs in &neighbor_offsets[1..] {
        let next = get_call(&mut ids, "g", offs, true);
        sum = ast::binary(&mut ids, Default::default(), BinOp::Add, sum, next);
    }
    let body = vec![emit_stmt(&mut ids, "g", sum)];
    session.node_ids = ids;

    let kernel = Kernel {
        name: "laplacian".into(),
        rank: 3,
        index_params: vec!["x".into(), "y".into(), "z".into()],
        grid_params: vec![GridParam {
            name: "g".into(),
            grid_type: gt,
        }],
        body,
    };
    session.register_kernel(kernel);
    let kernel = session.kernel("laplacian").unwrap().clone();
    StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();

    let range = &session.stencil_map(map_id).range_by_param[&0];
    assert_eq!(range.fw, vec![1, 1, 1]);
    assert_eq!(range.bw, vec![1, 1, 1]);
    for d in 0..3 {
        assert!(range.is_periodic_in(d));
    }

    // `(0,0,0)` reading `x-1` wraps to `31`, matching (31,0,0)'s
    // non-periodic offset (§8 scenario 2, §4.2 positive-remainder rule).
    let dims = vec![32, 32, 32];
    let wrapped = builder::eval_canonical_offset(&dims, &[-1, 0, 0], true);
    let direct = builder::eval_canonical_offset(&dims, &[31, 0, 0], false);
    assert_eq!(wrapped, direct);
    let wrapped_y = builder::eval_canonical_offset(&dims, &[0, -1, 0], true);
    let direct_y = builder::eval_canonical_offset(&dims, &[0, 31, 0], false);
    assert_eq!(wrapped_y, direct_y);
    let wrapped_z = builder::eval_canonical_offset(&dims, &[0, 0, -1], true);
    let direct_z = builder::eval_canonical_offset(&dims, &[0, 0, 31], false);
    assert_eq!(wrapped_z, direct_z);
}

/// Scenario 3: record-point copy. `struct Point{float p,q;}`;
/// `emit(g.q, get(g).p)`. The member stencil-range map must contain
/// exactly two entries, `p` (read) and `q` (written), both center access.
#[test]
fn scenario_3_record_point_copy_member_ranges() {
    let mut session = Session::new(SessionConfig::default());
    let layout = PointLayout::Record {
        type_name: "Point".into(),
        members: vec![
            RecordMember {
                name: "p".into(),
                ty: Primitive::Float,
                array_shape: Vec::new(),
            },
            RecordMember {
                name: "q".into(),
                ty: Primitive::Float,
                array_shape: Vec::new(),
            },
        ],
    };
    let gt = session.declare_grid_type(2, layout);
    let g = session.allocate_grid(gt, Vec::new());
    let domain = Domain::new(vec![0, 0], vec![8, 8]);
    let map_id = session.new_stencil_map("copy_pq".into(), domain, vec![g]);

    let span = Default::default();
    let mut ids = NodeIdGen::default();
    let get_p = Expr::Field {
        id: ids.next(),
        span,
        receiver: Box::new(get_call(&mut ids, "g", &[("x", 0), ("y", 0)], false)),
        member: "p".to_string(),
    };
    let emit_target = Expr::Field {
        id: ids.next(),
        span,
        receiver: Box::new(ast::var(&mut ids, span, "g")),
        member: "q".to_string(),
    };
    let emit = ast::call(&mut ids, span, "PSGridEmitUtype", vec![emit_target, get_p]);
    let body = vec![Stmt::Expr(emit)];
    session.node_ids = ids;

    let kernel = Kernel {
        name: "copy_pq".into(),
        rank: 2,
        index_params: vec!["x".into(), "y".into()],
        grid_params: vec![GridParam {
            name: "g".into(),
            grid_type: gt,
        }],
        body,
    };
    session.register_kernel(kernel);
    let kernel = session.kernel("copy_pq").unwrap().clone();
    StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();

    let member_ranges = &session.stencil_map(map_id).member_range_by_param[&0];
    assert_eq!(member_ranges.len(), 2);

    let p_range = member_ranges.get(&("p".to_string(), Vec::new())).unwrap();
    assert!(p_range.entries().iter().any(|e| e == &[0, 0]));
    assert_eq!(p_range.fw, vec![0, 0]);
    assert_eq!(p_range.bw, vec![0, 0]);

    let q_range = member_ranges.get(&("q".to_string(), Vec::new())).unwrap();
    assert!(q_range.entries().iter().any(|e| e == &[0, 0]));
    assert_eq!(q_range.fw, vec![0, 0]);
    assert_eq!(q_range.bw, vec![0, 0]);
}

/// Scenario 4: MPI+CUDA overlap, 3D, 128³, 5-point-in-xy. Halo analysis
/// must produce `fw=bw=(1,1,0)`; three kernel-variant families must exist
/// (interior, six boundary slabs, untransformed); the interior variant must
/// never reference the halo-aware address helper; the boundary-(0,fw)
/// variant must reference the no-halo helper only for accesses centered in
/// every dimension but the one whose offset is safely on the opposite side.
#[test]
fn scenario_4_mpi_cuda_overlap_five_point_xy() {
    let mut session = Session::new(SessionConfig::default());
    let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
    let g = session.allocate_grid(gt, Vec::new());
    let domain = Domain::new(vec![0, 0, 0], vec![128, 128, 128]);
    let map_id = session.new_stencil_map("stencil5".into(), domain, vec![g]);

    let mut ids = NodeIdGen::default();
    let offsets: [[(&str, i64); 3]; 5] = [
        [("x", 0), ("y", 0), ("z", 0)],
        [("x", -1), ("y", 0), ("z", 0)],
        [("x", 1), ("y", 0), ("z", 0)],
        [("x", 0), ("y", -1), ("z", 0)],
        [("x", 0), ("y", 1), ("z", 0)],
    ];
    let mut sum = get_call(&mut ids, "g", &offsets[0], false);
    for offs in &offsets[1..] {
        let next = get_call(&mut ids, "g", offs, false);
        sum = ast::binary(&mut ids, Default::default(), BinOp::Add, sum, next);
    }
    let body = vec![emit_stmt(&mut ids, "g", sum)];
    session.node_ids = ids;

    let kernel = Kernel {
        name: "stencil5".into(),
        rank: 3,
        index_params: vec!["x".into(), "y".into(), "z".into()],
        grid_params: vec![GridParam {
            name: "g".into(),
            grid_type: gt,
        }],
        body,
    };
    session.register_kernel(kernel);
    let kernel = session.kernel("stencil5").unwrap().clone();
    StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();

    let range = &session.stencil_map(map_id).range_by_param[&0];
    assert_eq!(range.fw, vec![1, 1, 0]);
    assert_eq!(range.bw, vec![1, 1, 0]);

    let variants = mpi_cuda::specialize_all(&session, &kernel);
    // interior + 2*rank boundary slabs + untransformed
    assert_eq!(variants.len(), 1 + 2 * 3 + 1);

    let interior = &variants[0];
    assert_eq!(interior.name, "stencil5_inner");
    ast::walk_block(&interior.body, &mut |e| {
        if let Expr::Call { func, .. } = e {
            if func.starts_with("get_addr_") {
                assert!(
                    func.starts_with("get_addr_no_halo_"),
                    "interior kernel referenced halo-aware helper {func}"
                );
            }
        }
    });

    // boundary-(0,fw) is the second generated boundary variant: dim 0 is
    // iterated first, Bw before Fw (see `Side::all`).
    let boundary_0_fw = variants
        .iter()
        .find(|k| k.name == "stencil5_boundary_1_fw")
        .expect("boundary_1_fw variant must exist");
    // Identify the dim-0 offset-(-1) and offset-(+1) accesses by the shape
    // of their own x argument (Sub vs. Add), independent of AST walk order,
    // then assert which specific sign gets redirected to the no-halo helper.
    let mut neg_x_no_halo = None;
    let mut pos_x_no_halo = None;
    ast::walk_block(&boundary_0_fw.body, &mut |e| {
        if let Expr::Call { func, args, .. } = e {
            if func.starts_with("get_addr_") {
                let no_halo = func.starts_with("get_addr_no_halo_");
                match &args[1] {
                    Expr::Binary { op: BinOp::Sub, .. } => neg_x_no_halo = Some(no_halo),
                    Expr::Binary { op: BinOp::Add, .. } => pos_x_no_halo = Some(no_halo),
                    _ => {}
                }
            }
        }
    });
    assert_eq!(
        neg_x_no_halo,
        Some(true),
        "boundary-(0,fw): offset -1 in dim 0 is on the side opposite the fw boundary and must use the no-halo helper"
    );
    assert_eq!(
        pos_x_no_halo,
        Some(false),
        "boundary-(0,fw): offset +1 in dim 0 is on the same side as the fw boundary and must keep the halo-aware helper"
    );
}

/// Scenario 6: reduction sum over a 16³ unit grid. The reference and MPI
/// backends must both produce a fold that visits exactly 16³ = 4096
/// elements — one swap-free pass over the whole declared extent for the
/// reference backend, and the same count over the local interior for the
/// MPI backend once that interior has no halo to exclude.
#[test]
fn scenario_6_reduction_sum_visits_every_cell_once() {
    use physis::backend::mpi;
    use physis::model::ReduceOp;

    let mut session = Session::new(SessionConfig::default());
    let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
    let g = session.allocate_grid(gt, Vec::new());
    session.grid_mut(g).static_size = Some(vec![16, 16, 16]);

    let reduce_func = reference::lower_reduce(&mut session, g, ReduceOp::Sum).unwrap();
    assert_eq!(loop_iteration_count(&reduce_func.body), 16 * 16 * 16);

    // MPI: a single-rank decomposition (no halo recorded) should walk the
    // same 4096 cells via the local-interior bounds.
    let mpi_func = mpi::lower_reduce(&mut session, g, ReduceOp::Sum).unwrap();
    assert_eq!(loop_iteration_count(&mpi_func.body), 16 * 16 * 16);
}

/// Scenario 5: unconditional-get lifting. `if (x<16) v=get(x-1,y,z); else
/// v=get(x+1,y,z); emit(v);` — both branches are a matching get-assign into
/// `v`, so the pass must collapse them into a lifted boolean, a conditional
/// index temporary, and a single unconditional read; no `PSGridGet` call may
/// survive. Unlike `optimize::unconditional_get`'s own unit tests, which
/// hand-inject a `GridGetAttribute`, this one runs the branch through real
/// stencil analysis first so the attribute the rewrite depends on is the one
/// analysis actually produced.
#[test]
fn scenario_5_unconditional_get_lifts_branchy_load() {
    let mut session = Session::new(SessionConfig::default());
    let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
    let g = session.allocate_grid(gt, Vec::new());
    let domain = Domain::new(vec![0, 0, 0], vec![64, 64, 64]);
    let map_id = session.new_stencil_map("branchy".into(), domain, vec![g]);

    let span = Default::default();
    let mut ids = NodeIdGen::default();
    let cond = ast::binary(&mut ids, span, BinOp::Lt, ast::var(&mut ids, span, "x"), ast::int(&mut ids, span, 16));
    let then_get = get_call(&mut ids, "g", &[("x", -1), ("y", 0), ("z", 0)], false);
    let else_get = get_call(&mut ids, "g", &[("x", 1), ("y", 0), ("z", 0)], false);
    let then_branch = vec![Stmt::Assign {
        span,
        target: ast::var(&mut ids, span, "v"),
        value: then_get,
    }];
    let else_branch = vec![Stmt::Assign {
        span,
        target: ast::var(&mut ids, span, "v"),
        value: else_get,
    }];
    let if_stmt = Stmt::If {
        span,
        cond,
        then_branch,
        else_branch: Some(else_branch),
    };
    let v_decl = Stmt::Let {
        span,
        name: "v".to_string(),
        is_mutable: true,
        init: None,
    };
    let body = vec![v_decl, if_stmt, emit_stmt(&mut ids, "g", ast::var(&mut ids, span, "v"))];
    session.node_ids = ids;

    let kernel = Kernel {
        name: "branchy".into(),
        rank: 3,
        index_params: vec!["x".into(), "y".into(), "z".into()],
        grid_params: vec![GridParam {
            name: "g".into(),
            grid_type: gt,
        }],
        body,
    };
    session.register_kernel(kernel);
    let kernel = session.kernel("branchy").unwrap().clone();
    StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();

    let builder = reference::ReferenceBuilder;
    let (rewritten, warnings) = physis::optimize::unconditional_get::run(&mut session, &builder, &kernel);
    assert!(warnings.is_empty());
    assert_eq!(count_calls(&rewritten.body, "PSGridGet"), 0);

    let unconditional_reads = rewritten
        .body
        .iter()
        .filter(|s| matches!(s, Stmt::Assign { target: Expr::Var { name, .. }, value: Expr::Index { .. }, .. } if name == "v"))
        .count();
    assert_eq!(unconditional_reads, 1);
}

fn loop_iteration_count(body: &[Stmt]) -> i64 {
    match body.iter().find_map(|s| match s {
        Stmt::For { start, end, body: inner, .. } => Some((start.clone(), end.clone(), inner)),
        _ => None,
    }) {
        Some((Expr::IntLit { value: start, .. }, Expr::IntLit { value: end, .. }, inner)) => {
            (end - start) * loop_iteration_count(inner).max(1)
        }
        _ => 1,
    }
}
