//! C8 — MPI+CUDA Backend with Overlap.
//!
//! The deepest part of the system (§4.6). For each StencilMap, a single user
//! kernel is specialized into an interior clone, one clone per
//! `(dim, side)` boundary slab, and an untransformed fallback. The run
//! function overlaps halo exchange and boundary compute with interior
//! compute across CUDA streams.

use crate::ast::{walk_block_mut, Expr, Function, Kernel, Stmt};
use crate::analysis::Side;
use crate::builder::{self, Builder, OffsetArgs};
use crate::error::{Result, Span};
use crate::model::{Domain, GridId, GridTypeId, StencilIndexList, StencilMap, StencilMapId};
use crate::session::Session;

use super::cuda::CudaBuilder;
use super::{index_var_names, LoweredMap};

/// Which of the three generated kernel clones a statement belongs to
/// (§4.6 items 1–3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Interior,
    Boundary { dim: usize, side: Side },
    Untransformed,
}

impl Variant {
    fn name_suffix(&self, kernel_name: &str) -> String {
        match self {
            Variant::Interior => format!("{kernel_name}_inner"),
            Variant::Boundary { dim, side } => {
                format!("{kernel_name}_boundary_{}_{}", dim + 1, side.suffix())
            }
            Variant::Untransformed => kernel_name.to_string(),
        }
    }

    fn helper_suffix(&self) -> Option<&'static str> {
        match self {
            Variant::Interior => Some("_inner"),
            Variant::Boundary { .. } => None,
            Variant::Untransformed => None,
        }
    }
}

/// Whether a get whose access pattern is `indices` should be redirected to
/// the no-halo address helper under `variant` (§4.6 item 2's three-part
/// rule for boundary kernels; item 1's unconditional rule for interior).
fn use_no_halo(indices: &StencilIndexList, rank: usize, variant: Variant) -> bool {
    match variant {
        Variant::Interior => true,
        Variant::Untransformed => false,
        Variant::Boundary { dim, side } => {
            let Some(offsets) = indices.regular_offsets(rank) else {
                return false;
            };
            if offsets.iter().enumerate().any(|(d, &o)| d != dim && o != 0) {
                return false;
            }
            // `add_regular` (model.rs) maps offset>0 to `fw` and offset<0 to
            // `bw`, so the opposite side of a `Fw` boundary slab is a
            // negative offset, and the opposite side of a `Bw` slab is a
            // positive one.
            match offsets[dim].cmp(&0) {
                std::cmp::Ordering::Equal => true,
                std::cmp::Ordering::Less => matches!(side, Side::Fw),
                std::cmp::Ordering::Greater => matches!(side, Side::Bw),
            }
        }
    }
}

fn addr_fn_name(type_name: &str, rank: usize, no_halo: bool) -> String {
    if no_halo {
        format!("get_addr_no_halo_{type_name}{rank}D")
    } else {
        format!("get_addr_{type_name}{rank}D")
    }
}

/// Produce one kernel clone for `variant`: get-address calls are redirected
/// per `use_no_halo`, intra-kernel helper calls are suffixed, emits are left
/// untouched (§4.6: "Emits are not rewritten").
pub fn specialize_kernel(session: &Session, kernel: &Kernel, variant: Variant) -> Kernel {
    let mut body = kernel.body.clone();
    let helper_suffix = variant.helper_suffix();
    let boundary_suffix = match variant {
        Variant::Boundary { dim, side } => Some(format!("_boundary_{}_{}", dim + 1, side.suffix())),
        _ => None,
    };
    let own_name = kernel.name.clone();

    walk_block_mut(&mut body, &mut |e| {
        if let Expr::Call { id, func, .. } = e {
            if func == "PSGridGet" || func == "PSGridGetPeriodic" {
                if let Some(attr) = session.attrs.grid_get(*id) {
                    let gt = session.grid_type(attr.grid_type);
                    let rank = gt.rank as usize;
                    let type_name = builder::user_type_name(&gt.layout);
                    let no_halo = use_no_halo(&attr.indices, rank, variant);
                    *func = addr_fn_name(&type_name, rank, no_halo);
                }
            } else if func != &own_name && session.kernel(func).is_some() {
                if let Some(sfx) = helper_suffix {
                    *func = format!("{func}{sfx}");
                } else if let Some(sfx) = &boundary_suffix {
                    *func = format!("{func}{sfx}");
                }
            }
        }
    });

    Kernel {
        name: variant.name_suffix(&kernel.name),
        body,
        ..kernel.clone()
    }
}

/// Every clone generated for one map: interior, the `2*rank` boundary
/// slabs, and the untransformed fallback (§4.6).
pub fn specialize_all(session: &Session, kernel: &Kernel) -> Vec<Kernel> {
    let mut out = vec![specialize_kernel(session, kernel, Variant::Interior)];
    for dim in 0..kernel.rank {
        for side in Side::all() {
            out.push(specialize_kernel(session, kernel, Variant::Boundary { dim, side }));
        }
    }
    out.push(specialize_kernel(session, kernel, Variant::Untransformed));
    out
}

/// Delegator: forwards grid addressing and domain-inclusion checks to a
/// plain CUDA sub-builder (the three kernel clones already carry their own
/// addressing via `specialize_kernel`), overriding only the run-level
/// orchestration that differs under overlap (§4.2 "delegator pattern").
pub struct MpiCudaBuilder {
    inner: CudaBuilder,
    multi_stream: bool,
}

impl MpiCudaBuilder {
    pub fn new(session: &Session, _map: &StencilMap) -> Self {
        MpiCudaBuilder {
            inner: CudaBuilder::new(session),
            multi_stream: session.config.multi_stream_boundary,
        }
    }
}

impl Builder for MpiCudaBuilder {
    fn build_grid_base_addr(&self, session: &mut Session, grid: GridId) -> Expr {
        self.inner.build_grid_base_addr(session, grid)
    }

    fn build_grid_offset(&self, session: &mut Session, args: &OffsetArgs) -> Expr {
        self.inner.build_grid_offset(session, args)
    }

    fn build_grid_emit(
        &self,
        session: &mut Session,
        grid: GridId,
        rank: usize,
        index_exprs: &[Expr],
        member_name: &str,
        value: Expr,
    ) -> Stmt {
        self.inner.build_grid_emit(session, grid, rank, index_exprs, member_name, value)
    }

    fn build_kernel_call_arg_list(&self, session: &mut Session, index_vars: &[String], grid_args: &[GridId]) -> Vec<Expr> {
        self.inner.build_kernel_call_arg_list(session, index_vars, grid_args)
    }

    fn build_domain_inclusion_check(&self, session: &mut Session, idx_vars: &[String], domain: &Domain) -> Expr {
        self.inner.build_domain_inclusion_check(session, idx_vars, domain)
    }

    fn build_run_kernel_func(&self, session: &mut Session, map: &StencilMap) -> crate::builder::RunKernelFunc {
        self.inner.build_run_kernel_func(session, map)
    }

    fn build_run_kernel_func_body(&self, session: &mut Session, map: &StencilMap, kernel: &Kernel) -> Vec<Stmt> {
        self.inner.build_run_kernel_func_body(session, map, kernel)
    }

    fn build_on_device_grid_type(&self, session: &mut Session, grid_type: GridTypeId) -> Option<String> {
        self.inner.build_on_device_grid_type(session, grid_type)
    }

    fn build_grid_new_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        self.inner.build_grid_new_func_for_user_type(session, grid_type)
    }

    fn build_grid_copy_in_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        self.inner.build_grid_copy_in_func_for_user_type(session, grid_type)
    }

    fn build_grid_copy_out_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        self.inner.build_grid_copy_out_func_for_user_type(session, grid_type)
    }

    fn build_run_func_body(&self, session: &mut Session, run_index: usize, count: Option<&Expr>) -> Vec<Stmt> {
        if self.multi_stream {
            build_multi_stream_run_body(session, run_index, count)
        } else {
            build_single_stream_run_body(session, run_index, count)
        }
    }
}

/// `exchange_begin -> launch_interior on stream_interior -> for each
/// (d,side) launch_boundary[d,side] on stream_boundary[d,side] after the
/// corresponding halo is received -> device-synchronize -> swap -> reissue
/// exchange for dependent maps` (§4.6 "Run orchestration").
fn build_multi_stream_run_body(session: &mut Session, run_index: usize, count: Option<&Expr>) -> Vec<Stmt> {
    let span = Span::default();
    let maps = session.run(run_index).maps.clone();
    let mut iter_body = Vec::new();

    for map_id in &maps {
        let map = session.stencil_map(*map_id).clone();
        let rank = map.domain.rank as usize;

        for grid_id in &map.grid_args {
            let exchange = crate::ast::call(
                &mut session.node_ids,
                span,
                "exchange_begin",
                vec![crate::ast::var(&mut session.node_ids, span, format!("__grid_{}", grid_id.0))],
            );
            iter_body.push(Stmt::Expr(exchange));
        }

        let launch_interior = crate::ast::call(
            &mut session.node_ids,
            span,
            &map.run_inner_name(),
            vec![crate::ast::var(&mut session.node_ids, span, "stream_interior")],
        );
        iter_body.push(Stmt::Expr(launch_interior));

        for dim in 0..rank {
            for side in Side::all() {
                let wait = crate::ast::call(
                    &mut session.node_ids,
                    span,
                    "halo_received_wait",
                    vec![
                        crate::ast::int(&mut session.node_ids, span, dim as i64),
                        crate::ast::int(&mut session.node_ids, span, side as i64),
                    ],
                );
                iter_body.push(Stmt::Expr(wait));
                let launch_boundary = crate::ast::call(
                    &mut session.node_ids,
                    span,
                    &map.run_boundary_name(dim, side),
                    vec![crate::ast::var(
                        &mut session.node_ids,
                        span,
                        format!("stream_boundary_{}_{}", dim + 1, side.suffix()),
                    )],
                );
                iter_body.push(Stmt::Expr(launch_boundary));
            }
        }

        let sync = crate::ast::call(&mut session.node_ids, span, "cudaDeviceSynchronize", Vec::new());
        iter_body.push(Stmt::Expr(sync));

        for grid_id in &map.grid_args {
            let swap = crate::ast::call(
                &mut session.node_ids,
                span,
                "GridSwap",
                vec![crate::ast::var(&mut session.node_ids, span, format!("__grid_{}", grid_id.0))],
            );
            iter_body.push(Stmt::Expr(swap));
        }
    }

    wrap_count_loop(session, iter_body, count)
}

/// Single boundary run kernel guarded by `domain_inclusion_inner_check`,
/// used when multi-stream boundary mode is disabled (§4.6).
fn build_single_stream_run_body(session: &mut Session, run_index: usize, count: Option<&Expr>) -> Vec<Stmt> {
    let span = Span::default();
    let maps = session.run(run_index).maps.clone();
    let mut iter_body = Vec::new();

    for map_id in &maps {
        let map = session.stencil_map(*map_id).clone();
        for grid_id in &map.grid_args {
            let exchange = crate::ast::call(
                &mut session.node_ids,
                span,
                "exchange_begin",
                vec![crate::ast::var(&mut session.node_ids, span, format!("__grid_{}", grid_id.0))],
            );
            iter_body.push(Stmt::Expr(exchange));
        }
        let launch_interior = crate::ast::call(
            &mut session.node_ids,
            span,
            &map.run_inner_name(),
            Vec::new(),
        );
        iter_body.push(Stmt::Expr(launch_interior));
        let launch_boundary = crate::ast::call(
            &mut session.node_ids,
            span,
            &format!("{}_boundary", map.run_name()),
            Vec::new(),
        );
        iter_body.push(Stmt::Expr(launch_boundary));
        let sync = crate::ast::call(&mut session.node_ids, span, "cudaDeviceSynchronize", Vec::new());
        iter_body.push(Stmt::Expr(sync));
        for grid_id in &map.grid_args {
            let swap = crate::ast::call(
                &mut session.node_ids,
                span,
                "GridSwap",
                vec![crate::ast::var(&mut session.node_ids, span, format!("__grid_{}", grid_id.0))],
            );
            iter_body.push(Stmt::Expr(swap));
        }
    }

    wrap_count_loop(session, iter_body, count)
}

fn wrap_count_loop(session: &mut Session, iter_body: Vec<Stmt>, count: Option<&Expr>) -> Vec<Stmt> {
    let span = Span::default();
    match count {
        Some(count_expr) => vec![Stmt::For {
            span,
            var: "__iter".to_string(),
            start: crate::ast::int(&mut session.node_ids, span, 0),
            end: count_expr.clone(),
            body: iter_body,
        }],
        None => iter_body,
    }
}

/// The single combined boundary-guard body used when multi-stream mode is
/// off: three nested loops over the full domain, each iteration guarded by
/// `domain_inclusion_inner_check(width)` so only halo-adjacent cells run the
/// (untransformed) kernel.
pub fn build_combined_boundary_body(
    session: &mut Session,
    map: &StencilMap,
    kernel: &Kernel,
    width: i64,
) -> Vec<Stmt> {
    let span = Span::default();
    let idx_vars = index_var_names(kernel.rank);
    let guard = builder::domain_inclusion_inner_check(&mut session.node_ids, &idx_vars, &map.domain, width);
    let call = super::kernel_call_stmt(session, &CudaBuilder::new(session), map, kernel);
    let mut body = vec![Stmt::If {
        span,
        cond: guard,
        then_branch: vec![call],
        else_branch: None,
    }];
    for d in 0..kernel.rank {
        let min = map.domain.local_min_or_global()[d];
        let max = map.domain.local_max_or_global()[d];
        let start = crate::ast::int(&mut session.node_ids, span, min);
        let end = crate::ast::int(&mut session.node_ids, span, max);
        body = vec![Stmt::For {
            span,
            var: idx_vars[d].clone(),
            start,
            end,
            body,
        }];
    }
    body
}

pub fn lower(session: &mut Session, map_id: StencilMapId, run_index: usize) -> Result<LoweredMap> {
    let map = session.stencil_map(map_id).clone();
    let kernel = session.kernel_checked(&map.kernel_name, Span::default())?.clone();
    let builder = MpiCudaBuilder::new(session, &map);
    let (kernel, warnings) = crate::optimize::unconditional_get::run(session, &builder, &kernel);

    let variants = specialize_all(session, &kernel);
    let mut run_kernel_funcs = Vec::new();
    for variant_kernel in &variants {
        let shell = builder.build_run_kernel_func(session, &map);
        let mut func = shell.func;
        func.name = variant_kernel.name.clone();
        func.body = builder.build_run_kernel_func_body(session, &map, variant_kernel);
        run_kernel_funcs.push(func);
    }

    let count = session.run(run_index).count.clone();
    let run_func_body = builder.build_run_func_body(session, run_index, count.as_ref());

    Ok(LoweredMap {
        stencil_type_name: map.stencil_type_name(),
        run_kernel_funcs,
        run_func_body,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, BinOp, GridParam};
    use crate::attributes::GridGetAttribute;
    use crate::model::{Domain, PointLayout, Primitive, StencilIndex};
    use crate::session::SessionConfig;

    fn make_get(ids: &mut ast::NodeIdGen, offsets: &[i64]) -> (Expr, StencilIndexList) {
        let span = Span::default();
        let mut args = vec![ast::var(ids, span, "g")];
        let mut indices = Vec::new();
        for (d, &o) in offsets.iter().enumerate() {
            let base = ast::var(ids, span, ["x", "y", "z"][d]);
            let e = if o == 0 {
                base
            } else {
                ast::binary(ids, span, BinOp::Add, base, ast::int(ids, span, o))
            };
            args.push(e);
            indices.push(StencilIndex { dim: d + 1, offset: o });
        }
        (ast::call(ids, span, "PSGridGet", args), StencilIndexList::new(indices))
    }

    #[test]
    fn interior_redirects_every_get_to_no_halo() {
        let mut session = Session::new(SessionConfig::default());
        let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
        let g = session.allocate_grid(gt, Vec::new());
        let domain = Domain::new(vec![0, 0, 0], vec![8, 8, 8]);
        let map_id = session.new_stencil_map("k".into(), domain, vec![g]);
        let mut ids = ast::NodeIdGen::default();
        let (call, indices) = make_get(&mut ids, &[1, 0, 0]);
        session.attrs.set_grid_get(
            call.id(),
            GridGetAttribute {
                grid_type: gt,
                grid_param: g,
                in_kernel: true,
                is_periodic: false,
                indices,
                member_name: String::new(),
                static_array_indices: Vec::new(),
            },
        );
        let kernel = Kernel {
            name: "k".into(),
            rank: 3,
            index_params: vec!["x".into(), "y".into(), "z".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![Stmt::Expr(call)],
        };
        let _ = map_id;

        let interior = specialize_kernel(&session, &kernel, Variant::Interior);
        assert_eq!(interior.name, "k_inner");
        match &interior.body[0] {
            Stmt::Expr(Expr::Call { func, .. }) => {
                assert!(func.starts_with("get_addr_no_halo_"));
            }
            _ => panic!("expected call"),
        }
    }

    fn single_get_boundary(offset: i64, side: Side) -> Kernel {
        let mut session = Session::new(SessionConfig::default());
        let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
        let g = session.allocate_grid(gt, Vec::new());
        let domain = Domain::new(vec![0, 0, 0], vec![8, 8, 8]);
        let _map_id = session.new_stencil_map("k".into(), domain, vec![g]);
        let mut ids = ast::NodeIdGen::default();
        let (call, indices) = make_get(&mut ids, &[offset, 0, 0]);
        session.attrs.set_grid_get(
            call.id(),
            GridGetAttribute {
                grid_type: gt,
                grid_param: g,
                in_kernel: true,
                is_periodic: false,
                indices,
                member_name: String::new(),
                static_array_indices: Vec::new(),
            },
        );
        let kernel = Kernel {
            name: "k".into(),
            rank: 3,
            index_params: vec!["x".into(), "y".into(), "z".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![Stmt::Expr(call)],
        };
        specialize_kernel(&session, &kernel, Variant::Boundary { dim: 0, side })
    }

    fn addr_func_name(kernel: &Kernel) -> &str {
        match &kernel.body[0] {
            Stmt::Expr(Expr::Call { func, .. }) => func,
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn boundary_redirects_opposite_side_offset_to_no_halo() {
        // offset -1 in dim0 against a Fw (high-side) boundary slab points
        // away from that edge, into the interior: provably in-bounds.
        let boundary = single_get_boundary(-1, Side::Fw);
        assert!(addr_func_name(&boundary).starts_with("get_addr_no_halo_"));
    }

    #[test]
    fn boundary_keeps_halo_addressing_for_same_side_offset() {
        // offset +1 in dim0 against a Fw boundary slab points further toward
        // that edge, into the halo: must stay halo-aware.
        let boundary = single_get_boundary(1, Side::Fw);
        assert!(!addr_func_name(&boundary).starts_with("get_addr_no_halo_"));
    }

    #[test]
    fn boundary_redirection_mirrors_for_bw_side() {
        let safe = single_get_boundary(1, Side::Bw);
        assert!(addr_func_name(&safe).starts_with("get_addr_no_halo_"));
        let unsafe_ = single_get_boundary(-1, Side::Bw);
        assert!(!addr_func_name(&unsafe_).starts_with("get_addr_no_halo_"));
    }
}
