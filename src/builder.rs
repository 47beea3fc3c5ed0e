//! C4 — Builder Interface.
//!
//! A single polymorphic interface over backend-neutral lowering fragments
//! (§4.2). Every backend implements every operation; a delegator pattern
//! (see `backend::mpi_cuda::Delegator`) lets a compound backend forward most
//! operations to a sub-builder while overriding only the ones that differ.
//! This is the *only* mutation surface kernels and maps are rewritten
//! through — backends never touch `ast::Stmt`/`ast::Expr` directly outside a
//! `Builder` method.

use crate::ast::{BinOp, Expr, NodeIdGen, Stmt};
use crate::error::Span;
use crate::model::{Grid, GridId, ReduceOp, StencilIndexList};
use crate::session::Session;

/// Everything a `BuildGridOffset` call needs, bundled so the trait method
/// doesn't grow an ever-longer positional parameter list (§4.2 contract).
pub struct OffsetArgs<'a> {
    pub grid: GridId,
    pub rank: usize,
    pub index_exprs: &'a [Expr],
    /// The StencilIndexList that induced these index expressions, when
    /// known; absent for conservative/worst-case emission.
    pub indices: Option<&'a StencilIndexList>,
    pub is_kernel: bool,
    pub is_periodic: bool,
}

/// A synthesized run-kernel function: the launchable entry point plus
/// whatever wrapper the backend needs around it.
pub struct RunKernelFunc {
    pub name: String,
    pub func: crate::ast::Function,
}

pub trait Builder {
    /// The expression that evaluates to the grid's element buffer base
    /// address.
    fn build_grid_base_addr(&self, session: &mut Session, grid: GridId) -> Expr;

    /// The linear element offset into a grid's buffer, per the canonical
    /// layout `off = i_1 + i_2*dim_0 + i_3*dim_0*dim_1` (§4.2, §6). When
    /// `args.is_periodic` every `i_d` is first wrapped with the
    /// positive-remainder rule `((i_d + dim_d) mod dim_d)`.
    fn build_grid_offset(&self, session: &mut Session, args: &OffsetArgs) -> Expr;

    /// A full grid read: base address plus offset, dereferenced.
    fn build_grid_get(&self, session: &mut Session, args: &OffsetArgs) -> Expr {
        let base = self.build_grid_base_addr(session, args.grid);
        let offset = self.build_grid_offset(session, args);
        crate::ast::index(&mut session.node_ids, Span::default(), base, offset)
    }

    /// A full grid write: assign `value` to the self-offset element of
    /// `grid`, optionally through `member_name` for record points.
    fn build_grid_emit(
        &self,
        session: &mut Session,
        grid: GridId,
        rank: usize,
        index_exprs: &[Expr],
        member_name: &str,
        value: Expr,
    ) -> Stmt;

    /// The argument list to pass a kernel call: the index variables followed
    /// by one argument per grid parameter (§4.2 "BuildKernelCallArgList").
    fn build_kernel_call_arg_list(
        &self,
        session: &mut Session,
        index_vars: &[String],
        grid_args: &[GridId],
    ) -> Vec<Expr>;

    /// A call to the user kernel with the given arguments.
    fn build_kernel_call(
        &self,
        session: &mut Session,
        kernel_name: &str,
        args: Vec<Expr>,
    ) -> Stmt {
        let span = Span::default();
        Stmt::Expr(crate::ast::call(&mut session.node_ids, span, kernel_name, args))
    }

    /// A boolean expression that is true iff `(idx_0, ..., idx_{rank-1})`
    /// lies inside `[local_min[d], local_max[d])` for every `d`.
    fn build_domain_inclusion_check(
        &self,
        session: &mut Session,
        idx_vars: &[String],
        domain: &crate::model::Domain,
    ) -> Expr;

    /// The shell of the per-StencilMap run-kernel function: the empty body
    /// with the right signature/name, ready for the backend to fill in
    /// (§4.2 "BuildRunKernelFunc").
    fn build_run_kernel_func(
        &self,
        session: &mut Session,
        map: &crate::model::StencilMap,
    ) -> RunKernelFunc;

    /// The body statements of the run-kernel function: index computation,
    /// the inclusion guard, and the kernel call (§4.2
    /// "BuildRunKernelFuncBody"). Default shared by reference/MPI; CUDA and
    /// MPI+CUDA override to add block/thread index derivation.
    fn build_run_kernel_func_body(
        &self,
        session: &mut Session,
        map: &crate::model::StencilMap,
        kernel: &crate::ast::Kernel,
    ) -> Vec<Stmt>;

    /// The on-device element type declaration for a record point type, used
    /// only by backends that cross a host/device boundary (§4.4). Backends
    /// without such a boundary return `None`.
    fn build_on_device_grid_type(
        &self,
        _session: &mut Session,
        _grid_type: crate::model::GridTypeId,
    ) -> Option<String> {
        None
    }

    /// The constructor function synthesized for a user-declared record point
    /// type's grid (`PSGrid<r>D<T>New` lowering for record types).
    fn build_grid_new_func_for_user_type(
        &self,
        session: &mut Session,
        grid_type: crate::model::GridTypeId,
    ) -> crate::ast::Function;

    /// `PSGridCopyin` lowering for a user record type: copies host buffer
    /// `buf` into `g`'s element buffer, member by member.
    fn build_grid_copy_in_func_for_user_type(
        &self,
        session: &mut Session,
        grid_type: crate::model::GridTypeId,
    ) -> crate::ast::Function;

    /// `PSGridCopyout` lowering, the mirror of copy-in.
    fn build_grid_copy_out_func_for_user_type(
        &self,
        session: &mut Session,
        grid_type: crate::model::GridTypeId,
    ) -> crate::ast::Function;

    /// The body of the per-run driver: the `count`-iteration loop that
    /// invokes each map's run-kernel in sequence and swaps written grids
    /// (§4.2 "BuildRunFuncBody"). Default assumes no halo exchange and no
    /// overlap — the shape shared by the reference backend; MPI/MPI+CUDA
    /// override.
    fn build_run_func_body(
        &self,
        session: &mut Session,
        run_index: usize,
        count: Option<&Expr>,
    ) -> Vec<Stmt>;
}

/// Shared helper: the canonical index-to-offset expression
/// `i_1 + i_2*dim(g,0) + i_3*dim(g,0)*dim(g,1) + ...`, optionally with each
/// `i_d` wrapped by the positive-remainder periodic rule first. Every
/// backend's `build_grid_offset` delegates here; this is the one place the
/// layout formula from §4.2/§6 is written down.
pub fn canonical_offset(ids: &mut NodeIdGen, grid: GridId, index_exprs: &[Expr], is_periodic: bool) -> Expr {
    canonical_offset_with_dim_fn(ids, grid, index_exprs, is_periodic, "PSGridDim")
}

/// As `canonical_offset`, but naming the dimension-size intrinsic
/// explicitly — the CUDA/MPI+CUDA backends call the on-device form
/// `__PSGridDimDev` instead of the host `PSGridDim` (§4.4).
pub fn canonical_offset_with_dim_fn(
    ids: &mut NodeIdGen,
    grid: GridId,
    index_exprs: &[Expr],
    is_periodic: bool,
    dim_fn: &str,
) -> Expr {
    let span = Span::default();
    let wrapped: Vec<Expr> = index_exprs
        .iter()
        .enumerate()
        .map(|(d, e)| {
            if is_periodic {
                wrap_periodic(ids, e.clone(), grid, d, dim_fn)
            } else {
                e.clone()
            }
        })
        .collect();

    let mut terms: Vec<Expr> = Vec::with_capacity(wrapped.len());
    for (d, idx) in wrapped.iter().enumerate() {
        let mut term = idx.clone();
        for k in 0..d {
            let dim_k = grid_dim_call(ids, grid, k, dim_fn);
            term = crate::ast::binary(ids, span, BinOp::Mul, term, dim_k);
        }
        terms.push(term);
    }
    terms
        .into_iter()
        .reduce(|acc, t| crate::ast::binary(ids, span, BinOp::Add, acc, t))
        .unwrap_or_else(|| crate::ast::int(ids, span, 0))
}

fn grid_dim_call(ids: &mut NodeIdGen, grid: GridId, dim: usize, dim_fn: &str) -> Expr {
    let span = Span::default();
    crate::ast::call(
        ids,
        span,
        dim_fn,
        vec![
            Expr::Var {
                id: ids.next(),
                span,
                name: format!("__grid_{}", grid.0),
            },
            crate::ast::int(ids, span, dim as i64),
        ],
    )
}

/// `((i_d + dim_d) mod dim_d)` — the positive-remainder periodic wrap (§4.2,
/// §6). Distinct from Rust's `%`, which can return a negative result for a
/// negative dividend.
fn wrap_periodic(ids: &mut NodeIdGen, index_expr: Expr, grid: GridId, dim: usize, dim_fn: &str) -> Expr {
    let span = Span::default();
    let dim_call = grid_dim_call(ids, grid, dim, dim_fn);
    let sum = crate::ast::binary(ids, span, BinOp::Add, index_expr, dim_call.clone());
    crate::ast::binary(ids, span, BinOp::Mod, sum, dim_call)
}

/// Evaluate `canonical_offset` for literal integer indices against a grid
/// with statically known per-dimension sizes — used by tests to check the
/// offset-correctness and periodic-idempotence properties from §8 without
/// needing a full AST evaluator.
pub fn eval_canonical_offset(dims: &[i64], indices: &[i64], periodic: bool) -> i64 {
    let wrapped: Vec<i64> = indices
        .iter()
        .zip(dims.iter())
        .map(|(&i, &d)| if periodic { ((i % d) + d) % d } else { i })
        .collect();
    let mut total = 0i64;
    for (d, &idx) in wrapped.iter().enumerate() {
        let mut term = idx;
        for k in 0..d {
            term *= dims[k];
        }
        total += term;
    }
    total
}

/// The kernel-call argument list shared by every non-delegating backend:
/// the rank's index variables, in order, followed by one argument per grid
/// parameter — a direct variable reference to the grid (§4.2).
pub fn default_kernel_call_arg_list(
    ids: &mut NodeIdGen,
    index_vars: &[String],
    grid_args: &[GridId],
) -> Vec<Expr> {
    let span = Span::default();
    let mut out: Vec<Expr> = index_vars
        .iter()
        .map(|v| crate::ast::var(ids, span, v.clone()))
        .collect();
    out.extend(
        grid_args
            .iter()
            .map(|g| crate::ast::var(ids, span, format!("__grid_{}", g.0))),
    );
    out
}

/// The domain-inclusion-check shared by reference/MPI/CUDA:
/// `AND_d (idx_d >= local_min[d] && idx_d < local_max[d])`.
pub fn default_domain_inclusion_check(
    ids: &mut NodeIdGen,
    idx_vars: &[String],
    domain: &crate::model::Domain,
) -> Expr {
    let span = Span::default();
    let min = domain.local_min_or_global();
    let max = domain.local_max_or_global();
    let mut conjuncts = Vec::with_capacity(idx_vars.len());
    for (d, var_name) in idx_vars.iter().enumerate() {
        let idx = crate::ast::var(ids, span, var_name.clone());
        let ge = crate::ast::binary(
            ids,
            span,
            BinOp::Ge,
            idx.clone(),
            crate::ast::int(ids, span, min[d]),
        );
        let lt = crate::ast::binary(ids, span, BinOp::Lt, idx, crate::ast::int(ids, span, max[d]));
        conjuncts.push(crate::ast::binary(ids, span, BinOp::And, ge, lt));
    }
    conjuncts
        .into_iter()
        .reduce(|acc, c| crate::ast::binary(ids, span, BinOp::And, acc, c))
        .unwrap_or_else(|| int_true(ids, span))
}

fn int_true(ids: &mut NodeIdGen, span: Span) -> Expr {
    crate::ast::int(ids, span, 1)
}

/// `BuildDomainInclusionInner`, §4.6: true iff at least one dimension lies
/// within `width` of either edge of its local slab.
pub fn domain_inclusion_inner_check(
    ids: &mut NodeIdGen,
    idx_vars: &[String],
    domain: &crate::model::Domain,
    width: i64,
) -> Expr {
    let span = Span::default();
    let min = domain.local_min_or_global();
    let max = domain.local_max_or_global();
    let mut disjuncts = Vec::with_capacity(idx_vars.len());
    for (d, var_name) in idx_vars.iter().enumerate() {
        let idx = crate::ast::var(ids, span, var_name.clone());
        let lt_inner_min = crate::ast::binary(
            ids,
            span,
            BinOp::Lt,
            idx.clone(),
            crate::ast::int(ids, span, min[d] + width),
        );
        let ge_inner_max = crate::ast::binary(
            ids,
            span,
            BinOp::Ge,
            idx,
            crate::ast::int(ids, span, max[d] - width),
        );
        disjuncts.push(crate::ast::binary(ids, span, BinOp::Or, lt_inner_min, ge_inner_max));
    }
    disjuncts
        .into_iter()
        .reduce(|acc, c| crate::ast::binary(ids, span, BinOp::Or, acc, c))
        .unwrap_or_else(|| crate::ast::int(ids, span, 0))
}

/// Look up a `Grid`'s static size for a dimension when known, falling back
/// to `None` for a dynamically-sized grid (builders that need a concrete
/// size for constant folding check this first).
pub fn static_dim(grid: &Grid, dim: usize) -> Option<i64> {
    grid.static_size.as_ref().and_then(|sizes| sizes.get(dim).copied())
}

/// The symbolic name a user record point type is referred to by in
/// synthesized function names, e.g. `__PSGridNew_Point`.
pub fn user_type_name(layout: &crate::model::PointLayout) -> String {
    match layout {
        crate::model::PointLayout::Primitive(p) => format!("{p:?}"),
        crate::model::PointLayout::Record { type_name, .. } => type_name.clone(),
    }
}

/// Member-wise copy loop shared by `BuildGridCopyInFuncForUserType` and
/// `BuildGridCopyOutFuncForUserType` (§4.2): one `for __i in 0..n` per
/// member, copying between the flat host buffer `buf` and grid `g`.
/// `buf_to_grid` selects the direction; primitive point types get a single
/// loop with no member projection.
pub fn build_copy_loop(ids: &mut NodeIdGen, layout: &crate::model::PointLayout, buf_to_grid: bool) -> Vec<Stmt> {
    let span = Span::default();
    let members: Vec<String> = match layout {
        crate::model::PointLayout::Primitive(_) => vec![String::new()],
        crate::model::PointLayout::Record { members, .. } => {
            members.iter().map(|m| m.name.clone()).collect()
        }
    };
    let mut body = Vec::with_capacity(members.len());
    for member in members {
        let i = crate::ast::var(ids, span, "__i");
        let g_elem = crate::ast::index(ids, span, crate::ast::var(ids, span, "g"), i.clone());
        let buf_elem = crate::ast::index(ids, span, crate::ast::var(ids, span, "buf"), i);
        let (g_side, buf_side) = if member.is_empty() {
            (g_elem, buf_elem)
        } else {
            (
                Expr::Field {
                    id: ids.next(),
                    span,
                    receiver: Box::new(g_elem),
                    member: member.clone(),
                },
                Expr::Field {
                    id: ids.next(),
                    span,
                    receiver: Box::new(buf_elem),
                    member,
                },
            )
        };
        let (target, value) = if buf_to_grid { (g_side, buf_side) } else { (buf_side, g_side) };
        let start = crate::ast::int(ids, span, 0);
        let end = crate::ast::var(ids, span, "n");
        let assign = Stmt::Assign { span, target, value };
        body.push(Stmt::For {
            span,
            var: "__i".to_string(),
            start,
            end,
            body: vec![assign],
        });
    }
    body
}

/// `PSReduceGrid<T>(out, op, g)` lowering (§4.5): a function that folds
/// `grid` over `bounds` (the caller supplies the full domain for the
/// reference backend, or the halo-excluded interior for MPI, via
/// `backend::mpi::reduction_interior_bounds`), writing the fold and the
/// element count it walked into `out_value`/`out_count` — the MPI runtime
/// all-reduces both across ranks, the reference backend just reads
/// `out_value` directly.
pub fn build_reduce_func(
    ids: &mut NodeIdGen,
    func_name: &str,
    grid: GridId,
    bounds: &[(i64, i64)],
    op: ReduceOp,
    is_float: bool,
) -> crate::ast::Function {
    let span = Span::default();
    let rank = bounds.len();
    let idx_vars: Vec<String> = ["x", "y", "z"][..rank].iter().map(|s| s.to_string()).collect();

    let value_var = "__reduce_value".to_string();
    let count_var = "__reduce_count".to_string();

    let identity = if is_float {
        Expr::FloatLit {
            id: ids.next(),
            span,
            value: op.identity_float(),
        }
    } else {
        crate::ast::int(ids, span, op.identity_int())
    };

    let mut body = vec![
        Stmt::Let {
            span,
            name: value_var.clone(),
            is_mutable: true,
            init: Some(identity),
        },
        Stmt::Let {
            span,
            name: count_var.clone(),
            is_mutable: true,
            init: Some(crate::ast::int(ids, span, 0)),
        },
    ];

    let index_exprs: Vec<Expr> = idx_vars.iter().map(|v| crate::ast::var(ids, span, v.clone())).collect();
    let offset = canonical_offset(ids, grid, &index_exprs, false);
    let base = crate::ast::var(ids, span, format!("__grid_{}", grid.0));
    let elem = crate::ast::index(ids, span, base, offset);

    let combined = match op {
        ReduceOp::Sum => crate::ast::binary(ids, span, BinOp::Add, crate::ast::var(ids, span, value_var.clone()), elem),
        ReduceOp::Prod => crate::ast::binary(ids, span, BinOp::Mul, crate::ast::var(ids, span, value_var.clone()), elem),
        ReduceOp::Max => crate::ast::call(
            ids,
            span,
            "max",
            vec![crate::ast::var(ids, span, value_var.clone()), elem],
        ),
        ReduceOp::Min => crate::ast::call(
            ids,
            span,
            "min",
            vec![crate::ast::var(ids, span, value_var.clone()), elem],
        ),
    };
    let update_value = Stmt::Assign {
        span,
        target: crate::ast::var(ids, span, value_var.clone()),
        value: combined,
    };
    let incr_count = Stmt::Assign {
        span,
        target: crate::ast::var(ids, span, count_var.clone()),
        value: crate::ast::binary(
            ids,
            span,
            BinOp::Add,
            crate::ast::var(ids, span, count_var.clone()),
            crate::ast::int(ids, span, 1),
        ),
    };

    let mut loop_body = vec![update_value, incr_count];
    for d in 0..rank {
        let (start, end) = bounds[d];
        loop_body = vec![Stmt::For {
            span,
            var: idx_vars[d].clone(),
            start: crate::ast::int(ids, span, start),
            end: crate::ast::int(ids, span, end),
            body: loop_body,
        }];
    }
    body.extend(loop_body);

    body.push(Stmt::Assign {
        span,
        target: crate::ast::var(ids, span, "out_value"),
        value: crate::ast::var(ids, span, value_var),
    });
    body.push(Stmt::Assign {
        span,
        target: crate::ast::var(ids, span, "out_count"),
        value: crate::ast::var(ids, span, count_var),
    });

    crate::ast::Function {
        name: func_name.to_string(),
        params: vec!["out_value".to_string(), "out_count".to_string()],
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_correctness_matches_spec_formula() {
        let dims = vec![4, 5, 6];
        let indices = vec![1, 2, 3];
        let expected = 1 + 2 * 4 + 3 * 4 * 5;
        assert_eq!(eval_canonical_offset(&dims, &indices, false), expected);
    }

    #[test]
    fn periodic_idempotence_under_dim_multiples() {
        let dims = vec![8, 8, 8];
        let base = vec![3, 5, 1];
        let shifted = vec![3 + 8 * 4, 5 - 8 * 2, 1 + 8];
        assert_eq!(
            eval_canonical_offset(&dims, &base, true),
            eval_canonical_offset(&dims, &shifted, true)
        );
    }

    #[test]
    fn periodic_offset_never_negative_contribution() {
        let dims = vec![10];
        let indices = vec![-1];
        assert_eq!(eval_canonical_offset(&dims, &indices, true), 9);
    }
}
