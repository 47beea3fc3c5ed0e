//! C3 — Stencil Analysis.
//!
//! Recovers, per grid parameter of a kernel, the set of neighbor offsets
//! touched (§4.1): recognizes `PSGridGet[Periodic]`/emit call forms and
//! already-lowered pointer-arithmetic forms, decomposes each index into
//! `(iteration_variable, constant_offset)`, and folds the result into the
//! grid's `StencilRange` (and, for record points, its
//! `MemberStencilRangeMap`).

use crate::ast::{BinOp, Expr, Kernel};
use crate::attributes::{GridEmitAttribute, GridGetAttribute};
use crate::error::{Result, Span, TranslationError};
use crate::model::{GridId, ReduceOp, StencilIndex, StencilIndexList, StencilMapId, StencilRange};
use crate::session::Session;

/// Which halo slab a boundary kernel/run targets along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bw,
    Fw,
}

impl Side {
    pub fn suffix(&self) -> &'static str {
        match self {
            Side::Bw => "bw",
            Side::Fw => "fw",
        }
    }

    pub fn all() -> [Side; 2] {
        [Side::Bw, Side::Fw]
    }
}

/// Outcome of decomposing a single index expression against the kernel's
/// iteration variables.
enum DecomposedIndex {
    /// Tied to iteration variable `dim` (1-indexed) with constant `offset`.
    Affine { dim: usize, offset: i64 },
    /// Could not be resolved to a single iteration variable, but at least
    /// one kernel iteration variable appears somewhere in the expression,
    /// so a configured bound can be applied instead of rejecting outright.
    Irregular,
    /// No kernel iteration variable appears anywhere in the expression:
    /// nothing to bound against.
    Unbounded,
}

fn contains_index_var(expr: &Expr, index_params: &[String]) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if let Expr::Var { name, .. } = e {
            if index_params.iter().any(|p| p == name) {
                found = true;
            }
        }
    });
    found
}

/// Decompose one index expression into `(iteration_variable, constant
/// offset)`, per §4.1. Handles a bare variable reference and `var ± const`.
fn decompose_affine(expr: &Expr, index_params: &[String]) -> DecomposedIndex {
    match expr {
        Expr::Var { name, .. } => {
            if let Some(pos) = index_params.iter().position(|p| p == name) {
                return DecomposedIndex::Affine {
                    dim: pos + 1,
                    offset: 0,
                };
            }
            DecomposedIndex::Unbounded
        }
        Expr::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
            ..
        } => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Var { name, .. }, Expr::IntLit { value, .. })
            | (Expr::IntLit { value, .. }, Expr::Var { name, .. }) => {
                if let Some(pos) = index_params.iter().position(|p| p == name) {
                    DecomposedIndex::Affine {
                        dim: pos + 1,
                        offset: *value,
                    }
                } else {
                    DecomposedIndex::Unbounded
                }
            }
            _ => fallback_decompose(expr, index_params),
        },
        Expr::Binary {
            op: BinOp::Sub,
            lhs,
            rhs,
            ..
        } => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Var { name, .. }, Expr::IntLit { value, .. }) => {
                if let Some(pos) = index_params.iter().position(|p| p == name) {
                    DecomposedIndex::Affine {
                        dim: pos + 1,
                        offset: -*value,
                    }
                } else {
                    DecomposedIndex::Unbounded
                }
            }
            _ => fallback_decompose(expr, index_params),
        },
        _ => fallback_decompose(expr, index_params),
    }
}

fn fallback_decompose(expr: &Expr, index_params: &[String]) -> DecomposedIndex {
    if contains_index_var(expr, index_params) {
        DecomposedIndex::Irregular
    } else {
        DecomposedIndex::Unbounded
    }
}

/// Reverse-engineer the already-lowered pointer-arithmetic form
/// `i_1 + i_2*dim(g,0) + i_3*dim(g,0)*dim(g,1) + ...` back into per-dimension
/// leaf index expressions, by recognizing the multiplicative tower of
/// `PSGridDim` calls. Returns one leaf expression per recognized term,
/// ordered by the dimension it was multiplied into (dim 0 first).
///
/// Kept for backends/passes that need to re-derive per-dimension indices
/// from an already-lowered offset expression (§4.1, §4.7); stencil analysis
/// itself only ever sees call-form accesses in this crate's test corpus,
/// since the lowered form is produced by `builder::offset` downstream of us.
#[allow(dead_code)]
pub fn unflatten_offset_tower(offset: &Expr) -> Vec<Expr> {
    let mut terms = Vec::new();
    fn flatten(e: &Expr, out: &mut Vec<Expr>) {
        if let Expr::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
            ..
        } = e
        {
            flatten(lhs, out);
            flatten(rhs, out);
        } else {
            out.push(e.clone());
        }
    }
    flatten(offset, &mut terms);

    let mut by_dim: Vec<(usize, Expr)> = Vec::new();
    for term in terms {
        let mut cur = term;
        let mut mult_count = 0usize;
        loop {
            match cur {
                Expr::Binary {
                    op: BinOp::Mul,
                    lhs,
                    rhs,
                    ..
                } => {
                    if matches!(rhs.as_call(), Some(("PSGridDim", _))) {
                        mult_count += 1;
                        cur = *lhs;
                        continue;
                    }
                    if matches!(lhs.as_call(), Some(("PSGridDim", _))) {
                        mult_count += 1;
                        cur = *rhs;
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
        by_dim.push((mult_count, cur));
    }
    by_dim.sort_by_key(|(d, _)| *d);
    by_dim.into_iter().map(|(_, e)| e).collect()
}

fn apply_access(
    range: &mut StencilRange,
    indices: &StencilIndexList,
    rank: usize,
    irregular: bool,
    is_periodic: bool,
    bound: i64,
) {
    if irregular {
        range.add_irregular(bound);
    } else if let Some(offsets) = indices.regular_offsets(rank) {
        range.add_regular(&offsets, is_periodic);
    } else {
        range.add_irregular(bound);
    }
}

/// A recognized `PSReduceGrid<T>(out, op, g)` call site.
#[derive(Debug, Clone)]
pub struct ReduceCall {
    pub out_var: String,
    pub op: ReduceOp,
    pub grid_var: String,
}

/// Recognizes a `PSReduceGrid*` call and extracts its operator and
/// argument names. `PSReduceGrid<T>` carries no axis arguments of its
/// own (§4.5/§6) — any arity other than the canonical `(out, op, g)`
/// means the call was asking to reduce along a subset of axes, which
/// is rejected rather than silently reinterpreted.
pub fn parse_reduce_call(expr: &Expr) -> Option<Result<ReduceCall>> {
    let (name, args) = expr.as_call()?;
    crate::ast::Intrinsic::recognize(name, args.len()).filter(|i| *i == crate::ast::Intrinsic::ReduceGrid)?;
    if args.len() != 3 {
        return Some(Err(TranslationError::PartialAxisReduction { span: expr.span() }));
    }
    let out_var = match &args[0] {
        Expr::Var { name, .. } => name.clone(),
        _ => return Some(Err(TranslationError::PartialAxisReduction { span: expr.span() })),
    };
    let op = match &args[1] {
        Expr::Var { name, .. } => match name.as_str() {
            "sum" => ReduceOp::Sum,
            "max" => ReduceOp::Max,
            "min" => ReduceOp::Min,
            "prod" => ReduceOp::Prod,
            _ => return Some(Err(TranslationError::PartialAxisReduction { span: expr.span() })),
        },
        _ => return Some(Err(TranslationError::PartialAxisReduction { span: expr.span() })),
    };
    let grid_var = match &args[2] {
        Expr::Var { name, .. } => name.clone(),
        _ => return Some(Err(TranslationError::PartialAxisReduction { span: expr.span() })),
    };
    Some(Ok(ReduceCall { out_var, op, grid_var }))
}

/// The stencil analyzer: a thin wrapper around `&mut Session`, mirroring
/// the teacher's `Analyzer` object holding per-compile mutable state.
pub struct StencilAnalyzer<'s> {
    session: &'s mut Session,
}

impl<'s> StencilAnalyzer<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        StencilAnalyzer { session }
    }

    /// Analyze every get/emit in `kernel`'s body against the grid
    /// arguments bound by `map_id`, updating the map's per-parameter
    /// ranges, each grid's own accumulating range, and attaching
    /// `GridGetAttribute`/`GridEmitAttribute` to every recognized access.
    pub fn analyze_map(&mut self, map_id: StencilMapId, kernel: &Kernel) -> Result<()> {
        let grid_args = self.session.stencil_map(map_id).grid_args.clone();
        if grid_args.len() != kernel.grid_params.len() {
            return Err(TranslationError::ArityMismatch {
                span: Span::default(),
                expected: kernel.grid_params.len(),
                got: grid_args.len(),
            });
        }

        let rank = kernel.rank;
        let mut exprs = Vec::new();
        crate::ast::walk_block(&kernel.body, &mut |e| exprs.push(e.clone()));

        // `get(g).m` surfaces as a `Field` wrapping the recognized get call
        // rather than a distinct intrinsic (unlike emit's explicit
        // `PSGridEmitUtype(g.m, v)` form, §6); record which inner call ids
        // are member-projected so `try_record_get` can recover `member_name`
        // for record-point reads (§4.1's GridGetAttribute.member_name).
        let mut field_member: std::collections::HashMap<crate::ast::NodeId, String> =
            std::collections::HashMap::new();
        for expr in &exprs {
            if let Expr::Field { receiver, member, .. } = expr {
                if let Some((name, args)) = receiver.as_call() {
                    if matches!(
                        crate::ast::Intrinsic::recognize(name, args.len()),
                        Some(crate::ast::Intrinsic::GridGet) | Some(crate::ast::Intrinsic::GridGetPeriodic)
                    ) {
                        field_member.insert(receiver.id(), member.clone());
                    }
                }
            }
        }

        for (param_idx, param) in kernel.grid_params.iter().enumerate() {
            let grid_id = grid_args[param_idx];
            for expr in &exprs {
                self.try_record_get(map_id, expr, kernel, param, param_idx, grid_id, rank, &field_member)?;
                self.try_record_emit(map_id, expr, param, param_idx, grid_id, rank)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn try_record_get(
        &mut self,
        map_id: StencilMapId,
        expr: &Expr,
        kernel: &Kernel,
        param: &crate::ast::GridParam,
        param_idx: usize,
        grid_id: GridId,
        rank: usize,
        field_member: &std::collections::HashMap<crate::ast::NodeId, String>,
    ) -> Result<()> {
        let (name, args) = match expr.as_call() {
            Some(pair) => pair,
            None => return Ok(()),
        };
        let is_periodic = match crate::ast::Intrinsic::recognize(name, args.len()) {
            Some(crate::ast::Intrinsic::GridGet) => false,
            Some(crate::ast::Intrinsic::GridGetPeriodic) => true,
            _ => return Ok(()),
        };
        if args.len() != rank + 1 {
            return Ok(());
        }
        let grid_var_name = match &args[0] {
            Expr::Var { name, .. } => name,
            _ => return Ok(()),
        };
        if grid_var_name != &param.name {
            return Ok(());
        }

        let (indices, irregular, unbounded_dim) =
            self.decompose_index_list(&args[1..], kernel)?;
        if let Some(dim) = unbounded_dim {
            return Err(TranslationError::NonAffineOffset {
                span: expr.span(),
                dim,
            });
        }

        let member_name = field_member.get(&expr.id()).cloned().unwrap_or_default();
        self.fold_access(
            map_id, param_idx, grid_id, rank, &indices, irregular, is_periodic, &member_name, &[],
        );

        self.session.attrs.set_grid_get(
            expr.id(),
            GridGetAttribute {
                grid_type: param.grid_type,
                grid_param: grid_id,
                in_kernel: true,
                is_periodic,
                indices,
                member_name,
                static_array_indices: Vec::new(),
            },
        );
        Ok(())
    }

    fn try_record_emit(
        &mut self,
        map_id: StencilMapId,
        expr: &Expr,
        param: &crate::ast::GridParam,
        param_idx: usize,
        grid_id: GridId,
        rank: usize,
    ) -> Result<()> {
        let (name, args) = match expr.as_call() {
            Some(pair) => pair,
            None => return Ok(()),
        };
        match crate::ast::Intrinsic::recognize(name, args.len()) {
            Some(crate::ast::Intrinsic::GridEmit) | Some(crate::ast::Intrinsic::GridEmitUtype) => {}
            _ => return Ok(()),
        }

        // First argument is either the bare grid var (primitive point) or a
        // `g.m` field access (record point, PSGridEmitUtype).
        let (grid_var_name, member_name) = match &args[0] {
            Expr::Var { name, .. } => (name.clone(), String::new()),
            Expr::Field { receiver, member, .. } => match receiver.as_ref() {
                Expr::Var { name, .. } => (name.clone(), member.clone()),
                _ => return Ok(()),
            },
            _ => return Ok(()),
        };
        if grid_var_name != param.name {
            return Ok(());
        }

        // Emit always targets the current iteration point (self/center).
        let indices = StencilIndexList::self_at(rank);
        self.fold_access(
            map_id, param_idx, grid_id, rank, &indices, false, false, &member_name, &[],
        );

        self.session.attrs.set_grid_emit(
            expr.id(),
            GridEmitAttribute {
                grid_type: param.grid_type,
                grid_param: grid_id,
                in_kernel: true,
                is_periodic: false,
                indices,
                member_name,
                static_array_indices: Vec::new(),
            },
        );
        Ok(())
    }

    /// Decompose `r` index expressions into a `StencilIndexList`. Returns
    /// `(list, irregular, unbounded_dim)`; `unbounded_dim` is `Some(i)` when
    /// index `i` could not be bounded at all (fatal).
    fn decompose_index_list(
        &self,
        index_exprs: &[Expr],
        kernel: &Kernel,
    ) -> Result<(StencilIndexList, bool, Option<usize>)> {
        let mut indices = Vec::new();
        let mut irregular = false;
        for (i, e) in index_exprs.iter().enumerate() {
            match decompose_affine(e, &kernel.index_params) {
                DecomposedIndex::Affine { dim, offset } => {
                    indices.push(StencilIndex { dim, offset });
                }
                DecomposedIndex::Irregular => {
                    irregular = true;
                    // Placeholder dimension so the list stays the right
                    // length; irregular lists are never read positionally.
                    indices.push(StencilIndex {
                        dim: i + 1,
                        offset: 0,
                    });
                }
                DecomposedIndex::Unbounded => {
                    return Ok((StencilIndexList::new(indices), irregular, Some(i)));
                }
            }
        }
        let list = StencilIndexList::new(indices);
        if !list.is_regular(kernel.rank) {
            irregular = true;
        }
        Ok((list, irregular, None))
    }

    #[allow(clippy::too_many_arguments)]
    fn fold_access(
        &mut self,
        map_id: StencilMapId,
        param_idx: usize,
        grid_id: GridId,
        rank: usize,
        indices: &StencilIndexList,
        irregular: bool,
        is_periodic: bool,
        member_name: &str,
        static_indices: &[i64],
    ) {
        let bound = self.session.config.max_irregular_offset;
        let is_record = !self
            .session
            .grid_type(self.session.grid(grid_id).grid_type)
            .layout
            .is_primitive();

        // Per-grid-parameter range for this particular map.
        let map = self.session.stencil_map_mut(map_id);
        let map_range = map
            .range_by_param
            .entry(param_idx)
            .or_insert_with(|| StencilRange::new(rank as u8));
        apply_access(map_range, indices, rank, irregular, is_periodic, bound);
        if is_record {
            let member_map = map
                .member_range_by_param
                .entry(param_idx)
                .or_default();
            let key = (member_name.to_string(), static_indices.to_vec());
            let member_range = member_map.entry_or_insert(key, rank as u8);
            apply_access(member_range, indices, rank, irregular, is_periodic, bound);
        }

        // Grid's own accumulating range (union across every map it's used in).
        let grid = self.session.grid_mut(grid_id);
        apply_access(&mut grid.stencil_range, indices, rank, irregular, is_periodic, bound);
        if is_record {
            let key = (member_name.to_string(), static_indices.to_vec());
            let member_range = grid.member_stencil_ranges.entry_or_insert(key, rank as u8);
            apply_access(member_range, indices, rank, irregular, is_periodic, bound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, GridParam, Kernel};
    use crate::error::Span;
    use crate::model::{Domain, GridTypeId, PointLayout, Primitive};
    use crate::session::{Session, SessionConfig};

    fn span() -> Span {
        Span::default()
    }

    fn make_session_with_grid(rank: u8) -> (Session, GridTypeId, GridId) {
        let mut session = Session::new(SessionConfig::default());
        let gt = session.declare_grid_type(rank, PointLayout::Primitive(Primitive::Double));
        let g = session.allocate_grid(gt, Vec::new());
        (session, gt, g)
    }

    fn get_call(ids: &mut ast::NodeIdGen, grid: &str, offsets: &[(&str, i64)]) -> Expr {
        let mut args = vec![ast::var(ids, span(), grid)];
        for (var, off) in offsets {
            let base = ast::var(ids, span(), *var);
            let idx = if *off == 0 {
                base
            } else {
                ast::binary(ids, span(), BinOp::Add, base, ast::int(ids, span(), *off))
            };
            args.push(idx);
        }
        ast::call(ids, span(), "PSGridGet", args)
    }

    #[test]
    fn offset_correctness_laplacian_halo() {
        let (mut session, gt, g) = make_session_with_grid(3);
        let domain = Domain::new(vec![0, 0, 0], vec![32, 32, 32]);
        let map_id = session.new_stencil_map("laplacian".into(), domain, vec![g]);

        let mut ids = ast::NodeIdGen::default();
        let body = vec![ast::Stmt::Expr(get_call(&mut ids, "g", &[("x", -1), ("y", 0), ("z", 0)]))];
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
        StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();
        let range = &session.stencil_map(map_id).range_by_param[&0];
        assert_eq!(range.bw, vec![1, 0, 0]);
        assert_eq!(range.fw, vec![0, 0, 0]);
    }

    #[test]
    fn halo_monotonicity_never_shrinks() {
        let (mut session, gt, g) = make_session_with_grid(1);
        let domain = Domain::new(vec![0], vec![10]);
        let map_id = session.new_stencil_map("k".into(), domain, vec![g]);
        let mut ids = ast::NodeIdGen::default();
        let kernel = |body| Kernel {
            name: "k".into(),
            rank: 1,
            index_params: vec!["x".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body,
        };

        let k1 = kernel(vec![ast::Stmt::Expr(get_call(&mut ids, "g", &[("x", 1)]))]);
        StencilAnalyzer::new(&mut session).analyze_map(map_id, &k1).unwrap();
        let fw_after_1 = session.stencil_map(map_id).range_by_param[&0].fw.clone();

        let k2 = kernel(vec![ast::Stmt::Expr(get_call(&mut ids, "g", &[("x", 2)]))]);
        StencilAnalyzer::new(&mut session).analyze_map(map_id, &k2).unwrap();
        let fw_after_2 = session.stencil_map(map_id).range_by_param[&0].fw.clone();

        assert!(fw_after_2[0] >= fw_after_1[0]);
        assert_eq!(fw_after_2[0], 2);
    }

    #[test]
    fn periodic_access_sets_periodic_flag() {
        let (mut session, gt, g) = make_session_with_grid(1);
        let domain = Domain::new(vec![0], vec![10]);
        let map_id = session.new_stencil_map("k".into(), domain, vec![g]);
        let mut ids = ast::NodeIdGen::default();
        let args = vec![
            ast::var(&mut ids, span(), "g"),
            ast::binary(
                &mut ids,
                span(),
                BinOp::Add,
                ast::var(&mut ids, span(), "x"),
                ast::int(&mut ids, span(), 1),
            ),
        ];
        let call = ast::call(&mut ids, span(), "PSGridGetPeriodic", args);
        let kernel = Kernel {
            name: "k".into(),
            rank: 1,
            index_params: vec!["x".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![ast::Stmt::Expr(call)],
        };
        StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();
        assert!(session.stencil_map(map_id).range_by_param[&0].is_periodic_in(0));
    }

    #[test]
    fn attribute_stability_across_repeated_analysis() {
        let (mut session, gt, g) = make_session_with_grid(2);
        let domain = Domain::new(vec![0, 0], vec![8, 8]);
        let map_id = session.new_stencil_map("k".into(), domain, vec![g]);
        let mut ids = ast::NodeIdGen::default();
        let kernel = Kernel {
            name: "k".into(),
            rank: 2,
            index_params: vec!["x".into(), "y".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![ast::Stmt::Expr(get_call(
                &mut ids,
                "g",
                &[("x", 1), ("y", -1)],
            ))],
        };
        StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();
        let first = session.stencil_map(map_id).range_by_param[&0].entries().to_vec();
        StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel).unwrap();
        let second = session.stencil_map(map_id).range_by_param[&0].entries().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn non_affine_unbounded_index_is_fatal() {
        let (mut session, gt, g) = make_session_with_grid(1);
        let domain = Domain::new(vec![0], vec![10]);
        let map_id = session.new_stencil_map("k".into(), domain, vec![g]);
        let mut ids = ast::NodeIdGen::default();
        let args = vec![
            ast::var(&mut ids, span(), "g"),
            ast::call(&mut ids, span(), "opaque", vec![]),
        ];
        let call = ast::call(&mut ids, span(), "PSGridGet", args);
        let kernel = Kernel {
            name: "k".into(),
            rank: 1,
            index_params: vec!["x".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![ast::Stmt::Expr(call)],
        };
        let err = StencilAnalyzer::new(&mut session).analyze_map(map_id, &kernel);
        assert!(matches!(err, Err(TranslationError::NonAffineOffset { .. })));
    }

    #[test]
    fn reduce_call_recognizes_op_and_grid() {
        let mut ids = ast::NodeIdGen::default();
        let call = ast::call(
            &mut ids,
            span(),
            "PSReduceGrid",
            vec![
                ast::var(&mut ids, span(), "total"),
                ast::var(&mut ids, span(), "sum"),
                ast::var(&mut ids, span(), "g"),
            ],
        );
        let parsed = parse_reduce_call(&call).unwrap().unwrap();
        assert_eq!(parsed.out_var, "total");
        assert_eq!(parsed.op, ReduceOp::Sum);
        assert_eq!(parsed.grid_var, "g");
    }

    #[test]
    fn reduce_call_with_extra_axis_args_is_rejected() {
        let mut ids = ast::NodeIdGen::default();
        let call = ast::call(
            &mut ids,
            span(),
            "PSReduceGrid",
            vec![
                ast::var(&mut ids, span(), "total"),
                ast::var(&mut ids, span(), "max"),
                ast::var(&mut ids, span(), "g"),
                ast::int(&mut ids, span(), 0),
            ],
        );
        let parsed = parse_reduce_call(&call);
        assert!(matches!(parsed, Some(Err(TranslationError::PartialAxisReduction { .. }))));
    }

    #[test]
    fn non_reduce_call_is_ignored() {
        let mut ids = ast::NodeIdGen::default();
        let call = ast::call(&mut ids, span(), "PSGridDim", vec![ast::var(&mut ids, span(), "g"), ast::int(&mut ids, span(), 0)]);
        assert!(parse_reduce_call(&call).is_none());
    }
}
