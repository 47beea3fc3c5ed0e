//! §4.7 Unconditional-Get Optimization.
//!
//! Converts a branchy load — `if (cond) v = get(...); else v = get(...);` —
//! into a straight-line one: the condition and the per-branch address
//! computation are lifted into temporaries ahead of the assignment, and the
//! get itself becomes a single unconditional read at whichever offset the
//! taken branch computed. Critical on GPU, where a divergent load is far
//! more expensive than a divergent add (spec.md §4.7).
//!
//! Ternary (`Expr::Cond`) sites are a distinct shape from the if/else one
//! this pass rewrites; they are detected and reported as a `Warning` but
//! left untransformed, exactly as spec.md says: "Conditional-expression
//! (ternary) sites are detected but not transformed; a warning is emitted."

use crate::ast::{self, Expr, Kernel, Stmt};
use crate::builder::{Builder, OffsetArgs};
use crate::error::Span;
use crate::model::StencilIndexList;
use crate::session::Session;

/// A non-fatal diagnostic. Unlike `TranslationError`, a `Warning` never
/// halts translation — the surrounding construct is simply left as-is.
#[derive(Debug, Clone)]
pub struct Warning {
    pub span: Span,
    pub message: String,
}

/// Run the pass over one kernel's body, returning the rewritten kernel and
/// any ternary-site warnings collected along the way. `builder` supplies
/// the backend-specific `BuildGridOffset`/`BuildGridBaseAddr` the lifted
/// index temporaries are computed with, so the rewrite composes with
/// whichever backend is about to lower this kernel.
pub fn run(session: &mut Session, builder: &dyn Builder, kernel: &Kernel) -> (Kernel, Vec<Warning>) {
    let mut warnings = Vec::new();
    let body = rewrite_block(session, builder, &kernel.body, &mut warnings);
    (
        Kernel {
            body,
            ..kernel.clone()
        },
        warnings,
    )
}

fn rewrite_block(
    session: &mut Session,
    builder: &dyn Builder,
    block: &[Stmt],
    warnings: &mut Vec<Warning>,
) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(block.len());
    for stmt in block {
        match stmt {
            Stmt::If {
                span,
                cond,
                then_branch,
                else_branch,
            } => {
                if let Some(else_b) = else_branch {
                    if let Some(lifted) =
                        try_lift(session, builder, *span, cond, then_branch, else_b, warnings)
                    {
                        out.extend(lifted);
                        continue;
                    }
                }
                collect_cond_warnings(cond, warnings);
                let then_b = rewrite_block(session, builder, then_branch, warnings);
                let else_b = else_branch
                    .as_ref()
                    .map(|b| rewrite_block(session, builder, b, warnings));
                out.push(Stmt::If {
                    span: *span,
                    cond: cond.clone(),
                    then_branch: then_b,
                    else_branch: else_b,
                });
            }
            Stmt::For {
                span,
                var,
                start,
                end,
                body,
            } => {
                collect_cond_warnings(start, warnings);
                collect_cond_warnings(end, warnings);
                let new_body = rewrite_block(session, builder, body, warnings);
                out.push(Stmt::For {
                    span: *span,
                    var: var.clone(),
                    start: start.clone(),
                    end: end.clone(),
                    body: new_body,
                });
            }
            other => {
                other.walk_exprs(&mut |e| collect_cond_warnings_single(e, warnings));
                out.push(other.clone());
            }
        }
    }
    out
}

fn collect_cond_warnings(expr: &Expr, warnings: &mut Vec<Warning>) {
    expr.walk(&mut |e| collect_cond_warnings_single(e, warnings));
}

fn collect_cond_warnings_single(expr: &Expr, warnings: &mut Vec<Warning>) {
    if let Expr::Cond { span, .. } = expr {
        warnings.push(Warning {
            span: *span,
            message: "ternary conditional get site detected but not transformed".to_string(),
        });
    }
}

/// One branch matching the pattern this pass rewrites: a single `v = get(...)`
/// assignment, where the get has already been recognized by stencil
/// analysis (its `GridGetAttribute` is on file).
struct BranchGet<'a> {
    target_name: &'a str,
    grid: crate::model::GridId,
    rank: usize,
    index_exprs: &'a [Expr],
    indices: crate::model::StencilIndexList,
    is_periodic: bool,
}

fn match_branch_get<'a>(session: &Session, block: &'a [Stmt]) -> Option<BranchGet<'a>> {
    let [Stmt::Assign { target, value, .. }] = block else {
        return None;
    };
    let Expr::Var { name: target_name, .. } = target else {
        return None;
    };
    let (func, args) = value.as_call()?;
    match ast::Intrinsic::recognize(func, args.len()) {
        Some(ast::Intrinsic::GridGet) | Some(ast::Intrinsic::GridGetPeriodic) => {}
        _ => return None,
    }
    let attr = session.attrs.grid_get(value.id())?;
    Some(BranchGet {
        target_name,
        grid: attr.grid_param,
        rank: attr.indices.0.len(),
        index_exprs: &args[1..],
        indices: attr.indices.clone(),
        is_periodic: attr.is_periodic,
    })
}

/// The bare (unoffset) index expressions for the grid a matched get reads,
/// derived from that get's own index expressions by stripping the `+off`/
/// `-off` each carries (§4.7 "the paired get's offset when present,
/// otherwise the center offset" — `BuildGetOffsetCenter` in the original
/// does the same: copy the var ref out of each index, drop the offset).
fn center_index_exprs(matched: &[Expr]) -> Vec<Expr> {
    matched
        .iter()
        .map(|e| match e {
            Expr::Binary { lhs, .. } => (**lhs).clone(),
            other => other.clone(),
        })
        .collect()
}

fn branch_offset(session: &mut Session, builder: &dyn Builder, get: &BranchGet) -> Expr {
    let args = OffsetArgs {
        grid: get.grid,
        rank: get.rank,
        index_exprs: get.index_exprs,
        indices: Some(&get.indices),
        is_kernel: true,
        is_periodic: get.is_periodic,
    };
    builder.build_grid_offset(session, &args)
}

fn center_offset(session: &mut Session, builder: &dyn Builder, get: &BranchGet) -> Expr {
    let center_exprs = center_index_exprs(get.index_exprs);
    let center_indices = StencilIndexList::self_at(get.rank);
    let args = OffsetArgs {
        grid: get.grid,
        rank: get.rank,
        index_exprs: &center_exprs,
        indices: Some(&center_indices),
        is_kernel: true,
        is_periodic: false,
    };
    builder.build_grid_offset(session, &args)
}

/// Whether a recognized grid get appears anywhere in `block`, even nested in
/// a larger expression that `match_branch_get` won't lift on its own — used
/// to decide whether a branch pair that didn't lift is worth a `Warning`.
fn block_contains_get(session: &Session, block: &[Stmt]) -> bool {
    let mut found = false;
    ast::walk_block(block, &mut |e| {
        if let Expr::Call { id, func, args, .. } = e {
            if matches!(
                ast::Intrinsic::recognize(func, args.len()),
                Some(ast::Intrinsic::GridGet) | Some(ast::Intrinsic::GridGetPeriodic)
            ) && session.attrs.grid_get(*id).is_some()
            {
                found = true;
            }
        }
    });
    found
}

/// Lift one `if/else` guarding a grid get (§4.7 steps 1–3). When both
/// branches are a matching get-assign to the same target variable and grid,
/// each branch contributes its own offset. When only one branch matches, the
/// other falls back to the center offset (`BuildGetOffsetCenter` in
/// `examples/original_source/translator/optimizer/unconditional_get.cc`'s
/// `ProcessIfStmtStage2`, triggered there by `paired_get_exp == NULL`) rather
/// than being left unlifted. Only when neither branch is a recognized get is
/// the pair left untransformed — with a `Warning` if a get is buried
/// somewhere in the branches regardless. Returns `None` whenever no rewrite
/// happens, leaving the caller to recurse normally.
fn try_lift(
    session: &mut Session,
    builder: &dyn Builder,
    span: Span,
    cond: &Expr,
    then_branch: &[Stmt],
    else_branch: &[Stmt],
    warnings: &mut Vec<Warning>,
) -> Option<Vec<Stmt>> {
    let then_get = match_branch_get(session, then_branch);
    let else_get = match_branch_get(session, else_branch);

    let (target_name, grid, offset_then, offset_else) = match (&then_get, &else_get) {
        (Some(t), Some(e)) => {
            if t.target_name != e.target_name || t.grid != e.grid {
                return None;
            }
            let offset_then = branch_offset(session, builder, t);
            let offset_else = branch_offset(session, builder, e);
            (t.target_name.to_string(), t.grid, offset_then, offset_else)
        }
        (Some(t), None) => {
            let offset_then = branch_offset(session, builder, t);
            let offset_else = center_offset(session, builder, t);
            (t.target_name.to_string(), t.grid, offset_then, offset_else)
        }
        (None, Some(e)) => {
            let offset_else = branch_offset(session, builder, e);
            let offset_then = center_offset(session, builder, e);
            (e.target_name.to_string(), e.grid, offset_then, offset_else)
        }
        (None, None) => {
            if block_contains_get(session, then_branch) || block_contains_get(session, else_branch) {
                warnings.push(Warning {
                    span,
                    message: "conditional get site detected but not transformed".to_string(),
                });
            }
            return None;
        }
    };

    let cond_name = session.fresh_name("__cond");
    let idx_name = session.fresh_name("__idx");

    let cond_let = Stmt::Let {
        span,
        name: cond_name.clone(),
        is_mutable: false,
        init: Some(cond.clone()),
    };
    let idx_let = Stmt::Let {
        span,
        name: idx_name.clone(),
        is_mutable: true,
        init: None,
    };
    let idx_if = Stmt::If {
        span,
        cond: ast::var(&mut session.node_ids, span, cond_name),
        then_branch: vec![Stmt::Assign {
            span,
            target: ast::var(&mut session.node_ids, span, idx_name.clone()),
            value: offset_then,
        }],
        else_branch: Some(vec![Stmt::Assign {
            span,
            target: ast::var(&mut session.node_ids, span, idx_name.clone()),
            value: offset_else,
        }]),
    };

    let base = builder.build_grid_base_addr(session, grid);
    let offset_var = ast::var(&mut session.node_ids, span, idx_name);
    let elem = ast::index(&mut session.node_ids, span, base, offset_var);
    let unconditional_get = Stmt::Assign {
        span,
        target: ast::var(&mut session.node_ids, span, target_name),
        value: elem,
    };

    Some(vec![cond_let, idx_let, idx_if, unconditional_get])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, GridParam};
    use crate::backend::reference::ReferenceBuilder;
    use crate::model::{Domain, PointLayout, Primitive, StencilIndex, StencilIndexList};
    use crate::session::SessionConfig;

    fn get_assign(
        ids: &mut ast::NodeIdGen,
        attrs: &mut crate::attributes::AttributeTable,
        grid: crate::model::GridId,
        target: &str,
        grid_var: &str,
        offsets: &[(&str, i64)],
    ) -> Stmt {
        let span = Span::default();
        let mut args = vec![ast::var(ids, span, grid_var)];
        let mut indices = Vec::new();
        for (d, (var, off)) in offsets.iter().enumerate() {
            let base = ast::var(ids, span, *var);
            let e = if *off == 0 {
                base
            } else {
                ast::binary(ids, span, BinOp::Add, base, ast::int(ids, span, *off))
            };
            args.push(e);
            indices.push(StencilIndex {
                dim: d + 1,
                offset: *off,
            });
        }
        let call = ast::call(ids, span, "PSGridGet", args);
        attrs.set_grid_get(
            call.id(),
            crate::attributes::GridGetAttribute {
                grid_type: crate::model::GridTypeId(0),
                grid_param: grid,
                in_kernel: true,
                is_periodic: false,
                indices: StencilIndexList::new(indices),
                member_name: String::new(),
                static_array_indices: Vec::new(),
            },
        );
        Stmt::Assign {
            span,
            target: ast::var(ids, span, target),
            value: call,
        }
    }

    #[test]
    fn lifts_branchy_get_to_single_unconditional_read() {
        let mut session = Session::new(SessionConfig::default());
        let gt = session.declare_grid_type(3, PointLayout::Primitive(Primitive::Double));
        let g = session.allocate_grid(gt, Vec::new());
        let mut ids = ast::NodeIdGen::default();
        let span = Span::default();

        let then_assign = get_assign(&mut ids, &mut session.attrs, g, "v", "g", &[("x", -1), ("y", 0), ("z", 0)]);
        let else_assign = get_assign(&mut ids, &mut session.attrs, g, "v", "g", &[("x", 1), ("y", 0), ("z", 0)]);
        session.node_ids = ids;

        let cond = crate::ast::binary(
            &mut session.node_ids,
            span,
            BinOp::Lt,
            crate::ast::var(&mut session.node_ids, span, "x"),
            crate::ast::int(&mut session.node_ids, span, 16),
        );
        let if_stmt = Stmt::If {
            span,
            cond,
            then_branch: vec![then_assign],
            else_branch: Some(vec![else_assign]),
        };
        let kernel = Kernel {
            name: "k".into(),
            rank: 3,
            index_params: vec!["x".into(), "y".into(), "z".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![if_stmt],
        };

        let builder = ReferenceBuilder;
        let (rewritten, warnings) = run(&mut session, &builder, &kernel);
        assert!(warnings.is_empty());

        let get_count = {
            let mut n = 0;
            ast::walk_block(&rewritten.body, &mut |e| {
                if matches!(e.as_call(), Some(("PSGridGet", _)) | Some(("PSGridGetPeriodic", _))) {
                    n += 1;
                }
            });
            n
        };
        assert_eq!(get_count, 0, "no call-form get should remain");

        // Exactly one unconditional assignment into `v` from an Index expr.
        let unconditional = rewritten
            .body
            .iter()
            .filter(|s| matches!(s, Stmt::Assign { target: Expr::Var { name, .. }, value: Expr::Index { .. }, .. } if name == "v"))
            .count();
        assert_eq!(unconditional, 1);

        // Preceded by a boolean temp and a conditional index assignment.
        assert!(matches!(rewritten.body[0], Stmt::Let { .. }));
        assert!(matches!(rewritten.body[1], Stmt::Let { .. }));
        assert!(matches!(rewritten.body[2], Stmt::If { .. }));
    }

    #[test]
    fn ternary_site_is_detected_but_not_transformed() {
        let mut session = Session::new(SessionConfig::default());
        let gt = session.declare_grid_type(1, PointLayout::Primitive(Primitive::Double));
        let span = Span::default();
        let cond = ast::binary(
            &mut session.node_ids,
            span,
            BinOp::Lt,
            ast::var(&mut session.node_ids, span, "x"),
            ast::int(&mut session.node_ids, span, 8),
        );
        let ternary = Expr::Cond {
            id: session.node_ids.next(),
            span,
            cond: Box::new(cond),
            then_expr: Box::new(ast::int(&mut session.node_ids, span, 1)),
            else_expr: Box::new(ast::int(&mut session.node_ids, span, -1)),
        };
        let kernel = Kernel {
            name: "k".into(),
            rank: 1,
            index_params: vec!["x".into()],
            grid_params: vec![GridParam {
                name: "g".into(),
                grid_type: gt,
            }],
            body: vec![Stmt::Expr(ternary)],
        };

        let builder = ReferenceBuilder;
        let (rewritten, warnings) = run(&mut session, &builder, &kernel);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(rewritten.body[0], Stmt::Expr(Expr::Cond { .. })));
    }
}
