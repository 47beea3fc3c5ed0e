//! C5 — Reference Backend.
//!
//! The sequential baseline: one flat triple-nested loop per StencilMap, no
//! concurrency, the per-run driver just loops `count` times and swaps every
//! written grid after each step (§4.3).

use crate::ast::{Function, Kernel, Stmt};
use crate::builder::{
    self, Builder, OffsetArgs, RunKernelFunc,
};
use crate::error::{Result, Span};
use crate::model::{Domain, GridId, GridTypeId, Primitive, ReduceOp, StencilMap, StencilMapId};
use crate::session::Session;

use super::{index_var_names, kernel_call_stmt, LoweredMap};

pub struct ReferenceBuilder;

impl Builder for ReferenceBuilder {
    fn build_grid_base_addr(&self, session: &mut Session, grid: GridId) -> crate::ast::Expr {
        crate::ast::var(&mut session.node_ids, Span::default(), format!("__grid_{}", grid.0))
    }

    fn build_grid_offset(&self, session: &mut Session, args: &OffsetArgs) -> crate::ast::Expr {
        builder::canonical_offset(&mut session.node_ids, args.grid, args.index_exprs, args.is_periodic)
    }

    fn build_grid_emit(
        &self,
        session: &mut Session,
        grid: GridId,
        _rank: usize,
        index_exprs: &[crate::ast::Expr],
        member_name: &str,
        value: crate::ast::Expr,
    ) -> Stmt {
        let span = Span::default();
        let base = self.build_grid_base_addr(session, grid);
        let offset = builder::canonical_offset(&mut session.node_ids, grid, index_exprs, false);
        let elem = crate::ast::index(&mut session.node_ids, span, base, offset);
        let target = if member_name.is_empty() {
            elem
        } else {
            crate::ast::Expr::Field {
                id: session.node_ids.next(),
                span,
                receiver: Box::new(elem),
                member: member_name.to_string(),
            }
        };
        Stmt::Assign { span, target, value }
    }

    fn build_kernel_call_arg_list(
        &self,
        session: &mut Session,
        index_vars: &[String],
        grid_args: &[GridId],
    ) -> Vec<crate::ast::Expr> {
        builder::default_kernel_call_arg_list(&mut session.node_ids, index_vars, grid_args)
    }

    fn build_domain_inclusion_check(
        &self,
        session: &mut Session,
        idx_vars: &[String],
        domain: &Domain,
    ) -> crate::ast::Expr {
        builder::default_domain_inclusion_check(&mut session.node_ids, idx_vars, domain)
    }

    fn build_run_kernel_func(&self, _session: &mut Session, map: &StencilMap) -> RunKernelFunc {
        let rank = map.domain.rank as usize;
        let mut params = index_var_names(rank);
        params.extend(map.grid_args.iter().map(|g| format!("__grid_{}", g.0)));
        let name = map.run_name();
        RunKernelFunc {
            name: name.clone(),
            func: Function {
                name,
                params,
                body: Vec::new(),
            },
        }
    }

    fn build_run_kernel_func_body(
        &self,
        session: &mut Session,
        map: &StencilMap,
        kernel: &Kernel,
    ) -> Vec<Stmt> {
        let idx_vars = index_var_names(kernel.rank);
        let call = kernel_call_stmt(session, self, map, kernel);
        let mut body = vec![call];
        // Wrap innermost-first (x) so the final nesting is z outer, y, x
        // inner, matching the outer-to-inner dimension order in §4.3.
        for d in 0..kernel.rank {
            let span = Span::default();
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

    fn build_grid_new_func_for_user_type(
        &self,
        session: &mut Session,
        grid_type: GridTypeId,
    ) -> Function {
        let name = format!("__PSGridNew_{}", builder::user_type_name(&session.grid_type(grid_type).layout));
        Function {
            name,
            params: vec!["dom".to_string()],
            body: Vec::new(),
        }
    }

    fn build_grid_copy_in_func_for_user_type(
        &self,
        session: &mut Session,
        grid_type: GridTypeId,
    ) -> Function {
        let layout = session.grid_type(grid_type).layout.clone();
        let name = format!("__PSGridCopyin_{}", builder::user_type_name(&layout));
        let body = builder::build_copy_loop(&mut session.node_ids, &layout, true);
        Function {
            name,
            params: vec!["g".to_string(), "n".to_string(), "buf".to_string()],
            body,
        }
    }

    fn build_grid_copy_out_func_for_user_type(
        &self,
        session: &mut Session,
        grid_type: GridTypeId,
    ) -> Function {
        let layout = session.grid_type(grid_type).layout.clone();
        let name = format!("__PSGridCopyout_{}", builder::user_type_name(&layout));
        let body = builder::build_copy_loop(&mut session.node_ids, &layout, false);
        Function {
            name,
            params: vec!["g".to_string(), "n".to_string(), "buf".to_string()],
            body,
        }
    }

    fn build_run_func_body(
        &self,
        session: &mut Session,
        run_index: usize,
        count: Option<&crate::ast::Expr>,
    ) -> Vec<Stmt> {
        build_count_loop_body(session, run_index, count)
    }
}

/// Shared between reference and MPI (§4.3, §4.5): call every map's
/// run-kernel in sequence, then swap every grid that map wrote (here: every
/// grid argument, since the DSL's only write form is `emit` to the grid
/// currently being mapped over).
pub fn build_count_loop_body(
    session: &mut Session,
    run_index: usize,
    count: Option<&crate::ast::Expr>,
) -> Vec<Stmt> {
    let span = Span::default();
    let maps = session.run(run_index).maps.clone();
    let mut iter_body = Vec::new();
    for map_id in &maps {
        let map = session.stencil_map(*map_id).clone();
        let call = crate::ast::call(&mut session.node_ids, span, &map.run_name(), Vec::new());
        iter_body.push(Stmt::Expr(call));
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

/// Lower one StencilMap for the reference backend: the run-kernel function
/// with its triple-nested loop body, plus the run-function body that drives
/// `count` iterations of the whole run this map belongs to.
pub fn lower(session: &mut Session, map_id: StencilMapId, run_index: usize) -> Result<LoweredMap> {
    let map = session.stencil_map(map_id).clone();
    let kernel = session
        .kernel_checked(&map.kernel_name, Span::default())?
        .clone();
    let builder = ReferenceBuilder;
    let (kernel, warnings) = crate::optimize::unconditional_get::run(session, &builder, &kernel);

    let shell = builder.build_run_kernel_func(session, &map);
    let mut func = shell.func;
    func.body = builder.build_run_kernel_func_body(session, &map, &kernel);

    let count = session.run(run_index).count.clone();
    let run_func_body = builder.build_run_func_body(session, run_index, count.as_ref());

    Ok(LoweredMap {
        stencil_type_name: map.stencil_type_name(),
        run_kernel_funcs: vec![func],
        run_func_body,
        warnings,
    })
}

/// Lowers `PSReduceGrid<T>(out, op, g)` (§4.5) for the reference backend:
/// the fold walks the grid's full declared extent, since there is no halo
/// to exclude outside an MPI decomposition.
pub fn lower_reduce(session: &mut Session, grid: GridId, op: ReduceOp) -> Result<Function> {
    let g = session.grid(grid).clone();
    let gt = session.grid_type(g.grid_type).clone();
    crate::error::invariant(g.static_size.is_some(), "grid.static_size.is_some()", crate::ast::NodeId(grid.0));
    let dims = g.static_size.unwrap_or_default();
    let bounds: Vec<(i64, i64)> = dims.iter().map(|&d| (0, d)).collect();
    let is_float = matches!(gt.layout, crate::model::PointLayout::Primitive(Primitive::Float | Primitive::Double));
    let name = format!("__PSReduceGrid_{}", grid.0);
    Ok(builder::build_reduce_func(&mut session.node_ids, &name, grid, &bounds, op, is_float))
}
