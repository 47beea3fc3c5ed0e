//! C7 — MPI Backend.
//!
//! Each process owns a `(local_offset, local_size)` slab of each grid plus a
//! `(fw, bw)` halo ring sized from C3's StencilRange. The run function
//! exchanges halos before the loop and reissues them for any grid a
//! successor map reads (§4.5).

use std::collections::HashSet;

use crate::ast::{Expr, Function, Kernel, Stmt};
use crate::builder::{self, Builder, OffsetArgs, RunKernelFunc};
use crate::error::{Result, Span};
use crate::model::{Domain, GridId, GridTypeId, Primitive, ReduceOp, StencilMap, StencilMapId};
use crate::session::Session;

use super::{index_var_names, LoweredMap};

pub struct MpiBuilder;

impl Builder for MpiBuilder {
    fn build_grid_base_addr(&self, session: &mut Session, grid: GridId) -> Expr {
        crate::ast::var(&mut session.node_ids, Span::default(), format!("__grid_{}", grid.0))
    }

    fn build_grid_offset(&self, session: &mut Session, args: &OffsetArgs) -> Expr {
        builder::canonical_offset(&mut session.node_ids, args.grid, args.index_exprs, args.is_periodic)
    }

    fn build_grid_emit(
        &self,
        session: &mut Session,
        grid: GridId,
        _rank: usize,
        index_exprs: &[Expr],
        member_name: &str,
        value: Expr,
    ) -> Stmt {
        let span = Span::default();
        let base = self.build_grid_base_addr(session, grid);
        let offset = builder::canonical_offset(&mut session.node_ids, grid, index_exprs, false);
        let elem = crate::ast::index(&mut session.node_ids, span, base, offset);
        let target = if member_name.is_empty() {
            elem
        } else {
            Expr::Field {
                id: session.node_ids.next(),
                span,
                receiver: Box::new(elem),
                member: member_name.to_string(),
            }
        };
        Stmt::Assign { span, target, value }
    }

    fn build_kernel_call_arg_list(&self, session: &mut Session, index_vars: &[String], grid_args: &[GridId]) -> Vec<Expr> {
        builder::default_kernel_call_arg_list(&mut session.node_ids, index_vars, grid_args)
    }

    fn build_domain_inclusion_check(&self, session: &mut Session, idx_vars: &[String], domain: &Domain) -> Expr {
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

    fn build_run_kernel_func_body(&self, session: &mut Session, map: &StencilMap, kernel: &Kernel) -> Vec<Stmt> {
        // Identical loop-nest shape to the reference backend: the MPI
        // distinction lives entirely in `build_run_func_body`'s halo
        // exchange, not in the per-kernel iteration order.
        crate::backend::reference::ReferenceBuilder.build_run_kernel_func_body(session, map, kernel)
    }

    fn build_grid_new_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        let name = format!("__PSGridNew_{}", builder::user_type_name(&session.grid_type(grid_type).layout));
        Function {
            name,
            params: vec!["dom".to_string()],
            body: Vec::new(),
        }
    }

    fn build_grid_copy_in_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        let layout = session.grid_type(grid_type).layout.clone();
        let name = format!("__PSGridCopyin_{}", builder::user_type_name(&layout));
        let body = builder::build_copy_loop(&mut session.node_ids, &layout, true);
        Function {
            name,
            params: vec!["g".to_string(), "n".to_string(), "buf".to_string()],
            body,
        }
    }

    fn build_grid_copy_out_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        let layout = session.grid_type(grid_type).layout.clone();
        let name = format!("__PSGridCopyout_{}", builder::user_type_name(&layout));
        let body = builder::build_copy_loop(&mut session.node_ids, &layout, false);
        Function {
            name,
            params: vec!["g".to_string(), "n".to_string(), "buf".to_string()],
            body,
        }
    }

    fn build_run_func_body(&self, session: &mut Session, run_index: usize, count: Option<&Expr>) -> Vec<Stmt> {
        build_mpi_run_body(session, run_index, count)
    }
}

/// Pre-loop halo exchange for every grid argument of every map in the run,
/// then the same call/swap loop as the reference backend, reissuing
/// exchange for any grid a later map in the run reads (§4.5).
fn build_mpi_run_body(session: &mut Session, run_index: usize, count: Option<&Expr>) -> Vec<Stmt> {
    let span = Span::default();
    let maps = session.run(run_index).maps.clone();

    let mut prelude = Vec::new();
    let mut loaded: HashSet<GridId> = HashSet::new();
    for map_id in maps.iter() {
        let map = session.stencil_map(*map_id).clone();
        for (param_idx, grid_id) in map.grid_args.iter().enumerate() {
            // Only the first occurrence of a grid across the whole run needs
            // the initial load; later maps reissue inside the loop per §4.5
            // item 3.
            if !loaded.insert(*grid_id) {
                continue;
            }
            let range = map.range_by_param.get(&param_idx).cloned().unwrap_or_else(|| {
                crate::model::StencilRange::new(map.domain.rank)
            });
            let call = crate::ast::call(
                &mut session.node_ids,
                span,
                "LoadRemoteGridRegion",
                vec![
                    crate::ast::var(&mut session.node_ids, span, format!("__grid_{}", grid_id.0)),
                    crate::ast::int(&mut session.node_ids, span, range.fw.iter().copied().max().unwrap_or(0)),
                    crate::ast::int(&mut session.node_ids, span, range.bw.iter().copied().max().unwrap_or(0)),
                ],
            );
            prelude.push(Stmt::Expr(call));
        }
    }

    let mut iter_body = Vec::new();
    for (i, map_id) in maps.iter().enumerate() {
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
        let successor_reads = maps[i + 1..].iter().any(|later_id| {
            session.stencil_map(*later_id).grid_args.iter().any(|g| map.grid_args.contains(g))
        });
        if successor_reads {
            for grid_id in &map.grid_args {
                let reissue = crate::ast::call(
                    &mut session.node_ids,
                    span,
                    "LoadRemoteGridRegion",
                    vec![crate::ast::var(&mut session.node_ids, span, format!("__grid_{}", grid_id.0))],
                );
                iter_body.push(Stmt::Expr(reissue));
            }
        }
    }

    let loop_stmt = match count {
        Some(count_expr) => vec![Stmt::For {
            span,
            var: "__iter".to_string(),
            start: crate::ast::int(&mut session.node_ids, span, 0),
            end: count_expr.clone(),
            body: iter_body,
        }],
        None => iter_body,
    };

    prelude.into_iter().chain(loop_stmt).collect()
}

pub fn lower(session: &mut Session, map_id: StencilMapId, run_index: usize) -> Result<LoweredMap> {
    let map = session.stencil_map(map_id).clone();
    let kernel = session.kernel_checked(&map.kernel_name, Span::default())?.clone();
    let builder = MpiBuilder;
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

/// The local-interior walk for `PSReduceGrid<T>`: the reduction loop bounds
/// are offset inward by `bound.bw[d]` on the low side, leaving the halo
/// band untouched (§4.5 "Reduction"). Returns the per-dimension
/// `(start, end)` bounds a backend's reduction loop should use.
pub fn reduction_interior_bounds(domain: &Domain, halo: &crate::model::StencilRange) -> Vec<(i64, i64)> {
    let min = domain.local_min_or_global();
    let max = domain.local_max_or_global();
    (0..domain.rank as usize)
        .map(|d| (min[d] + halo.bw[d], max[d] - halo.fw[d]))
        .collect()
}

/// Lowers `PSReduceGrid<T>(out, op, g)` (§4.5) for the MPI backend: the fold
/// walks only the local interior, excluding this rank's halo band, and
/// leaves the cross-rank all-reduce over `(out_value, out_count)` to the
/// runtime.
pub fn lower_reduce(session: &mut Session, grid: GridId, op: ReduceOp) -> Result<Function> {
    let g = session.grid(grid).clone();
    let gt = session.grid_type(g.grid_type).clone();
    crate::error::invariant(g.static_size.is_some(), "grid.static_size.is_some()", crate::ast::NodeId(grid.0));
    let dims = g.static_size.unwrap_or_default();
    let domain = Domain::new(vec![0; dims.len()], dims);
    let bounds = reduction_interior_bounds(&domain, &g.stencil_range);
    let is_float = matches!(gt.layout, crate::model::PointLayout::Primitive(Primitive::Float | Primitive::Double));
    let name = format!("__PSReduceGrid_{}", grid.0);
    Ok(builder::build_reduce_func(&mut session.node_ids, &name, grid, &bounds, op, is_float))
}
