//! C6 — CUDA Backend.
//!
//! Marks the kernel device-callable, rewrites grid parameters to device
//! descriptors, and synthesizes a grid/block-launched global function per
//! StencilMap with a domain-inclusion guard over `(x, y)` and a sequential
//! `z` loop (§4.4). A cache-config hint is prepended to the first launch of
//! each kernel symbol within the run function.

use crate::ast::{Expr, Function, Kernel, Stmt};
use crate::builder::{self, Builder, OffsetArgs, RunKernelFunc};
use crate::error::{Result, Span};
use crate::model::{Domain, GridId, GridTypeId, StencilMap, StencilMapId};
use crate::session::Session;

use super::{index_var_names, LoweredMap};

/// `__PSGridDimDev`, the device form of `PSGridDim` (§4.4).
const DEVICE_DIM_FN: &str = "__PSGridDimDev";

pub struct CudaBuilder {
    pub block_shape: (u32, u32, u32),
}

impl CudaBuilder {
    pub fn new(session: &Session) -> Self {
        CudaBuilder {
            block_shape: session.config.block_shape,
        }
    }
}

fn thread_index(ids: &mut crate::ast::NodeIdGen, dim: usize) -> Expr {
    let span = Span::default();
    crate::ast::call(ids, span, "__cudaThreadIndex", vec![crate::ast::int(ids, span, dim as i64)])
}

fn ceil_div(n: i64, d: i64) -> i64 {
    if d <= 0 {
        return 0;
    }
    (n + d - 1) / d
}

/// `__cudaConfigureLaunch(grid.x, grid.y, grid.z, block.x, block.y, block.z)`,
/// prepended before each kernel launch (§4.4 "the driver passes grid
/// dimensions `ceil(local_size / block)`"). Only `(x, y)` drive the grid
/// shape; `z` is the sequential loop inside the kernel body, so its grid
/// extent is always 1.
fn launch_config_call(
    ids: &mut crate::ast::NodeIdGen,
    span: Span,
    map: &StencilMap,
    block_shape: (u32, u32, u32),
) -> Expr {
    let min = map.domain.local_min_or_global();
    let max = map.domain.local_max_or_global();
    let local_size_x = max.first().copied().unwrap_or(0) - min.first().copied().unwrap_or(0);
    let local_size_y = max.get(1).copied().unwrap_or(0) - min.get(1).copied().unwrap_or(0);
    let grid_x = ceil_div(local_size_x, block_shape.0 as i64);
    let grid_y = ceil_div(local_size_y, block_shape.1 as i64);
    crate::ast::call(
        ids,
        span,
        "__cudaConfigureLaunch",
        vec![
            crate::ast::int(ids, span, grid_x),
            crate::ast::int(ids, span, grid_y),
            crate::ast::int(ids, span, 1),
            crate::ast::int(ids, span, block_shape.0 as i64),
            crate::ast::int(ids, span, block_shape.1 as i64),
            crate::ast::int(ids, span, block_shape.2 as i64),
        ],
    )
}

impl Builder for CudaBuilder {
    fn build_grid_base_addr(&self, session: &mut Session, grid: GridId) -> Expr {
        crate::ast::var(&mut session.node_ids, Span::default(), format!("__grid_{}", grid.0))
    }

    fn build_grid_offset(&self, session: &mut Session, args: &OffsetArgs) -> Expr {
        builder::canonical_offset_with_dim_fn(
            &mut session.node_ids,
            args.grid,
            args.index_exprs,
            args.is_periodic,
            DEVICE_DIM_FN,
        )
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
        let offset =
            builder::canonical_offset_with_dim_fn(&mut session.node_ids, grid, index_exprs, false, DEVICE_DIM_FN);
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

    fn build_kernel_call_arg_list(
        &self,
        session: &mut Session,
        index_vars: &[String],
        grid_args: &[GridId],
    ) -> Vec<Expr> {
        builder::default_kernel_call_arg_list(&mut session.node_ids, index_vars, grid_args)
    }

    fn build_domain_inclusion_check(&self, session: &mut Session, idx_vars: &[String], domain: &Domain) -> Expr {
        // CUDA only guards (x, y); z is a sequential loop inside the guard.
        builder::default_domain_inclusion_check(&mut session.node_ids, &idx_vars[..2.min(idx_vars.len())], domain)
    }

    fn build_run_kernel_func(&self, _session: &mut Session, map: &StencilMap) -> RunKernelFunc {
        let mut params = vec!["dom".to_string()];
        for g in &map.grid_args {
            params.push(format!("__grid_{}", g.0));
            params.push(format!("__id_{}", g.0));
        }
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
        let span = Span::default();
        let idx_vars = index_var_names(kernel.rank);

        let x_init = thread_index(&mut session.node_ids, 0);
        let y_init = thread_index(&mut session.node_ids, 1);
        let mut body = vec![
            Stmt::Let {
                span,
                name: idx_vars[0].clone(),
                is_mutable: false,
                init: Some(x_init),
            },
            Stmt::Let {
                span,
                name: idx_vars[1].clone(),
                is_mutable: false,
                init: Some(y_init),
            },
        ];

        let guard = self.build_domain_inclusion_check(session, &idx_vars, &map.domain);
        let not_guard = Expr::Unary {
            id: session.node_ids.next(),
            span,
            op: crate::ast::UnOp::Not,
            expr: Box::new(guard),
        };
        body.push(Stmt::If {
            span,
            cond: not_guard,
            then_branch: vec![Stmt::Return { span, value: None }],
            else_branch: None,
        });

        let call = super::kernel_call_stmt(session, self, map, kernel);
        let z_min = map.domain.local_min_or_global()[2];
        let z_max = map.domain.local_max_or_global()[2];
        let start = crate::ast::int(&mut session.node_ids, span, z_min);
        let end = crate::ast::int(&mut session.node_ids, span, z_max);
        body.push(Stmt::For {
            span,
            var: idx_vars[2].clone(),
            start,
            end,
            body: vec![call],
        });
        body
    }

    fn build_on_device_grid_type(&self, session: &mut Session, grid_type: GridTypeId) -> Option<String> {
        let gt = session.grid_type(grid_type);
        Some(format!("__PSGrid{}D{}Dev", gt.rank, builder::user_type_name(&gt.layout)))
    }

    fn build_grid_new_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        let name = format!("__PSGridNew_{}_Dev", builder::user_type_name(&session.grid_type(grid_type).layout));
        Function {
            name,
            params: vec!["dom".to_string()],
            body: Vec::new(),
        }
    }

    fn build_grid_copy_in_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        let layout = session.grid_type(grid_type).layout.clone();
        let name = format!("__PSGridCopyin_{}_Dev", builder::user_type_name(&layout));
        let body = builder::build_copy_loop(&mut session.node_ids, &layout, true);
        Function {
            name,
            params: vec!["g".to_string(), "n".to_string(), "buf".to_string()],
            body,
        }
    }

    fn build_grid_copy_out_func_for_user_type(&self, session: &mut Session, grid_type: GridTypeId) -> Function {
        let layout = session.grid_type(grid_type).layout.clone();
        let name = format!("__PSGridCopyout_{}_Dev", builder::user_type_name(&layout));
        let body = builder::build_copy_loop(&mut session.node_ids, &layout, false);
        Function {
            name,
            params: vec!["g".to_string(), "n".to_string(), "buf".to_string()],
            body,
        }
    }

    fn build_run_func_body(&self, session: &mut Session, run_index: usize, count: Option<&Expr>) -> Vec<Stmt> {
        build_cuda_count_loop_body(session, run_index, count, self.block_shape)
    }
}

/// As `reference::build_count_loop_body`, but with a device synchronization
/// inserted before the swap sequence (§5 "a device synchronization is
/// mandatory before the per-grid swap"), a cache-config hint prepended
/// before the first launch of each kernel symbol, and a launch-configuration
/// call prepended before every launch (§4.4).
fn build_cuda_count_loop_body(
    session: &mut Session,
    run_index: usize,
    count: Option<&Expr>,
    block_shape: (u32, u32, u32),
) -> Vec<Stmt> {
    let span = Span::default();
    let maps = session.run(run_index).maps.clone();
    let mut hinted = std::collections::HashSet::new();
    let mut iter_body = Vec::new();
    for map_id in &maps {
        let map = session.stencil_map(*map_id).clone();
        if hinted.insert(map.kernel_name.clone()) {
            let hint = crate::ast::call(
                &mut session.node_ids,
                span,
                "cudaFuncSetCacheConfig",
                vec![
                    crate::ast::var(&mut session.node_ids, span, map.run_name()),
                    crate::ast::var(&mut session.node_ids, span, "cudaFuncCachePreferL1"),
                ],
            );
            iter_body.push(Stmt::Expr(hint));
        }
        let configure = launch_config_call(&mut session.node_ids, span, &map, block_shape);
        iter_body.push(Stmt::Expr(configure));
        let call = crate::ast::call(&mut session.node_ids, span, &map.run_name(), Vec::new());
        iter_body.push(Stmt::Expr(call));

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

pub fn lower(session: &mut Session, map_id: StencilMapId, run_index: usize) -> Result<LoweredMap> {
    let map = session.stencil_map(map_id).clone();
    let kernel = session.kernel_checked(&map.kernel_name, Span::default())?.clone();
    let builder = CudaBuilder::new(session);
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
