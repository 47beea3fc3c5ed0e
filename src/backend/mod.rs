//! C5–C8 — Backend lowering.
//!
//! One submodule per target, each exposing a `lower` entry point that turns
//! a `StencilMap` plus its kernel into a fully-built set of AST functions
//! using nothing but `Builder` operations (§4.2: "the interface is the only
//! mutation surface"). `Backend` is the closed target selector; `Session`'s
//! caller picks one and drives `lower` once per map.

pub mod cuda;
pub mod mpi;
pub mod mpi_cuda;
pub mod reference;

use crate::ast::Kernel;
use crate::builder::Builder;
use crate::error::Result;
use crate::model::StencilMap;
use crate::optimize::unconditional_get::Warning;
use crate::session::Session;

/// Target identifier named in spec.md §6 ("a target identifier in
/// `{reference, cuda, mpi, mpi-cuda}`"). The CLI surface that reads this
/// from the command line is out of scope (§1); this enum is the closed set
/// a caller picks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Reference,
    Cuda,
    Mpi,
    MpiCuda,
}

/// Everything a backend produced for one `StencilMap`: the per-stencil
/// record type name, the run-kernel function(s), and the run function body
/// that drives the iteration loop. Kept backend-neutral so callers (and
/// tests) don't need to match on `Backend` to read results back out.
#[derive(Debug, Clone)]
pub struct LoweredMap {
    pub stencil_type_name: String,
    pub run_kernel_funcs: Vec<crate::ast::Function>,
    pub run_func_body: Vec<crate::ast::Stmt>,
    /// Ternary-get sites §4.7 noticed but left untransformed.
    pub warnings: Vec<Warning>,
}

impl Backend {
    pub fn make_builder(&self, session: &Session, map: &StencilMap) -> Box<dyn Builder> {
        match self {
            Backend::Reference => Box::new(reference::ReferenceBuilder),
            Backend::Cuda => Box::new(cuda::CudaBuilder::new(session)),
            Backend::Mpi => Box::new(mpi::MpiBuilder),
            Backend::MpiCuda => Box::new(mpi_cuda::MpiCudaBuilder::new(session, map)),
        }
    }

    /// Lower `map`/`kernel` for this backend, producing the run-kernel
    /// function(s) and the run-function body (§4.3–§4.6).
    pub fn lower(
        &self,
        session: &mut Session,
        map_id: crate::model::StencilMapId,
        run_index: usize,
    ) -> Result<LoweredMap> {
        match self {
            Backend::Reference => reference::lower(session, map_id, run_index),
            Backend::Cuda => cuda::lower(session, map_id, run_index),
            Backend::Mpi => mpi::lower(session, map_id, run_index),
            Backend::MpiCuda => mpi_cuda::lower(session, map_id, run_index),
        }
    }
}

/// Shared helper: the `rank` index variable names a run-kernel body and its
/// domain-inclusion check are built against, in canonical `x, y, z` order.
pub fn index_var_names(rank: usize) -> Vec<String> {
    ["x", "y", "z"][..rank].iter().map(|s| s.to_string()).collect()
}

/// Shared helper: build the unconditional kernel-call statement for a map,
/// used identically by reference and MPI (CUDA/MPI+CUDA insert extra
/// statements around it but call this for the call itself too).
pub fn kernel_call_stmt(
    session: &mut Session,
    builder: &dyn Builder,
    map: &StencilMap,
    kernel: &Kernel,
) -> crate::ast::Stmt {
    let idx_vars = index_var_names(kernel.rank);
    let args = builder.build_kernel_call_arg_list(session, &idx_vars, &map.grid_args);
    builder.build_kernel_call(session, &kernel.name, args)
}
