//! Physis — a source-to-source stencil compiler.
//!
//! Lowers an embedded stencil DSL (grids, domains, stencil maps, runs) into
//! one of four backends: a sequential reference implementation, CUDA, MPI,
//! and MPI+CUDA with interior/boundary overlap. The surface-language parser,
//! unparser, and runtime library that would sit on either side of this crate
//! are external collaborators, consumed only through the contracts described
//! in the `ast` and `builder` modules.
//!
//! # Pipeline
//!
//! ```text
//! external parser
//!        |
//!        v
//!   ast::{Expr, Stmt, Kernel}  (this crate's input shape)
//!        |
//!        v
//!   analysis::StencilAnalyzer   -- attributes + model descriptors (C1-C3)
//!        |
//!        v
//!   optimize::unconditional_get -- branchy-get lifting (4.7)
//!        |
//!        v
//!   builder::Builder / backend::*  -- per-target lowering (C4-C8)
//!        |
//!        v
//! external unparser
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod ast;
pub mod attributes;
pub mod backend;
pub mod builder;
pub mod error;
pub mod model;
pub mod optimize;
pub mod session;

pub use ast::{BinOp, Expr, Kernel, NodeId, NodeIdGen, Stmt, UnOp};
pub use backend::{Backend, LoweredMap};
pub use error::{Result, Span, TranslationError};
pub use session::{Session, SessionConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
