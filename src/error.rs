//! Error taxonomy for the compiler core.
//!
//! Two taxa, per the translation contract: fatal, source-located
//! `TranslationError`s returned from analysis and builder operations, and
//! internal invariant violations that abort immediately rather than being
//! propagated, since they indicate a bug in an earlier pass rather than a
//! malformed user program.

use std::fmt;
use thiserror::Error;

use crate::ast::NodeId;

/// A source location, carried by every fatal translation error.
///
/// The surface-language parser is an external collaborator; we assume it
/// stamps every AST node with a `Span` when it hands the tree to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// User-facing, fatal translation errors (§7).
///
/// Each variant halts translation of the current unit; partial output is
/// discarded by the caller (`Session::compile`) on any `Err`.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("{span}: indirect kernel call is not supported")]
    IndirectKernelCall { span: Span },

    #[error("{span}: non-affine grid offset in dimension {dim} could not be proven bounded")]
    NonAffineOffset { span: Span, dim: usize },

    #[error("{span}: grid intrinsic applied to non-grid value `{name}`")]
    NotAGrid { span: Span, name: String },

    #[error("{span}: mixed types at grid emit: grid element is {grid_ty}, value is {value_ty}")]
    MixedEmitTypes {
        span: Span,
        grid_ty: String,
        value_ty: String,
    },

    #[error("{span}: user-defined point type has unsupported member type `{member_ty}`")]
    UnsupportedMemberType { span: Span, member_ty: String },

    #[error("{span}: stencil map references undefined kernel `{name}`")]
    UndefinedKernel { span: Span, name: String },

    #[error("{span}: grid argument count {got} does not match kernel parameter count {expected}")]
    ArityMismatch {
        span: Span,
        expected: usize,
        got: usize,
    },

    #[error("{span}: reduction along a subset of axes is not implemented; aggregation order would be ambiguous")]
    PartialAxisReduction { span: Span },

    #[error("{span}: grid rank {got} does not match domain rank {expected}")]
    RankMismatch {
        span: Span,
        expected: usize,
        got: usize,
    },
}

impl TranslationError {
    pub fn span(&self) -> Span {
        match self {
            TranslationError::IndirectKernelCall { span }
            | TranslationError::NonAffineOffset { span, .. }
            | TranslationError::NotAGrid { span, .. }
            | TranslationError::MixedEmitTypes { span, .. }
            | TranslationError::UnsupportedMemberType { span, .. }
            | TranslationError::UndefinedKernel { span, .. }
            | TranslationError::ArityMismatch { span, .. }
            | TranslationError::PartialAxisReduction { span }
            | TranslationError::RankMismatch { span, .. } => *span,
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslationError>;

/// Abort on a violated internal precondition, per §7: "every precondition of
/// a builder operation is checked and triggers immediate abort with the
/// failing predicate and node identity." Mirrors the teacher's use of plain
/// `assert!`/`unreachable!` for invariants that a prior pass should have
/// already established.
#[track_caller]
pub fn invariant(cond: bool, predicate: &str, node: NodeId) {
    if !cond {
        panic!("internal invariant violated: `{predicate}` at node {node:?}");
    }
}
