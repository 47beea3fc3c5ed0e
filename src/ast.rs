//! Minimal AST shape and query/build/replace primitives.
//!
//! The real surface-language parser and its AST library are external
//! collaborators (§1): Physis consumes whatever tree they build through a
//! query/build/replace interface. This module is our stand-in for that
//! contract — not a parser, just the node shapes stencil analysis and the
//! builders read and rewrite, plus the handful of traversal helpers every
//! later component needs. Node identity (`NodeId`) is how attributes (C1)
//! attach to a node without the AST and the attribute table owning each
//! other (see DESIGN.md, "Cyclic AST <-> attribute references").

use crate::error::Span;

/// Stable identity for one AST node, assigned at construction time.
///
/// Attribute tables key on this instead of node addresses or indices into a
/// vector that could be invalidated by a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Monotonic node-id source. Lives on the session (§9 "global mutable
/// state"), never as a process-wide static, so independent sessions stay
/// isolated.
#[derive(Debug, Default)]
pub struct NodeIdGen(u32);

impl NodeIdGen {
    pub fn next(&mut self) -> NodeId {
        let id = NodeId(self.0);
        self.0 += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// An expression node.
///
/// `Call` is deliberately untyped (a name plus arguments): recognizing a
/// call as a grid intrinsic (`PSGridGet`, `PSGridNew`, ...) is the job of
/// stencil analysis (§4.1), not the AST shape itself.
#[derive(Debug, Clone)]
pub enum Expr {
    IntLit { id: NodeId, span: Span, value: i64 },
    FloatLit { id: NodeId, span: Span, value: f64 },
    Var { id: NodeId, span: Span, name: String },
    Binary {
        id: NodeId,
        span: Span,
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        id: NodeId,
        span: Span,
        op: UnOp,
        expr: Box<Expr>,
    },
    /// `func(args...)` — may later be recognized as a grid intrinsic or a
    /// user kernel/helper call.
    Call {
        id: NodeId,
        span: Span,
        func: String,
        args: Vec<Expr>,
    },
    /// `receiver.member` — used for record-point field access (`g.m`) and
    /// for kernel helper calls surfaced as method calls by the front end.
    Field {
        id: NodeId,
        span: Span,
        receiver: Box<Expr>,
        member: String,
    },
    /// Already-lowered pointer arithmetic: `base[offset]`. Stencil analysis
    /// reverse-engineers the per-dimension indices out of `offset` when it
    /// recognizes the canonical multiplicative-tower shape (§4.1).
    Index {
        id: NodeId,
        span: Span,
        base: Box<Expr>,
        offset: Box<Expr>,
    },
    /// Ternary conditional expression. §4.7 detects but does not transform
    /// these; they only ever get a warning.
    Cond {
        id: NodeId,
        span: Span,
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

impl Expr {
    pub fn id(&self) -> NodeId {
        match self {
            Expr::IntLit { id, .. }
            | Expr::FloatLit { id, .. }
            | Expr::Var { id, .. }
            | Expr::Binary { id, .. }
            | Expr::Unary { id, .. }
            | Expr::Call { id, .. }
            | Expr::Field { id, .. }
            | Expr::Index { id, .. }
            | Expr::Cond { id, .. } => *id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::IntLit { span, .. }
            | Expr::FloatLit { span, .. }
            | Expr::Var { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Field { span, .. }
            | Expr::Index { span, .. }
            | Expr::Cond { span, .. } => *span,
        }
    }

    /// Recognize `func(args)` call-form grid intrinsics by name; returns the
    /// callee name and argument list when this expression is a `Call`.
    pub fn as_call(&self) -> Option<(&str, &[Expr])> {
        match self {
            Expr::Call { func, args, .. } => Some((func.as_str(), args.as_slice())),
            _ => None,
        }
    }

    /// Visit every sub-expression (pre-order), including `self`. This is the
    /// "query" primitive: callers filter by shape or look up attributes by
    /// each node's id.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::IntLit { .. } | Expr::FloatLit { .. } | Expr::Var { .. } => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Unary { expr, .. } => expr.walk(f),
            Expr::Call { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Expr::Field { receiver, .. } => receiver.walk(f),
            Expr::Index { base, offset, .. } => {
                base.walk(f);
                offset.walk(f);
            }
            Expr::Cond {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                cond.walk(f);
                then_expr.walk(f);
                else_expr.walk(f);
            }
        }
    }

    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        f(self);
        match self {
            Expr::IntLit { .. } | Expr::FloatLit { .. } | Expr::Var { .. } => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk_mut(f);
                rhs.walk_mut(f);
            }
            Expr::Unary { expr, .. } => expr.walk_mut(f),
            Expr::Call { args, .. } => {
                for a in args.iter_mut() {
                    a.walk_mut(f);
                }
            }
            Expr::Field { receiver, .. } => receiver.walk_mut(f),
            Expr::Index { base, offset, .. } => {
                base.walk_mut(f);
                offset.walk_mut(f);
            }
            Expr::Cond {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                cond.walk_mut(f);
                then_expr.walk_mut(f);
                else_expr.walk_mut(f);
            }
        }
    }
}

/// A statement node.
#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        span: Span,
        name: String,
        is_mutable: bool,
        init: Option<Expr>,
    },
    Assign {
        span: Span,
        target: Expr,
        value: Expr,
    },
    Expr(Expr),
    If {
        span: Span,
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    For {
        span: Span,
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    Return {
        span: Span,
        value: Option<Expr>,
    },
}

impl Stmt {
    /// Visit every expression reachable from this statement (not recursing
    /// into nested statement bodies' own statements beyond what `walk`
    /// already does via the caller looping over a block).
    pub fn walk_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        match self {
            Stmt::Let { init, .. } => {
                if let Some(e) = init {
                    e.walk(f);
                }
            }
            Stmt::Assign { target, value, .. } => {
                target.walk(f);
                value.walk(f);
            }
            Stmt::Expr(e) => e.walk(f),
            Stmt::If { cond, .. } => cond.walk(f),
            Stmt::For { start, end, .. } => {
                start.walk(f);
                end.walk(f);
            }
            Stmt::Return { value, .. } => {
                if let Some(e) = value {
                    e.walk(f);
                }
            }
        }
    }
}

/// Walk every expression in a statement list, recursing into nested blocks.
pub fn walk_block<'a>(block: &'a [Stmt], f: &mut impl FnMut(&'a Expr)) {
    for stmt in block {
        stmt.walk_exprs(f);
        match stmt {
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                walk_block(then_branch, f);
                if let Some(e) = else_branch {
                    walk_block(e, f);
                }
            }
            Stmt::For { body, .. } => walk_block(body, f),
            _ => {}
        }
    }
}

/// The mutable counterpart of `walk_block`, used by rewrite passes
/// (`optimize::unconditional_get`, the MPI+CUDA interior/boundary kernel
/// specializer) that need to replace call nodes in place.
pub fn walk_block_mut(block: &mut [Stmt], f: &mut impl FnMut(&mut Expr)) {
    for stmt in block.iter_mut() {
        match stmt {
            Stmt::Let { init, .. } => {
                if let Some(e) = init {
                    e.walk_mut(f);
                }
            }
            Stmt::Assign { target, value, .. } => {
                target.walk_mut(f);
                value.walk_mut(f);
            }
            Stmt::Expr(e) => e.walk_mut(f),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                cond.walk_mut(f);
                walk_block_mut(then_branch, f);
                if let Some(b) = else_branch {
                    walk_block_mut(b, f);
                }
            }
            Stmt::For { start, end, body, .. } => {
                start.walk_mut(f);
                end.walk_mut(f);
                walk_block_mut(body, f);
            }
            Stmt::Return { value, .. } => {
                if let Some(e) = value {
                    e.walk_mut(f);
                }
            }
        }
    }
}

/// A grid parameter of a kernel: the recognizer (outside this crate's
/// scope) has already told us which of the kernel's trailing parameters are
/// grids and which leading ones are iteration indices (§4.1 "Input").
#[derive(Debug, Clone)]
pub struct GridParam {
    pub name: String,
    pub grid_type: crate::model::GridTypeId,
}

/// A kernel function: `rank` leading index parameters followed by grid
/// parameters, recognized by a `Kernel` attribute the front end already
/// attached (§4.1).
#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
    pub rank: usize,
    pub index_params: Vec<String>,
    pub grid_params: Vec<GridParam>,
    pub body: Vec<Stmt>,
}

/// A synthesized or user function body, used for the functions backends
/// build (run/run_inner/run_boundary, helper clones, ...).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

// ---- Build primitives -----------------------------------------------------
//
// Small constructors used by the builders (C4) to synthesize new AST nodes.
// Each takes the `NodeIdGen` explicitly rather than threading a session
// reference through every call site.

pub fn var(ids: &mut NodeIdGen, span: Span, name: impl Into<String>) -> Expr {
    Expr::Var {
        id: ids.next(),
        span,
        name: name.into(),
    }
}

pub fn int(ids: &mut NodeIdGen, span: Span, value: i64) -> Expr {
    Expr::IntLit {
        id: ids.next(),
        span,
        value,
    }
}

pub fn binary(ids: &mut NodeIdGen, span: Span, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        id: ids.next(),
        span,
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn call(ids: &mut NodeIdGen, span: Span, func: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        id: ids.next(),
        span,
        func: func.into(),
        args,
    }
}

pub fn index(ids: &mut NodeIdGen, span: Span, base: Expr, offset: Expr) -> Expr {
    Expr::Index {
        id: ids.next(),
        span,
        base: Box::new(base),
        offset: Box::new(offset),
    }
}

/// The closed set of surface intrinsics stencil analysis recognizes (§6):
/// `PSInit`, `PSGrid*New`, `PSGridGet[Periodic]`, `PSGridEmit[Utype]`,
/// `PSGridDim`, `PSDomain*D`, `PSStencilMap`, `PSStencilRun`,
/// `PSReduceGrid*`, `PSFinalize`. Recognition is name+arity, matching the
/// boundary where the out-of-scope parser is assumed to have already
/// tagged its output — this enum is that tag's closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Init,
    GridNew,
    GridGet,
    GridGetPeriodic,
    GridEmit,
    GridEmitUtype,
    GridDim,
    Domain,
    StencilMap,
    StencilRun,
    ReduceGrid,
    Finalize,
}

impl Intrinsic {
    /// Recognize a call-form intrinsic by callee name and argument count.
    /// Family names like `PSGrid3DDoubleNew`/`PSDomain2D` carry a
    /// rank/type suffix the front end has already resolved, so these are
    /// matched by prefix/suffix rather than an exact literal.
    pub fn recognize(func: &str, arity: usize) -> Option<Intrinsic> {
        match func {
            "PSInit" => Some(Intrinsic::Init),
            "PSGridGet" => Some(Intrinsic::GridGet),
            "PSGridGetPeriodic" => Some(Intrinsic::GridGetPeriodic),
            "PSGridEmit" if arity == 2 => Some(Intrinsic::GridEmit),
            "PSGridEmitUtype" if arity == 2 => Some(Intrinsic::GridEmitUtype),
            "PSGridDim" if arity == 2 => Some(Intrinsic::GridDim),
            "PSStencilMap" => Some(Intrinsic::StencilMap),
            "PSStencilRun" => Some(Intrinsic::StencilRun),
            "PSFinalize" if arity == 0 => Some(Intrinsic::Finalize),
            _ if func.starts_with("PSGrid") && func.ends_with("New") => Some(Intrinsic::GridNew),
            _ if func.starts_with("PSDomain") && func.ends_with('D') => Some(Intrinsic::Domain),
            _ if func.starts_with("PSReduceGrid") => Some(Intrinsic::ReduceGrid),
            _ => None,
        }
    }
}

// ---- Replace primitive -----------------------------------------------------

/// Replace the sub-expression with id `target` by `replacement`, anywhere
/// under `root`. Returns true if a replacement occurred.
pub fn replace_expr(root: &mut Expr, target: NodeId, replacement: Expr) -> bool {
    if root.id() == target {
        *root = replacement;
        return true;
    }
    let mut repl = Some(replacement);
    let mut done = false;
    root.walk_mut(&mut |e| {
        if done {
            return;
        }
        if e.id() == target {
            if let Some(r) = repl.take() {
                *e = r;
                done = true;
            }
        }
    });
    done
}
