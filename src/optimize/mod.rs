//! §4.7 — compiler passes that run after stencil analysis (C3) and before a
//! backend's final emission. A free function over `ast` types, not owned by
//! any one backend, since every backend wants branchy loads turned into
//! straight-line ones before it lowers a kernel.

pub mod unconditional_get;

pub use unconditional_get::{run, Warning};
