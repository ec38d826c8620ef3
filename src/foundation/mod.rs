//! Shared foundation types: source spans and cancellation.

pub mod cancel;
pub mod span;

pub use cancel::{CancellationToken, Canceller};
pub use span::{SourceFile, SourceMap, Span};
