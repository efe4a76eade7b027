//! Context collectors: everything the oracle needs to reason about a bundle
//! of high-level constraints — a reachable heap slice, the static parameter
//! types, and annotated source excerpts.

pub mod heap;
pub mod source;

pub use heap::{HeapSlicer, HeapState};
pub use source::{SourceContext, SourceContextCollector};
