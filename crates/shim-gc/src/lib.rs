//! # Shim heap
//!
//! Stop-the-world mark/sweep heap used as the engine-side collector.
//!
//! ## Design
//!
//! - **Cells**: every allocation is a reference-counted cell addressed by a
//!   generational [`GcRef`]; a stale reference never resolves.
//! - **Roots**: the heap never collects on its own. Callers pass the root set
//!   explicitly to [`Heap::collect`].
//! - **Finalizers**: closures registered per cell run after the sweep that
//!   reclaimed it, before the cell memory is dropped.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod finalization;
pub mod heap;
pub mod object;

pub use finalization::FinalizerId;
pub use heap::{CollectStats, GcConfig, GcTraceable, Heap, HeapStats};
pub use object::{GcRef, MarkColor};
