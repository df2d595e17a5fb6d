//! # Shim API
//!
//! The embedding API re-implemented over the shim VM, so a host written
//! against isolates, contexts, handles and templates runs unchanged.
//!
//! ## Design
//!
//! - **Handles**: every handle points at a [`ValueWrap`] cell in the engine
//!   heap. Handle scopes, persistent handles and eternals only root wraps;
//!   the engine collector reclaims them.
//! - **Extra data**: engine objects and templates carry one extra slot.
//!   Template data becomes per-instance data the first time an object is
//!   handed out.
//! - **Weak handles**: a weak global keeps nothing alive. Its callback runs
//!   from the heap finalizer of the reclaimed wrap.
//! - **Exceptions**: engine throws land in the isolate's pending slot and
//!   surface through [`TryCatch`] or a rethrow into the engine.
//! - **Main loop**: [`main_loop::MainLoop`] pumps host tasks and asks a
//!   [`gc_strategy::GcStrategy`] when to collect.

#![warn(clippy::all)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod allocator;
pub mod backing_store;
pub mod context;
pub mod error;
pub(crate) mod evaluator;
pub mod exception;
pub mod extra_data;
pub mod flags;
pub mod gc_strategy;
pub mod global_handles;
pub mod handle;
pub mod handle_scope;
pub mod isolate;
pub mod loader;
pub mod local;
pub mod main_loop;
pub mod message;
pub mod object;
pub mod persistent;
pub mod serializer;
pub mod template;
pub mod types;

pub use allocator::{ArrayBufferAllocator, ArrayBufferAllocatorDecorator, DefaultAllocator};
pub use backing_store::{BackingStoreWrap, BackingStoreWrapHolder, InitializedFlag, SharedFlag};
pub use context::{Context, ContextScope};
pub use error::{Result, ShimError};
pub use exception::TryCatch;
pub use flags::{FlagType, Flags};
pub use gc_strategy::{DelayedGc, DelayedGcConfig, DelayedGcState, EveryTickGc, GcStrategy};
pub use global_handles::{GlobalHandleState, WeakCallback, WeakCallbackInfo};
pub use handle::{HandleKind, ValueWrap};
pub use handle_scope::{EscapableHandleScope, HandleScope, SealHandleScope};
pub use isolate::{CreateParams, Isolate, IsolateScope, IsolateState, IsolateWrap};
pub use local::{Local, MaybeLocal};
pub use main_loop::MainLoop;
pub use message::Message;
pub use object::ScriptOrigin;
pub use persistent::{Eternal, Global};
pub use serializer::{SerializerDelegate, ValueDeserializer, ValueSerializer};
pub use template::{
    FunctionCallback, FunctionCallbackInfo, IndexedPropertyHandlerConfiguration,
    NamedPropertyHandlerConfiguration, PropertyCallbackInfo, ReturnValue,
};
