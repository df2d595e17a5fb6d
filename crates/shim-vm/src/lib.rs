//! # Shim VM
//!
//! The engine object model the embedding shim is built on: values, objects
//! with a single extra-data slot, native functions, function/object
//! templates, realms, pre-compiled scripts and an evaluator that reports
//! either a value or a thrown value plus the captured stack.
//!
//! Every object lives in a [`shim_gc::Heap`]; liveness is decided by
//! [`VmInstance::collect_garbage`] from the roots the embedder passes in.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod array_buffer;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod function;
pub mod object;
pub mod script;
pub mod template;
pub mod value;
pub mod vm;

pub use array_buffer::{ArrayBufferContents, ArrayBufferObject};
pub use context::Context;
pub use error::{ErrorKind, VmError};
pub use evaluator::{EvalResult, Evaluator, StackTraceData};
pub use execution::ExecutionState;
pub use function::{CallInfo, FunctionKind, NativeFunction};
pub use object::{ExtraSlot, JsObject, ObjectKind, PropertyInterceptor};
pub use script::{PrecompiledScripts, Script, ScriptBody, ScriptCompiler};
pub use template::{FunctionTemplate, ObjectTemplate, TemplateValue};
pub use value::Value;
pub use vm::{VmConfig, VmInstance};

pub use shim_gc::{CollectStats, GcConfig, GcRef, GcTraceable};
