//! Host-side callback machinery for embedding a sandboxed foreign engine.
//!
//! The engine speaks a flat integer/pointer calling convention and knows
//! nothing about Rust closures, ownership, or unwinding. This crate bridges
//! that gap:
//! - Slab-backed handle registries give closures dense, reusable integer
//!   identities the engine can hold without pinning host memory.
//! - Per-context records own the callbacks registered on one execution
//!   context and the slot a captured host fault waits in.
//! - Two trampolines decode engine value records, run the registered
//!   closure, and encode results, or convert failures into abort objects
//!   the engine can unwind with.
//! - The re-entry shim wraps every host-initiated engine call and re-raises
//!   captured faults once control is fully back on host frames.
//!
//! The engine itself (compilation, validation, execution) is an opaque
//! dependency behind the records defined in `tether-abi`.

pub mod abort;
pub mod func;
pub mod invoke;
pub mod marshal;
pub mod store;
pub mod trampoline;
pub mod value;

mod registry;
mod slab;

// ABI records are part of this crate's public surface; re-export the layer
// below so embedders depend on one crate.
pub use tether_abi::{
    FinalizerFn, RawAbort, RawContext, RawOpError, RawVal, RawValPayload, TrampolineFn,
    UnknownKind,
};

pub use abort::{Abort, AbortCode, CallError, OpError};
pub use func::{
    register_global_reflected, register_global_typed, register_reflected, register_typed,
    reflected_signature, unregister_global, EnvHandle, HostFn, HostParam, HostResult, HostResults,
    IntoReflected, ReflectedEntry, WithCaller,
};
pub use invoke::call_engine;
pub use store::{context_finalizer, AsContext, Caller, Store};
pub use trampoline::{reflected_trampoline, typed_trampoline};
pub use value::{ExternRef, Func, FuncType, Val, ValKind};
