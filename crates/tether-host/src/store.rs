//! Execution-context records and the process-wide handle registries.
//!
//! Two registries exist, each behind its own lock: one maps context handles
//! to [`StoreData`] records, the other holds everything registered
//! independently of any context: bootstrap callback entries and boxed
//! opaque references. Critical sections cover index bookkeeping only; user
//! closures always run with both locks released so a callback can register
//! further callbacks or create further contexts without deadlocking.

use std::any::Any;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use tether_abi::RawContext;

use crate::func::{ReflectedEntry, TypedEntry};
use crate::registry::Registry;
use crate::value::ExternRef;

/// A captured host panic payload awaiting re-raise.
pub(crate) type Fault = Box<dyn Any + Send + 'static>;

/// Context handle -> per-context record.
static CONTEXTS: Lazy<Mutex<Registry<Arc<StoreData>>>> =
    Lazy::new(|| Mutex::new(Registry::new()));

/// Context-independent entries: bootstrap callbacks and boxed opaque values.
static GLOBALS: Lazy<Mutex<Registry<GlobalEntry>>> = Lazy::new(|| Mutex::new(Registry::new()));

/// One slot of the global registry.
#[derive(Clone)]
pub(crate) enum GlobalEntry {
    Typed(Arc<TypedEntry>),
    Reflected(Arc<ReflectedEntry>),
    Opaque(ExternRef),
}

/// Host-side state of one execution context.
///
/// Holds the context's own callback entries in registration order plus the
/// slot a trampoline stashes a captured host fault into. Entry lists only
/// grow while the context lives; the whole record is dropped when the
/// context's finalizer releases its handle.
pub(crate) struct StoreData {
    typed: Mutex<Vec<Arc<TypedEntry>>>,
    reflected: Mutex<Vec<Arc<ReflectedEntry>>>,
    pending_fault: Mutex<Option<Fault>>,
}

impl StoreData {
    fn new() -> Self {
        StoreData {
            typed: Mutex::new(Vec::new()),
            reflected: Mutex::new(Vec::new()),
            pending_fault: Mutex::new(None),
        }
    }

    pub(crate) fn push_typed(&self, entry: TypedEntry) -> usize {
        let mut list = self.typed.lock();
        list.push(Arc::new(entry));
        list.len() - 1
    }

    pub(crate) fn push_reflected(&self, entry: ReflectedEntry) -> usize {
        let mut list = self.reflected.lock();
        list.push(Arc::new(entry));
        list.len() - 1
    }

    pub(crate) fn typed_entry(&self, index: usize) -> Arc<TypedEntry> {
        self.typed.lock()[index].clone()
    }

    pub(crate) fn reflected_entry(&self, index: usize) -> Arc<ReflectedEntry> {
        self.reflected.lock()[index].clone()
    }

    pub(crate) fn set_fault(&self, fault: Fault) {
        *self.pending_fault.lock() = Some(fault);
    }

    pub(crate) fn take_fault(&self) -> Option<Fault> {
        self.pending_fault.lock().take()
    }
}

// Engine-visible context record; the pointer handed to trampolines is a
// pointer to one of these.
#[repr(C)]
struct ContextRepr {
    data_id: usize,
}

/// Types that can name an execution context: [`Store`] outside a callback,
/// [`Caller`] inside one.
pub trait AsContext {
    /// The raw context pointer understood by the engine.
    fn context_ptr(&self) -> *mut RawContext;
}

/// Owner of one execution context.
///
/// Creating a store allocates a context handle and installs the context's
/// record under it; the handle travels inside the engine-visible context
/// record so every trampoline invocation can recover the record without an
/// extra registry hop. `close` releases the handle explicitly and is
/// idempotent; dropping an unclosed store closes it as a fallback.
pub struct Store {
    ctx: *mut ContextRepr,
}

// The raw pointer is an owned Box; all shared state behind it is lock
// protected.
unsafe impl Send for Store {}
unsafe impl Sync for Store {}

impl Store {
    /// Create a context and register its record.
    pub fn new() -> Self {
        let data_id = CONTEXTS.lock().insert(Arc::new(StoreData::new()));
        let ctx = Box::into_raw(Box::new(ContextRepr { data_id }));
        Store { ctx }
    }

    /// Deallocate this context's state explicitly.
    ///
    /// Runs the same release path the engine-side finalizer uses, then
    /// frees the context record. Safe to call more than once.
    pub fn close(&mut self) {
        if self.ctx.is_null() {
            return;
        }
        let repr = unsafe { Box::from_raw(self.ctx) };
        self.ctx = ptr::null_mut();
        release_context(repr.data_id);
    }

    /// Whether `close` already ran.
    pub fn is_closed(&self) -> bool {
        self.ctx.is_null()
    }

    /// Registry handle of this context's record.
    ///
    /// The binding layer hands this to the engine as the context's user
    /// data, which is how [`context_finalizer`] knows what to release.
    pub fn context_handle(&self) -> usize {
        if self.ctx.is_null() {
            panic!("store used after it was closed");
        }
        unsafe { (*self.ctx).data_id }
    }
}

impl AsContext for Store {
    fn context_ptr(&self) -> *mut RawContext {
        if self.ctx.is_null() {
            panic!("store used after it was closed");
        }
        self.ctx as *mut RawContext
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

/// Context view handed to host closures during a callback.
///
/// Valid only for the duration of the call: the closure receives it by
/// mutable borrow, and the trampoline invalidates it before returning to
/// the engine, so a pointer smuggled past the call panics instead of
/// dangling.
pub struct Caller<'a> {
    ctx: *mut RawContext,
    _scope: PhantomData<&'a mut ()>,
}

impl Caller<'_> {
    pub(crate) fn new(ctx: *mut RawContext) -> Self {
        Caller {
            ctx,
            _scope: PhantomData,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.ctx = ptr::null_mut();
    }
}

impl AsContext for Caller<'_> {
    fn context_ptr(&self) -> *mut RawContext {
        if self.ctx.is_null() {
            panic!("caller used after the host function returned");
        }
        self.ctx
    }
}

/// Finalizer the engine runs when a context's user data dies.
///
/// `env` carries the context handle as a pointer-sized integer; releasing
/// it drops the context record and recycles the handle for the next
/// context.
///
/// # Safety
///
/// `env` must be the handle installed for a live context, and the engine
/// must not invoke any trampoline for that context afterwards.
pub unsafe extern "C" fn context_finalizer(env: *mut c_void) {
    release_context(env as usize);
}

fn release_context(data_id: usize) {
    CONTEXTS.lock().remove(data_id);
}

/// Recover the context record a trampoline was invoked against.
pub(crate) fn store_data(ctx: *mut RawContext) -> Arc<StoreData> {
    let repr = unsafe { &*(ctx as *const ContextRepr) };
    CONTEXTS.lock().get(repr.data_id)
}

/// Owning-context identifier stamped into value records; offset by one so
/// zero never names a live context.
pub(crate) fn context_id(ctx: *mut RawContext) -> u32 {
    let repr = unsafe { &*(ctx as *const ContextRepr) };
    repr.data_id as u32 + 1
}

// ============================================================================
// Global registry access
// ============================================================================

pub(crate) fn global_insert(entry: GlobalEntry) -> usize {
    GLOBALS.lock().insert(entry)
}

pub(crate) fn global_typed(index: usize) -> Arc<TypedEntry> {
    match GLOBALS.lock().get(index) {
        GlobalEntry::Typed(entry) => entry,
        _ => panic!("global handle {index} does not name a typed callback"),
    }
}

pub(crate) fn global_reflected(index: usize) -> Arc<ReflectedEntry> {
    match GLOBALS.lock().get(index) {
        GlobalEntry::Reflected(entry) => entry,
        _ => panic!("global handle {index} does not name a reflected callback"),
    }
}

/// Box an opaque reference for the foreign side; the returned word is the
/// registry handle offset by one so zero stays reserved for null.
pub(crate) fn root_opaque(value: &ExternRef) -> u64 {
    global_insert(GlobalEntry::Opaque(value.clone())) as u64 + 1
}

pub(crate) fn opaque_entry(index: usize) -> ExternRef {
    match GLOBALS.lock().get(index) {
        GlobalEntry::Opaque(value) => value,
        _ => panic!("global handle {index} does not name an opaque reference"),
    }
}

pub(crate) fn unroot_opaque(index: usize) {
    match GLOBALS.lock().remove(index) {
        GlobalEntry::Opaque(_) => {}
        _ => panic!("unrooted global handle {index} that is not an opaque reference"),
    }
}

pub(crate) fn global_remove_callback(index: usize) {
    match GLOBALS.lock().remove(index) {
        GlobalEntry::Typed(_) | GlobalEntry::Reflected(_) => {}
        GlobalEntry::Opaque(_) => {
            panic!("global handle {index} names an opaque reference, not a callback")
        }
    }
}

#[cfg(test)]
pub(crate) fn global_contains(index: usize) -> bool {
    GLOBALS.lock().contains(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_close_is_idempotent() {
        let mut store = Store::new();
        assert!(!store.is_closed());
        store.close();
        assert!(store.is_closed());
        store.close();
    }

    #[test]
    #[should_panic(expected = "after it was closed")]
    fn test_context_ptr_after_close_panics() {
        let mut store = Store::new();
        store.close();
        let _ = store.context_ptr();
    }

    #[test]
    fn test_fault_slot_take_clears() {
        let data = StoreData::new();
        assert!(data.take_fault().is_none());
        data.set_fault(Box::new("boom"));
        let fault = data.take_fault().expect("fault was set");
        assert_eq!(*fault.downcast::<&str>().unwrap(), "boom");
        assert!(data.take_fault().is_none());
    }
}
