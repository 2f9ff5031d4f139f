//! Boundary re-entry shim for host-initiated engine calls.

use std::panic::resume_unwind;
use std::ptr;

use tether_abi::{RawAbort, RawOpError};

use crate::abort::{Abort, CallError, OpError};
use crate::store::{self, AsContext};

/// Run an engine invocation and reconcile its outcome with any host fault
/// captured while callbacks were on the stack.
///
/// `engine` receives an out-parameter for the engine's abort object and
/// returns the engine's error object (both null when absent). After it
/// returns, ownership of both objects is taken unconditionally so they are
/// released on every path. Then, if a callback parked a fault in this
/// context's pending-fault slot, the slot is cleared, any abort/error is
/// dropped (the fault is the more specific failure), and the original
/// panic payload is re-raised here, the first frame where unwinding is safe
/// again. Otherwise the abort wins over the error, and absent both the
/// call succeeded.
///
/// This is the only place a fault that occurred several engine frames deep
/// becomes visible to the host again.
///
/// # Safety
///
/// Any non-null pointers `engine` hands back must be owned abort/error
/// objects produced by [`Abort::into_raw`] / [`OpError::into_raw`] and not
/// reclaimed elsewhere.
pub unsafe fn call_engine<C, F>(cx: &C, engine: F) -> Result<(), CallError>
where
    C: AsContext + ?Sized,
    F: FnOnce(&mut *mut RawAbort) -> *mut RawOpError,
{
    let data = store::store_data(cx.context_ptr());

    let mut abort_out: *mut RawAbort = ptr::null_mut();
    let error_out = engine(&mut abort_out);

    let abort = (!abort_out.is_null()).then(|| unsafe { Abort::from_raw(abort_out) });
    let error = (!error_out.is_null()).then(|| unsafe { OpError::from_raw(error_out) });

    if let Some(fault) = data.take_fault() {
        drop(abort);
        drop(error);
        resume_unwind(fault);
    }

    if let Some(abort) = abort {
        return Err(CallError::Abort(abort));
    }
    if let Some(error) = error {
        return Err(CallError::Op(error));
    }
    Ok(())
}
