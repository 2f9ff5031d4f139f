//! The native callback targets handed to the engine.
//!
//! Both trampolines share one dispatch protocol; they differ only in which
//! entry table the environment word resolves against. Dispatch order is
//! fixed: recover the context record, resolve the entry, decode arguments,
//! run the closure under a panic catch, then either encode results or hand
//! the engine an abort object it can unwind with.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use tether_abi::{RawAbort, RawContext, RawVal, ValKind};

use crate::abort::Abort;
use crate::func::HostFn;
use crate::marshal;
use crate::store::{self, Caller, StoreData};
use crate::value::Val;

/// Callback target for entries registered with an explicit signature.
///
/// # Safety
///
/// Must only be invoked by the engine (or a stand-in for it) with a live
/// context pointer, an environment word produced by typed registration on
/// that context, `nargs` readable records at `args`, and `nresults`
/// writable slots at `results` matching the entry's declared result count.
pub unsafe extern "C" fn typed_trampoline(
    ctx: *mut RawContext,
    env: usize,
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
) -> *mut RawAbort {
    let data = store::store_data(ctx);
    let entry = if env & 1 == 1 {
        data.typed_entry(env >> 1)
    } else {
        store::global_typed(env >> 1)
    };
    unsafe {
        dispatch(
            ctx,
            &data,
            entry.callback.as_ref(),
            &entry.results,
            args,
            nargs,
            results,
            nresults,
        )
    }
}

/// Callback target for entries registered with an inferred signature.
///
/// # Safety
///
/// Same contract as [`typed_trampoline`], with an environment word produced
/// by reflected registration.
pub unsafe extern "C" fn reflected_trampoline(
    ctx: *mut RawContext,
    env: usize,
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
) -> *mut RawAbort {
    let data = store::store_data(ctx);
    let entry = if env & 1 == 1 {
        data.reflected_entry(env >> 1)
    } else {
        store::global_reflected(env >> 1)
    };
    unsafe {
        dispatch(
            ctx,
            &data,
            entry.callback.as_ref(),
            &entry.results,
            args,
            nargs,
            results,
            nresults,
        )
    }
}

/// Shared dispatch protocol behind both trampolines.
///
/// # Safety
///
/// `args` must point at `nargs` readable records and `results` at writable
/// slots for every declared result kind.
#[allow(clippy::too_many_arguments)]
unsafe fn dispatch(
    ctx: *mut RawContext,
    data: &StoreData,
    callback: &HostFn,
    result_kinds: &[ValKind],
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
) -> *mut RawAbort {
    debug_assert_eq!(nresults, result_kinds.len());

    let params: Vec<Val> = (0..nargs)
        .map(|i| marshal::decode(unsafe { &*args.add(i) }))
        .collect();

    let mut caller = Caller::new(ctx);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let produced = callback(&mut caller, &params)?;
        // A result sequence that disagrees with the declared signature
        // would corrupt the engine-side frame layout; treat it exactly
        // like any other host fault.
        if produced.len() != result_kinds.len() {
            panic!(
                "callback produced {} results, its signature declares {}",
                produced.len(),
                result_kinds.len()
            );
        }
        for (position, (value, kind)) in produced.iter().zip(result_kinds).enumerate() {
            if value.kind() != *kind {
                panic!(
                    "callback result {position} is {}, its signature declares {}",
                    value.kind().name(),
                    kind.name()
                );
            }
        }
        Ok::<Vec<Val>, Abort>(produced)
    }));
    caller.invalidate();

    let produced = match outcome {
        // Host fault: park the payload for the re-entry shim and hand the
        // engine a generic abort it can unwind its own frames with.
        Err(fault) => {
            data.set_fault(fault);
            return Abort::host_fault().into_raw();
        }
        // Explicit abort from the closure. Consuming an already-consumed
        // abort panics here, outside the catch, and the unwind out of an
        // extern "C" frame aborts the process: a logic defect this deep
        // must not limp on.
        Ok(Err(abort)) => return abort.into_raw(),
        Ok(Ok(values)) => values,
    };

    let ctx_id = store::context_id(ctx);
    for (i, value) in produced.iter().enumerate() {
        marshal::encode(value, unsafe { &mut *results.add(i) }, ctx_id);
    }
    ptr::null_mut()
}
