//! Context lifecycle: handle reuse, explicit close, the engine finalizer
//! path, and concurrent registration across many contexts.

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;

use tether_host::{
    context_finalizer, register_global_typed, register_typed, typed_trampoline, unregister_global,
    AsContext, FuncType, RawVal, Store, Val, ValKind,
};

// Handle-reuse assertions need exclusive use of the process-wide context
// registry, so every test in this binary serializes on one lock.
fn store_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn test_context_handle_reused_after_close() {
    let _guard = store_lock();

    let mut first = Store::new();
    let handle = first.context_handle();
    first.close();

    // The freed handle is the smallest free index, so the next context
    // gets it back.
    let second = Store::new();
    assert_eq!(second.context_handle(), handle);
}

#[test]
fn test_closed_store_fails_lookup() {
    let _guard = store_lock();

    let mut store = Store::new();
    store.close();
    let result = std::panic::catch_unwind(|| store.context_ptr());
    assert!(result.is_err());
    let result = std::panic::catch_unwind(|| store.context_handle());
    assert!(result.is_err());
}

#[test]
fn test_finalizer_path_releases_handle() {
    let _guard = store_lock();

    let store = Store::new();
    let handle = store.context_handle();

    // The engine-side path: the finalizer fires with the handle as its
    // environment word. The store wrapper is forgotten, standing in for a
    // host object whose engine-side data already died.
    unsafe { context_finalizer(handle as *mut c_void) };
    mem::forget(store);

    let next = Store::new();
    assert_eq!(next.context_handle(), handle);
}

#[test]
fn test_entries_are_ordered_per_context() {
    let _guard = store_lock();

    let store = Store::new();
    let first = register_typed(&store, FuncType::new([], []), |_c, _a| Ok(Vec::new()));
    let second = register_typed(&store, FuncType::new([], []), |_c, _a| Ok(Vec::new()));
    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert!(first.is_context_local() && second.is_context_local());
}

#[test]
fn test_concurrent_register_invoke_unregister() {
    let _guard = store_lock();

    let workers: Vec<_> = (0..8)
        .map(|worker: i32| {
            thread::spawn(move || {
                for iteration in 0..40 {
                    let mut store = Store::new();
                    let expected = worker * 1000 + iteration;

                    let local = register_typed(
                        &store,
                        FuncType::new([], [ValKind::I32]),
                        move |_caller, _args| Ok(vec![Val::I32(expected)]),
                    );
                    let global = register_global_typed(
                        FuncType::new([], [ValKind::I32]),
                        move |_caller, _args| Ok(vec![Val::I32(-expected)]),
                    );

                    for (env, want) in [(local, expected), (global, -expected)] {
                        let mut results = [RawVal::zeroed()];
                        let abort = unsafe {
                            typed_trampoline(
                                store.context_ptr(),
                                env.raw(),
                                ptr::null(),
                                0,
                                results.as_mut_ptr(),
                                1,
                            )
                        };
                        // An entry must never resolve to another handle's
                        // closure, even while seven other threads churn
                        // the registries.
                        assert!(abort.is_null());
                        assert_eq!(results[0].as_i32(), Some(want));
                    }

                    unregister_global(global);
                    store.close();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }
}

#[test]
fn test_callback_registers_callback_without_deadlock() {
    let _guard = store_lock();

    let store = Store::new();
    let env = register_typed(
        &store,
        FuncType::new([], [ValKind::I32]),
        |caller, _args| {
            // Registration from inside a callback touches the same tables
            // the dispatcher just resolved this entry from.
            let nested = register_typed(
                caller,
                FuncType::new([], [ValKind::I32]),
                |_caller, _args| Ok(vec![Val::I32(7)]),
            );
            let global = register_global_typed(FuncType::new([], []), |_c, _a| Ok(Vec::new()));
            unregister_global(global);
            Ok(vec![Val::I32(nested.raw() as i32)])
        },
    );

    let mut results = [RawVal::zeroed()];
    let abort = unsafe {
        typed_trampoline(
            store.context_ptr(),
            env.raw(),
            ptr::null(),
            0,
            results.as_mut_ptr(),
            1,
        )
    };
    assert!(abort.is_null());

    // The entry registered mid-call is immediately invokable.
    let nested_env = results[0].as_i32().unwrap() as usize;
    let mut nested_results = [RawVal::zeroed()];
    let abort = unsafe {
        typed_trampoline(
            store.context_ptr(),
            nested_env,
            ptr::null(),
            0,
            nested_results.as_mut_ptr(),
            1,
        )
    };
    assert!(abort.is_null());
    assert_eq!(nested_results[0].as_i32(), Some(7));
}
