//! Callback registration: typed entries, reflected entries, and the handle
//! tagging scheme that tells a trampoline where an entry lives.
//!
//! Registration only ever appends: a context-local entry goes at the end of
//! the owning context's list, a global entry takes the smallest free slot
//! of the global registry. The returned [`EnvHandle`] carries the location
//! in its low bit and is what the binding layer passes to the engine as the
//! trampoline's opaque environment word.

use std::sync::Arc;

use crate::abort::Abort;
use crate::store::{self, AsContext, Caller, GlobalEntry};
use crate::value::{ExternRef, Func, FuncType, Val, ValKind};

/// Dynamic shape every registered closure is stored under.
pub type HostFn = dyn Fn(&mut Caller<'_>, &[Val]) -> Result<Vec<Val>, Abort> + Send + Sync;

/// A callback registered with an explicit [`FuncType`].
pub(crate) struct TypedEntry {
    pub(crate) callback: Box<HostFn>,
    /// Declared result kinds; produced results are validated against these
    /// before they are written back to the engine.
    pub(crate) results: Vec<ValKind>,
}

/// A callback whose signature was inferred from its Rust type.
///
/// Inference happens once, at registration; the cached kinds are all the
/// dispatch path ever consults.
pub struct ReflectedEntry {
    pub(crate) callback: Box<HostFn>,
    pub(crate) params: Vec<ValKind>,
    pub(crate) results: Vec<ValKind>,
}

impl ReflectedEntry {
    /// Parameter kinds inferred at registration.
    pub fn params(&self) -> &[ValKind] {
        &self.params
    }

    /// Result kinds inferred at registration.
    pub fn results(&self) -> &[ValKind] {
        &self.results
    }
}

/// Tagged entry handle passed to the engine as a trampoline environment.
///
/// Bit 0 distinguishes where the entry lives: 1 for the owning context's
/// local list, 0 for the global registry. The remaining bits are the index
/// within that store, shifted left by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvHandle(usize);

impl EnvHandle {
    pub(crate) fn context_local(index: usize) -> Self {
        EnvHandle((index << 1) | 1)
    }

    pub(crate) fn global(index: usize) -> Self {
        EnvHandle(index << 1)
    }

    /// The tagged word to hand to the engine.
    pub fn raw(self) -> usize {
        self.0
    }

    /// Index within the local list or global registry.
    pub fn index(self) -> usize {
        self.0 >> 1
    }

    /// Whether the entry lives in the owning context's local list.
    pub fn is_context_local(self) -> bool {
        self.0 & 1 == 1
    }
}

// ============================================================================
// Typed registration
// ============================================================================

/// Register a closure under an explicit signature on a context.
///
/// The closure receives the transient [`Caller`] and the decoded arguments,
/// and returns either its results or an [`Abort`] for the sandboxed caller.
/// Result arity and kinds are validated against `ty` on every invocation.
pub fn register_typed<C, F>(cx: &C, ty: FuncType, callback: F) -> EnvHandle
where
    C: AsContext + ?Sized,
    F: Fn(&mut Caller<'_>, &[Val]) -> Result<Vec<Val>, Abort> + Send + Sync + 'static,
{
    let entry = TypedEntry {
        callback: Box::new(callback),
        results: ty.into_results(),
    };
    let data = store::store_data(cx.context_ptr());
    EnvHandle::context_local(data.push_typed(entry))
}

/// Register a typed closure with no owning context.
///
/// Used during bootstrap, before any context exists; the entry lives in the
/// global registry until the process exits or the embedder removes it.
pub fn register_global_typed<F>(ty: FuncType, callback: F) -> EnvHandle
where
    F: Fn(&mut Caller<'_>, &[Val]) -> Result<Vec<Val>, Abort> + Send + Sync + 'static,
{
    let entry = TypedEntry {
        callback: Box::new(callback),
        results: ty.into_results(),
    };
    EnvHandle::global(store::global_insert(GlobalEntry::Typed(Arc::new(entry))))
}

// ============================================================================
// Reflected registration
// ============================================================================

/// Register a closure whose signature is inferred from its Rust type.
pub fn register_reflected<C, Params, Results, F>(cx: &C, callback: F) -> EnvHandle
where
    C: AsContext + ?Sized,
    F: IntoReflected<Params, Results>,
{
    let data = store::store_data(cx.context_ptr());
    EnvHandle::context_local(data.push_reflected(callback.into_entry()))
}

/// Register a reflected closure with no owning context.
pub fn register_global_reflected<Params, Results, F>(callback: F) -> EnvHandle
where
    F: IntoReflected<Params, Results>,
{
    EnvHandle::global(store::global_insert(GlobalEntry::Reflected(Arc::new(
        callback.into_entry(),
    ))))
}

/// Release a context-independent entry created by one of the global
/// registration functions.
///
/// Context-local entries have no removal path: they live and die with
/// their owning context, so passing a context-local handle here panics.
pub fn unregister_global(handle: EnvHandle) {
    if handle.is_context_local() {
        panic!("context-local entries are released with their context, not individually");
    }
    store::global_remove_callback(handle.index());
}

/// The signature that would be inferred for a closure, without registering
/// it. The binding layer uses this to create the engine-side function type.
pub fn reflected_signature<Params, Results, F>(_callback: &F) -> FuncType
where
    F: IntoReflected<Params, Results>,
{
    FuncType::new(F::params(), F::results())
}

/// A Rust value usable as an inferred callback parameter.
pub trait HostParam: Sized {
    /// Engine kind this parameter maps to.
    const KIND: ValKind;

    /// Extract from a decoded value; `None` on kind mismatch.
    fn from_val(val: &Val) -> Option<Self>;
}

impl HostParam for i32 {
    const KIND: ValKind = ValKind::I32;

    fn from_val(val: &Val) -> Option<Self> {
        val.as_i32()
    }
}

impl HostParam for i64 {
    const KIND: ValKind = ValKind::I64;

    fn from_val(val: &Val) -> Option<Self> {
        val.as_i64()
    }
}

impl HostParam for f32 {
    const KIND: ValKind = ValKind::F32;

    fn from_val(val: &Val) -> Option<Self> {
        val.as_f32()
    }
}

impl HostParam for f64 {
    const KIND: ValKind = ValKind::F64;

    fn from_val(val: &Val) -> Option<Self> {
        val.as_f64()
    }
}

impl HostParam for Option<Func> {
    const KIND: ValKind = ValKind::FuncRef;

    fn from_val(val: &Val) -> Option<Self> {
        val.as_func_ref()
    }
}

impl HostParam for Option<ExternRef> {
    const KIND: ValKind = ValKind::ExternRef;

    fn from_val(val: &Val) -> Option<Self> {
        val.as_extern_ref().map(|opt| opt.cloned())
    }
}

/// A Rust value usable as a single inferred callback result.
pub trait HostResult {
    /// Engine kind this result maps to.
    const KIND: ValKind;

    /// Convert into a tagged value.
    fn into_val(self) -> Val;
}

/// The full result shape of an inferred callback: nothing, one value, a
/// tuple of values, or any of those wrapped in `Result<_, Abort>`.
pub trait HostResults {
    /// Result kinds, in order.
    fn kinds() -> Vec<ValKind>;

    /// Convert into tagged values, or an abort for the sandboxed caller.
    fn into_vals(self) -> Result<Vec<Val>, Abort>;
}

macro_rules! impl_host_result {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl HostResult for $ty {
            const KIND: ValKind = ValKind::$kind;

            fn into_val(self) -> Val {
                Val::$variant(self)
            }
        }

        impl HostResults for $ty {
            fn kinds() -> Vec<ValKind> {
                vec![ValKind::$kind]
            }

            fn into_vals(self) -> Result<Vec<Val>, Abort> {
                Ok(vec![self.into_val()])
            }
        }
    };
}

impl_host_result!(i32, I32, I32);
impl_host_result!(i64, I64, I64);
impl_host_result!(f32, F32, F32);
impl_host_result!(f64, F64, F64);
impl_host_result!(Option<Func>, FuncRef, FuncRef);
impl_host_result!(Option<ExternRef>, ExternRef, ExternRef);

impl HostResults for () {
    fn kinds() -> Vec<ValKind> {
        Vec::new()
    }

    fn into_vals(self) -> Result<Vec<Val>, Abort> {
        Ok(Vec::new())
    }
}

impl<R: HostResults> HostResults for Result<R, Abort> {
    fn kinds() -> Vec<ValKind> {
        R::kinds()
    }

    fn into_vals(self) -> Result<Vec<Val>, Abort> {
        self.and_then(R::into_vals)
    }
}

macro_rules! impl_host_results_tuple {
    ($($idx:tt $ty:ident),+) => {
        impl<$($ty: HostResult),+> HostResults for ($($ty,)+) {
            fn kinds() -> Vec<ValKind> {
                vec![$($ty::KIND),+]
            }

            fn into_vals(self) -> Result<Vec<Val>, Abort> {
                Ok(vec![$(self.$idx.into_val()),+])
            }
        }
    };
}

impl_host_results_tuple!(0 R1, 1 R2);
impl_host_results_tuple!(0 R1, 1 R2, 2 R3);
impl_host_results_tuple!(0 R1, 1 R2, 2 R3, 3 R4);

/// Marker for the reflected-closure impls that take a leading
/// `&mut Caller`.
pub struct WithCaller(());

/// Closures convertible into a [`ReflectedEntry`].
///
/// Implemented by the macro below for closures of up to six marshalable
/// parameters, with or without a leading `&mut Caller`, returning any
/// [`HostResults`] shape. `Params` and `Results` are inference markers
/// only.
pub trait IntoReflected<Params, Results>: Send + Sync + 'static {
    /// Parameter kinds inferred from the closure type.
    fn params() -> Vec<ValKind>;

    /// Result kinds inferred from the closure type.
    fn results() -> Vec<ValKind>;

    /// Wrap the closure for registration, caching the inferred kinds.
    fn into_entry(self) -> ReflectedEntry;
}

macro_rules! impl_into_reflected {
    ($($param:ident),*) => {
        impl<F, $($param,)* R> IntoReflected<($($param,)*), R> for F
        where
            F: Fn($($param),*) -> R + Send + Sync + 'static,
            $($param: HostParam,)*
            R: HostResults,
        {
            fn params() -> Vec<ValKind> {
                vec![$($param::KIND),*]
            }

            fn results() -> Vec<ValKind> {
                R::kinds()
            }

            #[allow(non_snake_case)]
            fn into_entry(self) -> ReflectedEntry {
                ReflectedEntry {
                    params: vec![$($param::KIND),*],
                    results: R::kinds(),
                    callback: Box::new(move |_caller, args| {
                        #[allow(unused_mut, unused_variables)]
                        let mut args = args.iter();
                        $(
                            let $param = match args.next().map($param::from_val) {
                                Some(Some(value)) => value,
                                _ => panic!("callback argument does not match the inferred signature"),
                            };
                        )*
                        self($($param),*).into_vals()
                    }),
                }
            }
        }

        impl<F, $($param,)* R> IntoReflected<(WithCaller, $($param,)*), R> for F
        where
            F: Fn(&mut Caller<'_>, $($param),*) -> R + Send + Sync + 'static,
            $($param: HostParam,)*
            R: HostResults,
        {
            fn params() -> Vec<ValKind> {
                vec![$($param::KIND),*]
            }

            fn results() -> Vec<ValKind> {
                R::kinds()
            }

            #[allow(non_snake_case)]
            fn into_entry(self) -> ReflectedEntry {
                ReflectedEntry {
                    params: vec![$($param::KIND),*],
                    results: R::kinds(),
                    callback: Box::new(move |caller, args| {
                        #[allow(unused_mut, unused_variables)]
                        let mut args = args.iter();
                        $(
                            let $param = match args.next().map($param::from_val) {
                                Some(Some(value)) => value,
                                _ => panic!("callback argument does not match the inferred signature"),
                            };
                        )*
                        self(caller, $($param),*).into_vals()
                    }),
                }
            }
        }
    };
}

impl_into_reflected!();
impl_into_reflected!(P1);
impl_into_reflected!(P1, P2);
impl_into_reflected!(P1, P2, P3);
impl_into_reflected!(P1, P2, P3, P4);
impl_into_reflected!(P1, P2, P3, P4, P5);
impl_into_reflected!(P1, P2, P3, P4, P5, P6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_handle_tagging() {
        let local = EnvHandle::context_local(5);
        assert!(local.is_context_local());
        assert_eq!(local.index(), 5);
        assert_eq!(local.raw(), 11);

        let global = EnvHandle::global(5);
        assert!(!global.is_context_local());
        assert_eq!(global.index(), 5);
        assert_eq!(global.raw(), 10);
    }

    #[test]
    fn test_inferred_signature() {
        let callback = |a: i32, b: i64| -> f64 { a as f64 + b as f64 };
        let ty = reflected_signature(&callback);
        assert_eq!(ty.params(), &[ValKind::I32, ValKind::I64]);
        assert_eq!(ty.results(), &[ValKind::F64]);
    }

    #[test]
    fn test_inferred_signature_with_caller_and_refs() {
        let callback =
            |_caller: &mut Caller<'_>, f: Option<Func>| -> (i32, Option<ExternRef>) {
                (f.map_or(0, |_| 1), None)
            };
        let ty = reflected_signature(&callback);
        assert_eq!(ty.params(), &[ValKind::FuncRef]);
        assert_eq!(ty.results(), &[ValKind::I32, ValKind::ExternRef]);
    }

    #[test]
    fn test_inferred_fallible_results() {
        let callback = || -> Result<i64, Abort> { Ok(3) };
        let ty = reflected_signature(&callback);
        assert_eq!(ty.params(), &[] as &[ValKind]);
        assert_eq!(ty.results(), &[ValKind::I64]);
    }

    #[test]
    fn test_entry_caches_inferred_kinds() {
        let callback = |x: f32| -> f32 { x * 2.0 };
        let entry = IntoReflected::<(f32,), f32>::into_entry(callback);
        assert_eq!(entry.params(), &[ValKind::F32]);
        assert_eq!(entry.results(), &[ValKind::F32]);
    }
}
