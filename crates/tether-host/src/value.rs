//! Host-side tagged values and the reference types that cross the boundary.

use std::any::Any;
use std::sync::Arc;

pub use tether_abi::ValKind;

/// Identifier of an engine function, copyable by value.
///
/// The engine encodes function references as a single non-zero identifier
/// word inside a value record; the all-zero word is the null reference and
/// is represented on the host side as `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Func(u64);

impl Func {
    /// Wrap a raw identifier word; zero is the null reference.
    pub fn from_raw(id: u64) -> Option<Func> {
        if id == 0 {
            None
        } else {
            Some(Func(id))
        }
    }

    /// The raw identifier word.
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

/// An opaque reference to an arbitrary host value.
///
/// The engine never looks inside one of these; it only stores and echoes
/// the handle the marshaler boxes it under. Cloning shares the underlying
/// value.
#[derive(Clone)]
pub struct ExternRef(Arc<dyn Any + Send + Sync>);

impl ExternRef {
    /// Box a host value for the foreign side.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        ExternRef(Arc::new(value))
    }

    /// Borrow the boxed value as `T`, if it has that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Whether two references share one boxed value.
    pub fn ptr_eq(&self, other: &ExternRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ExternRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl std::fmt::Debug for ExternRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExternRef({:p})", Arc::as_ptr(&self.0))
    }
}

/// A tagged value as seen by host closures.
///
/// Exactly one variant is active; reading a different variant through the
/// `as_*` accessors yields `None`, which callers treat as a type-mismatch
/// contract violation.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Nullable reference to an engine function
    FuncRef(Option<Func>),
    /// Nullable reference to a boxed host value
    ExternRef(Option<ExternRef>),
}

impl Val {
    /// The kind tag of the active variant.
    pub fn kind(&self) -> ValKind {
        match self {
            Val::I32(_) => ValKind::I32,
            Val::I64(_) => ValKind::I64,
            Val::F32(_) => ValKind::F32,
            Val::F64(_) => ValKind::F64,
            Val::FuncRef(_) => ValKind::FuncRef,
            Val::ExternRef(_) => ValKind::ExternRef,
        }
    }

    /// The integer if this is an `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Val::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer if this is an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// The float if this is an `f32`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Val::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// The float if this is an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// The (nullable) function reference if this is a `funcref`.
    pub fn as_func_ref(&self) -> Option<Option<Func>> {
        match self {
            Val::FuncRef(f) => Some(*f),
            _ => None,
        }
    }

    /// The (nullable) opaque reference if this is an `externref`.
    pub fn as_extern_ref(&self) -> Option<Option<&ExternRef>> {
        match self {
            Val::ExternRef(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Parameter and result kinds of a callback, as declared at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    params: Vec<ValKind>,
    results: Vec<ValKind>,
}

impl FuncType {
    /// Build a signature from parameter and result kinds.
    pub fn new(params: impl Into<Vec<ValKind>>, results: impl Into<Vec<ValKind>>) -> Self {
        FuncType {
            params: params.into(),
            results: results.into(),
        }
    }

    /// Declared parameter kinds, in order.
    pub fn params(&self) -> &[ValKind] {
        &self.params
    }

    /// Declared result kinds, in order.
    pub fn results(&self) -> &[ValKind] {
        &self.results
    }

    pub(crate) fn into_results(self) -> Vec<ValKind> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_each_variant() {
        assert_eq!(Val::I32(0).kind(), ValKind::I32);
        assert_eq!(Val::I64(0).kind(), ValKind::I64);
        assert_eq!(Val::F32(0.0).kind(), ValKind::F32);
        assert_eq!(Val::F64(0.0).kind(), ValKind::F64);
        assert_eq!(Val::FuncRef(None).kind(), ValKind::FuncRef);
        assert_eq!(Val::ExternRef(None).kind(), ValKind::ExternRef);
    }

    #[test]
    fn test_accessor_mismatch_is_none() {
        let val = Val::I32(9);
        assert_eq!(val.as_i32(), Some(9));
        assert_eq!(val.as_i64(), None);
        assert_eq!(val.as_f64(), None);
        assert_eq!(val.as_func_ref(), None);
    }

    #[test]
    fn test_null_func_from_raw() {
        assert_eq!(Func::from_raw(0), None);
        let func = Func::from_raw(17).unwrap();
        assert_eq!(func.to_raw(), 17);
    }

    #[test]
    fn test_extern_ref_identity() {
        let a = ExternRef::new(String::from("payload"));
        let b = a.clone();
        let c = ExternRef::new(String::from("payload"));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.downcast_ref::<String>().unwrap(), "payload");
        assert!(a.downcast_ref::<i32>().is_none());
    }
}
