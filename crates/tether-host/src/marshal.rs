//! Conversion between engine value records and host tagged values.
//!
//! Numeric kinds copy bits. Function references copy the identifier word.
//! Opaque references box the host value through the global registry on
//! encode and look the handle back up on decode; the boxed entry stays
//! alive until the engine's matching `unroot` arrives, so encode/unroot
//! must pair one-to-one or the entry leaks.

use tether_abi::{RawVal, ValKind};

use crate::store;
use crate::value::{Func, Val};

/// Decode a value record into a tagged value.
///
/// A record with an unknown kind byte is a corrupted boundary and panics;
/// the engine only ever sends the six kinds it was compiled against.
pub fn decode(raw: &RawVal) -> Val {
    let kind = raw
        .kind()
        .unwrap_or_else(|err| panic!("value record from engine is corrupt: {err}"));
    match kind {
        ValKind::I32 => Val::I32(raw.as_i32().unwrap()),
        ValKind::I64 => Val::I64(raw.as_i64().unwrap()),
        ValKind::F32 => Val::F32(raw.as_f32().unwrap()),
        ValKind::F64 => Val::F64(raw.as_f64().unwrap()),
        ValKind::FuncRef => Val::FuncRef(Func::from_raw(raw.func_bits().unwrap())),
        ValKind::ExternRef => {
            let bits = raw.extern_bits().unwrap();
            if bits == 0 {
                Val::ExternRef(None)
            } else {
                Val::ExternRef(Some(store::opaque_entry(bits as usize - 1)))
            }
        }
    }
}

/// Encode a tagged value into a record slot owned by context `ctx`.
///
/// A non-null opaque reference is rooted in the global registry here; the
/// entry is released by the matching [`unroot`] once the engine has
/// consumed the record.
pub fn encode(val: &Val, slot: &mut RawVal, ctx: u32) {
    *slot = match val {
        Val::I32(v) => RawVal::i32(*v, ctx),
        Val::I64(v) => RawVal::i64(*v, ctx),
        Val::F32(v) => RawVal::f32(*v, ctx),
        Val::F64(v) => RawVal::f64(*v, ctx),
        Val::FuncRef(f) => RawVal::func_ref(f.map_or(0, Func::to_raw), ctx),
        Val::ExternRef(None) => RawVal::extern_ref(0, ctx),
        Val::ExternRef(Some(value)) => RawVal::extern_ref(store::root_opaque(value), ctx),
    };
}

/// Drop the engine's reference to whatever `raw` carries.
///
/// For opaque references this releases the boxed registry entry; for every
/// other kind there is nothing to release. Must be called exactly once per
/// encoded record the engine is done reading.
pub fn unroot(raw: &RawVal) {
    if let Some(bits) = raw.extern_bits() {
        if bits != 0 {
            store::unroot_opaque(bits as usize - 1);
        }
    }
}

/// Decode a record and release the engine's reference in one step.
pub fn take(raw: &RawVal) -> Val {
    let val = decode(raw);
    unroot(raw);
    val
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ExternRef;

    const CTX: u32 = 1;

    fn round_trip(val: Val) -> Val {
        let mut slot = RawVal::zeroed();
        encode(&val, &mut slot, CTX);
        take(&slot)
    }

    #[test]
    fn test_numeric_round_trips() {
        assert_eq!(round_trip(Val::I32(-7)), Val::I32(-7));
        assert_eq!(round_trip(Val::I64(1 << 40)), Val::I64(1 << 40));
        assert_eq!(round_trip(Val::F32(0.5)), Val::F32(0.5));
        assert_eq!(round_trip(Val::F64(-2.25)), Val::F64(-2.25));
    }

    #[test]
    fn test_func_ref_round_trip() {
        assert_eq!(round_trip(Val::FuncRef(None)), Val::FuncRef(None));
        let func = Func::from_raw(99).unwrap();
        assert_eq!(round_trip(Val::FuncRef(Some(func))), Val::FuncRef(Some(func)));
    }

    #[test]
    fn test_extern_ref_round_trip_and_unroot() {
        let value = ExternRef::new(vec![1u8, 2, 3]);
        let mut slot = RawVal::zeroed();
        encode(&Val::ExternRef(Some(value.clone())), &mut slot, CTX);

        let handle = slot.extern_bits().unwrap() as usize - 1;
        assert!(store::global_contains(handle));

        let decoded = decode(&slot);
        let recovered = decoded.as_extern_ref().unwrap().unwrap();
        assert!(recovered.ptr_eq(&value));
        assert_eq!(recovered.downcast_ref::<Vec<u8>>().unwrap(), &[1, 2, 3]);

        // The entry stays rooted until the engine signals it is done.
        assert!(store::global_contains(handle));
        unroot(&slot);
        assert!(!store::global_contains(handle));
    }

    #[test]
    fn test_null_extern_ref_stays_null() {
        let mut slot = RawVal::zeroed();
        encode(&Val::ExternRef(None), &mut slot, CTX);
        assert_eq!(slot.extern_bits(), Some(0));
        assert_eq!(take(&slot), Val::ExternRef(None));
    }

    #[test]
    fn test_each_encode_roots_once() {
        let value = ExternRef::new(7i32);
        let mut first = RawVal::zeroed();
        let mut second = RawVal::zeroed();
        encode(&Val::ExternRef(Some(value.clone())), &mut first, CTX);
        encode(&Val::ExternRef(Some(value)), &mut second, CTX);

        // Two encodes of the same host value are two independent roots.
        assert_ne!(first.extern_bits(), second.extern_bits());
        unroot(&first);
        let handle = second.extern_bits().unwrap() as usize - 1;
        assert!(store::global_contains(handle));
        unroot(&second);
        assert!(!store::global_contains(handle));
    }
}
