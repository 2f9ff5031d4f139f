//! ABI-stable records exchanged with the sandboxed engine.
//!
//! Everything in this crate crosses the C calling convention boundary
//! bit-for-bit: the tagged value record ([`RawVal`]), the value-kind
//! discriminants ([`ValKind`]), and the opaque pointer types the engine
//! hands back and forth ([`RawContext`], [`RawAbort`], [`RawOpError`]).
//! The host-side machinery that gives these records meaning lives in
//! `tether-host`; this crate has no behavior beyond reading and writing
//! the fixed layouts.

#![warn(missing_docs)]

// ============================================================================
// Value kinds
// ============================================================================

/// Discriminant byte of a [`RawVal`], using the engine's native encoding.
///
/// The numeric kinds are consecutive from zero; the reference kinds sit in
/// the high range the engine reserves for them. These values are part of
/// the wire ABI and must never be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValKind {
    /// 32-bit signed integer
    I32 = 0,
    /// 64-bit signed integer
    I64 = 1,
    /// 32-bit IEEE 754 float
    F32 = 2,
    /// 64-bit IEEE 754 float
    F64 = 3,
    /// Reference to an engine function; the zero identifier is null
    FuncRef = 128,
    /// Opaque reference to a boxed host value; the zero handle is null
    ExternRef = 129,
}

/// A kind byte that does not name any of the six value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown value kind byte: {0}")]
pub struct UnknownKind(
    /// The unrecognized discriminant byte.
    pub u8,
);

impl ValKind {
    /// Decode a kind discriminant byte.
    pub fn from_u8(byte: u8) -> Result<Self, UnknownKind> {
        match byte {
            0 => Ok(ValKind::I32),
            1 => Ok(ValKind::I64),
            2 => Ok(ValKind::F32),
            3 => Ok(ValKind::F64),
            128 => Ok(ValKind::FuncRef),
            129 => Ok(ValKind::ExternRef),
            other => Err(UnknownKind(other)),
        }
    }

    /// Short lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ValKind::I32 => "i32",
            ValKind::I64 => "i64",
            ValKind::F32 => "f32",
            ValKind::F64 => "f64",
            ValKind::FuncRef => "funcref",
            ValKind::ExternRef => "externref",
        }
    }
}

// ============================================================================
// Value records
// ============================================================================

/// The 8-byte payload union of a [`RawVal`].
///
/// Which field is live is governed entirely by the record's kind byte.
/// `bits` views the payload as raw storage for zeroing and debugging.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawValPayload {
    /// Live when the kind is [`ValKind::I32`]
    pub i32: i32,
    /// Live when the kind is [`ValKind::I64`]
    pub i64: i64,
    /// Live when the kind is [`ValKind::F32`]
    pub f32: f32,
    /// Live when the kind is [`ValKind::F64`]
    pub f64: f64,
    /// Live when the kind is [`ValKind::FuncRef`]; zero means null
    pub func: u64,
    /// Live when the kind is [`ValKind::ExternRef`]; zero means null,
    /// otherwise a global-registry handle offset by one
    pub opaque: u64,
    /// Raw view of the payload storage
    pub bits: u64,
}

/// One tagged value record, 24 bytes, matching the engine ABI bit-for-bit.
///
/// Layout: kind discriminant (1 byte), 7 bytes padding, 8-byte payload
/// union, 4-byte owning-context identifier, 4 bytes padding. Argument and
/// result buffers passed to trampolines are dense arrays of these.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVal {
    kind: u8,
    _pad0: [u8; 7],
    payload: RawValPayload,
    ctx: u32,
    _pad1: [u8; 4],
}

impl RawVal {
    /// An all-zero record. Decodes as a null `i32`-kinded zero; useful for
    /// pre-filling result buffers.
    pub fn zeroed() -> Self {
        RawVal {
            kind: 0,
            _pad0: [0; 7],
            payload: RawValPayload { bits: 0 },
            ctx: 0,
            _pad1: [0; 4],
        }
    }

    fn with(kind: ValKind, payload: RawValPayload, ctx: u32) -> Self {
        RawVal {
            kind: kind as u8,
            _pad0: [0; 7],
            payload,
            ctx,
            _pad1: [0; 4],
        }
    }

    /// Build an `i32` record.
    pub fn i32(value: i32, ctx: u32) -> Self {
        let mut payload = RawValPayload { bits: 0 };
        payload.i32 = value;
        Self::with(ValKind::I32, payload, ctx)
    }

    /// Build an `i64` record.
    pub fn i64(value: i64, ctx: u32) -> Self {
        Self::with(ValKind::I64, RawValPayload { i64: value }, ctx)
    }

    /// Build an `f32` record.
    pub fn f32(value: f32, ctx: u32) -> Self {
        let mut payload = RawValPayload { bits: 0 };
        payload.f32 = value;
        Self::with(ValKind::F32, payload, ctx)
    }

    /// Build an `f64` record.
    pub fn f64(value: f64, ctx: u32) -> Self {
        Self::with(ValKind::F64, RawValPayload { f64: value }, ctx)
    }

    /// Build a `funcref` record from an engine function identifier.
    /// Pass zero for the null reference.
    pub fn func_ref(id: u64, ctx: u32) -> Self {
        Self::with(ValKind::FuncRef, RawValPayload { func: id }, ctx)
    }

    /// Build an `externref` record from an offset global-registry handle.
    /// Pass zero for the null reference.
    pub fn extern_ref(handle: u64, ctx: u32) -> Self {
        Self::with(ValKind::ExternRef, RawValPayload { opaque: handle }, ctx)
    }

    /// Decode the kind byte.
    pub fn kind(&self) -> Result<ValKind, UnknownKind> {
        ValKind::from_u8(self.kind)
    }

    /// Owning-context identifier stamped into this record.
    pub fn ctx(&self) -> u32 {
        self.ctx
    }

    /// Payload as `i32`, if that is the live kind.
    pub fn as_i32(&self) -> Option<i32> {
        (self.kind == ValKind::I32 as u8).then(|| unsafe { self.payload.i32 })
    }

    /// Payload as `i64`, if that is the live kind.
    pub fn as_i64(&self) -> Option<i64> {
        (self.kind == ValKind::I64 as u8).then(|| unsafe { self.payload.i64 })
    }

    /// Payload as `f32`, if that is the live kind.
    pub fn as_f32(&self) -> Option<f32> {
        (self.kind == ValKind::F32 as u8).then(|| unsafe { self.payload.f32 })
    }

    /// Payload as `f64`, if that is the live kind.
    pub fn as_f64(&self) -> Option<f64> {
        (self.kind == ValKind::F64 as u8).then(|| unsafe { self.payload.f64 })
    }

    /// Function identifier, if the live kind is `funcref`.
    pub fn func_bits(&self) -> Option<u64> {
        (self.kind == ValKind::FuncRef as u8).then(|| unsafe { self.payload.func })
    }

    /// Offset opaque-reference handle, if the live kind is `externref`.
    pub fn extern_bits(&self) -> Option<u64> {
        (self.kind == ValKind::ExternRef as u8).then(|| unsafe { self.payload.opaque })
    }

    /// Raw payload storage, regardless of kind.
    pub fn payload_bits(&self) -> u64 {
        unsafe { self.payload.bits }
    }
}

impl std::fmt::Debug for RawVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Ok(kind) => write!(
                f,
                "RawVal({} bits={:#x} ctx={})",
                kind.name(),
                self.payload_bits(),
                self.ctx
            ),
            Err(_) => write!(f, "RawVal(kind={} bits={:#x})", self.kind, self.payload_bits()),
        }
    }
}

// ============================================================================
// Opaque engine objects
// ============================================================================

/// Opaque execution-context record. The engine supplies a pointer to one of
/// these on every trampoline call; only `tether-host` knows the layout.
#[repr(C)]
pub struct RawContext {
    _private: [u8; 0],
}

/// Opaque abort object returned by a trampoline (null on success) and by
/// engine calls that terminate abnormally.
#[repr(C)]
pub struct RawAbort {
    _private: [u8; 0],
}

/// Opaque operation-error object returned by fallible engine API calls.
#[repr(C)]
pub struct RawOpError {
    _private: [u8; 0],
}

// ============================================================================
// Calling conventions
// ============================================================================

/// The native callback target handed to the engine at function-creation
/// time. `env` is the opaque entry handle supplied at registration; `args`
/// points at `nargs` records and `results` at `nresults` uninitialized
/// slots. A null return means success; a non-null return transfers
/// ownership of an abort object to the engine.
pub type TrampolineFn = unsafe extern "C" fn(
    ctx: *mut RawContext,
    env: usize,
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
) -> *mut RawAbort;

/// Finalizer the engine invokes when a context's user data is dropped.
/// `env` carries the context's registry handle as a pointer-sized integer.
pub type FinalizerFn = unsafe extern "C" fn(env: *mut std::ffi::c_void);

// ============================================================================
// Tests
// ============================================================================
