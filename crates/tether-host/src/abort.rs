//! Abort and operation-error objects exchanged with the engine.
//!
//! Both types own a heap allocation whose raw pointer is what actually
//! crosses the boundary. Ownership transfer is explicit and single-use:
//! `into_raw` hands the allocation to the engine, `from_raw` takes it back,
//! and `close` releases it early. `Drop` is the finalizer-backed fallback
//! and is never the only release path.

use tether_abi::{RawAbort, RawOpError};

/// Origin code of an engine-synthesized abort.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCode {
    /// The execution stack was exhausted.
    StackOverflow = 0,
    /// Out-of-bounds linear memory access.
    MemoryOutOfBounds,
    /// Atomic operation on a misaligned address.
    HeapMisaligned,
    /// Out-of-bounds table access.
    TableOutOfBounds,
    /// Indirect call through a null table entry.
    IndirectCallToNull,
    /// Signature mismatch on an indirect call.
    BadSignature,
    /// Integer arithmetic overflowed.
    IntegerOverflow,
    /// Integer division by zero.
    IntegerDivisionByZero,
    /// Float-to-integer conversion failed.
    BadConversionToInteger,
    /// Unreachable code was reached.
    UnreachableCodeReached,
    /// Execution was interrupted from outside.
    Interrupt,
    /// The configured fuel budget ran out.
    OutOfFuel,
}

#[derive(Debug)]
struct AbortRepr {
    message: String,
    code: Option<AbortCode>,
}

/// Abnormal termination of a sandboxed execution.
///
/// An `Abort` is produced either by a host closure that wants to stop the
/// sandboxed caller, or by the engine itself (trapped instruction,
/// interrupt). It is distinct from [`OpError`], which reports recoverable
/// API failures.
#[derive(Debug)]
pub struct Abort {
    repr: Option<Box<AbortRepr>>,
}

impl Abort {
    /// Create an abort with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Abort {
            repr: Some(Box::new(AbortRepr {
                message: message.into(),
                code: None,
            })),
        }
    }

    /// Create an abort carrying an engine origin code.
    pub fn with_code(message: impl Into<String>, code: AbortCode) -> Self {
        Abort {
            repr: Some(Box::new(AbortRepr {
                message: message.into(),
                code: Some(code),
            })),
        }
    }

    /// The generic abort that stands in for a captured host fault; the
    /// real fault payload travels through the pending-fault slot instead.
    pub(crate) fn host_fault() -> Self {
        Abort::new("host callback panicked")
    }

    /// The abort message. Panics if the object was already consumed.
    pub fn message(&self) -> &str {
        &self.live("message").message
    }

    /// The engine origin code, if any. Panics if already consumed.
    pub fn code(&self) -> Option<AbortCode> {
        self.live("code").code
    }

    /// Whether ownership has already moved across the boundary.
    pub fn is_consumed(&self) -> bool {
        self.repr.is_none()
    }

    /// Release the allocation now instead of at drop. Idempotent.
    pub fn close(&mut self) {
        self.repr = None;
    }

    /// Hand the allocation to the engine, returning the raw pointer the
    /// trampoline ABI expects.
    ///
    /// Panics if this abort was already consumed or closed: returning one
    /// abort object twice is a logic defect, and inside a trampoline the
    /// resulting unwind aborts the process rather than corrupting the
    /// engine's frames.
    pub fn into_raw(mut self) -> *mut RawAbort {
        match self.repr.take() {
            Some(repr) => Box::into_raw(repr) as *mut RawAbort,
            None => panic!("abort object returned after it was already consumed"),
        }
    }

    /// Take ownership of an abort the engine handed back.
    ///
    /// # Safety
    ///
    /// `raw` must be a non-null pointer previously produced by
    /// [`Abort::into_raw`] and not reclaimed since.
    pub unsafe fn from_raw(raw: *mut RawAbort) -> Self {
        Abort {
            repr: Some(unsafe { Box::from_raw(raw as *mut AbortRepr) }),
        }
    }

    fn live(&self, what: &str) -> &AbortRepr {
        self.repr
            .as_deref()
            .unwrap_or_else(|| panic!("read {what} of an abort that was already consumed"))
    }
}

impl std::fmt::Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Some(repr) => f.write_str(&repr.message),
            None => f.write_str("(consumed abort)"),
        }
    }
}

impl std::error::Error for Abort {}

#[derive(Debug)]
struct OpErrorRepr {
    message: String,
}

/// A recoverable failure reported by an engine API call.
///
/// Always surfaced to the host as a value, never as a panic; shares the
/// explicit-ownership lifecycle of [`Abort`].
#[derive(Debug)]
pub struct OpError {
    repr: Option<Box<OpErrorRepr>>,
}

impl OpError {
    /// Create an operation error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        OpError {
            repr: Some(Box::new(OpErrorRepr {
                message: message.into(),
            })),
        }
    }

    /// The error message. Panics if the object was already consumed.
    pub fn message(&self) -> &str {
        match &self.repr {
            Some(repr) => &repr.message,
            None => panic!("read message of an error that was already consumed"),
        }
    }

    /// Release the allocation now instead of at drop. Idempotent.
    pub fn close(&mut self) {
        self.repr = None;
    }

    /// Hand the allocation across the boundary. Panics on double use.
    pub fn into_raw(mut self) -> *mut RawOpError {
        match self.repr.take() {
            Some(repr) => Box::into_raw(repr) as *mut RawOpError,
            None => panic!("error object returned after it was already consumed"),
        }
    }

    /// Take ownership of an error object the engine handed back.
    ///
    /// # Safety
    ///
    /// `raw` must be a non-null pointer previously produced by
    /// [`OpError::into_raw`] and not reclaimed since.
    pub unsafe fn from_raw(raw: *mut RawOpError) -> Self {
        OpError {
            repr: Some(unsafe { Box::from_raw(raw as *mut OpErrorRepr) }),
        }
    }
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Some(repr) => f.write_str(&repr.message),
            None => f.write_str("(consumed error)"),
        }
    }
}

impl std::error::Error for OpError {}

/// Failure outcome of a host-initiated engine call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The sandboxed execution aborted.
    #[error("execution aborted: {0}")]
    Abort(Abort),

    /// The engine API call itself failed.
    #[error(transparent)]
    Op(#[from] OpError),
}
