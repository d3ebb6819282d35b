//! Error kinds surfaced by the lifecycle engine.
//!
//! The hypercall ABI returns a signed integer, non-negative on success; [`HvError`] carries the
//! `Display` message for the logging facility and converts to that ABI via [`From`].

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HvError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument")]
    Invalid,
    #[error("no such cell")]
    NotFound,
    #[error("cell already exists")]
    Exists,
    #[error("requested cpu set is busy")]
    Busy,
    #[error("configuration too big for the temporary mapping window")]
    TooBig,
    #[error("out of memory")]
    OutOfMemory,
}

impl HvError {
    /// The ABI encodes every error as a small negative integer, mirroring the hypercall
    /// convention of `-errno`.
    const fn abi_code(self) -> i64 {
        match self {
            HvError::PermissionDenied => -1,
            HvError::Invalid => -2,
            HvError::NotFound => -3,
            HvError::Exists => -4,
            HvError::Busy => -5,
            HvError::TooBig => -6,
            HvError::OutOfMemory => -7,
        }
    }
}

impl From<HvError> for i64 {
    fn from(value: HvError) -> Self {
        value.abi_code()
    }
}

pub type HvResult<T> = Result<T, HvError>;
