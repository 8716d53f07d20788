//! Codec errors.

use thiserror::Error;

/// Errors raised while encoding requests or decoding responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("response truncated: {received} bytes, header needs {needed}")]
    Truncated { received: usize, needed: usize },

    #[error("payload too short for {record}: {available} of {needed} bytes")]
    ShortPayload {
        record: &'static str,
        available: usize,
        needed: usize,
    },

    #[error("directory entry at {offset} overruns payload ({needed} > {remaining})")]
    EntryOverrun {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("name contains an interior NUL byte")]
    InteriorNul,

    #[error("request of {0} bytes exceeds the 32-bit length field")]
    TooLarge(usize),

    #[error("could not allocate {0} bytes for a message buffer")]
    Allocation(usize),
}

impl WireError {
    pub fn short_payload<T>(available: usize) -> Self {
        let full = std::any::type_name::<T>();
        let record = full.rsplit("::").next().unwrap_or(full);
        Self::ShortPayload {
            record,
            available,
            needed: std::mem::size_of::<T>(),
        }
    }
}

pub type WireResult<T> = Result<T, WireError>;
