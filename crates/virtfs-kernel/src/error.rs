//! Error taxonomy and status translation.
//!
//! Remote failures arrive as negative errno values and leave the bridge
//! as provider status codes. [`ErrorKind`] is the closed set in between;
//! [`FsError`] adds the local failure classes (transport, resources,
//! path conversion) and the provider's negotiation outcomes.

use std::fmt;
use std::io;

use strum::Display;
use thiserror::Error;
use virtfs_wire::{Opcode, WireError};

/// Provider status code (an NTSTATUS value).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: Self = Self(0);
    pub const BUFFER_OVERFLOW: Self = Self(0x8000_0005_u32 as i32);
    pub const UNSUCCESSFUL: Self = Self(0xC000_0001_u32 as i32);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D_u32 as i32);
    pub const INVALID_DEVICE_REQUEST: Self = Self(0xC000_0010_u32 as i32);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022_u32 as i32);
    pub const BUFFER_TOO_SMALL: Self = Self(0xC000_0023_u32 as i32);
    pub const OBJECT_NAME_INVALID: Self = Self(0xC000_0033_u32 as i32);
    pub const OBJECT_NAME_NOT_FOUND: Self = Self(0xC000_0034_u32 as i32);
    pub const INSUFFICIENT_RESOURCES: Self = Self(0xC000_009A_u32 as i32);
    pub const INVALID_NETWORK_RESPONSE: Self = Self(0xC000_00C3_u32 as i32);
    pub const UNEXPECTED_IO_ERROR: Self = Self(0xC000_00E9_u32 as i32);
    pub const DIRECTORY_NOT_EMPTY: Self = Self(0xC000_0101_u32 as i32);
    pub const IO_DEVICE_ERROR: Self = Self(0xC000_0185_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({:#010X})", self.0 as u32)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0 as u32)
    }
}

/// Local classification of a remote errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    IoDeviceError,
    InvalidHandle,
    InvalidArgument,
    Failure,
}

impl ErrorKind {
    const EPERM: i32 = 1;
    const ENOENT: i32 = 2;
    const EIO: i32 = 5;
    const EBADF: i32 = 9;
    const EINVAL: i32 = 22;

    /// Maps a wire result code. The sign is ignored; any errno outside the
    /// table is a generic failure.
    pub fn from_errno(code: i32) -> Self {
        match code.unsigned_abs() as i32 {
            Self::EPERM => Self::PermissionDenied,
            Self::ENOENT => Self::NotFound,
            Self::EIO => Self::IoDeviceError,
            Self::EBADF => Self::InvalidHandle,
            Self::EINVAL => Self::InvalidArgument,
            _ => Self::Failure,
        }
    }

    pub fn ntstatus(self) -> NtStatus {
        match self {
            Self::PermissionDenied => NtStatus::ACCESS_DENIED,
            Self::NotFound => NtStatus::OBJECT_NAME_NOT_FOUND,
            Self::IoDeviceError => NtStatus::IO_DEVICE_ERROR,
            Self::InvalidHandle => NtStatus::OBJECT_NAME_INVALID,
            Self::InvalidArgument => NtStatus::INVALID_PARAMETER,
            Self::Failure => NtStatus::UNSUCCESSFUL,
        }
    }
}

/// Bridge error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// The remote answered with a negative result code.
    #[error("{opcode} failed: errno {errno} ({kind})")]
    Protocol {
        opcode: Opcode,
        errno: i32,
        kind: ErrorKind,
    },

    /// The send/receive primitive itself failed.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// A reply could not be decoded.
    #[error("malformed response: {0}")]
    Wire(#[from] WireError),

    /// A reply decoded but carried an unusable value.
    #[error("invalid reply to {opcode}: {reason}")]
    InvalidReply { opcode: Opcode, reason: &'static str },

    /// Local allocation failed.
    #[error("out of resources: {0}")]
    Resource(String),

    /// A path could not be converted between encodings.
    #[error("invalid path: {0}")]
    PathConversion(String),

    #[error("directory not empty")]
    DirectoryNotEmpty,

    /// Caller buffer too small; `required` bytes are needed.
    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    /// Caller buffer too small for a descriptor probe.
    #[error("buffer overflow: {required} bytes required")]
    BufferOverflow { required: usize },

    #[error("request not supported by this device")]
    InvalidDeviceRequest,

    /// A directory marker names no entry of the listing.
    #[error("directory marker {0:?} not in listing")]
    UnknownMarker(String),

    /// The permission mapper rejected a descriptor or mode.
    #[error("security mapping failed: {0}")]
    Security(String),
}

impl FsError {
    pub fn protocol(opcode: Opcode, errno: i32) -> Self {
        Self::Protocol {
            opcode,
            errno,
            kind: ErrorKind::from_errno(errno),
        }
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn path_conversion(msg: impl Into<String>) -> Self {
        Self::PathConversion(msg.into())
    }

    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Remote error kind, if this is a protocol failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Status reported to the provider framework.
    pub fn ntstatus(&self) -> NtStatus {
        match self {
            Self::Protocol { kind, .. } => kind.ntstatus(),
            Self::Transport(_) => NtStatus::UNEXPECTED_IO_ERROR,
            Self::Wire(WireError::Allocation(_)) => NtStatus::INSUFFICIENT_RESOURCES,
            Self::Wire(WireError::InteriorNul) => NtStatus::OBJECT_NAME_INVALID,
            Self::Wire(WireError::TooLarge(_)) => NtStatus::INVALID_PARAMETER,
            Self::Wire(_) | Self::InvalidReply { .. } => NtStatus::INVALID_NETWORK_RESPONSE,
            Self::Resource(_) => NtStatus::INSUFFICIENT_RESOURCES,
            Self::PathConversion(_) => NtStatus::OBJECT_NAME_INVALID,
            Self::DirectoryNotEmpty => NtStatus::DIRECTORY_NOT_EMPTY,
            Self::BufferTooSmall { .. } => NtStatus::BUFFER_TOO_SMALL,
            Self::BufferOverflow { .. } => NtStatus::BUFFER_OVERFLOW,
            Self::InvalidDeviceRequest => NtStatus::INVALID_DEVICE_REQUEST,
            Self::UnknownMarker(_) => NtStatus::INVALID_PARAMETER,
            Self::Security(_) => NtStatus::INVALID_PARAMETER,
        }
    }
}

/// Bridge result type.
pub type FsResult<T> = Result<T, FsError>;
