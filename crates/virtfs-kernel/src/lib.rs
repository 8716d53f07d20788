//! # virtfs-kernel
//!
//! Bridges a provider-callback filesystem interface onto a virtio-fs
//! device speaking FUSE.
//!
//! The framework's dispatcher calls into [`VirtFs`] through
//! [`FileSystemContext`]. Each callback becomes one or more FUSE round
//! trips over a [`Transport`], and the replies are translated back into
//! provider metadata, security descriptors and directory listings.
//!
//! ## Design Decisions
//!
//! - **One exchange at a time.** [`Channel`] serializes send/receive pairs
//!   so replies always match the request just sent. Callbacks themselves
//!   may run concurrently.
//! - **Typestate file contexts.** A [`FileContext`] only exists once the
//!   remote has handed out both a node id and a handle.
//! - **Errors are values until the boundary.** Everything returns
//!   [`FsResult`]; [`FsError::ntstatus`] is the single translation point to
//!   provider status codes.
//! - **Loopback server.** With the `loopback` feature, [`loopback::MemoryServer`]
//!   answers FUSE requests from an in-memory tree for tests and probes.

pub mod attr;
pub mod context;
pub mod dirbuffer;
pub mod error;
pub mod fs;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod path;
pub mod provider;
pub mod readdir;
pub mod security;
pub mod transport;

pub use attr::FileInfo;
pub use context::{FileContext, FileHandle, NodeId, NodeKind};
pub use dirbuffer::{DirBuffer, DirInfo};
pub use error::{ErrorKind, FsError, FsResult, NtStatus};
pub use fs::{FILE_SYSTEM_NAME, Owner, VirtFs, VirtFsOptions};
pub use provider::{
    CleanupFlags, CreateOptions, DirMarker, Dispatcher, FileSecurity, FileSystemContext, GrantedAccess,
    SecurityInformation, VolumeInfo, VolumeParams,
};
pub use security::{PermissionMapper, Permissions, PosixDescriptorMapper, SecurityDescriptor};
pub use transport::{Channel, LengthPolicy, Transport};
