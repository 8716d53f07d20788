//! Per-open file state.
//!
//! A file object moves through `Unbound → Bound → Opened → Closed`. The
//! first two states are transient values inside Create/Open; only an
//! opened [`FileContext`] is ever handed to the framework, so every later
//! callback sees a real node id and handle.
//!
//! Closing is guarded: [`FileContext::begin_release`] succeeds once, so the
//! remote handle is released exactly once however the close path is
//! reached.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;
use virtfs_wire::Opcode;

use crate::dirbuffer::DirBuffer;
use crate::error::{FsError, FsResult};

/// Remote node identifier. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(virtfs_wire::ROOT_ID);

    /// Validates a node id taken from a reply to `opcode`.
    pub fn from_reply(opcode: Opcode, raw: u64) -> FsResult<Self> {
        if raw == 0 {
            return Err(FsError::InvalidReply { opcode, reason: "node id 0" });
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Remote open-file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(u64);

impl FileHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn from_mode(mode: u32) -> Self {
        if mode & virtfs_wire::abi::S_IFMT == virtfs_wire::abi::S_IFDIR {
            Self::Directory
        } else {
            Self::File
        }
    }

    /// Opcode that opens a node of this kind.
    pub fn open_opcode(self) -> Opcode {
        match self {
            Self::File => Opcode::Open,
            Self::Directory => Opcode::Opendir,
        }
    }

    /// Opcode that releases a handle of this kind.
    pub fn release_opcode(self) -> Opcode {
        match self {
            Self::File => Opcode::Release,
            Self::Directory => Opcode::Releasedir,
        }
    }

    /// Opcode that removes a node of this kind.
    pub fn remove_opcode(self) -> Opcode {
        match self {
            Self::File => Opcode::Unlink,
            Self::Directory => Opcode::Rmdir,
        }
    }
}

/// A file object with no remote identity yet.
#[derive(Debug, Default)]
pub struct Unbound {
    dir_capacity: usize,
}

impl Unbound {
    pub fn new(dir_capacity: usize) -> Self {
        Self { dir_capacity }
    }

    pub fn bind(self, node_id: NodeId, kind: NodeKind) -> Bound {
        Bound {
            node_id,
            kind,
            dir_capacity: self.dir_capacity,
        }
    }
}

/// A file object resolved to a node but not yet opened.
#[derive(Debug)]
pub struct Bound {
    node_id: NodeId,
    kind: NodeKind,
    dir_capacity: usize,
}

impl Bound {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn open(self, handle: FileHandle) -> FileContext {
        FileContext {
            node_id: self.node_id,
            handle,
            kind: self.kind,
            dir_buffer: OnceLock::new(),
            dir_capacity: self.dir_capacity,
            released: AtomicBool::new(false),
        }
    }
}

/// State the framework keeps for one open file object.
#[derive(Debug)]
pub struct FileContext {
    node_id: NodeId,
    handle: FileHandle,
    kind: NodeKind,
    dir_buffer: OnceLock<DirBuffer>,
    dir_capacity: usize,
    released: AtomicBool,
}

impl FileContext {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// The enumeration buffer, allocated on first use.
    pub fn dir_buffer(&self) -> &DirBuffer {
        self.dir_buffer.get_or_init(|| DirBuffer::new(self.dir_capacity))
    }

    pub fn has_dir_buffer(&self) -> bool {
        self.dir_buffer.get().is_some()
    }

    /// Claims the right to release the remote handle. Returns true once.
    pub fn begin_release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for FileContext {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(
                nodeid = self.node_id.get(),
                fh = self.handle.get(),
                "file context dropped without release"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(kind: NodeKind) -> FileContext {
        Unbound::new(4096)
            .bind(NodeId::from_reply(Opcode::Lookup, 7).unwrap(), kind)
            .open(FileHandle::new(3))
    }

    #[test]
    fn test_zero_node_id_rejected() {
        let err = NodeId::from_reply(Opcode::Create, 0).unwrap_err();
        assert!(matches!(err, FsError::InvalidReply { opcode: Opcode::Create, .. }));
    }

    #[test]
    fn test_lifecycle_carries_identity() {
        let ctx = opened(NodeKind::File);
        assert_eq!(ctx.node_id().get(), 7);
        assert_eq!(ctx.handle().get(), 3);
        assert!(!ctx.is_directory());
        assert!(ctx.begin_release());
    }

    #[test]
    fn test_release_claimed_once() {
        let ctx = opened(NodeKind::Directory);
        assert!(ctx.begin_release());
        assert!(!ctx.begin_release());
        assert!(ctx.is_released());
    }

    #[test]
    fn test_dir_buffer_is_lazy() {
        let ctx = opened(NodeKind::Directory);
        assert!(!ctx.has_dir_buffer());
        let _ = ctx.dir_buffer();
        assert!(ctx.has_dir_buffer());
        ctx.begin_release();
    }

    #[test]
    fn test_kind_opcodes() {
        assert_eq!(NodeKind::from_mode(0o040755), NodeKind::Directory);
        assert_eq!(NodeKind::from_mode(0o100644), NodeKind::File);
        assert_eq!(NodeKind::Directory.release_opcode(), Opcode::Releasedir);
        assert_eq!(NodeKind::File.remove_opcode(), Opcode::Unlink);
        assert_eq!(NodeKind::Directory.open_opcode(), Opcode::Opendir);
    }
}
