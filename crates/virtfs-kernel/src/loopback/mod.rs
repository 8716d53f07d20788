//! In-process FUSE server over an in-memory tree.
//!
//! [`MemoryServer`] implements [`Transport`] by decoding each request,
//! applying it to a [`tree::MemoryTree`], and encoding the reply the way a
//! virtio-fs device would. It records every request it sees and can be
//! told to fail chosen opcodes, which makes it the harness for exercising
//! the bridge without a device.

mod tree;

use std::collections::HashMap;
use std::io;
use std::mem::size_of;

use bytemuck::{Pod, bytes_of, pod_read_unaligned};
use parking_lot::Mutex;
use tracing::trace;
use virtfs_wire::abi::{
    self, AttrOut, CreateIn, CreateOut, EntryOut, GetattrIn, InHeader, InitIn, InitOut, MkdirIn,
    OpenIn, OpenOut, OutHeader, ReadIn, ReleaseIn, RenameIn, S_IFDIR, S_IFMT, SetattrIn, StatfsOut, WriteIn,
    WriteOut,
};
use virtfs_wire::{Opcode, ROOT_ID, SetattrValid, push_direntplus};

use crate::transport::Transport;
use tree::{Errno, MemoryTree};

/// errno values the server replies with.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const EACCES: i32 = 13;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const ENOTEMPTY: i32 = 39;
}

use errno::{EBADF, EINVAL, EISDIR, ENOSYS, ENOTDIR};

const MAX_WRITE: u32 = 1024 * 1024;
const FIRST_HANDLE: u64 = 0x10;

/// A request as the server received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub header: InHeader,
    body: Vec<u8>,
}

impl RecordedRequest {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_repr(self.header.opcode)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The leading argument record. Panics when the body is too short.
    pub fn arg<T: Pod>(&self) -> T {
        pod_read_unaligned(&self.body[..size_of::<T>()])
    }

    /// NUL-terminated names following a `skip`-byte argument record.
    pub fn names(&self, skip: usize) -> Vec<String> {
        let mut rest = self.body.get(skip..).unwrap_or_default();
        let mut names = Vec::new();
        while let Some(end) = rest.iter().position(|&b| b == 0) {
            names.push(String::from_utf8_lossy(&rest[..end]).into_owned());
            rest = &rest[end + 1..];
        }
        names
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenHandle {
    ino: u64,
    flags: u32,
    directory: bool,
}

#[derive(Debug, Clone, Copy)]
struct Statfs {
    blocks: u64,
    bfree: u64,
    bavail: u64,
}

#[derive(Debug)]
struct State {
    tree: MemoryTree,
    handles: HashMap<u64, OpenHandle>,
    next_handle: u64,
    log: Vec<RecordedRequest>,
    faults: HashMap<Opcode, i32>,
    disconnected: bool,
    extra_declared: u32,
    readdir_limit: Option<usize>,
    statfs: Statfs,
}

/// Loopback FUSE server.
#[derive(Debug)]
pub struct MemoryServer {
    state: Mutex<State>,
    label: Option<String>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl MemoryServer {
    /// A server whose root directory is owned by `uid:gid`.
    pub fn new(root_uid: u32, root_gid: u32) -> Self {
        Self {
            state: Mutex::new(State {
                tree: MemoryTree::new(root_uid, root_gid),
                handles: HashMap::new(),
                next_handle: FIRST_HANDLE,
                log: Vec::new(),
                faults: HashMap::new(),
                disconnected: false,
                extra_declared: 0,
                readdir_limit: None,
                statfs: Statfs {
                    blocks: 1024,
                    bfree: 512,
                    bavail: 256,
                },
            }),
            label: None,
        }
    }

    /// Reports `label` as the device's volume label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the block counts STATFS reports (block size is 4096).
    pub fn set_statfs(&self, blocks: u64, bfree: u64, bavail: u64) {
        self.state.lock().statfs = Statfs { blocks, bfree, bavail };
    }

    /// Caps the entries returned per READDIRPLUS reply.
    pub fn set_readdir_limit(&self, entries: Option<usize>) {
        self.state.lock().readdir_limit = entries;
    }

    /// Fails every `opcode` request with `errno` until [`heal`](Self::heal).
    pub fn fail(&self, opcode: Opcode, errno: i32) {
        self.state.lock().faults.insert(opcode, errno);
    }

    pub fn heal(&self, opcode: Opcode) {
        self.state.lock().faults.remove(&opcode);
    }

    /// Makes the exchange itself fail, as if the device went away.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.lock().disconnected = disconnected;
    }

    /// Inflates every reply's declared length by `extra` bytes.
    pub fn set_extra_declared(&self, extra: u32) {
        self.state.lock().extra_declared = extra;
    }

    pub fn add_dir(&self, path: &str, mode: u32) -> Result<u64, i32> {
        self.state.lock().tree.insert(ROOT_ID, path, S_IFDIR | (mode & 0o7777), 0, 0)
    }

    pub fn add_file(&self, path: &str, mode: u32, data: &[u8]) -> Result<u64, i32> {
        let mut state = self.state.lock();
        let ino = state.tree.insert(ROOT_ID, path, abi::S_IFREG | (mode & 0o7777), 0, 0)?;
        state.tree.write(ino, 0, data)?;
        Ok(ino)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().tree.resolve(ROOT_ID, path).is_ok()
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let ino = state.tree.resolve(ROOT_ID, path).ok()?;
        state.tree.file_data(ino).ok().map(<[u8]>::to_vec)
    }

    /// Full mode (type and permission bits) of `path`.
    pub fn mode(&self, path: &str) -> Option<u32> {
        let state = self.state.lock();
        let ino = state.tree.resolve(ROOT_ID, path).ok()?;
        state.tree.get(ino).ok().map(|n| n.attr.mode)
    }

    pub fn owner(&self, path: &str) -> Option<(u32, u32)> {
        let state = self.state.lock();
        let ino = state.tree.resolve(ROOT_ID, path).ok()?;
        state.tree.get(ino).ok().map(|n| (n.attr.uid, n.attr.gid))
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().tree.len()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().log.clone()
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        self.state.lock().log.iter().filter_map(RecordedRequest::opcode).collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().log.clear();
    }
}

impl Transport for MemoryServer {
    fn exchange(&self, request: &[u8], response: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
        }
        let header_len = size_of::<InHeader>();
        if request.len() < header_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request shorter than header"));
        }
        let header: InHeader = pod_read_unaligned(&request[..header_len]);
        let end = (header.len as usize).clamp(header_len, request.len());
        let body = &request[header_len..end];
        state.log.push(RecordedRequest {
            header,
            body: body.to_vec(),
        });

        let result = match Opcode::from_repr(header.opcode) {
            None => Err(ENOSYS),
            Some(opcode) => match state.faults.get(&opcode).copied() {
                Some(errno) => Err(errno),
                None => state.dispatch(opcode, &header, body),
            },
        };
        trace!(opcode = header.opcode, unique = header.unique, ok = result.is_ok(), "loopback request");

        let (error, payload) = match result {
            Ok(payload) => (0, payload),
            Err(errno) => (-errno, Vec::new()),
        };
        let out = OutHeader {
            len: (size_of::<OutHeader>() + payload.len()) as u32 + state.extra_declared,
            error,
            unique: header.unique,
        };

        let mut reply = bytes_of(&out).to_vec();
        reply.extend_from_slice(&payload);
        let n = reply.len().min(response.len());
        response[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn volume_label(&self) -> io::Result<String> {
        self.label
            .clone()
            .ok_or_else(|| io::Error::from(io::ErrorKind::Unsupported))
    }
}

fn split_arg<T: Pod>(body: &[u8]) -> Result<(T, &[u8]), Errno> {
    let size = size_of::<T>();
    if body.len() < size {
        return Err(EINVAL);
    }
    Ok((pod_read_unaligned(&body[..size]), &body[size..]))
}

fn take_name(body: &[u8]) -> Result<(&str, &[u8]), Errno> {
    let end = body.iter().position(|&b| b == 0).ok_or(EINVAL)?;
    let name = std::str::from_utf8(&body[..end]).map_err(|_| EINVAL)?;
    Ok((name, &body[end + 1..]))
}

impl State {
    fn dispatch(&mut self, opcode: Opcode, header: &InHeader, body: &[u8]) -> Result<Vec<u8>, Errno> {
        let nodeid = header.nodeid;
        match opcode {
            Opcode::Init => {
                let (init, _) = split_arg::<InitIn>(body)?;
                let out = InitOut {
                    major: abi::KERNEL_VERSION,
                    minor: abi::KERNEL_MINOR_VERSION.min(init.minor),
                    max_readahead: init.max_readahead,
                    flags: init.flags & abi::FUSE_DO_READDIRPLUS,
                    max_write: MAX_WRITE,
                    ..Default::default()
                };
                Ok(bytes_of(&out).to_vec())
            }
            Opcode::Lookup => {
                let (name, _) = take_name(body)?;
                let ino = self.tree.resolve(nodeid, name)?;
                self.entry(ino)
            }
            Opcode::Getattr => {
                let (getattr, _) = split_arg::<GetattrIn>(body)?;
                if getattr.getattr_flags & abi::FUSE_GETATTR_FH != 0 {
                    self.handle(getattr.fh)?;
                }
                self.attr(nodeid)
            }
            Opcode::Setattr => {
                let (setattr, _) = split_arg::<SetattrIn>(body)?;
                self.setattr(nodeid, &setattr)?;
                self.attr(nodeid)
            }
            Opcode::Mkdir => {
                let (mkdir, rest) = split_arg::<MkdirIn>(body)?;
                let (name, _) = take_name(rest)?;
                let mode = S_IFDIR | (mkdir.mode & !mkdir.umask & 0o7777);
                let ino = self.tree.insert(nodeid, name, mode, header.uid, header.gid)?;
                self.entry(ino)
            }
            Opcode::Create => {
                let (create, rest) = split_arg::<CreateIn>(body)?;
                let (name, _) = take_name(rest)?;
                let mode = abi::S_IFREG | (create.mode & !create.umask & 0o7777);
                let ino = self.tree.insert(nodeid, name, mode, header.uid, header.gid)?;
                let entry = self.entry_out(ino)?;
                let fh = self.open(ino, create.flags, false);
                let out = CreateOut {
                    entry,
                    open: OpenOut { fh, ..Default::default() },
                };
                Ok(bytes_of(&out).to_vec())
            }
            Opcode::Unlink | Opcode::Rmdir => {
                let (name, _) = take_name(body)?;
                self.tree.remove(nodeid, name, opcode == Opcode::Rmdir)?;
                Ok(Vec::new())
            }
            Opcode::Rename => {
                let (rename, rest) = split_arg::<RenameIn>(body)?;
                let (old, rest) = take_name(rest)?;
                let (new, _) = take_name(rest)?;
                self.tree.rename(nodeid, old, rename.newdir, new)?;
                Ok(Vec::new())
            }
            Opcode::Open | Opcode::Opendir => {
                let (open, _) = split_arg::<OpenIn>(body)?;
                let directory = self.tree.get(nodeid)?.attr.mode & S_IFMT == S_IFDIR;
                match (opcode, directory) {
                    (Opcode::Open, true) => return Err(EISDIR),
                    (Opcode::Opendir, false) => return Err(ENOTDIR),
                    _ => {}
                }
                let fh = self.open(nodeid, open.flags, directory);
                Ok(bytes_of(&OpenOut { fh, ..Default::default() }).to_vec())
            }
            Opcode::Read => {
                let (read, _) = split_arg::<ReadIn>(body)?;
                let handle = self.handle(read.fh)?;
                self.tree.read(handle.ino, read.offset, read.size)
            }
            Opcode::Write => {
                let (write, data) = split_arg::<WriteIn>(body)?;
                let handle = self.handle(write.fh)?;
                let data = data.get(..write.size as usize).ok_or(EINVAL)?;
                let offset = if handle.flags & abi::O_APPEND != 0 {
                    self.tree.get(handle.ino)?.attr.size
                } else {
                    write.offset
                };
                let size = self.tree.write(handle.ino, offset, data)?;
                Ok(bytes_of(&WriteOut { size, padding: 0 }).to_vec())
            }
            Opcode::Flush => {
                let (flush, _) = split_arg::<abi::FlushIn>(body)?;
                self.handle(flush.fh)?;
                Ok(Vec::new())
            }
            Opcode::Release | Opcode::Releasedir => {
                let (release, _) = split_arg::<ReleaseIn>(body)?;
                self.handles.remove(&release.fh).ok_or(EBADF)?;
                Ok(Vec::new())
            }
            Opcode::Statfs => {
                let out = StatfsOut {
                    blocks: self.statfs.blocks,
                    bfree: self.statfs.bfree,
                    bavail: self.statfs.bavail,
                    files: self.tree.len() as u64,
                    bsize: 4096,
                    namelen: 255,
                    frsize: 4096,
                    ..Default::default()
                };
                Ok(bytes_of(&out).to_vec())
            }
            Opcode::Readdirplus => {
                let (read, _) = split_arg::<ReadIn>(body)?;
                let handle = self.handle(read.fh)?;
                if !handle.directory || handle.ino != nodeid {
                    return Err(EBADF);
                }
                self.readdirplus(nodeid, read.offset, read.size as usize)
            }
        }
    }

    fn handle(&self, fh: u64) -> Result<OpenHandle, Errno> {
        self.handles.get(&fh).copied().ok_or(EBADF)
    }

    fn open(&mut self, ino: u64, flags: u32, directory: bool) -> u64 {
        let fh = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(fh, OpenHandle { ino, flags, directory });
        fh
    }

    fn entry_out(&self, ino: u64) -> Result<EntryOut, Errno> {
        Ok(EntryOut {
            nodeid: ino,
            attr: self.tree.get(ino)?.attr,
            entry_valid: 1,
            attr_valid: 1,
            ..Default::default()
        })
    }

    fn entry(&self, ino: u64) -> Result<Vec<u8>, Errno> {
        Ok(bytes_of(&self.entry_out(ino)?).to_vec())
    }

    fn attr(&self, ino: u64) -> Result<Vec<u8>, Errno> {
        let out = AttrOut {
            attr_valid: 1,
            attr: self.tree.get(ino)?.attr,
            ..Default::default()
        };
        Ok(bytes_of(&out).to_vec())
    }

    fn setattr(&mut self, ino: u64, setattr: &SetattrIn) -> Result<(), Errno> {
        let valid = SetattrValid::from_bits_truncate(setattr.valid);
        if valid.contains(SetattrValid::FH) {
            self.handle(setattr.fh)?;
        }
        if valid.contains(SetattrValid::SIZE) {
            self.tree.truncate(ino, setattr.size)?;
        }
        let attr = &mut self.tree.get_mut(ino)?.attr;
        if valid.contains(SetattrValid::MODE) {
            attr.mode = (attr.mode & S_IFMT) | (setattr.mode & 0o7777);
        }
        if valid.contains(SetattrValid::ATIME) {
            attr.atime = setattr.atime;
            attr.atimensec = setattr.atimensec;
        }
        if valid.contains(SetattrValid::MTIME) {
            attr.mtime = setattr.mtime;
            attr.mtimensec = setattr.mtimensec;
        }
        if valid.contains(SetattrValid::CTIME) {
            attr.ctime = setattr.ctime;
            attr.ctimensec = setattr.ctimensec;
        }
        Ok(())
    }

    /// Lists `.`, `..`, then children in creation order. Offsets are
    /// 1-based positions in that sequence.
    fn readdirplus(&self, dir: u64, offset: u64, size: usize) -> Result<Vec<u8>, Errno> {
        let node = self.tree.get(dir)?;
        let mut listing = vec![(".".to_string(), dir), ("..".to_string(), node.parent)];
        for &child in self.tree.children(dir)? {
            listing.push((self.tree.get(child)?.name.clone(), child));
        }

        let limit = self.readdir_limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        let mut count = 0;
        for (position, (name, ino)) in listing.iter().enumerate().skip(offset as usize) {
            if count == limit || out.len() + abi::direntplus_size(name.len()) > size {
                break;
            }
            let entry = self.entry_out(*ino)?;
            let entry_type = (entry.attr.mode & S_IFMT) >> 12;
            push_direntplus(&mut out, &entry, position as u64 + 1, entry_type, name.as_bytes())
                .map_err(|_| errno::EINVAL)?;
            count += 1;
        }
        Ok(out)
    }
}
