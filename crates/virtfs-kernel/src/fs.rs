//! Provider adapter: every framework callback expressed as FUSE requests.
//!
//! [`VirtFs`] owns the transport channel and the volume-wide state. Each
//! callback resolves paths against the root node, issues one or more
//! round trips, and translates replies back into provider metadata.
//!
//! ## Design Decisions
//!
//! - **Paths, not parents.** Names are sent as full relative paths against
//!   the root node, matching how the remote resolves them. Rename uses the
//!   root as its destination directory for the same reason.
//! - **Owner identity is set once.** The root's owner is captured during
//!   [`VirtFs::connect`], before the volume is registered, and only
//!   CREATE and MKDIR carry it. Every other request has uid/gid zero.
//! - **Release is fire-and-forget.** A failed RELEASE is logged, never
//!   surfaced, and the context is freed regardless.

use std::mem::size_of;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use virtfs_wire::abi::{
    self, Attr, AttrOut, CreateIn, CreateOut, EntryOut, FlushIn, GetattrIn, InitIn, InitOut, MkdirIn,
    OpenIn, OpenOut, ReleaseIn, RenameIn, SetattrIn, StatfsOut, WriteIn, WriteOut,
};
use virtfs_wire::{Credentials, Opcode, ROOT_ID, Request, SetattrValid, WireError};
use widestring::{U16CStr, U16String};

use crate::attr::{FileInfo, attributes_from_mode, file_info_from_attr, filetime_to_unix};
use crate::context::{FileContext, FileHandle, NodeId, NodeKind, Unbound};
use crate::dirbuffer::DEFAULT_CAPACITY;
use crate::error::{FsError, FsResult};
use crate::path::to_wire;
use crate::provider::{
    CleanupFlags, CreateOptions, DirMarker, FileSecurity, FileSystemContext, GrantedAccess,
    SecurityInformation, VolumeInfo, VolumeParams,
};
use crate::readdir::{DEFAULT_BUDGET, DirectoryEnumerator, FillOutcome};
use crate::security::{PermissionMapper, Permissions, PosixDescriptorMapper};
use crate::transport::{Channel, LengthPolicy, Transport};

/// Name the volume registers under.
pub const FILE_SYSTEM_NAME: &str = "VirtIO-FS";

/// Sector size reported at registration; also the READDIRPLUS budget.
pub const ALLOCATION_UNIT: u16 = 4096;

/// A uid/gid pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Tunables for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtFsOptions {
    /// Identity used when mapping modes to security descriptors.
    pub local_owner: Owner,
    pub length_policy: LengthPolicy,
    /// Bytes requested per READDIRPLUS round.
    pub readdir_budget: u32,
    /// Byte capacity of each directory's enumeration buffer.
    pub dir_buffer_capacity: usize,
    /// Probe directories for entries in CanDelete instead of refusing.
    pub check_directory_empty: bool,
    /// Label used when the device does not report one.
    pub default_volume_label: String,
    pub volume_prefix: Option<String>,
}

impl Default for VirtFsOptions {
    fn default() -> Self {
        Self {
            local_owner: Owner { uid: 197609, gid: 197121 },
            length_policy: LengthPolicy::default(),
            readdir_budget: DEFAULT_BUDGET,
            dir_buffer_capacity: DEFAULT_CAPACITY,
            check_directory_empty: false,
            default_volume_label: "VirtFS".to_string(),
            volume_prefix: None,
        }
    }
}

/// Process-lifetime volume state.
#[derive(Debug, Default)]
pub struct VolumeState {
    owner: OnceLock<Owner>,
    init: OnceLock<InitOut>,
}

impl VolumeState {
    /// Remote owner of the volume root.
    pub fn owner(&self) -> Option<Owner> {
        self.owner.get().copied()
    }

    /// Negotiated INIT parameters.
    pub fn init(&self) -> Option<&InitOut> {
        self.init.get()
    }
}

pub struct VirtFs<T> {
    channel: Channel<T>,
    state: VolumeState,
    mapper: Arc<dyn PermissionMapper>,
    options: VirtFsOptions,
}

impl<T: Transport> VirtFs<T> {
    /// Negotiates the protocol and captures the root's owner.
    pub fn connect(transport: T, options: VirtFsOptions) -> FsResult<Self> {
        Self::connect_with_mapper(transport, options, Arc::new(PosixDescriptorMapper))
    }

    pub fn connect_with_mapper(
        transport: T,
        options: VirtFsOptions,
        mapper: Arc<dyn PermissionMapper>,
    ) -> FsResult<Self> {
        let fs = Self {
            channel: Channel::new(transport, options.length_policy),
            state: VolumeState::default(),
            mapper,
            options,
        };
        fs.init()?;

        let root = fs.lookup_name(".")?;
        let owner = Owner { uid: root.attr.uid, gid: root.attr.gid };
        if fs.state.owner.set(owner).is_err() {
            warn!("volume owner already captured");
        }
        info!(uid = owner.uid, gid = owner.gid, "captured volume owner");
        Ok(fs)
    }

    fn init(&self) -> FsResult<()> {
        let init_in = InitIn {
            major: abi::KERNEL_VERSION,
            minor: abi::KERNEL_MINOR_VERSION,
            max_readahead: 0,
            flags: abi::FUSE_DO_READDIRPLUS,
        };
        let request = self.request(Opcode::Init, ROOT_ID).arg(&init_in);
        let reply = self.channel.call(&request, size_of::<InitOut>())?;
        let init_out: InitOut = reply.response()?.read_prefix();

        info!(
            major = init_out.major,
            minor = init_out.minor,
            max_write = init_out.max_write,
            flags = format_args!("{:#x}", init_out.flags),
            "protocol negotiated"
        );
        if init_out.flags & abi::FUSE_DO_READDIRPLUS == 0 {
            warn!("remote did not acknowledge READDIRPLUS");
        }
        let _ = self.state.init.set(init_out);
        Ok(())
    }

    /// Registration parameters for the framework.
    pub fn volume_params(&self) -> VolumeParams {
        let mut params = VolumeParams::new();
        params
            .sector_size(ALLOCATION_UNIT)
            .sectors_per_allocation_unit(1)
            .file_info_timeout(1000)
            .case_sensitive_search(true)
            .case_preserved_names(true)
            .unicode_on_disk(true)
            .persistent_acls(true)
            .post_cleanup_when_modified_only(true)
            .flush_and_purge_on_cleanup(true)
            .filesystem_name(FILE_SYSTEM_NAME);
        if let Some(prefix) = &self.options.volume_prefix {
            params.prefix(prefix.clone());
        }
        params
    }

    pub fn state(&self) -> &VolumeState {
        &self.state
    }

    pub fn options(&self) -> &VirtFsOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    fn request(&self, opcode: Opcode, nodeid: u64) -> Request<'static> {
        self.channel.request(opcode, nodeid)
    }

    /// Credentials for requests that create nodes.
    fn owner_credentials(&self) -> Credentials {
        let owner = self.state.owner().unwrap_or_default();
        Credentials {
            uid: owner.uid,
            gid: owner.gid,
            pid: std::process::id(),
        }
    }

    fn lookup_name(&self, name: &str) -> FsResult<EntryOut> {
        let request = self.request(Opcode::Lookup, ROOT_ID).name(name)?;
        let reply = self.channel.call(&request, size_of::<EntryOut>())?;
        let entry: EntryOut = reply.response()?.read()?;
        debug!(name, nodeid = entry.nodeid, mode = format_args!("{:o}", entry.attr.mode), "lookup");
        Ok(entry)
    }

    fn lookup(&self, path: &U16CStr) -> FsResult<EntryOut> {
        self.lookup_name(&to_wire(path.as_ustr())?)
    }

    fn getattr(&self, ctx: &FileContext) -> FsResult<Attr> {
        let fh = ctx.handle().get();
        let getattr_in = GetattrIn {
            getattr_flags: if fh != 0 { abi::FUSE_GETATTR_FH } else { 0 },
            dummy: 0,
            fh,
        };
        let request = self.request(Opcode::Getattr, ctx.node_id().get()).arg(&getattr_in);
        let reply = self.channel.call(&request, size_of::<AttrOut>())?;
        let out: AttrOut = reply.response()?.read()?;
        Ok(out.attr)
    }

    fn setattr(&self, ctx: &FileContext, setattr_in: &SetattrIn) -> FsResult<()> {
        let request = self.request(Opcode::Setattr, ctx.node_id().get()).arg(setattr_in);
        self.channel.call(&request, size_of::<AttrOut>())?;
        Ok(())
    }

    fn refresh(&self, ctx: &FileContext, file_info: &mut FileInfo) -> FsResult<()> {
        let attr = self.getattr(ctx)?;
        *file_info = file_info_from_attr(&attr);
        Ok(())
    }

    fn descriptor_for(&self, mode: u32) -> FsResult<crate::security::SecurityDescriptor> {
        let owner = self.options.local_owner;
        self.mapper.permissions_to_descriptor(Permissions {
            uid: owner.uid,
            gid: owner.gid,
            mode,
        })
    }

    fn open_handle(&self, opcode: Opcode, node_id: NodeId, flags: u32) -> FsResult<FileHandle> {
        let request = self.request(opcode, node_id.get()).arg(&OpenIn { flags, unused: 0 });
        let reply = self.channel.call(&request, size_of::<OpenOut>())?;
        let out: OpenOut = reply.response()?.read()?;
        Ok(FileHandle::new(out.fh))
    }

    /// Releases the context's remote handle once. Failures are logged.
    fn release(&self, ctx: &FileContext) {
        if !ctx.begin_release() {
            return;
        }
        let release_in = ReleaseIn {
            fh: ctx.handle().get(),
            ..Default::default()
        };
        let opcode = ctx.kind().release_opcode();
        let request = self.request(opcode, ctx.node_id().get()).arg(&release_in);
        if let Err(e) = self.channel.call(&request, 0) {
            warn!(%opcode, nodeid = ctx.node_id().get(), fh = ctx.handle().get(), error = %e, "release failed");
        }
    }

    fn create_directory(&self, unbound: Unbound, name: &str, mode: u32, access: GrantedAccess) -> FsResult<(FileContext, Attr)> {
        let request = self
            .request(Opcode::Mkdir, ROOT_ID)
            .with_credentials(self.owner_credentials())
            .arg(&MkdirIn { mode, umask: 0 })
            .name(name)?;
        let reply = self.channel.call(&request, size_of::<EntryOut>())?;
        let entry: EntryOut = reply.response()?.read()?;

        let bound = unbound.bind(NodeId::from_reply(Opcode::Mkdir, entry.nodeid)?, NodeKind::Directory);
        let flags = open_flags(access) | abi::O_DIRECTORY;
        let handle = self.open_handle(Opcode::Opendir, bound.node_id(), flags)?;
        Ok((bound.open(handle), entry.attr))
    }

    fn create_file(&self, unbound: Unbound, name: &str, mode: u32, access: GrantedAccess) -> FsResult<(FileContext, Attr)> {
        let create_in = CreateIn {
            flags: open_flags(access),
            mode,
            umask: 0,
            padding: 0,
        };
        let request = self
            .request(Opcode::Create, ROOT_ID)
            .with_credentials(self.owner_credentials())
            .arg(&create_in)
            .name(name)?;
        let reply = self.channel.call(&request, size_of::<CreateOut>())?;
        let out: CreateOut = reply.response()?.read()?;

        let node_id = NodeId::from_reply(Opcode::Create, out.entry.nodeid)?;
        let ctx = unbound
            .bind(node_id, NodeKind::File)
            .open(FileHandle::new(out.open.fh));
        Ok((ctx, out.entry.attr))
    }
}

/// Maps granted access to POSIX open flags.
pub fn open_flags(access: GrantedAccess) -> u32 {
    let read = access.contains(GrantedAccess::READ_DATA);
    let write = access.contains(GrantedAccess::WRITE_DATA);
    let mut flags = match (read, write) {
        (false, true) => abi::O_WRONLY,
        (true, true) => abi::O_RDWR,
        _ => abi::O_RDONLY,
    };
    if access.contains(GrantedAccess::APPEND_DATA) {
        flags |= abi::O_APPEND;
    }
    flags
}

const PERMISSION_BITS: u32 = 0o7777;
/// Mode used when a supplied descriptor cannot be mapped.
const FALLBACK_MODE: u32 = 0o600;

impl<T: Transport> FileSystemContext for VirtFs<T> {
    type FileContext = FileContext;

    fn get_volume_info(&self, out_volume_info: &mut VolumeInfo) -> FsResult<()> {
        let label = match self.transport().volume_label() {
            Ok(label) => label,
            Err(e) => {
                debug!(error = %e, "device has no volume label");
                self.options.default_volume_label.clone()
            }
        };

        let request = self.request(Opcode::Statfs, ROOT_ID);
        let reply = self.channel.call(&request, size_of::<StatfsOut>())?;
        let st: StatfsOut = reply.response()?.read()?;

        let bsize = u64::from(st.bsize);
        out_volume_info.total_size = bsize.saturating_mul(st.blocks);
        out_volume_info.free_size = bsize.saturating_mul(st.bavail);
        out_volume_info.volume_label = U16String::from_str(&label);
        Ok(())
    }

    fn set_volume_label(&self, _volume_label: &U16CStr, _out_volume_info: &mut VolumeInfo) -> FsResult<()> {
        Err(FsError::InvalidDeviceRequest)
    }

    fn get_security_by_name(
        &self,
        file_name: &U16CStr,
        security_descriptor: Option<&mut [u8]>,
    ) -> FsResult<FileSecurity> {
        let entry = self.lookup(file_name)?;
        let descriptor = self.descriptor_for(entry.attr.mode)?;
        let required = descriptor.len();

        if let Some(buf) = security_descriptor {
            if buf.len() < required {
                return Err(FsError::BufferOverflow { required });
            }
            buf[..required].copy_from_slice(descriptor.as_bytes());
        }

        Ok(FileSecurity {
            attributes: attributes_from_mode(entry.attr.mode),
            sz_security_descriptor: required as u64,
        })
    }

    fn create(
        &self,
        file_name: &U16CStr,
        create_options: CreateOptions,
        granted_access: GrantedAccess,
        file_attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
        file_info: &mut FileInfo,
    ) -> FsResult<Self::FileContext> {
        let name = to_wire(file_name.as_ustr())?;
        debug!(
            name,
            options = ?create_options,
            access = ?granted_access,
            attributes = format_args!("{file_attributes:#x}"),
            allocation_size,
            "create"
        );

        let mode = match security_descriptor {
            None => 0,
            Some(sd) => match self.mapper.descriptor_to_permissions(sd) {
                Ok(perms) => perms.mode & PERMISSION_BITS,
                Err(e) => {
                    debug!(error = %e, "unmappable descriptor, using owner read/write");
                    FALLBACK_MODE
                }
            },
        };

        let unbound = Unbound::new(self.options.dir_buffer_capacity);
        let (ctx, attr) = if create_options.contains(CreateOptions::DIRECTORY_FILE) {
            self.create_directory(unbound, &name, mode, granted_access)?
        } else {
            self.create_file(unbound, &name, mode, granted_access)?
        };

        *file_info = file_info_from_attr(&attr);
        Ok(ctx)
    }

    fn open(
        &self,
        file_name: &U16CStr,
        create_options: CreateOptions,
        granted_access: GrantedAccess,
        file_info: &mut FileInfo,
    ) -> FsResult<Self::FileContext> {
        let entry = self.lookup(file_name)?;
        let kind = NodeKind::from_mode(entry.attr.mode);
        let bound = Unbound::new(self.options.dir_buffer_capacity)
            .bind(NodeId::from_reply(Opcode::Lookup, entry.nodeid)?, kind);

        let mut flags = open_flags(granted_access);
        if kind == NodeKind::Directory {
            flags |= abi::O_DIRECTORY;
        }
        debug!(nodeid = entry.nodeid, ?kind, options = ?create_options, flags = format_args!("{flags:#o}"), "open");

        let handle = self.open_handle(kind.open_opcode(), bound.node_id(), flags)?;
        let ctx = bound.open(handle);
        *file_info = file_info_from_attr(&entry.attr);
        Ok(ctx)
    }

    fn overwrite(
        &self,
        context: &Self::FileContext,
        file_attributes: u32,
        replace_file_attributes: bool,
        allocation_size: u64,
        file_info: &mut FileInfo,
    ) -> FsResult<()> {
        let mut attributes = file_attributes;
        if !replace_file_attributes {
            let current = self.getattr(context)?;
            attributes |= attributes_from_mode(current.mode);
        }
        // TODO: truncate to allocation_size and apply `attributes` once the
        // remote's truncate-on-overwrite behavior is pinned down.
        debug!(
            nodeid = context.node_id().get(),
            attributes = format_args!("{attributes:#x}"),
            allocation_size,
            "overwrite refreshes metadata only"
        );
        self.refresh(context, file_info)
    }

    fn cleanup(&self, context: &Self::FileContext, file_name: Option<&U16CStr>, flags: CleanupFlags) {
        let Some(file_name) = file_name else {
            return;
        };

        if !flags.contains(CleanupFlags::DELETE) {
            if !flags.is_empty() {
                debug!(?flags, "cleanup attribute updates not applied");
            }
            return;
        }

        let name = match to_wire(file_name.as_ustr()) {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "cannot delete, path not convertible");
                return;
            }
        };
        let opcode = context.kind().remove_opcode();
        let result = self
            .request(opcode, ROOT_ID)
            .name(&name)
            .map_err(FsError::from)
            .and_then(|request| self.channel.call(&request, 0));
        if let Err(e) = result {
            warn!(%opcode, name, error = %e, "delete on cleanup failed");
        }
    }

    fn close(&self, context: Self::FileContext) {
        debug!(
            nodeid = context.node_id().get(),
            fh = context.handle().get(),
            dir_buffer = context.has_dir_buffer(),
            "close"
        );
        self.release(&context);
    }

    fn read(&self, context: &Self::FileContext, buffer: &mut [u8], offset: u64) -> FsResult<u32> {
        let size = u32::try_from(buffer.len()).map_err(|_| WireError::TooLarge(buffer.len()))?;
        let read_in = abi::ReadIn {
            fh: context.handle().get(),
            offset,
            size,
            ..Default::default()
        };
        let request = self.request(Opcode::Read, context.node_id().get()).arg(&read_in);
        let reply = self.channel.call(&request, buffer.len())?;
        let response = reply.response()?;

        let data = response.payload();
        let n = data.len().min(buffer.len());
        buffer[..n].copy_from_slice(&data[..n]);
        Ok(n as u32)
    }

    fn write(
        &self,
        context: &Self::FileContext,
        buffer: &[u8],
        offset: u64,
        write_to_eof: bool,
        constrained_io: bool,
        file_info: &mut FileInfo,
    ) -> FsResult<u32> {
        let mut offset = offset;
        let mut data = buffer;

        if constrained_io {
            let attr = self.getattr(context)?;
            if offset >= attr.size {
                *file_info = file_info_from_attr(&attr);
                return Ok(0);
            }
            let room = attr.size - offset;
            if data.len() as u64 > room {
                data = &data[..room as usize];
            }
        } else if write_to_eof {
            offset = self.getattr(context)?.size;
        }

        let size = u32::try_from(data.len()).map_err(|_| WireError::TooLarge(data.len()))?;
        let write_in = WriteIn {
            fh: context.handle().get(),
            offset,
            size,
            ..Default::default()
        };
        let request = self
            .request(Opcode::Write, context.node_id().get())
            .arg(&write_in)
            .data(data);
        let reply = self.channel.call(&request, size_of::<WriteOut>())?;
        let out: WriteOut = reply.response()?.read()?;

        self.refresh(context, file_info)?;
        Ok(out.size)
    }

    fn flush(&self, context: Option<&Self::FileContext>, file_info: &mut FileInfo) -> FsResult<()> {
        let Some(context) = context else {
            return Ok(());
        };
        let flush_in = FlushIn {
            fh: context.handle().get(),
            ..Default::default()
        };
        let request = self.request(Opcode::Flush, context.node_id().get()).arg(&flush_in);
        self.channel.call(&request, 0)?;
        self.refresh(context, file_info)
    }

    fn get_file_info(&self, context: &Self::FileContext, file_info: &mut FileInfo) -> FsResult<()> {
        self.refresh(context, file_info)
    }

    fn set_basic_info(
        &self,
        context: &Self::FileContext,
        file_attributes: u32,
        creation_time: u64,
        last_access_time: u64,
        last_write_time: u64,
        change_time: u64,
        file_info: &mut FileInfo,
    ) -> FsResult<()> {
        let mut valid = SetattrValid::FH;
        let mut setattr_in = SetattrIn {
            fh: context.handle().get(),
            ..Default::default()
        };
        if last_access_time != 0 {
            valid |= SetattrValid::ATIME;
            (setattr_in.atime, setattr_in.atimensec) = filetime_to_unix(last_access_time);
        }
        if last_write_time != 0 {
            valid |= SetattrValid::MTIME;
            (setattr_in.mtime, setattr_in.mtimensec) = filetime_to_unix(last_write_time);
        }
        if change_time != 0 {
            valid |= SetattrValid::CTIME;
            (setattr_in.ctime, setattr_in.ctimensec) = filetime_to_unix(change_time);
        }
        setattr_in.valid = valid.bits();
        debug!(
            nodeid = context.node_id().get(),
            ?valid,
            attributes = format_args!("{file_attributes:#x}"),
            creation_time,
            "set basic info"
        );

        self.setattr(context, &setattr_in)?;
        self.refresh(context, file_info)
    }

    fn set_file_size(
        &self,
        context: &Self::FileContext,
        new_size: u64,
        set_allocation_size: bool,
        file_info: &mut FileInfo,
    ) -> FsResult<()> {
        if set_allocation_size {
            let attr = self.getattr(context)?;
            if new_size >= attr.size {
                *file_info = file_info_from_attr(&attr);
                return Ok(());
            }
        }

        let setattr_in = SetattrIn {
            valid: SetattrValid::SIZE.bits(),
            size: new_size,
            ..Default::default()
        };
        self.setattr(context, &setattr_in)?;
        self.refresh(context, file_info)
    }

    fn can_delete(&self, context: &Self::FileContext, file_name: &U16CStr) -> FsResult<()> {
        let attr = self.getattr(context)?;
        if !attr.is_dir() {
            return Ok(());
        }
        if !self.options.check_directory_empty {
            debug!(name = %file_name.display(), "refusing directory delete without emptiness check");
            return Err(FsError::DirectoryNotEmpty);
        }

        let enumerator = DirectoryEnumerator::new(&self.channel, self.options.readdir_budget);
        if enumerator.has_entries(context)? {
            return Err(FsError::DirectoryNotEmpty);
        }
        Ok(())
    }

    fn rename(
        &self,
        context: &Self::FileContext,
        file_name: &U16CStr,
        new_file_name: &U16CStr,
        replace_if_exists: bool,
    ) -> FsResult<()> {
        let old = to_wire(file_name.as_ustr())?;
        let new = to_wire(new_file_name.as_ustr())?;
        debug!(
            nodeid = context.node_id().get(),
            old,
            new,
            replace_if_exists,
            "rename"
        );

        let request = self
            .request(Opcode::Rename, ROOT_ID)
            .arg(&RenameIn { newdir: ROOT_ID })
            .name(&old)?
            .name(&new)?;
        self.channel.call(&request, 0)?;
        Ok(())
    }

    fn get_security(&self, context: &Self::FileContext, security_descriptor: Option<&mut [u8]>) -> FsResult<u64> {
        let attr = self.getattr(context)?;
        let descriptor = self.descriptor_for(attr.mode)?;
        let required = descriptor.len();

        if let Some(buf) = security_descriptor {
            if buf.len() < required {
                return Err(FsError::BufferTooSmall { required });
            }
            buf[..required].copy_from_slice(descriptor.as_bytes());
        }
        Ok(required as u64)
    }

    fn set_security(
        &self,
        context: &Self::FileContext,
        security_information: SecurityInformation,
        modification_descriptor: &[u8],
    ) -> FsResult<()> {
        let attr = self.getattr(context)?;
        let current = self.descriptor_for(attr.mode)?;
        let before = self.mapper.descriptor_to_permissions(current.as_bytes())?;

        let updated =
            self.mapper
                .modify_descriptor(current.as_bytes(), security_information, modification_descriptor)?;
        let after = self.mapper.descriptor_to_permissions(updated.as_bytes())?;

        if after.mode == before.mode {
            debug!(nodeid = context.node_id().get(), "mode unchanged, nothing to send");
            return Ok(());
        }

        let setattr_in = SetattrIn {
            valid: SetattrValid::MODE.bits(),
            mode: after.mode,
            ..Default::default()
        };
        self.setattr(context, &setattr_in)
    }

    fn read_directory(
        &self,
        context: &Self::FileContext,
        pattern: Option<&U16CStr>,
        marker: DirMarker<'_>,
        buffer: &mut [u8],
    ) -> FsResult<u32> {
        debug!(
            nodeid = context.node_id().get(),
            pattern = pattern.map(|p| p.display().to_string()),
            marker = marker.inner().map(|m| m.display().to_string()),
            len = buffer.len(),
            "read directory"
        );

        let dir_buffer = context.dir_buffer();
        if let Some(mut fill) = dir_buffer.acquire(marker) {
            let enumerator = DirectoryEnumerator::new(&self.channel, self.options.readdir_budget);
            match enumerator.fill(context, &mut fill)? {
                FillOutcome::Complete => fill.finish(),
                FillOutcome::BufferFull => drop(fill),
            }
        }
        dir_buffer.read(marker, buffer).ok_or_else(|| {
            let name = marker.inner().map(|m| m.to_string_lossy()).unwrap_or_default();
            warn!(nodeid = context.node_id().get(), marker = %name, "marker not found in listing");
            FsError::UnknownMarker(name)
        })
    }
}
