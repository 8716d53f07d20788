//! Filesystem-provider callback contract.
//!
//! This is the interface the provider framework's dispatcher drives. Every
//! callback runs on a dispatcher thread, blocks until done, and reports
//! failure through [`FsError::ntstatus`](crate::FsError::ntstatus). Output
//! [`FileInfo`] parameters are only written on success.

use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use widestring::{U16CStr, U16String};

use crate::attr::{FileInfo, unix_to_filetime};
use crate::error::FsResult;

bitflags! {
    /// Access rights granted to an open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GrantedAccess: u32 {
        const READ_DATA = 0x0001;
        const WRITE_DATA = 0x0002;
        const APPEND_DATA = 0x0004;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE = 0x0001;
    }
}

bitflags! {
    /// Work the framework asks for when the last handle to a file goes away.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CleanupFlags: u32 {
        const DELETE = 0x01;
        const SET_ALLOCATION_SIZE = 0x02;
        const SET_ARCHIVE_BIT = 0x10;
        const SET_LAST_ACCESS_TIME = 0x20;
        const SET_LAST_WRITE_TIME = 0x40;
        const SET_CHANGE_TIME = 0x80;
    }
}

bitflags! {
    /// Which parts of a security descriptor a SetSecurity call touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SecurityInformation: u32 {
        const OWNER = 0x1;
        const GROUP = 0x2;
        const DACL = 0x4;
    }
}

/// Volume size and label, as returned from GetVolumeInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub volume_label: U16String,
}

/// Result of a GetSecurityByName probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSecurity {
    pub attributes: u32,
    /// Size of the full descriptor, whether or not it was copied out.
    pub sz_security_descriptor: u64,
}

/// Resume point for a directory listing: `None` starts from the beginning,
/// otherwise listing continues after the named entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirMarker<'a>(Option<&'a U16CStr>);

impl<'a> DirMarker<'a> {
    pub fn start() -> Self {
        Self(None)
    }

    pub fn after(name: &'a U16CStr) -> Self {
        Self(Some(name))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn inner(&self) -> Option<&'a U16CStr> {
        self.0
    }
}

/// Registration parameters handed to the framework at mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeParams {
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub volume_creation_time: u64,
    pub file_info_timeout: u32,
    pub case_sensitive_search: bool,
    pub case_preserved_names: bool,
    pub unicode_on_disk: bool,
    pub persistent_acls: bool,
    pub post_cleanup_when_modified_only: bool,
    pub flush_and_purge_on_cleanup: bool,
    pub prefix: Option<String>,
    pub file_system_name: String,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeParams {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sector_size: 512,
            sectors_per_allocation_unit: 1,
            volume_creation_time: unix_to_filetime(now.as_secs(), now.subsec_nanos()),
            file_info_timeout: 0,
            case_sensitive_search: false,
            case_preserved_names: false,
            unicode_on_disk: false,
            persistent_acls: false,
            post_cleanup_when_modified_only: false,
            flush_and_purge_on_cleanup: false,
            prefix: None,
            file_system_name: String::new(),
        }
    }

    pub fn sector_size(&mut self, value: u16) -> &mut Self {
        self.sector_size = value;
        self
    }

    pub fn sectors_per_allocation_unit(&mut self, value: u16) -> &mut Self {
        self.sectors_per_allocation_unit = value;
        self
    }

    pub fn file_info_timeout(&mut self, millis: u32) -> &mut Self {
        self.file_info_timeout = millis;
        self
    }

    pub fn case_sensitive_search(&mut self, value: bool) -> &mut Self {
        self.case_sensitive_search = value;
        self
    }

    pub fn case_preserved_names(&mut self, value: bool) -> &mut Self {
        self.case_preserved_names = value;
        self
    }

    pub fn unicode_on_disk(&mut self, value: bool) -> &mut Self {
        self.unicode_on_disk = value;
        self
    }

    pub fn persistent_acls(&mut self, value: bool) -> &mut Self {
        self.persistent_acls = value;
        self
    }

    pub fn post_cleanup_when_modified_only(&mut self, value: bool) -> &mut Self {
        self.post_cleanup_when_modified_only = value;
        self
    }

    pub fn flush_and_purge_on_cleanup(&mut self, value: bool) -> &mut Self {
        self.flush_and_purge_on_cleanup = value;
        self
    }

    pub fn prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn filesystem_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.file_system_name = name.into();
        self
    }
}

/// The callbacks a provider implements.
///
/// `FileContext` is the per-open state the framework stores alongside each
/// file object; it is handed back by reference on every call and by value
/// to [`close`](Self::close) exactly once.
pub trait FileSystemContext: Send + Sync {
    type FileContext: Send + Sync;

    fn get_volume_info(&self, out_volume_info: &mut VolumeInfo) -> FsResult<()>;

    fn set_volume_label(&self, volume_label: &U16CStr, out_volume_info: &mut VolumeInfo) -> FsResult<()>;

    /// Attributes and security descriptor for a path that is not open.
    /// With `security_descriptor` absent only the size is reported.
    fn get_security_by_name(
        &self,
        file_name: &U16CStr,
        security_descriptor: Option<&mut [u8]>,
    ) -> FsResult<FileSecurity>;

    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        file_name: &U16CStr,
        create_options: CreateOptions,
        granted_access: GrantedAccess,
        file_attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
        file_info: &mut FileInfo,
    ) -> FsResult<Self::FileContext>;

    fn open(
        &self,
        file_name: &U16CStr,
        create_options: CreateOptions,
        granted_access: GrantedAccess,
        file_info: &mut FileInfo,
    ) -> FsResult<Self::FileContext>;

    fn overwrite(
        &self,
        context: &Self::FileContext,
        file_attributes: u32,
        replace_file_attributes: bool,
        allocation_size: u64,
        file_info: &mut FileInfo,
    ) -> FsResult<()>;

    fn cleanup(&self, context: &Self::FileContext, file_name: Option<&U16CStr>, flags: CleanupFlags);

    fn close(&self, context: Self::FileContext);

    fn read(&self, context: &Self::FileContext, buffer: &mut [u8], offset: u64) -> FsResult<u32>;

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        context: &Self::FileContext,
        buffer: &[u8],
        offset: u64,
        write_to_eof: bool,
        constrained_io: bool,
        file_info: &mut FileInfo,
    ) -> FsResult<u32>;

    /// `context` is `None` when the whole volume is flushed.
    fn flush(&self, context: Option<&Self::FileContext>, file_info: &mut FileInfo) -> FsResult<()>;

    fn get_file_info(&self, context: &Self::FileContext, file_info: &mut FileInfo) -> FsResult<()>;

    #[allow(clippy::too_many_arguments)]
    fn set_basic_info(
        &self,
        context: &Self::FileContext,
        file_attributes: u32,
        creation_time: u64,
        last_access_time: u64,
        last_write_time: u64,
        change_time: u64,
        file_info: &mut FileInfo,
    ) -> FsResult<()>;

    fn set_file_size(
        &self,
        context: &Self::FileContext,
        new_size: u64,
        set_allocation_size: bool,
        file_info: &mut FileInfo,
    ) -> FsResult<()>;

    fn can_delete(&self, context: &Self::FileContext, file_name: &U16CStr) -> FsResult<()>;

    fn rename(
        &self,
        context: &Self::FileContext,
        file_name: &U16CStr,
        new_file_name: &U16CStr,
        replace_if_exists: bool,
    ) -> FsResult<()>;

    /// Copies the descriptor into `security_descriptor` when given and
    /// returns its full size.
    fn get_security(&self, context: &Self::FileContext, security_descriptor: Option<&mut [u8]>) -> FsResult<u64>;

    fn set_security(
        &self,
        context: &Self::FileContext,
        security_information: SecurityInformation,
        modification_descriptor: &[u8],
    ) -> FsResult<()>;

    /// Fills `buffer` with directory info records and returns the number of
    /// bytes written.
    fn read_directory(
        &self,
        context: &Self::FileContext,
        pattern: Option<&U16CStr>,
        marker: DirMarker<'_>,
        buffer: &mut [u8],
    ) -> FsResult<u32>;
}

/// Mount/unmount plumbing owned by the framework.
pub trait Dispatcher {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Registers the volume and starts serving callbacks.
    fn start(&mut self, params: &VolumeParams, mount_point: Option<&str>) -> Result<(), Self::Error>;

    /// Stops serving callbacks. Safe to call when not started.
    fn stop(&mut self);
}
