//! Security descriptor mapping.
//!
//! Converting between POSIX permissions and the framework's descriptors
//! is a collaborator's job; the bridge only orchestrates it through
//! [`PermissionMapper`]. [`PosixDescriptorMapper`] is a self-contained
//! mapper that encodes owner, group and mode directly in the descriptor.

use bytemuck::{Pod, Zeroable, bytes_of, try_pod_read_unaligned};

use crate::error::{FsError, FsResult};
use crate::provider::SecurityInformation;

/// An owned, opaque security descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDescriptor(Vec<u8>);

impl SecurityDescriptor {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// POSIX ownership and mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// Converts between POSIX permissions and security descriptors.
pub trait PermissionMapper: Send + Sync {
    fn permissions_to_descriptor(&self, perms: Permissions) -> FsResult<SecurityDescriptor>;

    fn descriptor_to_permissions(&self, descriptor: &[u8]) -> FsResult<Permissions>;

    /// Applies the parts of `modification` selected by `info` to `current`.
    fn modify_descriptor(
        &self,
        current: &[u8],
        info: SecurityInformation,
        modification: &[u8],
    ) -> FsResult<SecurityDescriptor>;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct EncodedDescriptor {
    magic: [u8; 4],
    uid: u32,
    gid: u32,
    mode: u32,
}

const MAGIC: [u8; 4] = *b"PXSD";
const PERMISSION_BITS: u32 = 0o7777;

/// Mapper that stores permissions verbatim in a 16-byte descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixDescriptorMapper;

impl PosixDescriptorMapper {
    fn decode(bytes: &[u8]) -> FsResult<Permissions> {
        let size = std::mem::size_of::<EncodedDescriptor>();
        let head = bytes
            .get(..size)
            .ok_or_else(|| FsError::security(format!("descriptor of {} bytes is too short", bytes.len())))?;
        let encoded: EncodedDescriptor = try_pod_read_unaligned(head)
            .map_err(|e| FsError::security(format!("unreadable descriptor: {e:?}")))?;
        if encoded.magic != MAGIC {
            return Err(FsError::security("unrecognized descriptor format"));
        }
        Ok(Permissions {
            uid: encoded.uid,
            gid: encoded.gid,
            mode: encoded.mode,
        })
    }
}

impl PermissionMapper for PosixDescriptorMapper {
    fn permissions_to_descriptor(&self, perms: Permissions) -> FsResult<SecurityDescriptor> {
        let encoded = EncodedDescriptor {
            magic: MAGIC,
            uid: perms.uid,
            gid: perms.gid,
            mode: perms.mode,
        };
        Ok(SecurityDescriptor::from_bytes(bytes_of(&encoded)))
    }

    fn descriptor_to_permissions(&self, descriptor: &[u8]) -> FsResult<Permissions> {
        Self::decode(descriptor)
    }

    fn modify_descriptor(
        &self,
        current: &[u8],
        info: SecurityInformation,
        modification: &[u8],
    ) -> FsResult<SecurityDescriptor> {
        let mut perms = Self::decode(current)?;
        let change = Self::decode(modification)?;
        if info.contains(SecurityInformation::OWNER) {
            perms.uid = change.uid;
        }
        if info.contains(SecurityInformation::GROUP) {
            perms.gid = change.gid;
        }
        if info.contains(SecurityInformation::DACL) {
            perms.mode = (perms.mode & !PERMISSION_BITS) | (change.mode & PERMISSION_BITS);
        }
        self.permissions_to_descriptor(perms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_carries_permissions() {
        let mapper = PosixDescriptorMapper;
        let perms = Permissions { uid: 197609, gid: 197121, mode: 0o100644 };
        let sd = mapper.permissions_to_descriptor(perms).unwrap();
        assert_eq!(sd.len(), 16);
        assert_eq!(mapper.descriptor_to_permissions(sd.as_bytes()).unwrap(), perms);
    }

    #[test]
    fn test_modify_dacl_keeps_file_type() {
        let mapper = PosixDescriptorMapper;
        let current = mapper
            .permissions_to_descriptor(Permissions { uid: 1, gid: 2, mode: 0o040755 })
            .unwrap();
        let change = mapper
            .permissions_to_descriptor(Permissions { uid: 9, gid: 9, mode: 0o700 })
            .unwrap();
        let updated = mapper
            .modify_descriptor(current.as_bytes(), SecurityInformation::DACL, change.as_bytes())
            .unwrap();
        let perms = mapper.descriptor_to_permissions(updated.as_bytes()).unwrap();
        assert_eq!(perms, Permissions { uid: 1, gid: 2, mode: 0o040700 });
    }

    #[test]
    fn test_garbage_descriptor_rejected() {
        let mapper = PosixDescriptorMapper;
        assert!(matches!(mapper.descriptor_to_permissions(&[1, 2, 3]), Err(FsError::Security(_))));
        assert!(matches!(mapper.descriptor_to_permissions(&[0u8; 16]), Err(FsError::Security(_))));
    }
}
