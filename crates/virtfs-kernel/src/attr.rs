//! Attribute translation from POSIX records to provider file info.

use bytemuck::{Pod, Zeroable};
use virtfs_wire::abi::Attr;

/// Directory file attribute.
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
/// Attribute for anything that is not a directory.
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x80;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const EPOCH_DIFFERENCE: u64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Provider-side file metadata, laid out as the framework expects.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FileInfo {
    pub file_attributes: u32,
    pub reparse_tag: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub index_number: u64,
    pub hard_links: u32,
    pub ea_size: u32,
}

const _: () = assert!(std::mem::size_of::<FileInfo>() == 72);

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

/// Converts POSIX seconds plus nanoseconds to provider time.
pub fn unix_to_filetime(secs: u64, nsecs: u32) -> u64 {
    secs.saturating_mul(TICKS_PER_SECOND)
        .saturating_add(u64::from(nsecs) / 100)
        .saturating_add(EPOCH_DIFFERENCE)
}

/// Converts provider time to POSIX seconds plus nanoseconds. Times before
/// 1970 clamp to the epoch.
pub fn filetime_to_unix(filetime: u64) -> (u64, u32) {
    let ticks = filetime.saturating_sub(EPOCH_DIFFERENCE);
    let secs = ticks / TICKS_PER_SECOND;
    let nsecs = (ticks % TICKS_PER_SECOND) * 100;
    (secs, nsecs as u32)
}

/// File attribute bits for a POSIX mode.
pub fn attributes_from_mode(mode: u32) -> u32 {
    if mode & virtfs_wire::abi::S_IFMT == virtfs_wire::abi::S_IFDIR {
        FILE_ATTRIBUTE_DIRECTORY
    } else {
        FILE_ATTRIBUTE_NORMAL
    }
}

/// Translates a wire attribute record.
///
/// Change time mirrors the write time since the wire carries no separate
/// field for it. Reparse tag, link count and EA size stay zero.
pub fn file_info_from_attr(attr: &Attr) -> FileInfo {
    let last_write_time = unix_to_filetime(attr.mtime, attr.mtimensec);
    FileInfo {
        file_attributes: attributes_from_mode(attr.mode),
        reparse_tag: 0,
        allocation_size: attr.blocks.saturating_mul(u64::from(attr.blksize)),
        file_size: attr.size,
        creation_time: unix_to_filetime(attr.ctime, attr.ctimensec),
        last_access_time: unix_to_filetime(attr.atime, attr.atimensec),
        last_write_time,
        change_time: last_write_time,
        index_number: attr.ino,
        hard_links: 0,
        ea_size: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtfs_wire::abi::{S_IFDIR, S_IFREG};

    #[test]
    fn test_allocation_is_blocks_times_blksize() {
        for (blocks, blksize) in [(0u64, 4096u32), (1, 512), (8, 4096), (12345, 1024)] {
            let attr = Attr { blocks, blksize, ..Default::default() };
            assert_eq!(file_info_from_attr(&attr).allocation_size, blocks * u64::from(blksize));
        }
    }

    #[test]
    fn test_only_directories_are_directories() {
        let modes = [
            (S_IFDIR | 0o755, true),
            (S_IFREG | 0o644, false),
            (0o120777, false),
            (0o060600, false),
            (0o020600, false),
            (0o010644, false),
            (0o140755, false),
            (0, false),
        ];
        for (mode, is_dir) in modes {
            let info = file_info_from_attr(&Attr { mode, ..Default::default() });
            assert_eq!(info.is_directory(), is_dir, "mode {mode:o}");
            let expected = if is_dir { FILE_ATTRIBUTE_DIRECTORY } else { FILE_ATTRIBUTE_NORMAL };
            assert_eq!(info.file_attributes, expected);
        }
    }

    #[test]
    fn test_timestamps() {
        let attr = Attr {
            atime: 10,
            mtime: 20,
            mtimensec: 500,
            ctime: 30,
            ..Default::default()
        };
        let info = file_info_from_attr(&attr);
        assert_eq!(info.last_access_time, EPOCH_DIFFERENCE + 100_000_000);
        assert_eq!(info.last_write_time, EPOCH_DIFFERENCE + 200_000_005);
        assert_eq!(info.change_time, info.last_write_time);
        assert_eq!(info.creation_time, EPOCH_DIFFERENCE + 300_000_000);
        assert_eq!((info.reparse_tag, info.hard_links, info.ea_size), (0, 0, 0));
    }

    #[test]
    fn test_filetime_round_trip() {
        let ft = unix_to_filetime(1_700_000_000, 123_456_700);
        assert_eq!(filetime_to_unix(ft), (1_700_000_000, 123_456_700));
        assert_eq!(filetime_to_unix(0), (0, 0));
    }
}
