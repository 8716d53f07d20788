//! One-shot health check through the provider callbacks.
//!
//! Drives a mounted-style session without a framework: volume info, open
//! the root, enumerate it with markers, clean up and close. Anything that
//! works here works for the dispatcher too, since it is the same surface.

use std::fmt;

use tracing::warn;
use widestring::{U16CString, u16cstr};
use virtfs_kernel::dirbuffer::parse_dir_infos;
use virtfs_kernel::{
    CleanupFlags, CreateOptions, DirInfo, DirMarker, FileInfo, FileSystemContext, FsError, FsResult,
    GrantedAccess, VolumeInfo,
};

/// Listing buffer handed to each ReadDirectory call.
const LISTING_BUFFER: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEntry {
    pub name: String,
    pub size: u64,
    pub directory: bool,
}

impl From<&DirInfo> for ProbeEntry {
    fn from(info: &DirInfo) -> Self {
        Self {
            name: info.name.to_string_lossy(),
            size: info.file_info.file_size,
            directory: info.file_info.is_directory(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub label: String,
    pub total_size: u64,
    pub free_size: u64,
    pub entries: Vec<ProbeEntry>,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "volume {:?}: {} bytes total, {} bytes free",
            self.label, self.total_size, self.free_size
        )?;
        for entry in &self.entries {
            if entry.directory {
                writeln!(f, "  {:>12}  {}", "<dir>", entry.name)?;
            } else {
                writeln!(f, "  {:>12}  {}", entry.size, entry.name)?;
            }
        }
        Ok(())
    }
}

pub fn probe<F: FileSystemContext>(fs: &F) -> FsResult<ProbeReport> {
    let mut volume = VolumeInfo::default();
    fs.get_volume_info(&mut volume)?;

    let mut info = FileInfo::default();
    let root = fs.open(u16cstr!("\\"), CreateOptions::empty(), GrantedAccess::READ_DATA, &mut info)?;
    let listing = list_directory(fs, &root);
    fs.cleanup(&root, None, CleanupFlags::empty());
    fs.close(root);

    Ok(ProbeReport {
        label: volume.volume_label.to_string_lossy(),
        total_size: volume.total_size,
        free_size: volume.free_size,
        entries: listing?,
    })
}

fn list_directory<F: FileSystemContext>(fs: &F, context: &F::FileContext) -> FsResult<Vec<ProbeEntry>> {
    let mut entries = Vec::new();
    let mut buffer = vec![0u8; LISTING_BUFFER];
    let mut marker: Option<U16CString> = None;

    loop {
        let m = marker.as_deref().map_or(DirMarker::start(), DirMarker::after);
        let written = fs.read_directory(context, None, m, &mut buffer)? as usize;
        let (infos, ended) = parse_dir_infos(&buffer[..written]);

        let Some(last) = infos.last() else {
            if !ended {
                warn!("directory listing made no progress");
            }
            break;
        };
        let next = U16CString::from_ustr(&last.name).map_err(|e| FsError::path_conversion(e.to_string()))?;
        entries.extend(infos.iter().map(ProbeEntry::from));
        if ended {
            break;
        }
        marker = Some(next);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtfs_kernel::loopback::{MemoryServer, errno};
    use virtfs_kernel::{VirtFs, VirtFsOptions};
    use virtfs_wire::Opcode;

    fn names(report: &ProbeReport) -> Vec<&str> {
        report.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_probe_lists_root() {
        let server = MemoryServer::new(0, 0).with_label("scratch");
        server.add_dir("docs", 0o755).unwrap();
        server.add_file("hello.txt", 0o644, b"hello").unwrap();
        let fs = VirtFs::connect(server, VirtFsOptions::default()).unwrap();

        let report = probe(&fs).unwrap();
        assert_eq!(report.label, "scratch");
        assert_eq!(names(&report), vec![".", "..", "docs", "hello.txt"]);

        let hello = &report.entries[3];
        assert_eq!(hello.size, 5);
        assert!(!hello.directory);
        assert!(report.entries[2].directory);

        // Root handle was released.
        assert_eq!(fs.transport().open_handles(), 0);
    }

    #[test]
    fn test_probe_survives_many_rounds() {
        let server = MemoryServer::default();
        server.set_readdir_limit(Some(1));
        for i in 0..40 {
            server.add_file(&format!("file-{i:02}"), 0o644, &[]).unwrap();
        }
        let fs = VirtFs::connect(server, VirtFsOptions::default()).unwrap();

        let report = probe(&fs).unwrap();
        assert_eq!(report.entries.len(), 42);
        assert_eq!(report.entries.last().unwrap().name, "file-39");
    }

    #[test]
    fn test_report_display() {
        let report = ProbeReport {
            label: "VirtFS".to_string(),
            total_size: 8192,
            free_size: 4096,
            entries: vec![
                ProbeEntry {
                    name: "docs".to_string(),
                    size: 0,
                    directory: true,
                },
                ProbeEntry {
                    name: "a.txt".to_string(),
                    size: 12,
                    directory: false,
                },
            ],
        };
        let text = report.to_string();
        assert!(text.starts_with("volume \"VirtFS\": 8192 bytes total, 4096 bytes free\n"));
        assert!(text.contains("<dir>  docs"));
        assert!(text.contains("12  a.txt"));
    }

    #[test]
    fn test_listing_failure_still_closes_root() {
        let server = MemoryServer::default();
        let fs = VirtFs::connect(server, VirtFsOptions::default()).unwrap();
        fs.transport().fail(Opcode::Readdirplus, errno::EIO);

        assert!(probe(&fs).is_err());
        assert_eq!(fs.transport().open_handles(), 0);
    }
}
