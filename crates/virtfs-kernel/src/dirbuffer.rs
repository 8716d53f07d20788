//! Per-directory enumeration buffer.
//!
//! A listing is fetched from the remote once and then drained across as
//! many ReadDirectory calls as the caller's buffer size requires. The
//! buffer owns the fetched entries; fill and drain are serialized by its
//! lock.
//!
//! ## Design Decisions
//!
//! - **Insertion order.** Entries drain in the order the remote listed
//!   them. A marker resumes after the entry carrying that name.
//! - **Completion is explicit.** Only [`DirBufferFill::finish`] marks the
//!   buffer filled. A fill abandoned early (error, capacity reached) leaves
//!   it unfilled and no end-of-listing record is emitted for it.
//! - **Fills resume.** The buffer remembers the remote offset after the
//!   last entry it accepted. A marker call against an unfilled buffer
//!   drops the entries before the marker and continues from that offset,
//!   so listings larger than the capacity drain in windows.

use std::collections::HashMap;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable, bytes_of, cast_slice};
use parking_lot::{RwLock, RwLockWriteGuard};
use thiserror::Error;
use widestring::{U16Str, U16String};

use crate::attr::FileInfo;
use crate::provider::DirMarker;

/// Fixed part of a directory info record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DirInfoHeader {
    size: u16,
    padding: [u8; 6],
    file_info: FileInfo,
    non_path: [u8; 24],
}

pub const DIR_INFO_HEADER_SIZE: usize = size_of::<DirInfoHeader>();
const _: () = assert!(DIR_INFO_HEADER_SIZE == 104);

/// Default byte capacity of a directory buffer.
pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// One directory entry as the provider sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub name: U16String,
    pub file_info: FileInfo,
}

impl DirInfo {
    pub fn new(name: U16String, file_info: FileInfo) -> Self {
        Self { name, file_info }
    }

    /// Unaligned record size.
    pub fn record_size(&self) -> usize {
        DIR_INFO_HEADER_SIZE + self.name.len() * size_of::<u16>()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("directory buffer full")]
pub struct BufferFull;

#[derive(Debug, Default)]
struct State {
    entries: Vec<DirInfo>,
    index: HashMap<U16String, usize>,
    bytes: usize,
    filled: bool,
    /// Remote offset the next fill starts at.
    resume: u64,
    /// Marker being sought; entries before it may be dropped for room.
    seeking: Option<U16String>,
    /// Name of the entry just before `entries[0]`, once earlier ones were dropped.
    before: Option<U16String>,
}

impl State {
    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.bytes = 0;
        self.filled = false;
        self.resume = 0;
        self.seeking = None;
        self.before = None;
    }

    /// Drops every buffered entry, remembering the last one's name.
    fn drop_entries(&mut self) {
        if let Some(last) = self.entries.pop() {
            self.before = Some(last.name);
        }
        self.entries.clear();
        self.index.clear();
        self.bytes = 0;
    }

    /// Index of the first entry after `name`, if `name` is known.
    fn position_after(&self, name: &U16Str) -> Option<usize> {
        match self.index.get(name) {
            Some(&i) => Some(i + 1),
            None if self.before.as_deref() == Some(name) => Some(0),
            None => None,
        }
    }

    /// Drops `name` and every entry before it. False when `name` is unknown.
    fn retain_after(&mut self, name: &U16Str) -> bool {
        let Some(start) = self.position_after(name) else {
            return false;
        };
        if start == 0 {
            return true;
        }
        self.entries.drain(..start);
        self.before = Some(name.to_owned());
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.name.clone(), i))
            .collect();
        self.bytes = self.entries.iter().map(|e| align8(e.record_size())).sum();
        true
    }
}

#[derive(Debug)]
pub struct DirBuffer {
    state: RwLock<State>,
    capacity: usize,
}

impl Default for DirBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DirBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            capacity,
        }
    }

    /// Takes the buffer for filling, or returns `None` when it only needs
    /// draining.
    ///
    /// A start marker resets the buffer. Any other marker continues an
    /// unfilled buffer after the marker entry, from the recorded offset. When
    /// the marker is not buffered the listing is refetched from the start;
    /// entries before the marker are dropped only when room runs out.
    pub fn acquire(&self, marker: DirMarker<'_>) -> Option<DirBufferFill<'_>> {
        let mut state = self.state.write();
        match marker.inner() {
            None => state.clear(),
            Some(_) if state.filled => return None,
            Some(name) => {
                if !state.retain_after(name.as_ustr()) {
                    state.clear();
                    state.seeking = Some(name.as_ustr().to_owned());
                }
            }
        }
        Some(DirBufferFill {
            state,
            capacity: self.capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_filled(&self) -> bool {
        self.state.read().filled
    }

    /// Copies entries after `marker` into `buffer` as directory info
    /// records and returns the bytes written. The end-of-listing record is
    /// appended when the listing is complete and everything fit.
    ///
    /// Returns `None` when `marker` names an entry the buffer does not hold.
    pub fn read(&self, marker: DirMarker<'_>, buffer: &mut [u8]) -> Option<u32> {
        let state = self.state.read();
        let start = match marker.inner() {
            None => 0,
            Some(name) => state.position_after(name.as_ustr())?,
        };

        let mut written = 0;
        for entry in &state.entries[start..] {
            if !add_dir_info(Some(entry), buffer, &mut written) {
                return Some(written as u32);
            }
        }
        if state.filled {
            add_dir_info(None, buffer, &mut written);
        }
        Some(written as u32)
    }

    /// Remote offset the next fill would start at.
    pub fn resume_offset(&self) -> u64 {
        self.state.read().resume
    }
}

/// Exclusive fill access. Dropping it without [`finish`](Self::finish)
/// leaves the buffer unfilled.
pub struct DirBufferFill<'a> {
    state: RwLockWriteGuard<'a, State>,
    capacity: usize,
}

impl DirBufferFill<'_> {
    pub fn fill(&mut self, info: DirInfo) -> Result<(), BufferFull> {
        let size = align8(info.record_size());
        if self.state.bytes + size > self.capacity && self.state.seeking.is_some() {
            // Everything buffered precedes the marker.
            self.state.drop_entries();
        }
        if self.state.bytes + size > self.capacity {
            return Err(BufferFull);
        }
        if self.state.seeking.as_ref() == Some(&info.name) {
            self.state.seeking = None;
        }
        let position = self.state.entries.len();
        self.state.index.insert(info.name.clone(), position);
        self.state.entries.push(info);
        self.state.bytes += size;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// Where the remote listing continues.
    pub fn resume_offset(&self) -> u64 {
        self.state.resume
    }

    /// Records that everything before remote `offset` has been consumed.
    pub fn advance(&mut self, offset: u64) {
        self.state.resume = offset;
    }

    /// Marks the listing complete.
    pub fn finish(mut self) {
        self.state.filled = true;
    }
}

/// Appends one record to `buffer` at `*written`, or the end-of-listing
/// marker when `info` is `None`. Returns false when it does not fit.
pub fn add_dir_info(info: Option<&DirInfo>, buffer: &mut [u8], written: &mut usize) -> bool {
    let remaining = buffer.len().saturating_sub(*written);
    let at = *written;

    let Some(info) = info else {
        if remaining < size_of::<u16>() {
            return false;
        }
        buffer[at..at + 2].copy_from_slice(&0u16.to_ne_bytes());
        *written = (at + 2).min(buffer.len());
        return true;
    };

    let size = info.record_size();
    let Ok(size16) = u16::try_from(size) else {
        return false;
    };
    if remaining < size {
        return false;
    }

    let header = DirInfoHeader {
        size: size16,
        padding: [0; 6],
        file_info: info.file_info,
        non_path: [0; 24],
    };
    buffer[at..at + DIR_INFO_HEADER_SIZE].copy_from_slice(bytes_of(&header));
    buffer[at + DIR_INFO_HEADER_SIZE..at + size].copy_from_slice(cast_slice(info.name.as_slice()));
    *written = (at + align8(size)).min(buffer.len());
    true
}

/// Decodes records produced by [`add_dir_info`]. Returns the entries and
/// whether an end-of-listing marker was found.
pub fn parse_dir_infos(buffer: &[u8]) -> (Vec<DirInfo>, bool) {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos + size_of::<u16>() <= buffer.len() {
        let size = u16::from_ne_bytes([buffer[pos], buffer[pos + 1]]) as usize;
        if size == 0 {
            return (entries, true);
        }
        if size < DIR_INFO_HEADER_SIZE || pos + size > buffer.len() {
            break;
        }
        let header: DirInfoHeader = bytemuck::pod_read_unaligned(&buffer[pos..pos + DIR_INFO_HEADER_SIZE]);
        let units: Vec<u16> = buffer[pos + DIR_INFO_HEADER_SIZE..pos + size]
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        entries.push(DirInfo::new(U16String::from_vec(units), header.file_info));
        pos += align8(size);
    }
    (entries, false)
}
