//! READDIRPLUS payload decoding.
//!
//! A READDIRPLUS reply is a run of variable-length records, each an
//! [`EntryOut`] followed by a [`Dirent`] header and the raw name, padded
//! to 8 bytes. [`DirentPlusCursor`] walks that run without ever reading
//! past the payload.

use std::iter::FusedIterator;
use std::mem::size_of;

use bytemuck::{bytes_of, try_pod_read_unaligned};

use crate::abi::{DIRENTPLUS_MIN_SIZE, Dirent, EntryOut, direntplus_size};
use crate::error::{WireError, WireResult};

/// One decoded directory entry, borrowing its name from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirentPlus<'a> {
    pub entry: EntryOut,
    pub dirent: Dirent,
    pub name: &'a [u8],
}

impl DirentPlus<'_> {
    /// Offset to resume the listing after this entry.
    pub fn next_offset(&self) -> u64 {
        self.dirent.off
    }
}

/// Lazy, finite cursor over a READDIRPLUS payload.
///
/// Iteration ends when fewer than [`DIRENTPLUS_MIN_SIZE`] bytes remain.
/// A record whose name runs past the payload yields one error and then
/// ends the iteration.
#[derive(Debug, Clone)]
pub struct DirentPlusCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> DirentPlusCursor<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { buf: payload, pos: 0, done: false }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn decode(&mut self) -> WireResult<DirentPlus<'a>> {
        let rest = &self.buf[self.pos..];
        let entry_len = size_of::<EntryOut>();

        let entry: EntryOut = try_pod_read_unaligned(&rest[..entry_len])
            .map_err(|_| WireError::short_payload::<EntryOut>(rest.len()))?;
        let dirent: Dirent = try_pod_read_unaligned(&rest[entry_len..DIRENTPLUS_MIN_SIZE])
            .map_err(|_| WireError::short_payload::<Dirent>(rest.len() - entry_len))?;

        let namelen = dirent.namelen as usize;
        let name_end = DIRENTPLUS_MIN_SIZE + namelen;
        if name_end > rest.len() {
            return Err(WireError::EntryOverrun {
                offset: self.pos,
                needed: name_end,
                remaining: rest.len(),
            });
        }

        let name = &rest[DIRENTPLUS_MIN_SIZE..name_end];
        // The final record may omit its alignment padding.
        self.pos += direntplus_size(namelen).min(rest.len());

        Ok(DirentPlus { entry, dirent, name })
    }
}

impl<'a> Iterator for DirentPlusCursor<'a> {
    type Item = WireResult<DirentPlus<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining() < DIRENTPLUS_MIN_SIZE {
            self.done = true;
            return None;
        }
        let item = self.decode();
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

impl FusedIterator for DirentPlusCursor<'_> {}

/// Appends one READDIRPLUS record, zero-padded to alignment.
///
/// A name longer than the 32-bit `namelen` field is rejected with
/// [`WireError::TooLarge`] and nothing is appended.
pub fn push_direntplus(
    out: &mut Vec<u8>,
    entry: &EntryOut,
    off: u64,
    entry_type: u32,
    name: &[u8],
) -> WireResult<()> {
    let namelen = name_len(name.len())?;
    let start = out.len();
    let dirent = Dirent {
        ino: entry.attr.ino,
        off,
        namelen,
        entry_type,
    };
    out.extend_from_slice(bytes_of(entry));
    out.extend_from_slice(bytes_of(&dirent));
    out.extend_from_slice(name);
    out.resize(start + direntplus_size(name.len()), 0);
    Ok(())
}

fn name_len(len: usize) -> WireResult<u32> {
    u32::try_from(len).map_err(|_| WireError::TooLarge(len))
}
