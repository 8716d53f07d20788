//! Paginated directory listing over READDIRPLUS.
//!
//! Each round asks the remote for up to `budget` bytes of entries starting
//! at the offset the previous round ended on. Rounds continue until a
//! reply carries no payload. Entries are converted and pushed into the
//! context's [`DirBuffer`](crate::dirbuffer::DirBuffer) through a fill
//! guard; the guard saying "full" ends the fill early. The buffer keeps the
//! offset after the last accepted entry, and the next fill starts there.

use tracing::{debug, warn};
use virtfs_wire::abi::ReadIn;
use virtfs_wire::{DirentPlus, DirentPlusCursor, Opcode};

use crate::attr::file_info_from_attr;
use crate::context::FileContext;
use crate::dirbuffer::{DirBufferFill, DirInfo};
use crate::error::FsResult;
use crate::path::name_from_wire;
use crate::transport::{Channel, Transport};

/// Longest entry name accepted, in UTF-16 units.
pub const MAX_NAME_UNITS: usize = 260;

/// Default READDIRPLUS reply budget: one allocation unit.
pub const DEFAULT_BUDGET: u32 = 4096;

/// How a fill ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The remote reported the end of the listing.
    Complete,
    /// The buffer refused an entry; the rest was not fetched.
    BufferFull,
}

pub struct DirectoryEnumerator<'a, T> {
    channel: &'a Channel<T>,
    budget: u32,
}

impl<'a, T: Transport> DirectoryEnumerator<'a, T> {
    pub fn new(channel: &'a Channel<T>, budget: u32) -> Self {
        Self { channel, budget }
    }

    fn round(&self, ctx: &FileContext, offset: u64) -> FsResult<crate::transport::Reply> {
        let read_in = ReadIn {
            fh: ctx.handle().get(),
            offset,
            size: self.budget,
            ..Default::default()
        };
        let request = self.channel.request(Opcode::Readdirplus, ctx.node_id().get()).arg(&read_in);
        self.channel.call(&request, self.budget as usize)
    }

    /// Fetches the listing into `fill`, starting at its resume offset.
    pub fn fill(&self, ctx: &FileContext, fill: &mut DirBufferFill<'_>) -> FsResult<FillOutcome> {
        let mut offset = fill.resume_offset();
        loop {
            let reply = self.round(ctx, offset)?;
            let response = reply.response()?;
            let payload = response.payload();
            if payload.is_empty() {
                debug!(nodeid = ctx.node_id().get(), entries = fill.len(), "listing complete");
                return Ok(FillOutcome::Complete);
            }

            let start = offset;
            let mut decoded = 0usize;
            for item in DirentPlusCursor::new(payload) {
                let entry = item?;
                decoded += 1;

                let accepted = match dir_info(&entry) {
                    Some(info) => fill.fill(info).is_ok(),
                    None => true,
                };
                if !accepted {
                    debug!(nodeid = ctx.node_id().get(), offset, "directory buffer full");
                    return Ok(FillOutcome::BufferFull);
                }
                offset = entry.next_offset();
                fill.advance(offset);
            }

            if decoded == 0 {
                warn!(
                    nodeid = ctx.node_id().get(),
                    bytes = payload.len(),
                    "readdirplus reply held no complete entry, ending listing"
                );
                return Ok(FillOutcome::Complete);
            }
            if offset == start {
                warn!(nodeid = ctx.node_id().get(), offset, "readdirplus offset did not advance, ending listing");
                return Ok(FillOutcome::Complete);
            }
        }
    }

    /// True when the directory holds anything besides `.` and `..`.
    pub fn has_entries(&self, ctx: &FileContext) -> FsResult<bool> {
        let mut offset = 0;
        loop {
            let reply = self.round(ctx, offset)?;
            let response = reply.response()?;
            if response.payload().is_empty() {
                return Ok(false);
            }
            let start = offset;
            for item in DirentPlusCursor::new(response.payload()) {
                let entry = item?;
                if entry.name != b"." && entry.name != b".." {
                    return Ok(true);
                }
                offset = entry.next_offset();
            }
            if offset == start {
                return Ok(false);
            }
        }
    }
}

/// Converts one wire entry, or `None` when its name is unusable.
fn dir_info(entry: &DirentPlus<'_>) -> Option<DirInfo> {
    let name = match name_from_wire(entry.name) {
        Some(name) if !name.is_empty() && name.len() <= MAX_NAME_UNITS => name,
        _ => {
            warn!(
                ino = entry.dirent.ino,
                namelen = entry.dirent.namelen,
                "skipping directory entry with unusable name"
            );
            return None;
        }
    };
    Some(DirInfo::new(name, file_info_from_attr(&entry.entry.attr)))
}
