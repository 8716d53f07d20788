//! Provider path to wire name conversion.
//!
//! Provider paths are UTF-16, backslash separated and rooted (`\a\b`).
//! The remote resolves names relative to the node a request targets, so
//! paths are sent as `a/b` against the root node, and the root itself is
//! `.`. The framework smuggles characters that are illegal in its names
//! through the private-use range at U+F000; those map back to ASCII.

use widestring::{U16Str, U16String};

use crate::error::{FsError, FsResult};

const PRIVATE_USE_BASE: u32 = 0xF000;

/// Converts a provider path to a wire name.
pub fn to_wire(path: &U16Str) -> FsResult<String> {
    let mut out = String::with_capacity(path.len());
    for unit in char::decode_utf16(path.as_slice().iter().copied()) {
        let ch = unit.map_err(|e| {
            FsError::path_conversion(format!("unpaired surrogate {:#06x}", e.unpaired_surrogate()))
        })?;
        out.push(unmap_private_use(ch));
    }

    let trimmed = out.trim_start_matches('\\');
    if trimmed.is_empty() {
        return Ok(".".to_string());
    }
    Ok(trimmed.replace('\\', "/"))
}

/// Converts a UTF-8 entry name from the wire to UTF-16. Returns `None` for
/// names that are not valid UTF-8.
pub fn name_from_wire(name: &[u8]) -> Option<U16String> {
    std::str::from_utf8(name).ok().map(U16String::from_str)
}

fn unmap_private_use(ch: char) -> char {
    let code = ch as u32;
    if (PRIVATE_USE_BASE..PRIVATE_USE_BASE + 0x80).contains(&code) {
        char::from_u32(code - PRIVATE_USE_BASE).unwrap_or(ch)
    } else {
        ch
    }
}
