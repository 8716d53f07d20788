//! Response view over a received buffer.
//!
//! The device reports how many bytes it actually wrote, and the header
//! declares its own length. The payload is bounded by both, so a header
//! that claims more than arrived never exposes stale buffer contents.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable, bytes_of_mut, pod_read_unaligned};

use crate::abi::OutHeader;
use crate::error::{WireError, WireResult};

/// A parsed response borrowing the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    header: OutHeader,
    received: usize,
    payload: &'a [u8],
}

impl<'a> Response<'a> {
    /// Parses the first `received` bytes of `buf`.
    pub fn parse(buf: &'a [u8], received: usize) -> WireResult<Self> {
        let received = received.min(buf.len());
        let header_len = size_of::<OutHeader>();
        if received < header_len {
            return Err(WireError::Truncated { received, needed: header_len });
        }

        let header: OutHeader = pod_read_unaligned(&buf[..header_len]);
        let end = (header.len as usize).clamp(header_len, received);

        Ok(Self {
            header,
            received,
            payload: &buf[header_len..end],
        })
    }

    /// Raw errno field: zero or a negative POSIX error number.
    pub fn error(&self) -> i32 {
        self.header.error
    }

    pub fn unique(&self) -> u64 {
        self.header.unique
    }

    pub fn declared_len(&self) -> usize {
        self.header.len as usize
    }

    pub fn received_len(&self) -> usize {
        self.received
    }

    /// True when the header claims more bytes than the device delivered.
    pub fn is_short(&self) -> bool {
        self.declared_len() > self.received
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Reads a full record from the start of the payload.
    pub fn read<T: Pod>(&self) -> WireResult<T> {
        let needed = size_of::<T>();
        if self.payload.len() < needed {
            return Err(WireError::short_payload::<T>(self.payload.len()));
        }
        Ok(pod_read_unaligned(&self.payload[..needed]))
    }

    /// Reads whatever prefix of a record is present, zero-filling the rest.
    pub fn read_prefix<T: Pod>(&self) -> T {
        let mut record = <T as Zeroable>::zeroed();
        let dst = bytes_of_mut(&mut record);
        let n = dst.len().min(self.payload.len());
        dst[..n].copy_from_slice(&self.payload[..n]);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AttrOut, InitOut, WriteOut};
    use bytemuck::bytes_of;

    fn reply(error: i32, len: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = bytes_of(&OutHeader { len, error, unique: 9 }).to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_truncated_header() {
        let buf = [0u8; 32];
        let err = Response::parse(&buf, 10).unwrap_err();
        assert_eq!(err, WireError::Truncated { received: 10, needed: 16 });
    }

    #[test]
    fn test_payload_clamped_to_received() {
        let mut buf = reply(0, 200, &[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.resize(256, 0xAA);
        let resp = Response::parse(&buf, 24).unwrap();
        assert_eq!(resp.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(resp.is_short());
    }

    #[test]
    fn test_payload_clamped_to_declared() {
        let buf = reply(0, 20, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let resp = Response::parse(&buf, buf.len()).unwrap();
        assert_eq!(resp.payload(), &[1, 2, 3, 4]);
        assert!(!resp.is_short());
    }

    #[test]
    fn test_declared_below_header_is_empty() {
        let buf = reply(-2, 4, &[]);
        let resp = Response::parse(&buf, buf.len()).unwrap();
        assert_eq!(resp.error(), -2);
        assert!(resp.payload().is_empty());
    }

    #[test]
    fn test_read_requires_full_record() {
        let buf = reply(0, 16 + 4, &[0u8; 4]);
        let resp = Response::parse(&buf, buf.len()).unwrap();
        let err = resp.read::<AttrOut>().unwrap_err();
        assert!(matches!(err, WireError::ShortPayload { needed: 104, available: 4, .. }));

        let out = WriteOut { size: 10, padding: 0 };
        let buf = reply(0, 24, bytes_of(&out));
        let resp = Response::parse(&buf, buf.len()).unwrap();
        assert_eq!(resp.read::<WriteOut>().unwrap().size, 10);
    }

    #[test]
    fn test_read_prefix_zero_extends() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&7u32.to_ne_bytes());
        payload.extend_from_slice(&23u32.to_ne_bytes());
        let buf = reply(0, 24, &payload);
        let resp = Response::parse(&buf, buf.len()).unwrap();
        let init: InitOut = resp.read_prefix();
        assert_eq!((init.major, init.minor), (7, 23));
        assert_eq!(init.max_write, 0);
    }
}
