//! Request builder.
//!
//! A request is the 40-byte header, a body of fixed records and strings,
//! and an optional borrowed trailer (write data). The header's `len` is
//! always computed from the pieces, never supplied by the caller.

use std::mem::size_of;

use bytemuck::{Pod, bytes_of};

use crate::abi::{InHeader, Opcode};
use crate::error::{WireError, WireResult};

/// Caller identity stamped into the request header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// A request under construction.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    opcode: Opcode,
    nodeid: u64,
    credentials: Credentials,
    body: Vec<u8>,
    trailer: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn new(opcode: Opcode, nodeid: u64) -> Self {
        Self {
            opcode,
            nodeid,
            credentials: Credentials::default(),
            body: Vec::new(),
            trailer: &[],
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Appends a fixed-layout argument record.
    pub fn arg<T: Pod>(mut self, record: &T) -> Self {
        self.body.extend_from_slice(bytes_of(record));
        self
    }

    /// Appends a NUL-terminated name.
    pub fn name(mut self, name: &str) -> WireResult<Self> {
        if name.as_bytes().contains(&0) {
            return Err(WireError::InteriorNul);
        }
        self.body.extend_from_slice(name.as_bytes());
        self.body.push(0);
        Ok(self)
    }

    /// Attaches payload bytes sent after the body without copying them
    /// until encoding.
    pub fn data(mut self, data: &'a [u8]) -> Self {
        self.trailer = data;
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn nodeid(&self) -> u64 {
        self.nodeid
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        size_of::<InHeader>() + self.body.len() + self.trailer.len()
    }

    /// Serializes the request with the given unique id.
    pub fn encode(&self, unique: u64) -> WireResult<Vec<u8>> {
        let total = self.encoded_len();
        let len = u32::try_from(total).map_err(|_| WireError::TooLarge(total))?;

        let header = InHeader {
            len,
            opcode: self.opcode as u32,
            unique,
            nodeid: self.nodeid,
            uid: self.credentials.uid,
            gid: self.credentials.gid,
            pid: self.credentials.pid,
            padding: 0,
        };

        let mut out = Vec::new();
        out.try_reserve_exact(total)
            .map_err(|_| WireError::Allocation(total))?;
        out.extend_from_slice(bytes_of(&header));
        out.extend_from_slice(&self.body);
        out.extend_from_slice(self.trailer);
        Ok(out)
    }
}
