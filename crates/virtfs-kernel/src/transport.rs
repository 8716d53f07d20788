//! Transport channel.
//!
//! The device is a blocking exchange: one request buffer in, one response
//! buffer out. [`Channel`] owns the unique-id sequence, serializes
//! exchanges so each response belongs to the request just sent, and turns
//! negative result codes into [`FsError::Protocol`].

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use virtfs_wire::{Credentials, Opcode, Request, Response};

use crate::error::{FsError, FsResult};

/// Blocking send/receive primitive to the remote filesystem service.
pub trait Transport: Send + Sync {
    /// Sends `request` and fills `response`, returning the number of bytes
    /// the device wrote.
    fn exchange(&self, request: &[u8], response: &mut [u8]) -> io::Result<usize>;

    /// Device-level volume label, when the device exposes one.
    fn volume_label(&self) -> io::Result<String> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&self, request: &[u8], response: &mut [u8]) -> io::Result<usize> {
        (**self).exchange(request, response)
    }

    fn volume_label(&self) -> io::Result<String> {
        (**self).volume_label()
    }
}

/// What to do when a reply's declared length differs from what arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthPolicy {
    /// Log the mismatch and use the bytes that arrived.
    #[default]
    Lenient,
    /// Reject the reply as malformed.
    Strict,
}

/// An owned reply: the receive buffer plus the byte count the device wrote.
#[derive(Debug)]
pub struct Reply {
    buf: Vec<u8>,
    received: usize,
}

impl Reply {
    /// Borrows the parsed view of the reply.
    pub fn response(&self) -> FsResult<Response<'_>> {
        Ok(Response::parse(&self.buf, self.received)?)
    }
}

pub struct Channel<T> {
    transport: T,
    next_unique: AtomicU64,
    lock: Mutex<()>,
    policy: LengthPolicy,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T, policy: LengthPolicy) -> Self {
        Self {
            transport,
            next_unique: AtomicU64::new(1),
            lock: Mutex::new(()),
            policy,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> LengthPolicy {
        self.policy
    }

    /// Starts a request from this process with uid/gid zero.
    pub fn request(&self, opcode: Opcode, nodeid: u64) -> Request<'static> {
        Request::new(opcode, nodeid).with_credentials(Credentials {
            uid: 0,
            gid: 0,
            pid: std::process::id(),
        })
    }

    /// Sends one request and waits for its reply.
    ///
    /// `capacity` is the payload size expected beyond the response header.
    pub fn call(&self, request: &Request<'_>, capacity: usize) -> FsResult<Reply> {
        let opcode = request.opcode();
        let unique = self.next_unique.fetch_add(1, Ordering::Relaxed);
        let bytes = request.encode(unique)?;

        let size = RESPONSE_HEADER_LEN + capacity;
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| FsError::resource(format!("{size} byte response buffer for {opcode}")))?;
        buf.resize(size, 0);

        let received = {
            let _guard = self.lock.lock();
            self.transport.exchange(&bytes, &mut buf)?
        };

        let reply = Reply { buf, received };
        let response = reply.response()?;
        debug!(
            %opcode,
            unique,
            nodeid = request.nodeid(),
            sent = bytes.len(),
            received,
            error = response.error(),
            "round trip"
        );

        if response.declared_len() != received {
            match self.policy {
                LengthPolicy::Lenient => warn!(
                    %opcode,
                    unique,
                    declared = response.declared_len(),
                    received,
                    "response length mismatch"
                ),
                LengthPolicy::Strict => {
                    return Err(FsError::Wire(virtfs_wire::WireError::Truncated {
                        received,
                        needed: response.declared_len(),
                    }));
                }
            }
        }
        if response.unique() != unique {
            debug!(%opcode, sent = unique, echoed = response.unique(), "unique id not echoed");
        }

        if response.error() < 0 {
            return Err(FsError::protocol(opcode, response.error()));
        }
        Ok(reply)
    }
}

const RESPONSE_HEADER_LEN: usize = std::mem::size_of::<virtfs_wire::abi::OutHeader>();

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::bytes_of;
    use virtfs_wire::abi::{InHeader, OutHeader};

    /// Replies with a fixed errno and a declared length padding.
    struct Echo {
        error: i32,
        extra_declared: u32,
        seen: Mutex<Vec<InHeader>>,
    }

    impl Echo {
        fn new(error: i32, extra_declared: u32) -> Self {
            Self { error, extra_declared, seen: Mutex::new(Vec::new()) }
        }
    }

    impl Transport for Echo {
        fn exchange(&self, request: &[u8], response: &mut [u8]) -> io::Result<usize> {
            let header: InHeader = bytemuck::pod_read_unaligned(&request[..40]);
            self.seen.lock().push(header);
            let out = OutHeader { len: 16 + self.extra_declared, error: self.error, unique: header.unique };
            response[..16].copy_from_slice(bytes_of(&out));
            Ok(16)
        }
    }

    struct Broken;

    impl Transport for Broken {
        fn exchange(&self, _: &[u8], _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device closed"))
        }
    }

    #[test]
    fn test_unique_ids_increase() {
        let channel = Channel::new(Echo::new(0, 0), LengthPolicy::Lenient);
        for _ in 0..3 {
            channel.call(&Request::new(Opcode::Statfs, 1), 0).unwrap();
        }
        let seen = channel.transport().seen.lock();
        let ids: Vec<u64> = seen.iter().map(|h| h.unique).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_request_stamps_pid() {
        let channel = Channel::new(Echo::new(0, 0), LengthPolicy::Lenient);
        channel.call(&channel.request(Opcode::Getattr, 4), 0).unwrap();
        let seen = channel.transport().seen.lock();
        assert_eq!(seen[0].pid, std::process::id());
        assert_eq!((seen[0].uid, seen[0].gid), (0, 0));
        assert_eq!(seen[0].nodeid, 4);
    }

    #[test]
    fn test_negative_result_is_protocol_error() {
        let channel = Channel::new(Echo::new(-2, 0), LengthPolicy::Lenient);
        let err = channel.call(&Request::new(Opcode::Lookup, 1), 128).unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::NotFound));
    }

    #[test]
    fn test_length_policy() {
        let lenient = Channel::new(Echo::new(0, 8), LengthPolicy::Lenient);
        let reply = lenient.call(&Request::new(Opcode::Flush, 2), 0).unwrap();
        assert!(reply.response().unwrap().payload().is_empty());

        let strict = Channel::new(Echo::new(0, 8), LengthPolicy::Strict);
        let err = strict.call(&Request::new(Opcode::Flush, 2), 0).unwrap_err();
        assert!(matches!(err, FsError::Wire(_)));
    }

    #[test]
    fn test_transport_failure() {
        let channel = Channel::new(Broken, LengthPolicy::Lenient);
        let err = channel.call(&Request::new(Opcode::Getattr, 1), 104).unwrap_err();
        assert!(matches!(err, FsError::Transport(_)));
    }
}
