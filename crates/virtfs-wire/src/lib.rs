//! FUSE wire codec for the virtio-fs shared folder bridge.
//!
//! Requests are assembled with [`Request`], replies are viewed through
//! [`Response`], and READDIRPLUS payloads are walked with
//! [`DirentPlusCursor`]. All records live in [`abi`].
//!
//! ## Design Decisions
//!
//! - **Host byte order.** The device forwards messages unchanged, so
//!   records are plain `#[repr(C)]` structs read and written as bytes.
//! - **Lengths are derived.** A request's `len` is computed from its parts
//!   and a reply's payload is bounded by both the declared and received
//!   lengths. Callers decide whether a mismatch is fatal.
//! - **No transport here.** This crate only encodes and decodes.

pub mod abi;
pub mod dirent;
pub mod error;
pub mod request;
pub mod response;

pub use abi::{Opcode, ROOT_ID, SetattrValid};
pub use dirent::{DirentPlus, DirentPlusCursor, push_direntplus};
pub use error::{WireError, WireResult};
pub use request::{Credentials, Request};
pub use response::Response;
