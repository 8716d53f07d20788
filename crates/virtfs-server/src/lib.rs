//! # virtfs-server
//!
//! Hosts the virtio-fs bridge as a service: loads configuration, builds the
//! transport, connects [`virtfs_kernel::VirtFs`] and registers the volume
//! with a dispatcher.

pub mod config;
pub mod probe;
pub mod service;

pub use config::{ConfigError, ServerConfig, TransportConfig};
pub use probe::{ProbeEntry, ProbeReport, probe};
pub use service::{LoggingDispatcher, Service, ServiceError, build_transport};
