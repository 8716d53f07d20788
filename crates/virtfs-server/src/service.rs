//! Service lifecycle.
//!
//! [`Service::start`] connects the bridge (INIT plus the root lookup), then
//! hands the volume parameters to a [`Dispatcher`]. [`Service::stop`]
//! unregisters and drops the bridge. Both are idempotent in the direction
//! that matters: stopping a stopped service is a no-op, starting a running
//! one is an error.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use virtfs_kernel::loopback::MemoryServer;
use virtfs_kernel::{Dispatcher, FsError, Transport, VirtFs, VolumeParams};

use crate::config::{ServerConfig, TransportConfig};

/// Mode bits for seeded directories and files.
const SEED_DIR_MODE: u32 = 0o755;
const SEED_FILE_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service is already running")]
    AlreadyRunning,

    #[error("bridge startup failed: {0}")]
    Bridge(#[from] FsError),

    #[error("dispatcher failed to start: {0}")]
    Dispatcher(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to seed {path}: errno {errno}")]
    Seed { path: String, errno: i32 },
}

/// Builds the transport described by `config`.
pub fn build_transport(config: &TransportConfig) -> Result<MemoryServer, ServiceError> {
    match config {
        TransportConfig::Loopback {
            root_uid,
            root_gid,
            label,
            seed,
        } => {
            let mut server = MemoryServer::new(*root_uid, *root_gid);
            if let Some(label) = label {
                server = server.with_label(label.clone());
            }
            for path in seed {
                let created = match path.strip_suffix('/') {
                    Some(dir) => server.add_dir(dir, SEED_DIR_MODE),
                    None => server.add_file(path, SEED_FILE_MODE, &[]),
                };
                created.map_err(|errno| ServiceError::Seed {
                    path: path.clone(),
                    errno,
                })?;
            }
            Ok(server)
        }
    }
}

/// Dispatcher stand-in that records registration in the log.
///
/// Used when no framework is present, so `serve` still exercises startup,
/// parameter assembly and shutdown.
#[derive(Debug, Default)]
pub struct LoggingDispatcher {
    mounted: Option<VolumeParams>,
}

impl LoggingDispatcher {
    pub fn params(&self) -> Option<&VolumeParams> {
        self.mounted.as_ref()
    }
}

impl Dispatcher for LoggingDispatcher {
    type Error = std::convert::Infallible;

    fn start(&mut self, params: &VolumeParams, mount_point: Option<&str>) -> Result<(), Self::Error> {
        info!(
            file_system = %params.file_system_name,
            prefix = ?params.prefix,
            mount_point = mount_point.unwrap_or("<auto>"),
            sector_size = params.sector_size,
            "volume registered"
        );
        self.mounted = Some(params.clone());
        Ok(())
    }

    fn stop(&mut self) {
        if self.mounted.take().is_some() {
            info!("volume unregistered");
        }
    }
}

pub struct Service<T: Transport, D: Dispatcher> {
    config: ServerConfig,
    dispatcher: D,
    fs: Option<Arc<VirtFs<T>>>,
}

impl<T: Transport, D: Dispatcher> Service<T, D> {
    pub fn new(config: ServerConfig, dispatcher: D) -> Self {
        Self {
            config,
            dispatcher,
            fs: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.fs.is_some()
    }

    /// The live bridge, while running.
    pub fn file_system(&self) -> Option<&Arc<VirtFs<T>>> {
        self.fs.as_ref()
    }

    pub fn start(&mut self, transport: T) -> Result<Arc<VirtFs<T>>, ServiceError> {
        if self.fs.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let fs = VirtFs::connect(transport, self.config.bridge.clone())?;
        let params = fs.volume_params();
        self.dispatcher
            .start(&params, self.config.mount_point.as_deref())
            .map_err(|e| ServiceError::Dispatcher(Box::new(e)))?;

        info!(service = %self.config.service_name, "service started");
        let fs = Arc::new(fs);
        self.fs = Some(Arc::clone(&fs));
        Ok(fs)
    }

    pub fn stop(&mut self) {
        let Some(fs) = self.fs.take() else {
            return;
        };
        self.dispatcher.stop();
        if Arc::strong_count(&fs) > 1 {
            warn!("bridge still referenced after stop");
        }
        info!(service = %self.config.service_name, "service stopped");
    }
}

impl<T: Transport, D: Dispatcher> Drop for Service<T, D> {
    fn drop(&mut self) {
        self.stop();
    }
}
