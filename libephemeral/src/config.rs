//! Driver configuration.
//!
//! Built by the process bootstrap (flags and `RKCSI_*` environment variables)
//! and handed to [`EphemeralDriver`](crate::driver::EphemeralDriver).

use std::path::PathBuf;

use crate::error::CsiError;
use crate::types::DEFAULT_CAPACITY_BYTES;

/// Name the plugin registers under.
pub const DEFAULT_DRIVER_NAME: &str = "ephemeral.csi.local";

/// Where volume directories live unless configured otherwise.
pub const DEFAULT_BASE_DIR: &str = "/var/lib/ephemeral-csi";

/// Static configuration of one plugin instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub driver_name: String,
    pub vendor_version: String,
    /// Identity of this node; must not be empty.
    pub node_id: String,
    /// Directory holding one sub-directory per volume.
    pub base_dir: PathBuf,
    /// Value answered by `GetCapacity`.
    pub reported_capacity_bytes: u64,
    /// Advertised by `NodeGetInfo`; 0 means unlimited.
    pub max_volumes_per_node: u64,
}

impl DriverConfig {
    /// Defaults for everything but the node id.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            node_id: node_id.into(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            reported_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            max_volumes_per_node: 0,
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_reported_capacity(mut self, bytes: u64) -> Self {
        self.reported_capacity_bytes = bytes;
        self
    }

    /// Reject configurations the driver cannot run with.
    pub fn validate(&self) -> Result<(), CsiError> {
        if self.node_id.trim().is_empty() {
            return Err(CsiError::InvalidArgument("node id is required".into()));
        }
        if self.driver_name.is_empty() {
            return Err(CsiError::InvalidArgument("driver name is required".into()));
        }
        if !self.base_dir.is_absolute() {
            return Err(CsiError::InvalidArgument(format!(
                "base directory must be absolute, got {}",
                self.base_dir.display()
            )));
        }
        Ok(())
    }
}
