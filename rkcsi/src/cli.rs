//! Command-line flags.  Every flag can also be set through an `RKCSI_*`
//! environment variable, which is how the DaemonSet manifest configures it.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use libephemeral::DriverConfig;
use libephemeral::config::{DEFAULT_BASE_DIR, DEFAULT_DRIVER_NAME};
use libephemeral::types::DEFAULT_CAPACITY_BYTES;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rkcsi", version, about = "Local ephemeral volume CSI plugin")]
pub struct Cli {
    /// UDP address the QUIC listener binds to
    #[arg(long, env = "RKCSI_ENDPOINT", default_value = "0.0.0.0:10000")]
    pub endpoint: SocketAddr,

    /// Address written to the registration file for node agents to dial.
    /// Defaults to the bound address, which is not routable when the
    /// listener binds a wildcard address
    #[arg(long, env = "RKCSI_ADVERTISE_ADDR")]
    pub advertise_addr: Option<SocketAddr>,

    /// Identity of this node, reported by NodeGetInfo and used as topology
    #[arg(long, env = "RKCSI_NODE_ID")]
    pub node_id: String,

    /// Directory holding one sub-directory per volume
    #[arg(long, env = "RKCSI_BASE_PATH", value_name = "DIR", default_value = DEFAULT_BASE_DIR)]
    pub base_path: PathBuf,

    /// Name the plugin registers under
    #[arg(long, env = "RKCSI_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// PEM certificate chain presented to callers
    #[arg(long, env = "RKCSI_TLS_CERT", value_name = "FILE")]
    pub tls_cert: PathBuf,

    /// PEM private key matching `--tls-cert`
    #[arg(long, env = "RKCSI_TLS_KEY", value_name = "FILE")]
    pub tls_key: PathBuf,

    /// Directory the registration file is written to
    #[arg(
        long,
        env = "RKCSI_REGISTRATION_DIR",
        value_name = "DIR",
        default_value = "/var/lib/kubelet/plugins/ephemeral.csi.local"
    )]
    pub registration_dir: PathBuf,

    /// Capacity answered by GetCapacity
    #[arg(long, env = "RKCSI_CAPACITY_BYTES", default_value_t = DEFAULT_CAPACITY_BYTES)]
    pub capacity_bytes: u64,

    /// Maximum number of volumes advertised by NodeGetInfo, 0 for no limit
    #[arg(long, env = "RKCSI_MAX_VOLUMES", default_value_t = 0)]
    pub max_volumes: u64,

    /// Log output format
    #[arg(long, env = "RKCSI_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn driver_config(&self) -> DriverConfig {
        let mut config = DriverConfig::new(self.node_id.clone())
            .with_base_dir(self.base_path.clone())
            .with_reported_capacity(self.capacity_bytes);
        config.driver_name = self.driver_name.clone();
        config.max_volumes_per_node = self.max_volumes;
        config
    }
}
