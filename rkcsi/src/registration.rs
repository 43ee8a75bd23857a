//! Discovery file telling node agents where the plugin listens.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const REGISTRATION_FILE: &str = "registration.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub driver_name: String,
    pub endpoint: SocketAddr,
    pub node_id: String,
}

impl Registration {
    /// Write the record to `<dir>/registration.json`, replacing any previous
    /// one, and return the path written.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create registration dir {}", dir.display()))?;
        let path = dir.join(REGISTRATION_FILE);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self).context("Failed to encode registration")?;
        fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move registration into {}", path.display()))?;
        Ok(path)
    }
}

/// Address to register: `advertise` if given, else the bound address.
pub fn advertised_endpoint(advertise: Option<SocketAddr>, bound: SocketAddr) -> SocketAddr {
    advertise.unwrap_or(bound)
}

/// Remove the registration file; a missing file is fine.
pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
