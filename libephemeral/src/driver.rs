//! Ephemeral local-volume CSI driver.
//!
//! [`EphemeralDriver`] implements [`CsiIdentity`], [`CsiController`], and
//! [`CsiNode`] on top of a [`VolumeManager`].  The handlers here only check
//! that identifying fields are present and shape the answers; every state
//! change happens in the manager, and its errors are passed through as is.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::DriverConfig;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::fs::Executor;
use crate::identity::CsiIdentity;
use crate::manager::VolumeManager;
use crate::node::CsiNode;
use crate::types::*;

/// Identity, Controller and Node services of the plugin.
#[derive(Debug)]
pub struct EphemeralDriver {
    config: DriverConfig,
    manager: VolumeManager,
}

impl EphemeralDriver {
    /// Validate `config`, prepare the base directory and recover volumes
    /// left by a previous run.
    pub async fn new(config: DriverConfig, fs: Executor) -> Result<Self, CsiError> {
        config.validate()?;
        let manager = VolumeManager::open(config.base_dir.clone(), fs).await?;
        Ok(Self { config, manager })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The lifecycle manager behind the handlers.
    pub fn manager(&self) -> &VolumeManager {
        &self.manager
    }

    fn topology(&self) -> Topology {
        Topology {
            segments: HashMap::from([("node".to_owned(), self.config.node_id.clone())]),
        }
    }
}

fn require(value: &str, what: &str) -> Result<(), CsiError> {
    if value.trim().is_empty() {
        return Err(CsiError::InvalidArgument(format!("{what} is required")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for EphemeralDriver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.config.driver_name.clone(),
            vendor_version: self.config.vendor_version.clone(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![
            PluginCapability::ControllerService,
            PluginCapability::VolumeAccessibilityConstraints,
        ])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for EphemeralDriver {
    #[instrument(skip_all, fields(name = %req.name))]
    async fn create_volume(
        &self,
        req: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, CsiError> {
        require(&req.name, "volume name")?;

        let volume = self
            .manager
            .create_volume(&req.name, req.required_bytes, req.parameters)
            .await?;

        Ok(CreateVolumeResponse {
            volume_id: volume.volume_id,
            capacity_bytes: volume.capacity_bytes,
            volume_context: volume.parameters,
            accessible_topology: vec![self.topology()],
        })
    }

    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        require(volume_id.as_str(), "volume ID")?;
        self.manager.delete_volume(volume_id).await
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<Vec<VolumeCapability>, CsiError> {
        require(volume_id.as_str(), "volume ID")?;
        self.manager.get_volume(volume_id)?;
        // A directory can back any access mode on this node.
        Ok(capabilities.to_vec())
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        Ok(self.manager.list_volumes())
    }

    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Ok(self.config.reported_capacity_bytes)
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::ListVolumes,
            ControllerCapability::GetCapacity,
        ])
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for EphemeralDriver {
    #[instrument(skip_all, fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        require(req.volume_id.as_str(), "volume ID")?;
        require(&req.target_path, "target path")?;

        let read_only = req.read_only
            || req
                .volume_capability
                .as_ref()
                .is_some_and(|cap| cap.access_mode == AccessMode::ReadOnlyMany);
        if read_only != req.read_only {
            debug!("read-only access mode requested, publishing read-only");
        }

        self.manager
            .publish_volume(
                &req.volume_id,
                Path::new(&req.target_path),
                req.sub_path(),
                read_only,
            )
            .await
    }

    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        require(volume_id.as_str(), "volume ID")?;
        require(target_path, "target path")?;
        self.manager
            .unpublish_volume(volume_id, Path::new(target_path))
            .await
    }

    async fn get_volume_stats(&self, volume_id: &VolumeId) -> Result<VolumeUsage, CsiError> {
        require(volume_id.as_str(), "volume ID")?;
        self.manager.get_usage(volume_id).await
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![NodeCapability::GetVolumeStats])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: self.config.max_volumes_per_node,
            accessible_topology: Some(self.topology()),
        })
    }
}
