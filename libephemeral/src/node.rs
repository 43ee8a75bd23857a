//! CSI Node service trait.
//!
//! The Node service runs on each worker node and makes volumes visible to
//! workloads:
//!
//! 1. **Publish**: bind-mount the volume directory at the target path.
//! 2. **Unpublish**: remove the bind mount and the target directory.
//!
//! Volumes are plain directories, so there is no staging step; stage,
//! unstage and expand answer [`CsiError::Unimplemented`] by default.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{NodeCapability, NodeInfo, NodePublishVolumeRequest, VolumeId, VolumeUsage};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Publish a volume: bind-mount it (or its `subPath`) at the target.
    ///
    /// Idempotent for the same target path.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount the target and remove it.
    ///
    /// Idempotent with respect to the target; the volume itself must exist.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Capacity and inode usage of the filesystem backing the volume.
    async fn get_volume_stats(&self, volume_id: &VolumeId) -> Result<VolumeUsage, CsiError>;

    /// Advertise the node RPCs this plugin implements.
    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    async fn stage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("NodeStageVolume".into()))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("NodeUnstageVolume".into()))
    }

    async fn node_expand_volume(
        &self,
        _volume_id: &VolumeId,
        _required_bytes: i64,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("NodeExpandVolume".into()))
    }
}
