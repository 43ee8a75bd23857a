//! CSI Controller service trait.
//!
//! The Controller service manages the volume lifecycle on the storage side:
//! creation, deletion, capability validation, listing, and capacity queries.
//! Remote attach, snapshots and expansion have default implementations that
//! answer [`CsiError::Unimplemented`]; a local-directory plugin has nothing
//! to attach, snapshot or grow.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, CreateVolumeRequest, CreateVolumeResponse, Volume, VolumeCapability,
    VolumeId,
};

/// Controller service: volume provisioning.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume, or return the existing one for a repeated
    /// name.
    async fn create_volume(
        &self,
        req: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Confirm the requested capabilities for an existing volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<Vec<VolumeCapability>, CsiError>;

    /// List all volumes known to this controller.
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError>;

    /// Return the available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError>;

    /// Advertise the controller RPCs this plugin implements.
    async fn controller_get_capabilities(&self)
    -> Result<Vec<ControllerCapability>, CsiError>;

    async fn controller_publish_volume(
        &self,
        _volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerPublishVolume".into()))
    }

    async fn controller_unpublish_volume(
        &self,
        _volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerUnpublishVolume".into()))
    }

    async fn create_snapshot(
        &self,
        _source_volume_id: &VolumeId,
        _name: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("CreateSnapshot".into()))
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("DeleteSnapshot".into()))
    }

    async fn list_snapshots(&self) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ListSnapshots".into()))
    }

    async fn controller_expand_volume(
        &self,
        _volume_id: &VolumeId,
        _required_bytes: i64,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerExpandVolume".into()))
    }
}
