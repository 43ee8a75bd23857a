//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between a CSI caller (kubelet-side shim, control plane)
//! and the plugin via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests ----------------------------------------------
    GetPluginInfo,
    GetPluginCapabilities,
    Probe,

    // ----- Controller requests --------------------------------------------
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(VolumeId),
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    ListVolumes,
    GetCapacity,
    ControllerGetCapabilities,
    ControllerPublishVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    ControllerUnpublishVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    CreateSnapshot {
        source_volume_id: VolumeId,
        name: String,
    },
    DeleteSnapshot {
        snapshot_id: String,
    },
    ListSnapshots,
    ControllerExpandVolume {
        volume_id: VolumeId,
        required_bytes: i64,
    },

    // ----- Node requests --------------------------------------------------
    NodePublishVolume(NodePublishVolumeRequest),
    NodeUnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    NodeGetVolumeStats(VolumeId),
    NodeGetCapabilities,
    NodeGetInfo,
    NodeStageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    NodeUnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    NodeExpandVolume {
        volume_id: VolumeId,
        required_bytes: i64,
    },

    // ----- Responses ------------------------------------------------------
    PluginInfoResponse(PluginInfo),
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    ProbeResult(bool),
    VolumeCreated(CreateVolumeResponse),
    /// Capabilities confirmed for an existing volume.
    CapabilitiesConfirmed(Vec<VolumeCapability>),
    VolumeList(Vec<Volume>),
    /// Available capacity in bytes.
    Capacity(u64),
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    VolumeStats(VolumeUsage),
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// The request failed.
    Error(Status),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::Probe => f.write_str("Probe"),

            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({id})"),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({volume_id})")
            }
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity => f.write_str("GetCapacity"),
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::ControllerPublishVolume { volume_id, .. } => {
                write!(f, "ControllerPublishVolume({volume_id})")
            }
            Self::ControllerUnpublishVolume { volume_id, .. } => {
                write!(f, "ControllerUnpublishVolume({volume_id})")
            }
            Self::CreateSnapshot { name, .. } => write!(f, "CreateSnapshot(name={name})"),
            Self::DeleteSnapshot { snapshot_id } => write!(f, "DeleteSnapshot({snapshot_id})"),
            Self::ListSnapshots => f.write_str("ListSnapshots"),
            Self::ControllerExpandVolume { volume_id, .. } => {
                write!(f, "ControllerExpandVolume({volume_id})")
            }

            Self::NodePublishVolume(req) => write!(f, "NodePublishVolume({})", req.volume_id),
            Self::NodeUnpublishVolume { volume_id, .. } => {
                write!(f, "NodeUnpublishVolume({volume_id})")
            }
            Self::NodeGetVolumeStats(id) => write!(f, "NodeGetVolumeStats({id})"),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::NodeGetInfo => f.write_str("NodeGetInfo"),
            Self::NodeStageVolume { volume_id, .. } => write!(f, "NodeStageVolume({volume_id})"),
            Self::NodeUnstageVolume { volume_id, .. } => {
                write!(f, "NodeUnstageVolume({volume_id})")
            }
            Self::NodeExpandVolume { volume_id, .. } => {
                write!(f, "NodeExpandVolume({volume_id})")
            }

            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::VolumeCreated(resp) => write!(f, "VolumeCreated({})", resp.volume_id),
            Self::CapabilitiesConfirmed(caps) => {
                write!(f, "CapabilitiesConfirmed(count={})", caps.len())
            }
            Self::VolumeList(vs) => write!(f, "VolumeList(count={})", vs.len()),
            Self::Capacity(c) => write!(f, "Capacity({c})"),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::VolumeStats(usage) => write!(f, "VolumeStats(used={})", usage.used_bytes),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::Error(status) => write!(f, "Error({})", status.code()),
        }
    }
}
