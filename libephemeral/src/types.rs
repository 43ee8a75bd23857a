//! Core CSI types: volumes, capabilities, requests, and topology.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and the lifecycle manager.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Capacity assigned when a request asks for zero or a negative size (1 GiB).
pub const DEFAULT_CAPACITY_BYTES: u64 = 1 << 30;

/// Creation parameter naming the pod that owns the volume.
pub const PARAM_POD_ID: &str = "podID";

/// Creation parameter carrying the retention policy.
pub const PARAM_RETENTION_POLICY: &str = "retentionPolicy";

/// Volume context key selecting a sub-directory to publish instead of the
/// volume root.
pub const CTX_SUB_PATH: &str = "subPath";

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type, if the caller cares.  Local directories ignore it.
    #[serde(default)]
    pub fs_type: Option<String>,
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            mount_flags: Vec::new(),
            fs_type: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// A locally backed volume as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier, derived from `name`.
    pub volume_id: VolumeId,
    /// Caller-supplied name the id was derived from.
    pub name: String,
    /// Backing directory, always `<base_dir>/<volume_id>`.
    pub path: PathBuf,
    /// Requested capacity in bytes.  Bookkeeping only, never enforced.
    pub capacity_bytes: u64,
    /// Parameters from the creation request, echoed back as volume context.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Owning pod, copied from the `podID` parameter.
    #[serde(default)]
    pub pod_owner: Option<String>,
    /// Retention policy, copied from the `retentionPolicy` parameter.
    #[serde(default)]
    pub retention_policy: Option<String>,
    /// Targets the volume is currently bind-mounted at.
    #[serde(default)]
    pub mount_targets: BTreeSet<PathBuf>,
    /// Sub-directory exposed by the most recent publish, if any.
    #[serde(default)]
    pub sub_path: Option<String>,
    /// Bytes in use as of the last stats query.
    #[serde(default)]
    pub usage_bytes: u64,
    /// Unix timestamp (seconds) of the last stats query.
    #[serde(default)]
    pub last_access: Option<u64>,
}

impl Volume {
    /// Build a freshly created, unpublished volume.
    pub fn new(
        volume_id: VolumeId,
        name: impl Into<String>,
        path: PathBuf,
        capacity_bytes: u64,
        parameters: HashMap<String, String>,
    ) -> Self {
        Self {
            pod_owner: parameters.get(PARAM_POD_ID).cloned(),
            retention_policy: parameters.get(PARAM_RETENTION_POLICY).cloned(),
            volume_id,
            name: name.into(),
            path,
            capacity_bytes,
            parameters,
            mount_targets: BTreeSet::new(),
            sub_path: None,
            usage_bytes: 0,
            last_access: None,
        }
    }

    /// Whether the volume is bind-mounted anywhere.
    pub fn is_published(&self) -> bool {
        !self.mount_targets.is_empty()
    }
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Topology segments, e.g. `{"node": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

/// Capacity and inode usage of the filesystem backing a volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUsage {
    /// Total size of the filesystem in bytes.
    pub total_bytes: u64,
    /// `total_bytes - available_bytes`.
    pub used_bytes: u64,
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
    /// Total number of inodes.
    pub total_inodes: u64,
    /// `total_inodes - free_inodes`.
    pub used_inodes: u64,
    /// Free inodes.
    pub free_inodes: u64,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Name the volume id is derived from.
    pub name: String,
    /// Required capacity in bytes; zero or negative selects
    /// [`DEFAULT_CAPACITY_BYTES`].
    #[serde(default)]
    pub required_bytes: i64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Opaque parameters, stored and echoed back.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Answer to a successful `CreateVolume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateVolumeResponse {
    /// Assigned volume id.
    pub volume_id: VolumeId,
    /// Capacity recorded for the volume.
    pub capacity_bytes: u64,
    /// Creation parameters, echoed.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Node the volume lives on.
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Request to publish (bind-mount) a volume at a target path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Target path, e.g. `/var/lib/kubelet/pods/<uid>/volumes/<name>/mount`.
    pub target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Volume context; `subPath` selects a sub-directory to publish.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
    /// The requested sub-path, treating an empty string as absent.
    pub fn sub_path(&self) -> Option<&str> {
        self.volume_context
            .get(CTX_SUB_PATH)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"ephemeral.csi.local"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// RPCs the Controller service implements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    ListVolumes,
    GetCapacity,
}

/// RPCs the Node service implements beyond publish / unpublish.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    GetVolumeStats,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host, 0 meaning no limit.
    pub max_volumes: u64,
    /// Optional topology of this node.
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}
