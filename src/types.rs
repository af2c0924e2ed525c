//! Core data model: volumes, assignments, mount records, and the lifecycle
//! request/response types.
//!
//! These types are shared by the driver façade, the lifecycle state machine,
//! and the backend capability traits.  They are all [`Serialize`] /
//! [`Deserialize`]: the idempotency guard fingerprints requests by their
//! canonical JSON form.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Opaque, cluster-unique identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

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

/// Identifier of a node on which volumes are staged and published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Backend-reported local device path for an attached volume,
/// e.g. `/dev/drbd1000`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub String);

impl DeviceHandle {
    /// View the handle as a plain path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
///
/// The `*Many` modes request multi-node attachment; they are honored only
/// when the backend advertises multi-attach support.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

impl AccessMode {
    /// Whether the mode forbids writes.
    pub fn read_only(self) -> bool {
        matches!(self, Self::ReadOnlyMany)
    }

    /// Whether the mode requests attachment on more than one node.
    pub fn multi_node(self) -> bool {
        matches!(self, Self::ReadOnlyMany | Self::ReadWriteMany)
    }
}

/// Whether a volume is consumed as a mounted filesystem or a raw block
/// device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeMode {
    /// Volume is formatted and mounted as a filesystem.
    Filesystem,
    /// Volume is exposed as a raw block device.
    Block,
}

/// The capability requested for a volume by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Filesystem vs. raw block consumption.
    pub volume_mode: VolumeMode,
    /// Filesystem type for `Filesystem` volumes.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

fn default_fs_type() -> String {
    "ext4".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            volume_mode: VolumeMode::Filesystem,
            fs_type: default_fs_type(),
            mount_flags: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend-owned records
// ---------------------------------------------------------------------------

/// A provisioned volume as reported by the backend cluster.
///
/// The backend owns this record; the core only holds it for the lifetime of
/// a request and never caches it across calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Cluster-assigned unique identifier.
    pub volume_id: VolumeId,
    /// Caller-supplied name, unique within the cluster.
    pub name: String,
    /// Provisioned capacity in bytes.  Never decreases once provisioned.
    pub capacity_bytes: u64,
    /// Placement / storage-pool hints forwarded at creation time
    /// (e.g. `autoPlace`, `storagePool`).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// An active attachment of a volume to a node.
///
/// At most one assignment exists per (volume, node) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    /// The attached volume.
    pub volume_id: VolumeId,
    /// The node the volume is attached to.
    pub node_id: NodeId,
    /// Local device path the backend exposed on that node.
    pub device: DeviceHandle,
}

/// An active mount of a source (device or staged path) at a target path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountRecord {
    /// Mount source: a device handle path or a staging path.
    pub source: String,
    /// Mount target path.
    pub target: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Lifecycle requests
// ---------------------------------------------------------------------------

/// Request to provision a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateVolumeRequest {
    /// Cluster-unique volume name.
    pub name: String,
    /// Requested capacity in bytes.
    pub required_bytes: u64,
    /// Requested capability.
    #[serde(default)]
    pub capability: Option<VolumeCapability>,
    /// Placement / storage-pool hints forwarded to the backend.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Request to stage a volume on a node: attach it and mount it at an
/// internal staging path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Node the volume is staged on.
    pub node_id: NodeId,
    /// Internal staging mount point, e.g. `/var/lib/driver/<vol>/globalmount`.
    pub staging_path: String,
    /// Requested capability.
    pub capability: VolumeCapability,
}

/// Request to publish a staged volume into the caller-visible target path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Node the volume is staged on.
    pub node_id: NodeId,
    /// The staging mount point created by the stage operation.
    pub staging_path: String,
    /// Caller-visible target path.
    pub target_path: String,
    /// Requested capability.
    pub capability: VolumeCapability,
    /// Whether the published mount must be read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Request to remove a published mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnpublishVolumeRequest {
    /// Volume being unpublished.
    pub volume_id: VolumeId,
    /// Node the volume was published on.
    pub node_id: NodeId,
    /// The target path to unmount.
    pub target_path: String,
}

/// Request to unstage a volume: unmount the staging path and detach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnstageVolumeRequest {
    /// Volume being unstaged.
    pub volume_id: VolumeId,
    /// Node the volume was staged on.
    pub node_id: NodeId,
    /// The staging mount point to tear down.
    pub staging_path: String,
}

/// Request to grow a volume in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpandVolumeRequest {
    /// Volume to expand.
    pub volume_id: VolumeId,
    /// New capacity in bytes.  Must not be smaller than the current
    /// capacity.
    pub required_bytes: u64,
}

// ---------------------------------------------------------------------------
// Lifecycle responses
// ---------------------------------------------------------------------------

/// The view returned to the caller after a successful stage operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagedVolume {
    /// The staged volume.
    pub volume_id: VolumeId,
    /// The node it is staged on.
    pub node_id: NodeId,
    /// The local device the backend attached.
    pub device: DeviceHandle,
    /// The staging mount point.
    pub staging_path: String,
}

/// Successful outcome of any lifecycle operation.
///
/// The idempotency guard caches values of this type so that a retried
/// request observes the original result without re-executing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LifecycleResponse {
    /// Volume provisioned (or found already provisioned).
    Created(Volume),
    /// Volume staged on a node.
    Staged(StagedVolume),
    /// Volume published at the target path.
    Published,
    /// Target path unmounted (or already absent).
    Unpublished,
    /// Staging mount and assignment removed (or already absent).
    Unstaged,
    /// Volume deleted (or already absent).
    Deleted,
    /// Volume expanded; carries the final capacity.
    Expanded {
        /// Capacity after expansion, in bytes.
        capacity_bytes: u64,
    },
}
