//! Backend capability interfaces.
//!
//! The orchestration core is written against three narrow contracts —
//! [`Provisioning`], [`Assignments`], and [`Mount`] — and never against a
//! concrete backend.  A deterministic in-memory implementation
//! ([`mock::MockBackend`]) and a real host-mount adapter
//! ([`host::HostMount`]) implement them uniformly; a remote-cluster adapter
//! plugs in the same way.  The core never branches on which implementation
//! is active.
//!
//! All authoritative volume, assignment, and mount state lives behind these
//! traits.  The core re-queries it on every transition instead of caching,
//! so a restarted driver reconverges with backend truth on its first call.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::types::{Assignment, DeviceHandle, MountRecord, NodeId, Volume, VolumeId};

pub mod host;
pub mod mock;

/// Features a backend advertises to the lifecycle state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// The backend can attach one volume to multiple nodes at once.
    pub multi_attach: bool,
    /// The backend can grow a volume while it is attached.
    pub online_expand: bool,
}

/// Volume provisioning: create, delete, describe, and expand volumes in the
/// backend cluster.
#[async_trait]
pub trait Provisioning: Send + Sync {
    /// Provision a volume with the given name, capacity, and placement
    /// hints.  The backend assigns the [`VolumeId`].
    ///
    /// Name uniqueness is *not* enforced here; the lifecycle state machine
    /// resolves idempotent and conflicting creates via
    /// [`describe_by_name`](Self::describe_by_name) before calling this.
    async fn create(
        &self,
        name: &str,
        size_bytes: u64,
        parameters: &HashMap<String, String>,
    ) -> Result<Volume, DriverError>;

    /// Delete a volume.  Deleting an absent volume is not an error.
    async fn delete(&self, volume_id: &VolumeId) -> Result<(), DriverError>;

    /// Look up a volume by its backend-assigned ID.
    async fn describe(&self, volume_id: &VolumeId) -> Result<Option<Volume>, DriverError>;

    /// Look up a volume by its caller-supplied name.
    async fn describe_by_name(&self, name: &str) -> Result<Option<Volume>, DriverError>;

    /// Grow a volume to `new_size_bytes` and return the resulting capacity.
    async fn expand(&self, volume_id: &VolumeId, new_size_bytes: u64)
    -> Result<u64, DriverError>;

    /// Capabilities this backend advertises.
    async fn capabilities(&self) -> Result<BackendCapabilities, DriverError>;
}

/// Volume assignment: expose volumes to nodes as local devices.
#[async_trait]
pub trait Assignments: Send + Sync {
    /// Make the volume locally accessible on `node_id` and return the device
    /// handle.  Attaching an already-attached (volume, node) pair returns
    /// the existing handle.
    async fn attach(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
    ) -> Result<DeviceHandle, DriverError>;

    /// Remove the volume's assignment from `node_id`.  Detaching an absent
    /// assignment is not an error.
    async fn detach(&self, volume_id: &VolumeId, node_id: &NodeId) -> Result<(), DriverError>;

    /// All active assignments of the volume.
    async fn describe(&self, volume_id: &VolumeId) -> Result<Vec<Assignment>, DriverError>;
}

/// Host mount operations: place devices and staged paths at filesystem
/// targets.
#[async_trait]
pub trait Mount: Send + Sync {
    /// Mount `source` (a device handle path or a staging path) at `target`.
    ///
    /// Mounting a target that is already mounted from the same source is a
    /// no-op; a target mounted from a *different* source is a conflict and
    /// must fail with [`DriverError::AlreadyExists`].
    async fn mount(&self, source: &str, target: &str, read_only: bool)
    -> Result<(), DriverError>;

    /// Unmount `target`.  Unmounting a path that is not mounted is not an
    /// error.
    async fn unmount(&self, target: &str) -> Result<(), DriverError>;

    /// Whether `target` is currently a mount point.
    async fn is_mounted(&self, target: &str) -> Result<bool, DriverError>;

    /// All active mounts whose source is `source`.  Used to find the live
    /// publishes of a staged volume.
    async fn mounts_from(&self, source: &str) -> Result<Vec<MountRecord>, DriverError>;
}
