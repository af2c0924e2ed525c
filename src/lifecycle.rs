//! Volume lifecycle state machine.
//!
//! [`LifecycleEngine`] owns the transition rules
//! `Unprovisioned → Provisioned → Staged(node) → Published(node, path)`
//! (with `Deleted` reachable only from `Provisioned`) and executes them
//! against the backend capability traits.
//!
//! The engine keeps no authoritative state of its own: a volume's current
//! stage is re-derived from backend queries (`describe`, assignment
//! enumeration, mount-table lookups) at the start of every transition.  A
//! failed transition therefore never leaves a half-created record that a
//! later call could trust; the next call simply observes backend truth
//! again.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::backend::{Assignments, Mount, Provisioning};
use crate::error::DriverError;
use crate::types::{
    CreateVolumeRequest, ExpandVolumeRequest, NodeId, PublishVolumeRequest, StageVolumeRequest,
    StagedVolume, UnpublishVolumeRequest, UnstageVolumeRequest, Volume, VolumeId,
};

/// Observed lifecycle stage of a volume with respect to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeStage {
    /// No volume with this identity exists in the backend.
    Unprovisioned,
    /// The volume exists but is not usable on the node.
    Provisioned,
    /// The volume is attached and mounted at its staging path on the node.
    Staged {
        /// The node holding the staging mount.
        node: NodeId,
    },
    /// The volume is bound into a caller-visible target path on the node.
    Published {
        /// The node holding the mounts.
        node: NodeId,
        /// The caller-visible target path.
        target_path: String,
    },
}

/// Executes lifecycle transitions against the backend capabilities.
pub struct LifecycleEngine {
    provisioning: Arc<dyn Provisioning>,
    assignments: Arc<dyn Assignments>,
    mount: Arc<dyn Mount>,
}

impl LifecycleEngine {
    /// Build an engine over the given backend capabilities.
    pub fn new(
        provisioning: Arc<dyn Provisioning>,
        assignments: Arc<dyn Assignments>,
        mount: Arc<dyn Mount>,
    ) -> Self {
        Self {
            provisioning,
            assignments,
            mount,
        }
    }

    /// Derive the volume's current stage on `node_id` from backend state.
    pub async fn observe_stage(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
        staging_path: &str,
    ) -> Result<VolumeStage, DriverError> {
        if self.provisioning.describe(volume_id).await?.is_none() {
            return Ok(VolumeStage::Unprovisioned);
        }
        let assigned = self.assignments.describe(volume_id).await?;
        if !assigned.iter().any(|a| &a.node_id == node_id) {
            return Ok(VolumeStage::Provisioned);
        }
        if !self.mount.is_mounted(staging_path).await? {
            // Attached but the staging mount is gone; the node cannot use it
            // until it is staged again.
            return Ok(VolumeStage::Provisioned);
        }
        let published = self.mount.mounts_from(staging_path).await?;
        match published.first() {
            Some(record) => Ok(VolumeStage::Published {
                node: node_id.clone(),
                target_path: record.target.clone(),
            }),
            None => Ok(VolumeStage::Staged {
                node: node_id.clone(),
            }),
        }
    }

    /// `Unprovisioned → Provisioned`.
    ///
    /// Idempotent by name: an existing volume with matching size and
    /// parameters is returned as-is; conflicting parameters fail with
    /// [`DriverError::AlreadyExists`].
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create(&self, req: CreateVolumeRequest) -> Result<Volume, DriverError> {
        if let Some(existing) = self.provisioning.describe_by_name(&req.name).await? {
            if existing.capacity_bytes == req.required_bytes
                && existing.parameters == req.parameters
            {
                debug!(volume_id = %existing.volume_id, "volume exists, idempotent create");
                return Ok(existing);
            }
            return Err(DriverError::AlreadyExists(format!(
                "volume {} exists with different size or parameters",
                req.name
            )));
        }

        let volume = self
            .provisioning
            .create(&req.name, req.required_bytes, &req.parameters)
            .await?;
        info!(volume_id = %volume.volume_id, name = %req.name, "volume created");
        Ok(volume)
    }

    /// `Provisioned → Deleted`.
    ///
    /// Deleting an absent volume succeeds; a volume with live assignments is
    /// refused.
    #[instrument(skip(self))]
    pub async fn delete(&self, volume_id: &VolumeId) -> Result<(), DriverError> {
        if self.provisioning.describe(volume_id).await?.is_none() {
            debug!(%volume_id, "volume already absent, idempotent delete");
            return Ok(());
        }

        let assigned = self.assignments.describe(volume_id).await?;
        if !assigned.is_empty() {
            return Err(DriverError::FailedPrecondition(format!(
                "volume {volume_id} still has {} active assignment(s)",
                assigned.len()
            )));
        }

        self.provisioning.delete(volume_id).await?;
        info!(%volume_id, "volume deleted");
        Ok(())
    }

    /// `Provisioned → Staged(node)`.
    ///
    /// Attaches the volume to the node and mounts the reported device at the
    /// staging path.  Re-staging an already-staged (volume, node) pair with
    /// the same capability is a no-op that returns the existing device.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    pub async fn stage(&self, req: StageVolumeRequest) -> Result<StagedVolume, DriverError> {
        let Some(_) = self.provisioning.describe(&req.volume_id).await? else {
            return Err(DriverError::FailedPrecondition(format!(
                "volume {} does not exist",
                req.volume_id
            )));
        };

        let assigned = self.assignments.describe(&req.volume_id).await?;
        if let Some(local) = assigned.iter().find(|a| a.node_id == req.node_id) {
            // Already attached here.  A live staging mount makes this an
            // idempotent retry, but only if the requested mode matches what
            // is actually mounted.
            let staging = self.mount.mounts_from(local.device.as_str()).await?;
            if let Some(record) = staging.iter().find(|m| m.target == req.staging_path) {
                if record.read_only != req.capability.access_mode.read_only() {
                    return Err(DriverError::FailedPrecondition(format!(
                        "volume {} is staged at {} with a different access mode",
                        req.volume_id, req.staging_path
                    )));
                }
                debug!(device = %local.device, "volume already staged, idempotent retry");
            } else {
                // Only the staging mount is missing.
                self.mount
                    .mount(
                        local.device.as_str(),
                        &req.staging_path,
                        req.capability.access_mode.read_only(),
                    )
                    .await?;
                debug!(device = %local.device, "volume already attached, staging mount restored");
            }
            return Ok(StagedVolume {
                volume_id: req.volume_id,
                node_id: req.node_id,
                device: local.device.clone(),
                staging_path: req.staging_path,
            });
        }

        if !assigned.is_empty() {
            let caps = self.provisioning.capabilities().await?;
            if !(caps.multi_attach && req.capability.access_mode.multi_node()) {
                return Err(DriverError::FailedPrecondition(format!(
                    "volume {} is already staged on {} and multi-attach is not in effect",
                    req.volume_id, assigned[0].node_id
                )));
            }
        }

        let device = self
            .assignments
            .attach(&req.volume_id, &req.node_id)
            .await?;
        self.mount
            .mount(
                device.as_str(),
                &req.staging_path,
                req.capability.access_mode.read_only(),
            )
            .await?;

        info!(%device, staging_path = %req.staging_path, "volume staged");
        Ok(StagedVolume {
            volume_id: req.volume_id,
            node_id: req.node_id,
            device,
            staging_path: req.staging_path,
        })
    }

    /// `Staged(node) → Published(node, path)`.
    ///
    /// Binds the staging mount into the caller's target path.  Re-publishing
    /// the same (volume, node, target, mode) is a no-op; a different target
    /// while the volume is published elsewhere on the node is a conflict.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    pub async fn publish(&self, req: PublishVolumeRequest) -> Result<(), DriverError> {
        if !self.mount.is_mounted(&req.staging_path).await? {
            return Err(DriverError::FailedPrecondition(format!(
                "volume {} is not staged at {}",
                req.volume_id, req.staging_path
            )));
        }

        let read_only = req.read_only || req.capability.access_mode.read_only();

        let published = self.mount.mounts_from(&req.staging_path).await?;
        if let Some(existing) = published.iter().find(|m| m.target == req.target_path) {
            if existing.read_only == read_only {
                debug!("target already published, idempotent retry");
                return Ok(());
            }
            return Err(DriverError::AlreadyExists(format!(
                "target {} is published with a different access mode",
                req.target_path
            )));
        }
        if !published.is_empty() {
            return Err(DriverError::AlreadyExists(format!(
                "volume {} is already published at {} on this node",
                req.volume_id, published[0].target
            )));
        }

        // The target must not be claimed by a different volume's mount.
        if self.mount.is_mounted(&req.target_path).await? {
            return Err(DriverError::AlreadyExists(format!(
                "target {} is already mounted from another source",
                req.target_path
            )));
        }

        self.mount
            .mount(&req.staging_path, &req.target_path, read_only)
            .await?;
        info!(read_only, "volume published");
        Ok(())
    }

    /// `Published(node, path) → Staged(node)`.
    ///
    /// Removing a mount that does not exist succeeds.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    pub async fn unpublish(&self, req: UnpublishVolumeRequest) -> Result<(), DriverError> {
        if !self.mount.is_mounted(&req.target_path).await? {
            debug!("target not mounted, nothing to unpublish");
            return Ok(());
        }
        self.mount.unmount(&req.target_path).await?;
        info!("volume unpublished");
        Ok(())
    }

    /// `Staged(node) → Provisioned`.
    ///
    /// Refused while publishes from the staging path are still live;
    /// otherwise removes the staging mount and the assignment.  Both removals
    /// are idempotent.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    pub async fn unstage(&self, req: UnstageVolumeRequest) -> Result<(), DriverError> {
        let published = self.mount.mounts_from(&req.staging_path).await?;
        if !published.is_empty() {
            return Err(DriverError::FailedPrecondition(format!(
                "volume {} is still published at {}",
                req.volume_id, published[0].target
            )));
        }

        if self.mount.is_mounted(&req.staging_path).await? {
            self.mount.unmount(&req.staging_path).await?;
        }

        let assigned = self.assignments.describe(&req.volume_id).await?;
        if assigned.iter().any(|a| a.node_id == req.node_id) {
            self.assignments
                .detach(&req.volume_id, &req.node_id)
                .await?;
        }

        info!("volume unstaged");
        Ok(())
    }

    /// In-place capacity growth.
    ///
    /// Capacity is monotonically non-decreasing: a smaller request is
    /// rejected, an already-satisfied request is a no-op.  Growth while
    /// attached requires the backend's online-expand capability.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, required_bytes = req.required_bytes))]
    pub async fn expand(&self, req: ExpandVolumeRequest) -> Result<u64, DriverError> {
        let Some(volume) = self.provisioning.describe(&req.volume_id).await? else {
            return Err(DriverError::NotFound(format!("volume {}", req.volume_id)));
        };

        if req.required_bytes < volume.capacity_bytes {
            return Err(DriverError::InvalidArgument(format!(
                "requested {} bytes is below the current capacity of {} bytes",
                req.required_bytes, volume.capacity_bytes
            )));
        }
        if req.required_bytes == volume.capacity_bytes {
            debug!("capacity already satisfied, idempotent expand");
            return Ok(volume.capacity_bytes);
        }

        let assigned = self.assignments.describe(&req.volume_id).await?;
        if !assigned.is_empty() && !self.provisioning.capabilities().await?.online_expand {
            return Err(DriverError::FailedPrecondition(format!(
                "volume {} is attached and the backend cannot expand online",
                req.volume_id
            )));
        }

        let capacity = self
            .provisioning
            .expand(&req.volume_id, req.required_bytes)
            .await?;
        info!(capacity, "volume expanded");
        Ok(capacity)
    }
}
