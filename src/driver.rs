//! Driver façade.
//!
//! [`Driver`] is the public surface of the orchestration core, consumed by
//! the transport layer.  Each operation validates request shape first
//! (surfacing [`DriverError::InvalidArgument`] without touching the guard or
//! the backend), then enters the [`OperationGuard`] and drives the
//! [`LifecycleEngine`].  All operations are safe to invoke concurrently and
//! repeatedly.
//!
//! Backends are injected at construction and the façade never branches on
//! which implementation is live; the conformance suite swaps the in-memory
//! mock for a real cluster adapter without touching this module.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::backend::{Assignments, Mount, Provisioning};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::guard::{Fingerprint, OperationGuard};
use crate::lifecycle::LifecycleEngine;
use crate::types::{
    CreateVolumeRequest, ExpandVolumeRequest, NodeId, PublishVolumeRequest, StageVolumeRequest,
    StagedVolume, UnpublishVolumeRequest, UnstageVolumeRequest, Volume, VolumeId,
    LifecycleResponse,
};

/// Identity of a running driver instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// Driver name, domain-name notation.
    pub name: String,
    /// Driver version string.
    pub version: String,
    /// Node this instance serves.
    pub node_id: NodeId,
}

/// The volume lifecycle orchestration core.
pub struct Driver {
    config: DriverConfig,
    engine: Arc<LifecycleEngine>,
    guard: OperationGuard,
}

impl Driver {
    /// Build a driver over the given backend capabilities.
    pub fn new(
        config: DriverConfig,
        provisioning: Arc<dyn Provisioning>,
        assignments: Arc<dyn Assignments>,
        mount: Arc<dyn Mount>,
    ) -> Self {
        let guard = OperationGuard::new(config.token_retention);
        let engine = Arc::new(LifecycleEngine::new(provisioning, assignments, mount));
        info!(name = %config.name, node_id = %config.node_id, "driver initialized");
        Self {
            config,
            engine,
            guard,
        }
    }

    /// Name, version, and node identity of this instance.
    pub fn info(&self) -> DriverInfo {
        DriverInfo {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            node_id: self.config.node_id.clone(),
        }
    }

    /// Provision a volume (idempotent by name).
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, DriverError> {
        require_non_empty("name", &req.name)?;
        require_positive("required_bytes", req.required_bytes)?;

        // No volume ID exists yet, so create serializes on the name.
        let key = format!("name:{}", req.name);
        let fingerprint = Fingerprint::of("CreateVolume", &req);
        let engine = Arc::clone(&self.engine);
        let outcome = self
            .guard
            .run(&key, fingerprint, async move {
                engine.create(req).await.map(LifecycleResponse::Created)
            })
            .await?;
        match outcome {
            LifecycleResponse::Created(volume) => Ok(volume),
            other => Err(unexpected(other)),
        }
    }

    /// Delete a volume.  Succeeds if the volume is already absent; refused
    /// while assignments remain.
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), DriverError> {
        require_non_empty("volume_id", &volume_id.0)?;

        let fingerprint = Fingerprint::of("DeleteVolume", volume_id);
        let engine = Arc::clone(&self.engine);
        let id = volume_id.clone();
        let outcome = self
            .guard
            .run(&volume_id.0, fingerprint, async move {
                engine.delete(&id).await.map(|()| LifecycleResponse::Deleted)
            })
            .await?;
        match outcome {
            LifecycleResponse::Deleted => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Stage a volume on a node, returning the attached device and staging
    /// path.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    pub async fn stage_volume(
        &self,
        req: StageVolumeRequest,
    ) -> Result<StagedVolume, DriverError> {
        require_non_empty("volume_id", &req.volume_id.0)?;
        require_non_empty("node_id", &req.node_id.0)?;
        require_absolute_path("staging_path", &req.staging_path)?;

        let key = req.volume_id.0.clone();
        let fingerprint = Fingerprint::of("StageVolume", &req);
        let engine = Arc::clone(&self.engine);
        let outcome = self
            .guard
            .run(&key, fingerprint, async move {
                engine.stage(req).await.map(LifecycleResponse::Staged)
            })
            .await?;
        match outcome {
            LifecycleResponse::Staged(staged) => Ok(staged),
            other => Err(unexpected(other)),
        }
    }

    /// Publish a staged volume at the caller's target path.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    pub async fn publish_volume(&self, req: PublishVolumeRequest) -> Result<(), DriverError> {
        require_non_empty("volume_id", &req.volume_id.0)?;
        require_non_empty("node_id", &req.node_id.0)?;
        require_absolute_path("staging_path", &req.staging_path)?;
        require_absolute_path("target_path", &req.target_path)?;

        let key = req.volume_id.0.clone();
        let fingerprint = Fingerprint::of("PublishVolume", &req);
        let engine = Arc::clone(&self.engine);
        let outcome = self
            .guard
            .run(&key, fingerprint, async move {
                engine
                    .publish(req)
                    .await
                    .map(|()| LifecycleResponse::Published)
            })
            .await?;
        match outcome {
            LifecycleResponse::Published => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Remove a published mount.  Succeeds if the target is already gone.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    pub async fn unpublish_volume(
        &self,
        req: UnpublishVolumeRequest,
    ) -> Result<(), DriverError> {
        require_non_empty("volume_id", &req.volume_id.0)?;
        require_absolute_path("target_path", &req.target_path)?;

        let key = req.volume_id.0.clone();
        let fingerprint = Fingerprint::of("UnpublishVolume", &req);
        let engine = Arc::clone(&self.engine);
        let outcome = self
            .guard
            .run(&key, fingerprint, async move {
                engine
                    .unpublish(req)
                    .await
                    .map(|()| LifecycleResponse::Unpublished)
            })
            .await?;
        match outcome {
            LifecycleResponse::Unpublished => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Unstage a volume from a node.  Succeeds if the staging mount and the
    /// assignment are already gone.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    pub async fn unstage_volume(&self, req: UnstageVolumeRequest) -> Result<(), DriverError> {
        require_non_empty("volume_id", &req.volume_id.0)?;
        require_non_empty("node_id", &req.node_id.0)?;
        require_absolute_path("staging_path", &req.staging_path)?;

        let key = req.volume_id.0.clone();
        let fingerprint = Fingerprint::of("UnstageVolume", &req);
        let engine = Arc::clone(&self.engine);
        let outcome = self
            .guard
            .run(&key, fingerprint, async move {
                engine
                    .unstage(req)
                    .await
                    .map(|()| LifecycleResponse::Unstaged)
            })
            .await?;
        match outcome {
            LifecycleResponse::Unstaged => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Grow a volume, returning its final capacity.
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn expand_volume(&self, req: ExpandVolumeRequest) -> Result<u64, DriverError> {
        require_non_empty("volume_id", &req.volume_id.0)?;
        require_positive("required_bytes", req.required_bytes)?;

        let key = req.volume_id.0.clone();
        let fingerprint = Fingerprint::of("ExpandVolume", &req);
        let engine = Arc::clone(&self.engine);
        let outcome = self
            .guard
            .run(&key, fingerprint, async move {
                engine
                    .expand(req)
                    .await
                    .map(|capacity_bytes| LifecycleResponse::Expanded { capacity_bytes })
            })
            .await?;
        match outcome {
            LifecycleResponse::Expanded { capacity_bytes } => Ok(capacity_bytes),
            other => Err(unexpected(other)),
        }
    }

    /// Stop accepting operations and wait for the in-flight ones to drain.
    pub async fn shutdown(&self) {
        self.guard.shutdown().await;
        info!(name = %self.config.name, "driver stopped");
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), DriverError> {
    if value.trim().is_empty() {
        return Err(DriverError::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> Result<(), DriverError> {
    if value == 0 {
        return Err(DriverError::invalid(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}

fn require_absolute_path(field: &str, value: &str) -> Result<(), DriverError> {
    require_non_empty(field, value)?;
    if !value.starts_with('/') {
        return Err(DriverError::invalid(format!(
            "{field} must be an absolute path, got {value:?}"
        )));
    }
    Ok(())
}

fn unexpected(outcome: LifecycleResponse) -> DriverError {
    DriverError::Internal(format!("unexpected lifecycle outcome: {outcome:?}"))
}
