//! Deterministic in-memory backend.
//!
//! [`MockBackend`] implements all three capability traits with concurrent
//! maps and a monotonic ID counter, so conformance tests run the full
//! lifecycle without a cluster.  It also offers fault-injection knobs:
//! a simulated outage (every call fails [`DriverError::Unavailable`]) and a
//! configurable attach delay used to hold operations in flight for
//! concurrency tests.
//!
//! # Thread safety
//!
//! All mutable state is behind concurrent maps ([`DashMap`]) and atomics,
//! allowing multiple Tokio tasks to operate on different volumes
//! concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::backend::{Assignments, BackendCapabilities, Mount, Provisioning};
use crate::error::DriverError;
use crate::types::{Assignment, DeviceHandle, MountRecord, NodeId, Volume, VolumeId};

/// In-memory backend implementing [`Provisioning`], [`Assignments`], and
/// [`Mount`].
#[derive(Default)]
pub struct MockBackend {
    /// Volumes keyed by backend-assigned ID.
    volumes: DashMap<VolumeId, Volume>,
    /// Caller-supplied name → assigned ID.
    names: DashMap<String, VolumeId>,
    /// Active assignments keyed by volume.
    assignments: DashMap<VolumeId, Vec<Assignment>>,
    /// Active mounts keyed by target path.
    mounts: DashMap<String, MountRecord>,
    /// Monotonic counter for deterministic volume IDs.
    next_id: AtomicU64,
    /// Advertised capabilities.
    capabilities: BackendCapabilities,
    /// Total bytes the cluster can provision, if bounded.
    capacity_limit: Option<u64>,
    /// Bytes currently provisioned, counted against `capacity_limit`.
    allocated: AtomicU64,
    /// Number of attach calls that created a new assignment.
    attach_calls: AtomicU64,
    /// When set, every call fails with `Unavailable`.
    unavailable: AtomicBool,
    /// Artificial delay inside `attach`, for concurrency tests.
    attach_delay: Option<Duration>,
}

impl MockBackend {
    /// Create an empty backend with default capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise or revoke multi-attach support.
    pub fn with_multi_attach(mut self, enabled: bool) -> Self {
        self.capabilities.multi_attach = enabled;
        self
    }

    /// Advertise or revoke online expansion support.
    pub fn with_online_expand(mut self, enabled: bool) -> Self {
        self.capabilities.online_expand = enabled;
        self
    }

    /// Bound the total provisionable capacity.
    pub fn with_capacity_limit(mut self, bytes: u64) -> Self {
        self.capacity_limit = Some(bytes);
        self
    }

    /// Delay every new attach, keeping stage operations in flight.
    pub fn with_attach_delay(mut self, delay: Duration) -> Self {
        self.attach_delay = Some(delay);
        self
    }

    /// Simulate a backend outage (or recovery).
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Number of attach calls that created a new assignment.
    pub fn attach_calls(&self) -> u64 {
        self.attach_calls.load(Ordering::SeqCst)
    }

    /// Number of volumes currently provisioned.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn check_available(&self) -> Result<(), DriverError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable("backend is unreachable".into()));
        }
        Ok(())
    }

    fn device_for(volume_id: &VolumeId, node_id: &NodeId) -> DeviceHandle {
        DeviceHandle(format!("/dev/mock/{volume_id}-{node_id}"))
    }
}

#[async_trait]
impl Provisioning for MockBackend {
    async fn create(
        &self,
        name: &str,
        size_bytes: u64,
        parameters: &HashMap<String, String>,
    ) -> Result<Volume, DriverError> {
        self.check_available()?;

        if let Some(limit) = self.capacity_limit {
            let used = self.allocated.load(Ordering::SeqCst);
            if used + size_bytes > limit {
                return Err(DriverError::ResourceExhausted(format!(
                    "pool exhausted: {used} of {limit} bytes in use, {size_bytes} requested"
                )));
            }
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let volume_id = VolumeId(format!("vol-{seq}"));
        let volume = Volume {
            volume_id: volume_id.clone(),
            name: name.to_owned(),
            capacity_bytes: size_bytes,
            parameters: parameters.clone(),
        };

        self.allocated.fetch_add(size_bytes, Ordering::SeqCst);
        self.volumes.insert(volume_id.clone(), volume.clone());
        self.names.insert(name.to_owned(), volume_id.clone());

        debug!(%volume_id, name, size_bytes, "mock volume created");
        Ok(volume)
    }

    async fn delete(&self, volume_id: &VolumeId) -> Result<(), DriverError> {
        self.check_available()?;
        if let Some((_, vol)) = self.volumes.remove(volume_id) {
            self.names.remove(&vol.name);
            self.allocated
                .fetch_sub(vol.capacity_bytes, Ordering::SeqCst);
            debug!(%volume_id, "mock volume deleted");
        }
        Ok(())
    }

    async fn describe(&self, volume_id: &VolumeId) -> Result<Option<Volume>, DriverError> {
        self.check_available()?;
        Ok(self.volumes.get(volume_id).map(|v| v.clone()))
    }

    async fn describe_by_name(&self, name: &str) -> Result<Option<Volume>, DriverError> {
        self.check_available()?;
        let Some(id) = self.names.get(name).map(|r| r.clone()) else {
            return Ok(None);
        };
        Ok(self.volumes.get(&id).map(|v| v.clone()))
    }

    async fn expand(
        &self,
        volume_id: &VolumeId,
        new_size_bytes: u64,
    ) -> Result<u64, DriverError> {
        self.check_available()?;
        let mut vol = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| DriverError::NotFound(format!("volume {volume_id}")))?;
        if new_size_bytes > vol.capacity_bytes {
            self.allocated
                .fetch_add(new_size_bytes - vol.capacity_bytes, Ordering::SeqCst);
            vol.capacity_bytes = new_size_bytes;
        }
        Ok(vol.capacity_bytes)
    }

    async fn capabilities(&self) -> Result<BackendCapabilities, DriverError> {
        self.check_available()?;
        Ok(self.capabilities)
    }
}

#[async_trait]
impl Assignments for MockBackend {
    async fn attach(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
    ) -> Result<DeviceHandle, DriverError> {
        self.check_available()?;
        if !self.volumes.contains_key(volume_id) {
            return Err(DriverError::NotFound(format!("volume {volume_id}")));
        }

        let mut entry = self.assignments.entry(volume_id.clone()).or_default();
        if let Some(existing) = entry.iter().find(|a| &a.node_id == node_id) {
            return Ok(existing.device.clone());
        }
        drop(entry);

        if let Some(delay) = self.attach_delay {
            tokio::time::sleep(delay).await;
        }

        let device = Self::device_for(volume_id, node_id);
        let mut entry = self.assignments.entry(volume_id.clone()).or_default();
        // Re-check after the suspension point; a concurrent attach may have
        // won the race.
        if let Some(existing) = entry.iter().find(|a| &a.node_id == node_id) {
            return Ok(existing.device.clone());
        }
        entry.push(Assignment {
            volume_id: volume_id.clone(),
            node_id: node_id.clone(),
            device: device.clone(),
        });
        self.attach_calls.fetch_add(1, Ordering::SeqCst);

        debug!(%volume_id, %node_id, %device, "mock volume attached");
        Ok(device)
    }

    async fn detach(&self, volume_id: &VolumeId, node_id: &NodeId) -> Result<(), DriverError> {
        self.check_available()?;
        if let Some(mut entry) = self.assignments.get_mut(volume_id) {
            entry.retain(|a| &a.node_id != node_id);
        }
        self.assignments
            .remove_if(volume_id, |_, list| list.is_empty());
        Ok(())
    }

    async fn describe(&self, volume_id: &VolumeId) -> Result<Vec<Assignment>, DriverError> {
        self.check_available()?;
        Ok(self
            .assignments
            .get(volume_id)
            .map(|list| list.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Mount for MockBackend {
    async fn mount(
        &self,
        source: &str,
        target: &str,
        read_only: bool,
    ) -> Result<(), DriverError> {
        self.check_available()?;
        if let Some(existing) = self.mounts.get(target) {
            if existing.source == source && existing.read_only == read_only {
                return Ok(());
            }
            return Err(DriverError::AlreadyExists(format!(
                "target {target} is already mounted from {}",
                existing.source
            )));
        }
        self.mounts.insert(
            target.to_owned(),
            MountRecord {
                source: source.to_owned(),
                target: target.to_owned(),
                read_only,
            },
        );
        debug!(source, target, read_only, "mock mount placed");
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<(), DriverError> {
        self.check_available()?;
        self.mounts.remove(target);
        Ok(())
    }

    async fn is_mounted(&self, target: &str) -> Result<bool, DriverError> {
        self.check_available()?;
        Ok(self.mounts.contains_key(target))
    }

    async fn mounts_from(&self, source: &str) -> Result<Vec<MountRecord>, DriverError> {
        self.check_available()?;
        Ok(self
            .mounts
            .iter()
            .filter(|entry| entry.value().source == source)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
