//! Real [`Mount`] adapter for the local host.
//!
//! [`HostMount`] places volumes with bind mounts and answers mount queries
//! from `/proc/self/mounts`, so no local bookkeeping can diverge from what
//! the kernel reports.  Device attachment and formatting remain the storage
//! cluster's concern; this adapter only binds an attached source path into
//! its target.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::backend::Mount;
use crate::error::DriverError;
use crate::types::MountRecord;

/// Bind-mount based [`Mount`] implementation.
#[derive(Debug, Default)]
pub struct HostMount;

impl HostMount {
    /// Create a new adapter.
    pub fn new() -> Self {
        Self
    }

    /// Read the mount table.
    ///
    /// Note: `/proc/self/mounts` uses octal escapes (`\040` for space,
    /// etc.).  Lifecycle paths must not contain whitespace, so direct string
    /// comparison against the fields is safe.
    async fn mount_table(&self) -> Result<Vec<MountRecord>, DriverError> {
        let contents = tokio::fs::read_to_string("/proc/self/mounts")
            .await
            .map_err(|e| DriverError::internal(format!("read mount table: {e}")))?;

        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
        Ok(contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let _fstype = fields.next()?;
                let options = fields.next()?;
                Some(MountRecord {
                    source: source.to_owned(),
                    target: target.to_owned(),
                    read_only: options.split(',').any(|o| o == "ro"),
                })
            })
            .collect())
    }
}

#[async_trait]
impl Mount for HostMount {
    #[instrument(skip(self))]
    async fn mount(
        &self,
        source: &str,
        target: &str,
        read_only: bool,
    ) -> Result<(), DriverError> {
        let table = self.mount_table().await?;
        if let Some(existing) = table.iter().find(|m| m.target == target) {
            if existing.source == source {
                debug!(target, "target already mounted, idempotent retry");
                return Ok(());
            }
            return Err(DriverError::AlreadyExists(format!(
                "target {target} is already mounted from {}",
                existing.source
            )));
        }

        tokio::fs::create_dir_all(Path::new(target))
            .await
            .map_err(|e| DriverError::internal(format!("create mount target {target}: {e}")))?;

        // mount(2) can block on slow storage; keep it off the async workers.
        let src = source.to_owned();
        let tgt = target.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), DriverError> {
            let mut flags = nix::mount::MsFlags::MS_BIND;
            if read_only {
                flags |= nix::mount::MsFlags::MS_RDONLY;
            }

            nix::mount::mount(Some(src.as_str()), tgt.as_str(), None::<&str>, flags, None::<&str>)
                .map_err(|e| DriverError::internal(format!("bind mount {src} -> {tgt}: {e}")))?;

            // Some kernels ignore MS_RDONLY on the initial bind-mount call; a
            // separate remount is required to actually enforce read-only
            // access.
            if read_only {
                nix::mount::mount(
                    None::<&str>,
                    tgt.as_str(),
                    None::<&str>,
                    nix::mount::MsFlags::MS_BIND
                        | nix::mount::MsFlags::MS_REMOUNT
                        | nix::mount::MsFlags::MS_RDONLY,
                    None::<&str>,
                )
                .map_err(|e| DriverError::internal(format!("remount {tgt} read-only: {e}")))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| DriverError::internal(format!("mount task failed: {e}")))??;

        info!(source, target, read_only, "bind mount placed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unmount(&self, target: &str) -> Result<(), DriverError> {
        if !self.is_mounted(target).await? {
            debug!(target, "target not mounted, nothing to unmount");
            return Ok(());
        }
        let tgt = target.to_owned();
        tokio::task::spawn_blocking(move || {
            nix::mount::umount(tgt.as_str())
                .map_err(|e| DriverError::internal(format!("umount {tgt}: {e}")))
        })
        .await
        .map_err(|e| DriverError::internal(format!("unmount task failed: {e}")))??;
        info!(target, "unmounted");
        Ok(())
    }

    async fn is_mounted(&self, target: &str) -> Result<bool, DriverError> {
        Ok(self.mount_table().await?.iter().any(|m| m.target == target))
    }

    async fn mounts_from(&self, source: &str) -> Result<Vec<MountRecord>, DriverError> {
        Ok(self
            .mount_table()
            .await?
            .into_iter()
            .filter(|m| m.source == source)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Placing real mounts needs CAP_SYS_ADMIN; these tests only exercise the
    // query paths against the live mount table.

    #[tokio::test]
    async fn mount_table_is_readable() {
        let host = HostMount::new();
        let table = host.mount_table().await.unwrap();
        assert!(table.iter().any(|m| m.target == "/"));
    }

    #[tokio::test]
    async fn fresh_directory_is_not_a_mountpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let host = HostMount::new();
        let path = tmp.path().to_str().unwrap();
        assert!(!host.is_mounted(path).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_source_has_no_mounts() {
        let host = HostMount::new();
        let mounts = host.mounts_from("/dev/blockcsi/definitely-absent").await.unwrap();
        assert!(mounts.is_empty());
    }

    #[tokio::test]
    async fn mount_of_missing_source_surfaces_internal() {
        let tmp = tempfile::tempdir().unwrap();
        let host = HostMount::new();
        let err = host
            .mount(
                "/dev/blockcsi/definitely-absent",
                tmp.path().join("target").to_str().unwrap(),
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Internal(_)));
    }

    #[tokio::test]
    async fn unmount_of_unmounted_path_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let host = HostMount::new();
        host.unmount(tmp.path().to_str().unwrap()).await.unwrap();
    }
}
