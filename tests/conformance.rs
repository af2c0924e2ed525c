//! Lifecycle conformance suite.
//!
//! Drives the driver façade through the full volume lifecycle against the
//! deterministic in-memory backend, the same way the upstream sanity
//! harness exercises a deployed driver.  Swapping in a real cluster adapter
//! only changes the three `Arc`s handed to [`Driver::new`].

use std::sync::Arc;
use std::time::Duration;

use libblockcsi::backend::mock::MockBackend;
use libblockcsi::{
    AccessMode, CreateVolumeRequest, Driver, DriverConfig, DriverError, ExpandVolumeRequest,
    PublishVolumeRequest, StageVolumeRequest, UnpublishVolumeRequest, UnstageVolumeRequest,
    VolumeCapability,
};

const GIB: u64 = 1024 * 1024 * 1024;

fn test_driver(backend: Arc<MockBackend>) -> Arc<Driver> {
    let config = DriverConfig::new("node-1")
        .with_name("rs.blockcsi.conformance")
        .with_version("conformance-test");
    Arc::new(Driver::new(
        config,
        backend.clone(),
        backend.clone(),
        backend,
    ))
}

fn create(name: &str, bytes: u64) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.into(),
        required_bytes: bytes,
        capability: Some(VolumeCapability::default()),
        parameters: [("autoPlace".to_owned(), "1".to_owned())].into(),
    }
}

fn stage(volume_id: &libblockcsi::VolumeId, staging_path: &str) -> StageVolumeRequest {
    StageVolumeRequest {
        volume_id: volume_id.clone(),
        node_id: "node-1".into(),
        staging_path: staging_path.into(),
        capability: VolumeCapability::default(),
    }
}

#[tokio::test]
async fn full_lifecycle_sequence() {
    let backend = Arc::new(MockBackend::new());
    let driver = test_driver(backend.clone());

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();
    assert_eq!(vol.capacity_bytes, GIB);

    let staged = driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap();

    driver
        .publish_volume(PublishVolumeRequest {
            volume_id: vol.volume_id.clone(),
            node_id: "node-1".into(),
            staging_path: "/stage/a".into(),
            target_path: "/target/a".into(),
            capability: VolumeCapability::default(),
            read_only: false,
        })
        .await
        .unwrap();

    driver
        .unpublish_volume(UnpublishVolumeRequest {
            volume_id: vol.volume_id.clone(),
            node_id: "node-1".into(),
            target_path: "/target/a".into(),
        })
        .await
        .unwrap();

    driver
        .unstage_volume(UnstageVolumeRequest {
            volume_id: vol.volume_id.clone(),
            node_id: "node-1".into(),
            staging_path: "/stage/a".into(),
        })
        .await
        .unwrap();

    driver.delete_volume(&vol.volume_id).await.unwrap();

    assert_eq!(backend.volume_count(), 0);
    assert_eq!(staged.device.as_str(), "/dev/mock/vol-0-node-1");
}

#[tokio::test]
async fn reverse_operations_are_idempotent() {
    let backend = Arc::new(MockBackend::new());
    // Tokens must not mask re-execution here: use a zero retention window so
    // every repeated call actually reaches the state machine.
    let config = DriverConfig::new("node-1").with_token_retention(Duration::ZERO);
    let driver = Driver::new(config, backend.clone(), backend.clone(), backend);

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();
    driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap();
    driver
        .publish_volume(PublishVolumeRequest {
            volume_id: vol.volume_id.clone(),
            node_id: "node-1".into(),
            staging_path: "/stage/a".into(),
            target_path: "/target/a".into(),
            capability: VolumeCapability::default(),
            read_only: false,
        })
        .await
        .unwrap();

    let unpublish = UnpublishVolumeRequest {
        volume_id: vol.volume_id.clone(),
        node_id: "node-1".into(),
        target_path: "/target/a".into(),
    };
    driver.unpublish_volume(unpublish.clone()).await.unwrap();
    // Double unpublish: success, not an error.
    driver.unpublish_volume(unpublish).await.unwrap();

    let unstage = UnstageVolumeRequest {
        volume_id: vol.volume_id.clone(),
        node_id: "node-1".into(),
        staging_path: "/stage/a".into(),
    };
    driver.unstage_volume(unstage.clone()).await.unwrap();
    driver.unstage_volume(unstage).await.unwrap();

    driver.delete_volume(&vol.volume_id).await.unwrap();
    driver.delete_volume(&vol.volume_id).await.unwrap();
}

#[tokio::test]
async fn create_is_idempotent_and_conflicts_are_refused() {
    let backend = Arc::new(MockBackend::new());
    let driver = test_driver(backend.clone());

    let first = driver.create_volume(create("vol-a", GIB)).await.unwrap();
    let second = driver.create_volume(create("vol-a", GIB)).await.unwrap();
    assert_eq!(first.volume_id, second.volume_id);
    assert_eq!(backend.volume_count(), 1);

    let err = driver
        .create_volume(create("vol-a", 2 * GIB))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::AlreadyExists(_)));
}

#[tokio::test]
async fn delete_while_attached_is_refused() {
    let backend = Arc::new(MockBackend::new());
    let driver = test_driver(backend);

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();
    driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap();

    let err = driver.delete_volume(&vol.volume_id).await.unwrap_err();
    assert!(matches!(err, DriverError::FailedPrecondition(_)));

    // After unstaging, delete goes through.
    driver
        .unstage_volume(UnstageVolumeRequest {
            volume_id: vol.volume_id.clone(),
            node_id: "node-1".into(),
            staging_path: "/stage/a".into(),
        })
        .await
        .unwrap();
    driver.delete_volume(&vol.volume_id).await.unwrap();
}

#[tokio::test]
async fn concurrent_identical_stage_attaches_once() {
    let backend = Arc::new(MockBackend::new().with_attach_delay(Duration::from_millis(50)));
    let driver = test_driver(backend.clone());

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();

    let spawn_stage = |driver: Arc<Driver>| {
        let req = stage(&vol.volume_id, "/stage/a");
        tokio::spawn(async move { driver.stage_volume(req).await })
    };
    let a = spawn_stage(driver.clone());
    let b = spawn_stage(driver.clone());

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a, b);
    assert_eq!(backend.attach_calls(), 1);
}

#[tokio::test]
async fn concurrent_conflicting_stage_is_aborted() {
    let backend = Arc::new(MockBackend::new().with_attach_delay(Duration::from_millis(100)));
    let driver = test_driver(backend);

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();

    let slow = {
        let driver = driver.clone();
        let req = stage(&vol.volume_id, "/stage/a");
        tokio::spawn(async move { driver.stage_volume(req).await })
    };

    // Let the first stage claim the volume key.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = driver
        .stage_volume(stage(&vol.volume_id, "/stage/b"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Aborted(_)));

    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn retried_stage_after_completion_reuses_result() {
    let backend = Arc::new(MockBackend::new());
    let driver = test_driver(backend.clone());

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();
    let first = driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap();
    let retry = driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap();

    assert_eq!(first, retry);
    assert_eq!(backend.attach_calls(), 1);
}

#[tokio::test]
async fn expand_is_monotonic() {
    let backend = Arc::new(MockBackend::new());
    let driver = test_driver(backend);

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();

    let size = driver
        .expand_volume(ExpandVolumeRequest {
            volume_id: vol.volume_id.clone(),
            required_bytes: 2 * GIB,
        })
        .await
        .unwrap();
    assert_eq!(size, 2 * GIB);

    // Repeating the satisfied expand is a no-op.
    let size = driver
        .expand_volume(ExpandVolumeRequest {
            volume_id: vol.volume_id.clone(),
            required_bytes: 2 * GIB,
        })
        .await
        .unwrap();
    assert_eq!(size, 2 * GIB);

    // Shrinking is rejected outright.
    let err = driver
        .expand_volume(ExpandVolumeRequest {
            volume_id: vol.volume_id.clone(),
            required_bytes: 512 * 1024 * 1024,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidArgument(_)));
}

#[tokio::test]
async fn multi_attach_honors_backend_capability_and_requested_mode() {
    let backend = Arc::new(MockBackend::new().with_multi_attach(true));
    let driver = test_driver(backend);

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();

    let many = |node: &str, path: &str| StageVolumeRequest {
        volume_id: vol.volume_id.clone(),
        node_id: node.into(),
        staging_path: path.into(),
        capability: VolumeCapability {
            access_mode: AccessMode::ReadWriteMany,
            ..VolumeCapability::default()
        },
    };

    driver.stage_volume(many("node-1", "/stage/a")).await.unwrap();
    driver.stage_volume(many("node-2", "/stage/b")).await.unwrap();

    // A single-node capability on a third node is still refused even though
    // the backend could multi-attach.
    let err = driver
        .stage_volume(StageVolumeRequest {
            volume_id: vol.volume_id.clone(),
            node_id: "node-3".into(),
            staging_path: "/stage/c".into(),
            capability: VolumeCapability::default(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::FailedPrecondition(_)));
}

#[tokio::test]
async fn capacity_exhaustion_surfaces_resource_exhausted() {
    let backend = Arc::new(MockBackend::new().with_capacity_limit(GIB));
    let driver = test_driver(backend);

    driver.create_volume(create("vol-a", GIB / 2)).await.unwrap();
    let err = driver.create_volume(create("vol-b", GIB)).await.unwrap_err();
    assert!(matches!(err, DriverError::ResourceExhausted(_)));
}

#[tokio::test]
async fn transient_outage_is_retryable() {
    // Default retention: transient failures must not be replayed from the
    // token table once the backend recovers.
    let backend = Arc::new(MockBackend::new());
    let driver = test_driver(backend.clone());

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();

    backend.set_unavailable(true);
    let err = driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // The backend comes back; the identical retry reaches it and succeeds.
    backend.set_unavailable(false);
    driver
        .stage_volume(stage(&vol.volume_id, "/stage/a"))
        .await
        .unwrap();
    assert_eq!(backend.attach_calls(), 1);
}

#[tokio::test]
async fn shutdown_drains_and_refuses() {
    let backend = Arc::new(MockBackend::new().with_attach_delay(Duration::from_millis(50)));
    let driver = test_driver(backend.clone());

    let vol = driver.create_volume(create("vol-a", GIB)).await.unwrap();

    let inflight = {
        let driver = driver.clone();
        let req = stage(&vol.volume_id, "/stage/a");
        tokio::spawn(async move { driver.stage_volume(req).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    driver.shutdown().await;

    // The in-flight stage completed during the drain.
    inflight.await.unwrap().unwrap();
    assert_eq!(backend.attach_calls(), 1);

    let err = driver
        .create_volume(create("vol-b", GIB))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Unavailable(_)));
}
