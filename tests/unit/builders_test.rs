//! Tests for builder modules

use std::sync::Arc;

use prometheus_control_plane::builders::ControlPlaneBuilder;
use prometheus_control_plane::config::{ControlPlaneConfig, QueueBackendConfig};
use prometheus_control_plane::core::{ErrorKind, JobQueue};
use prometheus_control_plane::infra::{InMemoryCloudProvider, InMemoryStore};
use prometheus_control_plane::runtime::TokioSpawner;

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = ControlPlaneConfig::default();
    config.scheduler.batch_limit = 0;
    let err = ControlPlaneBuilder::new(config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_builder_requires_collaborators() {
    let builder = ControlPlaneBuilder::new(ControlPlaneConfig::default()).unwrap();
    let err = builder.build_scheduler().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("store"));
}

#[test]
fn test_builder_file_queue() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ControlPlaneConfig::default();
    config.lifecycle.queue = QueueBackendConfig::File;
    config.lifecycle.queue_path = Some(dir.path().to_string_lossy().into_owned());
    config.lifecycle.queue_depth = 7;

    let queue = ControlPlaneBuilder::new(config)
        .unwrap()
        .build_job_queue()
        .unwrap();
    assert_eq!(queue.max_depth(), 7);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_builder_wires_lifecycle_worker() {
    let builder = ControlPlaneBuilder::new(ControlPlaneConfig::default())
        .unwrap()
        .with_store(Arc::new(InMemoryStore::new()))
        .with_cloud(Arc::new(InMemoryCloudProvider::default()));
    let orchestrator = builder
        .build_orchestrator(TokioSpawner::current().unwrap())
        .unwrap();
    let worker = builder.build_lifecycle_worker(orchestrator).unwrap();
    assert_eq!(worker.queued(), 0);
}
