//! End-to-end reconciliation passes against the in-memory platform.

mod common;

use common::*;
use k8s_openapi::api::core::v1::{PersistentVolume, Service};
use kfl_operator::config::OperatorConfig;
use kfl_operator::controller::ReconcileAction;
use kfl_operator::crd::{Accuracy, FLClusterSpec, FLClusterStatus};
use kfl_operator::resources::{ChildKind, ChildObject, ObjectKey, LABEL_DEVICE};
use std::sync::atomic::Ordering;

fn local_storage_config() -> OperatorConfig {
    OperatorConfig {
        local_storage_root: Some("/mnt/kfl/".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn first_pass_creates_every_object() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let controller = controller(platform.clone(), OperatorConfig::default());

    let action = controller.reconcile(NAMESPACE, "demo").await.unwrap();
    assert_eq!(action, ReconcileAction::Done);

    let mut expected = vec![
        key(ChildKind::PersistentVolumeClaim, "demo-central-server"),
        key(ChildKind::Deployment, "demo-central-server"),
        key(ChildKind::Service, "demo-central-server"),
        key(ChildKind::Deployment, "demo-edge-client0"),
        key(ChildKind::Service, "demo-edge-client0"),
    ];
    expected.sort();
    assert_eq!(platform.keys(), expected);
    assert_eq!(platform.creates.load(Ordering::SeqCst), 5);

    let status = platform.status(NAMESPACE, "demo").expect("status written");
    assert_eq!(status, FLClusterStatus::default());
}

#[tokio::test]
async fn converged_cluster_needs_no_writes() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 2));
    let controller = controller(platform.clone(), OperatorConfig::default());

    controller.reconcile(NAMESPACE, "demo").await.unwrap();
    platform.reset_counters();
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    assert_eq!(platform.writes(), 0);
}

#[tokio::test]
async fn edge_servers_are_named_by_index() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(cluster(
        "fl",
        FLClusterSpec {
            central_server: Some(device("1", "1Gi")),
            edge_server: Some(vec![device("500m", "1Gi"), device("500m", "1Gi")]),
            edge_client: vec![device("250m", "512Mi")],
            ..Default::default()
        },
    ));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "fl").await.unwrap();

    for (index, port) in [(0, 9000), (1, 9001)] {
        let name = format!("fl-edge-server{index}");
        let Some(ChildObject::Service(Service { spec: Some(spec), metadata, .. })) =
            platform.object(&key(ChildKind::Service, &name))
        else {
            panic!("service {name} missing");
        };
        assert_eq!(spec.ports.unwrap()[0].port, port);
        assert_eq!(
            metadata.labels.unwrap()[LABEL_DEVICE],
            format!("edge-server{index}")
        );
        assert!(platform.object(&key(ChildKind::Deployment, &name)).is_some());
    }
}

#[tokio::test]
async fn shrinking_prunes_stale_instances() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 3));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    let mut shrunk = simple("demo", 1);
    shrunk.status = Some(FLClusterStatus::default());
    platform.put_cluster(shrunk);
    platform.reset_counters();
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    assert_eq!(platform.deletes.load(Ordering::SeqCst), 4);
    for name in ["demo-edge-client1", "demo-edge-client2"] {
        assert!(platform.object(&key(ChildKind::Deployment, name)).is_none());
        assert!(platform.object(&key(ChildKind::Service, name)).is_none());
    }
    assert!(platform
        .object(&key(ChildKind::Deployment, "demo-edge-client0"))
        .is_some());
}

#[tokio::test]
async fn foreign_objects_are_not_pruned() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    // Same labels, different owner.
    let mut stray = platform
        .object(&key(ChildKind::Service, "demo-edge-client0"))
        .unwrap();
    stray.meta_mut().name = Some("demo-edge-client9".into());
    stray.meta_mut().owner_references = None;
    stray.meta_mut().resource_version = None;
    platform.seed(stray);

    controller.reconcile(NAMESPACE, "demo").await.unwrap();
    assert!(platform
        .object(&key(ChildKind::Service, "demo-edge-client9"))
        .is_some());
}

#[tokio::test]
async fn drifted_deployment_is_restored() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    let deployment = key(ChildKind::Deployment, "demo-edge-client0");
    platform.edit(&deployment, |object| {
        if let ChildObject::Deployment(d) = object {
            d.spec.as_mut().unwrap().replicas = Some(5);
        }
    });
    platform.reset_counters();
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    assert_eq!(platform.updates.load(Ordering::SeqCst), 1);
    let Some(ChildObject::Deployment(d)) = platform.object(&deployment) else {
        panic!("deployment missing");
    };
    assert_eq!(d.spec.unwrap().replicas, Some(1));
}

#[tokio::test]
async fn service_update_keeps_cluster_ip() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    let service = key(ChildKind::Service, "demo-central-server");
    let before = platform.object(&service).unwrap();
    platform.edit(&service, |object| {
        object.meta_mut().labels.as_mut().unwrap().remove("app");
    });
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    let (ChildObject::Service(before), Some(ChildObject::Service(after))) =
        (before, platform.object(&service))
    else {
        panic!("service missing");
    };
    assert_eq!(after.spec.unwrap().cluster_ip, before.spec.unwrap().cluster_ip);
    assert_eq!(after.metadata.labels.unwrap()["app"], "central-server");
}

#[tokio::test]
async fn existing_status_is_preserved() {
    let platform = MemoryPlatform::new();
    let mut demo = simple("demo", 1);
    demo.status = Some(FLClusterStatus {
        global_rounds: 12,
        global_accuracy: Accuracy::Number(0.87),
        ..Default::default()
    });
    platform.put_cluster(demo);
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    let status = platform.status(NAMESPACE, "demo").unwrap();
    assert_eq!(status.global_rounds, 12);
    assert_eq!(status.global_accuracy, Accuracy::Number(0.87));
}

#[tokio::test]
async fn deleted_cluster_is_a_no_op() {
    let platform = MemoryPlatform::new();
    let controller = controller(platform.clone(), OperatorConfig::default());

    let action = controller.reconcile(NAMESPACE, "gone").await.unwrap();
    assert_eq!(action, ReconcileAction::Done);
    assert_eq!(platform.writes(), 0);
    assert!(platform.status(NAMESPACE, "gone").is_none());
}

#[tokio::test]
async fn legacy_single_device_cluster_converges() {
    let spec: FLClusterSpec = kfl_operator::crd::decode_spec(serde_json::json!({
        "centralServer": {"replica": 1, "resources": {"cpu": "1", "memory": "1Gi"}},
        "edgeServer": {"replica": 1, "resources": {"cpu": "500m", "memory": "1Gi"}},
        "edgeClient": {"replica": 1, "resources": {"cpu": "250m", "memory": "256Mi"}}
    }))
    .unwrap()
    .spec;

    let platform = MemoryPlatform::new();
    platform.put_cluster(cluster("old", spec));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "old").await.unwrap();

    assert!(platform
        .object(&key(ChildKind::Deployment, "old-edge-server0"))
        .is_some());
    assert!(platform
        .object(&key(ChildKind::Deployment, "old-edge-client0"))
        .is_some());
}

#[tokio::test]
async fn local_storage_provisions_class_and_volume() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let controller = controller(platform.clone(), local_storage_config());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    assert!(platform
        .object(&ObjectKey::cluster_scoped(ChildKind::StorageClass, "kfl-local-storage"))
        .is_some());

    let volume = ObjectKey::cluster_scoped(ChildKind::PersistentVolume, "sample-demo-central-server");
    let Some(ChildObject::PersistentVolume(PersistentVolume { metadata, spec: Some(spec), .. })) =
        platform.object(&volume)
    else {
        panic!("volume missing");
    };
    assert!(metadata.owner_references.is_none());
    assert_eq!(spec.host_path.unwrap().path, "/mnt/kfl/sample/demo");

    let Some(ChildObject::PersistentVolumeClaim(claim)) =
        platform.object(&key(ChildKind::PersistentVolumeClaim, "demo-central-server"))
    else {
        panic!("claim missing");
    };
    let claim = claim.spec.unwrap();
    assert_eq!(claim.volume_name.as_deref(), Some("sample-demo-central-server"));
    assert_eq!(claim.storage_class_name.as_deref(), Some("kfl-local-storage"));
}

#[tokio::test]
async fn two_clusters_share_one_storage_class() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("a", 1));
    platform.put_cluster(simple("b", 1));
    let controller = controller(platform.clone(), local_storage_config());

    controller.reconcile(NAMESPACE, "a").await.unwrap();
    controller.reconcile(NAMESPACE, "b").await.unwrap();

    let classes = platform
        .keys()
        .into_iter()
        .filter(|k| k.kind == ChildKind::StorageClass)
        .count();
    assert_eq!(classes, 1);
}

#[tokio::test]
async fn role_deletion_removes_owned_objects() {
    let platform = MemoryPlatform::new();
    let demo = cluster(
        "demo",
        FLClusterSpec {
            central_server: Some(device("1", "1Gi")),
            edge_server: Some(vec![device("500m", "1Gi")]),
            edge_client: vec![device("250m", "512Mi"), device("250m", "512Mi")],
            ..Default::default()
        },
    );
    platform.put_cluster(demo.clone());
    let controller = controller(platform.clone(), local_storage_config());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    assert_eq!(controller.delete_edge_clients(&demo).await.unwrap(), 4);
    assert_eq!(controller.delete_edge_servers(&demo).await.unwrap(), 2);
    assert_eq!(controller.delete_central_server(&demo).await.unwrap(), 4);
    // Twice is harmless.
    assert_eq!(controller.delete_central_server(&demo).await.unwrap(), 0);

    let remaining = platform.keys();
    assert_eq!(
        remaining,
        vec![ObjectKey::cluster_scoped(ChildKind::StorageClass, "kfl-local-storage")]
    );
}

#[tokio::test]
async fn progress_reported_mid_pass_is_not_overwritten() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let progress = FLClusterStatus {
        global_rounds: 5,
        global_accuracy: Accuracy::Number(0.9),
        ..Default::default()
    };
    platform.report_progress_on_next_create(NAMESPACE, "demo", progress.clone());
    let controller = controller(platform.clone(), OperatorConfig::default());

    let err = controller.reconcile(NAMESPACE, "demo").await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(platform.status(NAMESPACE, "demo"), Some(progress.clone()));

    // The retry sees the reported status and keeps it.
    controller.reconcile(NAMESPACE, "demo").await.unwrap();
    assert_eq!(platform.status(NAMESPACE, "demo"), Some(progress));
}

#[tokio::test]
async fn claim_drift_keeps_defaulted_storage_class() {
    let platform = MemoryPlatform::new();
    platform.put_cluster(simple("demo", 1));
    let controller = controller(platform.clone(), OperatorConfig::default());
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    let claim = key(ChildKind::PersistentVolumeClaim, "demo-central-server");
    platform.edit(&claim, |object| {
        if let ChildObject::PersistentVolumeClaim(c) = object {
            c.spec.as_mut().unwrap().storage_class_name = Some("standard".into());
        }
        object.meta_mut().labels.as_mut().unwrap().remove("cluster");
    });
    platform.reset_counters();
    controller.reconcile(NAMESPACE, "demo").await.unwrap();

    assert_eq!(platform.updates.load(Ordering::SeqCst), 1);
    let Some(ChildObject::PersistentVolumeClaim(c)) = platform.object(&claim) else {
        panic!("claim missing");
    };
    assert_eq!(c.spec.unwrap().storage_class_name.as_deref(), Some("standard"));
    assert_eq!(c.metadata.labels.unwrap()["cluster"], "demo");
}
