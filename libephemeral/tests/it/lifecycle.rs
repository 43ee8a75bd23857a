use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use libephemeral::fs::MountCall;
use libephemeral::registry::RECORD_FILE;
use libephemeral::{
    Code, CreateVolumeRequest, CsiController, CsiNode, NodePublishVolumeRequest, PARAM_POD_ID,
    VolumeId,
};

use crate::common::TestNode;

fn create_request(name: &str, required_bytes: i64) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_owned(),
        required_bytes,
        ..Default::default()
    }
}

fn publish_request(volume_id: &VolumeId, target: &str) -> NodePublishVolumeRequest {
    NodePublishVolumeRequest {
        volume_id: volume_id.clone(),
        target_path: target.to_owned(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_publish_unpublish_delete() {
    let node = TestNode::new().await;
    let driver = &node.driver;
    let target = node.target("a");

    let created = driver
        .create_volume(create_request("v1", 2 << 30))
        .await
        .unwrap();
    assert_eq!(created.capacity_bytes, 2 << 30);
    let vol_dir = node.base_dir().join(created.volume_id.as_str());
    assert!(vol_dir.is_dir());
    assert!(vol_dir.join(RECORD_FILE).is_file());

    driver
        .publish_volume(publish_request(&created.volume_id, &target))
        .await
        .unwrap();
    assert_eq!(
        node.mounter.mounted_source(Path::new(&target)),
        Some(vol_dir.clone())
    );
    let vol = driver.manager().get_volume(&created.volume_id).unwrap();
    assert_eq!(vol.mount_targets, BTreeSet::from([Path::new(&target).to_path_buf()]));

    let stats = driver.get_volume_stats(&created.volume_id).await.unwrap();
    assert!(stats.total_bytes > 0);
    assert!(stats.used_bytes <= stats.total_bytes);

    driver
        .unpublish_volume(&created.volume_id, &target)
        .await
        .unwrap();
    assert!(!Path::new(&target).exists());
    assert_eq!(node.mounter.mount_count(), 0);

    driver.delete_volume(&created.volume_id).await.unwrap();
    assert!(!vol_dir.exists());
    assert!(driver.list_volumes().await.unwrap().is_empty());

    let calls = node.mounter.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], MountCall::Bind { read_only: false, .. }));
    assert!(matches!(calls[1], MountCall::Unmount { .. }));
}

#[tokio::test]
async fn repeated_calls_are_idempotent() {
    let node = TestNode::new().await;
    let driver = &node.driver;
    let target = node.target("a");

    let first = driver.create_volume(create_request("v1", 0)).await.unwrap();
    let second = driver
        .create_volume(create_request("v1", 5 << 30))
        .await
        .unwrap();
    assert_eq!(first.volume_id, second.volume_id);
    assert_eq!(second.capacity_bytes, first.capacity_bytes);

    for _ in 0..2 {
        driver
            .publish_volume(publish_request(&first.volume_id, &target))
            .await
            .unwrap();
    }
    assert_eq!(node.mounter.mount_count(), 1);

    for _ in 0..2 {
        driver
            .unpublish_volume(&first.volume_id, &target)
            .await
            .unwrap();
    }
    assert_eq!(node.mounter.mount_count(), 0);
}

#[tokio::test]
async fn second_target_and_published_delete_conflict() {
    let node = TestNode::new().await;
    let driver = &node.driver;
    let id = driver
        .create_volume(create_request("v1", 0))
        .await
        .unwrap()
        .volume_id;

    driver
        .publish_volume(publish_request(&id, &node.target("a")))
        .await
        .unwrap();

    let err = driver
        .publish_volume(publish_request(&id, &node.target("b")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(!Path::new(&node.target("b")).exists());

    let err = driver.delete_volume(&id).await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(node.base_dir().join(id.as_str()).is_dir());
}

#[tokio::test]
async fn sub_path_is_created_and_mounted() {
    let node = TestNode::new().await;
    let driver = &node.driver;
    let target = node.target("a");
    let id = driver
        .create_volume(create_request("v1", 0))
        .await
        .unwrap()
        .volume_id;

    let mut req = publish_request(&id, &target);
    req.volume_context = HashMap::from([("subPath".to_owned(), "data/logs".to_owned())]);
    driver.publish_volume(req).await.unwrap();

    let source = node.base_dir().join(id.as_str()).join("data/logs");
    assert!(source.is_dir());
    assert_eq!(node.mounter.mounted_source(Path::new(&target)), Some(source));

    let mut escape = publish_request(&id, &node.target("b"));
    escape.volume_context = HashMap::from([("subPath".to_owned(), "../other".to_owned())]);
    let err = driver.publish_volume(escape).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn unknown_volumes_are_not_found() {
    let node = TestNode::new().await;
    let driver = &node.driver;
    let missing = VolumeId::from("vol-missing");

    let codes = [
        driver.delete_volume(&missing).await.unwrap_err().code(),
        driver
            .publish_volume(publish_request(&missing, &node.target("a")))
            .await
            .unwrap_err()
            .code(),
        driver
            .unpublish_volume(&missing, &node.target("a"))
            .await
            .unwrap_err()
            .code(),
        driver.get_volume_stats(&missing).await.unwrap_err().code(),
    ];
    assert_eq!(codes, [Code::NotFound; 4]);
    assert!(node.mounter.calls().is_empty());
}

#[tokio::test]
async fn failed_mount_leaves_volume_unpublished() {
    let node = TestNode::new().await;
    let driver = &node.driver;
    let id = driver
        .create_volume(create_request("v1", 0))
        .await
        .unwrap()
        .volume_id;

    node.mounter
        .fail_next_bind(libephemeral::fs::FsErrorKind::PermissionDenied);
    let err = driver
        .publish_volume(publish_request(&id, &node.target("a")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(!driver.manager().get_volume(&id).unwrap().is_published());

    // The reservation was released, so another target is accepted.
    driver
        .publish_volume(publish_request(&id, &node.target("b")))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_creates_of_distinct_names() {
    let node = TestNode::new().await;
    let driver = Arc::new(node.driver);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .create_volume(create_request(&format!("vol-{i}"), 0))
                    .await
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap().volume_id);
    }
    assert_eq!(ids.len(), 16);

    let listed: BTreeSet<_> = driver
        .list_volumes()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.volume_id)
        .collect();
    assert_eq!(listed, ids);
    for id in &ids {
        assert!(node.dir.path().join("volumes").join(id.as_str()).is_dir());
    }
}

#[tokio::test]
async fn concurrent_creates_of_one_name() {
    let node = TestNode::new().await;
    let driver = Arc::new(node.driver);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.create_volume(create_request("shared", 0)).await })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap().volume_id);
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(driver.list_volumes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn volumes_survive_restart() {
    let node = TestNode::new().await;
    let params = HashMap::from([(PARAM_POD_ID.to_owned(), "pod-1".to_owned())]);
    let created = node
        .driver
        .create_volume(CreateVolumeRequest {
            name: "persistent".into(),
            required_bytes: 3 << 30,
            parameters: params.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    // Directories the plugin did not create, or whose record disagrees with
    // the directory name, are never adopted.
    std::fs::create_dir_all(node.base_dir().join("stray")).unwrap();
    let imposter = node.base_dir().join("vol-imposter");
    std::fs::create_dir_all(&imposter).unwrap();
    std::fs::copy(
        node.base_dir()
            .join(created.volume_id.as_str())
            .join(RECORD_FILE),
        imposter.join(RECORD_FILE),
    )
    .unwrap();

    let node = node.restart().await;
    let volumes = node.driver.list_volumes().await.unwrap();
    assert_eq!(volumes.len(), 1);
    let vol = &volumes[0];
    assert_eq!(vol.volume_id, created.volume_id);
    assert_eq!(vol.name, "persistent");
    assert_eq!(vol.capacity_bytes, 3 << 30);
    assert_eq!(vol.parameters, params);
    assert_eq!(vol.pod_owner.as_deref(), Some("pod-1"));

    // Creating the same name after a restart returns the recovered volume.
    let again = node
        .driver
        .create_volume(create_request("persistent", 0))
        .await
        .unwrap();
    assert_eq!(again.capacity_bytes, 3 << 30);

    node.driver.delete_volume(&created.volume_id).await.unwrap();
    assert!(node.base_dir().join("stray").is_dir());
    assert!(imposter.is_dir());
}

#[tokio::test]
async fn published_volume_stays_guarded_across_restart() {
    let node = TestNode::new().await;
    let id = node
        .driver
        .create_volume(create_request("mounted", 0))
        .await
        .unwrap()
        .volume_id;
    let target = node.target("a");
    node.driver
        .publish_volume(publish_request(&id, &target))
        .await
        .unwrap();

    let node = node.restart().await;
    let vol_dir = node.base_dir().join(id.as_str());

    let err = node.driver.delete_volume(&id).await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(vol_dir.join(RECORD_FILE).is_file());

    let err = node
        .driver
        .publish_volume(publish_request(&id, &node.target("b")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(node.mounter.mount_count(), 1);

    node.driver.unpublish_volume(&id, &target).await.unwrap();
    node.driver.delete_volume(&id).await.unwrap();
    assert!(!vol_dir.exists());
    assert_eq!(node.mounter.mount_count(), 0);
}
