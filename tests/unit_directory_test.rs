use xpod::core::directory::{MemoryPodStore, MigrationState, MigrationStatus, Pod, PodStore};

fn pod(pod_id: &str, base_url: &str, node_id: Option<&str>) -> Pod {
    Pod {
        pod_id: pod_id.to_string(),
        account_id: "acct-1".to_string(),
        base_url: base_url.to_string(),
        node_id: node_id.map(str::to_string),
        migration_status: None,
        migration_target_node: None,
        migration_progress: None,
    }
}

#[tokio::test]
async fn longest_base_url_prefix_wins() {
    let store = MemoryPodStore::new();
    store
        .insert(pod("b1", "https://h/alice/", Some("A")))
        .await
        .unwrap();
    store
        .insert(pod("b2", "https://h/alice/work/", Some("B")))
        .await
        .unwrap();

    let hit = store
        .find_by_resource_identifier("https://h/alice/work/notes.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.pod_id, "b2");
    assert_eq!(hit.node_id.as_deref(), Some("B"));

    let hit = store
        .find_by_resource_identifier("https://h/alice/notes.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.pod_id, "b1");

    assert!(
        store
            .find_by_resource_identifier("https://h/carol/")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn duplicate_pod_id_is_rejected() {
    let store = MemoryPodStore::new();
    store
        .insert(pod("p", "https://h/p/", Some("A")))
        .await
        .unwrap();
    let err = store
        .insert(pod("p", "https://h/p2/", Some("A")))
        .await
        .unwrap_err();
    assert!(matches!(err, xpod::XpodError::AlreadyExists(_)));
}

#[tokio::test]
async fn set_node_id_flips_ownership() {
    let store = MemoryPodStore::new();
    store
        .insert(pod("p", "https://h/p/", Some("A")))
        .await
        .unwrap();
    store.set_node_id("p", "B").await.unwrap();
    let flipped = store.find_by_id("p").await.unwrap().unwrap();
    assert_eq!(flipped.node_id.as_deref(), Some("B"));

    let err = store.set_node_id("ghost", "B").await.unwrap_err();
    assert!(matches!(err, xpod::XpodError::NotFound(_)));
}

#[tokio::test]
async fn migration_status_round_trip() {
    let store = MemoryPodStore::new();
    store
        .insert(pod("p", "https://h/p/", Some("A")))
        .await
        .unwrap();

    let initial = store.get_migration_status("p").await.unwrap();
    assert!(initial.status.is_none());
    assert!(initial.progress.is_none());

    store
        .set_migration_status(
            "p",
            MigrationState {
                status: Some(MigrationStatus::Syncing),
                target_node: Some("B".to_string()),
                progress: Some(42),
            },
        )
        .await
        .unwrap();
    let mid = store.get_migration_status("p").await.unwrap();
    assert_eq!(mid.status, Some(MigrationStatus::Syncing));
    assert_eq!(mid.target_node.as_deref(), Some("B"));
    assert_eq!(mid.progress, Some(42));

    store
        .set_migration_status("p", MigrationState::default())
        .await
        .unwrap();
    let cleared = store.get_migration_status("p").await.unwrap();
    assert!(cleared.status.is_none());
}
