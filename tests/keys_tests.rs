mod common;

use common::{Harness, PASSWORD};
use content_release::collections::{CollectionDescription, CollectionType};
use content_release::error::ReleaseError;
use content_release::storage::models::PermissionRecord;

#[tokio::test]
async fn test_new_key_reaches_everyone_entitled() {
    let h = Harness::new();
    let admin = h.user("admin@example.com", PermissionRecord::administrator()).await;
    let creator = h.editor("creator@example.com").await;
    let colleague = h.editor("colleague@example.com").await;
    let viewer = h.user("viewer@example.com", PermissionRecord::viewer(["economics"])).await;

    let q2 = h.collection(&creator, "Q2").await;
    let creator_key = h.state.collection_key(&creator, &q2).expect("creator holds the key");

    // Live sessions
    assert_eq!(h.state.collection_key(&admin, &q2), Some(creator_key.clone()));
    assert_eq!(h.state.collection_key(&colleague, &q2), Some(creator_key.clone()));
    assert!(h.state.collection_key(&viewer, &q2).is_none());

    // Stored keyrings
    for email in ["admin@example.com", "creator@example.com", "colleague@example.com"] {
        assert!(h.state.db.get_keyring(email).unwrap().contains(q2.id()), "{email}");
    }
    assert!(!h.state.db.get_keyring("viewer@example.com").unwrap().contains(q2.id()));
}

#[tokio::test]
async fn test_stored_keyring_opens_at_next_login() {
    let h = Harness::new();
    let creator = h.editor("creator@example.com").await;
    let q2 = h.collection(&creator, "Q2").await;
    let key = h.state.collection_key(&creator, &q2).unwrap();

    h.state.logout(&creator);
    assert!(h.state.collection_key(&creator, &q2).is_none());

    let again = h.state.login("creator@example.com", PASSWORD).await.unwrap();
    assert_eq!(h.state.collection_key(&again, &q2), Some(key));
}

#[tokio::test]
async fn test_team_changes_redistribute_the_key() {
    let h = Harness::new();
    let creator = h.editor("creator@example.com").await;
    let viewer = h.user("viewer@example.com", PermissionRecord::viewer(["economics"])).await;
    let mut q2 = h.collection(&creator, "Q2").await;
    assert!(h.state.collection_key(&viewer, &q2).is_none());

    q2.description.teams.insert("economics".to_string());
    q2.save().await.unwrap();
    h.state
        .keys
        .distribute_collection_key(&creator, &q2.description)
        .await
        .unwrap();
    assert!(h.state.collection_key(&viewer, &q2).is_some());
    assert!(h.state.db.get_keyring("viewer@example.com").unwrap().contains(q2.id()));

    q2.description.teams.clear();
    q2.save().await.unwrap();
    h.state
        .keys
        .distribute_collection_key(&creator, &q2.description)
        .await
        .unwrap();
    assert!(h.state.collection_key(&viewer, &q2).is_none());
    assert!(!h.state.db.get_keyring("viewer@example.com").unwrap().contains(q2.id()));

    // The creator keeps it throughout
    assert!(h.state.collection_key(&creator, &q2).is_some());
}

#[tokio::test]
async fn test_late_users_get_the_key_on_redistribution() {
    let h = Harness::new();
    let creator = h.editor("creator@example.com").await;
    let q2 = h.collection(&creator, "Q2").await;

    let late = h.editor("late@example.com").await;
    assert!(h.state.collection_key(&late, &q2).is_none());

    h.state
        .keys
        .distribute_collection_key(&creator, &q2.description)
        .await
        .unwrap();
    assert!(h.state.collection_key(&late, &q2).is_some());
}

#[tokio::test]
async fn test_only_key_holders_can_distribute() {
    let h = Harness::new();
    let creator = h.editor("creator@example.com").await;
    let q2 = h.collection(&creator, "Q2").await;
    let late = h.editor("late@example.com").await;

    let result = h
        .state
        .keys
        .distribute_collection_key(&late, &q2.description)
        .await;
    assert!(matches!(result, Err(ReleaseError::Unauthorized(_))));
}

#[tokio::test]
async fn test_revoke_removes_key_everywhere() {
    let h = Harness::new();
    let creator = h.editor("creator@example.com").await;
    let colleague = h.editor("colleague@example.com").await;
    let mut description = CollectionDescription::new("Secret", CollectionType::Manual);
    description.encrypted = true;
    let secret = h.collection_with(&creator, description).await;

    let removed = h.state.keys.revoke_collection_key(secret.id()).unwrap();
    assert_eq!(removed, 2);
    assert!(h.state.collection_key(&creator, &secret).is_none());
    assert!(h.state.collection_key(&colleague, &secret).is_none());
    assert!(!h.state.db.get_keyring("creator@example.com").unwrap().contains(secret.id()));
}

#[tokio::test]
async fn test_wrong_password_opens_nothing() {
    let h = Harness::new();
    h.editor("creator@example.com").await;

    let result = h.state.keys.open_keyring("creator@example.com", "wrong");
    assert!(matches!(result, Err(ReleaseError::Unauthorized(_))));
    let result = h.state.keys.open_keyring("nobody@example.com", PASSWORD);
    assert!(matches!(result, Err(ReleaseError::Unauthorized(_))));
}
