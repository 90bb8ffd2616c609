mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{FakeRenderer, Harness, Options, ScriptedProcessor};
use content_release::collections::{
    ApprovalStatus, CollectionDescription, CollectionType, EventType, Stage, ARCHIVE_SUFFIX,
    DESCRIPTION_FILE, SYSTEM_ACTOR,
};
use content_release::error::ReleaseError;
use content_release::notifications::NotificationKind;

#[tokio::test]
async fn test_unreviewed_content_blocks_approval() {
    let h = Harness::new();
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/a.json", "a").await;
    let ctx = h.state.context(&editor.email, None);
    q2.create(&ctx, "/b.json", Bytes::from("b")).await.unwrap();

    let result = h.state.approvals.submit(&mut q2, &editor).await;
    assert!(matches!(result, Err(ReleaseError::Conflict(_))));
    assert_eq!(q2.description.approval_status, ApprovalStatus::NotStarted);
    assert_eq!(h.reload(&q2).await.description.approval_status, ApprovalStatus::NotStarted);

    q2.complete(&ctx, "/b.json", false).await.unwrap();
    let result = h.state.approvals.submit(&mut q2, &editor).await;
    assert!(matches!(result, Err(ReleaseError::Conflict(_))));
    assert_eq!(q2.description.approval_status, ApprovalStatus::NotStarted);
}

#[tokio::test]
async fn test_approval_completes_and_notifies() {
    let h = Harness::new();
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/a.json", "a").await;

    let pending = h.state.approvals.submit(&mut q2, &editor).await.unwrap();
    assert_eq!(q2.description.approval_status, ApprovalStatus::InProgress);
    assert!(pending.wait().await);

    let q2 = h.reload(&q2).await;
    assert_eq!(q2.description.approval_status, ApprovalStatus::Complete);
    let events: Vec<EventType> = q2.description.events.iter().map(|e| e.event_type).collect();
    assert!(events.ends_with(&[EventType::ApprovalSubmitted, EventType::Approved]));

    let approved = h.notifications.of_kind(NotificationKind::Approved);
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].uris_to_update().to_vec(), vec!["/a.json".to_string()]);
    assert!(h.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_approved_collection_cannot_be_resubmitted() {
    let h = Harness::new();
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/a.json", "a").await;
    assert!(h.state.approvals.submit(&mut q2, &editor).await.unwrap().wait().await);

    let mut q2 = h.reload(&q2).await;
    let result = h.state.approvals.submit(&mut q2, &editor).await;
    assert!(matches!(result, Err(ReleaseError::Conflict(_))));
    assert_eq!(q2.description.approval_status, ApprovalStatus::Complete);
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    let processor = Arc::new(ScriptedProcessor::slow(Duration::from_millis(20)));
    let h = Harness::build(Options {
        processor: processor.clone(),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;

    let mut pending = Vec::new();
    for name in ["first", "second", "third"] {
        let mut collection = h.collection(&editor, name).await;
        h.add_reviewed(&editor, &mut collection, &format!("/{name}.json"), name)
            .await;
        pending.push(h.state.approvals.submit(&mut collection, &editor).await.unwrap());
    }
    for result in pending {
        assert!(result.wait().await);
    }

    assert_eq!(processor.seen(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_full_queue_refuses_submission() {
    let processor = Arc::new(ScriptedProcessor::slow(Duration::from_millis(50)));
    let h = Harness::build(Options {
        processor,
        queue_capacity: 1,
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut a = h.collection(&editor, "A").await;
    let mut b = h.collection(&editor, "B").await;
    h.add_reviewed(&editor, &mut a, "/a.json", "a").await;
    h.add_reviewed(&editor, &mut b, "/b.json", "b").await;

    // The worker has not run yet, so the first job still fills the queue
    let first = h.state.approvals.submit(&mut a, &editor).await.unwrap();
    let result = h.state.approvals.submit(&mut b, &editor).await;
    assert!(matches!(result, Err(ReleaseError::Unavailable(_))));
    assert_eq!(b.description.approval_status, ApprovalStatus::NotStarted);

    assert!(first.wait().await);
}

#[tokio::test]
async fn test_failed_processing_marks_error_and_alerts() {
    let processor = Arc::new(ScriptedProcessor::failing());
    let h = Harness::build(Options {
        processor: processor.clone(),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/a.json", "a").await;

    let pending = h.state.approvals.submit(&mut q2, &editor).await.unwrap();
    assert!(!pending.wait().await);

    let mut q2 = h.reload(&q2).await;
    assert_eq!(q2.description.approval_status, ApprovalStatus::Error);
    let last = q2.description.events.last().unwrap();
    assert_eq!(last.event_type, EventType::ApprovalFailed);
    assert!(last.detail.as_deref().unwrap().contains("dataset generation failed"));
    assert_eq!(processor.cleaned(), 1);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].starts_with("Q2: approval failed"));
    assert!(h.notifications.of_kind(NotificationKind::Approved).is_empty());

    // Content is untouched and the collection can be resubmitted
    assert!(q2.description.reviewed.contains("/a.json"));
    assert!(h.state.approvals.submit(&mut q2, &editor).await.is_ok());
}

#[tokio::test]
async fn test_slow_collaborator_times_out() {
    let processor = Arc::new(ScriptedProcessor::slow(Duration::from_secs(10)));
    let h = Harness::build(Options {
        processor,
        step_timeout_secs: 1,
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/a.json", "a").await;

    let pending = h.state.approvals.submit(&mut q2, &editor).await.unwrap();
    assert!(!pending.wait().await);

    let q2 = h.reload(&q2).await;
    assert_eq!(q2.description.approval_status, ApprovalStatus::Error);
    let detail = q2.description.events.last().unwrap().detail.clone().unwrap();
    assert!(detail.contains("timed out"), "{detail}");
}

#[tokio::test]
async fn test_generated_content_joins_reviewed_stage() {
    let processor = Arc::new(ScriptedProcessor::generating(vec![(
        "/economy/dataset/download.csv",
        "1,2,3",
    )]));
    let h = Harness::build(Options {
        processor: processor.clone(),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/economy/dataset/data.json", "{}").await;

    assert!(h.state.approvals.submit(&mut q2, &editor).await.unwrap().wait().await);

    let q2 = h.reload(&q2).await;
    assert!(q2.description.reviewed.contains("/economy/dataset/download.csv"));
    assert!(q2.description.generated.contains("/economy/dataset/download.csv"));
    assert_eq!(
        processor.read(),
        vec![("/economy/dataset/data.json".to_string(), Bytes::from("{}"))]
    );
}

#[tokio::test]
async fn test_processor_reads_decrypted_content() {
    let processor = Arc::new(ScriptedProcessor::default());
    let h = Harness::build(Options {
        processor: processor.clone(),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut description = CollectionDescription::new("Secret", CollectionType::Manual);
    description.encrypted = true;
    let mut secret = h.collection_with(&editor, description).await;
    h.add_reviewed(&editor, &mut secret, "/a.json", "plain").await;

    assert!(h.state.approvals.submit(&mut secret, &editor).await.unwrap().wait().await);
    assert_eq!(processor.read(), vec![("/a.json".to_string(), Bytes::from("plain"))]);
}

#[tokio::test]
async fn test_encrypted_approval_needs_the_key() {
    let h = Harness::new();
    let creator = h.editor("creator@example.com").await;
    let mut description = CollectionDescription::new("Secret", CollectionType::Manual);
    description.encrypted = true;
    let mut secret = h.collection_with(&creator, description).await;
    h.add_reviewed(&creator, &mut secret, "/a.json", "a").await;

    let late = h.editor("late@example.com").await;
    let result = h.state.approvals.submit(&mut secret, &late).await;
    assert!(matches!(result, Err(ReleaseError::Unauthorized(_))));
    assert_eq!(secret.description.approval_status, ApprovalStatus::NotStarted);
}

#[tokio::test]
async fn test_renderable_pages_get_a_pdf() {
    let renderer = Arc::new(FakeRenderer::failing_on(&["/economy/broken"]));
    let h = Harness::build(Options {
        renderer: Some(renderer.clone()),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/economy/article/data.json", r#"{"type":"article"}"#)
        .await;
    h.add_reviewed(&editor, &mut q2, "/economy/broken/data.json", r#"{"type":"bulletin"}"#)
        .await;
    h.add_reviewed(&editor, &mut q2, "/economy/chart/data.json", r#"{"type":"chart"}"#)
        .await;

    assert!(h.state.approvals.submit(&mut q2, &editor).await.unwrap().wait().await);

    assert_eq!(renderer.rendered(), vec!["/economy/article"]);
    let q2 = h.reload(&q2).await;
    assert!(q2.description.generated.contains("/economy/article/page.pdf"));
    assert!(!q2.is_in_collection("/economy/broken/page.pdf"));
    assert!(!q2.is_in_collection("/economy/chart/page.pdf"));
    assert_eq!(
        q2.read_content(Stage::Reviewed, "/economy/article/page.pdf", None)
            .await
            .unwrap(),
        Bytes::from_static(b"%PDF-1.7 fake")
    );
}

#[tokio::test]
async fn test_release_page_lists_related_documents() {
    let h = Harness::new();
    let editor = h.editor("editor@example.com").await;
    let mut description = CollectionDescription::new("Q2", CollectionType::Manual);
    description.release_uri = Some("/releases/q2".to_string());
    let mut q2 = h.collection_with(&editor, description).await;
    h.add_reviewed(&editor, &mut q2, "/releases/q2/data.json", r#"{"type":"release"}"#)
        .await;
    h.add_reviewed(&editor, &mut q2, "/economy/article/data.json", r#"{"type":"article"}"#)
        .await;

    assert!(h.state.approvals.submit(&mut q2, &editor).await.unwrap().wait().await);

    let q2 = h.reload(&q2).await;
    let data = q2
        .read_content(Stage::Reviewed, "/releases/q2/data.json", None)
        .await
        .unwrap();
    let page: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(page["type"], "release");
    assert_eq!(page["relatedDocuments"], serde_json::json!(["/economy/article"]));
}

#[tokio::test]
async fn test_timeseries_are_archived_and_unlock_restores_them() {
    let processor = Arc::new(ScriptedProcessor::generating(vec![("/economy/extra.csv", "x")]));
    let h = Harness::build(Options {
        processor: processor.clone(),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/economy/timeseries/a.json", "a").await;
    h.add_reviewed(&editor, &mut q2, "/economy/timeseries/b.json", "b").await;
    h.add_reviewed(&editor, &mut q2, "/economy/data.json", "{}").await;

    assert!(h.state.approvals.submit(&mut q2, &editor).await.unwrap().wait().await);

    let mut q2 = h.reload(&q2).await;
    let archive_uri = format!("/economy/timeseries{ARCHIVE_SUFFIX}");
    assert!(q2.description.reviewed.contains(&archive_uri));
    assert!(!q2.description.reviewed.contains("/economy/timeseries/a.json"));
    assert_eq!(q2.description.archives.len(), 1);
    assert!(q2.is_in_collection("/economy/timeseries/a.json"));
    assert_eq!(
        q2.description.uris_to_publish(),
        vec![
            "/economy/data.json",
            "/economy/extra.csv",
            "/economy/timeseries/a.json",
            "/economy/timeseries/b.json",
        ]
    );

    let ctx = h.state.context(&editor.email, None);
    assert!(q2.unlock(&ctx, processor.as_ref()).await.unwrap());
    assert_eq!(q2.description.approval_status, ApprovalStatus::NotStarted);
    assert!(q2.description.archives.is_empty());
    assert!(q2.description.generated.is_empty());
    assert!(!q2.is_in_collection("/economy/extra.csv"));
    assert!(!q2.is_in_collection(&archive_uri));
    assert_eq!(
        q2.read_content(Stage::Reviewed, "/economy/timeseries/b.json", None)
            .await
            .unwrap(),
        Bytes::from("b")
    );
    assert_eq!(processor.cleaned(), 1);

    // Unlocking again changes nothing
    let events = q2.description.events.len();
    assert!(q2.unlock(&ctx, processor.as_ref()).await.unwrap());
    assert_eq!(q2.description.events.len(), events);
    assert_eq!(processor.cleaned(), 1);
}

#[tokio::test]
async fn test_unlock_leaves_other_statuses_alone() {
    let h = Harness::new();
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    let ctx = h.state.context(&editor.email, None);

    for status in [ApprovalStatus::NotStarted, ApprovalStatus::InProgress, ApprovalStatus::Error] {
        q2.description.approval_status = status;
        assert!(q2.unlock(&ctx, h.processor.as_ref()).await.unwrap());
        assert_eq!(q2.description.approval_status, status);
    }
}

#[tokio::test]
async fn test_teams_are_frozen_while_locked() {
    let processor = Arc::new(ScriptedProcessor::slow(Duration::from_millis(300)));
    let h = Harness::build(Options {
        processor: processor.clone(),
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut q2 = h.collection(&editor, "Q2").await;
    h.add_reviewed(&editor, &mut q2, "/a.json", "a").await;
    let teams: std::collections::BTreeSet<String> = ["economics".to_string()].into();

    let pending = h.state.approvals.submit(&mut q2, &editor).await.unwrap();
    let mut running = h.reload(&q2).await;
    let result = h.state.update_teams(&editor, &mut running, teams.clone()).await;
    assert!(matches!(result, Err(ReleaseError::Conflict(_))));
    assert!(pending.wait().await);

    let mut approved = h.reload(&q2).await;
    assert_eq!(approved.description.approval_status, ApprovalStatus::Complete);
    assert!(approved.description.teams.is_empty());
    let result = h.state.update_teams(&editor, &mut approved, teams.clone()).await;
    assert!(matches!(result, Err(ReleaseError::Conflict(_))));

    let ctx = h.state.context(&editor.email, None);
    assert!(approved.unlock(&ctx, processor.as_ref()).await.unwrap());
    h.state
        .update_teams(&editor, &mut approved, teams)
        .await
        .unwrap();
    assert!(h.reload(&q2).await.description.teams.contains("economics"));
}

#[tokio::test]
async fn test_unreadable_collection_fails_approval() {
    let processor = Arc::new(ScriptedProcessor::slow(Duration::from_millis(300)));
    let h = Harness::build(Options {
        processor,
        ..Default::default()
    });
    let editor = h.editor("editor@example.com").await;
    let mut a = h.collection(&editor, "A").await;
    let mut b = h.collection(&editor, "B").await;
    h.add_reviewed(&editor, &mut a, "/a.json", "a").await;
    h.add_reviewed(&editor, &mut b, "/b.json", "b").await;

    let first = h.state.approvals.submit(&mut a, &editor).await.unwrap();
    let second = h.state.approvals.submit(&mut b, &editor).await.unwrap();
    // Corrupted while waiting behind the first job
    std::fs::write(b.path().join(DESCRIPTION_FILE), b"not json").unwrap();

    assert!(first.wait().await);
    assert!(!second.wait().await);

    let mut b = h.reload(&b).await;
    assert_eq!(b.description.approval_status, ApprovalStatus::Error);
    assert_eq!(b.description.events.last().unwrap().event_type, EventType::ApprovalFailed);
    assert!(b.description.reviewed.contains("/b.json"));
    assert_eq!(h.alerts.alerts().len(), 1);

    let retry = h.state.approvals.submit(&mut b, &editor).await.unwrap();
    assert!(retry.wait().await);
}

#[tokio::test]
async fn test_interrupted_approvals_fail_at_startup() {
    let h = Harness::new();
    let editor = h.editor("editor@example.com").await;
    let mut stuck = h.collection(&editor, "Stuck").await;
    h.add_reviewed(&editor, &mut stuck, "/stuck.json", "s").await;
    stuck.description.approval_status = ApprovalStatus::InProgress;
    stuck.save().await.unwrap();

    let mut approved = h.collection(&editor, "Approved").await;
    h.add_reviewed(&editor, &mut approved, "/approved.json", "a").await;
    approved.description.approval_status = ApprovalStatus::Complete;
    approved.save().await.unwrap();

    assert_eq!(h.state.recover_interrupted_approvals().await.unwrap(), 1);

    let mut stuck = h.reload(&stuck).await;
    assert_eq!(stuck.description.approval_status, ApprovalStatus::Error);
    let last = stuck.description.events.last().unwrap();
    assert_eq!(last.event_type, EventType::ApprovalFailed);
    assert_eq!(last.email, SYSTEM_ACTOR);
    assert_eq!(
        h.reload(&approved).await.description.approval_status,
        ApprovalStatus::Complete
    );

    let pending = h.state.approvals.submit(&mut stuck, &editor).await.unwrap();
    assert!(pending.wait().await);
    assert_eq!(
        h.reload(&stuck).await.description.approval_status,
        ApprovalStatus::Complete
    );
}
