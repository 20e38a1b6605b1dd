//! 社区进度同步：事件幂等、快照覆盖、在线成员广播

mod support;

use application::{ApplicationError, ErrorCode, ProgressionSyncRequest};
use serde_json::{json, Value};
use support::TestHarness;

fn request(body: Value) -> ProgressionSyncRequest {
    serde_json::from_value(body).expect("valid sync request")
}

#[tokio::test]
async fn replayed_event_ids_are_recorded_once() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let mut b = harness.connect(&bob).await;

    let body = json!({
        "userId": alice.user_id,
        "community": {"id": "rustaceans", "name": "Rustaceans"},
        "members": [{"userId": bob.user_id}],
        "event": {"eventId": "evt-1", "challengeId": "borrowck-101", "xpAwarded": 40},
    });

    let first = harness.core.progression.sync(request(body.clone())).await.unwrap();
    assert!(first.event_recorded);
    assert_eq!(first.progress.as_ref().map(|p| p.xp), Some(40));
    assert_eq!(first.broadcasts_delivered, 1);
    let update = b.expect("community_progress_update");
    assert_eq!(update["communityId"], "rustaceans");
    assert_eq!(update["progress"]["xp"], 40);

    let replay = harness.core.progression.sync(request(body)).await.unwrap();
    assert!(!replay.event_recorded);
    assert_eq!(replay.progress.as_ref().map(|p| p.xp), Some(40));
    assert_eq!(replay.broadcasts_delivered, 0);
    assert!(b.kinds().is_empty());
}

#[tokio::test]
async fn snapshots_overwrite_and_only_changes_broadcast() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let mut a = harness.connect(&alice).await;

    let body = json!({
        "userId": alice.user_id,
        "communityId": "gophers",
        "community": {"id": "gophers", "name": "Gophers"},
        "progress": {"xp": 120, "currentStreak": 3, "longestStreak": 5},
    });
    let synced = harness.core.progression.sync(request(body.clone())).await.unwrap();
    assert_eq!(synced.members.len(), 1);
    assert_eq!(synced.progress.as_ref().map(|p| p.longest_streak), Some(5));
    a.expect("community_progress_update");

    let unchanged = harness.core.progression.sync(request(body)).await.unwrap();
    assert_eq!(unchanged.broadcasts_delivered, 0);
    assert!(a.kinds().is_empty());
}

#[tokio::test]
async fn mismatched_community_ids_are_rejected() {
    let harness = TestHarness::new();
    let err = harness
        .core
        .progression
        .sync(request(json!({
            "communityId": "a",
            "community": {"id": "b", "name": "B"},
        })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn unknown_community_without_inline_definition_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .core
        .progression
        .sync(request(json!({"communityId": "ghost"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::NotFound { .. }));
}

#[tokio::test]
async fn negative_xp_fails_validation() {
    let harness = TestHarness::new();
    let err = harness
        .core
        .progression
        .sync(request(json!({
            "community": {"id": "c", "name": "C"},
            "event": {"eventId": "e", "userId": uuid::Uuid::new_v4(), "xpAwarded": -5},
        })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn event_xp_saturates_instead_of_overflowing() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;

    harness
        .core
        .progression
        .sync(request(json!({
            "userId": alice.user_id,
            "community": {"id": "maxed", "name": "Maxed"},
            "progress": {"xp": i64::MAX, "currentStreak": 1, "longestStreak": 1},
        })))
        .await
        .unwrap();

    let folded = harness
        .core
        .progression
        .sync(request(json!({
            "userId": alice.user_id,
            "communityId": "maxed",
            "event": {"eventId": "evt-after-max", "xpAwarded": 1},
        })))
        .await
        .unwrap();
    assert!(folded.event_recorded);
    assert_eq!(folded.progress.as_ref().map(|p| p.xp), Some(i64::MAX));
}

#[tokio::test]
async fn progress_locks_are_released_after_each_sync() {
    let harness = TestHarness::new();
    let mut syncs = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let user = harness.user(name).await;
        for community in ["one", "two"] {
            syncs.push(harness.core.progression.sync(request(json!({
                "userId": user.user_id,
                "community": {"id": community, "name": community},
                "event": {"eventId": format!("{}-{}", name, community), "xpAwarded": 10},
            }))));
        }
    }

    for result in futures_util::future::join_all(syncs).await {
        assert!(result.unwrap().event_recorded);
    }
    assert_eq!(harness.core.progression.pending_locks(), 0);
}
