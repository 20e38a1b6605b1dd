//! 群聊流程：创建与容量、提及、单槽置顶、角色与生命周期

mod support;

use application::MessagingSettings;
use chrono::Duration;
use domain::{GroupRepository, UserProfile};
use serde_json::{json, Value};
use support::{TestClient, TestHarness};
use uuid::Uuid;

struct GroupFixture {
    harness: TestHarness,
    alice: UserProfile,
    bob: UserProfile,
    carol: UserProfile,
    a: TestClient,
    b: TestClient,
    c: TestClient,
    group_id: Value,
}

/// alice 创建群组并拉入 bob、carol
async fn group_fixture(harness: TestHarness) -> GroupFixture {
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let carol = harness.user("carol").await;
    harness.store.follow(alice.user_id, bob.user_id).await;
    harness.store.follow(alice.user_id, carol.user_id).await;

    let mut a = harness.connect(&alice).await;
    let mut b = harness.connect(&bob).await;
    let mut c = harness.connect(&carol).await;
    a.drain();
    b.drain();

    a.send(json!({
        "type": "create_group",
        "name": "study buddies",
        "initialMembers": [bob.user_id, carol.user_id],
    }))
    .await;
    let created = a.expect("group_created");
    let group_id = created["group"]["groupId"].clone();
    b.expect("added_to_group");
    c.expect("added_to_group");

    GroupFixture {
        harness,
        alice,
        bob,
        carol,
        a,
        b,
        c,
        group_id,
    }
}

#[tokio::test]
async fn create_group_excludes_unfollowed_and_blocked_candidates() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let carol = harness.user("carol").await;
    let dave = harness.user("dave").await;
    harness.store.follow(alice.user_id, bob.user_id).await;
    harness.store.follow(alice.user_id, dave.user_id).await;
    harness.store.block(dave.user_id, alice.user_id).await;

    let mut a = harness.connect(&alice).await;
    a.send(json!({
        "type": "create_group",
        "name": "mixed",
        "initialMembers": [bob.user_id, carol.user_id, dave.user_id, bob.user_id],
    }))
    .await;

    let created = a.expect("group_created");
    let members: Vec<String> = created["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["userId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(members, vec![alice.user_id.to_string(), bob.user_id.to_string()]);
    assert_eq!(created["members"][0]["role"], "admin");

    let excluded = created["excludedMembers"].as_array().unwrap();
    assert_eq!(excluded.len(), 2);
    assert!(excluded.contains(&json!(carol.user_id)));
    assert!(excluded.contains(&json!(dave.user_id)));
}

#[tokio::test]
async fn create_group_rejects_too_many_members_before_writing() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let mut invited = Vec::new();
    for name in ["bob", "carol", "dave"] {
        let user = harness.user(name).await;
        harness.store.follow(alice.user_id, user.user_id).await;
        invited.push(user.user_id);
    }

    let mut a = harness.connect(&alice).await;
    a.send(json!({
        "type": "create_group",
        "name": "tiny",
        "initialMembers": invited,
        "maxMembers": 3,
    }))
    .await;

    let error = a.expect_error("TOO_MANY_MEMBERS");
    assert_eq!(error["details"]["maxMembers"], 3);
    assert_eq!(error["details"]["requested"], 4);

    let groups = GroupRepository::list_active_for_user(harness.store.as_ref(), alice.user_id)
        .await
        .unwrap();
    assert!(groups.is_empty());
}

#[tokio::test]
async fn messages_fan_out_and_mentions_notify_members() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.b.send(json!({
        "type": "send_group_message",
        "groupId": f.group_id,
        "content": "hey @Carol and @nobody",
    }))
    .await;

    let sent = f.b.expect("group_message_sent");
    assert_eq!(sent["message"]["mentions"], json!([f.carol.user_id]));
    f.a.expect("new_group_message");
    assert_eq!(f.c.kinds(), vec!["new_group_message", "mentioned"]);
    assert!(f.a.kinds().is_empty());

    f.a.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "@everyone standup"}))
        .await;
    f.a.expect("group_message_sent");
    assert_eq!(f.b.kinds(), vec!["new_group_message", "mentioned"]);
    assert_eq!(f.c.kinds(), vec!["new_group_message", "mentioned"]);
    assert!(f.a.kinds().is_empty());
}

#[tokio::test]
async fn non_members_cannot_post() {
    let mut f = group_fixture(TestHarness::new()).await;
    let eve = f.harness.user("eve").await;
    let mut e = f.harness.connect(&eve).await;

    e.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "let me in"}))
        .await;
    e.expect_error("NOT_GROUP_MEMBER");
    assert!(f.a.kinds().iter().all(|k| k != "new_group_message"));
}

#[tokio::test]
async fn pinning_keeps_a_single_slot() {
    let mut f = group_fixture(TestHarness::new()).await;

    let mut ids = Vec::new();
    for content in ["first", "second"] {
        f.b.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": content}))
            .await;
        ids.push(f.b.expect("group_message_sent")["message"]["id"].clone());
    }
    f.a.drain();

    f.b.send(json!({"type": "pin_message", "groupId": f.group_id, "messageId": ids[0]}))
        .await;
    f.b.expect_error("INSUFFICIENT_PERMISSIONS");

    f.a.send(json!({"type": "pin_message", "groupId": f.group_id, "messageId": ids[0]}))
        .await;
    assert_eq!(f.c.expect("message_pinned")["message"]["id"], ids[0]);
    f.a.send(json!({"type": "pin_message", "groupId": f.group_id, "messageId": ids[1]}))
        .await;
    assert_eq!(f.c.expect("message_pinned")["message"]["id"], ids[1]);

    f.c.send(json!({"type": "get_group_history", "groupId": f.group_id}))
        .await;
    let history = f.c.expect("group_history");
    assert_eq!(history["pinnedMessage"]["id"], ids[1]);
    let pinned: Vec<&Value> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["isPinned"] == true)
        .collect();
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0]["id"], ids[1]);
}

#[tokio::test]
async fn announcements_are_pinned_and_delivered() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.a.send(json!({"type": "send_announcement", "groupId": f.group_id, "content": "exam on friday"}))
        .await;
    let sent = f.a.expect("group_message_sent");
    assert_eq!(sent["message"]["isAnnouncement"], true);

    let received = f.b.expect("new_group_message");
    assert_eq!(received["message"]["content"], "exam on friday");
    let pinned = f.b.expect("message_pinned");
    assert_eq!(pinned["message"]["id"], sent["message"]["id"]);

    f.b.send(json!({"type": "send_announcement", "groupId": f.group_id, "content": "not allowed"}))
        .await;
    f.b.expect_error("INSUFFICIENT_PERMISSIONS");
}

#[tokio::test]
async fn admins_cannot_demote_themselves() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.a.send(json!({"type": "demote_member", "groupId": f.group_id, "userId": f.alice.user_id}))
        .await;
    f.a.expect_error("CANNOT_DEMOTE_SELF");

    f.a.send(json!({"type": "promote_member", "groupId": f.group_id, "userId": f.bob.user_id}))
        .await;
    let changed = f.c.expect("member_role_changed");
    assert_eq!(changed["userId"], f.bob.user_id.to_string());
    assert_eq!(changed["role"], "admin");

    f.c.send(json!({"type": "promote_member", "groupId": f.group_id, "userId": f.carol.user_id}))
        .await;
    f.c.expect_error("INSUFFICIENT_PERMISSIONS");
}

#[tokio::test]
async fn last_admin_leaving_soft_deletes_the_group() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.c.send(json!({"type": "leave_group", "groupId": f.group_id})).await;
    f.c.expect("left_group");
    assert_eq!(f.a.expect("member_left")["userId"], f.carol.user_id.to_string());

    f.a.send(json!({"type": "leave_group", "groupId": f.group_id})).await;
    let deleted = f.b.expect("group_deleted");
    assert_eq!(deleted["permanent"], false);
    assert_eq!(deleted["deletedBy"], f.alice.user_id.to_string());

    f.b.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "anyone?"}))
        .await;
    f.b.expect_error("GROUP_NOT_ACTIVE");

    f.b.send(json!({"type": "get_groups"})).await;
    let list = f.b.expect("group_list");
    assert_eq!(list["groups"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn adding_a_member_checks_blocks_against_existing_members() {
    let mut f = group_fixture(TestHarness::new()).await;
    let dave = f.harness.user("dave").await;
    f.harness.store.follow(f.alice.user_id, dave.user_id).await;
    f.harness.store.block(f.carol.user_id, dave.user_id).await;

    f.a.send(json!({"type": "add_group_member", "groupId": f.group_id, "userId": dave.user_id}))
        .await;
    f.a.expect_error("USER_BLOCKED");

    f.harness.store.follow(f.alice.user_id, f.bob.user_id).await;
    f.a.send(json!({"type": "add_group_member", "groupId": f.group_id, "userId": f.bob.user_id}))
        .await;
    f.a.expect_error("ALREADY_MEMBER");
}

#[tokio::test]
async fn sweeper_purges_groups_after_the_grace_period() {
    let settings = MessagingSettings {
        grace_period: Duration::days(30),
        ..MessagingSettings::default()
    };
    let mut f = group_fixture(TestHarness::with_settings(settings)).await;
    let group_id: Uuid = serde_json::from_value(f.group_id.clone()).unwrap();

    f.a.send(json!({"type": "delete_group", "groupId": f.group_id, "permanent": false}))
        .await;
    assert_eq!(f.b.expect("group_deleted")["permanent"], false);

    f.harness.clock.advance(Duration::days(29));
    assert_eq!(f.harness.core.groups.purge_expired_groups().await.unwrap(), 0);

    f.harness.clock.advance(Duration::days(2));
    assert_eq!(f.harness.core.groups.purge_expired_groups().await.unwrap(), 1);

    let group = GroupRepository::find_by_id(f.harness.store.as_ref(), group_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.lifecycle.as_str(), "hard_deleted");
    assert_eq!(f.harness.core.groups.purge_expired_groups().await.unwrap(), 0);
}

#[tokio::test]
async fn permanent_delete_skips_the_grace_period() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.b.send(json!({"type": "delete_group", "groupId": f.group_id, "permanent": true}))
        .await;
    f.b.expect_error("INSUFFICIENT_PERMISSIONS");

    f.a.send(json!({"type": "delete_group", "groupId": f.group_id, "permanent": true}))
        .await;
    assert_eq!(f.c.expect("group_deleted")["permanent"], true);
    assert_eq!(f.harness.core.groups.purge_expired_groups().await.unwrap(), 0);
}

#[tokio::test]
async fn adding_a_member_waits_for_a_concurrent_delete() {
    let mut f = group_fixture(TestHarness::new()).await;
    let dave = f.harness.user("dave").await;
    f.harness.store.follow(f.alice.user_id, dave.user_id).await;
    let group_id: Uuid = serde_json::from_value(f.group_id.clone()).unwrap();

    f.harness
        .store
        .set_write_delay(std::time::Duration::from_millis(100));
    tokio::join!(
        f.a.send(json!({"type": "delete_group", "groupId": f.group_id, "permanent": false})),
        f.a.send(json!({"type": "add_group_member", "groupId": f.group_id, "userId": dave.user_id})),
    );
    f.harness.store.set_write_delay(std::time::Duration::ZERO);

    f.a.expect_error("GROUP_NOT_ACTIVE");
    assert_eq!(f.b.expect("group_deleted")["permanent"], false);
    assert!(f.b.kinds().iter().all(|k| k != "member_added"));

    let members = domain::GroupMemberRepository::list(f.harness.store.as_ref(), group_id)
        .await
        .unwrap();
    assert!(members.iter().all(|m| m.user_id != dave.user_id));
    assert_eq!(f.harness.core.groups.pending_locks(), 0);
}

#[tokio::test]
async fn adding_beyond_max_members_is_rejected() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let carol = harness.user("carol").await;
    let dave = harness.user("dave").await;
    for user in [&bob, &carol, &dave] {
        harness.store.follow(alice.user_id, user.user_id).await;
    }

    let mut a = harness.connect(&alice).await;
    let mut b = harness.connect(&bob).await;
    a.send(json!({
        "type": "create_group",
        "name": "trio",
        "initialMembers": [bob.user_id, carol.user_id],
        "maxMembers": 3,
    }))
    .await;
    let group_id = a.expect("group_created")["group"]["groupId"].clone();
    b.drain();

    a.send(json!({"type": "add_group_member", "groupId": group_id, "userId": dave.user_id}))
        .await;
    let error = a.expect_error("GROUP_FULL");
    assert!(error["message"].as_str().unwrap().contains('3'));
    assert!(b.kinds().is_empty());
}

#[tokio::test]
async fn admins_can_delete_any_message_for_everyone() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.b.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "spoiler"}))
        .await;
    let message_id = f.b.expect("group_message_sent")["message"]["id"].clone();
    f.a.drain();
    f.c.drain();

    f.c.send(json!({
        "type": "delete_group_message",
        "groupId": f.group_id,
        "messageId": message_id,
        "forEveryone": true,
    }))
    .await;
    f.c.expect_error("INSUFFICIENT_PERMISSIONS");

    f.a.send(json!({
        "type": "delete_group_message",
        "groupId": f.group_id,
        "messageId": message_id,
        "forEveryone": true,
    }))
    .await;
    for client in [&mut f.a, &mut f.b, &mut f.c] {
        let deleted = client.expect("group_message_deleted");
        assert_eq!(deleted["messageId"], message_id);
        assert_eq!(deleted["forEveryone"], true);
    }

    f.c.send(json!({"type": "get_group_history", "groupId": f.group_id}))
        .await;
    let history = f.c.expect("group_history");
    assert!(history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .all(|m| m["id"] != message_id));
}

#[tokio::test]
async fn edits_are_limited_to_the_sender_and_the_window() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.b.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "draft"}))
        .await;
    let message_id = f.b.expect("group_message_sent")["message"]["id"].clone();
    f.a.drain();
    f.c.drain();

    f.a.send(json!({"type": "edit_group_message", "messageId": message_id, "content": "hijacked"}))
        .await;
    f.a.expect_error("INSUFFICIENT_PERMISSIONS");

    f.harness.clock.advance(Duration::minutes(2));
    f.b.send(json!({
        "type": "edit_group_message",
        "groupId": f.group_id,
        "messageId": message_id,
        "content": "final",
    }))
    .await;
    let edited = f.c.expect("group_message_edited");
    assert_eq!(edited["message"]["content"], "final");
    assert_eq!(edited["message"]["edited"], true);
    f.b.expect("group_message_edited");

    f.harness.clock.advance(Duration::minutes(4));
    f.b.send(json!({"type": "edit_group_message", "messageId": message_id, "content": "too late"}))
        .await;
    f.b.expect_error("EDIT_TIME_LIMIT_EXCEEDED");
    assert!(f.c.kinds().is_empty());
}

#[tokio::test]
async fn deleting_for_me_only_hides_the_callers_copy() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.a.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "noise"}))
        .await;
    let message_id = f.a.expect("group_message_sent")["message"]["id"].clone();
    f.b.drain();
    f.c.drain();

    f.b.send(json!({
        "type": "delete_group_message",
        "groupId": f.group_id,
        "messageId": message_id,
        "forEveryone": false,
    }))
    .await;
    let deleted = f.b.expect("group_message_deleted");
    assert_eq!(deleted["forEveryone"], false);
    assert!(f.a.kinds().is_empty());
    assert!(f.c.kinds().is_empty());

    f.b.send(json!({"type": "get_group_history", "groupId": f.group_id}))
        .await;
    let history = f.b.expect("group_history");
    assert!(history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .all(|m| m["id"] != message_id));

    f.c.send(json!({"type": "get_group_history", "groupId": f.group_id}))
        .await;
    let history = f.c.expect("group_history");
    let visible = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == message_id)
        .cloned()
        .unwrap();
    assert_eq!(visible["content"], "noise");
    assert_eq!(visible["deleted"], false);
}

#[tokio::test]
async fn only_admins_remove_members() {
    let mut f = group_fixture(TestHarness::new()).await;

    f.b.send(json!({"type": "remove_group_member", "groupId": f.group_id, "userId": f.carol.user_id}))
        .await;
    f.b.expect_error("INSUFFICIENT_PERMISSIONS");
    assert!(f.c.kinds().is_empty());

    f.a.send(json!({"type": "remove_group_member", "groupId": f.group_id, "userId": f.carol.user_id}))
        .await;
    let removed = f.c.expect("removed_from_group");
    assert_eq!(removed["removedBy"], f.alice.user_id.to_string());
    for client in [&mut f.a, &mut f.b] {
        let event = client.expect("member_removed");
        assert_eq!(event["userId"], f.carol.user_id.to_string());
    }
    assert!(f.c.kinds().iter().all(|k| k != "member_removed"));

    f.c.send(json!({"type": "send_group_message", "groupId": f.group_id, "content": "still here?"}))
        .await;
    f.c.expect_error("NOT_GROUP_MEMBER");

    f.a.send(json!({"type": "remove_group_member", "groupId": f.group_id, "userId": f.carol.user_id}))
        .await;
    f.a.expect_error("NOT_GROUP_MEMBER");
}
