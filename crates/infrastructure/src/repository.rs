use std::sync::Arc;
use std::time::Duration;

use application::{PoolStats, StoreHealth};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChallengeEvent, CommunityMember, CommunityRepository, Community, Conversation, ConversationId,
    ConversationRepository, DomainError, DomainResult, EncryptedContent, Group, GroupLifecycle,
    GroupMember, GroupMemberRepository, GroupMessage, GroupMessageRepository, GroupRepository,
    GroupRole, Mention, PrivateMessage, PrivateMessageRepository, ProgressSnapshot, Reaction,
    ReactionRepository, RecordedEvent, SocialGraphRepository, UserProfile, UserRepository,
};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> DomainError {
    DomainError::database_error(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

fn encrypted_parts(ciphertext: Option<String>, iv: Option<String>) -> Option<EncryptedContent> {
    match (ciphertext, iv) {
        (Some(ciphertext), Some(iv)) => Some(EncryptedContent { ciphertext, iv }),
        _ => None,
    }
}

fn split_encrypted(encrypted: &Option<EncryptedContent>) -> (Option<&str>, Option<&str>) {
    match encrypted {
        Some(sealed) => (Some(sealed.ciphertext.as_str()), Some(sealed.iv.as_str())),
        None => (None, None),
    }
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<UserRecord> for UserProfile {
    fn from(value: UserRecord) -> Self {
        UserProfile {
            user_id: value.id,
            username: value.username,
            display_name: value.display_name,
            avatar_url: value.avatar_url,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: String,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = DomainError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: ConversationId::parse(&value.id)?,
            created_at: value.created_at,
            last_message_at: value.last_message_at,
            deleted_at: value.deleted_at,
        })
    }
}

const PRIVATE_MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, recipient_id, content, \
     encrypted_content, encryption_iv, sent_at, is_read, reply_to, edited, edited_at, deleted, \
     deleted_at, deleted_for_everyone";

#[derive(Debug, FromRow)]
struct PrivateMessageRecord {
    id: Uuid,
    conversation_id: String,
    sender_id: Uuid,
    recipient_id: Uuid,
    content: String,
    encrypted_content: Option<String>,
    encryption_iv: Option<String>,
    sent_at: DateTime<Utc>,
    is_read: bool,
    reply_to: Option<Uuid>,
    edited: bool,
    edited_at: Option<DateTime<Utc>>,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    deleted_for_everyone: bool,
}

impl TryFrom<PrivateMessageRecord> for PrivateMessage {
    type Error = DomainError;

    fn try_from(value: PrivateMessageRecord) -> Result<Self, Self::Error> {
        Ok(PrivateMessage {
            id: value.id,
            conversation_id: ConversationId::parse(&value.conversation_id)?,
            sender_id: value.sender_id,
            recipient_id: value.recipient_id,
            content: value.content,
            encrypted: encrypted_parts(value.encrypted_content, value.encryption_iv),
            timestamp: value.sent_at,
            is_read: value.is_read,
            reply_to: value.reply_to,
            edited: value.edited,
            edited_at: value.edited_at,
            deleted: value.deleted,
            deleted_at: value.deleted_at,
            deleted_for_everyone: value.deleted_for_everyone,
        })
    }
}

const GROUP_COLUMNS: &str =
    "id, name, description, creator_id, max_members, lifecycle, deleted_at, created_at, updated_at";

#[derive(Debug, FromRow)]
struct GroupRecord {
    id: Uuid,
    name: String,
    description: Option<String>,
    creator_id: Uuid,
    max_members: i32,
    lifecycle: String,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GroupRecord> for Group {
    type Error = DomainError;

    fn try_from(value: GroupRecord) -> Result<Self, Self::Error> {
        Ok(Group {
            group_id: value.id,
            name: value.name,
            description: value.description,
            creator_id: value.creator_id,
            max_members: u32::try_from(value.max_members)
                .map_err(|_| DomainError::database_error("negative max_members"))?,
            lifecycle: GroupLifecycle::from_parts(&value.lifecycle, value.deleted_at)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GroupMemberRecord {
    group_id: Uuid,
    user_id: Uuid,
    role: String,
    can_send_messages: bool,
    can_add_members: bool,
    joined_at: DateTime<Utc>,
}

impl TryFrom<GroupMemberRecord> for GroupMember {
    type Error = DomainError;

    fn try_from(value: GroupMemberRecord) -> Result<Self, Self::Error> {
        Ok(GroupMember {
            group_id: value.group_id,
            user_id: value.user_id,
            role: value.role.parse::<GroupRole>()?,
            can_send_messages: value.can_send_messages,
            can_add_members: value.can_add_members,
            joined_at: value.joined_at,
        })
    }
}

const GROUP_MESSAGE_COLUMNS: &str = "id, group_id, sender_id, content, encrypted_content, \
     encryption_iv, sent_at, reply_to, edited, edited_at, deleted, deleted_at, \
     deleted_for_everyone, is_announcement, is_pinned, pinned_at, pinned_by, mentions";

#[derive(Debug, FromRow)]
struct GroupMessageRecord {
    id: Uuid,
    group_id: Uuid,
    sender_id: Uuid,
    content: String,
    encrypted_content: Option<String>,
    encryption_iv: Option<String>,
    sent_at: DateTime<Utc>,
    reply_to: Option<Uuid>,
    edited: bool,
    edited_at: Option<DateTime<Utc>>,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    deleted_for_everyone: bool,
    is_announcement: bool,
    is_pinned: bool,
    pinned_at: Option<DateTime<Utc>>,
    pinned_by: Option<Uuid>,
    mentions: Vec<String>,
}

impl TryFrom<GroupMessageRecord> for GroupMessage {
    type Error = DomainError;

    fn try_from(value: GroupMessageRecord) -> Result<Self, Self::Error> {
        let mentions = value
            .mentions
            .into_iter()
            .map(Mention::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GroupMessage {
            id: value.id,
            group_id: value.group_id,
            sender_id: value.sender_id,
            content: value.content,
            encrypted: encrypted_parts(value.encrypted_content, value.encryption_iv),
            timestamp: value.sent_at,
            reply_to: value.reply_to,
            edited: value.edited,
            edited_at: value.edited_at,
            deleted: value.deleted,
            deleted_at: value.deleted_at,
            deleted_for_everyone: value.deleted_for_everyone,
            is_group_message: true,
            is_announcement: value.is_announcement,
            is_pinned: value.is_pinned,
            pinned_at: value.pinned_at,
            pinned_by_user_id: value.pinned_by,
            mentions,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    message_id: Uuid,
    user_id: Uuid,
    reaction: String,
    created_at: DateTime<Utc>,
}

impl From<ReactionRecord> for Reaction {
    fn from(value: ReactionRecord) -> Self {
        Reaction {
            message_id: value.message_id,
            user_id: value.user_id,
            reaction: value.reaction,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommunityRecord {
    id: String,
    name: String,
    description: Option<String>,
    metadata: JsonValue,
    updated_at: DateTime<Utc>,
}

impl From<CommunityRecord> for Community {
    fn from(value: CommunityRecord) -> Self {
        Community {
            community_id: value.id,
            name: value.name,
            description: value.description,
            metadata: value.metadata,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommunityMemberRecord {
    community_id: String,
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
}

impl From<CommunityMemberRecord> for CommunityMember {
    fn from(value: CommunityMemberRecord) -> Self {
        CommunityMember {
            community_id: value.community_id,
            user_id: value.user_id,
            role: value.role,
            joined_at: value.joined_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ChallengeEventRecord {
    event_id: String,
    community_id: String,
    user_id: Uuid,
    challenge_id: Option<String>,
    xp_awarded: i64,
    payload: JsonValue,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    newly_recorded: bool,
}

impl From<ChallengeEventRecord> for RecordedEvent {
    fn from(value: ChallengeEventRecord) -> Self {
        RecordedEvent {
            newly_recorded: value.newly_recorded,
            event: ChallengeEvent {
                event_id: value.event_id,
                community_id: value.community_id,
                user_id: value.user_id,
                challenge_id: value.challenge_id,
                xp_awarded: value.xp_awarded,
                payload: value.payload,
                occurred_at: value.occurred_at,
                recorded_at: value.recorded_at,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct ProgressRecord {
    community_id: String,
    user_id: Uuid,
    xp: i64,
    current_streak: i32,
    longest_streak: i32,
    last_challenge_id: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<ProgressRecord> for ProgressSnapshot {
    fn from(value: ProgressRecord) -> Self {
        ProgressSnapshot {
            community_id: value.community_id,
            user_id: value.user_id,
            xp: value.xp,
            current_streak: value.current_streak,
            longest_streak: value.longest_streak,
            last_challenge_id: value.last_challenge_id,
            updated_at: value.updated_at,
        }
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct PgSocialGraphRepository {
    pool: PgPool,
}

impl PgSocialGraphRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SocialGraphRepository for PgSocialGraphRepository {
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> DomainResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_blocks
                WHERE (blocker_id = $1 AND blocked_id = $2)
                   OR (blocker_id = $2 AND blocked_id = $1)
            )
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn follows(&self, follower: Uuid, followee: Uuid) -> DomainResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM user_follows WHERE follower_id = $1 AND followee_id = $2)"#,
        )
        .bind(follower)
        .bind(followee)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn blocked_user_ids(&self, user_id: Uuid) -> DomainResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT blocked_id FROM user_blocks WHERE blocker_id = $1
            UNION
            SELECT blocker_id FROM user_blocks WHERE blocked_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> DomainResult<Option<UserProfile>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, display_name, avatar_url FROM users WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(UserProfile::from))
    }

    async fn find_by_ids(&self, user_ids: &[Uuid]) -> DomainResult<Vec<UserProfile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, display_name, avatar_url FROM users WHERE id = ANY($1)"#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(UserProfile::from).collect())
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn upsert(&self, conversation: &Conversation) -> DomainResult<Conversation> {
        let (low, high) = conversation.id.participants();
        // 对已删除的会话重新发消息会恢复它
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, participant_low, participant_high, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET deleted_at = NULL
            RETURNING id, created_at, last_message_at, deleted_at
            "#,
        )
        .bind(conversation.id.to_string())
        .bind(low)
        .bind(high)
        .bind(conversation.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Conversation::try_from(record)
    }

    async fn find_by_id(&self, id: &ConversationId) -> DomainResult<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, created_at, last_message_at, deleted_at
            FROM conversations
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Conversation::try_from).transpose()
    }

    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query(r#"UPDATE conversations SET last_message_at = $2 WHERE id = $1"#)
            .bind(id.to_string())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn delete_for_everyone(&self, id: &ConversationId, at: DateTime<Utc>) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query(r#"UPDATE conversations SET deleted_at = $2 WHERE id = $1"#)
            .bind(id.to_string())
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        let removed = sqlx::query(
            r#"
            UPDATE messages
            SET deleted = TRUE, deleted_for_everyone = TRUE, deleted_at = $2,
                content = '', encrypted_content = NULL, encryption_iv = NULL
            WHERE conversation_id = $1 AND is_group_message = FALSE AND deleted_for_everyone = FALSE
            "#,
        )
        .bind(id.to_string())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(removed)
    }

    async fn record_user_deletion(
        &self,
        id: &ConversationId,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_deletions (conversation_id, user_id, deleted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (conversation_id, user_id) DO UPDATE SET deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_user_deletion(
        &self,
        id: &ConversationId,
        user_id: Uuid,
    ) -> DomainResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"SELECT deleted_at FROM conversation_deletions WHERE conversation_id = $1 AND user_id = $2"#,
        )
        .bind(id.to_string())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgPrivateMessageRepository {
    pool: PgPool,
}

impl PgPrivateMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrivateMessageRepository for PgPrivateMessageRepository {
    async fn insert(&self, message: &PrivateMessage) -> DomainResult<PrivateMessage> {
        let (ciphertext, iv) = split_encrypted(&message.encrypted);
        let sql = format!(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, recipient_id, content, encrypted_content,
                encryption_iv, sent_at, is_read, reply_to, is_group_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
            RETURNING {PRIVATE_MESSAGE_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, PrivateMessageRecord>(&sql)
            .bind(message.id)
            .bind(message.conversation_id.to_string())
            .bind(message.sender_id)
            .bind(message.recipient_id)
            .bind(&message.content)
            .bind(ciphertext)
            .bind(iv)
            .bind(message.timestamp)
            .bind(message.is_read)
            .bind(message.reply_to)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        PrivateMessage::try_from(record)
    }

    async fn find_by_id(&self, message_id: Uuid) -> DomainResult<Option<PrivateMessage>> {
        let sql = format!(
            "SELECT {PRIVATE_MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND is_group_message = FALSE"
        );
        let record = sqlx::query_as::<_, PrivateMessageRecord>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(PrivateMessage::try_from).transpose()
    }

    async fn update_content(&self, message: &PrivateMessage) -> DomainResult<()> {
        let (ciphertext, iv) = split_encrypted(&message.encrypted);
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = $2, encrypted_content = $3, encryption_iv = $4, edited = $5, edited_at = $6
            WHERE id = $1 AND is_group_message = FALSE
            "#,
        )
        .bind(message.id)
        .bind(&message.content)
        .bind(ciphertext)
        .bind(iv)
        .bind(message.edited)
        .bind(message.edited_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::resource_not_found("message", message.id.to_string()));
        }
        Ok(())
    }

    async fn mark_deleted_for_everyone(&self, message_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted = TRUE, deleted_for_everyone = TRUE, deleted_at = $2,
                content = '', encrypted_content = NULL, encryption_iv = NULL
            WHERE id = $1 AND is_group_message = FALSE
            "#,
        )
        .bind(message_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::resource_not_found("message", message_id.to_string()));
        }
        Ok(())
    }

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_deletions (message_id, user_id, deleted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &ConversationId,
        viewer_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> DomainResult<Vec<PrivateMessage>> {
        let sql = format!(
            r#"
            SELECT {PRIVATE_MESSAGE_COLUMNS} FROM (
                SELECT m.* FROM messages m
                WHERE m.conversation_id = $1
                  AND m.is_group_message = FALSE
                  AND m.deleted_for_everyone = FALSE
                  AND ($3::timestamptz IS NULL OR m.sent_at > $3)
                  AND NOT EXISTS (
                      SELECT 1 FROM message_deletions d
                      WHERE d.message_id = m.id AND d.user_id = $2
                  )
                ORDER BY m.sent_at DESC
                LIMIT $4
            ) latest
            ORDER BY sent_at ASC
            "#
        );
        let records = sqlx::query_as::<_, PrivateMessageRecord>(&sql)
            .bind(conversation_id.to_string())
            .bind(viewer_id)
            .bind(since)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(PrivateMessage::try_from).collect()
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: Uuid,
        message_ids: Option<Vec<Uuid>>,
    ) -> DomainResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            WITH updated AS (
                UPDATE messages
                SET is_read = TRUE
                WHERE conversation_id = $1
                  AND recipient_id = $2
                  AND is_group_message = FALSE
                  AND is_read = FALSE
                  AND ($3::uuid[] IS NULL OR id = ANY($3))
                RETURNING id, sent_at
            )
            SELECT id FROM updated ORDER BY sent_at ASC
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(reader_id)
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgGroupRepository {
    pool: PgPool,
}

impl PgGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn create_with_members(&self, group: &Group, members: &[GroupMember]) -> DomainResult<Group> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let sql = format!(
            r#"
            INSERT INTO chat_groups (id, name, description, creator_id, max_members, lifecycle, deleted_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {GROUP_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, GroupRecord>(&sql)
            .bind(group.group_id)
            .bind(&group.name)
            .bind(&group.description)
            .bind(group.creator_id)
            .bind(i32::try_from(group.max_members).unwrap_or(i32::MAX))
            .bind(group.lifecycle.as_str())
            .bind(group.lifecycle.deleted_at())
            .bind(group.created_at)
            .bind(group.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO group_members (group_id, user_id, role, can_send_messages, can_add_members, joined_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(member.group_id)
            .bind(member.user_id)
            .bind(member.role.as_str())
            .bind(member.can_send_messages)
            .bind(member.can_add_members)
            .bind(member.joined_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Group::try_from(record)
    }

    async fn find_by_id(&self, group_id: Uuid) -> DomainResult<Option<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE id = $1");
        let record = sqlx::query_as::<_, GroupRecord>(&sql)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(Group::try_from).transpose()
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> DomainResult<Vec<Group>> {
        let records = sqlx::query_as::<_, GroupRecord>(
            r#"
            SELECT g.id, g.name, g.description, g.creator_id, g.max_members, g.lifecycle,
                   g.deleted_at, g.created_at, g.updated_at
            FROM chat_groups g
            JOIN group_members gm ON gm.group_id = g.id
            WHERE gm.user_id = $1 AND g.lifecycle = 'active'
            ORDER BY g.created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Group::try_from).collect()
    }

    async fn update_lifecycle(&self, group_id: Uuid, lifecycle: &GroupLifecycle) -> DomainResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE chat_groups
            SET lifecycle = $2, deleted_at = $3, updated_at = COALESCE($3, updated_at)
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(lifecycle.as_str())
        .bind(lifecycle.deleted_at())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::resource_not_found("group", group_id.to_string()));
        }
        Ok(())
    }

    async fn list_soft_deleted_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Group>> {
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM chat_groups WHERE lifecycle = 'soft_deleted' AND deleted_at <= $1"
        );
        let records = sqlx::query_as::<_, GroupRecord>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(Group::try_from).collect()
    }

    /// 删除成员与消息（回应、删除标记随外键级联），保留群组墓碑行
    async fn purge(&self, group_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query(r#"DELETE FROM group_members WHERE group_id = $1"#)
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query(r#"DELETE FROM messages WHERE group_id = $1"#)
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query(
            r#"
            UPDATE chat_groups
            SET lifecycle = 'hard_deleted', deleted_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgGroupMemberRepository {
    pool: PgPool,
}

impl PgGroupMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupMemberRepository for PgGroupMemberRepository {
    async fn add(&self, member: &GroupMember) -> DomainResult<GroupMember> {
        let record = sqlx::query_as::<_, GroupMemberRecord>(
            r#"
            INSERT INTO group_members (group_id, user_id, role, can_send_messages, can_add_members, joined_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING group_id, user_id, role, can_send_messages, can_add_members, joined_at
            "#,
        )
        .bind(member.group_id)
        .bind(member.user_id)
        .bind(member.role.as_str())
        .bind(member.can_send_messages)
        .bind(member.can_add_members)
        .bind(member.joined_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DomainError::resource_already_exists("group_member", member.user_id.to_string())
            } else {
                map_sqlx_err(err)
            }
        })?;
        GroupMember::try_from(record)
    }

    async fn remove(&self, group_id: Uuid, user_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(r#"DELETE FROM group_members WHERE group_id = $1 AND user_id = $2"#)
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, group_id: Uuid, user_id: Uuid) -> DomainResult<Option<GroupMember>> {
        let record = sqlx::query_as::<_, GroupMemberRecord>(
            r#"
            SELECT group_id, user_id, role, can_send_messages, can_add_members, joined_at
            FROM group_members
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(GroupMember::try_from).transpose()
    }

    async fn list(&self, group_id: Uuid) -> DomainResult<Vec<GroupMember>> {
        let records = sqlx::query_as::<_, GroupMemberRecord>(
            r#"
            SELECT group_id, user_id, role, can_send_messages, can_add_members, joined_at
            FROM group_members
            WHERE group_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(GroupMember::try_from).collect()
    }

    async fn count(&self, group_id: Uuid) -> DomainResult<u32> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM group_members WHERE group_id = $1"#,
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn update_role(&self, group_id: Uuid, user_id: Uuid, role: GroupRole) -> DomainResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE group_members
            SET role = $3, can_add_members = $4
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(role == GroupRole::Admin)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::resource_not_found("group_member", user_id.to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgGroupMessageRepository {
    pool: PgPool,
}

impl PgGroupMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupMessageRepository for PgGroupMessageRepository {
    async fn insert(&self, message: &GroupMessage) -> DomainResult<GroupMessage> {
        let (ciphertext, iv) = split_encrypted(&message.encrypted);
        let mentions: Vec<String> = message.mentions.iter().map(|m| m.to_string()).collect();
        let sql = format!(
            r#"
            INSERT INTO messages (
                id, group_id, sender_id, recipient_id, content, encrypted_content, encryption_iv,
                sent_at, reply_to, is_group_message, is_announcement, mentions
            )
            VALUES ($1, $2, $3, $2, $4, $5, $6, $7, $8, TRUE, $9, $10)
            RETURNING {GROUP_MESSAGE_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, GroupMessageRecord>(&sql)
            .bind(message.id)
            .bind(message.group_id)
            .bind(message.sender_id)
            .bind(&message.content)
            .bind(ciphertext)
            .bind(iv)
            .bind(message.timestamp)
            .bind(message.reply_to)
            .bind(message.is_announcement)
            .bind(mentions)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        GroupMessage::try_from(record)
    }

    async fn find_by_id(&self, message_id: Uuid) -> DomainResult<Option<GroupMessage>> {
        let sql = format!(
            "SELECT {GROUP_MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND is_group_message = TRUE"
        );
        let record = sqlx::query_as::<_, GroupMessageRecord>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(GroupMessage::try_from).transpose()
    }

    async fn update_content(&self, message: &GroupMessage) -> DomainResult<()> {
        let (ciphertext, iv) = split_encrypted(&message.encrypted);
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = $2, encrypted_content = $3, encryption_iv = $4, edited = $5, edited_at = $6
            WHERE id = $1 AND is_group_message = TRUE
            "#,
        )
        .bind(message.id)
        .bind(&message.content)
        .bind(ciphertext)
        .bind(iv)
        .bind(message.edited)
        .bind(message.edited_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::resource_not_found("message", message.id.to_string()));
        }
        Ok(())
    }

    async fn mark_deleted_for_everyone(&self, message_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted = TRUE, deleted_for_everyone = TRUE, deleted_at = $2,
                content = '', encrypted_content = NULL, encryption_iv = NULL,
                is_pinned = FALSE, pinned_at = NULL, pinned_by = NULL
            WHERE id = $1 AND is_group_message = TRUE
            "#,
        )
        .bind(message_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::resource_not_found("message", message_id.to_string()));
        }
        Ok(())
    }

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_deletions (message_id, user_id, deleted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn recent(&self, group_id: Uuid, viewer_id: Uuid, limit: usize) -> DomainResult<Vec<GroupMessage>> {
        let sql = format!(
            r#"
            SELECT {GROUP_MESSAGE_COLUMNS} FROM (
                SELECT m.* FROM messages m
                WHERE m.group_id = $1
                  AND m.deleted_for_everyone = FALSE
                  AND NOT EXISTS (
                      SELECT 1 FROM message_deletions d
                      WHERE d.message_id = m.id AND d.user_id = $2
                  )
                ORDER BY m.sent_at DESC
                LIMIT $3
            ) latest
            ORDER BY sent_at ASC
            "#
        );
        let records = sqlx::query_as::<_, GroupMessageRecord>(&sql)
            .bind(group_id)
            .bind(viewer_id)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(GroupMessage::try_from).collect()
    }

    async fn pin(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        pinned_by: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query(
            r#"
            UPDATE messages
            SET is_pinned = FALSE, pinned_at = NULL, pinned_by = NULL
            WHERE group_id = $1 AND is_pinned
            "#,
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        let pinned = sqlx::query(
            r#"
            UPDATE messages
            SET is_pinned = TRUE, pinned_at = $4, pinned_by = $3
            WHERE id = $2 AND group_id = $1 AND deleted_for_everyone = FALSE
            "#,
        )
        .bind(group_id)
        .bind(message_id)
        .bind(pinned_by)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if pinned.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Err(DomainError::resource_not_found("message", message_id.to_string()));
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn unpin(&self, group_id: Uuid) -> DomainResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE messages
            SET is_pinned = FALSE, pinned_at = NULL, pinned_by = NULL
            WHERE group_id = $1 AND is_pinned
            RETURNING id
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn find_pinned(&self, group_id: Uuid) -> DomainResult<Option<GroupMessage>> {
        let sql = format!(
            "SELECT {GROUP_MESSAGE_COLUMNS} FROM messages WHERE group_id = $1 AND is_pinned"
        );
        let record = sqlx::query_as::<_, GroupMessageRecord>(&sql)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(GroupMessage::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgReactionRepository {
    pool: PgPool,
}

impl PgReactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReactionRepository for PgReactionRepository {
    async fn add(&self, reaction: &Reaction) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, reaction, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id, reaction) DO NOTHING
            "#,
        )
        .bind(reaction.message_id)
        .bind(reaction.user_id)
        .bind(&reaction.reaction)
        .bind(reaction.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND reaction = $3"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(reaction)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_message(&self, message_id: Uuid) -> DomainResult<Vec<Reaction>> {
        let records = sqlx::query_as::<_, ReactionRecord>(
            r#"
            SELECT message_id, user_id, reaction, created_at
            FROM message_reactions
            WHERE message_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(Reaction::from).collect())
    }
}

#[derive(Clone)]
pub struct PgCommunityRepository {
    pool: PgPool,
}

impl PgCommunityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommunityRepository for PgCommunityRepository {
    async fn upsert_community(&self, community: &Community) -> DomainResult<Community> {
        let record = sqlx::query_as::<_, CommunityRecord>(
            r#"
            INSERT INTO communities (id, name, description, metadata, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            RETURNING id, name, description, metadata, updated_at
            "#,
        )
        .bind(&community.community_id)
        .bind(&community.name)
        .bind(&community.description)
        .bind(&community.metadata)
        .bind(community.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(Community::from(record))
    }

    async fn find_community(&self, community_id: &str) -> DomainResult<Option<Community>> {
        let record = sqlx::query_as::<_, CommunityRecord>(
            r#"SELECT id, name, description, metadata, updated_at FROM communities WHERE id = $1"#,
        )
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Community::from))
    }

    /// 已存在的成员保持原角色
    async fn ensure_member(&self, member: &CommunityMember) -> DomainResult<CommunityMember> {
        let record = sqlx::query_as::<_, CommunityMemberRecord>(
            r#"
            WITH inserted AS (
                INSERT INTO community_members (community_id, user_id, role, joined_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (community_id, user_id) DO NOTHING
                RETURNING community_id, user_id, role, joined_at
            )
            SELECT community_id, user_id, role, joined_at FROM inserted
            UNION ALL
            SELECT community_id, user_id, role, joined_at FROM community_members
            WHERE community_id = $1 AND user_id = $2
            LIMIT 1
            "#,
        )
        .bind(&member.community_id)
        .bind(member.user_id)
        .bind(&member.role)
        .bind(member.joined_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(CommunityMember::from(record))
    }

    async fn list_member_ids(&self, community_id: &str) -> DomainResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"SELECT user_id FROM community_members WHERE community_id = $1 ORDER BY joined_at ASC"#,
        )
        .bind(community_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn record_event(&self, event: &ChallengeEvent) -> DomainResult<RecordedEvent> {
        let record = sqlx::query_as::<_, ChallengeEventRecord>(
            r#"
            WITH inserted AS (
                INSERT INTO challenge_events (
                    event_id, community_id, user_id, challenge_id, xp_awarded, payload, occurred_at, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (event_id) DO NOTHING
                RETURNING event_id, community_id, user_id, challenge_id, xp_awarded, payload, occurred_at, recorded_at
            )
            SELECT *, TRUE AS newly_recorded FROM inserted
            UNION ALL
            SELECT event_id, community_id, user_id, challenge_id, xp_awarded, payload, occurred_at, recorded_at,
                   FALSE AS newly_recorded
            FROM challenge_events
            WHERE event_id = $1
            LIMIT 1
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.community_id)
        .bind(event.user_id)
        .bind(&event.challenge_id)
        .bind(event.xp_awarded)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .bind(event.recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(RecordedEvent::from(record))
    }

    async fn find_progress(
        &self,
        community_id: &str,
        user_id: Uuid,
    ) -> DomainResult<Option<ProgressSnapshot>> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            r#"
            SELECT community_id, user_id, xp, current_streak, longest_streak, last_challenge_id, updated_at
            FROM community_progress
            WHERE community_id = $1 AND user_id = $2
            "#,
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(ProgressSnapshot::from))
    }

    async fn upsert_progress(&self, snapshot: &ProgressSnapshot) -> DomainResult<ProgressSnapshot> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            r#"
            INSERT INTO community_progress (
                community_id, user_id, xp, current_streak, longest_streak, last_challenge_id, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (community_id, user_id) DO UPDATE
            SET xp = EXCLUDED.xp,
                current_streak = EXCLUDED.current_streak,
                longest_streak = EXCLUDED.longest_streak,
                last_challenge_id = EXCLUDED.last_challenge_id,
                updated_at = EXCLUDED.updated_at
            RETURNING community_id, user_id, xp, current_streak, longest_streak, last_challenge_id, updated_at
            "#,
        )
        .bind(&snapshot.community_id)
        .bind(snapshot.user_id)
        .bind(snapshot.xp)
        .bind(snapshot.current_streak)
        .bind(snapshot.longest_streak)
        .bind(&snapshot.last_challenge_id)
        .bind(snapshot.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ProgressSnapshot::from(record))
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub social_graph: Arc<PgSocialGraphRepository>,
    pub user_repository: Arc<PgUserRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub private_message_repository: Arc<PgPrivateMessageRepository>,
    pub group_repository: Arc<PgGroupRepository>,
    pub group_member_repository: Arc<PgGroupMemberRepository>,
    pub group_message_repository: Arc<PgGroupMessageRepository>,
    pub reaction_repository: Arc<PgReactionRepository>,
    pub community_repository: Arc<PgCommunityRepository>,
    max_connections: u32,
}

impl PgStorage {
    pub fn new(pool: PgPool, max_connections: u32) -> Self {
        Self {
            social_graph: Arc::new(PgSocialGraphRepository::new(pool.clone())),
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            private_message_repository: Arc::new(PgPrivateMessageRepository::new(pool.clone())),
            group_repository: Arc::new(PgGroupRepository::new(pool.clone())),
            group_member_repository: Arc::new(PgGroupMemberRepository::new(pool.clone())),
            group_message_repository: Arc::new(PgGroupMessageRepository::new(pool.clone())),
            reaction_repository: Arc::new(PgReactionRepository::new(pool.clone())),
            community_repository: Arc::new(PgCommunityRepository::new(pool.clone())),
            pool,
            max_connections,
        }
    }
}

#[async_trait]
impl StoreHealth for PgStorage {
    async fn ping(&self) -> DomainResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
            max: self.max_connections,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}
