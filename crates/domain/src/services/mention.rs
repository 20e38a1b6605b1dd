//! @提及解析
//!
//! `@everyone` / `@all` 展开为除发送者外的全体成员，`@username` 不区分大小写匹配成员。

use crate::entities::message::Mention;
use crate::entities::user::UserProfile;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

static MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\B@(\w+)").expect("mention pattern is valid"));

/// 消息文本中的提及标记
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MentionToken {
    Everyone,
    Username(String),
}

/// 提取并去重（按小写）提及标记，保持出现顺序
pub fn parse_mentions(content: &str) -> Vec<MentionToken> {
    let mut seen = HashSet::new();
    MENTION_PATTERN
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .filter(|name| seen.insert(name.clone()))
        .map(|name| match name.as_str() {
            "everyone" | "all" => MentionToken::Everyone,
            _ => MentionToken::Username(name),
        })
        .collect()
}

/// 提及解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMentions {
    /// 随消息持久化的提及
    pub mentions: Vec<Mention>,
    /// 需要收到 "mentioned" 事件的成员（不含发送者）
    pub notify: Vec<Uuid>,
}

impl ResolvedMentions {
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }
}

/// 把标记解析到群成员；未匹配的用户名被忽略
pub fn resolve_mentions(
    tokens: &[MentionToken],
    sender_id: Uuid,
    members: &[UserProfile],
) -> ResolvedMentions {
    let mut resolved = ResolvedMentions::default();
    let mut notified = HashSet::new();

    for token in tokens {
        match token {
            MentionToken::Everyone => {
                if !resolved.mentions.contains(&Mention::Everyone) {
                    resolved.mentions.push(Mention::Everyone);
                }
                for member in members.iter().filter(|m| m.user_id != sender_id) {
                    if notified.insert(member.user_id) {
                        resolved.notify.push(member.user_id);
                    }
                }
            }
            MentionToken::Username(name) => {
                let Some(member) = members.iter().find(|m| m.username_matches(name)) else {
                    continue;
                };
                let mention = Mention::User(member.user_id);
                if !resolved.mentions.contains(&mention) {
                    resolved.mentions.push(mention);
                }
                if member.user_id != sender_id && notified.insert(member.user_id) {
                    resolved.notify.push(member.user_id);
                }
            }
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_deduplicates() {
        let tokens = parse_mentions("hi @Bob and @bob, also @all");
        assert_eq!(
            tokens,
            vec![
                MentionToken::Username("bob".into()),
                MentionToken::Everyone
            ]
        );
    }

    #[test]
    fn email_addresses_are_not_mentions() {
        assert!(parse_mentions("mail me at alice@example.com").is_empty());
        assert_eq!(
            parse_mentions("@carol: ping"),
            vec![MentionToken::Username("carol".into())]
        );
    }

    #[test]
    fn resolves_usernames_case_insensitively() {
        let sender = UserProfile::new(Uuid::new_v4(), "alice");
        let bob = UserProfile::new(Uuid::new_v4(), "Bob");
        let members = vec![sender.clone(), bob.clone()];

        let resolved = resolve_mentions(
            &parse_mentions("@BOB @alice @ghost"),
            sender.user_id,
            &members,
        );
        assert_eq!(
            resolved.mentions,
            vec![Mention::User(bob.user_id), Mention::User(sender.user_id)]
        );
        assert_eq!(resolved.notify, vec![bob.user_id]);
    }

    #[test]
    fn everyone_notifies_all_but_sender() {
        let sender = UserProfile::new(Uuid::new_v4(), "alice");
        let bob = UserProfile::new(Uuid::new_v4(), "bob");
        let carol = UserProfile::new(Uuid::new_v4(), "carol");
        let members = vec![sender.clone(), bob.clone(), carol.clone()];

        let resolved = resolve_mentions(
            &parse_mentions("@everyone @bob"),
            sender.user_id,
            &members,
        );
        assert_eq!(
            resolved.mentions,
            vec![Mention::Everyone, Mention::User(bob.user_id)]
        );
        assert_eq!(resolved.notify, vec![bob.user_id, carol.user_id]);
    }
}
