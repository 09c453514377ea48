//! Abuse filter.
//!
//! Heuristic screen applied to every qualifying group event, ahead of or
//! instead of verification. Rules are evaluated strictest-first: the
//! structural spam checks short-circuit before any identity check so a
//! spam relay is deleted without banning an unconfirmed sender. Keyword
//! and name matching normalizes Han script variants first, so a
//! traditional-script spelling of a blacklisted simplified-script keyword
//! still hits.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, warn};
use zhconv::{zhconv, Variant};

use crate::gateway::{GatewayError, ModerationGateway};
use crate::telegram::Message;

/// Invite-link spam pattern (private group/channel join links).
static INVITE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://t\.me/\+\S+").expect("invite link pattern"));

/// Title marker of low-effort throwaway spam sticker packs.
const SPAM_STICKER_TITLE_MARKER: &str = "点击直达";

/// Process-wide blacklists. Immutable during a filtering pass; reloads
/// swap a whole snapshot, never mutate in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlacklistConfig {
    /// Banned sender / forwarded-origin ids.
    pub user_ids: HashSet<i64>,
    /// Banned display-name / username / forward-title substrings.
    pub names: Vec<String>,
    /// Banned custom-emoji-set names.
    pub emoji_sets: HashSet<String>,
    /// Banned sticker-set names.
    pub sticker_sets: HashSet<String>,
    /// Banned message keyword substrings.
    pub keywords: Vec<String>,
}

/// Filter decision for one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No signal hit; event proceeds (e.g. to verification).
    Clean,
    /// Structural or keyword spam: message deleted, sender kept
    /// (identity unconfirmed, no ban).
    MessageDeleted,
    /// Identity signal hit: message deleted and sender banned.
    ActorBanned,
}

pub struct AbuseFilter {
    gateway: Arc<dyn ModerationGateway>,
    blacklists: RwLock<Arc<BlacklistConfig>>,
}

impl AbuseFilter {
    pub fn new(gateway: Arc<dyn ModerationGateway>, blacklists: Arc<BlacklistConfig>) -> Self {
        Self {
            gateway,
            blacklists: RwLock::new(blacklists),
        }
    }

    /// Current blacklist snapshot. Held for the duration of one pass so a
    /// concurrent reload can never expose a half-updated list.
    pub fn snapshot(&self) -> Arc<BlacklistConfig> {
        self.blacklists.read().clone()
    }

    /// Atomically replace the blacklists with a new snapshot.
    pub fn reload(&self, blacklists: Arc<BlacklistConfig>) {
        *self.blacklists.write() = blacklists;
    }

    /// Evaluate one inbound message and apply the resulting moderation
    /// actions. Gateway failures while acting are logged and tolerated;
    /// the verdict reflects the decision either way.
    pub async fn inspect(&self, msg: &Message) -> Verdict {
        let bl = self.snapshot();
        let sender_id = msg.sender_id();
        let text = msg.text_content();

        // Rule 1: structural spam. Delete only; the sender's identity is
        // unconfirmed, so no ban.
        if self.is_structural_spam(msg, &bl).await {
            warn!(sender_id, "structural spam detected, deleting message");
            self.delete(msg).await;
            return Verdict::MessageDeleted;
        }

        // Rule 2: keyword blacklist over normalized text.
        if bl.keywords.iter().any(|kw| keyword_hit(kw, text)) {
            warn!(sender_id, "blacklisted keyword in message, deleting");
            self.delete(msg).await;
            return Verdict::MessageDeleted;
        }

        // Rules 3-5 mark for ban; first match wins.
        let mut ban = self.emoji_status_banned(msg, &bl).await;
        if !ban {
            ban = name_hit(msg, &bl);
        }
        if !ban {
            let forward_id = msg.forward_origin.as_ref().and_then(|o| o.origin_id());
            ban = bl.user_ids.contains(&sender_id)
                || forward_id.is_some_and(|id| bl.user_ids.contains(&id));
        }

        if ban {
            info!(sender_id, group_id = msg.chat.id, "banning blacklisted sender");
            self.delete(msg).await;
            if let Err(e) = self.gateway.ban(msg.chat.id, sender_id).await {
                warn!(sender_id, error = %e, "failed to ban blacklisted sender");
            }
            Verdict::ActorBanned
        } else {
            debug!(sender_id, "message passed abuse filter");
            Verdict::Clean
        }
    }

    async fn is_structural_spam(&self, msg: &Message, bl: &BlacklistConfig) -> bool {
        if msg.via_bot.is_some() || msg.reply_markup.is_some() {
            return true;
        }
        if INVITE_LINK.is_match(msg.text_content()) {
            return true;
        }

        let Some(set_name) = msg.sticker.as_ref().and_then(|s| s.set_name.as_deref()) else {
            return false;
        };
        if bl.sticker_sets.contains(set_name) {
            return true;
        }
        // Single-sticker sets are throwaway spam packs.
        match self.gateway.get_sticker_set(set_name).await {
            Ok(meta) => meta.item_count == 1 || meta.title.contains(SPAM_STICKER_TITLE_MARKER),
            Err(e) => {
                warn!(set_name, error = %e, "sticker set lookup failed");
                false
            }
        }
    }

    async fn emoji_status_banned(&self, msg: &Message, bl: &BlacklistConfig) -> bool {
        let Some(emoji_id) = msg
            .from
            .as_ref()
            .and_then(|u| u.emoji_status.as_ref())
            .and_then(|s| s.custom_emoji_id.as_deref())
        else {
            return false;
        };
        match self.gateway.get_custom_emoji_set(emoji_id).await {
            Ok(Some(set_name)) => bl.emoji_sets.contains(&set_name),
            Ok(None) => false,
            Err(e) => {
                warn!(emoji_id, error = %e, "custom emoji lookup failed");
                false
            }
        }
    }

    async fn delete(&self, msg: &Message) {
        if let Err(e) = self.gateway.delete_message(msg.chat.id, msg.message_id).await {
            if !matches!(e, GatewayError::InsufficientPrivilege(_)) {
                warn!(
                    group_id = msg.chat.id,
                    message_id = msg.message_id,
                    error = %e,
                    "failed to delete flagged message"
                );
            }
        }
    }
}

/// Substring match after lowercasing and normalizing Han script variants
/// to simplified.
pub fn keyword_hit(keyword: &str, text: &str) -> bool {
    if keyword.is_empty() || text.is_empty() {
        return false;
    }
    zhconv(&text.to_lowercase(), Variant::ZhHans).contains(&keyword.to_lowercase())
}

/// Rule 4: blacklisted name substrings against the sender's names, and
/// against forwarded-channel titles for document posts.
fn name_hit(msg: &Message, bl: &BlacklistConfig) -> bool {
    let forward_title = msg.forward_origin.as_ref().map(|o| o.title()).unwrap_or_default();
    let title_applies = msg.document.is_some()
        && msg.forward_origin.as_ref().is_some_and(|o| o.is_channel());

    for name in &bl.names {
        if title_applies && keyword_hit(name, forward_title) {
            return true;
        }
        if let Some(from) = &msg.from {
            if keyword_hit(name, from.username.as_deref().unwrap_or_default())
                || keyword_hit(name, from.first_name.as_deref().unwrap_or_default())
                || keyword_hit(name, from.last_name.as_deref().unwrap_or_default())
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_hit_case_insensitive() {
        assert!(keyword_hit("casino", "Visit our CASINO now"));
        assert!(!keyword_hit("casino", "nothing to see"));
    }

    #[test]
    fn test_keyword_hit_normalizes_traditional_script() {
        // Traditional 廣告 normalizes to simplified 广告.
        assert!(keyword_hit("广告", "這是廣告訊息"));
    }

    #[test]
    fn test_keyword_hit_empty_inputs() {
        assert!(!keyword_hit("", "anything"));
        assert!(!keyword_hit("spam", ""));
    }

    #[test]
    fn test_invite_link_pattern() {
        assert!(INVITE_LINK.is_match("join https://t.me/+AbCdEf123 now"));
        assert!(!INVITE_LINK.is_match("see https://t.me/somechannel"));
    }
}
