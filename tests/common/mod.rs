//! Shared test doubles: a recording moderation gateway and a static
//! challenge renderer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use gatehouse::gateway::{
    Button, Candidate, GatewayError, ModerationGateway, StickerSetMeta,
};
use gatehouse::renderer::{ChallengeRenderer, RenderError};

/// One moderation action applied through the fake gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Restrict { group_id: i64, user_id: i64 },
    Unrestrict { group_id: i64, user_id: i64 },
    Ban { group_id: i64, user_id: i64 },
    Unban { group_id: i64, user_id: i64 },
    SendChallenge { group_id: i64, user_id: i64, message_id: i64 },
    SendText { chat_id: i64 },
    DeleteMessage { group_id: i64, message_id: i64 },
    AnswerCallback { callback_id: String, text: String },
}

/// In-memory gateway that records every action instead of calling the
/// platform.
#[derive(Default)]
pub struct RecordingGateway {
    pub actions: Mutex<Vec<Action>>,
    pub admins: Mutex<HashSet<i64>>,
    pub sticker_sets: Mutex<HashMap<String, StickerSetMeta>>,
    pub emoji_sets: Mutex<HashMap<String, String>>,
    next_message_id: AtomicI64,
    /// Per-method queues of injected errors; each call pops one.
    failures: Mutex<HashMap<&'static str, Vec<GatewayError>>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_message_id: AtomicI64::new(1000),
            ..Self::default()
        })
    }

    pub fn with_admins(admins: impl IntoIterator<Item = i64>) -> Arc<Self> {
        let gw = Self::new();
        gw.admins.lock().extend(admins);
        gw
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    pub fn bans_of(&self, group_id: i64, user_id: i64) -> usize {
        self.actions()
            .iter()
            .filter(|a| matches!(a, Action::Ban { group_id: g, user_id: u } if *g == group_id && *u == user_id))
            .count()
    }

    pub fn unrestricts_of(&self, group_id: i64, user_id: i64) -> usize {
        self.actions()
            .iter()
            .filter(|a| matches!(a, Action::Unrestrict { group_id: g, user_id: u } if *g == group_id && *u == user_id))
            .count()
    }

    pub fn deleted_messages(&self) -> Vec<i64> {
        self.actions()
            .iter()
            .filter_map(|a| match a {
                Action::DeleteMessage { message_id, .. } => Some(*message_id),
                _ => None,
            })
            .collect()
    }

    /// Queue an error for the next call of `method`. The attempt is
    /// still recorded, so tests can count retries.
    pub fn fail_next(&self, method: &'static str, err: GatewayError) {
        self.failures.lock().entry(method).or_default().push(err);
    }

    fn record(&self, action: Action) {
        self.actions.lock().push(action);
    }

    fn take_failure(&self, method: &str) -> Result<(), GatewayError> {
        let mut failures = self.failures.lock();
        match failures.get_mut(method) {
            Some(queue) if !queue.is_empty() => Err(queue.remove(0)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ModerationGateway for RecordingGateway {
    async fn restrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.record(Action::Restrict { group_id, user_id });
        self.take_failure("restrict")
    }

    async fn unrestrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.record(Action::Unrestrict { group_id, user_id });
        self.take_failure("unrestrict")
    }

    async fn ban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.record(Action::Ban { group_id, user_id });
        self.take_failure("ban")
    }

    async fn unban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.record(Action::Unban { group_id, user_id });
        Ok(())
    }

    async fn send_challenge(
        &self,
        group_id: i64,
        candidate: &Candidate,
        _image_png: Vec<u8>,
        _caption: &str,
        _keyboard: &[Vec<Button>],
    ) -> Result<i64, GatewayError> {
        self.take_failure("send_challenge")?;
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.record(Action::SendChallenge {
            group_id,
            user_id: candidate.user_id,
            message_id,
        });
        Ok(message_id)
    }

    async fn send_text(&self, chat_id: i64, _text: &str) -> Result<i64, GatewayError> {
        self.record(Action::SendText { chat_id });
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn delete_message(&self, group_id: i64, message_id: i64) -> Result<(), GatewayError> {
        self.record(Action::DeleteMessage { group_id, message_id });
        self.take_failure("delete_message")
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), GatewayError> {
        self.record(Action::AnswerCallback {
            callback_id: callback_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn list_administrators(&self, _group_id: i64) -> Result<HashSet<i64>, GatewayError> {
        Ok(self.admins.lock().clone())
    }

    async fn get_sticker_set(&self, name: &str) -> Result<StickerSetMeta, GatewayError> {
        self.sticker_sets
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected(format!("sticker set not found: {name}")))
    }

    async fn get_custom_emoji_set(
        &self,
        emoji_id: &str,
    ) -> Result<Option<String>, GatewayError> {
        Ok(self.emoji_sets.lock().get(emoji_id).cloned())
    }
}

/// Renderer that returns fixed bytes; image contents are irrelevant to
/// the flows under test.
pub struct StaticRenderer;

impl ChallengeRenderer for StaticRenderer {
    fn render(&self, _secret: &str) -> Result<Vec<u8>, RenderError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}
