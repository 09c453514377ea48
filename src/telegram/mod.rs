//! Telegram update stream.
//!
//! Serde views over the Bot API update payloads, the long-polling receive
//! loop, and the dispatcher that routes updates into the verification
//! core and the abuse filter.

pub mod dispatch;
pub mod receive;

use serde::Deserialize;
use serde_json::Value;

/// Telegram update payload.
#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// Telegram message payload, limited to the fields the filter and the
/// verification flow inspect.
#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub sender_chat: Option<Chat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub sticker: Option<Sticker>,
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(default)]
    pub via_bot: Option<User>,
    #[serde(default)]
    pub reply_markup: Option<Value>,
    #[serde(default)]
    pub forward_origin: Option<ForwardOrigin>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
    #[serde(default)]
    pub left_chat_member: Option<User>,
}

impl Message {
    /// Text or caption, whichever is present.
    pub fn text_content(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }

    /// Sender id: user, sender chat, or the chat itself for anonymous posts.
    pub fn sender_id(&self) -> i64 {
        self.from
            .as_ref()
            .map(|u| u.id)
            .or_else(|| self.sender_chat.as_ref().map(|c| c.id))
            .unwrap_or(self.chat.id)
    }

    /// Membership-change service messages carry no user content.
    pub fn is_service(&self) -> bool {
        !self.new_chat_members.is_empty() || self.left_chat_member.is_some()
    }
}

/// Telegram chat metadata.
#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default, rename = "type")]
    pub chat_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        matches!(self.chat_type.as_deref(), Some("group") | Some("supergroup"))
    }

    pub fn is_private(&self) -> bool {
        self.chat_type.as_deref() == Some("private")
    }
}

/// Telegram user metadata.
#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub emoji_status: Option<EmojiStatus>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("there")
    }
}

/// Premium emoji status attached to a user profile.
#[derive(Debug, Deserialize)]
pub struct EmojiStatus {
    #[serde(default)]
    pub custom_emoji_id: Option<String>,
}

/// Sticker payload; only the owning set matters here.
#[derive(Debug, Deserialize)]
pub struct Sticker {
    #[serde(default)]
    pub set_name: Option<String>,
}

/// Origin of a forwarded message.
#[derive(Debug, Deserialize)]
pub struct ForwardOrigin {
    #[serde(default, rename = "type")]
    pub origin_type: Option<String>,
    /// Present for channel origins.
    #[serde(default)]
    pub chat: Option<Chat>,
    /// Present for user origins.
    #[serde(default)]
    pub sender_user: Option<User>,
}

impl ForwardOrigin {
    pub fn is_channel(&self) -> bool {
        self.origin_type.as_deref() == Some("channel")
    }

    pub fn origin_id(&self) -> Option<i64> {
        self.chat
            .as_ref()
            .map(|c| c.id)
            .or_else(|| self.sender_user.as_ref().map(|u| u.id))
    }

    pub fn title(&self) -> &str {
        self.chat
            .as_ref()
            .and_then(|c| c.title.as_deref())
            .unwrap_or_default()
    }
}

/// Callback button press payload.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}
