//! Moderation gateway.
//!
//! The trait is the only surface the verification core and the abuse
//! filter use to act on the chat platform; handlers receive it as an
//! injected `Arc<dyn ModerationGateway>` so tests can substitute a
//! recording fake. The production implementation talks to the Telegram
//! Bot API directly over `reqwest`, parsing the `ok`/`description`
//! response envelope.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde_json::{json, Value};

pub const TELEGRAM_DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Request timeout for moderation calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Gateway error taxonomy. None of these is fatal to the process; callers
/// decide per call site whether to tolerate, retry, or reject.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The bot lacks rights for the action (e.g. not an admin in the
    /// group). Tolerated at most call sites: verification proceeds
    /// best-effort without the restriction.
    #[error("insufficient privilege: {0}")]
    InsufficientPrivilege(String),
    /// Transient transport or platform failure; safe to retry.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// The platform rejected the request for a non-transient reason.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// The joining user a challenge is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub user_id: i64,
    pub display_name: String,
}

/// One inline keyboard button on a challenge message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Sticker set metadata used by the abuse filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerSetMeta {
    pub title: String,
    pub item_count: usize,
}

/// Moderation actions and lookups the core needs from the chat platform.
#[async_trait]
pub trait ModerationGateway: Send + Sync {
    /// Put a user into a "may not post" permission state.
    async fn restrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError>;
    /// Restore a user's ability to post.
    async fn unrestrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError>;
    async fn ban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError>;
    async fn unban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError>;

    /// Send the challenge photo with its answer keyboard; returns the
    /// challenge message id.
    async fn send_challenge(
        &self,
        group_id: i64,
        candidate: &Candidate,
        image_png: Vec<u8>,
        caption: &str,
        keyboard: &[Vec<Button>],
    ) -> Result<i64, GatewayError>;

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, GatewayError>;

    /// Delete a message. Tolerant of "already deleted": that case maps to
    /// `Ok(())`, not an error.
    async fn delete_message(&self, group_id: i64, message_id: i64) -> Result<(), GatewayError>;

    /// Acknowledge a callback button press with a short toast.
    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), GatewayError>;

    /// Current administrator ids for a group, fetched live (admin rosters
    /// change; never cached).
    async fn list_administrators(&self, group_id: i64) -> Result<HashSet<i64>, GatewayError>;

    async fn get_sticker_set(&self, name: &str) -> Result<StickerSetMeta, GatewayError>;

    /// Sticker set name owning a custom emoji, if the platform knows it.
    async fn get_custom_emoji_set(&self, emoji_id: &str)
        -> Result<Option<String>, GatewayError>;
}

/// Production gateway over the Telegram Bot API.
pub struct TelegramGateway {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl TelegramGateway {
    pub fn new(base_url: String, bot_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            bot_token,
        }
    }

    /// Build the API endpoint URL for a method.
    fn api_url(&self, method: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/bot{}/{}", base, self.bot_token, method)
    }

    /// POST a JSON-bodied method call and return the `result` payload.
    async fn call(&self, method: &str, body: Value) -> Result<Value, GatewayError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(classify_transport_error(&e).to_string()))?;
        parse_response(resp).await
    }
}

/// Parse the Bot API response envelope: `{ok, result}` on success,
/// `{ok: false, description}` on failure.
async fn parse_response(resp: reqwest::Response) -> Result<Value, GatewayError> {
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    let parsed: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);

    let ok = parsed
        .get("ok")
        .and_then(|v| v.as_bool())
        .unwrap_or(status.is_success());
    if ok {
        return Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
    }

    let description = parsed
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            if body_text.is_empty() {
                None
            } else {
                Some(body_text)
            }
        })
        .unwrap_or_else(|| "request failed".to_string());

    Err(classify_api_error(status, description))
}

fn classify_api_error(status: StatusCode, description: String) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::Unavailable(description)
    } else if status == StatusCode::FORBIDDEN
        || description.to_ascii_lowercase().contains("not enough rights")
    {
        GatewayError::InsufficientPrivilege(description)
    } else {
        GatewayError::Rejected(description)
    }
}

fn classify_transport_error(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "request timeout"
    } else if err.is_connect() {
        "connection error"
    } else {
        "request failed"
    }
}

/// Serialize an answer keyboard into Telegram `reply_markup` JSON.
fn keyboard_json(keyboard: &[Vec<Button>]) -> Value {
    let rows: Vec<Value> = keyboard
        .iter()
        .map(|row| {
            Value::Array(
                row.iter()
                    .map(|b| json!({"text": b.text, "callback_data": b.data}))
                    .collect(),
            )
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn result_message_id(result: &Value) -> Result<i64, GatewayError> {
    result
        .get("message_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| GatewayError::Rejected("response missing message_id".to_string()))
}

/// Permission set applied while a candidate awaits verification.
fn restricted_permissions() -> Value {
    json!({
        "can_send_messages": false,
        "can_send_photos": false,
        "can_send_videos": false,
        "can_send_other_messages": false,
        "can_send_polls": false,
        "can_add_web_page_previews": false,
    })
}

/// Permission set granted once a candidate passes verification.
fn member_permissions() -> Value {
    json!({
        "can_send_messages": true,
        "can_send_photos": true,
        "can_send_videos": true,
        "can_send_other_messages": true,
        "can_send_polls": true,
        "can_add_web_page_previews": true,
        "can_invite_users": false,
        "can_change_info": false,
        "can_pin_messages": false,
    })
}

#[async_trait]
impl ModerationGateway for TelegramGateway {
    async fn restrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.call(
            "restrictChatMember",
            json!({
                "chat_id": group_id,
                "user_id": user_id,
                "permissions": restricted_permissions(),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn unrestrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.call(
            "restrictChatMember",
            json!({
                "chat_id": group_id,
                "user_id": user_id,
                "permissions": member_permissions(),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn ban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.call(
            "banChatMember",
            json!({"chat_id": group_id, "user_id": user_id}),
        )
        .await
        .map(|_| ())
    }

    async fn unban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.call(
            "unbanChatMember",
            json!({"chat_id": group_id, "user_id": user_id}),
        )
        .await
        .map(|_| ())
    }

    async fn send_challenge(
        &self,
        group_id: i64,
        candidate: &Candidate,
        image_png: Vec<u8>,
        caption: &str,
        keyboard: &[Vec<Button>],
    ) -> Result<i64, GatewayError> {
        let markup = serde_json::to_string(&keyboard_json(keyboard))
            .map_err(|e| GatewayError::Rejected(format!("keyboard serialization failed: {e}")))?;

        let photo = multipart::Part::bytes(image_png)
            .file_name(format!("{}-captcha.png", candidate.user_id))
            .mime_str("image/png")
            .map_err(|e| GatewayError::Rejected(format!("invalid photo part: {e}")))?;

        let form = multipart::Form::new()
            .text("chat_id", group_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "Markdown")
            .text("reply_markup", markup)
            .part("photo", photo);

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(classify_transport_error(&e).to_string()))?;

        let result = parse_response(resp).await?;
        result_message_id(&result)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, GatewayError> {
        let result = self
            .call("sendMessage", json!({"chat_id": chat_id, "text": text}))
            .await?;
        result_message_id(&result)
    }

    async fn delete_message(&self, group_id: i64, message_id: i64) -> Result<(), GatewayError> {
        match self
            .call(
                "deleteMessage",
                json!({"chat_id": group_id, "message_id": message_id}),
            )
            .await
        {
            Ok(_) => Ok(()),
            // The challenge message may already be gone (manually removed
            // or raced by another resolver).
            Err(GatewayError::Rejected(desc))
                if desc.to_ascii_lowercase().contains("message to delete not found") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), GatewayError> {
        self.call(
            "answerCallbackQuery",
            json!({"callback_query_id": callback_id, "text": text}),
        )
        .await
        .map(|_| ())
    }

    async fn list_administrators(&self, group_id: i64) -> Result<HashSet<i64>, GatewayError> {
        let result = self
            .call("getChatAdministrators", json!({"chat_id": group_id}))
            .await?;
        let admins = result
            .as_array()
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| m.get("user").and_then(|u| u.get("id")).and_then(|v| v.as_i64()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(admins)
    }

    async fn get_sticker_set(&self, name: &str) -> Result<StickerSetMeta, GatewayError> {
        let result = self.call("getStickerSet", json!({"name": name})).await?;
        let title = result
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let item_count = result
            .get("stickers")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        Ok(StickerSetMeta { title, item_count })
    }

    async fn get_custom_emoji_set(
        &self,
        emoji_id: &str,
    ) -> Result<Option<String>, GatewayError> {
        let result = self
            .call(
                "getCustomEmojiStickers",
                json!({"custom_emoji_ids": [emoji_id]}),
            )
            .await?;
        Ok(result
            .as_array()
            .and_then(|a| a.first())
            .and_then(|s| s.get("set_name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }
}
