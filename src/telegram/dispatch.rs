//! Update dispatcher.
//!
//! Routes each inbound update to the right handler: join events go
//! through the abuse filter and then into verification, button presses
//! into the session manager's resolve paths, and ordinary group messages
//! through the abuse filter. New and edited messages take the same path,
//! so the filter runs exactly once per qualifying event.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::filter::{AbuseFilter, Verdict};
use crate::gateway::ModerationGateway;
use crate::telegram::{CallbackQuery, Message, Update};
use crate::verify::{AdminDecision, BeginOutcome, Outcome, SessionManager, VerifyError};

const GREETING: &str = "Hello! Add me to a group and make me admin!";

/// A parsed callback payload: either an admin override or a candidate's
/// answer, always carrying the candidate's user id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackAction {
    Admin(AdminDecision),
    Answer(String),
}

pub struct Dispatcher {
    manager: Arc<SessionManager>,
    filter: Arc<AbuseFilter>,
    gateway: Arc<dyn ModerationGateway>,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<SessionManager>,
        filter: Arc<AbuseFilter>,
        gateway: Arc<dyn ModerationGateway>,
    ) -> Self {
        Self {
            manager,
            filter,
            gateway,
        }
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(cb) = update.callback_query {
            self.handle_callback(cb).await;
            return;
        }
        // New and edited messages share one evaluation.
        if let Some(msg) = update.message.or(update.edited_message) {
            self.handle_message(msg).await;
        }
    }

    async fn handle_message(&self, msg: Message) {
        if msg.chat.is_private() {
            if matches!(msg.text_content(), "/start" | "/help") {
                if let Err(e) = self.gateway.send_text(msg.chat.id, GREETING).await {
                    warn!(chat_id = msg.chat.id, error = %e, "failed to send greeting");
                }
            }
            return;
        }

        if !msg.chat.is_group() {
            return;
        }

        if !msg.new_chat_members.is_empty() {
            self.handle_join(msg).await;
            return;
        }

        if msg.is_service() {
            return;
        }

        self.filter.inspect(&msg).await;
    }

    /// A join service message: screen it first, then challenge each new
    /// human member.
    async fn handle_join(&self, msg: Message) {
        // Flagged actors are banned outright and never challenged.
        if self.filter.inspect(&msg).await != Verdict::Clean {
            return;
        }

        let group_id = msg.chat.id;
        for member in &msg.new_chat_members {
            if member.is_bot {
                debug!(group_id, user_id = member.id, "skipping joining bot");
                continue;
            }
            match self
                .manager
                .begin(group_id, member.id, member.display_name())
                .await
            {
                Ok(BeginOutcome::Created { .. }) => {}
                Ok(BeginOutcome::Duplicate) => {
                    debug!(group_id, user_id = member.id, "duplicate join event ignored");
                }
                Err(e) => {
                    warn!(group_id, user_id = member.id, error = %e, "failed to start verification");
                }
            }
        }

        // Drop the join service message; failure is harmless.
        if let Err(e) = self.gateway.delete_message(group_id, msg.message_id).await {
            debug!(group_id, message_id = msg.message_id, error = %e, "failed to delete join notice");
        }
    }

    async fn handle_callback(&self, cb: CallbackQuery) {
        let Some((action, candidate_user_id)) = cb.data.as_deref().and_then(parse_callback_data)
        else {
            debug!(callback_id = %cb.id, "ignoring malformed callback payload");
            return;
        };
        let Some(group_id) = cb.message.as_ref().map(|m| m.chat.id) else {
            debug!(callback_id = %cb.id, "callback without originating message");
            return;
        };

        let result = match &action {
            CallbackAction::Admin(decision) => {
                self.manager
                    .resolve_by_admin(group_id, candidate_user_id, cb.from.id, *decision)
                    .await
            }
            CallbackAction::Answer(submitted) => {
                self.manager
                    .resolve_by_answer(group_id, candidate_user_id, submitted, cb.from.id)
                    .await
            }
        };

        let toast = match &result {
            Ok(Outcome::Approved) => "Welcome!",
            Ok(Outcome::Denied) => "Wrong answer",
            Ok(Outcome::TimedOut) => "Verification expired",
            Ok(Outcome::AlreadyHandled) => "Already handled",
            Err(VerifyError::NotTheCandidate) => "Not your button.",
            Err(VerifyError::NotAnAdministrator) => "You are not an administrator",
            Err(e) => {
                warn!(group_id, candidate_user_id, error = %e, "callback resolution failed");
                "Something went wrong, try again"
            }
        };

        if let Ok(outcome) = &result {
            info!(group_id, candidate_user_id, clicked_by = cb.from.id, ?outcome, "callback resolved");
        }

        if let Err(e) = self.gateway.answer_callback(&cb.id, toast).await {
            debug!(callback_id = %cb.id, error = %e, "failed to answer callback");
        }
    }
}

/// Parse `"<payload>,<candidate_user_id>"` callback data. Admin override
/// payloads are the literal `Approve`/`Deny`; anything else is a
/// submitted answer.
fn parse_callback_data(data: &str) -> Option<(CallbackAction, i64)> {
    let (payload, user) = data.rsplit_once(',')?;
    let candidate_user_id: i64 = user.trim().parse().ok()?;
    let action = match payload {
        "Approve" => CallbackAction::Admin(AdminDecision::Approve),
        "Deny" => CallbackAction::Admin(AdminDecision::Deny),
        answer if !answer.is_empty() => CallbackAction::Answer(answer.to_string()),
        _ => return None,
    };
    Some((action, candidate_user_id))
}
