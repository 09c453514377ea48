//! Verification session lifecycle.
//!
//! Creates pending challenges for joining users and resolves them exactly
//! once across three racing paths: the candidate's button press, an
//! administrator override, and the idle reaper's timeout sweep. All three
//! route through the store's atomic `resolve`; whichever caller wins the
//! removal applies the moderation side effects, the rest observe
//! [`Outcome::AlreadyHandled`] and apply nothing.

pub mod reaper;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::gateway::{Button, Candidate, GatewayError, ModerationGateway};
use crate::renderer::{ChallengeRenderer, RenderError};
use crate::secret;
use crate::store::{now_millis, SessionStore, StoreError, VerificationSession};

/// Buttons per keyboard row.
const KEYBOARD_ROW_WIDTH: usize = 3;

/// Retry attempts for the timeout path's ban (reaper actions must ride
/// out transient gateway failures without losing the resolution).
const TIMEOUT_BAN_ATTEMPTS: u32 = 3;
const TIMEOUT_BAN_BACKOFF: Duration = Duration::from_millis(500);

/// Terminal result of a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Candidate verified; restriction lifted.
    Approved,
    /// Candidate rejected and banned.
    Denied,
    /// Idle deadline passed; candidate banned.
    TimedOut,
    /// Another path already resolved this session; no action applied.
    AlreadyHandled,
}

/// Administrator override decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminDecision {
    Approve,
    Deny,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// Answer buttons are visible to the whole group, but only the
    /// candidate's click counts.
    #[error("only the candidate may answer this challenge")]
    NotTheCandidate,
    #[error("acting user is not a group administrator")]
    NotAnAdministrator,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Result of starting a verification for a join event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Challenge posted and session recorded.
    Created {
        secret: String,
        challenge_message_id: i64,
    },
    /// A pending session already existed (duplicate join event); the
    /// duplicate challenge was withdrawn and the existing session stands.
    Duplicate,
}

/// Tunables for the verification flow.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Seconds a candidate has before the reaper may force a timeout.
    pub idle_seconds: u64,
    /// Characters per challenge secret.
    pub secret_length: usize,
    /// Total answer buttons (one correct, the rest decoys).
    pub answer_buttons: usize,
    /// Dev-mode convenience: lift each ban after this delay so testers
    /// can rejoin. `None` in production.
    pub lift_bans_after: Option<Duration>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            idle_seconds: 120,
            secret_length: secret::DEFAULT_LENGTH,
            answer_buttons: 6,
            lift_bans_after: None,
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn ModerationGateway>,
    renderer: Arc<dyn ChallengeRenderer>,
    config: VerifyConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn ModerationGateway>,
        renderer: Arc<dyn ChallengeRenderer>,
        config: VerifyConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            renderer,
            config,
        }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Start a verification for a joining candidate: restrict
    /// (best-effort), post the challenge, record the session.
    pub async fn begin(
        &self,
        group_id: i64,
        candidate_user_id: i64,
        display_name: &str,
    ) -> Result<BeginOutcome, VerifyError> {
        let challenge_secret = secret::generate(self.config.secret_length);
        let image = self.renderer.render(&challenge_secret)?;

        // The bot may lack admin rights; verification still proceeds
        // without the restriction.
        if let Err(e) = self.gateway.restrict(group_id, candidate_user_id).await {
            warn!(group_id, candidate_user_id, error = %e, "failed to restrict candidate");
        }

        let candidate = Candidate {
            user_id: candidate_user_id,
            display_name: display_name.to_string(),
        };
        let caption = format!(
            "Hello [{}](tg://user?id={}), please verify by clicking the correct button within {} seconds",
            candidate.display_name, candidate.user_id, self.config.idle_seconds
        );
        let keyboard = build_keyboard(
            &challenge_secret,
            candidate_user_id,
            self.config.answer_buttons,
            self.config.secret_length,
        );

        let challenge_message_id = self
            .gateway
            .send_challenge(group_id, &candidate, image, &caption, &keyboard)
            .await?;

        let session = VerificationSession {
            group_id,
            candidate_user_id,
            challenge_message_id,
            secret: challenge_secret.clone(),
            created_at: now_millis(),
        };

        match self.store.put(session).await {
            Ok(()) => {
                info!(group_id, candidate_user_id, challenge_message_id, "verification started");
                Ok(BeginOutcome::Created {
                    secret: challenge_secret,
                    challenge_message_id,
                })
            }
            Err(StoreError::Conflict(key)) => {
                // Duplicate join event; withdraw the extra challenge and
                // let the existing session stand.
                info!(%key, "verification already pending, withdrawing duplicate challenge");
                self.delete_challenge(group_id, challenge_message_id).await;
                Ok(BeginOutcome::Duplicate)
            }
            Err(e) => Err(VerifyError::Store(e)),
        }
    }

    /// Resolve a session from the candidate's own button press.
    pub async fn resolve_by_answer(
        &self,
        group_id: i64,
        candidate_user_id: i64,
        submitted_secret: &str,
        submitted_by: i64,
    ) -> Result<Outcome, VerifyError> {
        if submitted_by != candidate_user_id {
            return Err(VerifyError::NotTheCandidate);
        }

        let Some(session) = self.store.resolve(group_id, candidate_user_id).await else {
            return Ok(Outcome::AlreadyHandled);
        };

        let outcome = if submitted_secret == session.secret {
            info!(group_id, candidate_user_id, "correct answer, approving");
            if let Err(e) = self.gateway.unrestrict(group_id, candidate_user_id).await {
                warn!(group_id, candidate_user_id, error = %e, "failed to lift restriction");
            }
            Outcome::Approved
        } else {
            info!(group_id, candidate_user_id, "wrong answer, banning");
            if let Err(e) = self.gateway.ban(group_id, candidate_user_id).await {
                warn!(group_id, candidate_user_id, error = %e, "failed to ban candidate");
            }
            self.schedule_lift_ban(group_id, candidate_user_id);
            Outcome::Denied
        };

        self.delete_challenge(group_id, session.challenge_message_id).await;
        Ok(outcome)
    }

    /// Resolve a session by administrator override. The admin roster is
    /// fetched at call time; it changes too often to cache.
    pub async fn resolve_by_admin(
        &self,
        group_id: i64,
        candidate_user_id: i64,
        acting_user_id: i64,
        decision: AdminDecision,
    ) -> Result<Outcome, VerifyError> {
        let admins = self.gateway.list_administrators(group_id).await?;
        if !admins.contains(&acting_user_id) {
            return Err(VerifyError::NotAnAdministrator);
        }

        let Some(session) = self.store.resolve(group_id, candidate_user_id).await else {
            return Ok(Outcome::AlreadyHandled);
        };

        let outcome = match decision {
            AdminDecision::Approve => {
                info!(group_id, candidate_user_id, acting_user_id, "admin approved candidate");
                if let Err(e) = self.gateway.unrestrict(group_id, candidate_user_id).await {
                    warn!(group_id, candidate_user_id, error = %e, "failed to lift restriction");
                }
                Outcome::Approved
            }
            AdminDecision::Deny => {
                info!(group_id, candidate_user_id, acting_user_id, "admin denied candidate");
                if let Err(e) = self.gateway.ban(group_id, candidate_user_id).await {
                    warn!(group_id, candidate_user_id, error = %e, "failed to ban candidate");
                }
                self.schedule_lift_ban(group_id, candidate_user_id);
                Outcome::Denied
            }
        };

        self.delete_challenge(group_id, session.challenge_message_id).await;
        Ok(outcome)
    }

    /// Force-resolve an overdue session. Reaper only; never approves.
    pub async fn resolve_by_timeout(
        &self,
        group_id: i64,
        candidate_user_id: i64,
    ) -> Result<Outcome, VerifyError> {
        let Some(session) = self.store.resolve(group_id, candidate_user_id).await else {
            return Ok(Outcome::AlreadyHandled);
        };

        info!(group_id, candidate_user_id, "verification timed out, banning");
        self.ban_with_retry(group_id, candidate_user_id).await;
        self.schedule_lift_ban(group_id, candidate_user_id);
        self.delete_challenge(group_id, session.challenge_message_id).await;
        Ok(Outcome::TimedOut)
    }

    /// Ban with bounded retries on transient gateway failures. The
    /// session is already resolved at this point, so giving up after the
    /// retries must not fail the sweep.
    async fn ban_with_retry(&self, group_id: i64, user_id: i64) {
        for attempt in 1..=TIMEOUT_BAN_ATTEMPTS {
            match self.gateway.ban(group_id, user_id).await {
                Ok(()) => return,
                Err(e) if e.is_retryable() && attempt < TIMEOUT_BAN_ATTEMPTS => {
                    warn!(group_id, user_id, attempt, error = %e, "ban failed, retrying");
                    tokio::time::sleep(TIMEOUT_BAN_BACKOFF).await;
                }
                Err(e) => {
                    warn!(group_id, user_id, error = %e, "ban failed, giving up");
                    return;
                }
            }
        }
    }

    /// Dev mode only: undo a ban after the configured delay so a tester
    /// can rejoin and run the flow again.
    fn schedule_lift_ban(&self, group_id: i64, user_id: i64) {
        let Some(delay) = self.config.lift_bans_after else {
            return;
        };
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            warn!(group_id, user_id, "dev mode: lifting ban");
            if let Err(e) = gateway.unban(group_id, user_id).await {
                warn!(group_id, user_id, error = %e, "failed to lift ban");
            }
        });
    }

    /// Delete a challenge message, tolerating failure (it may already be
    /// gone).
    async fn delete_challenge(&self, group_id: i64, message_id: i64) {
        if let Err(e) = self.gateway.delete_message(group_id, message_id).await {
            warn!(group_id, message_id, error = %e, "failed to delete challenge message");
        }
    }
}

/// Build the challenge keyboard: `answer_buttons` choices with the
/// correct secret at a random position among decoys, in rows of three,
/// plus an Approve/Deny row for administrators.
fn build_keyboard(
    challenge_secret: &str,
    candidate_user_id: i64,
    answer_buttons: usize,
    secret_length: usize,
) -> Vec<Vec<Button>> {
    let mut rng = rand::thread_rng();
    let mut answers: Vec<Button> = (0..answer_buttons)
        .map(|_| {
            let decoy = secret::generate(secret_length);
            Button::new(decoy.clone(), format!("{decoy},{candidate_user_id}"))
        })
        .collect();
    let correct = rng.gen_range(0..answers.len().max(1));
    answers[correct] = Button::new(
        challenge_secret,
        format!("{challenge_secret},{candidate_user_id}"),
    );

    let mut keyboard: Vec<Vec<Button>> = answers
        .chunks(KEYBOARD_ROW_WIDTH)
        .map(|row| row.to_vec())
        .collect();
    keyboard.push(vec![
        Button::new("Approve", format!("Approve,{candidate_user_id}")),
        Button::new("Deny", format!("Deny,{candidate_user_id}")),
    ]);
    keyboard
}
