//! Receive loop integration tests against a local getUpdates stub.
//!
//! The stub speaks just enough HTTP for reqwest: it answers each poll
//! with the next queued batch, then with empty batches until the loop
//! shuts down.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use common::{Action, RecordingGateway, StaticRenderer};
use gatehouse::filter::{AbuseFilter, BlacklistConfig};
use gatehouse::gateway::{
    Button, Candidate, GatewayError, ModerationGateway, StickerSetMeta,
};
use gatehouse::store::{now_millis, MemoryStore, SessionStore, VerificationSession};
use gatehouse::telegram::dispatch::Dispatcher;
use gatehouse::telegram::receive::receive_loop;
use gatehouse::verify::{SessionManager, VerifyConfig};

const GROUP: i64 = -1001;
const CANDIDATE: i64 = 555;

/// Serve queued getUpdates bodies, one per request, then empty batches.
async fn serve_batches(listener: TcpListener, mut batches: Vec<String>) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
            }
        }
        let body = if batches.is_empty() {
            r#"{"ok":true,"result":[]}"#.to_string()
        } else {
            batches.remove(0)
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
    }
}

/// Delegating gateway whose `send_challenge` parks until released.
struct GatedGateway {
    inner: Arc<RecordingGateway>,
    gate: Arc<Notify>,
}

#[async_trait]
impl ModerationGateway for GatedGateway {
    async fn restrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.inner.restrict(group_id, user_id).await
    }

    async fn unrestrict(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.inner.unrestrict(group_id, user_id).await
    }

    async fn ban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.inner.ban(group_id, user_id).await
    }

    async fn unban(&self, group_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.inner.unban(group_id, user_id).await
    }

    async fn send_challenge(
        &self,
        group_id: i64,
        candidate: &Candidate,
        image_png: Vec<u8>,
        caption: &str,
        keyboard: &[Vec<Button>],
    ) -> Result<i64, GatewayError> {
        self.gate.notified().await;
        self.inner
            .send_challenge(group_id, candidate, image_png, caption, keyboard)
            .await
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, GatewayError> {
        self.inner.send_text(chat_id, text).await
    }

    async fn delete_message(&self, group_id: i64, message_id: i64) -> Result<(), GatewayError> {
        self.inner.delete_message(group_id, message_id).await
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), GatewayError> {
        self.inner.answer_callback(callback_id, text).await
    }

    async fn list_administrators(&self, group_id: i64) -> Result<HashSet<i64>, GatewayError> {
        self.inner.list_administrators(group_id).await
    }

    async fn get_sticker_set(&self, name: &str) -> Result<StickerSetMeta, GatewayError> {
        self.inner.get_sticker_set(name).await
    }

    async fn get_custom_emoji_set(
        &self,
        emoji_id: &str,
    ) -> Result<Option<String>, GatewayError> {
        self.inner.get_custom_emoji_set(emoji_id).await
    }
}

fn dispatcher_with(
    gateway: Arc<dyn ModerationGateway>,
    store: Arc<dyn SessionStore>,
) -> Arc<Dispatcher> {
    let manager = Arc::new(SessionManager::new(
        store,
        gateway.clone(),
        Arc::new(StaticRenderer),
        VerifyConfig::default(),
    ));
    let filter = Arc::new(AbuseFilter::new(
        gateway.clone(),
        Arc::new(BlacklistConfig::default()),
    ));
    Arc::new(Dispatcher::new(manager, filter, gateway))
}

/// Poll the recorded actions until `pred` matches or the deadline hits.
async fn wait_for_action(
    gateway: &Arc<RecordingGateway>,
    pred: impl Fn(&Action) -> bool,
) -> bool {
    for _ in 0..200 {
        if gateway.actions().iter().any(&pred) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn polled_updates_reach_the_dispatcher() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let batch = serde_json::json!({
        "ok": true,
        "result": [{
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": GROUP, "type": "supergroup"},
                "from": {"id": CANDIDATE, "first_name": "Alice"},
                "new_chat_members": [{"id": CANDIDATE, "first_name": "Alice"}]
            }
        }]
    });
    tokio::spawn(serve_batches(listener, vec![batch.to_string()]));

    let gateway = RecordingGateway::new();
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let dispatcher = dispatcher_with(gateway.clone(), store.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(receive_loop(
        base_url,
        "token".to_string(),
        dispatcher,
        shutdown_rx,
    ));

    assert!(
        wait_for_action(&gateway, |a| matches!(a, Action::SendChallenge { .. })).await,
        "join update never reached the verification flow"
    );
    assert!(store.get(GROUP, CANDIDATE).await.is_some());

    let _ = shutdown_tx.send(true);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("receive loop should exit on shutdown")
        .expect("receive loop should not panic");
}

#[tokio::test]
async fn slow_handler_does_not_stall_later_updates() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    // One batch: a join whose challenge send parks on the gate, then a
    // callback for an already-pending session of another user.
    let batch = serde_json::json!({
        "ok": true,
        "result": [
            {
                "update_id": 1,
                "message": {
                    "message_id": 10,
                    "chat": {"id": GROUP, "type": "supergroup"},
                    "from": {"id": 556, "first_name": "Bob"},
                    "new_chat_members": [{"id": 556, "first_name": "Bob"}]
                }
            },
            {
                "update_id": 2,
                "callback_query": {
                    "id": "cb1",
                    "from": {"id": CANDIDATE},
                    "data": format!("aB3dE,{CANDIDATE}"),
                    "message": {
                        "message_id": 9000,
                        "chat": {"id": GROUP, "type": "supergroup"}
                    }
                }
            }
        ]
    });
    tokio::spawn(serve_batches(listener, vec![batch.to_string()]));

    let recording = RecordingGateway::new();
    let gate = Arc::new(Notify::new());
    let gateway: Arc<dyn ModerationGateway> = Arc::new(GatedGateway {
        inner: recording.clone(),
        gate: gate.clone(),
    });
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    store
        .put(VerificationSession {
            group_id: GROUP,
            candidate_user_id: CANDIDATE,
            challenge_message_id: 9000,
            secret: "aB3dE".to_string(),
            created_at: now_millis(),
        })
        .await
        .unwrap();
    let dispatcher = dispatcher_with(gateway, store.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(receive_loop(
        base_url,
        "token".to_string(),
        dispatcher,
        shutdown_rx,
    ));

    // The callback resolves while the join's challenge send is parked.
    assert!(
        wait_for_action(&recording, |a| matches!(
            a,
            Action::AnswerCallback { text, .. } if text == "Welcome!"
        ))
        .await,
        "callback was stalled behind the parked join handler"
    );
    assert!(store.get(GROUP, CANDIDATE).await.is_none());

    // Release the join handler and let it finish.
    gate.notify_one();
    assert!(
        wait_for_action(&recording, |a| matches!(
            a,
            Action::SendChallenge { user_id: 556, .. }
        ))
        .await,
        "parked join handler never completed"
    );
    assert!(store.get(GROUP, 556).await.is_some());

    let _ = shutdown_tx.send(true);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("receive loop should exit on shutdown")
        .expect("receive loop should not panic");
}
