//! Retrying transport between the dispatcher and an editor instance.
//!
//! A [`PeerChannel`] delivers one framed request and hands back a
//! [`PendingReply`] that resolves when the reply carrying the same
//! correlation id arrives. [`TransportClient`] drives the per-attempt cycle
//! (send and await under one deadline, classify) and decides whether a failed
//! attempt may be repeated.

pub mod tcp;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::envelope::CommandEnvelope;
use crate::error::{BridgeError, BridgeResult};
use crate::instance::Resolution;

pub use tcp::{ChannelOptions, TcpChannel};

/// Request frame sent to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    #[serde(rename = "type")]
    pub command: String,
    pub params: Map<String, Value>,
}

/// Reply frame received from the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReply {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
}

type DropHook = Box<dyn FnOnce() + Send + Sync>;

/// A delivered request awaiting its reply.
pub struct PendingReply {
    rx: oneshot::Receiver<BridgeResult<Value>>,
    on_drop: Option<DropHook>,
}

impl PendingReply {
    pub fn new(rx: oneshot::Receiver<BridgeResult<Value>>) -> Self {
        Self { rx, on_drop: None }
    }

    /// Run `hook` when the reply is dropped, whether it completed or not.
    pub fn on_drop(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    /// A reply that is already available.
    pub fn ready(result: BridgeResult<Value>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(rx)
    }

    /// A reply that never arrives.
    #[cfg(test)]
    pub fn never() -> Self {
        let (tx, rx) = oneshot::channel();
        Self::new(rx).on_drop(move || drop(tx))
    }

    /// Wait for the reply with no bound of its own; callers apply the deadline.
    pub async fn recv(mut self) -> BridgeResult<Value> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::connection(
                "connection closed before a reply arrived",
                true,
            )),
        }
    }

    #[cfg(test)]
    pub async fn wait(self, timeout: Duration) -> BridgeResult<Value> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .unwrap_or(Err(BridgeError::TimedOut { after: timeout }))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

/// Connection to one editor instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Human-readable peer address, for logs.
    fn describe(&self) -> String;

    /// Deliver a request. An error here means the request was not delivered
    /// unless it is a `Connection` error with `after_send` set. Dropping the
    /// future midway may leave part of the request on the wire.
    async fn send(&self, request: WireRequest) -> BridgeResult<PendingReply>;

    /// Open the connection if it is not already open, without sending anything.
    async fn probe(&self) -> BridgeResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    /// Actions that are safe to repeat after the command may have been delivered.
    pub read_only_actions: HashSet<String>,
}

pub const DEFAULT_READ_ONLY_ACTIONS: &[&str] = &[
    "search",
    "get_info",
    "get_components",
    "get_hierarchy",
    "find",
    "get_active",
    "get_build_settings",
];

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(2000),
            read_only_actions: DEFAULT_READ_ONLY_ACTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, for `attempt >= 1`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub fn is_read_only(&self, action: Option<&str>) -> bool {
        action.is_some_and(|a| self.read_only_actions.contains(a))
    }

    /// Whether a failed attempt of `action` may be repeated.
    pub fn is_retryable(&self, error: &BridgeError, action: Option<&str>) -> bool {
        match error {
            BridgeError::Connection {
                after_send: false, ..
            } => true,
            BridgeError::Connection {
                after_send: true, ..
            }
            | BridgeError::TimedOut { .. } => self.is_read_only(action),
            _ => false,
        }
    }
}

/// Final failure after the retry budget, or a non-retryable error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct DispatchFailure {
    pub error: BridgeError,
    pub attempts: u32,
}

pub struct TransportClient {
    policy: RetryPolicy,
    next_id: AtomicU64,
}

impl TransportClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Deliver `envelope` to the resolved instance and return the peer's raw
    /// reply. Each attempt uses a fresh correlation id, and `timeout` bounds
    /// the whole attempt: connecting, writing and waiting for the reply.
    pub async fn dispatch(
        &self,
        resolution: &Resolution,
        envelope: &CommandEnvelope,
        timeout: Duration,
    ) -> Result<Value, DispatchFailure> {
        let action = envelope.action();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = WireRequest {
                id: self.next_request_id(),
                command: envelope.command.clone(),
                params: envelope.params.clone(),
            };
            let request_id = request.id;
            debug!(
                instance = %resolution.id,
                command = %envelope.command,
                action = action.unwrap_or(""),
                request_id,
                attempt,
                "Sending command"
            );

            let handle = &resolution.handle;
            // A write cut short by the deadline counts as delivered.
            let outcome = tokio::time::timeout(timeout, async { handle.send(request).await?.recv().await })
                .await
                .unwrap_or(Err(BridgeError::TimedOut { after: timeout }));

            let err = match outcome {
                Ok(value) => {
                    debug!(instance = %resolution.id, request_id, attempt, "Command completed");
                    return Ok(value);
                }
                Err(e) => e,
            };

            if attempt < max_attempts && self.policy.is_retryable(&err, action) {
                let delay = self.policy.backoff_for(attempt);
                warn!(
                    instance = %resolution.id,
                    command = %envelope.command,
                    request_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            error!(
                instance = %resolution.id,
                command = %envelope.command,
                action = action.unwrap_or(""),
                attempts = attempt,
                error = %err,
                "Command dispatch failed"
            );
            return Err(DispatchFailure {
                error: err,
                attempts: attempt,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::envelope::EnvelopeBuilder;
    use crate::instance::ResolvedBy;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    fn resolution(mock: MockPeerChannel) -> Resolution {
        Resolution {
            id: "editor@6400".into(),
            handle: Arc::new(mock),
            resolved_by: ResolvedBy::Sole,
        }
    }

    fn envelope(action: &str) -> CommandEnvelope {
        EnvelopeBuilder::new("manage_asset")
            .action(action)
            .string("path", Some(&json!("Assets/Foo.mat")))
            .build()
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(2000));
    }

    #[test]
    fn retry_classification() {
        let policy = RetryPolicy::default();
        let before = BridgeError::connection("refused", false);
        let after = BridgeError::connection("reset", true);
        let timeout = BridgeError::TimedOut {
            after: Duration::from_secs(1),
        };

        assert!(policy.is_retryable(&before, Some("create")));
        assert!(policy.is_retryable(&before, None));
        assert!(policy.is_retryable(&after, Some("search")));
        assert!(!policy.is_retryable(&after, Some("create")));
        assert!(policy.is_retryable(&timeout, Some("get_info")));
        assert!(!policy.is_retryable(&timeout, Some("delete")));
        assert!(!policy.is_retryable(&timeout, None));
        assert!(!policy.is_retryable(&BridgeError::Peer("nope".into()), Some("search")));
    }

    #[tokio::test]
    async fn connection_failures_then_success() {
        let sends = Arc::new(AtomicUsize::new(0));
        let counter = sends.clone();
        let mut mock = MockPeerChannel::new();
        mock.expect_send().times(3).returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(BridgeError::connection("connection refused", false))
            } else {
                Ok(PendingReply::ready(Ok(json!({"success": true, "data": {}}))))
            }
        });

        let client = TransportClient::new(fast_policy());
        let value = client
            .dispatch(&resolution(mock), &envelope("create"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, json!({"success": true, "data": {}}));
        assert_eq!(sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn read_only_timeout_is_retried() {
        let sends = Arc::new(AtomicUsize::new(0));
        let counter = sends.clone();
        let mut mock = MockPeerChannel::new();
        mock.expect_send().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(PendingReply::never())
            } else {
                Ok(PendingReply::ready(Ok(json!({"success": true, "data": {"assets": []}}))))
            }
        });

        let client = TransportClient::new(fast_policy());
        let value = client
            .dispatch(&resolution(mock), &envelope("search"), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(value["data"]["assets"], json!([]));
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn side_effecting_timeout_is_not_retried() {
        let mut mock = MockPeerChannel::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(PendingReply::never()));

        let client = TransportClient::new(fast_policy());
        let failure = client
            .dispatch(&resolution(mock), &envelope("create"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, BridgeError::TimedOut { .. }));
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn drop_after_send_is_not_retried_for_writes() {
        let mut mock = MockPeerChannel::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(PendingReply::ready(Err(BridgeError::connection("reset", true)))));

        let client = TransportClient::new(fast_policy());
        let failure = client
            .dispatch(&resolution(mock), &envelope("delete"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(failure.error, BridgeError::connection("reset", true));
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error_and_attempts() {
        let mut mock = MockPeerChannel::new();
        mock.expect_send()
            .times(3)
            .returning(|_| Err(BridgeError::connection("connection refused", false)));

        let client = TransportClient::new(fast_policy());
        let failure = client
            .dispatch(&resolution(mock), &envelope("search"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, BridgeError::Connection { after_send: false, .. }));
        assert!(failure.to_string().contains("after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn each_attempt_gets_a_fresh_id() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = seen.clone();
        let mut mock = MockPeerChannel::new();
        mock.expect_send().times(2).returning(move |req: WireRequest| {
            let mut ids = record.lock().unwrap();
            ids.push(req.id);
            assert_eq!(req.command, "manage_asset");
            assert_eq!(req.params["action"], json!("get_info"));
            if ids.len() == 1 {
                Err(BridgeError::connection("refused", false))
            } else {
                Ok(PendingReply::ready(Ok(json!({"success": true}))))
            }
        });

        let client = TransportClient::new(fast_policy());
        client
            .dispatch(&resolution(mock), &envelope("get_info"), Duration::from_secs(1))
            .await
            .unwrap();
        let ids = seen.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn peer_failure_is_passed_through() {
        let mut mock = MockPeerChannel::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(PendingReply::ready(Ok(json!({"success": false, "message": "Asset not found"}))))
        });

        let client = TransportClient::new(fast_policy());
        let value = client
            .dispatch(&resolution(mock), &envelope("get_info"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value["message"], json!("Asset not found"));
    }

    #[test]
    fn wire_request_uses_type_key() {
        let request = WireRequest {
            id: 7,
            command: "run_tests".into(),
            params: Map::new(),
        };
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(text, r#"{"id":7,"type":"run_tests","params":{}}"#);
    }
}
