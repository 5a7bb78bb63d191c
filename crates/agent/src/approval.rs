//! Approval gates consulted by the tool bridge before a gated tool runs.
//!
//! A gate answers one [`ApprovalRequest`] at a time. [`TimedApproval`] hands
//! requests to an external approver (a UI, a chat thread) over a channel
//! and denies anything not answered before its deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steerclaw_config::{ApprovalConfig, ApprovalMode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A tool call waiting for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub dangerous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied(String),
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approves every request.
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approved
    }
}

/// Denies every request.
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Denied(format!("approval policy denies '{}'", request.tool_name))
    }
}

/// A request handed to the external approver. Dropping it without
/// answering denies the call.
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    reply: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    pub fn approve(self) {
        let _ = self.reply.send(ApprovalDecision::Approved);
    }

    pub fn deny(self, reason: impl Into<String>) {
        let _ = self.reply.send(ApprovalDecision::Denied(reason.into()));
    }
}

/// Waits up to `timeout` for an external decision.
pub struct TimedApproval {
    requests: mpsc::Sender<PendingApproval>,
    timeout: Duration,
}

impl TimedApproval {
    /// The gate plus the receiver the approver should drain.
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (requests, rx) = mpsc::channel(32);
        (Self { requests, timeout }, rx)
    }
}

#[async_trait]
impl ApprovalGate for TimedApproval {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        let (reply, decision) = oneshot::channel();
        let pending = PendingApproval {
            request: request.clone(),
            reply,
        };
        // A full queue counts against the same deadline as the reply.
        let outcome = tokio::time::timeout(self.timeout, async {
            if self.requests.send(pending).await.is_err() {
                return Err("no approver is listening");
            }
            decision.await.map_err(|_| "approver dropped the request")
        })
        .await;

        match outcome {
            Ok(Ok(decision)) => {
                debug!(tool = %request.tool_name, approved = decision.is_approved(), "Approval decided");
                decision
            }
            Ok(Err(reason)) => {
                warn!(tool = %request.tool_name, reason, "Approval unavailable, denying");
                ApprovalDecision::Denied(reason.into())
            }
            Err(_) => {
                warn!(
                    tool = %request.tool_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Approval timed out, denying"
                );
                ApprovalDecision::Denied(format!(
                    "no decision within {}ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }
}

/// Build the gate described by `[approval]`. The receiver is returned for
/// timed mode only.
pub fn gate_from_config(
    config: &ApprovalConfig,
) -> (Arc<dyn ApprovalGate>, Option<mpsc::Receiver<PendingApproval>>) {
    match config.mode {
        ApprovalMode::Auto => (Arc::new(AutoApprove), None),
        ApprovalMode::Deny => (Arc::new(DenyAll), None),
        ApprovalMode::Timed => {
            let (gate, rx) = TimedApproval::new(Duration::from_millis(config.timeout_ms));
            (Arc::new(gate), Some(rx))
        }
    }
}
