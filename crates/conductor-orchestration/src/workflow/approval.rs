//! Asynchronous approval of manual checkpoints.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Decision returned by [`ApprovalGate::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    Rejected,
    TimedOut,
}

/// Rendezvous between a paused workflow run and whoever approves it.
///
/// Decisions may arrive before the run reaches the checkpoint; they are kept
/// until a waiter consumes them. Use one gate per run, since decisions are
/// keyed by checkpoint id only.
#[derive(Debug, Default)]
pub struct ApprovalGate {
    decisions: Mutex<HashMap<String, bool>>,
    notify: Notify,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self, checkpoint_id: &str) {
        self.decide(checkpoint_id, true);
    }

    pub fn reject(&self, checkpoint_id: &str) {
        self.decide(checkpoint_id, false);
    }

    /// Pending decision for a checkpoint, without consuming it.
    pub fn decision(&self, checkpoint_id: &str) -> Option<GateDecision> {
        self.lock().get(checkpoint_id).map(|&ok| to_decision(ok))
    }

    /// Wait for a decision on `checkpoint_id`, at most `timeout` when given.
    /// The decision is consumed.
    pub async fn wait(&self, checkpoint_id: &str, timeout: Option<Duration>) -> GateDecision {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(ok) = self.lock().remove(checkpoint_id) {
                return to_decision(ok);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self
                            .lock()
                            .remove(checkpoint_id)
                            .map_or(GateDecision::TimedOut, to_decision);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn decide(&self, checkpoint_id: &str, approved: bool) {
        self.lock().insert(checkpoint_id.to_string(), approved);
        debug!(checkpoint = %checkpoint_id, approved, "Checkpoint decision recorded");
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn to_decision(approved: bool) -> GateDecision {
    if approved {
        GateDecision::Approved
    } else {
        GateDecision::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_decision_before_wait_is_kept() {
        let gate = ApprovalGate::new();
        gate.reject("cp");
        assert_eq!(gate.decision("cp"), Some(GateDecision::Rejected));
        assert_eq!(gate.wait("cp", None).await, GateDecision::Rejected);
        assert_eq!(gate.decision("cp"), None);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_approval() {
        let gate = Arc::new(ApprovalGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait("cp", Some(Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.approve("other");
        gate.approve("cp");
        assert_eq!(waiter.await.unwrap(), GateDecision::Approved);
        assert_eq!(gate.decision("other"), Some(GateDecision::Approved));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let gate = ApprovalGate::new();
        let decision = gate.wait("cp", Some(Duration::from_millis(20))).await;
        assert_eq!(decision, GateDecision::TimedOut);
    }
}
