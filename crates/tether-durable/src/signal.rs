//! Typed signals and receivers
//!
//! External callers deliver signals by run id through the engine's
//! [`Signaler`](crate::workflow::Signaler); the workflow consumes them
//! through typed receivers. Each receiver supports a blocking receive, a
//! receive with timeout, and a non-blocking receive returning the oldest
//! pending value or none.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use tether_contracts::{
    ClarificationAnswer, ConfirmationDecision, ExternalToolResults, PauseRequest, ResumeRequest,
};

/// A typed message delivered to a running workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Pause(PauseRequest),
    Resume(ResumeRequest),
    Clarification(ClarificationAnswer),
    ExternalToolResults(ExternalToolResults),
    Confirmation(ConfirmationDecision),
    Cancel { reason: Option<String> },
}

/// Error from receive operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// The timeout elapsed before a signal arrived
    #[error("timed out waiting for signal")]
    Timeout,

    /// The hosting workflow was canceled while waiting
    #[error("workflow canceled")]
    Canceled,
}

struct SignalQueue<T> {
    pending: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> SignalQueue<T> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, value: T) {
        self.pending.lock().push_back(value);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<T> {
        self.pending.lock().pop_front()
    }
}

/// Receiving end of one typed signal channel.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct SignalReceiver<T> {
    queue: Arc<SignalQueue<T>>,
    cancel: CancellationToken,
}

impl<T> SignalReceiver<T> {
    /// Block until a signal arrives
    pub async fn receive(&self) -> Result<T, SignalError> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(value) = self.queue.pop() {
                return Ok(value);
            }
            tokio::select! {
                _ = notified => {}
                _ = self.cancel.cancelled() => return Err(SignalError::Canceled),
            }
        }
    }

    /// Block until a signal arrives or `timeout` elapses
    pub async fn receive_with_timeout(&self, timeout: Duration) -> Result<T, SignalError> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result,
            Err(_) => Err(SignalError::Timeout),
        }
    }

    /// Return the oldest pending signal, or none. Never drains the queue.
    pub fn receive_async(&self) -> Option<T> {
        self.queue.pop()
    }
}

/// Per-run signal routing: one queue per signal kind plus the run-level
/// cancellation token.
pub struct SignalHub {
    pause: Arc<SignalQueue<PauseRequest>>,
    resume: Arc<SignalQueue<ResumeRequest>>,
    clarification: Arc<SignalQueue<ClarificationAnswer>>,
    external_tools: Arc<SignalQueue<ExternalToolResults>>,
    confirmation: Arc<SignalQueue<ConfirmationDecision>>,
    cancel: CancellationToken,
}

impl SignalHub {
    pub fn new() -> Self {
        Self {
            pause: Arc::new(SignalQueue::new()),
            resume: Arc::new(SignalQueue::new()),
            clarification: Arc::new(SignalQueue::new()),
            external_tools: Arc::new(SignalQueue::new()),
            confirmation: Arc::new(SignalQueue::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Route one incoming signal to its typed queue
    pub fn deliver(&self, signal: Signal) {
        match signal {
            Signal::Pause(payload) => self.pause.push(payload),
            Signal::Resume(payload) => self.resume.push(payload),
            Signal::Clarification(payload) => self.clarification.push(payload),
            Signal::ExternalToolResults(payload) => self.external_tools.push(payload),
            Signal::Confirmation(payload) => self.confirmation.push(payload),
            Signal::Cancel { reason } => {
                tracing::debug!(reason = ?reason, "cancel signal received");
                self.cancel.cancel();
            }
        }
    }

    pub fn pause_requests(&self) -> SignalReceiver<PauseRequest> {
        self.receiver(&self.pause)
    }

    pub fn resume_requests(&self) -> SignalReceiver<ResumeRequest> {
        self.receiver(&self.resume)
    }

    pub fn clarification_answers(&self) -> SignalReceiver<ClarificationAnswer> {
        self.receiver(&self.clarification)
    }

    pub fn external_tool_results(&self) -> SignalReceiver<ExternalToolResults> {
        self.receiver(&self.external_tools)
    }

    pub fn confirmation_decisions(&self) -> SignalReceiver<ConfirmationDecision> {
        self.receiver(&self.confirmation)
    }

    /// Token tripped by a Cancel signal
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn receiver<T>(&self, queue: &Arc<SignalQueue<T>>) -> SignalReceiver<T> {
        SignalReceiver {
            queue: queue.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_contracts::RunId;

    #[tokio::test]
    async fn test_receive_async_returns_oldest() {
        let hub = SignalHub::new();
        hub.deliver(Signal::Resume(
            ResumeRequest::new(RunId::new("r1")).with_reason("first"),
        ));
        hub.deliver(Signal::Resume(
            ResumeRequest::new(RunId::new("r1")).with_reason("second"),
        ));

        let receiver = hub.resume_requests();
        assert_eq!(
            receiver.receive_async().unwrap().reason.as_deref(),
            Some("first")
        );
        assert_eq!(
            receiver.receive_async().unwrap().reason.as_deref(),
            Some("second")
        );
        assert!(receiver.receive_async().is_none());
    }

    #[tokio::test]
    async fn test_receive_blocks_until_delivery() {
        let hub = Arc::new(SignalHub::new());
        let receiver = hub.pause_requests();

        let sender = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sender.deliver(Signal::Pause(PauseRequest::new(RunId::new("r1"))));
        });

        let received = receiver.receive().await.unwrap();
        assert_eq!(received.run_id.as_str(), "r1");
    }

    #[tokio::test]
    async fn test_receive_with_timeout_elapses() {
        let hub = SignalHub::new();
        let receiver = hub.resume_requests();

        let result = receiver.receive_with_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Err(SignalError::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_receive() {
        let hub = Arc::new(SignalHub::new());
        let receiver = hub.confirmation_decisions();

        let canceler = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceler.deliver(Signal::Cancel { reason: None });
        });

        let result = receiver.receive().await;
        assert_eq!(result, Err(SignalError::Canceled));
    }

    #[test]
    fn test_signal_serde_tagged() {
        let signal = Signal::Pause(PauseRequest::new(RunId::new("r1")).with_reason("human_review"));
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("\"type\":\"pause\""));

        let parsed: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, signal);
    }
}
