//! Caller-side control of a running conversion.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ConvertError;
use crate::feedback::{FeedbackEvent, FeedbackHub};

use super::result::ConversionResult;

/// Orchestrator states, in the order a run passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    Idle,
    FetchingSchema,
    Mapping,
    GeneratingScripts,
    ExecutingSchema,
    TransferringData,
    Completed,
    Canceled,
    Failed,
}

impl ConversionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionState::Completed | ConversionState::Canceled | ConversionState::Failed
        )
    }
}

/// Handle to a conversion running on its own task.
pub struct ConversionHandle {
    pub(super) feedback: Arc<FeedbackHub>,
    pub(super) cancel: CancellationToken,
    pub(super) state: watch::Receiver<ConversionState>,
    pub(super) task: JoinHandle<ConversionResult>,
    pub(super) run_id: String,
}

impl ConversionHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Receive every feedback event of the run, including those published
    /// before this call. The stream ends when the run has finished.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FeedbackEvent> {
        self.feedback.subscribe()
    }

    /// Call `handler` for every event on a separate task, so a slow handler
    /// never holds up the run.
    pub fn subscribe_fn<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(FeedbackEvent) + Send + 'static,
    {
        let mut rx = self.feedback.subscribe();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        })
    }

    /// Request cooperative cancellation. Statements already sent to a
    /// database are not interrupted.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancellation requested for run {}", self.run_id);
            self.cancel.cancel();
        }
    }

    /// A token that cancels this run when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state.
    pub fn state(&self) -> ConversionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConversionState> {
        self.state.clone()
    }

    /// Wait for the run to finish.
    pub async fn await_result(self) -> Result<ConversionResult, ConvertError> {
        self.task.await.map_err(|e| {
            ConvertError::Query {
                engine: "orchestrator".into(),
                message: format!("Conversion task failed: {}", e),
            }
        })
    }
}

impl std::fmt::Debug for ConversionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionHandle")
            .field("run_id", &self.run_id)
            .field("state", &self.state())
            .field("canceled", &self.cancel.is_cancelled())
            .finish()
    }
}
