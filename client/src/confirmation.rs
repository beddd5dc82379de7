use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use solana_sdk::signature::Signature;
use tokio::sync::watch;

use crate::{
    error::TransportError,
    transport::{SendOutcome, SignatureNotification, SubscriptionId},
};

/// Lifecycle of a submitted transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationState {
    Submitted,
    /// Refused before reaching the ledger. Terminal.
    RejectedAtSimulation,
    /// Accepted, waiting on the signature feed
    AwaitingConfirmation,
    /// Terminal
    Confirmed,
    /// Landed with an error. Terminal.
    Failed,
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfirmationState::RejectedAtSimulation
                | ConfirmationState::Confirmed
                | ConfirmationState::Failed
        )
    }
}

/// Why a transaction was refused at submission time
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationDiagnostics {
    pub code: i64,
    pub message: String,
    /// Program logs collected during simulation
    pub logs: Vec<String>,
    /// The transaction error reported by the simulation
    pub err: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SimulationPayload {
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    logs: Option<Vec<String>>,
}

impl SimulationDiagnostics {
    /// Build diagnostics from a rejection, decoding the simulation payload when it has the expected shape
    pub fn from_rejection(code: i64, message: String, data: Option<serde_json::Value>) -> Self {
        let payload = data.and_then(|d| serde_json::from_value::<SimulationPayload>(d).ok());
        let (err, logs) = match payload {
            Some(p) => (p.err, p.logs.unwrap_or_default()),
            None => (None, vec![]),
        };
        Self {
            code,
            message,
            logs,
            err,
        }
    }
}

#[derive(Debug)]
struct Record {
    signature: Option<Signature>,
    state: ConfirmationState,
    diagnostics: Option<SimulationDiagnostics>,
    subscription: Option<SubscriptionId>,
    slot: Option<u64>,
    failure: Option<serde_json::Value>,
}

/// The outcome record of one submitted transaction.
///
/// Cloning shares the same record. The state only moves forward and each transition fires at most once.
#[derive(Clone, Debug)]
pub struct SignatureConfirmation {
    record: Arc<Mutex<Record>>,
    state: watch::Receiver<ConfirmationState>,
}

/// Drives a [`SignatureConfirmation`] from the submission result and the signature feed.
///
/// Dropping the last handle without reaching a terminal state leaves waiters with an indeterminate outcome.
#[derive(Debug)]
pub struct ConfirmationFeed {
    record: Arc<Mutex<Record>>,
    state: watch::Sender<ConfirmationState>,
}

impl SignatureConfirmation {
    /// A fresh record in the [`ConfirmationState::Submitted`] state and the feed that drives it
    pub fn submitted() -> (Self, ConfirmationFeed) {
        let record = Arc::new(Mutex::new(Record {
            signature: None,
            state: ConfirmationState::Submitted,
            diagnostics: None,
            subscription: None,
            slot: None,
            failure: None,
        }));
        let (tx, rx) = watch::channel(ConfirmationState::Submitted);
        (
            Self {
                record: Arc::clone(&record),
                state: rx,
            },
            ConfirmationFeed { record, state: tx },
        )
    }

    pub fn state(&self) -> ConfirmationState {
        self.record.lock().state
    }

    /// The transaction signature, absent when submission itself failed
    pub fn signature(&self) -> Option<Signature> {
        self.record.lock().signature
    }

    pub fn diagnostics(&self) -> Option<SimulationDiagnostics> {
        self.record.lock().diagnostics.clone()
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.record.lock().subscription
    }

    /// Slot at which the outcome was observed
    pub fn slot(&self) -> Option<u64> {
        self.record.lock().slot
    }

    /// The ledger error of a [`ConfirmationState::Failed`] transaction
    pub fn failure(&self) -> Option<serde_json::Value> {
        self.record.lock().failure.clone()
    }

    /// Wait until the record reaches a terminal state.
    ///
    /// Returns `None` if the feed went away first, in which case the outcome is unknown.
    pub async fn wait_terminal(&self) -> Option<ConfirmationState> {
        let mut rx = self.state.clone();
        loop {
            let state = self.state();
            if state.is_terminal() {
                return Some(state);
            }
            if rx.changed().await.is_err() {
                let state = self.state();
                return state.is_terminal().then(|| state);
            }
        }
    }
}

impl ConfirmationFeed {
    fn transition(&self, record: &mut Record, next: ConfirmationState) {
        log::debug!(
            "Confirmation {:?}: {:?} -> {:?}",
            record.signature,
            record.state,
            next
        );
        record.state = next;
        // the receiver half may have been dropped, the record stays authoritative
        let _ = self.state.send(next);
    }

    /// Apply the transport's answer to the submission.
    ///
    /// Returns the signature to watch when the transaction was accepted.
    pub fn on_submit_result(
        &self,
        result: Result<SendOutcome, TransportError>,
    ) -> Option<Signature> {
        let mut record = self.record.lock();
        if record.state != ConfirmationState::Submitted {
            return None;
        }
        match result {
            Ok(SendOutcome::Accepted(signature)) => {
                record.signature = Some(signature);
                self.transition(&mut record, ConfirmationState::AwaitingConfirmation);
                Some(signature)
            }
            Ok(SendOutcome::Rejected {
                code,
                message,
                data,
            }) => {
                log::warn!("Transaction rejected ({}): {}", code, message);
                record.diagnostics = Some(SimulationDiagnostics::from_rejection(code, message, data));
                self.transition(&mut record, ConfirmationState::RejectedAtSimulation);
                None
            }
            Err(e) => {
                log::warn!("Transaction submission failed: {}", e);
                record.diagnostics = Some(SimulationDiagnostics::from_rejection(
                    -1,
                    e.to_string(),
                    None,
                ));
                self.transition(&mut record, ConfirmationState::RejectedAtSimulation);
                None
            }
        }
    }

    /// Remember the signature subscription watching this transaction
    pub fn attach_subscription(&self, id: SubscriptionId) {
        let mut record = self.record.lock();
        if record.state == ConfirmationState::AwaitingConfirmation {
            record.subscription = Some(id);
        }
    }

    /// Apply a signature notification. Returns whether it caused a transition.
    pub fn on_notification(&self, notification: SignatureNotification) -> bool {
        let mut record = self.record.lock();
        if record.state != ConfirmationState::AwaitingConfirmation {
            log::debug!(
                "Ignoring notification for {:?} in state {:?}",
                record.signature,
                record.state
            );
            return false;
        }
        record.slot = Some(notification.slot);
        let next = match notification.err {
            None => ConfirmationState::Confirmed,
            Some(err) => {
                record.failure = Some(err);
                ConfirmationState::Failed
            }
        };
        self.transition(&mut record, next);
        true
    }
}
