//! One-shot consent gate for biometric data processing.
//!
//! Device acquisition is gated on an explicit acknowledgment of the
//! processing policy. A prompt is scoped to a single access attempt: it is
//! never cached across attempts and never defaults to granted.

use tokio::sync::oneshot;
use turnstile_core::error::{TurnstileError, TurnstileResult};
use turnstile_core::ConsentRecord;

/// Latch between the consent prompt and the attempt waiting on it.
///
/// `open` hands out a [`ConsentTicket`]; `resolve` settles it exactly once.
/// An abandoned prompt -- the gate dropped or reopened before resolution --
/// settles as declined, so a waiting attempt can never hang.
#[derive(Debug, Default)]
pub struct ConsentGate {
    pending: Option<oneshot::Sender<bool>>,
}

impl ConsentGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presents a fresh prompt and returns the ticket that resolves with the
    /// user's answer. Any earlier unresolved prompt settles as declined.
    pub fn open(&mut self) -> ConsentTicket {
        let (tx, rx) = oneshot::channel();
        if self.pending.replace(tx).is_some() {
            tracing::debug!("unresolved consent prompt superseded; resolves declined");
        }
        ConsentTicket { answer: rx }
    }

    /// Settles the pending prompt. Fails with `NoPendingConsent` when there
    /// is no prompt to settle, including a second resolution of the same
    /// prompt.
    pub fn resolve(&mut self, granted: bool) -> TurnstileResult<()> {
        let pending = self
            .pending
            .take()
            .ok_or(TurnstileError::NoPendingConsent)?;
        if pending.send(granted).is_err() {
            // The waiting attempt is gone; the prompt died with it.
            return Err(TurnstileError::NoPendingConsent);
        }
        tracing::debug!(granted, "consent resolved");
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Pending answer to one consent prompt.
#[derive(Debug)]
pub struct ConsentTicket {
    answer: oneshot::Receiver<bool>,
}

impl ConsentTicket {
    /// Waits for the prompt to settle. Resolves on every path: an explicit
    /// answer settles as given, an abandoned prompt settles as declined.
    pub async fn outcome(self) -> ConsentRecord {
        let granted = self.answer.await.unwrap_or(false);
        ConsentRecord::new(granted)
    }
}
