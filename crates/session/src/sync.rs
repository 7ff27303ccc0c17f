//! Local mirror of the remote authentication state.
//!
//! Keeps the last-known [`Identity`] in a `watch` channel fed by the
//! provider's session-change events. Every event triggers a fresh record
//! lookup; identity details carried by events themselves are never trusted.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use turnstile_core::{Identity, Session};
use turnstile_provider::{IdentityProvider, SessionChange};
use uuid::Uuid;

/// Mirrors the remote session into local process state.
///
/// Construction and every session-change event resolve the identity record
/// by id. Any failure along the way -- provider unreachable, record missing,
/// malformed response -- resolves to signed-out rather than an error, so
/// consumers always see a decisive authenticated/unauthenticated state.
pub struct SessionSynchronizer {
    identity: watch::Receiver<Option<Identity>>,
    task: JoinHandle<()>,
}

impl SessionSynchronizer {
    /// Bootstraps from the provider's current session, then follows its
    /// session-change events on a background task.
    pub async fn connect(provider: Arc<dyn IdentityProvider>) -> Self {
        // Subscribe before the bootstrap read so a change landing in
        // between is buffered, not lost.
        let events = provider.subscribe();

        let initial = match provider.current_session().await {
            Ok(Some(session)) => resolve(provider.as_ref(), session).await,
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "session bootstrap failed; starting signed out");
                None
            }
        };

        match &initial {
            Some(identity) => {
                tracing::info!(user_id = %identity.id, role = ?identity.role, "session restored")
            }
            None => tracing::info!("no existing session"),
        }

        let (tx, rx) = watch::channel(initial);
        let task = tokio::spawn(follow_events(provider, events, tx));

        Self { identity: rx, task }
    }

    /// Last-known identity. `None` means unauthenticated.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// New subscription to identity changes. Dropping the watch is the
    /// unsubscribe.
    pub fn watch(&self) -> IdentityWatch {
        IdentityWatch {
            rx: self.identity.clone(),
        }
    }

    /// Stops following remote events. Subscribers observe the shutdown as
    /// signed-out.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscription to identity changes.
#[derive(Debug, Clone)]
pub struct IdentityWatch {
    rx: watch::Receiver<Option<Identity>>,
}

impl IdentityWatch {
    /// Last-known identity without waiting.
    pub fn current(&self) -> Option<Identity> {
        self.rx.borrow().clone()
    }

    /// Waits for the next identity change and returns the new value.
    ///
    /// Once the synchronizer has shut down this returns `None` immediately;
    /// consumers treat shutdown as signed-out.
    pub async fn changed(&mut self) -> Option<Identity> {
        match self.rx.changed().await {
            Ok(()) => self.rx.borrow_and_update().clone(),
            Err(_) => None,
        }
    }

    /// Resolves once `user_id` stops being the current identity: sign-out,
    /// replacement by another identity, or synchronizer shutdown.
    pub async fn invalidated(&mut self, user_id: Uuid) {
        loop {
            match self.rx.borrow_and_update().as_ref() {
                Some(identity) if identity.id == user_id => {}
                _ => return,
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Resolves the directory record behind a session. Lookup failures clear the
/// identity rather than leaving stale data.
async fn resolve(provider: &dyn IdentityProvider, session: Session) -> Option<Identity> {
    match provider.lookup_identity_record(session.user_id).await {
        Ok(Some(identity)) => Some(identity),
        Ok(None) => {
            tracing::warn!(user_id = %session.user_id, "session has no directory record");
            None
        }
        Err(e) => {
            tracing::warn!(user_id = %session.user_id, error = %e, "identity resolution failed");
            None
        }
    }
}

/// Consumes session-change events and publishes resolved identities.
///
/// Queued events are drained to the newest before resolving, so only the
/// latest change is ever looked up -- an older in-flight resolution can
/// never overwrite a newer one.
async fn follow_events(
    provider: Arc<dyn IdentityProvider>,
    mut events: broadcast::Receiver<SessionChange>,
    tx: watch::Sender<Option<Identity>>,
) {
    loop {
        let mut change = match events.recv().await {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "session event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        loop {
            match events.try_recv() {
                Ok(newer) => change = newer,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        let identity = match change {
            SessionChange::SignedIn(session) => resolve(provider.as_ref(), session).await,
            SessionChange::SignedOut => None,
        };

        match &identity {
            Some(identity) => tracing::info!(user_id = %identity.id, "identity changed"),
            None => tracing::info!("signed out"),
        }

        if tx.send(identity).is_err() {
            break;
        }
    }
    tracing::debug!("session follower stopped");
}
