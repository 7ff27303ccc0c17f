//! In-process identity provider for tests and the demo binary.

use crate::{IdentityProvider, SessionChange};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};
use turnstile_core::error::TurnstileResult;
use turnstile_core::{Identity, Session};
use uuid::Uuid;

/// Buffered session-change events per subscriber.
const EVENT_CAPACITY: usize = 16;

/// Identity provider backed by in-memory state.
///
/// `sign_in` / `sign_out` drive the same event stream a remote provider
/// would, so consumers cannot tell the difference.
pub struct LocalIdentityProvider {
    session: Mutex<Option<Session>>,
    records: Mutex<HashMap<Uuid, Identity>>,
    events: broadcast::Sender<SessionChange>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: Mutex::new(None),
            records: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Seeds a directory record at construction time.
    pub fn with_record(mut self, identity: Identity) -> Self {
        self.records.get_mut().insert(identity.id, identity);
        self
    }

    pub async fn insert_record(&self, identity: Identity) {
        self.records.lock().await.insert(identity.id, identity);
    }

    /// Opens a session for `user_id` and notifies subscribers. A session may
    /// exist without a directory record; consumers treat that as signed out.
    pub async fn sign_in(&self, user_id: Uuid) {
        let session = Session { user_id };
        *self.session.lock().await = Some(session);
        let _ = self.events.send(SessionChange::SignedIn(session));
        tracing::debug!(%user_id, "local session opened");
    }
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn current_session(&self) -> TurnstileResult<Option<Session>> {
        Ok(*self.session.lock().await)
    }

    async fn lookup_identity_record(&self, user_id: Uuid) -> TurnstileResult<Option<Identity>> {
        Ok(self.records.lock().await.get(&user_id).cloned())
    }

    async fn sign_out(&self) -> TurnstileResult<()> {
        let previous = self.session.lock().await.take();
        if previous.is_some() {
            let _ = self.events.send(SessionChange::SignedOut);
            tracing::debug!("local session closed");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }
}
