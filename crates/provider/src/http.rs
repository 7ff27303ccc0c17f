//! HTTP client for a remote identity/session service.

use crate::{IdentityProvider, SessionChange};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use turnstile_core::error::{TurnstileError, TurnstileResult};
use turnstile_core::{Identity, Session};
use url::Url;
use uuid::Uuid;

/// How often the watcher re-reads the remote session.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Buffered session-change events per subscriber.
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Deserialize)]
struct SessionBody {
    user_id: Uuid,
}

/// Talks to an identity service over REST.
///
/// Expected surface: `GET session`, `GET users/{id}`, `POST auth/logout`,
/// `GET health`. Session changes are observed by polling and fanned out as
/// [`SessionChange`] events.
///
/// ```ignore
/// let provider = HttpIdentityProvider::connect("https://idp.campus.edu/api/").await?;
/// ```
#[derive(Debug)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: Url,
    shared: Arc<Shared>,
    watcher: JoinHandle<()>,
}

#[derive(Debug)]
struct Shared {
    last: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionChange>,
}

impl Shared {
    /// Records the freshly observed session and emits an event when it
    /// differs from the last observation.
    async fn publish(&self, session: Option<Session>) {
        let mut last = self.last.lock().await;
        if *last == session {
            return;
        }
        *last = session;
        let change = match session {
            Some(session) => SessionChange::SignedIn(session),
            None => SessionChange::SignedOut,
        };
        let _ = self.events.send(change);
    }
}

impl HttpIdentityProvider {
    pub async fn connect(base_url: &str) -> TurnstileResult<Self> {
        if base_url.is_empty() {
            return Err(TurnstileError::InvalidInput(
                "identity service URL must not be empty".into(),
            ));
        }

        let mut base = Url::parse(base_url)
            .map_err(|e| TurnstileError::InvalidInput(format!("invalid URL {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let client = reqwest::Client::new();

        // Reachability is advisory only: an unreachable service resolves as
        // signed out, it never prevents startup.
        match client.get(join(&base, "health")?).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(base_url = %base, "connected to identity service");
            }
            Ok(response) => {
                tracing::warn!(base_url = %base, status = %response.status(), "identity service unhealthy");
            }
            Err(e) => {
                tracing::warn!(base_url = %base, error = %e, "identity service unreachable");
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            last: Mutex::new(None),
            events,
        });

        let watcher = tokio::spawn(watch_sessions(
            client.clone(),
            join(&base, "session")?,
            Arc::clone(&shared),
        ));

        Ok(Self {
            client,
            base_url: base,
            shared,
            watcher,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for HttpIdentityProvider {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn current_session(&self) -> TurnstileResult<Option<Session>> {
        fetch_session(&self.client, join(&self.base_url, "session")?).await
    }

    async fn lookup_identity_record(&self, user_id: Uuid) -> TurnstileResult<Option<Identity>> {
        let url = join(&self.base_url, &format!("users/{user_id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TurnstileError::Provider(format!("record lookup failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let identity: Identity = response.json().await.map_err(|e| {
                    TurnstileError::Provider(format!("malformed identity record: {e}"))
                })?;
                Ok(Some(identity))
            }
            status => Err(TurnstileError::Provider(format!(
                "record lookup returned {status}"
            ))),
        }
    }

    async fn sign_out(&self) -> TurnstileResult<()> {
        let url = join(&self.base_url, "auth/logout")?;
        self.client
            .post(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| TurnstileError::Provider(format!("sign-out failed: {e}")))?;

        // Report the change now rather than waiting for the next poll.
        self.shared.publish(None).await;
        tracing::info!("signed out of identity service");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.shared.events.subscribe()
    }
}

fn join(base: &Url, path: &str) -> TurnstileResult<Url> {
    base.join(path)
        .map_err(|e| TurnstileError::Provider(format!("bad endpoint {path}: {e}")))
}

async fn fetch_session(client: &reqwest::Client, url: Url) -> TurnstileResult<Option<Session>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TurnstileError::Provider(format!("session fetch failed: {e}")))?;

    match response.status() {
        StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
        status if status.is_success() => {
            let body: SessionBody = response
                .json()
                .await
                .map_err(|e| TurnstileError::Provider(format!("malformed session body: {e}")))?;
            Ok(Some(Session {
                user_id: body.user_id,
            }))
        }
        status => Err(TurnstileError::Provider(format!(
            "session fetch returned {status}"
        ))),
    }
}

/// Polls the session endpoint and publishes observed changes. Transient
/// fetch failures keep the last known state.
async fn watch_sessions(client: reqwest::Client, url: Url, shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        match fetch_session(&client, url.clone()).await {
            Ok(session) => shared.publish(session).await,
            Err(e) => tracing::debug!(error = %e, "session poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_url() {
        let err = HttpIdentityProvider::connect("").await.unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rejects_unparsable_url() {
        let err = HttpIdentityProvider::connect("not a url").await.unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidInput(_)));
    }

    #[test]
    fn join_keeps_base_path() {
        let base = Url::parse("https://idp.campus.edu/api/").unwrap();
        let url = join(&base, "users/42").unwrap();
        assert_eq!(url.as_str(), "https://idp.campus.edu/api/users/42");
    }
}
