//! External collaborators for Turnstile -- identity sessions, verification
//! engines, access ledgers, and the room directory.

pub mod engine;
pub mod http;
pub mod ledger;
pub mod local;
pub mod rooms;

use async_trait::async_trait;
use tokio::sync::broadcast;
use turnstile_core::error::TurnstileResult;
use turnstile_core::{Identity, Session};
use uuid::Uuid;

pub use engine::{EmbeddingVerifier, EngineError, Verdict, VerificationEngine};
pub use http::HttpIdentityProvider;
pub use ledger::{AccessLedger, MemoryLedger, NdjsonLedger};
pub use local::LocalIdentityProvider;
pub use rooms::RoomDirectory;

/// Pushed by a provider whenever the remote session changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(Session),
    SignedOut,
}

/// Abstraction over the remote identity/session service.
///
/// Identity details are never trusted from events; consumers re-resolve the
/// record through `lookup_identity_record` on every change.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The live session, if any.
    async fn current_session(&self) -> TurnstileResult<Option<Session>>;

    /// Directory record behind a session. `None` when no record exists.
    async fn lookup_identity_record(&self, user_id: Uuid) -> TurnstileResult<Option<Identity>>;

    /// Ends the live session. Observers learn of it through `subscribe`.
    async fn sign_out(&self) -> TurnstileResult<()>;

    /// Session-change events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}
