//! Live integration tests against a running identity service.
//!
//! Run: `TURNSTILE_IDP_URL=https://... cargo test -p turnstile-provider -- --ignored`

use turnstile_provider::{HttpIdentityProvider, IdentityProvider};

#[tokio::test]
#[ignore]
async fn session_lookup_smoke() {
    let base_url =
        std::env::var("TURNSTILE_IDP_URL").expect("Set TURNSTILE_IDP_URL to run live tests");

    let provider = HttpIdentityProvider::connect(&base_url)
        .await
        .expect("Failed to connect");

    let session = provider
        .current_session()
        .await
        .expect("Session fetch failed");
    eprintln!("[live] current session: {session:?}");

    if let Some(session) = session {
        let identity = provider
            .lookup_identity_record(session.user_id)
            .await
            .expect("Record lookup failed");
        assert!(
            identity.is_some(),
            "live session should have a directory record"
        );
        eprintln!("[live] resolved identity: {identity:?}");
    }
}

#[tokio::test]
#[ignore]
async fn sign_out_emits_event() {
    let base_url =
        std::env::var("TURNSTILE_IDP_URL").expect("Set TURNSTILE_IDP_URL to run live tests");

    let provider = HttpIdentityProvider::connect(&base_url)
        .await
        .expect("Failed to connect");

    if provider
        .current_session()
        .await
        .expect("Session fetch failed")
        .is_none()
    {
        eprintln!("[live] no session to sign out; skipping");
        return;
    }

    let mut events = provider.subscribe();
    provider.sign_out().await.expect("Sign-out failed");

    let change = events.recv().await.expect("Event stream closed");
    assert_eq!(change, turnstile_provider::SessionChange::SignedOut);
}
