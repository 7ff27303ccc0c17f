//! CLI for the Turnstile laboratory access client.
//!
//! Pipeline per attempt: sign in -> sync identity -> consent -> capture -> verify -> ledger.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::{Duration, Instant};
use turnstile_core::error::{TurnstileError, TurnstileResult};
use turnstile_core::{
    AccessPolicy, CancelCause, Decision, DecisionFilter, Identity, Outcome, Phase, Role, RoomId,
};
use turnstile_provider::{
    AccessLedger, EmbeddingVerifier, LocalIdentityProvider, MemoryLedger, NdjsonLedger,
    RoomDirectory,
};
use turnstile_session::{
    AccessController, AccessEvent, CaptureDeviceManager, SessionSynchronizer, SimulatedBackend,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about = "Laboratory access control client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one access attempt against the simulated capture device.
    Check {
        /// Target room, e.g. "room-a".
        #[arg(short, long)]
        room: String,

        /// Answer the consent prompt with a decline.
        #[arg(long, default_value_t = false)]
        decline_consent: bool,

        /// Acceptance threshold override (0-100).
        #[arg(long)]
        threshold: Option<u8>,

        /// Persistent ledger: "ndjson:/path/to/file". Defaults to in-memory.
        #[arg(long, env = "TURNSTILE_LEDGER")]
        ledger: Option<String>,

        /// Present a live frame that does not match the enrolled template.
        #[arg(long, default_value_t = false)]
        mismatch: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded access decisions.
    History {
        /// Ledger to read: "ndjson:/path/to/file".
        #[arg(long, env = "TURNSTILE_LEDGER")]
        ledger: Option<String>,

        #[arg(long)]
        room: Option<String>,

        #[arg(long, value_enum)]
        outcome: Option<OutcomeArg>,

        /// Only decisions at or after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Print the room directory.
    Rooms,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Granted,
    Denied,
}

impl From<OutcomeArg> for Outcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Granted => Outcome::Granted,
            OutcomeArg::Denied => Outcome::Denied,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            room,
            decline_consent,
            threshold,
            ledger,
            mismatch,
            json,
        } => check(room, decline_consent, threshold, ledger, mismatch, json).await,
        Commands::History {
            ledger,
            room,
            outcome,
            since,
        } => history(ledger, room, outcome, since).await,
        Commands::Rooms => {
            print!("{}", render_rooms(&RoomDirectory::default()));
            Ok(())
        }
    }
}

async fn check(
    room: String,
    decline_consent: bool,
    threshold: Option<u8>,
    ledger_spec: Option<String>,
    mismatch: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let t0 = Instant::now();
    let room_id = RoomId::new(room);

    // 1. Sign in the demo identity and synchronize the session.
    let identity = Identity {
        id: Uuid::new_v4(),
        email: "demo.student@campus.edu".into(),
        role: Role::Student,
    };
    let provider = Arc::new(LocalIdentityProvider::new().with_record(identity.clone()));
    provider.sign_in(identity.id).await;
    let sync = SessionSynchronizer::connect(provider.clone()).await;
    tracing::info!(user_id = %identity.id, email = %identity.email, "signed in demo identity");

    // 2. Enroll the verification template. With --mismatch the enrolled
    //    frame differs from the one the device will deliver.
    let live_frame: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let enrolled_frame: Vec<u8> = if mismatch {
        (0..4096u32).map(|i| (i.wrapping_mul(31) % 197) as u8).collect()
    } else {
        live_frame.clone()
    };
    let engine = Arc::new(EmbeddingVerifier::new());
    engine.enroll_from_frame(identity.id, &enrolled_frame).await;

    // 3. Wire the controller to the simulated capture backend.
    let ledger = open_ledger(ledger_spec)?;
    let policy = match threshold {
        Some(threshold) => AccessPolicy::default().with_threshold(threshold),
        None => AccessPolicy::default(),
    };
    let controller = AccessController::spawn(
        sync.watch(),
        CaptureDeviceManager::new(SimulatedBackend::with_frame(live_frame)),
        engine,
        ledger,
        Arc::new(RoomDirectory::default()),
        policy,
    );
    let mut events = controller.events();

    // 4. Drive the attempt the way the kiosk UI would: start, answer the
    //    consent prompt, trigger a capture once the preview is streaming.
    controller.start(room_id).await?;
    controller.submit_consent(!decline_consent).await?;

    let mut failure: Option<TurnstileError> = None;
    loop {
        match events.recv().await? {
            AccessEvent::Phase(phase) => {
                tracing::debug!(?phase, "phase change");
                if phase == Phase::Streaming {
                    controller.trigger_capture().await?;
                }
            }
            AccessEvent::Decided { decision, recorded } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&decision)?);
                } else {
                    print!("{}", render_decision(&decision, recorded, t0.elapsed()));
                }
                break;
            }
            AccessEvent::Cancelled { cause } => {
                println!("Access attempt cancelled: {}", cancel_label(cause));
                break;
            }
            AccessEvent::Errored { error } => {
                failure = Some(error.into());
                break;
            }
        }
    }

    // 5. Wind down: the controller releases any held device before exiting.
    controller.shutdown().await;
    sync.shutdown();

    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn history(
    ledger_spec: Option<String>,
    room: Option<String>,
    outcome: Option<OutcomeArg>,
    since: Option<DateTime<Utc>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(spec) = ledger_spec else {
        return Err(TurnstileError::InvalidInput(
            "history needs a persistent ledger: pass --ledger ndjson:/path/to/file".into(),
        )
        .into());
    };
    let ledger = open_ledger(Some(spec))?;

    let filter = DecisionFilter {
        room: room.map(RoomId::new),
        outcome: outcome.map(Outcome::from),
        since,
        until: None,
    };
    let rows = ledger.list(&filter).await?;
    print!("{}", render_history(&rows));
    Ok(())
}

/// "ndjson:/path" opens the file-backed ledger; `None` keeps decisions in
/// memory for the lifetime of the process.
fn open_ledger(spec: Option<String>) -> TurnstileResult<Arc<dyn AccessLedger>> {
    match spec {
        None => Ok(Arc::new(MemoryLedger::new())),
        Some(spec) => match spec.strip_prefix("ndjson:") {
            Some(path) => Ok(Arc::new(NdjsonLedger::open(path)?)),
            None => Err(TurnstileError::InvalidInput(format!(
                "unknown ledger spec: {spec}. Use 'ndjson:/path/to/file'"
            ))),
        },
    }
}

fn cancel_label(cause: CancelCause) -> &'static str {
    match cause {
        CancelCause::UserRequest => "cancelled by user",
        CancelCause::ConsentDeclined => "consent declined",
        CancelCause::IdentityInvalidated => "signed out during the attempt",
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Granted => "GRANTED",
        Outcome::Denied => "DENIED",
    }
}

fn render_decision(decision: &Decision, recorded: bool, elapsed: Duration) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
    out.push_str("║                   TURNSTILE ACCESS DECISION                  ║\n");
    out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
    out.push_str(&format!(
        "║  Outcome:            {:>38} ║\n",
        outcome_label(decision.outcome)
    ));
    out.push_str(&format!(
        "║  Room:               {:>38} ║\n",
        decision.room_id.as_str()
    ));
    out.push_str(&format!(
        "║  User:               {:>38} ║\n",
        decision.user_id.to_string()
    ));
    if let Some(confidence) = decision.confidence {
        out.push_str(&format!(
            "║  Confidence:         {:>38} ║\n",
            format!("{confidence}%")
        ));
    }
    if let Some(reason) = decision.reason_code {
        out.push_str(&format!(
            "║  Reason:             {:>38} ║\n",
            reason.as_str()
        ));
    }
    out.push_str(&format!(
        "║  Recorded:           {:>38} ║\n",
        if recorded { "yes" } else { "no (ledger failed)" }
    ));
    out.push_str(&format!("║  Elapsed:            {:>35?} ║\n", elapsed));
    out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
    out
}

fn render_history(rows: &[Decision]) -> String {
    let granted = rows.iter().filter(|row| row.is_granted()).count();

    let mut out = String::new();
    out.push('\n');
    out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
    out.push_str("║                   TURNSTILE ACCESS HISTORY                   ║\n");
    out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
    out.push_str(&format!("║  Entries:            {:>38} ║\n", rows.len()));
    out.push_str(&format!("║  Granted:            {:>38} ║\n", granted));
    out.push_str(&format!("║  Denied:             {:>38} ║\n", rows.len() - granted));

    if rows.is_empty() {
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        out.push_str("║  No matching decisions.                                      ║\n");
    } else {
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        for (i, row) in rows.iter().enumerate() {
            out.push_str(&format!(
                "║  {}. [{}] {} | {} | {}\n",
                i + 1,
                outcome_label(row.outcome),
                row.timestamp.format("%Y-%m-%d %H:%M:%S"),
                row.room_id,
                row.user_id,
            ));
            match (row.confidence, row.reason_code) {
                (Some(confidence), _) => {
                    out.push_str(&format!("║     confidence: {confidence}%\n"));
                }
                (None, Some(reason)) => {
                    out.push_str(&format!("║     reason: {reason}\n"));
                }
                (None, None) => {}
            }
        }
    }
    out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
    out
}

fn render_rooms(directory: &RoomDirectory) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "{:<10} {:<22} {:<22} {:>8}\n",
        "ID", "NAME", "LOCATION", "CAPACITY"
    ));
    for room in directory.list() {
        out.push_str(&format!(
            "{:<10} {:<22} {:<22} {:>8}\n",
            room.id.as_str(),
            room.name,
            room.location,
            room.capacity
        ));
    }
    out
}
