//! Access session controller.
//!
//! Orchestrates one access attempt end to end: consent gate -> capture
//! device -> verification engine -> decision -> ledger append. The attempt
//! lifecycle is `Idle -> ConsentPending -> DeviceAcquiring -> Streaming ->
//! Verifying -> Decided -> Idle`, with `Cancelled` reachable from any
//! non-terminal phase and `Errored` from acquisition and verification.
//!
//! A command-driven driver task owns every resource (device manager, consent
//! gate, identity watch), so there is exactly one logical session per
//! controller and no shared-state locking. Two guarantees hold on every
//! path: the device is released before the terminal report goes out, and a
//! cancelled attempt never yields a decision -- even when the engine answers
//! `granted` after the cancel landed.

use crate::consent::ConsentGate;
use crate::device::{CaptureBackend, CaptureDeviceManager, DeviceHandle};
use crate::sync::IdentityWatch;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use turnstile_core::error::{DeviceError, TurnstileError, TurnstileResult};
use turnstile_core::{
    AccessPolicy, CancelCause, CaptureConstraints, ConsentRecord, Decision, Identity, Phase,
    ReasonCode, RoomId,
};
use turnstile_provider::engine::{EngineError, Verdict, VerificationEngine};
use turnstile_provider::{AccessLedger, RoomDirectory};
use uuid::Uuid;

/// Queued UI commands. Small: callers await each reply.
const COMMAND_CAPACITY: usize = 16;

/// Buffered lifecycle events per subscriber.
const EVENT_CAPACITY: usize = 32;

/// Broadcast to observers as an attempt progresses.
#[derive(Debug, Clone)]
pub enum AccessEvent {
    /// The controller moved to a new phase.
    Phase(Phase),
    /// Terminal: the attempt was evaluated into a decision. `recorded` is
    /// false when the ledger append failed; the decision itself still
    /// stands.
    Decided { decision: Decision, recorded: bool },
    /// Terminal: the attempt ended without a decision.
    Cancelled { cause: CancelCause },
    /// Terminal: the capture device failed; no decision was recorded.
    Errored { error: DeviceError },
}

type Reply = oneshot::Sender<TurnstileResult<()>>;

enum Command {
    Start { room_id: RoomId, reply: Reply },
    SubmitConsent { granted: bool, reply: Reply },
    TriggerCapture { reply: Reply },
    Cancel { reply: Reply },
}

/// Handle to a running access session controller.
///
/// Commands are serialized through the driver task; replies report
/// acceptance (caller-misuse errors come back synchronously), while attempt
/// outcomes arrive on the [`AccessEvent`] stream. Dropping the handle stops
/// the driver after it has released any held device.
pub struct AccessController {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
    events: broadcast::Sender<AccessEvent>,
    driver: JoinHandle<()>,
}

impl AccessController {
    /// Starts the driver task around its collaborators.
    pub fn spawn<B: CaptureBackend>(
        identity: IdentityWatch,
        device: CaptureDeviceManager<B>,
        engine: Arc<dyn VerificationEngine>,
        ledger: Arc<dyn AccessLedger>,
        rooms: Arc<RoomDirectory>,
        policy: AccessPolicy,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (phase_tx, phase) = watch::channel(Phase::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let driver = Driver {
            commands: command_rx,
            identity,
            consent: ConsentGate::new(),
            device,
            engine,
            ledger,
            rooms,
            policy,
            constraints: CaptureConstraints::default(),
            phase: phase_tx,
            events: events.clone(),
        };
        let driver = tokio::spawn(driver.run());

        Self {
            commands,
            phase,
            events,
            driver,
        }
    }

    /// Begins an attempt for `room_id`. Valid only from `Idle` with an
    /// authenticated identity and a known room; moves to `ConsentPending`.
    pub async fn start(&self, room_id: RoomId) -> TurnstileResult<()> {
        self.request(|reply| Command::Start { room_id, reply }).await
    }

    /// Answers the pending consent prompt.
    pub async fn submit_consent(&self, granted: bool) -> TurnstileResult<()> {
        self.request(|reply| Command::SubmitConsent { granted, reply })
            .await
    }

    /// Captures one sample and verifies it. Valid only while the attempt is
    /// streaming; rejected with `Device(NotStreaming)` otherwise. The
    /// outcome arrives as an [`AccessEvent::Decided`].
    pub async fn trigger_capture(&self) -> TurnstileResult<()> {
        self.request(|reply| Command::TriggerCapture { reply }).await
    }

    /// Cancels the attempt in progress. Honored at the next suspension
    /// point; an in-flight verification is still awaited, then discarded.
    pub async fn cancel(&self) -> TurnstileResult<()> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// New subscription to lifecycle events. Dropping the receiver is the
    /// unsubscribe.
    pub fn events(&self) -> broadcast::Receiver<AccessEvent> {
        self.events.subscribe()
    }

    /// Stops the controller and waits for the driver to wind down, device
    /// released.
    pub async fn shutdown(self) {
        let Self {
            commands, driver, ..
        } = self;
        drop(commands);
        let _ = driver.await;
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> Command,
    ) -> TurnstileResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TurnstileError::Internal("access controller stopped".into()))?;
        response
            .await
            .map_err(|_| TurnstileError::Internal("access controller stopped".into()))?
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Why a wait was cut short.
enum Interrupt {
    /// The attempt is to end as `Cancelled` with this cause.
    Cancel(CancelCause),
    /// The controller handle is gone; wind down silently.
    Closed,
}

enum ConsentWait {
    Answered(ConsentRecord),
    Interrupted(Interrupt),
}

enum StreamWait {
    Capture,
    Interrupted(Interrupt),
}

struct Driver<B: CaptureBackend> {
    commands: mpsc::Receiver<Command>,
    identity: IdentityWatch,
    consent: ConsentGate,
    device: CaptureDeviceManager<B>,
    engine: Arc<dyn VerificationEngine>,
    ledger: Arc<dyn AccessLedger>,
    rooms: Arc<RoomDirectory>,
    policy: AccessPolicy,
    constraints: CaptureConstraints,
    phase: watch::Sender<Phase>,
    events: broadcast::Sender<AccessEvent>,
}

impl<B: CaptureBackend> Driver<B> {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Start { room_id, reply } => {
                    let Some(identity) = self.identity.current() else {
                        let _ = reply.send(Err(TurnstileError::Unauthenticated));
                        continue;
                    };
                    if !self.rooms.contains(&room_id) {
                        let _ = reply.send(Err(TurnstileError::UnknownRoom(room_id)));
                        continue;
                    }
                    let _ = reply.send(Ok(()));
                    self.drive_attempt(identity, room_id).await;
                }
                Command::SubmitConsent { reply, .. }
                | Command::TriggerCapture { reply }
                | Command::Cancel { reply } => {
                    let _ = reply.send(Err(TurnstileError::NoActiveSession));
                }
            }
        }
        tracing::debug!("access controller driver stopped");
    }

    /// One attempt, initiation to terminal state. Every return path funnels
    /// through a `finish_*` helper, which releases the device before the
    /// terminal report.
    async fn drive_attempt(&mut self, identity: Identity, room_id: RoomId) {
        let user_id = identity.id;
        tracing::info!(%user_id, room = %room_id, "access attempt started");

        // Consent gates device acquisition; one prompt per attempt, never
        // carried over.
        self.set_phase(Phase::ConsentPending);
        let consent = match self.wait_for_consent(user_id).await {
            ConsentWait::Answered(record) => record,
            ConsentWait::Interrupted(interrupt) => {
                return self.finish_interrupted(None, interrupt).await;
            }
        };
        if !consent.granted {
            tracing::info!(%user_id, "consent declined");
            return self
                .finish_interrupted(None, Interrupt::Cancel(CancelCause::ConsentDeclined))
                .await;
        }

        self.set_phase(Phase::DeviceAcquiring);
        let (acquired, interrupt) = pump_until(
            self.device.acquire(&self.constraints),
            &mut self.commands,
            &mut self.identity,
            &mut self.consent,
            user_id,
        )
        .await;
        let handle = match (acquired, interrupt) {
            (Ok(handle), Some(interrupt)) => {
                return self.finish_interrupted(Some(handle), interrupt).await;
            }
            (Err(_), Some(interrupt)) => {
                return self.finish_interrupted(None, interrupt).await;
            }
            (Err(error), None) => return self.finish_errored(None, error).await,
            (Ok(handle), None) => handle,
        };

        self.set_phase(Phase::Streaming);
        match self.wait_for_trigger(user_id).await {
            StreamWait::Capture => {}
            StreamWait::Interrupted(interrupt) => {
                return self.finish_interrupted(Some(handle), interrupt).await;
            }
        }

        // Sampling and verification share the Verifying phase; the device
        // stays held until the terminal report.
        self.set_phase(Phase::Verifying);
        let (sampled, interrupt) = pump_until(
            self.device.sample(handle),
            &mut self.commands,
            &mut self.identity,
            &mut self.consent,
            user_id,
        )
        .await;
        if let Some(interrupt) = interrupt {
            return self.finish_interrupted(Some(handle), interrupt).await;
        }
        let sample = match sampled {
            Ok(sample) => sample,
            Err(error) => return self.finish_errored(Some(handle), error).await,
        };

        let (verdict, interrupt) = pump_until(
            tokio::time::timeout(
                self.policy.verify_timeout,
                self.engine.verify(user_id, sample),
            ),
            &mut self.commands,
            &mut self.identity,
            &mut self.consent,
            user_id,
        )
        .await;
        if let Some(interrupt) = interrupt {
            // The engine answer is discarded: a cancelled attempt never
            // yields a decision, granted or not.
            return self.finish_interrupted(Some(handle), interrupt).await;
        }

        let decision = self.evaluate(verdict, user_id, &room_id);
        self.finish_decided(handle, decision).await;
    }

    /// Awaits the consent prompt. Unlike the later stages, cancellation and
    /// identity invalidation return immediately: nothing is held yet.
    async fn wait_for_consent(&mut self, user_id: Uuid) -> ConsentWait {
        let ticket = self.consent.open();
        let answer = ticket.outcome();
        tokio::pin!(answer);
        loop {
            tokio::select! {
                record = &mut answer => return ConsentWait::Answered(record),
                command = self.commands.recv() => match command {
                    Some(Command::SubmitConsent { granted, reply }) => {
                        let _ = reply.send(self.consent.resolve(granted));
                    }
                    Some(Command::Cancel { reply }) => {
                        let _ = reply.send(Ok(()));
                        return ConsentWait::Interrupted(Interrupt::Cancel(
                            CancelCause::UserRequest,
                        ));
                    }
                    Some(Command::Start { reply, .. }) => {
                        let _ = reply.send(Err(TurnstileError::SessionAlreadyActive));
                    }
                    Some(Command::TriggerCapture { reply }) => {
                        let _ = reply.send(Err(DeviceError::NotStreaming.into()));
                    }
                    None => return ConsentWait::Interrupted(Interrupt::Closed),
                },
                _ = self.identity.invalidated(user_id) => {
                    return ConsentWait::Interrupted(Interrupt::Cancel(
                        CancelCause::IdentityInvalidated,
                    ));
                }
            }
        }
    }

    /// Holds in `Streaming` until the caller triggers a capture or the
    /// attempt is cut short.
    async fn wait_for_trigger(&mut self, user_id: Uuid) -> StreamWait {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::TriggerCapture { reply }) => {
                        let _ = reply.send(Ok(()));
                        return StreamWait::Capture;
                    }
                    Some(Command::Cancel { reply }) => {
                        let _ = reply.send(Ok(()));
                        return StreamWait::Interrupted(Interrupt::Cancel(
                            CancelCause::UserRequest,
                        ));
                    }
                    Some(Command::Start { reply, .. }) => {
                        let _ = reply.send(Err(TurnstileError::SessionAlreadyActive));
                    }
                    Some(Command::SubmitConsent { granted, reply }) => {
                        let _ = reply.send(self.consent.resolve(granted));
                    }
                    None => return StreamWait::Interrupted(Interrupt::Closed),
                },
                _ = self.identity.invalidated(user_id) => {
                    return StreamWait::Interrupted(Interrupt::Cancel(
                        CancelCause::IdentityInvalidated,
                    ));
                }
            }
        }
    }

    /// Turns the (possibly expired) engine answer into a decision.
    /// Fail-closed: any ambiguity denies, never grants.
    fn evaluate(
        &self,
        verdict: Result<Result<Verdict, EngineError>, Elapsed>,
        user_id: Uuid,
        room_id: &RoomId,
    ) -> Decision {
        match verdict {
            Ok(Ok(Verdict::Match { confidence })) => {
                if confidence >= self.policy.acceptance_threshold {
                    Decision::granted(user_id, room_id.clone(), confidence)
                } else {
                    tracing::info!(
                        confidence,
                        threshold = self.policy.acceptance_threshold,
                        "confidence below acceptance threshold"
                    );
                    Decision::denied(user_id, room_id.clone(), ReasonCode::LowConfidence)
                }
            }
            Ok(Ok(Verdict::NoMatch { reason })) => {
                Decision::denied(user_id, room_id.clone(), reason)
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "verification engine failed");
                Decision::denied(user_id, room_id.clone(), ReasonCode::VerificationTimeout)
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.policy.verify_timeout,
                    "verification deadline expired"
                );
                Decision::denied(user_id, room_id.clone(), ReasonCode::VerificationTimeout)
            }
        }
    }

    /// Terminal: decision evaluated. Release precedes the report; the append
    /// is attempted afterwards and its failure never masks the decision.
    async fn finish_decided(&mut self, handle: DeviceHandle, decision: Decision) {
        self.device.release(handle).await;

        let recorded = match self.ledger.append(&decision).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "ledger append failed; decision reported unrecorded");
                false
            }
        };
        tracing::info!(
            user_id = %decision.user_id,
            room = %decision.room_id,
            outcome = ?decision.outcome,
            confidence = ?decision.confidence,
            reason = ?decision.reason_code,
            recorded,
            "access decision"
        );

        self.set_phase(Phase::Decided);
        let _ = self.events.send(AccessEvent::Decided { decision, recorded });
        self.set_phase(Phase::Idle);
    }

    /// Terminal: no decision. Covers user cancel, consent decline, identity
    /// invalidation, and handle teardown.
    async fn finish_interrupted(&mut self, handle: Option<DeviceHandle>, interrupt: Interrupt) {
        if let Some(handle) = handle {
            self.device.release(handle).await;
        }
        match interrupt {
            Interrupt::Cancel(cause) => {
                tracing::info!(?cause, "access attempt cancelled");
                self.set_phase(Phase::Cancelled);
                let _ = self.events.send(AccessEvent::Cancelled { cause });
                self.set_phase(Phase::Idle);
            }
            Interrupt::Closed => {
                tracing::debug!("controller handle dropped mid-attempt; device released");
                self.set_phase(Phase::Idle);
            }
        }
    }

    /// Terminal: device failure, surfaced verbatim. No decision -- a device
    /// error is not an access outcome.
    async fn finish_errored(&mut self, handle: Option<DeviceHandle>, error: DeviceError) {
        if let Some(handle) = handle {
            self.device.release(handle).await;
        }
        tracing::warn!(%error, "access attempt failed");
        self.set_phase(Phase::Errored);
        let _ = self.events.send(AccessEvent::Errored { error });
        self.set_phase(Phase::Idle);
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
        let _ = self.events.send(AccessEvent::Phase(phase));
        tracing::debug!(?phase, "controller phase");
    }
}

/// Drives `operation` to completion while answering queued commands.
///
/// Cancellation (explicit or via identity invalidation) does not abandon the
/// operation: it is noted and returned alongside the output, so the caller
/// can release cleanly. Dropping a half-done acquisition or verification
/// here would race a freed device.
async fn pump_until<F: Future>(
    operation: F,
    commands: &mut mpsc::Receiver<Command>,
    identity: &mut IdentityWatch,
    consent: &mut ConsentGate,
    user_id: Uuid,
) -> (F::Output, Option<Interrupt>) {
    tokio::pin!(operation);
    let mut interrupt: Option<Interrupt> = None;
    loop {
        tokio::select! {
            output = &mut operation => return (output, interrupt),
            command = commands.recv(), if !matches!(interrupt, Some(Interrupt::Closed)) => {
                match command {
                    Some(Command::Cancel { reply }) => {
                        let _ = reply.send(Ok(()));
                        interrupt.get_or_insert(Interrupt::Cancel(CancelCause::UserRequest));
                    }
                    Some(Command::Start { reply, .. }) => {
                        let _ = reply.send(Err(TurnstileError::SessionAlreadyActive));
                    }
                    Some(Command::SubmitConsent { granted, reply }) => {
                        let _ = reply.send(consent.resolve(granted));
                    }
                    Some(Command::TriggerCapture { reply }) => {
                        let _ = reply.send(Err(DeviceError::NotStreaming.into()));
                    }
                    None => {
                        interrupt = Some(Interrupt::Closed);
                    }
                }
            }
            _ = identity.invalidated(user_id), if interrupt.is_none() => {
                interrupt = Some(Interrupt::Cancel(CancelCause::IdentityInvalidated));
            }
        }
    }
}
