//! Capture device lifecycle management.
//!
//! Owns the camera-like input device behind a [`CaptureBackend`] seam:
//! acquisition, frame sampling, teardown. Knows nothing about consent, auth,
//! or access semantics -- callers sequence those around it.
//!
//! Lifecycle: `Idle -> Acquiring -> Streaming -> (Sampling -> Streaming)* ->
//! Releasing -> Idle`, with `Failed` reachable from `Acquiring` and
//! `Streaming`. The manager never holds more than one active stream; a
//! second `acquire` implicitly releases the first.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use turnstile_core::error::DeviceError;
use turnstile_core::{CaptureConstraints, CaptureSample};

/// Hardware seam. Implementations open a stream for the requested geometry,
/// deliver raw frames from it, and tear it down.
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    /// Per-lease stream state, owned by the manager while active.
    type Stream: Send + 'static;

    async fn open(&self, constraints: &CaptureConstraints) -> Result<Self::Stream, DeviceError>;

    async fn next_frame(&self, stream: &mut Self::Stream) -> Result<Vec<u8>, DeviceError>;

    async fn close(&self, stream: Self::Stream);
}

/// Exclusive lease on the capture device for one access attempt.
///
/// The stream itself stays inside the manager; callers hold only this token
/// and hand it back for every operation. A stale token is rejected with
/// `NotStreaming`, never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(u64);

/// Observable lifecycle state of the managed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Acquiring,
    Streaming,
    Sampling,
    Releasing,
    Failed,
}

/// Drives one capture device through its lifecycle.
///
/// Exclusive ownership (`&mut self` throughout) keeps the state machine
/// race-free: there is no path to two concurrent acquisitions or to
/// sampling during teardown.
pub struct CaptureDeviceManager<B: CaptureBackend> {
    backend: B,
    active: Option<Active<B::Stream>>,
    state: DeviceState,
    lease_seq: u64,
}

struct Active<S> {
    handle: DeviceHandle,
    stream: S,
}

impl<B: CaptureBackend> CaptureDeviceManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            active: None,
            state: DeviceState::Idle,
            lease_seq: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The live lease, if any.
    pub fn active_handle(&self) -> Option<DeviceHandle> {
        self.active.as_ref().map(|a| a.handle)
    }

    /// Requests exclusive use of the capture device.
    ///
    /// Any lease still held is released first, so re-acquiring never
    /// double-acquires. On failure the manager parks in `Failed` until the
    /// next `acquire` or `release`.
    pub async fn acquire(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<DeviceHandle, DeviceError> {
        if let Some(active) = self.active.take() {
            tracing::debug!(lease = active.handle.0, "releasing held stream before re-acquire");
            self.state = DeviceState::Releasing;
            self.backend.close(active.stream).await;
        }

        self.state = DeviceState::Acquiring;
        match self.backend.open(constraints).await {
            Ok(stream) => {
                self.lease_seq += 1;
                let handle = DeviceHandle(self.lease_seq);
                self.active = Some(Active { handle, stream });
                self.state = DeviceState::Streaming;
                tracing::debug!(lease = handle.0, "capture stream acquired");
                Ok(handle)
            }
            Err(error) => {
                self.state = DeviceState::Failed;
                tracing::warn!(%error, "capture device acquisition failed");
                Err(error)
            }
        }
    }

    /// Captures exactly one sample from the active stream.
    ///
    /// A stale handle, or a manager that is not streaming, is rejected with
    /// `NotStreaming` and the current stream is left untouched. A backend
    /// frame failure tears the stream down and parks in `Failed`.
    pub async fn sample(&mut self, handle: DeviceHandle) -> Result<CaptureSample, DeviceError> {
        if self.state != DeviceState::Streaming {
            return Err(DeviceError::NotStreaming);
        }
        let Some(active) = self.active.as_mut().filter(|active| active.handle == handle) else {
            return Err(DeviceError::NotStreaming);
        };

        self.state = DeviceState::Sampling;
        match self.backend.next_frame(&mut active.stream).await {
            Ok(frame) => {
                self.state = DeviceState::Streaming;
                tracing::debug!(lease = handle.0, bytes = frame.len(), "sample captured");
                Ok(CaptureSample::new(frame))
            }
            Err(error) => {
                tracing::warn!(lease = handle.0, %error, "frame capture failed; closing stream");
                if let Some(active) = self.active.take() {
                    self.backend.close(active.stream).await;
                }
                self.state = DeviceState::Failed;
                Err(error)
            }
        }
    }

    /// Releases the lease. Idempotent and always safe: a stale or unknown
    /// handle is a no-op, except that it clears a parked `Failed` state.
    pub async fn release(&mut self, handle: DeviceHandle) {
        if let Some(active) = self.active.take_if(|active| active.handle == handle) {
            self.state = DeviceState::Releasing;
            self.backend.close(active.stream).await;
            self.state = DeviceState::Idle;
            tracing::debug!(lease = handle.0, "capture stream released");
        } else if self.state == DeviceState::Failed {
            self.state = DeviceState::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated backend
// ---------------------------------------------------------------------------

/// Synthetic frame served by [`SimulatedBackend::new`].
fn default_frame() -> Vec<u8> {
    (0..4096).map(|i| (i % 251) as u8).collect()
}

/// In-process capture hardware for tests and the demo binary.
///
/// Serves a fixed frame per sample, takes scripted failures for upcoming
/// opens and frame reads, and keeps open/close accounting so callers can
/// assert that no stream ever leaks. Clones share all state: keep one as a
/// probe after moving the backend into a manager.
#[derive(Clone)]
pub struct SimulatedBackend {
    shared: Arc<Shared>,
}

struct Shared {
    frame: Vec<u8>,
    open_plan: Mutex<VecDeque<DeviceError>>,
    frame_plan: Mutex<VecDeque<DeviceError>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::with_frame(default_frame())
    }

    /// Backend whose every sample yields `frame`.
    pub fn with_frame(frame: Vec<u8>) -> Self {
        Self {
            shared: Arc::new(Shared {
                frame,
                open_plan: Mutex::new(VecDeque::new()),
                frame_plan: Mutex::new(VecDeque::new()),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
        }
    }

    /// Queues a failure for the next `open`.
    pub async fn fail_next_acquire(&self, error: DeviceError) {
        self.shared.open_plan.lock().await.push_back(error);
    }

    /// Queues a failure for the next frame read.
    pub async fn fail_next_frame(&self, error: DeviceError) {
        self.shared.frame_plan.lock().await.push_back(error);
    }

    /// Streams opened so far (successful opens only).
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Streams closed so far. A terminal gap against [`Self::open_count`]
    /// is a leaked stream.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Streams currently open.
    pub fn active_streams(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently open streams.
    pub fn max_active_streams(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream state handed out by [`SimulatedBackend`].
pub struct SimulatedStream {
    frame: Vec<u8>,
}

#[async_trait]
impl CaptureBackend for SimulatedBackend {
    type Stream = SimulatedStream;

    async fn open(&self, constraints: &CaptureConstraints) -> Result<Self::Stream, DeviceError> {
        if let Some(error) = self.shared.open_plan.lock().await.pop_front() {
            return Err(error);
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);
        tracing::debug!(
            width = constraints.width,
            height = constraints.height,
            "simulated stream opened"
        );
        Ok(SimulatedStream {
            frame: self.shared.frame.clone(),
        })
    }

    async fn next_frame(&self, stream: &mut Self::Stream) -> Result<Vec<u8>, DeviceError> {
        if let Some(error) = self.shared.frame_plan.lock().await.pop_front() {
            return Err(error);
        }
        Ok(stream.frame.clone())
    }

    async fn close(&self, stream: Self::Stream) {
        drop(stream);
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}
