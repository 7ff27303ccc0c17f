//! Centralized error types for the Turnstile workspace.

use crate::types::RoomId;
use thiserror::Error;

/// Capture-device lifecycle failures.
///
/// Surfaced verbatim through the controller so callers can distinguish
/// hardware conditions from their own misuse. All variants are recoverable
/// by retrying `start` once the underlying condition clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("no capture device available")]
    DeviceUnavailable,

    #[error("permission to use the capture device was denied")]
    PermissionDenied,

    #[error("capture device is held by another consumer")]
    DeviceBusy,

    #[error("capture device is not streaming")]
    NotStreaming,
}

/// Top-level error enum. Variants map to subsystems.
///
/// Verification outcomes (timeout, low confidence, engine no-match) are not
/// errors; they resolve as denied decisions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TurnstileError {
    /// No authenticated identity is present.
    #[error("not authenticated")]
    Unauthenticated,

    /// The requested room is not in the directory.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    /// `start` was called while an attempt is already in progress.
    #[error("an access attempt is already active")]
    SessionAlreadyActive,

    /// A mid-attempt operation was invoked with no attempt in progress.
    #[error("no access attempt is active")]
    NoActiveSession,

    /// Consent was resolved twice, or with no prompt pending.
    #[error("no consent prompt is pending")]
    NoPendingConsent,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TurnstileResult<T> = Result<T, TurnstileError>;
