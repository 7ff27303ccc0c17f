//! Domain types for the Turnstile lab-access client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Role assigned to an identity by the directory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

/// An authenticated user as this client sees one.
///
/// Immutable once resolved; a session change replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

/// A live session handle held by the identity provider. Identity details
/// are resolved separately through a record lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// Directory key for a controlled room, e.g. `"room-a"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A controlled room.
///
/// Capacity is directory metadata only; occupancy bookkeeping belongs to the
/// admin service, not this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub location: String,
    pub capacity: u32,
}

// ---------------------------------------------------------------------------
// Consent & capture
// ---------------------------------------------------------------------------

/// Outcome of one consent prompt.
///
/// Scoped to a single access attempt; never cached across attempts and never
/// defaulted to granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub granted: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn new(granted: bool) -> Self {
        Self {
            granted,
            timestamp: Utc::now(),
        }
    }
}

/// Requested capture geometry. Backends deliver the nearest mode they
/// support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_user: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing_user: true,
        }
    }
}

/// One biometric frame lifted off the capture stream.
///
/// Not `Clone`: a sample is consumed exactly once by the verification
/// engine.
#[derive(Debug)]
pub struct CaptureSample {
    bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl CaptureSample {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            captured_at: Utc::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Grant or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Granted,
    Denied,
}

/// Why an attempt was denied. Closed vocabulary; serialized in snake case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Engine confidence fell below the policy threshold.
    LowConfidence,
    /// The engine missed the policy deadline or failed outright.
    VerificationTimeout,
    /// The sample did not match the enrolled template.
    FaceMismatch,
    /// No template is enrolled for the requesting user.
    TemplateMissing,
    /// The engine rejected the sample without a more specific code.
    NoMatch,
}

impl ReasonCode {
    /// Wire name, e.g. `low_confidence`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::LowConfidence => "low_confidence",
            ReasonCode::VerificationTimeout => "verification_timeout",
            ReasonCode::FaceMismatch => "face_mismatch",
            ReasonCode::TemplateMissing => "template_missing",
            ReasonCode::NoMatch => "no_match",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended access decision. Immutable: corrections are new entries.
///
/// `confidence` is present iff the outcome is `Granted`, `reason_code` iff
/// `Denied`. Build decisions through [`Decision::granted`] and
/// [`Decision::denied`] to hold that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub user_id: Uuid,
    pub room_id: RoomId,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason_code: Option<ReasonCode>,
}

impl Decision {
    /// A grant with the engine confidence that cleared the threshold.
    /// Confidence is clamped to the 0..=100 scale.
    pub fn granted(user_id: Uuid, room_id: RoomId, confidence: u8) -> Self {
        Self {
            user_id,
            room_id,
            timestamp: Utc::now(),
            outcome: Outcome::Granted,
            confidence: Some(confidence.min(100)),
            reason_code: None,
        }
    }

    /// A denial carrying its reason code and no confidence.
    pub fn denied(user_id: Uuid, room_id: RoomId, reason: ReasonCode) -> Self {
        Self {
            user_id,
            room_id,
            timestamp: Utc::now(),
            outcome: Outcome::Denied,
            confidence: None,
            reason_code: Some(reason),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == Outcome::Granted
    }
}

/// Ledger query. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionFilter {
    pub room: Option<RoomId>,
    pub outcome: Option<Outcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DecisionFilter {
    pub fn matches(&self, decision: &Decision) -> bool {
        if let Some(room) = &self.room {
            if &decision.room_id != room {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if decision.outcome != outcome {
                return false;
            }
        }
        if let Some(since) = self.since {
            if decision.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if decision.timestamp > until {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Session phases
// ---------------------------------------------------------------------------

/// Observable lifecycle phase of one access attempt.
///
/// `Decided`, `Cancelled`, and `Errored` are terminal for the attempt; the
/// controller returns to `Idle` right after reporting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    ConsentPending,
    DeviceAcquiring,
    Streaming,
    Verifying,
    Decided,
    Cancelled,
    Errored,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Decided | Phase::Cancelled | Phase::Errored)
    }
}

/// What ended a cancelled attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    /// `cancel` was called.
    UserRequest,
    /// The consent prompt was declined or abandoned.
    ConsentDeclined,
    /// The authenticated identity was signed out or replaced mid-attempt.
    IdentityInvalidated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_decision_carries_confidence_only() {
        let d = Decision::granted(Uuid::new_v4(), RoomId::from("room-a"), 95);
        assert_eq!(d.outcome, Outcome::Granted);
        assert_eq!(d.confidence, Some(95));
        assert_eq!(d.reason_code, None);
    }

    #[test]
    fn denied_decision_carries_reason_only() {
        let d = Decision::denied(
            Uuid::new_v4(),
            RoomId::from("room-a"),
            ReasonCode::LowConfidence,
        );
        assert_eq!(d.outcome, Outcome::Denied);
        assert_eq!(d.confidence, None);
        assert_eq!(d.reason_code, Some(ReasonCode::LowConfidence));
    }

    #[test]
    fn confidence_clamped_to_scale() {
        let d = Decision::granted(Uuid::new_v4(), RoomId::from("room-a"), 255);
        assert_eq!(d.confidence, Some(100));
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ReasonCode::VerificationTimeout).unwrap();
        assert_eq!(json, "\"verification_timeout\"");
        assert_eq!(ReasonCode::LowConfidence.as_str(), "low_confidence");
    }

    #[test]
    fn denied_rows_omit_confidence_field() {
        let d = Decision::denied(
            Uuid::new_v4(),
            RoomId::from("room-b"),
            ReasonCode::FaceMismatch,
        );
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("confidence"));
        assert!(json.contains("\"reason_code\":\"face_mismatch\""));
    }

    #[test]
    fn filter_matches_room_outcome_and_window() {
        let user = Uuid::new_v4();
        let d = Decision::granted(user, RoomId::from("room-a"), 90);

        let all = DecisionFilter::default();
        assert!(all.matches(&d));

        let wrong_room = DecisionFilter {
            room: Some(RoomId::from("room-b")),
            ..Default::default()
        };
        assert!(!wrong_room.matches(&d));

        let denied_only = DecisionFilter {
            outcome: Some(Outcome::Denied),
            ..Default::default()
        };
        assert!(!denied_only.matches(&d));

        let future = DecisionFilter {
            since: Some(d.timestamp + chrono::Duration::seconds(10)),
            ..Default::default()
        };
        assert!(!future.matches(&d));

        let window = DecisionFilter {
            since: Some(d.timestamp - chrono::Duration::seconds(10)),
            until: Some(d.timestamp + chrono::Duration::seconds(10)),
            ..Default::default()
        };
        assert!(window.matches(&d));
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Decided.is_terminal());
        assert!(Phase::Cancelled.is_terminal());
        assert!(Phase::Errored.is_terminal());
        assert!(!Phase::Streaming.is_terminal());
    }
}
