//! Domain models, shared types, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod error;
pub mod policy;
pub mod types;

pub use error::{DeviceError, TurnstileError, TurnstileResult};
pub use policy::AccessPolicy;
pub use types::{
    CancelCause, CaptureConstraints, CaptureSample, ConsentRecord, Decision, DecisionFilter,
    Identity, Outcome, Phase, ReasonCode, Role, Room, RoomId, Session,
};
