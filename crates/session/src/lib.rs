//! Access session core: identity synchronization, consent gating, capture
//! device lifecycle, and the controller that drives one attempt at a time
//! through them.

pub mod consent;
pub mod controller;
pub mod device;
pub mod sync;

pub use consent::{ConsentGate, ConsentTicket};
pub use controller::{AccessController, AccessEvent};
pub use device::{
    CaptureBackend, CaptureDeviceManager, DeviceHandle, DeviceState, SimulatedBackend,
};
pub use sync::{IdentityWatch, SessionSynchronizer};
