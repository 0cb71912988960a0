//! Frame scheduling between the camera and the detector

pub mod scheduler;
pub mod slot;

pub use scheduler::{DecodeScheduler, SchedulerEvent};
pub use slot::{PendingSlot, SlotStats};
