//! What plays when.
//!
//! [`SchedulePoller`] fetches [`ScheduleSnapshot`]s from a
//! [`ScheduleSource`] and normalizes them into a [`Timeline`];
//! [`SlotBook`] tracks each slot through its lifecycle.
//!
//! [`ScheduleSnapshot`]: crate::protocol::ScheduleSnapshot

mod poller;
mod slots;
mod timeline;

pub use poller::{SchedulePoller, ScheduleSource};
pub use slots::{SlotBook, SlotState, SyncReport};
pub use timeline::{Slot, Timeline};
