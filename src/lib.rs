#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Alarms that know when they next ring, and a wait that ends at an absolute wall clock time.
//!
//! An owner asks an [`Alarm`] for [`Alarm::next_ring_time`], hands it to a
//! [`WaitWorker`] running on its own thread and calls [`Alarm::ring`] when the
//! [`MessageType::WaitFinished`](communication::MessageType::WaitFinished) message arrives.

pub mod alarm;
pub mod communication;
pub mod config;
pub mod error;
pub mod notify;
pub mod player;
pub mod schedule;
pub mod store;
pub mod wait;

pub use alarm::{Alarm, AlarmRecord, AlarmServices};
pub use schedule::{DaysOfWeek, Schedule};
pub use wait::{WaitHandle, WaitOutcome, WaitWorker, NO_DEADLINE};
