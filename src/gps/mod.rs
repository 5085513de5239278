//! # GPS Module
//!
//! Fix acquisition side of the pinger: a supervised reader task that owns
//! the serial port, and the store it shares with the dispatch loop.

pub mod reader;
pub mod store;

pub use reader::{GpsSettings, GpsStatus, GpsSupervisor};
pub use store::FixStore;
