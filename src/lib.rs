//! # Meshtastic Pinger Library
//!
//! Relay GPS fixes from a serial NMEA receiver to one Meshtastic node.
//!
//! This library provides the pieces of the relay loop: NMEA parsing, the
//! supervised GPS reader, serial device discovery, the radio session and the
//! fixed-cadence dispatcher that ties them together.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gps;
pub mod logging;
pub mod nmea;
pub mod radio;
pub mod serial;
pub mod state;
