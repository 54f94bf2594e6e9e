//! # Ground Control Library
//!
//! Fly a single vehicle through a scripted sequence from the ground station.
//!
//! This library provides the building blocks of the sequencer: a vehicle link
//! abstraction, a telemetry cache fed by link callbacks, an asynchronous
//! timestamped audit log, and mission upload and download helpers.

pub mod config;
pub mod error;
pub mod link;
pub mod log_sink;
pub mod mission;
pub mod sequencer;
pub mod telemetry;
