//! MQTT topic recorder and replayer library.
//!
//! This crate provides the core types and logic used by the
//! `topic_recorder` binary and the `replayer` tool:
//!
//! - `record`: durable on-disk log of JSON lines with crash-safe index
//!   recovery from the final line
//! - `recorder`: subscribes to a topic subtree and appends every message
//!   with a gapless `message_index`
//! - `replayer`: streams a log back onto a renamed topic tree, keeping the
//!   recorded inter-message timing scaled by a speed multiplier
//! - `broker`: the publish/subscribe boundary and its MQTT implementation
pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod record;
pub mod recorder;
pub mod replayer;
pub mod topic;

pub use error::{Error, Result};
