//! # posture-agent
//!
//! Resilient delivery pipeline for a host-security-posture agent.
//!
//! Each collection cycle asks a [`producer::Producer`] for a snapshot, tries
//! to POST it to the ingest endpoint, spools it to disk on failure, and then
//! replays whatever is waiting in the spool. The [`scheduler::Scheduler`]
//! drives cycles on a fixed interval.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod producer;
pub mod scheduler;
pub mod shutdown;
pub mod spool;
pub mod telemetry;
pub mod transport;
