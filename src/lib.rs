//! Tickstream - Resumable Time-Series Feed Client
//!
//! Connects to a multiplexed sample stream, resumes from a persisted
//! cursor through the history/delta/live handoff, deduplicates replay
//! overlap, accounts for gaps, and feeds a frame-budgeted ingest queue
//! into bounded per-series circular buffers.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
