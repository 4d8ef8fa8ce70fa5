//! `walapply`: a logical-replication catch-up applier. Consumes a stream of
//! pre-transformed SQL files, one per source WAL segment, and replays them
//! against a target database while maintaining a durable replication origin.
//!
//! - [`action`] — classifies each SQL file's lines into control tags and DML
//! - [`target`] — the target-side session and replication-origin bookkeeping
//! - [`sentinel`] — reads and updates the source-side sentinel row
//! - [`file`] — replays one SQL file end-to-end
//! - [`driver`] — orchestrates replay across successive files until done
//! - [`bootstrap`] — resolves the origin's starting position before replay begins
//!
//! `postgres_ffi::{wal_segment_name, sql_file_path, ...}` provides the LSN &
//! WAL-segment arithmetic.

pub mod action;
pub mod bootstrap;
pub mod context;
pub mod defaults;
pub mod driver;
pub mod error;
pub mod file;
pub mod sentinel;
pub mod shutdown;
pub mod target;
