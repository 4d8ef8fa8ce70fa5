//! Defaults for the binary's CLI, mirroring the reference codebase's
//! convention of a `pub mod defaults` per binary rather than scattering
//! literals through `clap` attributes.

use std::time::Duration;

/// The single retry/poll knob: applies to waiting for the sentinel apply
/// gate, waiting for a file to appear, and waiting for more data to be
/// appended to the currently-growing file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
