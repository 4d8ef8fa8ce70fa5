//! Configuration read once at startup (the producer's context file) plus the
//! mutable apply state the catch-up driver owns exclusively and mutates as
//! it replays.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use postgres_ffi::TimeLineId;
use utils::lsn::Lsn;

use crate::error::ApplyError;

/// `{system_identifier, timeline, wal_segment_size}`, written by the
/// producer alongside the SQL files and read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceContext {
    pub system_identifier: u64,
    pub timeline: TimeLineId,
    pub wal_segment_size: u64,
}

impl SourceContext {
    pub async fn read(dir: &Path) -> Result<Self, ApplyError> {
        let path = dir.join("context.json");
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| ApplyError::Configuration(format!("reading context file {path:?}: {e}")))?;
        serde_json::from_slice(&data)
            .map_err(|e| ApplyError::Configuration(format!("parsing context file {path:?}: {e}")))
    }
}

/// Everything the catch-up driver carries between files. `session` is held
/// separately by the driver (a `dyn TargetSession` is not easily embedded
/// here without generic parameters leaking through every call site).
pub struct ApplyContext {
    pub system: SourceContext,
    pub dir: PathBuf,
    pub origin_name: String,
    /// Last-applied LSN; monotonic non-decreasing after bootstrap (invariant 1).
    pub previous_lsn: Lsn,
    pub startpos: Lsn,
    pub endpos: Lsn,
    pub apply: bool,
    /// Whether `apply` is a live gate the driver should keep re-checking.
    /// Only true for runs started with `--prefetch`, which waited on the
    /// sentinel's `apply` flag before bootstrapping; a plain catch-up run
    /// assumes `apply=true` throughout and must not stall just because the
    /// sentinel's `apply` column (driven by an orchestration it isn't part
    /// of) happens to read back `false` on sync.
    pub apply_gated: bool,
    pub reached_end_pos: bool,
}

impl ApplyContext {
    /// The SQL file hosting `previous_lsn`, recomputed by the driver after
    /// every file replay and sentinel sync.
    pub fn current_file(&self) -> PathBuf {
        postgres_ffi::sql_file_path(
            &self.dir,
            self.system.timeline,
            self.previous_lsn,
            self.system.wal_segment_size,
        )
    }
}
