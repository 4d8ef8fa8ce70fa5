//! Classifies one line of a replay SQL file into an [`Action`]: the control
//! records the producer tags with a JSON payload, or a DML statement detected
//! by substring, matching the upstream producer's line-per-action contract.

use serde::Deserialize;
use tracing::trace;

use utils::lsn::Lsn;

use crate::error::ApplyError;

const TAG_BEGIN: &str = "BEGIN ";
const TAG_COMMIT: &str = "COMMIT ";
const TAG_SWITCHWAL: &str = "SWITCHWAL ";
const TAG_KEEPALIVE: &str = "KEEPALIVE ";

/// Metadata carried by the four control record kinds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub lsn: Lsn,
    #[serde(default)]
    pub xid: i64,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub enum Action<'a> {
    Begin(Metadata),
    Commit(Metadata),
    Switch(Metadata),
    Keepalive(Metadata),
    Insert(&'a str),
    Update(&'a str),
    Delete(&'a str),
    Truncate(&'a str),
    Unknown,
}

fn parse_metadata(payload: &str) -> Result<Metadata, ApplyError> {
    serde_json::from_str(payload.trim())
        .map_err(|e| ApplyError::Protocol(format!("malformed control message {payload:?}: {e}")))
}

fn require_begin_like_fields(kind: &str, meta: &Metadata, line: &str) -> Result<(), ApplyError> {
    if !meta.lsn.is_valid() || meta.timestamp.is_empty() {
        return Err(ApplyError::Protocol(format!(
            "failed to parse {kind} message: {line}"
        )));
    }
    Ok(())
}

/// Classify one already-trimmed, non-empty line.
pub fn classify(line: &str) -> Result<Action<'_>, ApplyError> {
    if let Some(rest) = line.strip_prefix(TAG_BEGIN) {
        let meta = parse_metadata(rest)?;
        require_begin_like_fields("BEGIN", &meta, line)?;
        trace!(xid = meta.xid, lsn = %meta.lsn, "classified BEGIN");
        return Ok(Action::Begin(meta));
    }
    if let Some(rest) = line.strip_prefix(TAG_COMMIT) {
        let meta = parse_metadata(rest)?;
        trace!(xid = meta.xid, lsn = %meta.lsn, "classified COMMIT");
        return Ok(Action::Commit(meta));
    }
    if let Some(rest) = line.strip_prefix(TAG_SWITCHWAL) {
        let meta = parse_metadata(rest)?;
        trace!(lsn = %meta.lsn, "classified SWITCHWAL");
        return Ok(Action::Switch(meta));
    }
    if let Some(rest) = line.strip_prefix(TAG_KEEPALIVE) {
        let meta = parse_metadata(rest)?;
        require_begin_like_fields("KEEPALIVE", &meta, line)?;
        trace!(lsn = %meta.lsn, "classified KEEPALIVE");
        return Ok(Action::Keepalive(meta));
    }

    // Prefix tags take priority over DML substring search: the producer
    // emits exactly one action per line, so a DML statement can never also
    // start with a control tag. See the contained-hazard note about a user
    // column literally named "INSERT INTO" appearing inside a prior DML line.
    if line.contains("INSERT INTO") {
        return Ok(Action::Insert(line));
    }
    if line.contains("UPDATE ") {
        return Ok(Action::Update(line));
    }
    if line.contains("DELETE FROM ") {
        return Ok(Action::Delete(line));
    }
    if line.contains("TRUNCATE ") {
        return Ok(Action::Truncate(line));
    }

    Ok(Action::Unknown)
}
