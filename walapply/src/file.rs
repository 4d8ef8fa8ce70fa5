//! Applies one SQL file end-to-end against a [`TargetSession`], honoring
//! start/end positions and transaction
//! atomicity. The only durable record of progress is the origin's advance at
//! COMMIT, so a partially-applied file is always safe to re-read from disk on
//! restart.

use tracing::{debug, info, trace};

use utils::lsn::Lsn;

use crate::action::{classify, Action};
use crate::error::ApplyError;
use crate::target::TargetSession;

/// Outcome of replaying one file: the caller (the catch-up driver) needs the
/// updated `previous_lsn` and whether `endpos` was reached, to decide what to
/// do next.
pub struct ReplayOutcome {
    pub previous_lsn: Lsn,
    pub reached_end_pos: bool,
}

/// Replays `contents` (the whole file, already read into memory) against
/// `session`, starting from `previous_lsn` and stopping at `endpos` (or at
/// end of file, for the currently-growing file with no trailing SWITCH).
///
/// `previous_lsn` is the origin's last-advanced position; `endpos` may be
/// [`Lsn::INVALID`] to mean "unbounded".
pub async fn replay_file(
    session: &mut dyn TargetSession,
    contents: &str,
    mut previous_lsn: Lsn,
    endpos: Lsn,
) -> Result<ReplayOutcome, ApplyError> {
    // A transaction is replayed only once this flips true, at the first
    // BEGIN/KEEPALIVE whose LSN exceeds `previous_lsn` — a file can contain
    // transactions both below and above it, as in the resume-skip scenario.
    let mut reached_start = false;
    let mut reached_end_pos = false;
    let lines: Vec<&str> = contents.lines().collect();
    let last_non_empty = lines.iter().rposition(|l| !l.trim().is_empty());

    for (idx, raw_line) in lines.iter().enumerate() {
        if reached_end_pos {
            break;
        }
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let action = classify(line)?;
        match action {
            Action::Switch(meta) => {
                if Some(idx) != last_non_empty {
                    return Err(ApplyError::Protocol(format!(
                        "SWITCHWAL at line {} is not the last non-empty line of the file",
                        idx + 1
                    )));
                }
                info!(lsn = %meta.lsn, "switching to next WAL file");
                previous_lsn = meta.lsn;
                break;
            }

            Action::Begin(meta) => {
                if !reached_start && previous_lsn < meta.lsn {
                    reached_start = true;
                }
                if endpos.is_valid() && endpos <= meta.lsn {
                    reached_end_pos = true;
                    debug!(lsn = %meta.lsn, %endpos, "stopping before BEGIN past endpos");
                    break;
                }
                if reached_start {
                    session.begin().await?;
                    session
                        .origin_xact_setup(meta.lsn, &meta.timestamp)
                        .await?;
                    trace!(xid = meta.xid, lsn = %meta.lsn, "began transaction");
                } else {
                    trace!(lsn = %meta.lsn, %previous_lsn, "skipping already-applied transaction");
                }
            }

            Action::Insert(sql) | Action::Update(sql) | Action::Delete(sql) | Action::Truncate(sql) => {
                if !reached_start {
                    continue;
                }
                let sql = sql.strip_suffix(';').unwrap_or(sql);
                session.execute(sql).await?;
            }

            Action::Commit(meta) => {
                if !reached_start {
                    continue;
                }
                session.commit().await?;
                previous_lsn = meta.lsn;
                if endpos.is_valid() && endpos <= previous_lsn {
                    reached_end_pos = true;
                }
                info!(lsn = %previous_lsn, "committed transaction");
            }

            Action::Keepalive(meta) => {
                if !reached_start && previous_lsn < meta.lsn {
                    reached_start = true;
                }
                // Strict-less-than pre-check: unlike BEGIN/COMMIT, a keepalive
                // landing exactly on endpos is still applied, so the origin
                // reaches endpos exactly instead of stalling one keepalive short.
                if endpos.is_valid() && endpos < meta.lsn {
                    reached_end_pos = true;
                    debug!(lsn = %meta.lsn, %endpos, "stopping before keepalive past endpos");
                    break;
                }
                if reached_start {
                    session.begin().await?;
                    session
                        .origin_xact_setup(meta.lsn, &meta.timestamp)
                        .await?;
                    session.commit().await?;
                    previous_lsn = meta.lsn;
                    trace!(lsn = %previous_lsn, "applied keepalive");
                }
                if endpos.is_valid() && endpos <= previous_lsn {
                    reached_end_pos = true;
                }
            }

            Action::Unknown => {
                return Err(ApplyError::Protocol(format!(
                    "unrecognized action at line {}: {line:?}",
                    idx + 1
                )));
            }
        }
    }

    Ok(ReplayOutcome {
        previous_lsn,
        reached_end_pos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::fake::FakeTargetSession;

    fn meta_json(lsn: &str, xid: i64, ts: &str) -> String {
        format!(r#"{{"lsn":"{lsn}","xid":{xid},"timestamp":"{ts}"}}"#)
    }

    const TS: &str = "2024-01-01T00:00:00Z";

    #[tokio::test]
    async fn single_transaction_advances_origin_and_rolls_to_next_file() {
        let file = format!(
            "BEGIN {}\nINSERT INTO t VALUES (1);\nCOMMIT {}\nSWITCHWAL {}\n",
            meta_json("0/A0000028", 42, TS),
            meta_json("0/A0000060", 42, ""),
            meta_json("0/A1000000", 0, ""),
        );
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let outcome = replay_file(&mut target, &file, "0/A0000000".parse().unwrap(), Lsn::INVALID)
            .await
            .unwrap();

        assert_eq!(outcome.previous_lsn, "0/A1000000".parse().unwrap());
        assert!(!outcome.reached_end_pos);
        assert_eq!(target.committed_count(), 1);
    }

    #[tokio::test]
    async fn endpos_mid_file_stops_before_begin() {
        // The BEGIN record carries the transaction's *commit* LSN, not its
        // start LSN (logical decoding only knows the final LSN once the
        // transaction has committed, so BEGIN and COMMIT report the same
        // value here) — the endpos gate in the BEGIN arm tests against that
        // same lsn, so a BEGIN whose own lsn is already past endpos is what
        // stops replay before the transaction begins.
        let file = format!(
            "BEGIN {}\nINSERT INTO t VALUES (1);\nCOMMIT {}\nSWITCHWAL {}\n",
            meta_json("0/A0000060", 42, TS),
            meta_json("0/A0000060", 42, ""),
            meta_json("0/A1000000", 0, ""),
        );
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let outcome = replay_file(
            &mut target,
            &file,
            "0/A0000000".parse().unwrap(),
            "0/A0000050".parse().unwrap(),
        )
        .await
        .unwrap();

        assert!(outcome.reached_end_pos);
        assert_eq!(outcome.previous_lsn, "0/A0000000".parse().unwrap());
        assert_eq!(target.committed_count(), 0);
    }

    #[tokio::test]
    async fn keepalive_at_endpos_is_still_applied() {
        let file = format!("KEEPALIVE {}\n", meta_json("0/B0000000", 0, TS));
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let outcome = replay_file(
            &mut target,
            &file,
            Lsn::INVALID,
            "0/B0000000".parse().unwrap(),
        )
        .await
        .unwrap();

        assert!(outcome.reached_end_pos);
        assert_eq!(outcome.previous_lsn, "0/B0000000".parse().unwrap());
        assert_eq!(target.committed_count(), 1);
    }

    #[tokio::test]
    async fn resume_skips_already_applied_transaction() {
        let file = format!(
            "BEGIN {}\nINSERT INTO t VALUES (1);\nCOMMIT {}\nBEGIN {}\nINSERT INTO t VALUES (2);\nCOMMIT {}\n",
            meta_json("0/A0000028", 1, TS),
            meta_json("0/A0000060", 1, ""),
            meta_json("0/A0000080", 2, TS),
            meta_json("0/A00000A0", 2, ""),
        );
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let outcome = replay_file(&mut target, &file, "0/A0000060".parse().unwrap(), Lsn::INVALID)
            .await
            .unwrap();

        assert_eq!(outcome.previous_lsn, "0/A00000A0".parse().unwrap());
        assert_eq!(target.committed_count(), 1);
        assert!(target
            .calls
            .iter()
            .all(|c| !matches!(c, crate::target::fake::Call::Execute(s) if s.contains("VALUES (1)"))));
    }

    #[tokio::test]
    async fn tail_follow_with_no_switch_applies_what_is_present() {
        let file = format!(
            "BEGIN {}\nINSERT INTO t VALUES (1);\nCOMMIT {}\n",
            meta_json("0/A0000028", 1, TS),
            meta_json("0/A0000060", 1, ""),
        );
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let outcome = replay_file(&mut target, &file, Lsn::INVALID, Lsn::INVALID)
            .await
            .unwrap();

        assert_eq!(outcome.previous_lsn, "0/A0000060".parse().unwrap());
        assert!(!outcome.reached_end_pos);

        // Re-reading the same bytes plus a freshly appended transaction must
        // not re-apply the first one.
        let appended = format!(
            "{file}BEGIN {}\nINSERT INTO t VALUES (2);\nCOMMIT {}\n",
            meta_json("0/A0000080", 2, TS),
            meta_json("0/A00000A0", 2, ""),
        );
        let outcome2 = replay_file(&mut target, &appended, outcome.previous_lsn, Lsn::INVALID)
            .await
            .unwrap();
        assert_eq!(outcome2.previous_lsn, "0/A00000A0".parse().unwrap());
        assert_eq!(target.committed_count(), 2);
    }

    #[tokio::test]
    async fn switch_not_last_line_is_protocol_error() {
        let file = format!(
            "SWITCHWAL {}\nBEGIN {}\n",
            meta_json("0/A1000000", 0, ""),
            meta_json("0/A0000028", 1, TS),
        );
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let err = replay_file(&mut target, &file, Lsn::INVALID, Lsn::INVALID)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Protocol(_)));
    }

    #[tokio::test]
    async fn unknown_line_is_fatal() {
        let file = "SELECT 1;\n".to_string();
        let mut target = FakeTargetSession::new(1, Lsn::INVALID);
        let err = replay_file(&mut target, &file, Lsn::INVALID, Lsn::INVALID)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Protocol(_)));
    }
}
