//! Reads and advances the shared sentinel row that an external writer process
//! (the one performing the initial COPY and streaming the SQL files we
//! replay) uses to tell us when to stop and that we use to tell it how far
//! we've gotten. Source-side failures here are never fatal to the run: we
//! warn and retry on the next poll, since the sentinel is advisory, not a
//! correctness dependency of replay itself.

use tokio_postgres::{Client, NoTls};
use tracing::warn;

use utils::lsn::Lsn;

use crate::error::ApplyError;

/// The control fields the catch-up driver reads; storage layout beyond this
/// single-row table is an implementation detail of the writer side.
#[derive(Debug, Clone, Copy)]
pub struct Sentinel {
    pub startpos: Lsn,
    pub endpos: Lsn,
    pub apply: bool,
}

pub struct SentinelClient {
    client: Client,
}

impl SentinelClient {
    pub async fn connect(conninfo: &str) -> Result<Self, ApplyError> {
        let (client, connection) = tokio_postgres::connect(conninfo, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "sentinel connection closed with error");
            }
        });
        Ok(SentinelClient { client })
    }

    /// Fetches the current sentinel row. Returns `None` (rather than erroring)
    /// on any failure, logging a warning; callers retry on the next poll.
    pub async fn get_sentinel(&mut self) -> Option<Sentinel> {
        let row = match self
            .client
            .query_opt(
                "SELECT startpos::text, endpos::text, apply FROM pgcopydb.sentinel",
                &[],
            )
            .await
        {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "failed to read sentinel, will retry");
                return None;
            }
        };

        Some(Self::row_to_sentinel(row?))
    }

    /// Atomically writes our replay progress and reads back the (possibly
    /// updated) control fields in one round trip. Best-effort: a failure only
    /// delays the writer's progress reporting and our own view of updated
    /// control fields, never blocks replay — the next iteration retries.
    pub async fn sync_sentinel(&mut self, replay_lsn: Lsn) -> Option<Sentinel> {
        let text = replay_lsn.to_string();
        let row = match self
            .client
            .query_opt(
                "UPDATE pgcopydb.sentinel SET replay_lsn = $1::pg_lsn \
                 RETURNING startpos::text, endpos::text, apply",
                &[&text],
            )
            .await
        {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "failed to sync sentinel, will retry next poll");
                return None;
            }
        };

        Some(Self::row_to_sentinel(row?))
    }

    fn row_to_sentinel(row: tokio_postgres::Row) -> Sentinel {
        let parse = |s: Option<String>| -> Lsn {
            s.and_then(|s| s.parse().ok()).unwrap_or(Lsn::INVALID)
        };

        Sentinel {
            startpos: parse(row.get(0)),
            endpos: parse(row.get(1)),
            apply: row.get(2),
        }
    }
}
