//! The target-side session: applies SQL statements, tracks the current
//! transaction's replication-origin bookkeeping, and advances the origin
//! atomically with COMMIT so a restart resumes exactly where it left off.
//!
//! Exposed as a trait so the replay engine and bootstrap can be written
//! directly against the operations they need rather than the raw
//! `tokio-postgres` client.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use utils::lsn::Lsn;

use crate::error::ApplyError;

/// Everything the replay engine and bootstrap need from the target database.
/// Split out as a trait so tests can drive the state machine against an
/// in-memory fake instead of a live connection.
#[async_trait]
pub trait TargetSession: Send {
    /// Looks up the replication origin's oid by name. Zero means the origin
    /// is not registered on this target; bootstrap treats that as fatal.
    /// This is a read-only lookup — the applier never creates origins.
    async fn origin_oid(&mut self, name: &str) -> Result<u32, ApplyError>;

    /// Last durably advanced position for this origin, zero if never advanced.
    async fn origin_progress(&mut self, name: &str) -> Result<Lsn, ApplyError>;

    /// Attaches this session to the named origin so that subsequent commits
    /// within transactions set up via [`Self::origin_xact_setup`] carry
    /// origin metadata.
    async fn origin_session_setup(&mut self, name: &str) -> Result<(), ApplyError>;

    /// Starts a transaction.
    async fn begin(&mut self) -> Result<(), ApplyError>;

    /// Within the open transaction, records that it represents origin
    /// position `lsn` at source time `ts`; the following commit advances the
    /// origin atomically with the transaction's data.
    async fn origin_xact_setup(&mut self, lsn: Lsn, ts: &str) -> Result<(), ApplyError>;

    /// Runs one statement, either standalone or inside the open transaction.
    async fn execute(&mut self, sql: &str) -> Result<(), ApplyError>;

    /// Commits the currently open transaction, advancing the origin.
    async fn commit(&mut self) -> Result<(), ApplyError>;

    /// Final teardown. The real implementation relies on `Drop` to close the
    /// underlying connection; this exists so callers have an explicit point
    /// to report closing in logs.
    async fn close(&mut self) -> Result<(), ApplyError> {
        Ok(())
    }
}

pub struct PgTargetSession {
    client: Client,
}

impl PgTargetSession {
    /// Opens one connection in multi-statement mode: `tokio_postgres`
    /// already sends each `query`/`execute` as its own simple or extended
    /// query rather than wrapping the whole batch in an implicit transaction,
    /// so no extra setup is needed to get that behavior.
    pub async fn connect(conninfo: &str) -> Result<Self, ApplyError> {
        let (client, connection) = tokio_postgres::connect(conninfo, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "target connection closed with error");
            }
        });
        Ok(PgTargetSession { client })
    }
}

#[async_trait]
impl TargetSession for PgTargetSession {
    async fn origin_oid(&mut self, name: &str) -> Result<u32, ApplyError> {
        let row = self
            .client
            .query_opt(
                "SELECT roident FROM pg_replication_origin WHERE roname = $1",
                &[&name],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, i32>(0) as u32).unwrap_or(0))
    }

    async fn origin_progress(&mut self, name: &str) -> Result<Lsn, ApplyError> {
        let row = self
            .client
            .query_one(
                "SELECT pg_replication_origin_progress($1, true)::text",
                &[&name],
            )
            .await?;
        let text: Option<String> = row.get(0);
        match text {
            Some(t) => t
                .parse()
                .map_err(|_| ApplyError::Protocol(format!("unparseable origin progress {t:?}"))),
            None => Ok(Lsn::INVALID),
        }
    }

    async fn origin_session_setup(&mut self, name: &str) -> Result<(), ApplyError> {
        self.client
            .execute("SELECT pg_replication_origin_session_setup($1)", &[&name])
            .await?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), ApplyError> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn origin_xact_setup(&mut self, lsn: Lsn, ts: &str) -> Result<(), ApplyError> {
        let lsn_text = lsn.to_string();
        self.client
            .execute(
                "SELECT pg_replication_origin_xact_setup($1::pg_lsn, $2::timestamptz)",
                &[&lsn_text, &ts],
            )
            .await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<(), ApplyError> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ApplyError> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }
}
