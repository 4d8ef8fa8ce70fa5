//! Error kinds mirroring the policy table: configuration and protocol
//! violations are always fatal, database statement failures abort the
//! current run, I/O covers both the SQL files and the context file.

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    /// Unregistered origin, unparseable control message, bad CLI/context input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// SWITCH not last in file, missing LSN/timestamp on BEGIN/KEEPALIVE,
    /// unrecognized SQL action.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Any failed statement, BEGIN, or replication-origin call against either
    /// the source or the target. Which side failed is evident from context in
    /// the wrapping log line; callers decide whether that's fatal (target) or
    /// a warn-and-retry (source sentinel calls).
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
