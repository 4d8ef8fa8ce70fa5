//! Entry point for the `walapply` catch-up applier.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use utils::lsn::Lsn;
use walapply::bootstrap::bootstrap;
use walapply::context::SourceContext;
use walapply::defaults::DEFAULT_POLL_INTERVAL;
use walapply::driver::{run, wait_for_apply};
use walapply::sentinel::{Sentinel, SentinelClient};
use walapply::shutdown::ShutdownSignals;
use walapply::target::{PgTargetSession, TargetSession};

#[derive(Parser, Debug)]
#[command(name = "walapply", about = "Logical-replication catch-up applier")]
struct Cli {
    /// Source database connection string (sentinel reads/writes).
    #[arg(long)]
    source_pguri: String,

    /// Target database connection string (replay destination).
    #[arg(long)]
    target_pguri: String,

    /// Replication origin name to attach to on the target.
    #[arg(long)]
    origin: String,

    /// Directory containing the producer's `<segment>.sql` files and its
    /// `context.json`.
    #[arg(long)]
    dir: PathBuf,

    /// Caller-supplied stop position. Takes precedence over the sentinel's
    /// endpos, with a warning, if both are set.
    #[arg(long)]
    endpos: Option<Lsn>,

    /// Start in "wait for sentinel apply" mode instead of applying immediately.
    #[arg(long)]
    prefetch: bool,

    /// The single retry/poll knob: how long to sleep between checks for the
    /// apply gate, for a file to appear, and for more data in the
    /// currently-growing file.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    poll_interval: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = ShutdownSignals::install().context("installing signal handlers")?;
    let poll_interval = poll_interval_or_default(cli.poll_interval);

    if let Err(e) = run_applier(cli, shutdown, poll_interval).await {
        error!(error = %e, "walapply exiting with error");
        return Err(e);
    }
    Ok(())
}

fn poll_interval_or_default(d: Duration) -> Duration {
    if d.is_zero() {
        DEFAULT_POLL_INTERVAL
    } else {
        d
    }
}

async fn run_applier(
    cli: Cli,
    shutdown: ShutdownSignals,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    let (sentinel_gate, mut sentinel_client) = if cli.prefetch {
        let mut client = SentinelClient::connect(&cli.source_pguri)
            .await
            .context("connecting to source for sentinel wait")?;
        let gate = wait_for_apply(&mut client, poll_interval, &shutdown).await;
        (gate, Some(client))
    } else {
        (
            Some(Sentinel {
                startpos: Lsn::INVALID,
                endpos: Lsn::INVALID,
                apply: true,
            }),
            None,
        )
    };

    let Some(gate) = sentinel_gate else {
        info!("shutdown requested before apply was enabled, exiting");
        return Ok(());
    };

    if sentinel_client.is_none() {
        // Non-prefetch mode still syncs progress back if a source URI was
        // given, so operators can watch replay_lsn advance from the source side.
        sentinel_client = SentinelClient::connect(&cli.source_pguri).await.ok();
    }

    let system = SourceContext::read(&cli.dir)
        .await
        .context("reading producer context file")?;

    let mut target = PgTargetSession::connect(&cli.target_pguri)
        .await
        .context("connecting to target database")?;

    let cli_endpos = cli.endpos.unwrap_or(Lsn::INVALID);
    let ctx = bootstrap(
        &mut target,
        &cli.origin,
        system,
        cli.dir.clone(),
        gate.startpos,
        gate.endpos,
        cli_endpos,
        gate.apply,
        cli.prefetch,
    )
    .await
    .context("bootstrapping replication origin")?;

    let mut target: Box<dyn TargetSession> = Box::new(target);
    run(ctx, target.as_mut(), sentinel_client, &shutdown, poll_interval)
        .await
        .context("catch-up replay failed")?;

    info!("walapply exiting cleanly");
    Ok(())
}
