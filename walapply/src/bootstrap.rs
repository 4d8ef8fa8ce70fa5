//! Resolves the origin's current LSN on the target, decides the effective
//! endpos, and attaches the session to the origin before the catch-up
//! driver starts replaying files.

use tracing::{info, warn};

use utils::lsn::Lsn;

use crate::context::{ApplyContext, SourceContext};
use crate::error::ApplyError;
use crate::target::TargetSession;

/// Runs the bootstrap sequence and returns the initial [`ApplyContext`]. The
/// origin must already be registered on the target by external tooling; an
/// unregistered origin is a fatal configuration error, not something this
/// applier creates on the caller's behalf.
pub async fn bootstrap(
    session: &mut dyn TargetSession,
    origin_name: &str,
    system: SourceContext,
    dir: std::path::PathBuf,
    sentinel_startpos: Lsn,
    sentinel_endpos: Lsn,
    cli_endpos: Lsn,
    apply: bool,
    apply_gated: bool,
) -> Result<ApplyContext, ApplyError> {
    let oid = session.origin_oid(origin_name).await?;
    if oid == 0 {
        return Err(ApplyError::Configuration(format!(
            "replication origin {origin_name:?} is not registered on the target"
        )));
    }

    let previous_lsn = session.origin_progress(origin_name).await?;

    let endpos = if cli_endpos.is_valid() && sentinel_endpos.is_valid() {
        warn!(
            cli = %cli_endpos,
            sentinel = %sentinel_endpos,
            "endpos given on both the command line and by the sentinel; command line wins"
        );
        cli_endpos
    } else if cli_endpos.is_valid() {
        cli_endpos
    } else {
        sentinel_endpos
    };

    session.origin_session_setup(origin_name).await?;

    info!(
        origin = origin_name,
        oid,
        previous_lsn = %previous_lsn,
        endpos = %endpos,
        "origin bootstrap complete"
    );

    Ok(ApplyContext {
        system,
        dir,
        origin_name: origin_name.to_string(),
        previous_lsn,
        startpos: sentinel_startpos,
        endpos,
        apply,
        apply_gated,
        reached_end_pos: false,
    })
}
