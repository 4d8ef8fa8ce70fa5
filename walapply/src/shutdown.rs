//! Three cooperative shutdown flags — `stop`, `stop_fast`, and `quit` — with
//! identical "drain and exit at the next safe boundary" semantics. The C
//! original keeps these as process-wide booleans flipped straight from a
//! signal handler; here they are `CancellationToken`s flipped by a
//! `signal-hook` thread, and passed explicitly to the driver and wait loops
//! instead of read from global state.

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct ShutdownSignals {
    pub stop: CancellationToken,
    pub stop_fast: CancellationToken,
    pub quit: CancellationToken,
}

impl ShutdownSignals {
    /// Spawns the signal-handling thread and returns the token handles to
    /// pass into the driver. SIGTERM requests a plain `stop`; SIGINT and
    /// SIGQUIT additionally set `stop_fast`/`quit`, since all three boil down
    /// to "exit at the next safe boundary" in this applier.
    pub fn install() -> anyhow::Result<Self> {
        let signals = ShutdownSignals {
            stop: CancellationToken::new(),
            stop_fast: CancellationToken::new(),
            quit: CancellationToken::new(),
        };
        let mut registered = Signals::new([SIGTERM, SIGINT, SIGQUIT])?;
        let handle = signals.clone();
        std::thread::spawn(move || {
            for sig in registered.forever() {
                match sig {
                    SIGTERM => {
                        info!("received SIGTERM, will stop at next boundary");
                        handle.stop.cancel();
                    }
                    SIGINT => {
                        info!("received SIGINT, will stop fast");
                        handle.stop_fast.cancel();
                        handle.stop.cancel();
                    }
                    SIGQUIT => {
                        info!("received SIGQUIT, will quit");
                        handle.quit.cancel();
                        handle.stop.cancel();
                    }
                    _ => {}
                }
            }
        });
        Ok(signals)
    }

    /// True once any of the three flags has been requested.
    pub fn requested(&self) -> bool {
        self.stop.is_cancelled() || self.stop_fast.is_cancelled() || self.quit.is_cancelled()
    }
}
