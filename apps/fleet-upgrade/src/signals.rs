use std::io;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

static TERMINATION: OnceLock<CancellationToken> = OnceLock::new();

const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Starts listening for SIGINT, SIGTERM, SIGHUP and SIGQUIT and returns the token they
/// cancel. Only the first call registers anything; later calls return the same token.
///
/// Must be called from inside a tokio runtime.
pub fn install() -> io::Result<CancellationToken> {
    if let Some(token) = TERMINATION.get() {
        return Ok(token.clone());
    }
    let listeners = Listeners {
        interrupt: signal(SignalKind::interrupt())?,
        terminate: signal(SignalKind::terminate())?,
        hangup: signal(SignalKind::hangup())?,
        quit: signal(SignalKind::quit())?,
    };
    let token = CancellationToken::new();
    if TERMINATION.set(token.clone()).is_err() {
        // Lost a race with another caller; its listener is already running.
        return Ok(TERMINATION.get().cloned().unwrap_or(token));
    }
    tokio::spawn(listeners.wait(token.clone()));
    Ok(token)
}

/// Whether a termination signal has been received by this process.
pub fn is_terminated() -> bool {
    TERMINATION.get().is_some_and(CancellationToken::is_cancelled)
}

struct Listeners {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
    quit: Signal,
}

impl Listeners {
    async fn wait(mut self, token: CancellationToken) {
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.quit.recv() => "SIGQUIT",
            _ = token.cancelled() => return,
        };
        println!("Please wait while finishing up...");
        tracing::info!(signal = name, "termination requested");
        token.cancel();
    }
}

/// Sleeps for `duration` in short slices. Returns `false` if `token` was cancelled
/// before the full duration elapsed.
pub fn pause_unless_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(PAUSE_SLICE.min(deadline - now));
    }
}
