//! The deadline engine (`spec.md` §4.5): a single background task owns the
//! process-wide "next wakeup" timer, promoting due delayed jobs to ready and
//! reclaiming reservations whose TTR has expired.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::Core;

/// Upper bound on how long the engine sleeps with nothing scheduled, so a
/// `Notify` missed due to a race is never fatal — the loop just wakes up
/// again shortly and recomputes.
const IDLE_POLL: Duration = Duration::from_secs(5);

/// Runs until cancelled. Intended to be spawned once per server as its own
/// tokio task; `notify` should be triggered by any core mutation that could
/// move the earliest deadline earlier (put-with-delay, release-with-delay,
/// a fresh reservation, a kicked-back-to-delayed job).
pub async fn run(core: Arc<Mutex<Core>>, notify: Arc<Notify>) {
    loop {
        let wake_at = {
            let guard = core.lock().expect("core mutex poisoned");
            guard.next_wakeup()
        };

        let deadline = wake_at.unwrap_or_else(|| Instant::now() + IDLE_POLL);

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {},
            _ = notify.notified() => {
                trace!("deadline engine woken early by a core mutation");
                continue;
            },
        }

        let mut guard = core.lock().expect("core mutex poisoned");
        guard.run_deadline_tick();
    }
}
