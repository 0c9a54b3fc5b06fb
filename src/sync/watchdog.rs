//! Stuck-check recovery

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::sync::snapshot::WakePayload;
use crate::timer::WakeTimer;
use crate::types::AccountId;

/// How long a started check may run before the engine gives up on it.
pub const WATCHDOG_DELAY_MS: u64 = 10 * 60 * 1000;

/// Arms a deadline wake whenever a check starts. The watchdog shares the
/// single timer slot with the main schedule, so the rearm after a completed
/// check is what retires it; an explicit cancel is never needed.
pub struct Watchdog {
    timer: Arc<dyn WakeTimer>,
    clock: Arc<dyn Clock>,
}

impl Watchdog {
    pub fn new(timer: Arc<dyn WakeTimer>, clock: Arc<dyn Clock>) -> Self {
        Self { timer, clock }
    }

    /// Arm the deadline for a check of `account_id` that is starting now.
    pub fn arm(&self, account_id: AccountId) {
        let at = self.clock.now() + WATCHDOG_DELAY_MS;
        debug!("watchdog armed at {} for account {}", at, account_id);
        self.timer.arm(at, WakePayload::watchdog(account_id));
    }
}
