//! Injected wake-timer capability
//!
//! The engine keeps at most one pending wake. The main schedule and the
//! watchdog share this single slot, so arming either replaces the other;
//! that replacement is what retires a stale watchdog after a normal
//! completion, without an explicit cancel.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;
use crate::sync::driver::SyncCommand;
use crate::sync::snapshot::WakePayload;

/// Single-slot wake timer: `arm` replaces whatever is pending.
pub trait WakeTimer: Send + Sync {
    /// Schedule a wake at monotonic time `at`, replacing any pending wake.
    fn arm(&self, at: u64, payload: WakePayload);

    /// Drop the pending wake, if any.
    fn cancel(&self);
}

/// Tokio-backed timer that delivers fired payloads as driver commands.
///
/// Must be created and armed from within a tokio runtime.
pub struct TokioWakeTimer {
    clock: Arc<dyn Clock>,
    commands: flume::Sender<SyncCommand>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioWakeTimer {
    pub fn new(clock: Arc<dyn Clock>, commands: flume::Sender<SyncCommand>) -> Self {
        Self {
            clock,
            commands,
            pending: Mutex::new(None),
        }
    }

    fn replace_pending(&self, task: Option<JoinHandle<()>>) {
        let mut slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        *slot = task;
    }
}

impl WakeTimer for TokioWakeTimer {
    fn arm(&self, at: u64, payload: WakePayload) {
        let delay = Duration::from_millis(at.saturating_sub(self.clock.now()));
        debug!("arming wake in {:?} for {:?}", delay, payload.target);

        let commands = self.commands.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(SyncCommand::Wake(payload));
        });
        self.replace_pending(Some(task));
    }

    fn cancel(&self) {
        debug!("cancelling pending wake");
        self.replace_pending(None);
    }
}

/// Recording timer (for testing)
///
/// Remembers the most recent arm and lets tests fire it by hand.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualTimerState>,
}

#[derive(Default)]
struct ManualTimerState {
    armed: Option<(u64, WakePayload)>,
    arm_count: usize,
    cancel_count: usize,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently pending wake, if any.
    pub fn armed(&self) -> Option<(u64, WakePayload)> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .armed
            .clone()
    }

    pub fn arm_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).arm_count
    }

    pub fn cancel_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_count
    }

    /// Take the pending wake, as if it had fired.
    pub fn fire(&self) -> Option<WakePayload> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .armed
            .take()
            .map(|(_, payload)| payload)
    }
}

impl WakeTimer for ManualTimer {
    fn arm(&self, at: u64, payload: WakePayload) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.armed = Some((at, payload));
        state.arm_count += 1;
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.armed = None;
        state.cancel_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_manual_timer_arm_replaces() {
        let timer = ManualTimer::new();
        timer.arm(100, WakePayload::check(Some(1)));
        timer.arm(200, WakePayload::check(Some(2)));

        let (at, payload) = timer.armed().expect("Expected a pending wake");
        assert_eq!(at, 200);
        assert_eq!(payload.target, Some(2));
        assert_eq!(timer.arm_count(), 2);
    }

    #[test]
    fn test_manual_timer_cancel_clears() {
        let timer = ManualTimer::new();
        timer.arm(100, WakePayload::check(None));
        timer.cancel();

        assert!(timer.armed().is_none());
        assert_eq!(timer.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_tokio_timer_fires_due_wake() {
        let clock = Arc::new(ManualClock::new(0));
        let (tx, rx) = flume::unbounded();
        let timer = TokioWakeTimer::new(clock, tx);

        timer.arm(0, WakePayload::check(Some(4)));

        match rx.recv_async().await {
            Ok(SyncCommand::Wake(payload)) => assert_eq!(payload.target, Some(4)),
            other => panic!("Expected Wake command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tokio_timer_arm_replaces_pending() {
        let clock = Arc::new(ManualClock::new(0));
        let (tx, rx) = flume::unbounded();
        let timer = TokioWakeTimer::new(clock, tx);

        // A far-future wake superseded by an immediate one: only the second
        // fires, the first was aborted.
        timer.arm(600_000, WakePayload::check(Some(1)));
        timer.arm(0, WakePayload::check(Some(2)));

        match rx.recv_async().await {
            Ok(SyncCommand::Wake(payload)) => assert_eq!(payload.target, Some(2)),
            other => panic!("Expected Wake command, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel_drops_wake() {
        let clock = Arc::new(ManualClock::new(0));
        let (tx, rx) = flume::unbounded();
        let timer = TokioWakeTimer::new(clock, tx);

        timer.arm(600_000, WakePayload::check(Some(1)));
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
