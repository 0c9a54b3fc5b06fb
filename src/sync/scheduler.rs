//! Wake planning
//!
//! Walks the registry to find the account whose check is due soonest, arms
//! the wake timer for it, and bundles a snapshot of last-check times into
//! the payload so the schedule survives a process restart.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::MailBackend;
use crate::clock::Clock;
use crate::sync::registry::{LoadMode, SyncRegistry};
use crate::sync::report::SyncReport;
use crate::sync::snapshot::{SnapshotEntry, WakePayload};
use crate::timer::WakeTimer;
use crate::types::AccountId;

pub struct Scheduler {
    registry: Arc<SyncRegistry>,
    timer: Arc<dyn WakeTimer>,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn MailBackend>,
}

struct NextCheck {
    target: Option<AccountId>,
    wake_time: u64,
    snapshot: Vec<SnapshotEntry>,
}

/// Select the next account to check. An account that was never checked, or
/// whose due time has already passed, wins immediately over one merely due
/// soonest. Last-check times are collected for every polled account along
/// the way.
fn pick_next_locked(reports: &HashMap<AccountId, SyncReport>, now: u64) -> NextCheck {
    let mut target = None;
    let mut wake_time = u64::MAX;
    let mut snapshot = Vec::new();

    for report in reports.values() {
        if report.sync_interval <= 0 {
            continue;
        }
        snapshot.push(SnapshotEntry {
            account_id: report.account_id,
            prev_sync_time: report.prev_sync_time,
        });

        let overdue = report.next_sync_time.map_or(false, |next| next < now);
        if report.prev_sync_time.is_none() || overdue {
            wake_time = 0;
            target = Some(report.account_id);
        } else if let Some(next) = report.next_sync_time {
            if next < wake_time {
                wake_time = next;
                target = Some(report.account_id);
            }
        }
    }

    NextCheck {
        target,
        wake_time,
        snapshot,
    }
}

impl Scheduler {
    pub fn new(
        registry: Arc<SyncRegistry>,
        timer: Arc<dyn WakeTimer>,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn MailBackend>,
    ) -> Self {
        Self {
            registry,
            timer,
            clock,
            backend,
        }
    }

    /// The account to check next and when, without touching the timer.
    pub fn pick_next(&self) -> (Option<AccountId>, u64) {
        let now = self.clock.now();
        self.registry.with_reports(|reports| {
            let next = pick_next_locked(reports, now);
            (next.target, next.wake_time)
        })
    }

    /// Recompute the schedule and arm (or cancel) the wake timer to match.
    ///
    /// The timer is touched while the registry lock is held, so of two
    /// racing rearms the one that saw the newer state also arms last.
    pub fn rearm(&self) {
        if let Err(e) = self.registry.load(LoadMode::FillIfEmpty) {
            warn!("failed to load accounts: {}", e);
        }

        let now = self.clock.now();
        self.registry.with_reports(|reports| {
            let next = pick_next_locked(reports, now);
            match next.target {
                Some(id) => {
                    debug!("rearm: wake at {} for account {}", next.wake_time, id);
                    self.timer.arm(
                        next.wake_time,
                        WakePayload {
                            target: Some(id),
                            snapshot: next.snapshot,
                            watchdog: false,
                        },
                    );
                }
                None => {
                    debug!("rearm: wake cancelled, no account to check");
                    self.timer.cancel();
                }
            }
        });
    }

    /// Start a backend check of the account's inbox if the account is
    /// polled, enabled and has one. Returns whether a check was started.
    pub fn run_one_if_due(&self, id: AccountId) -> bool {
        let report = match self.registry.get(id) {
            Some(report) => report,
            None => {
                debug!("account {} has no sync state, not checking", id);
                return false;
            }
        };
        if report.sync_interval <= 0 || !report.sync_enabled {
            debug!("account {} is not scheduled for checks", id);
            return false;
        }
        let inbox = match self.backend.inbox_of(id) {
            Some(inbox) => inbox,
            None => {
                debug!("account {} has no inbox to check", id);
                return false;
            }
        };
        self.backend.start_check(id, inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::store::sqlite::SqliteAccountStore;
    use crate::store::AccountRow;
    use crate::sync::report::CHECK_INTERVAL_NEVER;
    use crate::timer::ManualTimer;

    fn account(id: AccountId, interval: i64) -> AccountRow {
        AccountRow {
            id,
            email_address: format!("user{}@example.com", id),
            recv_credential_ref: Some(1),
            send_credential_ref: Some(2),
            sync_interval_minutes: interval,
            notify_new_mail: true,
            protocol: "imap".to_string(),
        }
    }

    struct Fixture {
        store: Arc<SqliteAccountStore>,
        registry: Arc<SyncRegistry>,
        scheduler: Scheduler,
        timer: Arc<ManualTimer>,
        clock: Arc<ManualClock>,
        backend: Arc<RecordingBackend>,
    }

    fn fixture(accounts: &[AccountRow]) -> Fixture {
        let store = SqliteAccountStore::in_memory().expect("Failed to create store");
        for account in accounts {
            store.upsert_account(account).expect("Failed to upsert");
        }
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(1_000));
        let timer = Arc::new(ManualTimer::new());
        let backend = Arc::new(RecordingBackend::new());
        let registry = Arc::new(SyncRegistry::new(
            store.clone(),
            clock.clone(),
            &Config::default(),
        ));
        let scheduler = Scheduler::new(
            registry.clone(),
            timer.clone(),
            clock.clone(),
            backend.clone(),
        );
        Fixture {
            store,
            registry,
            scheduler,
            timer,
            clock,
            backend,
        }
    }

    #[test]
    fn test_rearm_checks_never_checked_account_immediately() {
        let f = fixture(&[account(1, 15)]);
        f.scheduler.rearm();

        let (at, payload) = f.timer.armed().expect("Expected an armed wake");
        assert_eq!(at, 0);
        assert_eq!(payload.target, Some(1));
        assert!(!payload.watchdog);
    }

    #[test]
    fn test_never_checked_preempts_account_due_sooner() {
        let f = fixture(&[account(1, 15), account(2, 30)]);
        f.registry.load(LoadMode::FillIfEmpty).expect("load");
        f.registry.update(1, None).expect("report");
        f.clock.advance(1);
        f.scheduler.rearm();

        let (at, payload) = f.timer.armed().expect("Expected an armed wake");
        assert_eq!(at, 0);
        assert_eq!(payload.target, Some(2));
    }

    #[test]
    fn test_overdue_account_preempts_future_one() {
        let f = fixture(&[account(1, 15), account(2, 30)]);
        f.registry.update(1, None).expect("report");
        f.registry.update(2, None).expect("report");

        // Past account 1's due time, before account 2's.
        f.clock.set(1_000_000);
        let (target, wake) = f.scheduler.pick_next();
        assert_eq!(target, Some(1));
        assert_eq!(wake, 0);
    }

    #[test]
    fn test_rearm_picks_soonest_future_check() {
        let f = fixture(&[account(1, 15), account(2, 30)]);
        f.registry.update(1, None).expect("report");
        f.registry.update(2, None).expect("report");
        f.clock.advance(1);
        f.scheduler.rearm();

        let (at, payload) = f.timer.armed().expect("Expected an armed wake");
        assert_eq!(at, 1_000 + 15 * 60 * 1000);
        assert_eq!(payload.target, Some(1));
    }

    #[test]
    fn test_rearm_is_idempotent() {
        let f = fixture(&[account(1, 15)]);
        f.registry.update(1, None).expect("report");
        f.clock.advance(1);

        f.scheduler.rearm();
        let first = f.timer.armed().expect("Expected an armed wake");
        f.scheduler.rearm();
        let second = f.timer.armed().expect("Expected an armed wake");

        assert_eq!(first.0, second.0);
        assert_eq!(first.1.target, second.1.target);
        assert_eq!(f.timer.arm_count(), 2);
    }

    #[test]
    fn test_rearm_cancels_with_nothing_to_check() {
        let f = fixture(&[account(1, CHECK_INTERVAL_NEVER)]);
        f.scheduler.rearm();

        assert!(f.timer.armed().is_none());
        assert_eq!(f.timer.cancel_count(), 1);
    }

    #[test]
    fn test_snapshot_covers_polled_accounts_only() {
        let f = fixture(&[account(1, 15), account(2, CHECK_INTERVAL_NEVER), account(3, 30)]);
        f.registry.load(LoadMode::FillIfEmpty).expect("load");
        f.registry.update(3, None).expect("report");
        f.scheduler.rearm();

        let (_, payload) = f.timer.armed().expect("Expected an armed wake");
        let mut ids: Vec<AccountId> = payload.snapshot.iter().map(|e| e.account_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);

        let entry = payload
            .snapshot
            .iter()
            .find(|e| e.account_id == 3)
            .expect("Expected snapshot entry for account 3");
        assert_eq!(entry.prev_sync_time, Some(1_000));
    }

    #[test]
    fn test_run_one_if_due_starts_check() {
        let f = fixture(&[account(1, 15)]);
        f.backend.add_inbox(1, 10);
        f.registry.load(LoadMode::FillIfEmpty).expect("load");

        assert!(f.scheduler.run_one_if_due(1));
        assert_eq!(f.backend.started_checks(), vec![(1, 10)]);
    }

    #[test]
    fn test_run_one_if_due_refuses_unscheduled_accounts() {
        let f = fixture(&[account(1, CHECK_INTERVAL_NEVER), account(2, 15)]);
        f.backend.add_inbox(1, 10);
        f.registry.load(LoadMode::FillIfEmpty).expect("load");

        // Never-polled account, missing inbox, unknown id.
        assert!(!f.scheduler.run_one_if_due(1));
        assert!(!f.scheduler.run_one_if_due(2));
        assert!(!f.scheduler.run_one_if_due(99));
        assert!(f.backend.started_checks().is_empty());
    }

    #[test]
    fn test_run_one_if_due_respects_sync_enabled() {
        let f = fixture(&[account(1, 15)]);
        f.backend.add_inbox(1, 10);
        f.store.set_auto_sync(1, false).expect("Failed to set");
        f.registry.load(LoadMode::FillIfEmpty).expect("load");

        assert!(!f.scheduler.run_one_if_due(1));
        assert!(f.backend.started_checks().is_empty());
    }
}
