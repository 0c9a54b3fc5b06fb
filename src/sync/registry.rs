//! In-memory registry of per-account sync state
//!
//! The registry is the single holder of [`SyncReport`]s and the
//! serialization point for everything that touches them. It is filled from
//! the account store on demand; store queries run with the lock released and
//! results are published under a short lock, so two racing loads settle on
//! last-writer-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::store::{AccountRow, AccountStore};
use crate::sync::report::{SyncReport, CHECK_INTERVAL_NEVER};
use crate::sync::snapshot::SnapshotEntry;
use crate::types::error::Result;
use crate::types::AccountId;

/// How `load` treats reports already in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Load every account, but only if the registry is empty.
    FillIfEmpty,
    /// Throw the registry away and reload every account.
    ForceReset,
    /// Load a single account if it has no report yet.
    LoadOne(AccountId),
}

pub struct SyncRegistry {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    config: Config,
    reports: Mutex<HashMap<AccountId, SyncReport>>,
}

impl SyncRegistry {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            clock,
            config: config.clone(),
            reports: Mutex::new(HashMap::new()),
        }
    }

    fn lock_reports(&self) -> MutexGuard<'_, HashMap<AccountId, SyncReport>> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build a fresh report for a stored account, or `None` when the row is
    /// not fit to schedule.
    fn build_report(&self, account: &AccountRow) -> Result<Option<SyncReport>> {
        // Half-created rows left behind by an aborted setup are skipped;
        // properly formed accounts always pass.
        if !account.is_schedulable() {
            debug!("skipping malformed account {}", account.id);
            return Ok(None);
        }

        let mut interval = account.sync_interval_minutes;
        if !self.config.is_polled_protocol(&account.protocol) {
            // Push-style accounts are woken by their transport, never polled.
            interval = CHECK_INTERVAL_NEVER;
        } else if self.config.force_one_minute_refresh && interval >= 0 {
            interval = 1;
        }

        let sync_enabled = self.store.auto_sync_enabled(&account.email_address)?;

        Ok(Some(SyncReport {
            account_id: account.id,
            prev_sync_time: None,
            next_sync_time: if interval > 0 { Some(0) } else { None },
            unseen_message_count: 0,
            last_unseen_message_count: 0,
            sync_interval: interval,
            notify: account.notify_new_mail,
            sync_enabled,
        }))
    }

    fn build_reports(&self, accounts: &[AccountRow]) -> Result<Vec<SyncReport>> {
        let mut fresh = Vec::new();
        for account in accounts {
            if let Some(report) = self.build_report(account)? {
                fresh.push(report);
            }
        }
        Ok(fresh)
    }

    /// Fill the registry from the account store according to `mode`.
    pub fn load(&self, mode: LoadMode) -> Result<()> {
        // Pre-check under a short lock so a populated registry is not
        // reloaded behind the driver's back.
        {
            let reports = self.lock_reports();
            match mode {
                LoadMode::FillIfEmpty if !reports.is_empty() => return Ok(()),
                LoadMode::LoadOne(id) if reports.contains_key(&id) => return Ok(()),
                _ => {}
            }
        }

        if self.config.force_one_minute_refresh {
            warn!("one-minute refresh enabled");
        }

        let accounts = match mode {
            LoadMode::LoadOne(id) => self.store.load_account(id)?.into_iter().collect(),
            _ => self.store.load_accounts()?,
        };
        let fresh = self.build_reports(&accounts)?;

        let mut reports = self.lock_reports();
        match mode {
            LoadMode::ForceReset => {
                reports.clear();
                for report in fresh {
                    reports.insert(report.account_id, report);
                }
            }
            LoadMode::FillIfEmpty => {
                // Re-checked: another load may have won the race meanwhile.
                if reports.is_empty() {
                    for report in fresh {
                        reports.insert(report.account_id, report);
                    }
                }
            }
            LoadMode::LoadOne(_) => {
                for report in fresh {
                    reports.entry(report.account_id).or_insert(report);
                }
            }
        }

        Ok(())
    }

    /// Rebuild every report from the store, carrying each surviving
    /// account's last check time over and recomputing its due time from it.
    /// Message counts start over from zero.
    pub fn refresh(&self) -> Result<()> {
        if self.config.force_one_minute_refresh {
            warn!("one-minute refresh enabled");
        }

        let accounts = self.store.load_accounts()?;
        let fresh = self.build_reports(&accounts)?;

        let mut reports = self.lock_reports();
        let old = std::mem::take(&mut *reports);
        for mut report in fresh {
            if let Some(prev) = old.get(&report.account_id).and_then(|r| r.prev_sync_time) {
                report.reschedule_from(prev);
            }
            reports.insert(report.account_id, report);
        }

        Ok(())
    }

    /// Record a completed check for one account, optionally with a fresh
    /// unseen count. Returns the updated report, or `None` when the account
    /// no longer exists.
    pub fn update(&self, id: AccountId, unseen: Option<u32>) -> Option<SyncReport> {
        // Restore the report first if it was lost to a process restart.
        if let Err(e) = self.load(LoadMode::LoadOne(id)) {
            warn!("failed to load account {}: {}", id, e);
        }

        let now = self.clock.now();
        let mut reports = self.lock_reports();
        let report = match reports.get_mut(&id) {
            Some(report) => report,
            None => {
                debug!("no account to update for id {}", id);
                return None;
            }
        };

        report.reschedule_from(now);
        if let Some(count) = unseen {
            report.unseen_message_count = count;
        }
        debug!(
            "update account {}: unseen {}, interval {}m",
            id, report.unseen_message_count, report.sync_interval
        );
        Some(report.clone())
    }

    /// Fill never-checked reports from a wake payload snapshot. Reports that
    /// already carry a check time keep it.
    pub fn restore_from_snapshot(&self, snapshot: &[SnapshotEntry]) {
        if let Err(e) = self.load(LoadMode::FillIfEmpty) {
            warn!("failed to load accounts: {}", e);
        }
        if snapshot.is_empty() {
            debug!("no snapshot data to restore");
            return;
        }

        let mut reports = self.lock_reports();
        for entry in snapshot {
            if let Some(report) = reports.get_mut(&entry.account_id) {
                if report.prev_sync_time.is_none() {
                    if let Some(prev) = entry.prev_sync_time {
                        report.reschedule_from(prev);
                    }
                }
            }
        }
    }

    /// Snapshot of one account's report.
    pub fn get(&self, id: AccountId) -> Option<SyncReport> {
        self.lock_reports().get(&id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_reports().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock_reports().len()
    }

    /// Run `f` with the report map locked. Scheduling and notification
    /// bookkeeping use this to read and mutate atomically.
    pub(crate) fn with_reports<R>(
        &self,
        f: impl FnOnce(&mut HashMap<AccountId, SyncReport>) -> R,
    ) -> R {
        f(&mut self.lock_reports())
    }

    /// Zero the in-memory message counts for one account, or for all.
    pub(crate) fn zero_counts(&self, target: Option<AccountId>) {
        let mut reports = self.lock_reports();
        match target {
            Some(id) => {
                if let Some(report) = reports.get_mut(&id) {
                    report.unseen_message_count = 0;
                    report.last_unseen_message_count = 0;
                }
            }
            None => {
                for report in reports.values_mut() {
                    report.unseen_message_count = 0;
                    report.last_unseen_message_count = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::sqlite::SqliteAccountStore;

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

    fn store_with(accounts: &[AccountRow]) -> Arc<SqliteAccountStore> {
        let store = SqliteAccountStore::in_memory().expect("Failed to create store");
        for account in accounts {
            store.upsert_account(account).expect("Failed to upsert");
        }
        Arc::new(store)
    }

    fn registry(store: Arc<SqliteAccountStore>, clock: Arc<ManualClock>) -> SyncRegistry {
        SyncRegistry::new(store, clock, &Config::default())
    }

    #[test]
    fn test_fill_if_empty_loads_once() {
        let store = store_with(&[account(1, 15)]);
        let reg = registry(store.clone(), Arc::new(ManualClock::new(0)));

        reg.load(LoadMode::FillIfEmpty).expect("load");
        assert_eq!(reg.len(), 1);

        store.upsert_account(&account(2, 30)).expect("upsert");
        reg.load(LoadMode::FillIfEmpty).expect("load");
        assert_eq!(reg.len(), 1);

        reg.load(LoadMode::ForceReset).expect("load");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_load_one_keeps_existing_report() {
        let store = store_with(&[account(1, 15)]);
        let clock = Arc::new(ManualClock::new(2_000));
        let reg = registry(store, clock);

        reg.update(1, Some(4)).expect("Expected report for account 1");
        reg.load(LoadMode::LoadOne(1)).expect("load");

        let report = reg.get(1).expect("Expected report for account 1");
        assert_eq!(report.prev_sync_time, Some(2_000));
        assert_eq!(report.unseen_message_count, 4);
    }

    #[test]
    fn test_malformed_accounts_excluded() {
        let mut no_email = account(1, 15);
        no_email.email_address = String::new();
        let mut no_recv = account(2, 15);
        no_recv.recv_credential_ref = None;
        let mut no_send = account(3, 15);
        no_send.send_credential_ref = None;

        let store = store_with(&[no_email, no_recv, no_send, account(4, 15)]);
        let reg = registry(store, Arc::new(ManualClock::new(0)));

        reg.load(LoadMode::FillIfEmpty).expect("load");
        assert_eq!(reg.len(), 1);
        assert!(reg.get(4).is_some());
    }

    #[test]
    fn test_fresh_reports_due_immediately_or_never() {
        let store = store_with(&[account(1, 15), account(2, CHECK_INTERVAL_NEVER)]);
        let reg = registry(store, Arc::new(ManualClock::new(0)));
        reg.load(LoadMode::FillIfEmpty).expect("load");

        let polled = reg.get(1).expect("Expected report for account 1");
        assert_eq!(polled.prev_sync_time, None);
        assert_eq!(polled.next_sync_time, Some(0));

        let manual = reg.get(2).expect("Expected report for account 2");
        assert_eq!(manual.next_sync_time, None);
    }

    #[test]
    fn test_push_protocol_is_never_polled() {
        let mut push = account(1, 15);
        push.protocol = "push".to_string();
        let store = store_with(&[push]);
        let reg = registry(store, Arc::new(ManualClock::new(0)));
        reg.load(LoadMode::FillIfEmpty).expect("load");

        let report = reg.get(1).expect("Expected report for account 1");
        assert_eq!(report.sync_interval, CHECK_INTERVAL_NEVER);
        assert_eq!(report.next_sync_time, None);
    }

    #[test]
    fn test_one_minute_refresh_overrides_interval() {
        let store = store_with(&[account(1, 60), account(2, CHECK_INTERVAL_NEVER)]);
        let config = Config {
            force_one_minute_refresh: true,
            ..Config::default()
        };
        let reg = SyncRegistry::new(store, Arc::new(ManualClock::new(0)), &config);
        reg.load(LoadMode::FillIfEmpty).expect("load");

        assert_eq!(reg.get(1).expect("report").sync_interval, 1);
        // Accounts set to never stay that way.
        assert_eq!(
            reg.get(2).expect("report").sync_interval,
            CHECK_INTERVAL_NEVER
        );
    }

    #[test]
    fn test_sync_enabled_read_from_store() {
        let store = store_with(&[account(1, 15)]);
        store.set_auto_sync(1, false).expect("Failed to set");
        let reg = registry(store, Arc::new(ManualClock::new(0)));
        reg.load(LoadMode::FillIfEmpty).expect("load");

        assert!(!reg.get(1).expect("report").sync_enabled);
    }

    #[test]
    fn test_update_records_check_time_and_count() {
        let store = store_with(&[account(1, 15)]);
        let clock = Arc::new(ManualClock::new(5_000));
        let reg = registry(store, clock.clone());

        let report = reg.update(1, Some(7)).expect("Expected report for account 1");
        assert_eq!(report.prev_sync_time, Some(5_000));
        assert_eq!(report.next_sync_time, Some(5_000 + 15 * 60 * 1000));
        assert_eq!(report.unseen_message_count, 7);

        // A later update without a count keeps the old one.
        clock.advance(1_000);
        let report = reg.update(1, None).expect("Expected report for account 1");
        assert_eq!(report.prev_sync_time, Some(6_000));
        assert_eq!(report.unseen_message_count, 7);
    }

    #[test]
    fn test_update_unknown_account_returns_none() {
        let store = store_with(&[]);
        let reg = registry(store, Arc::new(ManualClock::new(0)));
        assert!(reg.update(99, Some(1)).is_none());
    }

    #[test]
    fn test_refresh_carries_check_times_but_resets_counts() {
        let store = store_with(&[account(1, 15), account(2, 15)]);
        let clock = Arc::new(ManualClock::new(3_000));
        let reg = registry(store.clone(), clock);

        reg.update(1, Some(9)).expect("Expected report for account 1");
        store.delete_account(2).expect("Failed to delete");
        store.upsert_account(&account(3, 30)).expect("Failed to upsert");

        reg.refresh().expect("refresh");

        let carried = reg.get(1).expect("Expected report for account 1");
        assert_eq!(carried.prev_sync_time, Some(3_000));
        assert_eq!(carried.next_sync_time, Some(3_000 + 15 * 60 * 1000));
        assert_eq!(carried.unseen_message_count, 0);

        assert!(reg.get(2).is_none());
        let fresh = reg.get(3).expect("Expected report for account 3");
        assert_eq!(fresh.prev_sync_time, None);
    }

    #[test]
    fn test_restore_fills_only_never_checked_reports() {
        let store = store_with(&[account(1, 15), account(2, 15)]);
        let clock = Arc::new(ManualClock::new(9_000));
        let reg = registry(store, clock);

        reg.load(LoadMode::FillIfEmpty).expect("load");
        reg.update(1, Some(2)).expect("Expected report for account 1");
        reg.restore_from_snapshot(&[
            SnapshotEntry {
                account_id: 1,
                prev_sync_time: Some(100),
            },
            SnapshotEntry {
                account_id: 2,
                prev_sync_time: Some(200),
            },
            SnapshotEntry {
                account_id: 77,
                prev_sync_time: Some(300),
            },
        ]);

        // Already-checked reports keep their own time.
        assert_eq!(
            reg.get(1).expect("report").prev_sync_time,
            Some(9_000)
        );
        let restored = reg.get(2).expect("report");
        assert_eq!(restored.prev_sync_time, Some(200));
        assert_eq!(restored.next_sync_time, Some(200 + 15 * 60 * 1000));
        assert!(reg.get(77).is_none());
    }

    #[test]
    fn test_restore_with_empty_snapshot_still_loads() {
        let store = store_with(&[account(1, 15)]);
        let reg = registry(store, Arc::new(ManualClock::new(0)));

        reg.restore_from_snapshot(&[]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_zero_counts_for_one_and_all() {
        let store = store_with(&[account(1, 15), account(2, 15)]);
        let reg = registry(store, Arc::new(ManualClock::new(1_000)));
        reg.update(1, Some(4)).expect("report");
        reg.update(2, Some(6)).expect("report");

        reg.zero_counts(Some(1));
        assert_eq!(reg.get(1).expect("report").unseen_message_count, 0);
        assert_eq!(reg.get(2).expect("report").unseen_message_count, 6);

        reg.zero_counts(None);
        assert_eq!(reg.get(2).expect("report").unseen_message_count, 0);
    }
}
