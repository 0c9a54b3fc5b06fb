//! Sync driver loop
//!
//! One driver task owns every scheduling decision. Timer wakes, backend
//! completion reports and app requests all reach it as [`SyncCommand`]s on
//! a single channel, so report mutation and rearming never race each other.
//! Notification events leave on their own channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::MailBackend;
use crate::clock::Clock;
use crate::config::Config;
use crate::store::AccountStore;
use crate::sync::notify::{NotificationCoalescer, NotificationEvent};
use crate::sync::registry::SyncRegistry;
use crate::sync::scheduler::Scheduler;
use crate::sync::snapshot::WakePayload;
use crate::sync::watchdog::Watchdog;
use crate::timer::WakeTimer;
use crate::types::{AccountId, MailboxId};

/// Everything the driver can be asked to do.
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// The wake timer fired, or an immediate check was requested.
    Wake(WakePayload),
    /// Reload accounts and recompute the schedule.
    Reschedule,
    /// Stop all scheduled checking until the next reschedule.
    CancelAll,
    /// Surface the persisted new-message count for an account.
    Notify { account_id: AccountId },
    /// Flush the account's outbox.
    SendPending { account_id: AccountId },
    /// Remove every account speaking the given protocol.
    DeleteProtocol { protocol: String },
    /// Progress of a running check, 0 to 100.
    CheckProgress {
        account_id: AccountId,
        mailbox_id: MailboxId,
        progress: u8,
        error: Option<String>,
    },
    /// A started check finished.
    CheckComplete {
        account_id: AccountId,
        new_message_count: Option<u32>,
        error: Option<String>,
    },
    /// Allow or forbid starting checks in the background.
    SetBackgroundChecks(bool),
    /// Zero new-message counts and withdraw notifications.
    ResetCounts { target: Option<AccountId> },
    Shutdown,
}

/// Cloneable handle for talking to a running driver.
#[derive(Clone)]
pub struct SyncHandle {
    commands: flume::Sender<SyncCommand>,
}

impl SyncHandle {
    pub fn new(commands: flume::Sender<SyncCommand>) -> Self {
        Self { commands }
    }

    /// Check one account now, or just recompute the schedule when `target`
    /// is `None`.
    pub fn request_check(&self, target: Option<AccountId>) {
        let _ = self
            .commands
            .send(SyncCommand::Wake(WakePayload::check(target)));
    }

    pub fn request_reschedule(&self) {
        let _ = self.commands.send(SyncCommand::Reschedule);
    }

    pub fn request_cancel_all(&self) {
        let _ = self.commands.send(SyncCommand::CancelAll);
    }

    pub fn request_notify(&self, account_id: AccountId) {
        let _ = self.commands.send(SyncCommand::Notify { account_id });
    }

    pub fn request_send_pending(&self, account_id: AccountId) {
        let _ = self.commands.send(SyncCommand::SendPending { account_id });
    }

    pub fn request_delete_accounts_of_protocol(&self, protocol: &str) {
        let _ = self.commands.send(SyncCommand::DeleteProtocol {
            protocol: protocol.to_string(),
        });
    }

    pub fn report_check_progress(
        &self,
        account_id: AccountId,
        mailbox_id: MailboxId,
        progress: u8,
        error: Option<String>,
    ) {
        let _ = self.commands.send(SyncCommand::CheckProgress {
            account_id,
            mailbox_id,
            progress,
            error,
        });
    }

    pub fn report_check_complete(
        &self,
        account_id: AccountId,
        new_message_count: Option<u32>,
        error: Option<String>,
    ) {
        let _ = self.commands.send(SyncCommand::CheckComplete {
            account_id,
            new_message_count,
            error,
        });
    }

    pub fn set_background_checks(&self, enabled: bool) {
        let _ = self
            .commands
            .send(SyncCommand::SetBackgroundChecks(enabled));
    }

    pub fn reset_new_message_counts(&self, target: Option<AccountId>) {
        let _ = self.commands.send(SyncCommand::ResetCounts { target });
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SyncCommand::Shutdown);
    }
}

/// The driver task. Create it, hand out the notification receiver, then
/// spawn [`run`](SyncDriver::run) on the runtime.
pub struct SyncDriver {
    registry: Arc<SyncRegistry>,
    scheduler: Scheduler,
    watchdog: Watchdog,
    coalescer: NotificationCoalescer,
    store: Arc<dyn AccountStore>,
    backend: Arc<dyn MailBackend>,
    timer: Arc<dyn WakeTimer>,
    commands: flume::Receiver<SyncCommand>,
    running: Arc<AtomicBool>,
    background_checks: bool,
    /// Accounts with a started check that has not reported back yet.
    in_flight: HashSet<AccountId>,
}

impl SyncDriver {
    pub fn new(
        config: &Config,
        store: Arc<dyn AccountStore>,
        backend: Arc<dyn MailBackend>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn WakeTimer>,
        commands: flume::Receiver<SyncCommand>,
    ) -> (Self, flume::Receiver<NotificationEvent>) {
        let registry = Arc::new(SyncRegistry::new(store.clone(), clock.clone(), config));
        let scheduler = Scheduler::new(
            registry.clone(),
            timer.clone(),
            clock.clone(),
            backend.clone(),
        );
        let watchdog = Watchdog::new(timer.clone(), clock);
        let (coalescer, notifications) =
            NotificationCoalescer::new(registry.clone(), store.clone());

        let driver = Self {
            registry,
            scheduler,
            watchdog,
            coalescer,
            store,
            backend,
            timer,
            commands,
            running: Arc::new(AtomicBool::new(false)),
            background_checks: config.background_checks,
            in_flight: HashSet::new(),
        };
        (driver, notifications)
    }

    /// Flag that flips while the driver loop is alive.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Drive the command loop until shutdown or until every handle is gone.
    pub async fn run(mut self) {
        self.running.store(true, Ordering::SeqCst);
        info!("sync driver started");

        while let Ok(command) = self.commands.recv_async().await {
            if matches!(command, SyncCommand::Shutdown) {
                break;
            }
            self.handle_command(command);
        }

        self.timer.cancel();
        self.running.store(false, Ordering::SeqCst);
        info!("sync driver stopped");
    }

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Wake(payload) => self.handle_wake(payload),
            SyncCommand::Reschedule => {
                debug!("reschedule requested");
                self.coalescer.withdraw(None);
                if let Err(e) = self.registry.refresh() {
                    warn!("failed to refresh sync state: {}", e);
                }
                self.scheduler.rearm();
            }
            SyncCommand::CancelAll => {
                debug!("cancelling scheduled checks");
                self.timer.cancel();
            }
            SyncCommand::Notify { account_id } => self.handle_notify(account_id),
            SyncCommand::SendPending { account_id } => {
                debug!("sending pending messages for account {}", account_id);
                self.backend.send_pending(account_id);
            }
            SyncCommand::DeleteProtocol { protocol } => self.handle_delete_protocol(&protocol),
            SyncCommand::CheckProgress {
                account_id,
                mailbox_id,
                progress,
                error,
            } => self.handle_check_progress(account_id, mailbox_id, progress, error),
            SyncCommand::CheckComplete {
                account_id,
                new_message_count,
                error,
            } => self.handle_check_complete(account_id, new_message_count, error),
            SyncCommand::SetBackgroundChecks(enabled) => {
                info!(
                    "background checks {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                self.background_checks = enabled;
            }
            SyncCommand::ResetCounts { target } => self.coalescer.reset(target),
            SyncCommand::Shutdown => {}
        }
    }

    fn handle_wake(&mut self, payload: WakePayload) {
        if payload.watchdog {
            if let Some(id) = payload.target {
                self.handle_watchdog_wake(id);
            }
            return;
        }

        // Refill check times lost to a process restart before scheduling
        // decisions are made from them.
        self.registry.restore_from_snapshot(&payload.snapshot);

        let target = payload.target;
        debug!("wake: check mail for {:?}", target);
        if let Some(id) = target {
            self.watchdog.arm(id);
        }

        let mut started = false;
        if let Some(id) = target {
            if self.background_checks {
                started = self.scheduler.run_one_if_due(id);
                if started {
                    self.in_flight.insert(id);
                }
            } else {
                debug!("background checks are off, not checking account {}", id);
            }
        }

        if !started {
            // Pretend the account updated so the schedule cannot spin on it,
            // then hand the timer slot back to the main schedule.
            if let Some(id) = target {
                self.registry.update(id, Some(0));
            }
            self.scheduler.rearm();
        }
    }

    fn handle_watchdog_wake(&mut self, account_id: AccountId) {
        if self.in_flight.remove(&account_id) {
            warn!("check of account {} never completed", account_id);
            self.registry.update(account_id, None);
        }
        self.scheduler.rearm();
    }

    fn handle_check_progress(
        &mut self,
        account_id: AccountId,
        mailbox_id: MailboxId,
        progress: u8,
        error: Option<String>,
    ) {
        if error.is_none() && progress < 100 {
            return;
        }
        // Only the inbox matters for scheduling.
        if self.backend.inbox_of(account_id) != Some(mailbox_id) {
            return;
        }
        if let Some(e) = error {
            debug!("inbox check of account {} failed: {}", account_id, e);
            self.registry.update(account_id, None);
        }
    }

    fn handle_check_complete(
        &mut self,
        account_id: AccountId,
        new_message_count: Option<u32>,
        error: Option<String>,
    ) {
        self.in_flight.remove(&account_id);

        match error {
            Some(e) => {
                debug!("check of account {} failed: {}", account_id, e);
                self.registry.update(account_id, None);
            }
            None => {
                self.registry.update(account_id, new_message_count);
                if new_message_count.map_or(false, |n| n > 0) {
                    self.coalescer.on_count_updated(account_id);
                }
            }
        }
        self.scheduler.rearm();
    }

    fn handle_notify(&mut self, account_id: AccountId) {
        match self.store.new_message_count(account_id) {
            Ok(Some(count)) => {
                debug!(
                    "account {} has {} persisted new messages",
                    account_id, count
                );
                self.registry.update(account_id, Some(count));
                self.coalescer.on_count_updated(account_id);
            }
            Ok(None) => debug!("no account {} to notify for", account_id),
            Err(e) => warn!("failed to read new message count: {}", e),
        }
        self.scheduler.rearm();
    }

    fn handle_delete_protocol(&mut self, protocol: &str) {
        let accounts = match self.store.load_accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("failed to load accounts: {}", e);
                return;
            }
        };

        for account in accounts.iter().filter(|a| a.protocol == protocol) {
            info!("deleting account {} ({})", account.id, account.email_address);
            if let Err(e) = self.store.delete_account(account.id) {
                warn!("failed to delete account {}: {}", account.id, e);
            }
        }

        if let Err(e) = self.registry.refresh() {
            warn!("failed to refresh sync state: {}", e);
        }
        self.scheduler.rearm();
    }
}
