//! Mail backend seam
//!
//! The scheduler decides when to check an account; the backend owns the
//! protocol work. Checks run on the backend's own runtime and report back
//! through [`SyncHandle`](crate::sync::driver::SyncHandle).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{AccountId, MailboxId};

/// Protocol-side operations the scheduler can start.
pub trait MailBackend: Send + Sync {
    /// The account's inbox, or `None` when the account has no inbox yet
    /// (for instance, its folder list was never fetched).
    fn inbox_of(&self, account_id: AccountId) -> Option<MailboxId>;

    /// Kick off a check of the given inbox without blocking. Returns whether
    /// the check was actually started; a started check must eventually be
    /// reported complete on the driver handle.
    fn start_check(&self, account_id: AccountId, inbox_id: MailboxId) -> bool;

    /// Flush queued outgoing messages for the account.
    fn send_pending(&self, account_id: AccountId);
}

/// Recording backend (for testing)
///
/// Accounts registered with an inbox accept checks; every started check and
/// send request is recorded for inspection.
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    inboxes: HashMap<AccountId, MailboxId>,
    refuse_checks: bool,
    started: Vec<(AccountId, MailboxId)>,
    sent: Vec<AccountId>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbox(self, account_id: AccountId, mailbox_id: MailboxId) -> Self {
        self.add_inbox(account_id, mailbox_id);
        self
    }

    pub fn add_inbox(&self, account_id: AccountId, mailbox_id: MailboxId) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inboxes
            .insert(account_id, mailbox_id);
    }

    /// Make subsequent `start_check` calls fail.
    pub fn refuse_checks(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .refuse_checks = true;
    }

    pub fn started_checks(&self) -> Vec<(AccountId, MailboxId)> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .started
            .clone()
    }

    pub fn sent_pending(&self) -> Vec<AccountId> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }
}

impl MailBackend for RecordingBackend {
    fn inbox_of(&self, account_id: AccountId) -> Option<MailboxId> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inboxes
            .get(&account_id)
            .copied()
    }

    fn start_check(&self, account_id: AccountId, inbox_id: MailboxId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.refuse_checks {
            return false;
        }
        state.started.push((account_id, inbox_id));
        true
    }

    fn send_pending(&self, account_id: AccountId) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .push(account_id);
    }
}
