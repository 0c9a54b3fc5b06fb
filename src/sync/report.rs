//! Per-account scheduling state

use serde::{Deserialize, Serialize};

use crate::types::AccountId;

/// Interval value meaning the account is never checked on a schedule.
pub const CHECK_INTERVAL_NEVER: i64 = -1;

/// Scheduling state for one account.
///
/// Times are engine-clock milliseconds. `prev_sync_time` of `None` means the
/// account was never checked; `next_sync_time` of `None` means no check is
/// scheduled, `Some(0)` means one is due immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub account_id: AccountId,
    pub prev_sync_time: Option<u64>,
    pub next_sync_time: Option<u64>,
    /// Unseen messages in the inbox after the most recent completed check.
    pub unseen_message_count: u32,
    /// Unseen count at the time of the last new-mail notification.
    pub last_unseen_message_count: u32,
    /// Minutes between checks; zero or negative means never.
    pub sync_interval: i64,
    /// Whether the user wants new-mail notifications for this account.
    pub notify: bool,
    /// Whether automatic syncing is turned on for this account.
    pub sync_enabled: bool,
}

impl SyncReport {
    /// How many of the unseen messages arrived since the last notification.
    /// Negative when messages were read elsewhere in between.
    pub fn just_fetched(&self) -> i64 {
        self.unseen_message_count as i64 - self.last_unseen_message_count as i64
    }

    /// Record a check at `prev` and, for polled accounts, push the next one
    /// a full interval out.
    pub(crate) fn reschedule_from(&mut self, prev: u64) {
        self.prev_sync_time = Some(prev);
        if self.sync_interval > 0 {
            self.next_sync_time = Some(prev + self.sync_interval as u64 * 60 * 1000);
        }
    }
}
