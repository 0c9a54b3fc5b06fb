//! Account storage
//!
//! ## Module Organization
//!
//! - `sqlite`: SQLite-backed account store
//!
//! The scheduler reads accounts through the [`AccountStore`] trait so tests
//! can substitute an in-memory implementation.

pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::types::error::Result;
use crate::types::AccountId;

/// A configured mail account as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: AccountId,
    pub email_address: String,
    /// Reference to stored credentials for the receiving server, if set up.
    pub recv_credential_ref: Option<i64>,
    /// Reference to stored credentials for the sending server, if set up.
    pub send_credential_ref: Option<i64>,
    /// Minutes between checks; zero or negative means never poll.
    pub sync_interval_minutes: i64,
    pub notify_new_mail: bool,
    /// Receiving protocol, e.g. "imap", "pop3" or "push".
    pub protocol: String,
}

impl AccountRow {
    /// Whether the row is complete enough to schedule. Rows missing an
    /// address or a credential reference are leftovers from an aborted
    /// setup flow and must never be checked.
    pub fn is_schedulable(&self) -> bool {
        !self.email_address.is_empty()
            && self.recv_credential_ref.is_some()
            && self.send_credential_ref.is_some()
    }
}

/// Read and maintenance access to configured accounts and their persisted
/// new-message counts.
pub trait AccountStore: Send + Sync {
    /// All configured accounts.
    fn load_accounts(&self) -> Result<Vec<AccountRow>>;

    /// A single account, or `None` when the id is unknown.
    fn load_account(&self, id: AccountId) -> Result<Option<AccountRow>>;

    /// Whether automatic syncing is turned on for the given address.
    /// Addresses the store does not know count as disabled.
    fn auto_sync_enabled(&self, email_address: &str) -> Result<bool>;

    /// Persisted new-message count, or `None` when the id is unknown.
    fn new_message_count(&self, id: AccountId) -> Result<Option<u32>>;

    /// Zero the persisted count for one account, or for all of them.
    fn clear_new_message_count(&self, target: Option<AccountId>) -> Result<()>;

    /// Remove an account outright.
    fn delete_account(&self, id: AccountId) -> Result<()>;
}
