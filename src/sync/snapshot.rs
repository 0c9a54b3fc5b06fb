//! Wake-timer payload and the crash-tolerant schedule snapshot
//!
//! Every armed wake carries the last-known check time of each tracked
//! account. If the process dies between arming and firing, the wake that
//! eventually arrives restores those times without a store query.

use serde::{Deserialize, Serialize};

use crate::types::error::Result;
use crate::types::AccountId;

/// Last-known check time for one account, as carried on a wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub account_id: AccountId,
    /// `None` when the account had never been checked when the wake was armed.
    pub prev_sync_time: Option<u64>,
}

/// Payload attached to an armed wake timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakePayload {
    /// Account to check; `None` means whichever is due.
    pub target: Option<AccountId>,

    /// Last-known check times for every scheduled account.
    #[serde(default)]
    pub snapshot: Vec<SnapshotEntry>,

    /// Marks a watchdog recovery wake rather than a scheduled one.
    #[serde(default)]
    pub watchdog: bool,
}

impl WakePayload {
    /// Payload for an explicit check request. Carries no snapshot; the
    /// registry is loaded from the store if it is empty.
    pub fn check(target: Option<AccountId>) -> Self {
        Self {
            target,
            snapshot: Vec::new(),
            watchdog: false,
        }
    }

    /// Payload for a watchdog recovery wake.
    pub fn watchdog(account_id: AccountId) -> Self {
        Self {
            target: Some(account_id),
            snapshot: Vec::new(),
            watchdog: true,
        }
    }

    /// Encode for transport on an external alarm primitive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload delivered by an external alarm primitive.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
