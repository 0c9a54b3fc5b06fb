//! New-mail notification bookkeeping
//!
//! Decides when a completed check warrants telling the user and emits
//! [`NotificationEvent`]s on a channel for the embedding app to render.
//! The same unseen mail is never announced as new twice: the count shown
//! on the last notification is remembered per account.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::AccountStore;
use crate::sync::registry::SyncRegistry;
use crate::types::AccountId;

/// Event emitted towards the notification renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// An account has unseen mail.
    NewMail {
        account_id: AccountId,
        /// Unseen messages in the inbox right now.
        unseen: u32,
        /// How many of those arrived since the last notification; zero or
        /// negative for a reminder that adds nothing new.
        just_fetched: i64,
    },
    /// Withdraw the notification for one account, or all of them.
    Withdraw { target: Option<AccountId> },
}

pub struct NotificationCoalescer {
    registry: Arc<SyncRegistry>,
    store: Arc<dyn AccountStore>,
    events: flume::Sender<NotificationEvent>,
}

impl NotificationCoalescer {
    pub fn new(
        registry: Arc<SyncRegistry>,
        store: Arc<dyn AccountStore>,
    ) -> (Self, flume::Receiver<NotificationEvent>) {
        let (events, rx) = flume::unbounded();
        (
            Self {
                registry,
                store,
                events,
            },
            rx,
        )
    }

    /// Emit a new-mail event for the account if its report says the user
    /// should hear about it. The decision and the bookkeeping happen under
    /// the registry lock; the event is sent after it is released.
    pub fn on_count_updated(&self, account_id: AccountId) {
        let pending = self.registry.with_reports(|reports| {
            let report = reports.get_mut(&account_id)?;
            if report.unseen_message_count == 0 || !report.notify {
                return None;
            }
            let unseen = report.unseen_message_count;
            let just_fetched = report.just_fetched();
            report.last_unseen_message_count = unseen;
            Some((unseen, just_fetched))
        });

        if let Some((unseen, just_fetched)) = pending {
            debug!(
                "account {} has {} unseen ({} new)",
                account_id, unseen, just_fetched
            );
            let _ = self.events.send(NotificationEvent::NewMail {
                account_id,
                unseen,
                just_fetched,
            });
        }
    }

    /// Zero the message counts for one account or all, withdraw their
    /// notifications and clear the persisted counts.
    pub fn reset(&self, target: Option<AccountId>) {
        self.registry.zero_counts(target);
        let _ = self.events.send(NotificationEvent::Withdraw { target });
        if let Err(e) = self.store.clear_new_message_count(target) {
            warn!("failed to clear persisted message counts: {}", e);
        }
    }

    /// Withdraw notifications without touching any counts.
    pub fn withdraw(&self, target: Option<AccountId>) {
        let _ = self.events.send(NotificationEvent::Withdraw { target });
    }
}
