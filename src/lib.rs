//! mailpoll - Background scheduler for periodic mail-account checks
//!
//! Decides when each configured account is next due for a check, arms a
//! single wake timer for the soonest one, recovers when a check never
//! reports back, and de-duplicates new-mail notifications.
//!
//! ## Module Organization
//!
//! - `backend`: seam to the component that actually fetches mail
//! - `clock`: injected monotonic time source
//! - `config`: configuration loading
//! - `store`: account storage
//! - `sync/`: scheduling core (registry, scheduler, watchdog, driver)
//! - `timer`: injected single-slot wake timer
//! - `types`: shared identifiers and error types

pub mod backend;
pub mod clock;
pub mod config;
pub mod store;
pub mod sync;
pub mod timer;
pub mod types;

pub use backend::{MailBackend, RecordingBackend};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{default_config_paths, load_config, load_config_from_path, Config};
pub use store::sqlite::SqliteAccountStore;
pub use store::{AccountRow, AccountStore};
pub use sync::driver::{SyncCommand, SyncDriver, SyncHandle};
pub use sync::notify::NotificationEvent;
pub use sync::registry::{LoadMode, SyncRegistry};
pub use sync::report::{SyncReport, CHECK_INTERVAL_NEVER};
pub use sync::snapshot::{SnapshotEntry, WakePayload};
pub use sync::watchdog::WATCHDOG_DELAY_MS;
pub use timer::{ManualTimer, TokioWakeTimer, WakeTimer};
pub use types::error::{MailpollError, Result};
pub use types::{AccountId, MailboxId};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for logging.
///
/// In debug builds, defaults to debug level for this crate; override with
/// the RUST_LOG environment variable.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailpoll=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
