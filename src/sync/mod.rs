//! Background mail checking
//!
//! This module holds the scheduling core: per-account sync state, the
//! next-check selection that arms a single wake timer, watchdog recovery
//! for checks that never complete, and new-mail notification bookkeeping.
//! The `driver` submodule ties them together behind one command channel.

pub mod driver;
pub mod notify;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod snapshot;
pub mod watchdog;
