pub mod error;

/// Identifier of a configured account. Opaque, unique, and stable for the
/// account's lifetime; assigned by the account store.
pub type AccountId = i64;

/// Identifier of a mailbox within an account, assigned by the mail backend.
pub type MailboxId = i64;
