//! SQLite-backed account store
//!
//! Accounts and their persisted new-message counts live in a single table.
//! The scheduler only reads; the upsert and setter methods exist for the
//! account setup flow and for tests.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;

use crate::store::{AccountRow, AccountStore};
use crate::types::error::{MailpollError, Result};
use crate::types::AccountId;

/// Database connection pool type
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Account database backed by a pooled SQLite file.
pub struct SqliteAccountStore {
    pool: DbPool,
}

impl SqliteAccountStore {
    /// Open (or create) the account database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(5).build(manager).map_err(|e| {
            MailpollError::Database(format!("Failed to create account database pool: {}", e))
        })?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| {
            MailpollError::Database(format!("Failed to create account database pool: {}", e))
        })?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Get a connection from the pool
    fn connection(&self) -> Result<DbConnection> {
        self.pool.get().map_err(|e| {
            MailpollError::Database(format!("Failed to get account database connection: {}", e))
        })
    }

    /// Initialize the account database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys and WAL mode
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Configured mail accounts
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                email_address TEXT NOT NULL,
                recv_credential_ref INTEGER,  -- NULL until receiving auth is set up
                send_credential_ref INTEGER,  -- NULL until sending auth is set up
                sync_interval_minutes INTEGER NOT NULL DEFAULT -1,
                notify_new_mail INTEGER NOT NULL DEFAULT 0,
                protocol TEXT NOT NULL DEFAULT 'imap',
                auto_sync INTEGER NOT NULL DEFAULT 1,
                new_message_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Index for protocol-wide maintenance sweeps
            CREATE INDEX IF NOT EXISTS idx_accounts_protocol ON accounts(protocol);
        "#,
        )
        .map_err(|e| {
            MailpollError::Database(format!("Failed to initialize account schema: {}", e))
        })?;

        Ok(())
    }

    /// Save or update an account. Updates leave `auto_sync` and the
    /// persisted count untouched.
    pub fn upsert_account(&self, account: &AccountRow) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO accounts (id, email_address, recv_credential_ref, send_credential_ref,
                                   sync_interval_minutes, notify_new_mail, protocol, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                email_address = excluded.email_address,
                recv_credential_ref = excluded.recv_credential_ref,
                send_credential_ref = excluded.send_credential_ref,
                sync_interval_minutes = excluded.sync_interval_minutes,
                notify_new_mail = excluded.notify_new_mail,
                protocol = excluded.protocol,
                updated_at = datetime('now')",
            params![
                account.id,
                account.email_address,
                account.recv_credential_ref,
                account.send_credential_ref,
                account.sync_interval_minutes,
                account.notify_new_mail as i32,
                account.protocol,
            ],
        )
        .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(())
    }

    /// Turn automatic syncing on or off for an account.
    pub fn set_auto_sync(&self, id: AccountId, enabled: bool) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE accounts SET auto_sync = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, enabled as i32],
        )
        .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(())
    }

    /// Persist a new-message count for an account.
    pub fn set_new_message_count(&self, id: AccountId, count: u32) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE accounts SET new_message_count = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, count],
        )
        .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_account(row: &Row) -> std::result::Result<AccountRow, rusqlite::Error> {
        Ok(AccountRow {
            id: row.get(0)?,
            email_address: row.get(1)?,
            // References that never got past setup are stored as 0 or NULL.
            recv_credential_ref: row.get::<_, Option<i64>>(2)?.filter(|v| *v > 0),
            send_credential_ref: row.get::<_, Option<i64>>(3)?.filter(|v| *v > 0),
            sync_interval_minutes: row.get(4)?,
            notify_new_mail: row.get::<_, i32>(5)? != 0,
            protocol: row.get(6)?,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, email_address, recv_credential_ref, send_credential_ref,
                               sync_interval_minutes, notify_new_mail, protocol";

impl AccountStore for SqliteAccountStore {
    fn load_accounts(&self) -> Result<Vec<AccountRow>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM accounts ORDER BY id ASC",
                ACCOUNT_COLUMNS
            ))
            .map_err(|e| MailpollError::Database(e.to_string()))?;

        let accounts = stmt
            .query_map([], Self::row_to_account)
            .map_err(|e| MailpollError::Database(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(accounts)
    }

    fn load_account(&self, id: AccountId) -> Result<Option<AccountRow>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM accounts WHERE id = ?1",
                ACCOUNT_COLUMNS
            ))
            .map_err(|e| MailpollError::Database(e.to_string()))?;

        let account = stmt
            .query_row(params![id], Self::row_to_account)
            .optional()
            .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(account)
    }

    fn auto_sync_enabled(&self, email_address: &str) -> Result<bool> {
        let conn = self.connection()?;
        let enabled = conn
            .query_row(
                "SELECT auto_sync FROM accounts WHERE email_address = ?1 LIMIT 1",
                params![email_address],
                |row| row.get::<_, i32>(0).map(|v| v != 0),
            )
            .optional()
            .map_err(|e| MailpollError::Database(e.to_string()))?;

        // An address the store does not know cannot be synced.
        Ok(enabled.unwrap_or(false))
    }

    fn new_message_count(&self, id: AccountId) -> Result<Option<u32>> {
        let conn = self.connection()?;
        let count = conn
            .query_row(
                "SELECT new_message_count FROM accounts WHERE id = ?1",
                params![id],
                |row| row.get::<_, u32>(0),
            )
            .optional()
            .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(count)
    }

    fn clear_new_message_count(&self, target: Option<AccountId>) -> Result<()> {
        let conn = self.connection()?;
        match target {
            Some(id) => conn.execute(
                "UPDATE accounts SET new_message_count = 0, updated_at = datetime('now') WHERE id = ?1",
                params![id],
            ),
            None => conn.execute(
                "UPDATE accounts SET new_message_count = 0, updated_at = datetime('now')",
                [],
            ),
        }
        .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(())
    }

    fn delete_account(&self, id: AccountId) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])
            .map_err(|e| MailpollError::Database(e.to_string()))?;

        Ok(())
    }
}
