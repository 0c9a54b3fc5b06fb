//! Unified error types for the scheduling engine
//!
//! This module defines error types that:
//! - Are serializable for embedders that surface them over IPC
//! - Provide actionable error messages
//! - Map internal errors to stable variants

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine error type
///
/// No failure in this crate is fatal to the process; errors surface so the
/// embedder can log or display them, and scheduling self-corrects on the
/// next refresh or rearm.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum MailpollError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

// Implement From for common error types

impl From<std::io::Error> for MailpollError {
    fn from(err: std::io::Error) -> Self {
        MailpollError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MailpollError {
    fn from(err: toml::de::Error) -> Self {
        MailpollError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MailpollError {
    fn from(err: serde_json::Error) -> Self {
        MailpollError::Parse(err.to_string())
    }
}

impl From<String> for MailpollError {
    fn from(err: String) -> Self {
        MailpollError::Other(err)
    }
}

impl From<&str> for MailpollError {
    fn from(err: &str) -> Self {
        MailpollError::Other(err.to_string())
    }
}

/// Result type alias using MailpollError
pub type Result<T> = std::result::Result<T, MailpollError>;
