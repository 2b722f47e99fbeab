//! Error types for investrack
//!
//! This module defines domain-specific error types that provide clear,
//! actionable error messages to users.

use thiserror::Error;

/// Validation errors for user input on the command line and in the TUI.
///
/// These errors are shown directly to users and should be clear and actionable.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Symbol is required")]
    SymbolRequired,

    #[error("Invalid quantity format: {0}")]
    InvalidQuantity(String),

    #[error("Quantity cannot be negative, got {0}")]
    NegativeQuantity(f64),

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),

    #[error("Exchange rate cannot be negative, got {0}")]
    NegativeRate(f64),

    #[error("Invested amount cannot be negative, got {0}")]
    NegativeInvested(f64),

    #[error("Unknown asset class '{0}', expected 'crypto' or 'stock'")]
    UnknownAssetClass(String),

    #[error("Invalid snapshot policy '{0}', expected 'daily' or '<hours>h' (e.g. '8h')")]
    InvalidSnapshotPolicy(String),
}

/// Failures of the embedded table store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt record: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("The database is in use by another investrack process (is `investrack tui` running?)")]
    Locked,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("An account for {0} already exists")]
    EmailTaken(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Not logged in, run `investrack login <EMAIL>` first")]
    NotAuthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by a single market data source.
///
/// These never reach the user directly: the price chain turns them into
/// warnings and falls back to the next source or the cache.
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited by {source_id}")]
    RateLimited { source_id: &'static str },

    #[error("Timeout: {source_id}")]
    Timeout { source_id: &'static str },

    #[error("Malformed response from {source_id}: {message}")]
    Malformed {
        source_id: &'static str,
        message: String,
    },

    #[error("Provider error: {source_id} - {message}")]
    Provider {
        source_id: &'static str,
        message: String,
    },
}
