//! Portfolio value snapshots and the rule deciding when one is due.
//!
//! Every period (a calendar day, or a fixed number of hours) has a
//! deterministic identifier. Recording is an insert-if-absent on that
//! identifier, so repeated renders, retries and the TUI's refresh task
//! racing a manual edit all end up with exactly one row per period. A
//! second process cannot race at all: the store holds an exclusive lock.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StoreError, ValidationError};
use crate::holding::AssetClass;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub user_id: String,
    pub asset_class: AssetClass,
    pub period: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// One snapshot per UTC calendar day.
    #[default]
    Daily,
    /// One snapshot per fixed window of this many hours, aligned to the epoch.
    Every(u32),
}

impl SnapshotPolicy {
    /// Identifier of the period `now` falls in. Identifiers sort chronologically.
    pub fn period_key(&self, now: DateTime<Utc>) -> String {
        match self {
            SnapshotPolicy::Daily => now.format("%Y-%m-%d").to_string(),
            SnapshotPolicy::Every(hours) => {
                let width = i64::from(*hours) * 3600;
                let start = now.timestamp().div_euclid(width) * width;
                match Utc.timestamp_opt(start, 0).single() {
                    Some(start) => start.format("%Y-%m-%dT%H:%M").to_string(),
                    None => now.format("%Y-%m-%dT%H:%M").to_string(),
                }
            }
        }
    }
}

impl FromStr for SnapshotPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_lowercase();
        if trimmed == "daily" {
            return Ok(SnapshotPolicy::Daily);
        }
        match trimmed.strip_suffix('h').map(|n| n.trim().parse::<u32>()) {
            Some(Ok(hours)) if hours > 0 => Ok(SnapshotPolicy::Every(hours)),
            _ => Err(ValidationError::InvalidSnapshotPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for SnapshotPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotPolicy::Daily => write!(f, "daily"),
            SnapshotPolicy::Every(hours) => write!(f, "{hours}h"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Recorded(PortfolioSnapshot),
    AlreadyRecorded { period: String },
}

impl SnapshotOutcome {
    pub fn was_recorded(&self) -> bool {
        matches!(self, SnapshotOutcome::Recorded(_))
    }
}

/// Records the portfolio value unless the current period already has a snapshot.
pub fn record_if_due(
    store: &Store,
    policy: SnapshotPolicy,
    user_id: &str,
    class: AssetClass,
    value: f64,
    now: DateTime<Utc>,
) -> Result<SnapshotOutcome, StoreError> {
    let snapshot = PortfolioSnapshot {
        user_id: user_id.to_string(),
        asset_class: class,
        period: policy.period_key(now),
        timestamp: now,
        value,
    };

    if store.insert_snapshot_if_absent(&snapshot)? {
        info!(
            user_id,
            class = class.as_str(),
            period = %snapshot.period,
            value,
            "snapshot recorded"
        );
        Ok(SnapshotOutcome::Recorded(snapshot))
    } else {
        Ok(SnapshotOutcome::AlreadyRecorded {
            period: snapshot.period,
        })
    }
}
