//! Embedded table store.
//!
//! One sled tree per table. Rows are JSON encoded and keyed by
//! `user_id/...` so a prefix scan selects everything a user owns.

use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{Session, UserRecord};
use crate::error::StoreError;
use crate::holding::{AssetClass, Holding};
use crate::snapshot::PortfolioSnapshot;

const SESSION_KEY: &str = "current";
const OPEN_ATTEMPTS: u32 = 10;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    users: sled::Tree,
    session: sled::Tree,
    settings: sled::Tree,
    holdings: sled::Tree,
    snapshots: sled::Tree,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn is_lock_error(e: &sled::Error) -> bool {
    matches!(e, sled::Error::Io(io_err) if io_err.kind() == io::ErrorKind::WouldBlock)
}

fn holding_prefix(user_id: &str, class: AssetClass) -> String {
    format!("{user_id}/{class}/")
}

impl Store {
    /// Open the database, waiting briefly if another process holds its lock.
    ///
    /// sled locks the database for a single process, so while one
    /// `investrack` (usually the TUI) has it open every other one gets
    /// `StoreError::Locked` once the retries run out.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Store, StoreError> {
        Store::open_with_retry(path.as_ref(), OPEN_ATTEMPTS, OPEN_RETRY_DELAY)
    }

    fn open_with_retry(path: &Path, attempts: u32, delay: Duration) -> Result<Store, StoreError> {
        let mut attempt = 1;
        loop {
            match sled::open(path) {
                Ok(db) => return Store::from_db(db),
                Err(e) if is_lock_error(&e) => {
                    if attempt >= attempts {
                        return Err(StoreError::Locked);
                    }
                    debug!(attempt, "database locked, retrying");
                    attempt += 1;
                    thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// A throwaway database that is removed when dropped.
    #[cfg(test)]
    pub fn temporary() -> Store {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Store::from_db(db).unwrap()
    }

    fn from_db(db: sled::Db) -> Result<Store, StoreError> {
        Ok(Store {
            users: db.open_tree("users")?,
            session: db.open_tree("session")?,
            settings: db.open_tree("settings")?,
            holdings: db.open_tree("holdings")?,
            snapshots: db.open_tree("snapshots")?,
            db,
        })
    }

    // block until all operations are stable on disk
    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // users & session
    // -------------------------------------------------------------------

    pub fn get_user(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        match self.users.get(email)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns false when a user with this email already exists.
    pub fn insert_user_if_absent(&self, user: &UserRecord) -> Result<bool, StoreError> {
        let created = self
            .users
            .compare_and_swap(&user.email, None::<&[u8]>, Some(encode(user)?))?
            .is_ok();
        self.flush()?;
        Ok(created)
    }

    pub fn get_session(&self) -> Result<Option<Session>, StoreError> {
        match self.session.get(SESSION_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        self.session.insert(SESSION_KEY, encode(session)?)?;
        self.flush()
    }

    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.session.remove(SESSION_KEY)?;
        self.flush()
    }

    // -------------------------------------------------------------------
    // settings
    // -------------------------------------------------------------------

    pub fn get_setting(&self, user_id: &str, key: &str) -> Result<Option<f64>, StoreError> {
        match self.settings.get(format!("{user_id}/{key}"))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_setting(&self, user_id: &str, key: &str, value: f64) -> Result<(), StoreError> {
        self.settings
            .insert(format!("{user_id}/{key}"), encode(&value)?)?;
        info!(user_id, key, value, "setting saved");
        self.flush()
    }

    // -------------------------------------------------------------------
    // holdings
    // -------------------------------------------------------------------

    /// All holdings of a user in one asset class, ordered by symbol.
    pub fn holdings(&self, user_id: &str, class: AssetClass) -> Result<Vec<Holding>, StoreError> {
        let mut holdings = Vec::new();
        for item in self.holdings.scan_prefix(holding_prefix(user_id, class)) {
            let (_, bytes) = item?;
            holdings.push(decode::<Holding>(&bytes)?);
        }
        Ok(holdings)
    }

    pub fn upsert_holding(
        &self,
        user_id: &str,
        class: AssetClass,
        holding: &Holding,
    ) -> Result<(), StoreError> {
        let key = format!("{}{}", holding_prefix(user_id, class), holding.get_symbol());
        self.holdings.insert(key, encode(holding)?)?;
        info!(
            user_id,
            class = class.as_str(),
            symbol = holding.get_symbol(),
            quantity = holding.get_quantity(),
            "holding saved"
        );
        self.flush()
    }

    /// Returns whether a holding was actually removed.
    pub fn remove_holding(
        &self,
        user_id: &str,
        class: AssetClass,
        symbol: &str,
    ) -> Result<bool, StoreError> {
        let key = format!("{}{}", holding_prefix(user_id, class), symbol);
        let removed = self.holdings.remove(key)?.is_some();
        self.flush()?;
        Ok(removed)
    }

    /// Deletes every holding of the class, then inserts the given set in one batch.
    pub fn replace_holdings(
        &self,
        user_id: &str,
        class: AssetClass,
        holdings: &[Holding],
    ) -> Result<(), StoreError> {
        let prefix = holding_prefix(user_id, class);
        let mut batch = sled::Batch::default();
        for item in self.holdings.scan_prefix(&prefix) {
            let (key, _) = item?;
            batch.remove(key);
        }
        for holding in holdings {
            batch.insert(
                format!("{prefix}{}", holding.get_symbol()).as_bytes(),
                encode(holding)?,
            );
        }
        self.holdings.apply_batch(batch)?;
        info!(user_id, class = class.as_str(), count = holdings.len(), "holdings replaced");
        self.flush()
    }

    // -------------------------------------------------------------------
    // snapshots
    // -------------------------------------------------------------------

    /// Atomically inserts the snapshot unless its period already has one.
    ///
    /// Returns false when the period was taken, in which case nothing is written.
    pub fn insert_snapshot_if_absent(&self, snapshot: &PortfolioSnapshot) -> Result<bool, StoreError> {
        let key = format!(
            "{}/{}/{}",
            snapshot.user_id, snapshot.asset_class, snapshot.period
        );
        let inserted = self
            .snapshots
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(encode(snapshot)?))?
            .is_ok();
        if inserted {
            self.flush()?;
        } else {
            debug!(%key, "snapshot period already recorded");
        }
        Ok(inserted)
    }

    /// Snapshot history of a user in one asset class, oldest first.
    pub fn history(
        &self,
        user_id: &str,
        class: AssetClass,
    ) -> Result<Vec<PortfolioSnapshot>, StoreError> {
        let mut history = Vec::new();
        for item in self.snapshots.scan_prefix(format!("{user_id}/{class}/")) {
            let (_, bytes) = item?;
            history.push(decode::<PortfolioSnapshot>(&bytes)?);
        }
        // keys written under different policies do not interleave by time
        history.sort_by_key(|s| s.timestamp);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip_is_scoped_by_user() {
        let store = Store::temporary();
        store.put_setting("u1", "crypto_rate", 15.0).unwrap();
        assert_eq!(store.get_setting("u1", "crypto_rate").unwrap(), Some(15.0));
        assert_eq!(store.get_setting("u2", "crypto_rate").unwrap(), None);

        store.put_setting("u1", "crypto_rate", 16.5).unwrap();
        assert_eq!(store.get_setting("u1", "crypto_rate").unwrap(), Some(16.5));
    }

    #[test]
    fn test_holdings_upsert_and_remove() {
        let store = Store::temporary();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("ETH", 2.0).unwrap())
            .unwrap();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("BTC", 0.1).unwrap())
            .unwrap();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("BTC", 0.2).unwrap())
            .unwrap();
        store
            .upsert_holding("u1", AssetClass::Stock, &Holding::new("AAPL", 3.0).unwrap())
            .unwrap();

        let crypto = store.holdings("u1", AssetClass::Crypto).unwrap();
        assert_eq!(crypto.len(), 2);
        assert_eq!(crypto[0].get_symbol(), "BTC");
        assert_eq!(crypto[0].get_quantity(), 0.2);

        assert!(store.remove_holding("u1", AssetClass::Crypto, "ETH").unwrap());
        assert!(!store.remove_holding("u1", AssetClass::Crypto, "ETH").unwrap());
        assert_eq!(store.holdings("u1", AssetClass::Crypto).unwrap().len(), 1);
        assert_eq!(store.holdings("u1", AssetClass::Stock).unwrap().len(), 1);
        assert!(store.holdings("u2", AssetClass::Crypto).unwrap().is_empty());
    }

    #[test]
    fn test_second_open_reports_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let first = Store::open(&path).unwrap();

        let second = Store::open_with_retry(&path, 2, Duration::from_millis(10));
        assert!(matches!(second, Err(StoreError::Locked)));

        drop(first);
        assert!(Store::open_with_retry(&path, 2, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_replace_holdings_drops_missing_symbols() {
        let store = Store::temporary();
        store
            .upsert_holding("u1", AssetClass::Stock, &Holding::new("TSLA", 1.0).unwrap())
            .unwrap();
        let new_set = vec![
            Holding::new("AAPL", 2.0).unwrap(),
            Holding::new("MSFT", 4.0).unwrap(),
        ];
        store
            .replace_holdings("u1", AssetClass::Stock, &new_set)
            .unwrap();
        assert_eq!(store.holdings("u1", AssetClass::Stock).unwrap(), new_set);
    }
}
