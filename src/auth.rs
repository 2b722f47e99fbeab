//! Email/password accounts and the local sign-in session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::Store;

const MIN_PASSWORD_LEN: usize = 6;
const HASH_ROUNDS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

/// Stored account row. The password is kept only as a salted digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub salt: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub signed_in_at: DateTime<Utc>,
}

impl From<&UserRecord> for User {
    fn from(record: &UserRecord) -> Self {
        User {
            id: record.id.clone(),
            email: record.email.clone(),
        }
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..HASH_ROUNDS {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt.as_bytes())
            .finalize();
    }
    hex::encode(digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::InvalidEmail(email)),
    }
}

pub struct Identity<'a> {
    store: &'a Store,
}

impl<'a> Identity<'a> {
    pub fn new(store: &'a Store) -> Identity<'a> {
        Identity { store }
    }

    pub fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(MIN_PASSWORD_LEN));
        }

        let salt = hex::encode(rand::random::<[u8; 16]>());
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            email: email.clone(),
            created_at: Utc::now(),
        };

        if !self.store.insert_user_if_absent(&record)? {
            return Err(AuthError::EmailTaken(email));
        }
        info!(email = %record.email, "account created");
        Ok(User::from(&record))
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let record = self
            .store
            .get_user(&email)?
            .ok_or(AuthError::InvalidCredentials)?;

        let candidate = hash_password(&record.salt, password);
        if !constant_time_eq(candidate.as_bytes(), record.password_hash.as_bytes()) {
            warn!(%email, "failed sign in");
            return Err(AuthError::InvalidCredentials);
        }

        self.store.put_session(&Session {
            user_id: record.id.clone(),
            email: record.email.clone(),
            signed_in_at: Utc::now(),
        })?;
        info!(%email, "signed in");
        Ok(User::from(&record))
    }

    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.store.clear_session()?;
        Ok(())
    }

    /// The signed-in user, or `None` when there is no valid session.
    pub fn current_user(&self) -> Option<User> {
        let session = match self.store.get_session() {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read session: {e}");
                return None;
            }
        };

        // the account must still exist for the session to count
        match self.store.get_user(&session.email) {
            Ok(Some(record)) if record.id == session.user_id => Some(User::from(&record)),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not read account for session: {e}");
                None
            }
        }
    }

    pub fn require_user(&self) -> Result<User, AuthError> {
        self.current_user().ok_or(AuthError::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_then_sign_in() {
        let store = Store::temporary();
        let identity = Identity::new(&store);

        let created = identity.sign_up("Ama@Example.com", "secret1").unwrap();
        assert_eq!(created.email, "ama@example.com");
        assert!(identity.current_user().is_none());

        let user = identity.sign_in("ama@example.com ", "secret1").unwrap();
        assert_eq!(user, created);
        assert_eq!(identity.current_user(), Some(created));
    }

    #[test]
    fn test_sign_up_rejects_bad_input() {
        let store = Store::temporary();
        let identity = Identity::new(&store);

        assert!(matches!(
            identity.sign_up("no-at-sign", "secret1"),
            Err(AuthError::InvalidEmail(_))
        ));
        assert!(matches!(
            identity.sign_up("a@b.c", "123"),
            Err(AuthError::WeakPassword(6))
        ));
        identity.sign_up("a@b.c", "123456").unwrap();
        assert!(matches!(
            identity.sign_up("A@B.C", "abcdef"),
            Err(AuthError::EmailTaken(_))
        ));
    }

    #[test]
    fn test_wrong_password_and_unknown_user() {
        let store = Store::temporary();
        let identity = Identity::new(&store);
        identity.sign_up("kofi@example.com", "correct-horse").unwrap();

        assert!(matches!(
            identity.sign_in("kofi@example.com", "wrong-horse"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            identity.sign_in("nobody@example.com", "correct-horse"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(identity.current_user().is_none());
    }

    #[test]
    fn test_sign_out_clears_session() {
        let store = Store::temporary();
        let identity = Identity::new(&store);
        identity.sign_up("efua@example.com", "pa55word").unwrap();
        identity.sign_in("efua@example.com", "pa55word").unwrap();

        identity.sign_out().unwrap();
        assert!(identity.current_user().is_none());
        assert!(matches!(
            identity.require_user(),
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_salted_hashes_differ() {
        assert_ne!(hash_password("aa", "pw"), hash_password("bb", "pw"));
        assert_eq!(hash_password("aa", "pw"), hash_password("aa", "pw"));
    }
}
