//! Persistence port.
//!
//! The world core talks to storage through [`Store`]; the production
//! implementation is [`SqliteStore`]. Validation of credential character
//! sets lives here so every implementation enforces the same rules.

pub mod password;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use thornvale_domain::avatar::AvatarRecord;
use thornvale_domain::ids::AccountId;

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt avatar payload: {0}")]
    CorruptPayload(#[from] serde_json::Error),
    #[error("username must be 3-20 letters, digits, or underscores")]
    InvalidUsername,
    #[error("password must be 8-40 printable characters")]
    InvalidPassword,
}

/// Typed storage surface. All writes are transactional; a failed save never
/// leaves a partial avatar.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create an account with its initial avatar, atomically. `None` when
    /// the username is taken.
    async fn create_account(
        &self,
        username: &str,
        password: &str,
        avatar: &AvatarRecord,
    ) -> Result<Option<AccountId>, StoreError>;

    /// `None` on unknown username or wrong password.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AccountId>, StoreError>;

    async fn load_avatar(&self, account: AccountId) -> Result<Option<AvatarRecord>, StoreError>;

    async fn save_avatar(
        &self,
        account: AccountId,
        record: &AvatarRecord,
    ) -> Result<(), StoreError>;

    /// Purge the tutorials journal so every tutorial shows again.
    async fn reset_tutorials(&self, account: AccountId) -> Result<(), StoreError>;
}

/// Username rule: 3-20 chars of letters, digits, underscore.
pub fn valid_username(username: &str) -> bool {
    (3..=20).contains(&username.chars().count())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Password rule: 8-40 chars of letters, digits, punctuation, or space.
pub fn valid_password(password: &str) -> bool {
    (8..=40).contains(&password.chars().count())
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c.is_ascii_punctuation() || c == ' ')
}

/// A store that remembers nothing; test worlds use it.
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn create_account(
        &self,
        _username: &str,
        _password: &str,
        _avatar: &AvatarRecord,
    ) -> Result<Option<AccountId>, StoreError> {
        Ok(None)
    }

    async fn authenticate(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<Option<AccountId>, StoreError> {
        Ok(None)
    }

    async fn load_avatar(&self, _account: AccountId) -> Result<Option<AvatarRecord>, StoreError> {
        Ok(None)
    }

    async fn save_avatar(
        &self,
        _account: AccountId,
        _record: &AvatarRecord,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn reset_tutorials(&self, _account: AccountId) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(valid_username("kara"));
        assert!(valid_username("k_2"));
        assert!(!valid_username("ka"));
        assert!(!valid_username("a".repeat(21).as_str()));
        assert!(!valid_username("kara!"));
        assert!(!valid_username("ka ra"));
    }

    #[test]
    fn password_rules() {
        assert!(valid_password("hunter2 hunter2"));
        assert!(valid_password("p4ss!word"));
        assert!(!valid_password("short"));
        assert!(!valid_password("a".repeat(41).as_str()));
        assert!(!valid_password("line\nbreak pass"));
    }
}
