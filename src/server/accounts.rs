//! Account records and the storage seam.
//!
//! The engine talks to account storage through [`AccountRepository`], so a
//! deployment can back it with a database while tests and the development
//! server use [`InMemoryAccounts`]. Mutating operations on one account are
//! serialized by a per-account async lock held in [`AccountLocks`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::common::error::StorageError;
use crate::protocol::packets::types::{PASSHASH_LEN, SALT_LEN};

/// One character owned by an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRecord {
    pub name: String,
    pub level: u16,
    pub stats: [u16; 6],
    pub sprites: [u32; 4],
    pub map: String,
    pub x: i32,
    pub y: i32,
}

impl CharacterRecord {
    pub fn new(name: String, stats: [u16; 6], sprites: [u32; 4]) -> Self {
        CharacterRecord {
            name,
            level: 1,
            stats,
            sprites,
            map: String::new(),
            x: 0,
            y: 0,
        }
    }
}

/// A stored account.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub username: String,
    pub email: String,
    pub salt: [u8; SALT_LEN],
    pub passhash: [u8; PASSHASH_LEN],
    pub enabled: bool,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    /// IP the account was registered from, for abuse follow-up.
    pub created_from: Option<std::net::IpAddr>,
    pub characters: Vec<CharacterRecord>,
}

/// Storage seam for accounts and their characters.
///
/// Lookups are case-insensitive on username; implementations must store
/// and compare the lowercased form.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn fetch(&self, username: &str) -> Result<Option<AccountRecord>, StorageError>;

    async fn email_in_use(&self, email: &str) -> Result<bool, StorageError>;

    /// Inserts a new account; fails with `Conflict` if the username exists.
    async fn insert(&self, account: AccountRecord) -> Result<(), StorageError>;

    /// Replaces the stored character list for an account.
    async fn store_characters(
        &self,
        username: &str,
        characters: Vec<CharacterRecord>,
    ) -> Result<(), StorageError>;

    /// True if any account owns a character with this name.
    async fn character_name_taken(&self, name: &str) -> Result<bool, StorageError>;
}

/// Hash-map backed repository for development and tests.
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        InMemoryAccounts::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn fetch(&self, username: &str) -> Result<Option<AccountRecord>, StorageError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&username.to_lowercase()).cloned())
    }

    async fn email_in_use(&self, email: &str) -> Result<bool, StorageError> {
        let email = email.to_lowercase();
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .any(|account| account.email.to_lowercase() == email))
    }

    async fn insert(&self, account: AccountRecord) -> Result<(), StorageError> {
        let key = account.username.to_lowercase();
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&key) {
            return Err(StorageError::Conflict {
                message: format!("account {key} already exists"),
            });
        }
        accounts.insert(key, account);
        Ok(())
    }

    async fn store_characters(
        &self,
        username: &str,
        characters: Vec<CharacterRecord>,
    ) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&username.to_lowercase())
            .ok_or(StorageError::NotFound)?;
        account.characters = characters;
        Ok(())
    }

    async fn character_name_taken(&self, name: &str) -> Result<bool, StorageError> {
        let name = name.to_lowercase();
        let accounts = self.accounts.read().await;
        Ok(accounts.values().any(|account| {
            account
                .characters
                .iter()
                .any(|character| character.name.to_lowercase() == name)
        }))
    }
}

/// Per-account async locks.
///
/// Registration, character creation, and deletion hold the account's lock
/// so two connections can never mutate one account concurrently. Locks are
/// created on first use and never removed; the map is bounded by the
/// number of distinct accounts touched since startup.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        AccountLocks::default()
    }

    pub async fn lock_for(&self, username: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(username.to_lowercase())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::credentials;

    fn sample_account(username: &str, email: &str) -> AccountRecord {
        let salt = credentials::generate_salt();
        AccountRecord {
            username: username.to_lowercase(),
            email: email.to_string(),
            salt,
            passhash: credentials::compute_passhash(&salt, "hunter2"),
            enabled: true,
            banned: false,
            created_at: Utc::now(),
            created_from: None,
            characters: Vec::new(),
        }
    }

    #[tokio::test]
    async fn usernames_are_case_insensitive() {
        let repo = InMemoryAccounts::new();
        repo.insert(sample_account("Ambrosia", "a@example.com"))
            .await
            .unwrap();
        assert!(repo.fetch("AMBROSIA").await.unwrap().is_some());
        assert!(repo.fetch("ambrosia").await.unwrap().is_some());
        assert!(repo.fetch("someone-else").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let repo = InMemoryAccounts::new();
        repo.insert(sample_account("dup", "a@example.com"))
            .await
            .unwrap();
        assert!(matches!(
            repo.insert(sample_account("DUP", "b@example.com")).await,
            Err(StorageError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn character_names_are_globally_unique() {
        let repo = InMemoryAccounts::new();
        repo.insert(sample_account("owner", "a@example.com"))
            .await
            .unwrap();
        repo.store_characters(
            "owner",
            vec![CharacterRecord::new("Aria".into(), [5; 6], [0; 4])],
        )
        .await
        .unwrap();
        assert!(repo.character_name_taken("aria").await.unwrap());
        assert!(!repo.character_name_taken("boris").await.unwrap());
    }

    #[tokio::test]
    async fn account_locks_are_shared_per_name() {
        let locks = AccountLocks::new();
        let a = locks.lock_for("Ambrosia").await;
        let b = locks.lock_for("ambrosia").await;
        assert!(Arc::ptr_eq(&a, &b));
        let other = locks.lock_for("boris").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
