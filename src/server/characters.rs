//! Character list, creation, selection, and deletion.

use std::sync::Arc;

use tracing::info;

use crate::common::error::StorageError;
use crate::protocol::packets::messages::CharacterSummary;
use crate::protocol::packets::types::{create_fail, MAX_CHARACTER_NAME_LEN};
use crate::server::accounts::{AccountRepository, CharacterRecord};
use crate::server::auth::AuthService;

/// Highest sprite index clients ship art for.
pub const MAX_SPRITE_ID: u32 = 255;

/// Outcome of a `FinishCreateCharacter` request.
#[derive(Debug, PartialEq, Eq)]
pub enum CreateVerdict {
    Created(CharacterRecord),
    /// Code from the creation failure table.
    Rejected(u16),
}

/// Character operations, serialized per account via [`AuthService`] locks.
pub struct CharacterService {
    auth: Arc<AuthService>,
}

impl CharacterService {
    pub fn new(auth: Arc<AuthService>) -> Self {
        CharacterService { auth }
    }

    fn accounts(&self) -> &Arc<dyn AccountRepository> {
        self.auth.accounts()
    }

    /// Characters on the account, as list packets are built from them.
    pub async fn list(&self, username: &str) -> Result<Vec<CharacterSummary>, StorageError> {
        let account = self
            .accounts()
            .fetch(username)
            .await?
            .ok_or(StorageError::NotFound)?;
        Ok(account.characters.iter().map(summarize).collect())
    }

    /// True when the account has a free character slot.
    pub async fn has_free_slot(&self, username: &str) -> Result<bool, StorageError> {
        let account = self
            .accounts()
            .fetch(username)
            .await?
            .ok_or(StorageError::NotFound)?;
        Ok(account.characters.len() < self.auth.config().max_characters)
    }

    /// Validates and stores a new character.
    pub async fn create(
        &self,
        username: &str,
        name: &str,
        stats: [u16; 6],
        sprites: [u32; 4],
    ) -> Result<CreateVerdict, StorageError> {
        if !character_name_is_valid(name) {
            return Ok(CreateVerdict::Rejected(create_fail::INVALID_NAME));
        }
        let budget = self.auth.config().starting_stat_points;
        let spent: u32 = stats.iter().map(|s| u32::from(*s)).sum();
        if spent != budget {
            return Ok(CreateVerdict::Rejected(create_fail::STAT_BUDGET));
        }
        if sprites.iter().any(|sprite| *sprite > MAX_SPRITE_ID) {
            return Ok(CreateVerdict::Rejected(create_fail::INVALID_SPRITE));
        }

        let lock = self.auth.account_lock(username).await;
        let _guard = lock.lock().await;

        if self.accounts().character_name_taken(name).await? {
            return Ok(CreateVerdict::Rejected(create_fail::NAME_TAKEN));
        }
        let account = self
            .accounts()
            .fetch(username)
            .await?
            .ok_or(StorageError::NotFound)?;
        if account.characters.len() >= self.auth.config().max_characters {
            // Slot filled between StartCreateCharacter and now.
            return Ok(CreateVerdict::Rejected(create_fail::NOT_IN_PROGRESS));
        }

        let record = CharacterRecord::new(name.to_string(), stats, sprites);
        let mut characters = account.characters;
        characters.push(record.clone());
        self.accounts().store_characters(username, characters).await?;
        info!(username, character = name, "character created");
        Ok(CreateVerdict::Created(record))
    }

    /// Looks up a character for selection.
    pub async fn select(
        &self,
        username: &str,
        name: &str,
    ) -> Result<Option<CharacterRecord>, StorageError> {
        let account = self
            .accounts()
            .fetch(username)
            .await?
            .ok_or(StorageError::NotFound)?;
        Ok(account
            .characters
            .into_iter()
            .find(|character| character.name.eq_ignore_ascii_case(name)))
    }

    /// Deletes a character and returns the remaining list, or `None` if no
    /// character by that name exists on the account.
    pub async fn delete(
        &self,
        username: &str,
        name: &str,
    ) -> Result<Option<Vec<CharacterSummary>>, StorageError> {
        let lock = self.auth.account_lock(username).await;
        let _guard = lock.lock().await;

        let account = self
            .accounts()
            .fetch(username)
            .await?
            .ok_or(StorageError::NotFound)?;
        let before = account.characters.len();
        let remaining: Vec<CharacterRecord> = account
            .characters
            .into_iter()
            .filter(|character| !character.name.eq_ignore_ascii_case(name))
            .collect();
        if remaining.len() == before {
            return Ok(None);
        }
        let summaries = remaining.iter().map(summarize).collect();
        self.accounts().store_characters(username, remaining).await?;
        info!(username, character = name, "character deleted");
        Ok(Some(summaries))
    }
}

pub fn summarize(record: &CharacterRecord) -> CharacterSummary {
    CharacterSummary {
        name: record.name.clone(),
        level: record.level,
        stats: record.stats,
        sprites: record.sprites,
    }
}

/// Character names: 1-32 bytes, ASCII letters only.
pub fn character_name_is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CHARACTER_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::AuthConfig;
    use crate::protocol::credentials;
    use crate::server::accounts::InMemoryAccounts;

    async fn service_with_account(username: &str) -> CharacterService {
        let auth = Arc::new(AuthService::new(
            Arc::new(InMemoryAccounts::new()),
            AuthConfig {
                max_characters: 2,
                starting_stat_points: 30,
                ..AuthConfig::default()
            },
        ));
        let salt = credentials::generate_salt();
        let passhash = credentials::compute_passhash(&salt, "hunter2");
        auth.register(username, &salt, &passhash, "a@example.com", None)
            .await
            .unwrap();
        CharacterService::new(auth)
    }

    fn balanced_stats() -> [u16; 6] {
        [5, 5, 5, 5, 5, 5]
    }

    #[tokio::test]
    async fn create_list_select_delete_cycle() {
        let service = service_with_account("ambrosia").await;

        let verdict = service
            .create("ambrosia", "Aria", balanced_stats(), [1, 2, 3, 4])
            .await
            .unwrap();
        assert!(matches!(verdict, CreateVerdict::Created(_)));

        let list = service.list("ambrosia").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Aria");
        assert_eq!(list[0].level, 1);

        let selected = service.select("ambrosia", "aria").await.unwrap();
        assert!(selected.is_some());

        let remaining = service.delete("ambrosia", "ARIA").await.unwrap().unwrap();
        assert!(remaining.is_empty());
        assert!(service.select("ambrosia", "Aria").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejections_use_the_code_table() {
        let service = service_with_account("ambrosia").await;

        let verdict = service
            .create("ambrosia", "Bad Name1", balanced_stats(), [0; 4])
            .await
            .unwrap();
        assert_eq!(verdict, CreateVerdict::Rejected(create_fail::INVALID_NAME));

        let verdict = service
            .create("ambrosia", "Aria", [9, 9, 9, 9, 9, 9], [0; 4])
            .await
            .unwrap();
        assert_eq!(verdict, CreateVerdict::Rejected(create_fail::STAT_BUDGET));

        let verdict = service
            .create("ambrosia", "Aria", balanced_stats(), [0, 0, 0, 9999])
            .await
            .unwrap();
        assert_eq!(
            verdict,
            CreateVerdict::Rejected(create_fail::INVALID_SPRITE)
        );

        service
            .create("ambrosia", "Aria", balanced_stats(), [0; 4])
            .await
            .unwrap();
        let verdict = service
            .create("ambrosia", "aria", balanced_stats(), [0; 4])
            .await
            .unwrap();
        assert_eq!(verdict, CreateVerdict::Rejected(create_fail::NAME_TAKEN));
    }

    #[tokio::test]
    async fn slot_limit_is_enforced() {
        let service = service_with_account("ambrosia").await;
        service
            .create("ambrosia", "Aria", balanced_stats(), [0; 4])
            .await
            .unwrap();
        assert!(service.has_free_slot("ambrosia").await.unwrap());
        service
            .create("ambrosia", "Boris", balanced_stats(), [0; 4])
            .await
            .unwrap();
        assert!(!service.has_free_slot("ambrosia").await.unwrap());

        let verdict = service
            .create("ambrosia", "Cyrus", balanced_stats(), [0; 4])
            .await
            .unwrap();
        assert!(matches!(verdict, CreateVerdict::Rejected(_)));
    }

    #[tokio::test]
    async fn deleting_a_missing_character_is_reported() {
        let service = service_with_account("ambrosia").await;
        assert!(service.delete("ambrosia", "Ghost").await.unwrap().is_none());
    }
}
