//! Server-side authentication: registration vetting and the
//! challenge-response login exchange.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::common::error::StorageError;
use crate::config::types::AuthConfig;
use crate::protocol::credentials;
use crate::protocol::packets::types::{
    register_fail, CHALLENGE_LEN, MAX_EMAIL_LEN, MAX_USERNAME_LEN, PASSHASH_LEN, SALT_LEN,
};
use crate::server::accounts::{AccountLocks, AccountRecord, AccountRepository};

/// Outcome of vetting a `Register` request.
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterVerdict {
    Accepted,
    /// Rejection code for `Failed`, from the registration code table.
    Rejected(u16),
}

/// Outcome of a `StartLogin` request.
pub enum LoginStart {
    /// Send `LoginChallenge` with this material and remember the challenge.
    Challenge {
        challenge: [u8; CHALLENGE_LEN],
        salt: [u8; SALT_LEN],
    },
    /// No such account; send `UserNotFound`.
    UnknownAccount,
}

/// A challenge waiting for its `FinishLogin`.
pub struct PendingChallenge {
    pub username: String,
    pub challenge: [u8; CHALLENGE_LEN],
    pub issued: Instant,
}

/// Outcome of verifying a `FinishLogin` solution.
#[derive(Debug, PartialEq, Eq)]
pub enum LoginVerdict {
    Accepted,
    /// Wrong solution; counts toward the failure limit.
    WrongSolution,
    /// The challenge aged out before the solution arrived.
    Expired,
    /// The account is banned or disabled; reported as a plain failure.
    AccountDisabled,
}

/// Authentication logic shared by all connections.
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    locks: AccountLocks,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(accounts: Arc<dyn AccountRepository>, config: AuthConfig) -> Self {
        AuthService {
            accounts,
            locks: AccountLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Arc<dyn AccountRepository> {
        &self.accounts
    }

    /// Serializes mutations for one account across connections.
    pub async fn account_lock(&self, username: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock_for(username).await
    }

    /// Vets and stores a new account.
    pub async fn register(
        &self,
        username: &str,
        salt: &[u8],
        passhash: &[u8],
        email: &str,
        origin: Option<std::net::IpAddr>,
    ) -> Result<RegisterVerdict, StorageError> {
        if !self.config.registration_enabled {
            return Ok(RegisterVerdict::Rejected(
                register_fail::REGISTRATION_DISABLED,
            ));
        }
        if !username_is_valid(username) {
            return Ok(RegisterVerdict::Rejected(register_fail::INVALID_USERNAME));
        }
        if salt.len() != SALT_LEN {
            return Ok(RegisterVerdict::Rejected(register_fail::INVALID_SALT));
        }
        if passhash.len() != PASSHASH_LEN {
            return Ok(RegisterVerdict::Rejected(register_fail::INVALID_HASH));
        }
        if !email_is_valid(email) {
            return Ok(RegisterVerdict::Rejected(register_fail::INVALID_EMAIL));
        }

        let lock = self.account_lock(username).await;
        let _guard = lock.lock().await;

        if self.accounts.fetch(username).await?.is_some() {
            return Ok(RegisterVerdict::Rejected(register_fail::USERNAME_TAKEN));
        }
        if self.accounts.email_in_use(email).await? {
            return Ok(RegisterVerdict::Rejected(register_fail::EMAIL_IN_USE));
        }

        let mut salt_fixed = [0u8; SALT_LEN];
        salt_fixed.copy_from_slice(salt);
        let mut passhash_fixed = [0u8; PASSHASH_LEN];
        passhash_fixed.copy_from_slice(passhash);

        let record = AccountRecord {
            username: username.to_lowercase(),
            email: email.to_string(),
            salt: salt_fixed,
            passhash: passhash_fixed,
            enabled: true,
            banned: false,
            created_at: Utc::now(),
            created_from: origin,
            characters: Vec::new(),
        };
        match self.accounts.insert(record).await {
            Ok(()) => {
                info!(username, "account registered");
                Ok(RegisterVerdict::Accepted)
            }
            // Lost a race with a concurrent registration elsewhere.
            Err(StorageError::Conflict { .. }) => {
                Ok(RegisterVerdict::Rejected(register_fail::USERNAME_TAKEN))
            }
            Err(e) => Err(e),
        }
    }

    /// Starts a login exchange for `username`.
    pub async fn start_login(&self, username: &str) -> Result<LoginStart, StorageError> {
        match self.accounts.fetch(username).await? {
            Some(account) => Ok(LoginStart::Challenge {
                challenge: credentials::generate_challenge(),
                salt: account.salt,
            }),
            None => {
                warn!(username, "login attempt for unknown account");
                Ok(LoginStart::UnknownAccount)
            }
        }
    }

    /// Verifies a `FinishLogin` solution against the pending challenge.
    pub async fn finish_login(
        &self,
        pending: &PendingChallenge,
        solution: &[u8],
        now: Instant,
    ) -> Result<LoginVerdict, StorageError> {
        if now.duration_since(pending.issued) > self.config.challenge_ttl() {
            return Ok(LoginVerdict::Expired);
        }
        let Some(account) = self.accounts.fetch(&pending.username).await? else {
            // Account vanished between challenge and solution.
            return Ok(LoginVerdict::WrongSolution);
        };
        if account.banned || !account.enabled {
            warn!(username = %pending.username, "login to disabled or banned account");
            return Ok(LoginVerdict::AccountDisabled);
        }
        if credentials::solution_matches(&pending.challenge, &account.passhash, solution) {
            info!(username = %pending.username, "login succeeded");
            Ok(LoginVerdict::Accepted)
        } else {
            warn!(username = %pending.username, "login solution mismatch");
            Ok(LoginVerdict::WrongSolution)
        }
    }
}

/// Usernames: 1-32 bytes, ASCII alphanumeric plus `_` and `-`, starting
/// with an alphanumeric.
pub fn username_is_valid(username: &str) -> bool {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return false;
    }
    let mut chars = username.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Emails: 3-64 bytes with an `@` somewhere in the middle.
pub fn email_is_valid(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LEN {
        return false;
    }
    match email.find('@') {
        Some(at) => at > 0 && at + 1 < email.len(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::accounts::InMemoryAccounts;
    use std::time::Duration;

    fn service() -> AuthService {
        AuthService::new(Arc::new(InMemoryAccounts::new()), AuthConfig::default())
    }

    fn valid_material(password: &str) -> ([u8; SALT_LEN], [u8; PASSHASH_LEN]) {
        let salt = credentials::generate_salt();
        (salt, credentials::compute_passhash(&salt, password))
    }

    #[test]
    fn username_rules() {
        assert!(username_is_valid("ambrosia"));
        assert!(username_is_valid("ab_c-3"));
        assert!(!username_is_valid(""));
        assert!(!username_is_valid("-leading"));
        assert!(!username_is_valid("has space"));
        assert!(!username_is_valid(&"x".repeat(33)));
    }

    #[test]
    fn email_rules() {
        assert!(email_is_valid("a@b.example"));
        assert!(!email_is_valid("no-at-sign"));
        assert!(!email_is_valid("@leading"));
        assert!(!email_is_valid("trailing@"));
        assert!(!email_is_valid(&format!("{}@example.com", "x".repeat(64))));
    }

    #[tokio::test]
    async fn register_rejects_each_bad_field_with_its_code() {
        let auth = service();
        let (salt, passhash) = valid_material("hunter2");

        let verdict = auth
            .register("bad name", &salt, &passhash, "a@example.com", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::INVALID_USERNAME)
        );

        let verdict = auth
            .register("gooduser", &salt[..15], &passhash, "a@example.com", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::INVALID_SALT)
        );

        let verdict = auth
            .register("gooduser", &salt, &passhash[..63], "a@example.com", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::INVALID_HASH)
        );

        let verdict = auth
            .register("gooduser", &salt, &passhash, "not-an-email", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::INVALID_EMAIL)
        );
    }

    #[tokio::test]
    async fn register_then_duplicate_username_and_email() {
        let auth = service();
        let (salt, passhash) = valid_material("hunter2");

        let verdict = auth
            .register("ambrosia", &salt, &passhash, "a@example.com", None)
            .await
            .unwrap();
        assert_eq!(verdict, RegisterVerdict::Accepted);

        let verdict = auth
            .register("AMBROSIA", &salt, &passhash, "b@example.com", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::USERNAME_TAKEN)
        );

        let verdict = auth
            .register("boris", &salt, &passhash, "A@Example.com", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::EMAIL_IN_USE)
        );
    }

    #[tokio::test]
    async fn registration_can_be_disabled() {
        let accounts: Arc<dyn AccountRepository> = Arc::new(InMemoryAccounts::new());
        let auth = AuthService::new(
            accounts,
            AuthConfig {
                registration_enabled: false,
                ..AuthConfig::default()
            },
        );
        let (salt, passhash) = valid_material("hunter2");
        let verdict = auth
            .register("ambrosia", &salt, &passhash, "a@example.com", None)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            RegisterVerdict::Rejected(register_fail::REGISTRATION_DISABLED)
        );
    }

    #[tokio::test]
    async fn full_challenge_exchange() {
        let auth = service();
        let (salt, passhash) = valid_material("hunter2");
        auth.register("ambrosia", &salt, &passhash, "a@example.com", None)
            .await
            .unwrap();

        let start = auth.start_login("ambrosia").await.unwrap();
        let LoginStart::Challenge {
            challenge,
            salt: sent_salt,
        } = start
        else {
            panic!("expected a challenge");
        };
        assert_eq!(sent_salt, salt);

        let pending = PendingChallenge {
            username: "ambrosia".into(),
            challenge,
            issued: Instant::now(),
        };

        // Client derives the solution from the salt it was sent.
        let derived = credentials::compute_passhash(&sent_salt, "hunter2");
        let solution = credentials::compute_solution(&challenge, &derived);
        let verdict = auth
            .finish_login(&pending, &solution, Instant::now())
            .await
            .unwrap();
        assert_eq!(verdict, LoginVerdict::Accepted);

        let bad = credentials::compute_solution(&challenge, &[0u8; PASSHASH_LEN]);
        let verdict = auth.finish_login(&pending, &bad, Instant::now()).await.unwrap();
        assert_eq!(verdict, LoginVerdict::WrongSolution);
    }

    #[tokio::test]
    async fn unknown_account_yields_user_not_found() {
        let auth = service();
        assert!(matches!(
            auth.start_login("ghost").await.unwrap(),
            LoginStart::UnknownAccount
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_challenge_expires() {
        let auth = service();
        let (salt, passhash) = valid_material("hunter2");
        auth.register("ambrosia", &salt, &passhash, "a@example.com", None)
            .await
            .unwrap();

        let LoginStart::Challenge { challenge, .. } =
            auth.start_login("ambrosia").await.unwrap()
        else {
            panic!("expected a challenge");
        };
        let pending = PendingChallenge {
            username: "ambrosia".into(),
            challenge,
            issued: Instant::now(),
        };

        tokio::time::advance(Duration::from_secs(16)).await;

        let solution = credentials::compute_solution(&challenge, &passhash);
        let verdict = auth
            .finish_login(&pending, &solution, Instant::now())
            .await
            .unwrap();
        assert_eq!(verdict, LoginVerdict::Expired);
    }
}
