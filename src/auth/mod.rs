pub mod password;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::audit::AccessLogger;
use crate::config::types::SecurityConfig;
use crate::ratelimit::RateLimiter;
use crate::session::SessionContext;
use crate::token::TokenService;

/// Dummy hash for timing-safe user enumeration prevention
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Stored hash format, detected from the hash prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// Unsalted hex MD5 digest, pre-migration accounts only
    Legacy,
    /// bcrypt, intermediate migration step
    Bcrypt,
    /// Argon2id PHC string, current format
    Argon2id,
}

impl HashAlgorithm {
    pub fn detect(stored: &str) -> Self {
        if stored.starts_with("$argon2") {
            HashAlgorithm::Argon2id
        } else if stored.starts_with("$2y$") || stored.starts_with("$2a$") || stored.starts_with("$2b$") {
            HashAlgorithm::Bcrypt
        } else {
            HashAlgorithm::Legacy
        }
    }
}

/// A stored credential for a login account. The algorithm tag is fixed at
/// construction; verification dispatches on it rather than re-sniffing
/// the hash string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: u64,
    pub username: String,
    pub password_hash: String,
    pub algorithm: HashAlgorithm,
    /// Unix timestamp of the last password or hash change, 0 if unknown.
    pub last_changed: u64,
}

impl Credential {
    pub fn new(user_id: u64, username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let password_hash = password_hash.into();
        let algorithm = HashAlgorithm::detect(&password_hash);
        Self {
            user_id,
            username: username.into(),
            password_hash,
            algorithm,
            last_changed: 0,
        }
    }

    pub fn verify(&self, candidate: &str) -> bool {
        password::verify_with(self.algorithm, candidate, &self.password_hash)
    }

    /// Whether the stored hash should be re-hashed with current parameters.
    pub fn needs_upgrade(&self, memory_cost: u32, time_cost: u32, parallelism: u32) -> bool {
        match self.algorithm {
            HashAlgorithm::Legacy | HashAlgorithm::Bcrypt => true,
            HashAlgorithm::Argon2id => {
                password::needs_upgrade(&self.password_hash, memory_cost, time_cost, parallelism)
            }
        }
    }

    /// Re-hash a verified password and return the upgraded credential.
    pub fn upgrade(
        &self,
        candidate: &str,
        memory_cost: u32,
        time_cost: u32,
        parallelism: u32,
    ) -> Result<Credential> {
        let new_hash = password::upgrade_hash(candidate, memory_cost, time_cost, parallelism)?;
        Ok(Credential {
            user_id: self.user_id,
            username: self.username.clone(),
            password_hash: new_hash,
            algorithm: HashAlgorithm::Argon2id,
            last_changed: unix_now(),
        })
    }
}

/// Backing store for credentials. Lookups return the credential by
/// username; `update_hash` persists a re-hash after a legacy login.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, username: &str) -> Option<Credential>;
    fn update_hash(&self, user_id: u64, new_hash: &str) -> Result<()>;
}

/// Result of a login attempt. Rate limiting is reported as its own state
/// so the host layer can return 429 instead of a generic failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success {
        credential: Credential,
        hash_upgraded: bool,
    },
    InvalidCredentials,
    RateLimited,
}

/// Orchestrates login: rate limiting, hash verification across all three
/// stored formats, transparent hash upgrade, CSRF rotation, and audit
/// logging on every path.
pub struct LoginService {
    limiter: Arc<RateLimiter>,
    tokens: Arc<TokenService>,
    audit: Arc<AccessLogger>,
    max_attempts: u32,
    window: Duration,
    argon2_memory_cost: u32,
    argon2_time_cost: u32,
    argon2_parallelism: u32,
}

impl LoginService {
    pub fn new(
        limiter: Arc<RateLimiter>,
        tokens: Arc<TokenService>,
        audit: Arc<AccessLogger>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            limiter,
            tokens,
            audit,
            max_attempts: config.login_max_attempts,
            window: Duration::from_secs(config.login_window),
            argon2_memory_cost: config.argon2_memory_cost,
            argon2_time_cost: config.argon2_time_cost,
            argon2_parallelism: config.argon2_parallelism,
        }
    }

    /// Attempt a login from `client_ip`.
    ///
    /// The rate limit check runs before any credential work, keyed by the
    /// client address. A successful login resets the key and rotates the
    /// session's CSRF token. Unknown usernames go through a dummy
    /// verification so response timing does not reveal which usernames
    /// exist.
    pub fn login(
        &self,
        session: &mut SessionContext,
        username: &str,
        password: &str,
        client_ip: &str,
        store: &dyn CredentialStore,
    ) -> LoginOutcome {
        let key = format!("login_{}", client_ip);
        if self.limiter.is_limited(&key, self.max_attempts, self.window) {
            warn!(ip = %client_ip, "Login attempt rejected, rate limited");
            self.audit.log_rate_limit_trip(&key, client_ip);
            return LoginOutcome::RateLimited;
        }

        if !password::validate_username(username) {
            let _ = password::verify_password(password, DUMMY_HASH);
            debug!(ip = %client_ip, "Login rejected, malformed username");
            self.audit.log_login_failure(username, client_ip);
            return LoginOutcome::InvalidCredentials;
        }

        let cred = match store.lookup(username) {
            Some(c) => c,
            None => {
                debug!(username = %username, "User not found, performing dummy verification");
                let _ = password::verify_password(password, DUMMY_HASH);
                self.audit.log_login_failure(username, client_ip);
                return LoginOutcome::InvalidCredentials;
            }
        };

        if !cred.verify(password) {
            debug!(username = %username, ip = %client_ip, "Password verification failed");
            self.audit.log_login_failure(username, client_ip);
            return LoginOutcome::InvalidCredentials;
        }

        self.limiter.reset(&key);
        self.tokens.rotate_csrf(session);

        let (cred, hash_upgraded) = if cred.needs_upgrade(
            self.argon2_memory_cost,
            self.argon2_time_cost,
            self.argon2_parallelism,
        ) {
            self.upgrade_stored_hash(cred, password, store)
        } else {
            (cred, false)
        };

        info!(username = %username, ip = %client_ip, hash_upgraded, "Login succeeded");
        self.audit.log_login_success(username, client_ip);
        LoginOutcome::Success {
            credential: cred,
            hash_upgraded,
        }
    }

    fn upgrade_stored_hash(
        &self,
        cred: Credential,
        password: &str,
        store: &dyn CredentialStore,
    ) -> (Credential, bool) {
        let upgraded = match cred.upgrade(
            password,
            self.argon2_memory_cost,
            self.argon2_time_cost,
            self.argon2_parallelism,
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(username = %cred.username, error = %e, "Hash upgrade failed, keeping old hash");
                return (cred, false);
            }
        };
        match store.update_hash(upgraded.user_id, &upgraded.password_hash) {
            Ok(()) => {
                info!(username = %upgraded.username, "Password hash upgraded to argon2id");
                (upgraded, true)
            }
            Err(e) => {
                // Login still succeeds; the old hash stays valid
                warn!(username = %cred.username, error = %e, "Failed to persist upgraded hash");
                (cred, false)
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
