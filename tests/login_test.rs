use std::sync::{Arc, Mutex};

use anyhow::Result;
use streamgate::auth::password;
use streamgate::auth::{Credential, CredentialStore, LoginOutcome, LoginService};
use streamgate::config::types::SecurityConfig;
use streamgate::ratelimit::RateLimiter;
use streamgate::session::SessionContext;
use streamgate::token::TokenService;
use streamgate::AccessLogger;
use tempfile::TempDir;

/// Single-user store that records hash upgrades.
struct OneUserStore {
    credential: Mutex<Credential>,
}

impl OneUserStore {
    fn new(username: &str, hash: &str) -> Self {
        Self {
            credential: Mutex::new(Credential::new(1, username, hash)),
        }
    }

    fn current_hash(&self) -> String {
        self.credential.lock().unwrap().password_hash.clone()
    }
}

impl CredentialStore for OneUserStore {
    fn lookup(&self, username: &str) -> Option<Credential> {
        let cred = self.credential.lock().unwrap();
        (cred.username == username).then(|| cred.clone())
    }

    fn update_hash(&self, _user_id: u64, new_hash: &str) -> Result<()> {
        let mut cred = self.credential.lock().unwrap();
        cred.password_hash = new_hash.to_string();
        cred.algorithm = streamgate::auth::HashAlgorithm::detect(new_hash);
        Ok(())
    }
}

fn config() -> SecurityConfig {
    SecurityConfig {
        // Cheap parameters so the test suite stays fast
        argon2_memory_cost: 64,
        argon2_time_cost: 1,
        argon2_parallelism: 1,
        ..SecurityConfig::default()
    }
}

fn service() -> (LoginService, TempDir) {
    let dir = TempDir::new().unwrap();
    let svc = LoginService::new(
        Arc::new(RateLimiter::default()),
        Arc::new(TokenService::new("integration-secret", true)),
        Arc::new(AccessLogger::new(dir.path(), 10)),
        &config(),
    );
    (svc, dir)
}

#[test]
fn test_legacy_account_migrates_on_first_login() {
    // Pre-migration account with an unsalted MD5 hash of "admin"
    let store = OneUserStore::new("admin", "21232f297a57a5a743894a0e4a801fc3");
    let (svc, _dir) = service();
    let mut session = SessionContext::new();

    match svc.login(&mut session, "admin", "admin", "198.51.100.4", &store) {
        LoginOutcome::Success {
            credential,
            hash_upgraded,
        } => {
            assert_eq!(credential.user_id, 1);
            assert!(hash_upgraded);
        }
        other => panic!("expected success, got {:?}", other),
    }

    // The stored hash is now Argon2id and still verifies
    let new_hash = store.current_hash();
    assert!(new_hash.starts_with("$argon2id$"));
    assert!(password::verify_password("admin", &new_hash));

    // The second login verifies against the upgraded hash without another upgrade
    assert!(matches!(
        svc.login(&mut session, "admin", "admin", "198.51.100.4", &store),
        LoginOutcome::Success {
            hash_upgraded: false,
            ..
        }
    ));
}

#[test]
fn test_bcrypt_account_migrates_too() {
    let bcrypt_hash = bcrypt::hash("streampass1", 4).unwrap();
    let store = OneUserStore::new("operator", &bcrypt_hash);
    let (svc, _dir) = service();
    let mut session = SessionContext::new();

    assert!(matches!(
        svc.login(&mut session, "operator", "streampass1", "198.51.100.4", &store),
        LoginOutcome::Success {
            hash_upgraded: true,
            ..
        }
    ));
    assert!(store.current_hash().starts_with("$argon2id$"));
}

#[test]
fn test_failed_login_does_not_touch_hash() {
    let store = OneUserStore::new("admin", "21232f297a57a5a743894a0e4a801fc3");
    let (svc, _dir) = service();
    let mut session = SessionContext::new();

    assert_eq!(
        svc.login(&mut session, "admin", "wrong", "198.51.100.4", &store),
        LoginOutcome::InvalidCredentials
    );
    assert_eq!(store.current_hash(), "21232f297a57a5a743894a0e4a801fc3");
    assert!(!session.has_csrf_token());
}

#[test]
fn test_successful_login_rotates_csrf_token() {
    let hash = password::hash_password_with_params("streampass1", 64, 1, 1).unwrap();
    let store = OneUserStore::new("admin", &hash);
    let (svc, _dir) = service();
    let tokens = TokenService::new("integration-secret", true);
    let mut session = SessionContext::new();

    let before = tokens.issue_csrf(&mut session);
    assert!(matches!(
        svc.login(&mut session, "admin", "streampass1", "198.51.100.4", &store),
        LoginOutcome::Success { .. }
    ));
    let after = tokens.issue_csrf(&mut session);
    assert_ne!(before, after);
}

#[test]
fn test_lockout_after_repeated_failures() {
    let store = OneUserStore::new("admin", "21232f297a57a5a743894a0e4a801fc3");
    let (svc, _dir) = service();
    let mut session = SessionContext::new();

    for _ in 0..5 {
        assert_eq!(
            svc.login(&mut session, "admin", "wrong", "203.0.113.7", &store),
            LoginOutcome::InvalidCredentials
        );
    }
    // Correct credentials no longer help from the limited address
    assert_eq!(
        svc.login(&mut session, "admin", "admin", "203.0.113.7", &store),
        LoginOutcome::RateLimited
    );
    // But work from another address
    assert!(matches!(
        svc.login(&mut session, "admin", "admin", "203.0.113.8", &store),
        LoginOutcome::Success { .. }
    ));
}

#[test]
fn test_unknown_user_and_bad_username_uniform_outcome() {
    let store = OneUserStore::new("admin", "21232f297a57a5a743894a0e4a801fc3");
    let (svc, _dir) = service();
    let mut session = SessionContext::new();

    assert_eq!(
        svc.login(&mut session, "nosuchuser", "admin", "198.51.100.4", &store),
        LoginOutcome::InvalidCredentials
    );
    assert_eq!(
        svc.login(&mut session, "bad name!", "admin", "198.51.100.4", &store),
        LoginOutcome::InvalidCredentials
    );
}
