use anyhow::Result;
use argon2::password_hash::rand_core::RngCore;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use md5::{Digest, Md5};
use subtle::ConstantTimeEq;

use super::HashAlgorithm;

/// Hash a password using Argon2id with configurable parameters.
///
/// - `memory_cost`: memory in KiB (default 65536 = 64 MiB)
/// - `time_cost`: number of iterations (default 4)
/// - `parallelism`: number of lanes (default 2)
pub fn hash_password_with_params(
    password: &str,
    memory_cost: u32,
    time_cost: u32,
    parallelism: u32,
) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(memory_cost, time_cost, parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?,
    );
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Hash a password using Argon2id with the target deployment parameters.
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with_params(password, 65536, 4, 2)
}

/// Verify a password against a stored hash, detecting the hash format
/// from its prefix.
pub fn verify_password(password: &str, stored: &str) -> bool {
    verify_with(HashAlgorithm::detect(stored), password, stored)
}

/// Verify a password against a stored hash of a known format.
///
/// Legacy unsalted MD5 and bcrypt hashes are still verified so accounts
/// created before the Argon2id migration can log in; `needs_upgrade`
/// reports whether the stored hash should be replaced after a successful
/// verification.
pub fn verify_with(algorithm: HashAlgorithm, password: &str, stored: &str) -> bool {
    match algorithm {
        HashAlgorithm::Legacy => {
            let computed = hex::encode(Md5::digest(password.as_bytes()));
            computed.as_bytes().ct_eq(stored.as_bytes()).into()
        }
        HashAlgorithm::Bcrypt => bcrypt::verify(password, stored).unwrap_or(false),
        HashAlgorithm::Argon2id => {
            let parsed = match PasswordHash::new(stored) {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse password hash");
                    return false;
                }
            };
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        }
    }
}

/// Whether a stored hash should be re-hashed with current parameters.
///
/// True for legacy MD5 and bcrypt hashes, and for Argon2id hashes whose
/// cost parameters fall below the given targets.
pub fn needs_upgrade(stored: &str, memory_cost: u32, time_cost: u32, parallelism: u32) -> bool {
    match HashAlgorithm::detect(stored) {
        HashAlgorithm::Legacy | HashAlgorithm::Bcrypt => true,
        HashAlgorithm::Argon2id => {
            let Ok(parsed) = PasswordHash::new(stored) else {
                return true;
            };
            let Ok(params) = argon2::Params::try_from(&parsed) else {
                return true;
            };
            params.m_cost() < memory_cost
                || params.t_cost() < time_cost
                || params.p_cost() < parallelism
        }
    }
}

/// Re-hash a verified password with the given Argon2id parameters.
pub fn upgrade_hash(
    password: &str,
    memory_cost: u32,
    time_cost: u32,
    parallelism: u32,
) -> Result<String> {
    hash_password_with_params(password, memory_cost, time_cost, parallelism)
}

/// Password strength rating based on character-class diversity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strength::Weak => write!(f, "weak"),
            Strength::Medium => write!(f, "medium"),
            Strength::Strong => write!(f, "strong"),
        }
    }
}

/// Rate a password by counting character classes present: lowercase,
/// uppercase, digits, and other. 0-1 classes is weak, 2 is medium,
/// 3 or more is strong.
pub fn rate_strength(password: &str) -> Strength {
    let classes = character_classes(password);
    match classes {
        0 | 1 => Strength::Weak,
        2 => Strength::Medium,
        _ => Strength::Strong,
    }
}

fn character_classes(password: &str) -> u32 {
    let mut lower = false;
    let mut upper = false;
    let mut digit = false;
    let mut other = false;
    for c in password.chars() {
        if c.is_ascii_lowercase() {
            lower = true;
        } else if c.is_ascii_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else {
            other = true;
        }
    }
    [lower, upper, digit, other].iter().filter(|b| **b).count() as u32
}

/// Whether a candidate password meets the policy for new passwords:
/// at least `min_length` characters and at least two character classes.
pub fn acceptable_new_password(password: &str, min_length: usize) -> bool {
    password.chars().count() >= min_length && character_classes(password) >= 2
}

/// Generate a random alphanumeric password of the given length.
pub fn generate_password(length: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let charset_len = CHARSET.len() as u32;
    // Rejection sampling: reject values >= largest multiple of charset_len
    let limit = (u32::MAX / charset_len) * charset_len;
    let mut password = Vec::with_capacity(length);
    for _ in 0..length {
        loop {
            let val = OsRng.next_u32();
            if val < limit {
                password.push(CHARSET[(val % charset_len) as usize]);
                break;
            }
        }
    }
    String::from_utf8(password).expect("charset is ASCII")
}

/// Validate a login username: 3 to 50 characters, ASCII alphanumerics,
/// underscore, and hyphen only.
pub fn validate_username(username: &str) -> bool {
    let len = username.chars().count();
    (3..=50).contains(&len)
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
