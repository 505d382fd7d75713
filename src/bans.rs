use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BanError {
    #[error("invalid IP or CIDR: {0}")]
    InvalidTarget(String),
    #[error("failed to persist ban state: {0}")]
    Persist(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanKind {
    Banned,
    Whitelisted,
}

/// One record per target. `target` is an IP address or CIDR block as
/// entered by the operator; `expires_at` is epoch seconds, `None` for
/// permanent records. Whitelist records are always permanent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanRecord {
    pub target: String,
    pub kind: BanKind,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub issued_by: String,
    pub created_at: u64,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl BanRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }
}

/// Persisted payload. `#[serde(default)]` keeps older files loading.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BanState {
    #[serde(default)]
    records: Vec<BanRecord>,
}

/// Ban and whitelist store backed by a JSON file.
///
/// At most one record exists per target, and whitelist records always win
/// over bans. Every mutation is persisted atomically before returning.
pub struct BanStore {
    path: PathBuf,
    state: Mutex<BanState>,
}

impl BanStore {
    /// Load the store from `path`. A missing file starts empty; a corrupt
    /// file is discarded with a warning rather than refusing to start.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<BanState>(&data) {
                Ok(state) => {
                    debug!(
                        path = %path.display(),
                        records = state.records.len(),
                        "Ban state loaded"
                    );
                    state
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt ban state file, starting empty");
                    BanState::default()
                }
            },
            Err(_) => BanState::default(),
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Ban an IP or CIDR block. Any existing record for the target is
    /// replaced, whitelist entries included; the newest decision wins.
    pub fn ban(
        &self,
        target: &str,
        reason: &str,
        duration: Option<Duration>,
        issued_by: &str,
    ) -> Result<BanRecord, BanError> {
        let target = target.trim();
        parse_target(target)?;
        let now = unix_now();
        let record = BanRecord {
            target: target.to_string(),
            kind: BanKind::Banned,
            reason: reason.to_string(),
            issued_by: issued_by.to_string(),
            created_at: now,
            expires_at: duration.map(|d| now + d.as_secs()),
        };

        let mut state = self.state.lock().unwrap();
        state.records.retain(|r| r.target != target);
        state.records.push(record.clone());
        save_state(&self.path, &state)?;
        info!(target = %target, reason = %reason, permanent = record.expires_at.is_none(), "Target banned");
        Ok(record)
    }

    /// Whitelist a target permanently, lifting any overlapping bans.
    pub fn whitelist(
        &self,
        target: &str,
        reason: &str,
        issued_by: &str,
    ) -> Result<BanRecord, BanError> {
        let target = target.trim();
        let net = parse_target(target)?;
        let record = BanRecord {
            target: target.to_string(),
            kind: BanKind::Whitelisted,
            reason: reason.to_string(),
            issued_by: issued_by.to_string(),
            created_at: unix_now(),
            expires_at: None,
        };
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|r| {
            r.kind == BanKind::Whitelisted
                || parse_target(&r.target).map(|n| !nets_overlap(&n, &net)).unwrap_or(true)
        });
        let lifted = before - state.records.len();
        state.records.retain(|r| r.target != target);
        state.records.push(record.clone());
        save_state(&self.path, &state)?;
        info!(target = %target, bans_lifted = lifted, "Target whitelisted");
        Ok(record)
    }

    /// Remove the record for a target, banned or whitelisted alike.
    /// Returns whether one was removed.
    pub fn unban(&self, target: &str) -> Result<bool, BanError> {
        let target = target.trim();
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|r| r.target != target);
        let removed = state.records.len() < before;
        if removed {
            save_state(&self.path, &state)?;
            info!(target = %target, "Record removed");
        }
        Ok(removed)
    }

    /// Drop expired temporary bans. Permanent bans and whitelist records
    /// are never touched. Returns the number of records removed.
    pub fn clean_expired(&self) -> Result<usize, BanError> {
        let now = unix_now();
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state
            .records
            .retain(|r| r.kind == BanKind::Whitelisted || !r.is_expired(now));
        let removed = before - state.records.len();
        if removed > 0 {
            save_state(&self.path, &state)?;
            info!(removed, "Expired bans cleaned");
        }
        Ok(removed)
    }

    /// Whether an address is banned right now. Whitelisted addresses are
    /// never banned; expired records do not match.
    pub fn is_banned(&self, ip: IpAddr) -> bool {
        let now = unix_now();
        let state = self.state.lock().unwrap();
        if Self::matches(&state, ip, BanKind::Whitelisted, now) {
            return false;
        }
        Self::matches(&state, ip, BanKind::Banned, now)
    }

    pub fn is_whitelisted(&self, ip: IpAddr) -> bool {
        let state = self.state.lock().unwrap();
        Self::matches(&state, ip, BanKind::Whitelisted, unix_now())
    }

    fn matches(state: &BanState, ip: IpAddr, kind: BanKind, now: u64) -> bool {
        state.records.iter().any(|r| {
            r.kind == kind
                && !r.is_expired(now)
                && parse_target(&r.target).map(|n| n.contains(&ip)).unwrap_or(false)
        })
    }

    /// All non-expired ban records.
    pub fn active_bans(&self) -> Vec<BanRecord> {
        let now = unix_now();
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .filter(|r| r.kind == BanKind::Banned && !r.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn whitelisted(&self) -> Vec<BanRecord> {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .filter(|r| r.kind == BanKind::Whitelisted)
            .cloned()
            .collect()
    }
}

/// Parse an IP or CIDR entry, accepting a bare address as a /32 (or /128).
fn parse_target(entry: &str) -> Result<IpNet, BanError> {
    if let Ok(net) = entry.parse::<IpNet>() {
        Ok(net)
    } else if let Ok(ip) = entry.parse::<IpAddr>() {
        Ok(IpNet::from(ip))
    } else {
        Err(BanError::InvalidTarget(entry.to_string()))
    }
}

fn nets_overlap(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Atomic write: temp file, fsync, 0600, rename.
fn save_state(path: &Path, state: &BanState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(state)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let tmp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(data.as_bytes())?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "Ban state saved");
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> BanStore {
        BanStore::open(tmp.path().join("bans.json"))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_ban_and_check() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("1.2.3.4", "brute force", None, "admin").unwrap();
        assert!(s.is_banned(ip("1.2.3.4")));
        assert!(!s.is_banned(ip("1.2.3.5")));
    }

    #[test]
    fn test_cidr_ban_matches_members() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("10.0.0.0/24", "scanner range", None, "admin").unwrap();
        assert!(s.is_banned(ip("10.0.0.77")));
        assert!(!s.is_banned(ip("10.0.1.1")));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        assert!(matches!(
            s.ban("not-an-ip", "x", None, "admin"),
            Err(BanError::InvalidTarget(_))
        ));
        assert!(matches!(
            s.whitelist("999.1.1.1", "", "admin"),
            Err(BanError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_ban_supersedes_whitelist_record() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.whitelist("192.168.1.10", "office", "admin").unwrap();
        s.ban("192.168.1.10", "compromised", None, "admin").unwrap();
        assert!(s.is_banned(ip("192.168.1.10")));
        assert!(!s.is_whitelisted(ip("192.168.1.10")));
        assert!(s.whitelisted().is_empty());
    }

    #[test]
    fn test_whitelisting_lifts_existing_ban() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("1.2.3.4", "x", None, "admin").unwrap();
        assert!(s.is_banned(ip("1.2.3.4")));
        s.whitelist("1.2.3.4", "appeal accepted", "admin").unwrap();
        assert!(!s.is_banned(ip("1.2.3.4")));
        assert!(s.active_bans().is_empty());
    }

    #[test]
    fn test_whitelist_cidr_still_shields_member_ban() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.whitelist("10.0.0.0/24", "lan", "admin").unwrap();
        // A narrower ban record coexists, but the covering whitelist
        // takes precedence at check time
        s.ban("10.0.0.5", "x", None, "admin").unwrap();
        assert!(!s.is_banned(ip("10.0.0.5")));
        assert_eq!(s.active_bans().len(), 1);
    }

    #[test]
    fn test_unban_removes_record_of_either_kind() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("1.2.3.4", "x", None, "admin").unwrap();
        s.whitelist("5.6.7.8", "", "admin").unwrap();
        assert!(s.unban("1.2.3.4").unwrap());
        assert!(!s.unban("1.2.3.4").unwrap());
        assert!(!s.is_banned(ip("1.2.3.4")));
        assert!(s.unban("5.6.7.8").unwrap());
        assert!(!s.is_whitelisted(ip("5.6.7.8")));
    }

    #[test]
    fn test_expired_ban_not_enforced() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("1.2.3.4", "x", Some(Duration::ZERO), "admin").unwrap();
        assert!(!s.is_banned(ip("1.2.3.4")));
    }

    #[test]
    fn test_clean_expired_keeps_permanent_and_whitelist() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("1.2.3.4", "temp", Some(Duration::ZERO), "admin").unwrap();
        s.ban("5.6.7.8", "perm", None, "admin").unwrap();
        s.whitelist("192.168.1.1", "", "admin").unwrap();
        assert_eq!(s.clean_expired().unwrap(), 1);
        assert!(s.is_banned(ip("5.6.7.8")));
        assert!(s.is_whitelisted(ip("192.168.1.1")));
        assert_eq!(s.clean_expired().unwrap(), 0);
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bans.json");
        {
            let s = BanStore::open(&path);
            s.ban("1.2.3.4", "persisted", None, "admin").unwrap();
            s.whitelist("5.6.7.8", "", "admin").unwrap();
        }
        let s = BanStore::open(&path);
        assert!(s.is_banned(ip("1.2.3.4")));
        assert!(s.is_whitelisted(ip("5.6.7.8")));
        let bans = s.active_bans();
        assert_eq!(bans[0].reason, "persisted");
        assert_eq!(bans[0].issued_by, "admin");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bans.json");
        std::fs::write(&path, "{ not json").unwrap();
        let s = BanStore::open(&path);
        assert!(s.active_bans().is_empty());
        // And the store still accepts writes
        s.ban("1.2.3.4", "x", None, "admin").unwrap();
        assert!(s.is_banned(ip("1.2.3.4")));
    }

    #[test]
    fn test_reban_replaces_record() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.ban("1.2.3.4", "first", Some(Duration::ZERO), "admin").unwrap();
        s.ban("1.2.3.4", "second", None, "admin").unwrap();
        let bans = s.active_bans();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].reason, "second");
        assert!(bans[0].expires_at.is_none());
    }
}
