use std::net::IpAddr;
use std::time::Duration;

use streamgate::bans::BanStore;
use tempfile::TempDir;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn test_full_ban_lifecycle_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bans.json");

    {
        let store = BanStore::open(&path);
        store
            .ban("203.0.113.50", "credential stuffing", None, "admin")
            .unwrap();
        store
            .ban(
                "198.51.100.0/24",
                "scanner range",
                Some(Duration::from_secs(3600)),
                "admin",
            )
            .unwrap();
        store.whitelist("192.0.2.10", "office", "admin").unwrap();
    }

    // A fresh process sees the same state
    let store = BanStore::open(&path);
    assert!(store.is_banned(ip("203.0.113.50")));
    assert!(store.is_banned(ip("198.51.100.99")));
    assert!(store.is_whitelisted(ip("192.0.2.10")));
    assert_eq!(store.active_bans().len(), 2);

    assert!(store.unban("203.0.113.50").unwrap());
    let store = BanStore::open(&path);
    assert!(!store.is_banned(ip("203.0.113.50")));
}

#[test]
fn test_whitelist_and_ban_supersede_each_other() {
    let tmp = TempDir::new().unwrap();
    let store = BanStore::open(tmp.path().join("bans.json"));

    store.ban("203.0.113.50", "abuse", None, "admin").unwrap();
    store
        .whitelist("203.0.113.50", "appeal accepted", "admin")
        .unwrap();
    assert!(!store.is_banned(ip("203.0.113.50")));
    assert!(store.is_whitelisted(ip("203.0.113.50")));

    // Banning again replaces the whitelist record; the newest decision wins
    store.ban("203.0.113.50", "again", None, "admin").unwrap();
    assert!(store.is_banned(ip("203.0.113.50")));
    assert!(!store.is_whitelisted(ip("203.0.113.50")));
    assert_eq!(store.active_bans().len(), 1);
}

#[test]
fn test_unban_clears_whitelist_records_too() {
    let tmp = TempDir::new().unwrap();
    let store = BanStore::open(tmp.path().join("bans.json"));

    store.whitelist("192.0.2.10", "office", "admin").unwrap();
    assert!(store.unban("192.0.2.10").unwrap());
    assert!(!store.is_whitelisted(ip("192.0.2.10")));
    assert!(store.whitelisted().is_empty());
}

#[test]
fn test_clean_expired_is_selective() {
    let tmp = TempDir::new().unwrap();
    let store = BanStore::open(tmp.path().join("bans.json"));

    store
        .ban("203.0.113.1", "expired", Some(Duration::ZERO), "admin")
        .unwrap();
    store.ban("203.0.113.2", "permanent", None, "admin").unwrap();
    store
        .ban("203.0.113.3", "long", Some(Duration::from_secs(86400)), "admin")
        .unwrap();
    store.whitelist("192.0.2.1", "", "admin").unwrap();

    assert_eq!(store.clean_expired().unwrap(), 1);
    assert_eq!(store.active_bans().len(), 2);
    let whitelist = store.whitelisted();
    assert_eq!(whitelist.len(), 1);
    assert_eq!(whitelist[0].target, "192.0.2.1");
}

#[test]
fn test_ban_records_carry_issuer() {
    let tmp = TempDir::new().unwrap();
    let store = BanStore::open(tmp.path().join("bans.json"));

    store
        .ban("203.0.113.50", "abuse", None, "198.51.100.4")
        .unwrap();
    let bans = store.active_bans();
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].issued_by, "198.51.100.4");
    assert_eq!(bans[0].reason, "abuse");
}

#[test]
fn test_ipv6_targets() {
    let tmp = TempDir::new().unwrap();
    let store = BanStore::open(tmp.path().join("bans.json"));

    store.ban("2001:db8::/32", "v6 range", None, "admin").unwrap();
    assert!(store.is_banned(ip("2001:db8::1")));
    assert!(!store.is_banned(ip("2001:db9::1")));
}
