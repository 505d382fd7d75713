use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use streamgate::ports::PortAllocator;

#[test]
fn test_triple_allocation_under_contention() {
    // Only a handful of ports free across all pools
    let free: HashSet<u16> = [1935, 2053, 8000].into();
    let alloc = PortAllocator::with_probe(move |p| free.contains(&p));
    let a = alloc.allocate_triple().unwrap();
    assert_eq!(a.rtmp_port, 1935);
    assert_eq!(a.stream_port, 8000);
    assert_eq!(a.web_port, 2053);
}

#[test]
fn test_allocation_fails_when_pool_exhausted() {
    // Only the RTMP default is free, so the web role cannot be satisfied
    let alloc = PortAllocator::with_probe(|p| p == 1935);
    let err = alloc.allocate_triple().unwrap_err();
    assert!(err.to_string().contains("web"));
}

proptest! {
    /// Whatever subset of ports is free, a successful allocation always
    /// yields three distinct ports the probe reported as available.
    #[test]
    fn prop_allocated_ports_are_distinct_and_available(seed in any::<u64>()) {
        let free = Arc::new(move |p: u16| {
            // Pseudo-random but deterministic availability per seed
            let x = (p as u64).wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(seed);
            x % 3 != 0
        });
        let probe = Arc::clone(&free);
        let alloc = PortAllocator::with_probe(move |p| probe(p));
        if let Ok(a) = alloc.allocate_triple() {
            let ports = [a.web_port, a.stream_port, a.rtmp_port];
            let distinct: HashSet<u16> = ports.into_iter().collect();
            prop_assert_eq!(distinct.len(), 3);
            for p in ports {
                prop_assert!(free(p), "allocated unavailable port {}", p);
            }
        }
    }

    #[test]
    fn prop_picked_port_comes_from_candidates(pool in proptest::collection::vec(1024u16..65535, 1..40)) {
        let alloc = PortAllocator::with_probe(|_| true);
        let picked = alloc.pick_port(&pool, &[]).unwrap();
        prop_assert!(pool.contains(&picked));
    }
}
