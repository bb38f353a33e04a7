//! Model checks for the storage backends.
//!
//! Every backend is driven with the same random operation sequence as a
//! `BTreeMap` and must agree with it on every read and scan.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;
use tierdb::buffer::BufferPoolManager;
use tierdb::common::config::{BackendKind, StorageConfig};
use tierdb::index::{Backend, BTreeBackend, HybridStorage, LsmTree, PagedBTree, StorageBackend};
use tierdb::storage::MemoryPageStore;

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u8),
    Delete(u8),
    Get(u8),
    Scan(u8, u8),
    /// Keys starting with the first `len` bytes of `key(k)`.
    ScanPrefix(u8, usize),
    /// Backend housekeeping: flush, compact, rebalance or sync.
    Maintain,
}

fn key(k: u8) -> Vec<u8> {
    format!("key-{:03}", k).into_bytes()
}

fn arb_op() -> impl Strategy<Value = Op> {
    // Small key space so overwrites and deletes of live keys are common
    prop_oneof![
        4 => (0u8..40, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0u8..40).prop_map(Op::Delete),
        3 => (0u8..40).prop_map(Op::Get),
        1 => (0u8..40, 0u8..40).prop_map(|(a, b)| Op::Scan(a.min(b), a.max(b))),
        1 => (0u8..40, 0usize..=7).prop_map(|(k, len)| Op::ScanPrefix(k, len)),
        1 => Just(Op::Maintain),
    ]
}

fn small_config(kind: BackendKind) -> StorageConfig {
    StorageConfig::new(kind)
        .btree_order(3)
        .memtable_size(4)
        .hot_threshold(2)
}

fn maintain(backend: &Backend) {
    match backend {
        Backend::BTree(_) => {}
        Backend::Lsm(lsm) => lsm.compact(),
        Backend::Hybrid(hybrid) => {
            hybrid.rebalance(Duration::ZERO).unwrap();
            hybrid.compact();
        }
    }
}

fn check_kind(kind: BackendKind, ops: &[Op]) -> std::result::Result<(), TestCaseError> {
    let backend = Backend::from_config(&small_config(kind)).unwrap();
    check_against_model(&backend, || maintain(&backend), ops)?;

    if let Backend::BTree(btree) = &backend {
        prop_assert!(btree.with_tree(|tree| tree.check_invariants()).is_ok());
    }
    Ok(())
}

fn check_against_model(
    backend: &dyn StorageBackend,
    maintain: impl Fn(),
    ops: &[Op],
) -> std::result::Result<(), TestCaseError> {
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for op in ops {
        match *op {
            Op::Put(k, v) => {
                backend.put(&key(k), &[v]).unwrap();
                model.insert(key(k), vec![v]);
            }
            Op::Delete(k) => {
                backend.delete(&key(k)).unwrap();
                model.remove(&key(k));
            }
            Op::Get(k) => {
                prop_assert_eq!(backend.get(&key(k)).unwrap(), model.get(&key(k)).cloned());
            }
            Op::Scan(lo, hi) => {
                let expected: Vec<(Vec<u8>, Vec<u8>)> = model
                    .range(key(lo)..=key(hi))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                prop_assert_eq!(backend.range_scan(&key(lo), &key(hi)).unwrap(), expected);
            }
            Op::ScanPrefix(k, len) => {
                let full = key(k);
                let prefix = &full[..len];
                let expected: Vec<(Vec<u8>, Vec<u8>)> = model
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                prop_assert_eq!(backend.scan_prefix(prefix).unwrap(), expected);
            }
            Op::Maintain => maintain(),
        }
    }

    let everything: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
    prop_assert_eq!(backend.range_scan(&key(0), &key(255)).unwrap(), everything);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_btree_matches_model(ops in prop::collection::vec(arb_op(), 1..200)) {
        check_kind(BackendKind::BTree, &ops)?;
    }

    #[test]
    fn prop_lsm_matches_model(ops in prop::collection::vec(arb_op(), 1..200)) {
        check_kind(BackendKind::Lsm, &ops)?;
    }

    #[test]
    fn prop_hybrid_matches_model(ops in prop::collection::vec(arb_op(), 1..200)) {
        check_kind(BackendKind::Hybrid, &ops)?;
    }

    #[test]
    fn prop_paged_btree_matches_model(ops in prop::collection::vec(arb_op(), 1..200)) {
        let store = MemoryPageStore::new(512);
        let paged = PagedBTree::open(BufferPoolManager::with_capacity(4, store.clone()).unwrap(), 3).unwrap();
        check_against_model(&paged, || paged.sync().unwrap(), &ops)?;

        // Whatever was synced last reopens intact
        paged.sync().unwrap();
        let expected = paged.range_scan(&key(0), &key(255)).unwrap();
        drop(paged);
        let reopened = PagedBTree::open(BufferPoolManager::with_capacity(4, store).unwrap(), 3).unwrap();
        prop_assert_eq!(reopened.range_scan(&key(0), &key(255)).unwrap(), expected);
        prop_assert!(reopened.with_tree(|tree| tree.check_invariants()).is_ok());
    }

    #[test]
    fn prop_btree_invariants_hold_for_any_order(
        order in 3usize..8,
        inserts in prop::collection::vec(any::<u16>(), 0..300),
        removes in prop::collection::vec(any::<u16>(), 0..300),
    ) {
        let backend = BTreeBackend::new(order).unwrap();
        for k in &inserts {
            backend.put(&k.to_be_bytes(), b"v").unwrap();
        }
        for k in &removes {
            backend.delete(&k.to_be_bytes()).unwrap();
            prop_assert!(backend.with_tree(|tree| tree.check_invariants()).is_ok());
        }

        let mut live: Vec<u16> = inserts.clone();
        live.sort_unstable();
        live.dedup();
        live.retain(|k| !removes.contains(k));
        prop_assert_eq!(backend.len(), live.len());
    }
}

#[test]
fn test_lsm_sstable_count_after_bulk_load() {
    common::init_tracing();
    let lsm = LsmTree::new(&StorageConfig::new(BackendKind::Lsm).memtable_size(100)).unwrap();

    for i in 0u32..1050 {
        lsm.put(&i.to_be_bytes(), b"v").unwrap();
    }
    lsm.flush();
    assert_eq!(lsm.sstable_count(), 11);

    lsm.compact();
    assert_eq!(lsm.sstable_count(), 1);
    assert_eq!(lsm.range_scan(&0u32.to_be_bytes(), &u32::MAX.to_be_bytes()).unwrap().len(), 1050);
}

#[test]
fn test_hybrid_hot_keys_served_from_hot_tier() {
    common::init_tracing();
    let config = StorageConfig::new(BackendKind::Hybrid)
        .hot_threshold(3)
        .cold_age_threshold(Duration::from_secs(3600));
    let hybrid = HybridStorage::new(&config).unwrap();

    for i in 0u8..10 {
        hybrid.put(&[i], &[i]).unwrap();
    }
    for _ in 0..3 {
        assert_eq!(hybrid.get(&[7]).unwrap(), Some(vec![7]));
    }
    assert!(hybrid.is_hot(&[7]));

    let before = hybrid.stats().hot_hits;
    assert_eq!(hybrid.get(&[7]).unwrap(), Some(vec![7]));
    assert_eq!(hybrid.stats().hot_hits, before + 1);

    // Recently read, so the default cold age keeps it hot
    assert_eq!(hybrid.rebalance_default().unwrap(), 0);
    assert!(hybrid.is_hot(&[7]));
}
