//! Allocator audits over generated transaction sequences.
//!
//! After any mix of committed and aborted transactions the heap must hold
//! exactly the root plus the objects the application still references:
//! no leaks, no double frees, no dangling references.

use objpool_core::{ObjectType, Pool};
use objpool_testkit::generators::{tx_sequence_strategy, ObjectTable, PropTestConfig, PAYLOAD};
use objpool_testkit::{test_config, TestPool};
use proptest::prelude::*;

fn assert_clean(pool: &Pool, table: &ObjectTable) -> Result<(), TestCaseError> {
    let audit = pool.audit_reachable(&table.oids());
    prop_assert!(audit.is_clean(), "{audit:?}");

    let heap = pool.audit().map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert_eq!(heap.allocated_blocks, table.live().len() + 1);
    prop_assert!(table.verify(pool).map_err(|e| TestCaseError::fail(e.to_string()))?);

    let report = pool.check().map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert!(report.is_ok(), "{:?}", report.problems);
    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn committed_and_aborted_transactions_never_leak(plans in tx_sequence_strategy(12, 8)) {
        // Large enough that no generated sequence exhausts the heap.
        let pool = TestPool::memory_with(&test_config().pool_size(1 << 20));
        let mut table = ObjectTable::new();

        for plan in &plans {
            table
                .apply(&pool, plan)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            assert_clean(&pool, &table)?;
        }

        // The same state must come back after recovery.
        let pool = pool.reopen();
        assert_clean(&pool, &table)?;
    }
}

#[test]
fn freeing_twice_in_one_transaction_is_a_single_free() {
    let pool = TestPool::memory();
    let node = pool
        .transaction(None, |tx| tx.allocate(ObjectType::new(3, 16)))
        .unwrap();
    let before = pool.stats().frees();

    pool.transaction(None, |tx| {
        tx.free(node)?;
        tx.free(node)
    })
    .unwrap();

    assert_eq!(pool.stats().frees() - before, 1);
    assert!(pool.audit_reachable(&[]).is_clean());
    assert!(pool.get(node, PAYLOAD).is_err());
}

#[test]
fn aborted_allocations_are_reused() {
    let pool = TestPool::memory();
    let first = pool.begin(None).unwrap();
    drop(first);

    let mut tx = pool.begin(None).unwrap();
    let a = tx.allocate(ObjectType::new(3, 64)).unwrap();
    tx.abort().unwrap();

    let b = pool
        .transaction(None, |tx| tx.allocate(ObjectType::new(3, 64)))
        .unwrap();
    assert_eq!(a.offset(), b.offset());
    assert_eq!(pool.audit().unwrap().allocated_blocks, 2);
}

#[test]
fn heap_fills_and_recovers_space_after_frees() {
    let pool = TestPool::memory();
    let ty = ObjectType::new(3, 4096);

    let mut live = Vec::new();
    loop {
        match pool.transaction(None, |tx| tx.allocate(ty)) {
            Ok(oid) => live.push(oid),
            Err(e) => {
                assert!(matches!(e, objpool_core::CoreError::HeapExhausted { .. }));
                break;
            }
        }
    }
    assert!(live.len() > 10);
    assert!(pool.audit_reachable(&live).is_clean());

    // Frees never merge neighbours; a larger allocation merges them lazily.
    pool.transaction(None, |tx| {
        for oid in live.drain(..) {
            tx.free(oid)?;
        }
        Ok(())
    })
    .unwrap();
    let big = pool
        .transaction(None, |tx| tx.allocate(ObjectType::new(3, 64 * 1024)))
        .unwrap();
    assert!(pool.object_size(big).unwrap() >= 64 * 1024);
    assert!(pool.audit_reachable(&[big]).is_clean());
}
