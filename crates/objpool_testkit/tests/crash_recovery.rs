//! Crash recovery tests.
//!
//! Every scenario is crashed at each of its persist points, reopened from
//! durable, volatile and torn images, with and without a transaction lock.

use objpool_core::{
    CoreError, CoreResult, Oid, Pool, RecoveryReport, Transaction, TxLock, TxState,
};
use objpool_storage::InMemoryBackend;
use objpool_testkit::crash::{
    CrashImage, CrashRecoveryHarness, CrashScenario, CrashableBackend, Outcome,
};
use objpool_testkit::scenarios::{
    AllocateAndLink, DeferredFree, FieldUpdate, MixedTransaction, FIRST, NODE, VALUE,
};
use objpool_testkit::{test_config, TestPool, TEST_LAYOUT};
use std::sync::Arc;
use std::thread;

fn run_everywhere<S: CrashScenario>(scenario: &S) {
    for locked in [false, true] {
        let mut harness = CrashRecoveryHarness::new().with_lock(locked);
        let results = harness.run(scenario).unwrap();
        assert!(results.len() > CrashImage::DEFAULT_SET.len());
        let failures = harness.failures();
        assert!(failures.is_empty(), "{failures:#?}");
    }
}

fn outcomes<S: CrashScenario>(scenario: &S, image: CrashImage) -> Vec<Outcome> {
    let mut harness = CrashRecoveryHarness::new().images(&[image]);
    harness
        .run(scenario)
        .unwrap()
        .into_iter()
        .map(|r| r.outcome.unwrap())
        .collect()
}

#[test]
fn field_update_is_atomic() {
    run_everywhere(&FieldUpdate);
}

#[test]
fn allocation_is_atomic() {
    run_everywhere(&AllocateAndLink);
}

#[test]
fn deferred_free_is_atomic() {
    run_everywhere(&DeferredFree);
}

#[test]
fn mixed_transaction_is_atomic() {
    run_everywhere(&MixedTransaction);
}

#[test]
fn durable_image_switches_from_old_to_new_once() {
    // Before the commit point every crash rolls back, after it every crash
    // rolls forward.
    let seen = outcomes(&MixedTransaction, CrashImage::Durable);
    let first_new = seen.iter().position(|o| *o == Outcome::New).unwrap();
    assert!(first_new > 0);
    assert!(seen[..first_new].iter().all(|o| *o == Outcome::Old));
    assert!(seen[first_new..].iter().all(|o| *o == Outcome::New));
}

#[test]
fn interrupted_recovery_can_be_rerun() {
    let mut harness = CrashRecoveryHarness::new()
        .images(&[CrashImage::Durable])
        .with_recovery_crashes(true);
    harness.run(&MixedTransaction).unwrap();
    harness.run(&DeferredFree).unwrap();
    assert!(harness.all_passed(), "{:#?}", harness.failures());
}

#[test]
fn crash_mid_field_update_restores_old_value() {
    let config = test_config();
    let backend = CrashableBackend::new(config.pool_size as usize);
    let pool = Pool::create_with_backend(Box::new(backend.clone()), TEST_LAYOUT, &config).unwrap();
    let root = pool.root();
    pool.transaction(None, |tx| tx.set(root, VALUE, 5)).unwrap();

    let mut tx = pool.begin(None).unwrap();
    tx.set(root, VALUE, 10).unwrap();
    // The process dies here: nothing after this point reaches the device.
    backend.crash_after_persists(0);
    drop(tx);
    drop(pool);

    for image in CrashImage::DEFAULT_SET {
        let pool =
            Pool::open_with_backend(Box::new(backend.crash_backend(image)), TEST_LAYOUT).unwrap();
        assert_eq!(pool.get(root, VALUE).unwrap(), 5, "{image}");
        assert!(matches!(
            pool.recovery_report(),
            RecoveryReport::RolledBack { snapshots_restored: 1, .. }
        ));
        assert!(pool.check().unwrap().is_ok());
    }
}

#[test]
fn committed_update_survives_crash() {
    let config = test_config();
    let backend = CrashableBackend::new(config.pool_size as usize);
    let pool = Pool::create_with_backend(Box::new(backend.clone()), TEST_LAYOUT, &config).unwrap();
    let root = pool.root();
    pool.transaction(None, |tx| tx.set(root, VALUE, 99)).unwrap();
    backend.crash_after_persists(0);
    drop(pool);

    let pool =
        Pool::open_with_backend(Box::new(backend.crash_backend(CrashImage::Durable)), TEST_LAYOUT)
            .unwrap();
    assert_eq!(pool.get(root, VALUE).unwrap(), 99);
    assert_eq!(pool.recovery_report(), RecoveryReport::Clean);
}

#[test]
fn reopened_file_pool_validates() {
    let pool = TestPool::file();
    let root = pool.root();
    let mut tx = pool.begin(None).unwrap();
    let node = tx.allocate(NODE).unwrap();
    tx.set(root, FIRST, node).unwrap();
    // Forget the handle so the transaction stays open in the file.
    std::mem::forget(tx);
    let path = pool.path().unwrap().to_path_buf();

    let copy = path.with_extension("copy");
    std::fs::copy(&path, &copy).unwrap();
    assert!(Pool::validate(&copy, TEST_LAYOUT));

    let report = objpool_core::check_path(&copy, Some(TEST_LAYOUT)).unwrap();
    assert!(report.needs_recovery());
    assert_eq!(report.pending_records, 2);

    let reopened = Pool::open(&copy, TEST_LAYOUT).unwrap();
    assert!(reopened.recovery_report().recovered());
    assert!(reopened.get(root, FIRST).unwrap().is_null());
    assert!(reopened.audit_reachable(&[]).is_clean());
    drop(reopened);
    assert!(Pool::validate(&copy, TEST_LAYOUT));
}

/// Logs the rest of the root, then allocates until the log is full.
fn fill_log(tx: &mut Transaction<'_>, root: Oid) -> CoreResult<()> {
    tx.add_range(root, 8, 56)?;
    loop {
        let node = tx.allocate(NODE)?;
        tx.set(node, VALUE, 1)?;
    }
}

#[test]
fn log_exhaustion_aborts_and_restores() {
    let config = test_config().log_size(512);
    let pool = TestPool::memory_with(&config);
    let root = pool.root();
    pool.transaction(None, |tx| tx.set(root, VALUE, 1)).unwrap();

    let mut tx = pool.begin(None).unwrap();
    tx.set(root, VALUE, 2).unwrap();
    let err = fill_log(&mut tx, root).unwrap_err();
    assert!(matches!(err, CoreError::LogExhausted { .. }));
    assert!(!tx.is_active());
    assert!(matches!(tx.set(root, VALUE, 3), Err(CoreError::TransactionNotActive)));
    drop(tx);

    assert_eq!(pool.get(root, VALUE).unwrap(), 1);
    assert_eq!(pool.tx_state(), TxState::None);
    assert_eq!(pool.audit().unwrap().allocated_blocks, 1);
    assert!(pool.begin(None).is_ok());
}

#[test]
fn lock_serialises_concurrent_transactions() {
    let pool = Arc::new(TestPool::memory());
    let lock = TxLock::new();
    let root = pool.root();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    pool.transaction(Some(&lock), |tx| {
                        let n = tx.get(root, VALUE)?;
                        tx.set(root, VALUE, n + 1)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.get(root, VALUE).unwrap(), 100);
    assert_eq!(pool.stats().transactions_committed(), 100);
    assert!(!lock.is_locked());
}

#[test]
fn without_lock_concurrent_begin_fails() {
    let pool = Arc::new(TestPool::memory());
    let tx = pool.begin(None).unwrap();

    let other = Arc::clone(&pool);
    let result = thread::spawn(move || other.begin(None).map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(CoreError::AlreadyActive)));
    tx.commit().unwrap();
}

#[test]
fn memory_image_reopens_through_recover_backend() {
    let config = test_config();
    let backend = CrashableBackend::new(config.pool_size as usize);
    let pool = Pool::create_with_backend(Box::new(backend.clone()), TEST_LAYOUT, &config).unwrap();
    let root = pool.root();
    let mut tx = pool.begin(None).unwrap();
    tx.set(root, VALUE, 8).unwrap();
    backend.crash_after_persists(0);
    drop(tx);
    drop(pool);

    let image = InMemoryBackend::with_data(backend.crash_image(CrashImage::Durable));
    let (report, backend) = objpool_core::recover_backend(Box::new(image)).unwrap();
    assert!(report.recovered());
    let (again, backend) = objpool_core::recover_backend(backend).unwrap();
    assert_eq!(again, RecoveryReport::Clean);

    let pool = Pool::open_with_backend(backend, TEST_LAYOUT).unwrap();
    assert_eq!(pool.get(root, VALUE).unwrap(), 0);
}
