//! Crash simulation for objpool.
//!
//! [`CrashableBackend`] keeps two images of the region: everything written
//! (volatile) and everything persisted (durable). After a simulated crash a
//! test builds the image a real machine could have been left with and opens
//! a pool on it.
//!
//! ## Test Strategy
//!
//! 1. Run a scenario once without crashing and count its persist calls
//! 2. For every persist point, rerun it with the backend crashing there
//! 3. Reopen each crash image and check the scenario's state is exactly the
//!    old one or exactly the new one, and that the heap is sound
//! 4. Optionally crash recovery itself and check that rerunning it gives
//!    the same pool
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objpool_testkit::crash::{CrashRecoveryHarness, CrashImage};
//! use objpool_testkit::scenarios::FieldUpdate;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! let results = harness.run(&FieldUpdate::default())?;
//! assert!(results.iter().all(|r| r.passed));
//! ```

use objpool_core::{Config, CoreError, CoreResult, Oid, Pool, RecoveryReport, TxLock};
use objpool_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::io;
use std::sync::Arc;

/// Which bytes survive a simulated crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashImage {
    /// Only persisted bytes survive.
    Durable,
    /// Every written byte survives.
    Volatile,
    /// Each unpersisted 8-byte word survives or not, chosen by `seed`.
    Torn {
        /// Seed for the per-word choice.
        seed: u64,
    },
}

impl CrashImage {
    /// The images the harness checks by default.
    pub const DEFAULT_SET: [CrashImage; 3] = [
        CrashImage::Durable,
        CrashImage::Volatile,
        CrashImage::Torn { seed: 0x5eed },
    ];
}

impl fmt::Display for CrashImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Volatile => write!(f, "volatile"),
            Self::Torn { seed } => write!(f, "torn({seed:#x})"),
        }
    }
}

#[derive(Debug)]
struct CrashState {
    volatile: Vec<u8>,
    durable: Vec<u8>,
    writes: u64,
    persists: u64,
    crash_after_writes: Option<u64>,
    crash_after_persists: Option<u64>,
    crashed: bool,
}

impl CrashState {
    fn crash(&mut self, what: &str) -> StorageError {
        self.crashed = true;
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash at {what}"),
        ))
    }

    fn check_bounds(&self, offset: u64, len: usize) -> StorageResult<(usize, usize)> {
        let size = self.volatile.len() as u64;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok((offset as usize, end as usize)),
            _ => Err(StorageError::OutOfBounds { offset, len, size }),
        }
    }
}

/// A storage backend that can stop working at a chosen write or persist.
///
/// Clones share state, so a test can keep one clone while the pool owns
/// another. Once crashed, every write, persist and sync fails; reads still
/// see the volatile image.
#[derive(Debug, Clone)]
pub struct CrashableBackend {
    state: Arc<Mutex<CrashState>>,
}

impl CrashableBackend {
    /// Creates a zero-filled backend of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::with_data(vec![0; size])
    }

    /// Creates a backend whose volatile and durable images are `data`.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CrashState {
                volatile: data.clone(),
                durable: data,
                writes: 0,
                persists: 0,
                crash_after_writes: None,
                crash_after_persists: None,
                crashed: false,
            })),
        }
    }

    /// Crashes on the write following the next `n` successful ones.
    pub fn crash_after_writes(&self, n: u64) {
        let mut state = self.state.lock();
        state.crash_after_writes = Some(state.writes + n);
    }

    /// Crashes on the persist following the next `n` successful ones.
    /// Calls to `sync` count as persists.
    pub fn crash_after_persists(&self, n: u64) {
        let mut state = self.state.lock();
        state.crash_after_persists = Some(state.persists + n);
    }

    /// Returns true once the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.lock().crashed
    }

    /// Returns the number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Returns the number of successful persists and syncs so far.
    pub fn persists(&self) -> u64 {
        self.state.lock().persists
    }

    /// Builds the bytes a crash at this moment could leave behind.
    pub fn crash_image(&self, image: CrashImage) -> Vec<u8> {
        let state = self.state.lock();
        match image {
            CrashImage::Durable => state.durable.clone(),
            CrashImage::Volatile => state.volatile.clone(),
            CrashImage::Torn { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut bytes = state.durable.clone();
                for (out, new) in bytes.chunks_mut(8).zip(state.volatile.chunks(8)) {
                    if out != new && rng.gen_bool(0.5) {
                        out.copy_from_slice(new);
                    }
                }
                bytes
            }
        }
    }

    /// Returns an in-memory backend holding a crash image.
    pub fn crash_backend(&self, image: CrashImage) -> InMemoryBackend {
        InMemoryBackend::with_data(self.crash_image(image))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let state = self.state.lock();
        let (start, end) = state.check_bounds(offset, len)?;
        Ok(state.volatile[start..end].to_vec())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.crashed {
            return Err(state.crash("write after crash"));
        }
        if state.crash_after_writes == Some(state.writes) {
            let at = format!("write {}", state.writes);
            return Err(state.crash(&at));
        }
        let (start, end) = state.check_bounds(offset, data.len())?;
        state.volatile[start..end].copy_from_slice(data);
        state.writes += 1;
        Ok(())
    }

    fn persist(&mut self, offset: u64, len: usize) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.crashed {
            return Err(state.crash("persist after crash"));
        }
        if state.crash_after_persists == Some(state.persists) {
            let at = format!("persist {}", state.persists);
            return Err(state.crash(&at));
        }
        let (start, end) = state.check_bounds(offset, len)?;
        let CrashState {
            volatile, durable, ..
        } = &mut *state;
        durable[start..end].copy_from_slice(&volatile[start..end]);
        state.persists += 1;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().volatile.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.crashed {
            return Err(state.crash("sync after crash"));
        }
        if state.crash_after_persists == Some(state.persists) {
            let at = format!("sync {}", state.persists);
            return Err(state.crash(&at));
        }
        let CrashState {
            volatile, durable, ..
        } = &mut *state;
        durable.copy_from_slice(volatile);
        state.persists += 1;
        Ok(())
    }
}

/// A transaction whose effects must be all-or-nothing across a crash.
pub trait CrashScenario {
    /// State compared before and after the crash.
    type Observed: PartialEq + fmt::Debug;

    /// Short name used in results.
    fn name(&self) -> &str;

    /// Commits the starting state. Runs without crashing.
    fn setup(&self, pool: &Pool) -> CoreResult<()>;

    /// Runs the transaction under test.
    fn mutate(&self, pool: &Pool, lock: Option<&TxLock>) -> CoreResult<()>;

    /// Reads the state the transaction changes.
    fn observe(&self, pool: &Pool) -> CoreResult<Self::Observed>;

    /// Every object the application can reach. Anything else allocated is
    /// a leak.
    fn reachable(&self, pool: &Pool) -> CoreResult<Vec<Oid>>;
}

/// Which side of the transaction a recovered pool ended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every effect was undone.
    Old,
    /// Every effect survived.
    New,
}

/// Result of one crash point and image.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Scenario name.
    pub scenario: String,
    /// Successful persists before the crash.
    pub persist_point: u64,
    /// Image the pool was reopened from.
    pub image: CrashImage,
    /// Whether the transaction ran under a [`TxLock`].
    pub locked: bool,
    /// Where the pool ended up, if it ended up somewhere valid.
    pub outcome: Option<Outcome>,
    /// What recovery did.
    pub recovery: Option<RecoveryReport>,
    /// Whether every check passed.
    pub passed: bool,
    /// What went wrong.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn fail(mut self, error: impl Into<String>) -> Self {
        self.passed = false;
        self.error = Some(error.into());
        self
    }
}

/// Runs a [`CrashScenario`] with a crash at every persist point.
pub struct CrashRecoveryHarness {
    config: Config,
    layout: String,
    images: Vec<CrashImage>,
    use_lock: bool,
    crash_recovery: bool,
    /// Results of every run so far.
    pub results: Vec<CrashRecoveryResult>,
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashRecoveryHarness {
    /// Layout used for harness pools.
    pub const LAYOUT: &'static str = "objpool-crash";

    /// Creates a harness with a small pool and the default crash images.
    pub fn new() -> Self {
        Self {
            config: Config::default()
                .pool_size(128 * 1024)
                .log_size(8 * 1024)
                .sync_on_persist(false),
            layout: Self::LAYOUT.to_string(),
            images: CrashImage::DEFAULT_SET.to_vec(),
            use_lock: false,
            crash_recovery: false,
            results: Vec::new(),
        }
    }

    /// Sets the pool configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the images checked at every crash point.
    #[must_use]
    pub fn images(mut self, images: &[CrashImage]) -> Self {
        self.images = images.to_vec();
        self
    }

    /// Runs the transaction under a [`TxLock`].
    #[must_use]
    pub fn with_lock(mut self, use_lock: bool) -> Self {
        self.use_lock = use_lock;
        self
    }

    /// Also crashes recovery at every one of its persist points and checks
    /// that recovering again reaches the same state.
    #[must_use]
    pub fn with_recovery_crashes(mut self, enabled: bool) -> Self {
        self.crash_recovery = enabled;
        self
    }

    /// Returns true if every recorded result passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Returns the failed results.
    pub fn failures(&self) -> Vec<&CrashRecoveryResult> {
        self.results.iter().filter(|r| !r.passed).collect()
    }

    fn fresh_pool(&self) -> CoreResult<(Pool, CrashableBackend)> {
        let backend = CrashableBackend::new(self.config.pool_size as usize);
        let pool =
            Pool::create_with_backend(Box::new(backend.clone()), &self.layout, &self.config)?;
        Ok((pool, backend))
    }

    /// Runs `scenario` to completion, then once per persist point with a
    /// crash there, and checks every configured image.
    ///
    /// Returns the results of this run; they are also appended to
    /// [`results`](Self::results).
    pub fn run<S: CrashScenario>(&mut self, scenario: &S) -> CoreResult<Vec<CrashRecoveryResult>> {
        let lock = self.use_lock.then(TxLock::new);

        let (pool, backend) = self.fresh_pool()?;
        scenario.setup(&pool)?;
        let old = scenario.observe(&pool)?;
        let start = backend.persists();
        scenario.mutate(&pool, lock.as_ref())?;
        let new = scenario.observe(&pool)?;
        let persist_points = backend.persists() - start;
        drop(pool);

        if old == new {
            return Err(CoreError::invalid_argument(format!(
                "scenario {} does not change observed state",
                scenario.name()
            )));
        }

        let mut results = Vec::new();
        for point in 0..=persist_points {
            let (pool, backend) = self.fresh_pool()?;
            scenario.setup(&pool)?;
            backend.crash_after_persists(point);
            let completed = scenario.mutate(&pool, lock.as_ref()).is_ok();
            // Dropping the pool must not touch the durable image.
            drop(pool);

            for &image in &self.images {
                let base = CrashRecoveryResult {
                    scenario: scenario.name().to_string(),
                    persist_point: point,
                    image,
                    locked: self.use_lock,
                    outcome: None,
                    recovery: None,
                    passed: true,
                    error: None,
                };
                let mut result = self.verify(scenario, &backend, image, &old, &new, base);
                if completed && result.passed && result.outcome != Some(Outcome::New) {
                    result = result.fail("committed transaction did not survive");
                }
                results.push(result);
            }
        }

        self.results.extend(results.iter().cloned());
        Ok(results)
    }

    fn verify<S: CrashScenario>(
        &self,
        scenario: &S,
        crashed: &CrashableBackend,
        image: CrashImage,
        old: &S::Observed,
        new: &S::Observed,
        mut result: CrashRecoveryResult,
    ) -> CrashRecoveryResult {
        let bytes = crashed.crash_image(image);

        if self.crash_recovery {
            if let Err(e) = self.check_recovery_idempotent(&bytes) {
                return result.fail(format!("interrupted recovery: {e}"));
            }
        }

        let pool = match Pool::open_with_backend(
            Box::new(InMemoryBackend::with_data(bytes)),
            &self.layout,
        ) {
            Ok(pool) => pool,
            Err(e) => return result.fail(format!("reopen failed: {e}")),
        };
        result.recovery = Some(pool.recovery_report());

        match scenario.observe(&pool) {
            Ok(state) if &state == old => result.outcome = Some(Outcome::Old),
            Ok(state) if &state == new => result.outcome = Some(Outcome::New),
            Ok(state) => {
                return result.fail(format!(
                    "mixed state {state:?}, expected {old:?} or {new:?}"
                ))
            }
            Err(e) => return result.fail(format!("observe failed: {e}")),
        }

        match pool.check() {
            Ok(report) if report.is_ok() => {}
            Ok(report) => return result.fail(report.problems.join("; ")),
            Err(e) => return result.fail(format!("check failed: {e}")),
        }
        match scenario.reachable(&pool) {
            Ok(reachable) => {
                let audit = pool.audit_reachable(&reachable);
                if !audit.is_clean() {
                    return result.fail(format!(
                        "leaked {:?}, dangling {:?}",
                        audit.leaked, audit.dangling
                    ));
                }
            }
            Err(e) => return result.fail(format!("reachable failed: {e}")),
        }
        result
    }

    /// Crashes recovery of `bytes` at each of its persist points and checks
    /// the pool recovered from each interrupted run matches a clean run.
    fn check_recovery_idempotent(&self, bytes: &[u8]) -> CoreResult<()> {
        let (_, reference) =
            objpool_core::recover_backend(Box::new(InMemoryBackend::with_data(bytes.to_vec())))?;
        let reference = reference.read_at(0, bytes.len())?;

        let probe = CrashableBackend::with_data(bytes.to_vec());
        objpool_core::recover_backend(Box::new(probe.clone()))?;
        let points = probe.persists();

        for point in 0..points {
            let crashing = CrashableBackend::with_data(bytes.to_vec());
            crashing.crash_after_persists(point);
            if objpool_core::recover_backend(Box::new(crashing.clone())).is_ok() {
                continue;
            }
            let image = crashing.crash_image(CrashImage::Durable);
            let (_, rerun) =
                objpool_core::recover_backend(Box::new(InMemoryBackend::with_data(image)))?;
            if rerun.read_at(0, bytes.len())? != reference {
                return Err(CoreError::consistency(format!(
                    "recovery interrupted at persist {point} then rerun differs from a clean recovery"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_image_drops_unpersisted_bytes() {
        let mut backend = CrashableBackend::new(32);
        backend.write_at(0, &[1; 8]).unwrap();
        backend.persist(0, 8).unwrap();
        backend.write_at(8, &[2; 8]).unwrap();

        assert_eq!(&backend.crash_image(CrashImage::Durable)[..16], &[[1u8; 8], [0u8; 8]].concat()[..]);
        assert_eq!(&backend.crash_image(CrashImage::Volatile)[..16], &[[1u8; 8], [2u8; 8]].concat()[..]);
    }

    #[test]
    fn crash_after_persists_stops_everything() {
        let mut backend = CrashableBackend::new(32);
        backend.crash_after_persists(1);
        backend.write_at(0, &[1; 8]).unwrap();
        backend.persist(0, 8).unwrap();
        backend.write_at(8, &[2; 8]).unwrap();
        assert!(backend.persist(8, 8).is_err());
        assert!(backend.has_crashed());
        assert!(backend.write_at(16, &[3; 8]).is_err());
        assert!(backend.sync().is_err());
        assert_eq!(backend.persists(), 1);
    }

    #[test]
    fn crash_after_writes() {
        let mut backend = CrashableBackend::new(16);
        backend.crash_after_writes(1);
        backend.write_at(0, &[1]).unwrap();
        assert!(backend.write_at(1, &[2]).is_err());
        assert_eq!(backend.read_at(0, 2).unwrap(), vec![1, 0]);
    }

    #[test]
    fn torn_image_is_word_granular_and_seeded() {
        let mut backend = CrashableBackend::new(64);
        backend.write_at(0, &[7; 64]).unwrap();
        let a = backend.crash_image(CrashImage::Torn { seed: 1 });
        let b = backend.crash_image(CrashImage::Torn { seed: 1 });
        assert_eq!(a, b);
        for word in a.chunks(8) {
            assert!(word == [0; 8] || word == [7; 8]);
        }
    }

    #[test]
    fn clones_share_state() {
        let backend = CrashableBackend::new(8);
        let mut clone = backend.clone();
        clone.write_at(0, &[9]).unwrap();
        assert_eq!(backend.read_at(0, 1).unwrap(), vec![9]);
    }
}
