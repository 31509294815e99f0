//! Property-based test generators using proptest.
//!
//! Provides strategies for layouts, object sizes and transaction plans,
//! plus [`ObjectTable`], an application-side model that runs plans against
//! a pool and remembers which objects should exist.

use objpool_core::{CoreResult, Field, ObjectType, Oid, Pool, MAX_LAYOUT_LEN};
use proptest::prelude::*;

/// Field every generated object carries at offset 0.
pub const PAYLOAD: Field<u64> = Field::new(0);

/// Type number of generated objects.
pub const GENERATED_TYPE: u32 = 3;

/// Strategy for valid layout signatures.
pub fn layout_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("[a-z][a-z0-9_.-]{{0,{}}}", MAX_LAYOUT_LEN - 1))
        .expect("Invalid regex")
}

/// Strategy for object sizes large enough to hold [`PAYLOAD`].
pub fn object_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        3 => 8u64..=64,
        2 => 65u64..=512,
        1 => 513u64..=4096,
    ]
}

/// One step inside a generated transaction.
#[derive(Debug, Clone)]
pub enum PoolOp {
    /// Allocate an object.
    Allocate {
        /// Requested size.
        size: u64,
    },
    /// Free a live object.
    Free {
        /// Index into the live objects, taken modulo their count.
        pick: usize,
    },
    /// Overwrite the payload of a live or freshly allocated object.
    Write {
        /// Index into the writable objects, taken modulo their count.
        pick: usize,
        /// New payload.
        value: u64,
    },
}

/// A generated transaction.
#[derive(Debug, Clone)]
pub struct TxPlan {
    /// Steps in order.
    pub ops: Vec<PoolOp>,
    /// Whether the transaction commits or aborts.
    pub commit: bool,
}

/// Strategy for a single step.
pub fn pool_op_strategy() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => object_size_strategy().prop_map(|size| PoolOp::Allocate { size }),
        2 => any::<usize>().prop_map(|pick| PoolOp::Free { pick }),
        3 => (any::<usize>(), any::<u64>()).prop_map(|(pick, value)| PoolOp::Write { pick, value }),
    ]
}

/// Strategy for a transaction of up to `max_ops` steps that commits three
/// times out of four.
pub fn tx_plan_strategy(max_ops: usize) -> impl Strategy<Value = TxPlan> {
    (
        prop::collection::vec(pool_op_strategy(), 1..=max_ops),
        prop::bool::weighted(0.75),
    )
        .prop_map(|(ops, commit)| TxPlan { ops, commit })
}

/// Strategy for a sequence of transactions.
pub fn tx_sequence_strategy(
    max_txs: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TxPlan>> {
    prop::collection::vec(tx_plan_strategy(max_ops), 1..=max_txs)
}

/// What the application believes the pool holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTable {
    live: Vec<(Oid, u64)>,
}

impl ObjectTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live objects and their payloads.
    pub fn live(&self) -> &[(Oid, u64)] {
        &self.live
    }

    /// Live object ids.
    pub fn oids(&self) -> Vec<Oid> {
        self.live.iter().map(|(oid, _)| *oid).collect()
    }

    /// Runs `plan` as one transaction and updates the table if it commits.
    pub fn apply(&mut self, pool: &Pool, plan: &TxPlan) -> CoreResult<()> {
        let mut next = self.live.clone();
        let mut freed: Vec<Oid> = Vec::new();

        let mut tx = pool.begin(None)?;
        for op in &plan.ops {
            match *op {
                PoolOp::Allocate { size } => {
                    let oid = tx.allocate(ObjectType::new(GENERATED_TYPE, size))?;
                    next.push((oid, 0));
                }
                PoolOp::Free { pick } => {
                    let candidates: Vec<Oid> = self
                        .live
                        .iter()
                        .map(|(oid, _)| *oid)
                        .filter(|oid| !freed.contains(oid))
                        .collect();
                    if candidates.is_empty() {
                        continue;
                    }
                    let oid = candidates[pick % candidates.len()];
                    tx.free(oid)?;
                    freed.push(oid);
                    next.retain(|(live, _)| *live != oid);
                }
                PoolOp::Write { pick, value } => {
                    if next.is_empty() {
                        continue;
                    }
                    let slot = pick % next.len();
                    tx.set(next[slot].0, PAYLOAD, value)?;
                    next[slot].1 = value;
                }
            }
        }

        if plan.commit {
            tx.commit()?;
            self.live = next;
        } else {
            tx.abort()?;
        }
        Ok(())
    }

    /// Checks every live object holds its payload.
    pub fn verify(&self, pool: &Pool) -> CoreResult<bool> {
        for (oid, value) in &self.live {
            if pool.get(*oid, PAYLOAD)? != *value {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objpool_core::PoolHeader;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn layout_is_accepted(layout in layout_strategy()) {
            prop_assert!(PoolHeader::validate_layout(&layout).is_ok());
        }

        #[test]
        fn object_size_holds_payload(size in object_size_strategy()) {
            prop_assert!(size >= 8);
        }
    }
}
