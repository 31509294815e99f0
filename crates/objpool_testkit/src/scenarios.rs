//! Ready-made crash scenarios.
//!
//! All of them use the same root layout:
//!
//! | offset | field |
//! |--------|-------|
//! | 0  | `VALUE: u64` |
//! | 8  | `FIRST: Oid` |
//! | 24 | `SECOND: Oid` |
//!
//! Nodes are `NODE` objects whose first word is `VALUE`.

use crate::crash::CrashScenario;
use objpool_core::{CoreResult, Field, ObjectType, Oid, Pool, TxLock};

/// Root field holding a plain value.
pub const VALUE: Field<u64> = Field::new(0);
/// Root field holding a link to a node.
pub const FIRST: Field<Oid> = Field::new(8);
/// Second root link.
pub const SECOND: Field<Oid> = Field::new(24);
/// Node object type.
pub const NODE: ObjectType = ObjectType::new(7, 32);

/// Follows `link` from the root and returns the linked node's value.
pub fn linked_value(pool: &Pool, link: Field<Oid>) -> CoreResult<Option<u64>> {
    let node = pool.get(pool.root(), link)?;
    if node.is_null() {
        return Ok(None);
    }
    pool.get(node, VALUE).map(Some)
}

/// Returns the non-null root links.
pub fn root_links(pool: &Pool) -> CoreResult<Vec<Oid>> {
    let root = pool.root();
    Ok([pool.get(root, FIRST)?, pool.get(root, SECOND)?]
        .into_iter()
        .filter(|oid| !oid.is_null())
        .collect())
}

/// Commits a node holding `value` linked from `link`.
pub fn link_node(pool: &Pool, link: Field<Oid>, value: u64) -> CoreResult<Oid> {
    let root = pool.root();
    pool.transaction(None, |tx| {
        let node = tx.allocate(NODE)?;
        tx.set(node, VALUE, value)?;
        tx.set(root, link, node)?;
        Ok(node)
    })
}

/// A root field goes from 5 to 10.
#[derive(Debug, Default)]
pub struct FieldUpdate;

impl CrashScenario for FieldUpdate {
    type Observed = u64;

    fn name(&self) -> &str {
        "field update"
    }

    fn setup(&self, pool: &Pool) -> CoreResult<()> {
        let root = pool.root();
        pool.transaction(None, |tx| tx.set(root, VALUE, 5))
    }

    fn mutate(&self, pool: &Pool, lock: Option<&TxLock>) -> CoreResult<()> {
        let root = pool.root();
        pool.transaction(lock, |tx| tx.set(root, VALUE, 10))
    }

    fn observe(&self, pool: &Pool) -> CoreResult<u64> {
        pool.get(pool.root(), VALUE)
    }

    fn reachable(&self, pool: &Pool) -> CoreResult<Vec<Oid>> {
        root_links(pool)
    }
}

/// A new node is allocated and linked into the root.
#[derive(Debug, Default)]
pub struct AllocateAndLink;

impl CrashScenario for AllocateAndLink {
    type Observed = Option<u64>;

    fn name(&self) -> &str {
        "allocate and link"
    }

    fn setup(&self, _pool: &Pool) -> CoreResult<()> {
        Ok(())
    }

    fn mutate(&self, pool: &Pool, lock: Option<&TxLock>) -> CoreResult<()> {
        let root = pool.root();
        pool.transaction(lock, |tx| {
            let node = tx.allocate(NODE)?;
            tx.set(node, VALUE, 42)?;
            tx.set(root, FIRST, node)
        })
    }

    fn observe(&self, pool: &Pool) -> CoreResult<Option<u64>> {
        linked_value(pool, FIRST)
    }

    fn reachable(&self, pool: &Pool) -> CoreResult<Vec<Oid>> {
        root_links(pool)
    }
}

/// A linked node is unlinked and freed.
#[derive(Debug, Default)]
pub struct DeferredFree;

impl CrashScenario for DeferredFree {
    type Observed = Option<u64>;

    fn name(&self) -> &str {
        "deferred free"
    }

    fn setup(&self, pool: &Pool) -> CoreResult<()> {
        link_node(pool, FIRST, 7).map(|_| ())
    }

    fn mutate(&self, pool: &Pool, lock: Option<&TxLock>) -> CoreResult<()> {
        let root = pool.root();
        pool.transaction(lock, |tx| {
            let node = tx.get(root, FIRST)?;
            tx.free(node)?;
            tx.set(root, FIRST, Oid::NULL)
        })
    }

    fn observe(&self, pool: &Pool) -> CoreResult<Option<u64>> {
        linked_value(pool, FIRST)
    }

    fn reachable(&self, pool: &Pool) -> CoreResult<Vec<Oid>> {
        root_links(pool)
    }
}

/// One transaction that sets a field, writes a fresh object, and swaps
/// one linked node for another.
#[derive(Debug, Default)]
pub struct MixedTransaction;

impl CrashScenario for MixedTransaction {
    type Observed = (u64, Option<u64>, Option<u64>, Option<Vec<u8>>);

    fn name(&self) -> &str {
        "mixed transaction"
    }

    fn setup(&self, pool: &Pool) -> CoreResult<()> {
        let root = pool.root();
        pool.transaction(None, |tx| tx.set(root, VALUE, 1))?;
        link_node(pool, FIRST, 100).map(|_| ())
    }

    fn mutate(&self, pool: &Pool, lock: Option<&TxLock>) -> CoreResult<()> {
        let root = pool.root();
        pool.transaction(lock, |tx| {
            tx.set(root, VALUE, 2)?;

            let fresh = tx.allocate(NODE)?;
            tx.set(fresh, VALUE, 200)?;
            tx.write(fresh, 8, &[0xEE; 24])?;
            tx.set(root, SECOND, fresh)?;

            let old = tx.get(root, FIRST)?;
            tx.free(old)?;
            tx.set(root, FIRST, Oid::NULL)
        })
    }

    fn observe(&self, pool: &Pool) -> CoreResult<Self::Observed> {
        let second = pool.get(pool.root(), SECOND)?;
        let payload = if second.is_null() {
            None
        } else {
            Some(pool.read(second, 8, 24)?)
        };
        Ok((
            pool.get(pool.root(), VALUE)?,
            linked_value(pool, FIRST)?,
            linked_value(pool, SECOND)?,
            payload,
        ))
    }

    fn reachable(&self, pool: &Pool) -> CoreResult<Vec<Oid>> {
        root_links(pool)
    }
}
