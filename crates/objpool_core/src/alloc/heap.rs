//! First-fit persistent heap.

use crate::alloc::audit::{HeapAudit, ReachabilityAudit};
use crate::alloc::block::{
    block_size_for, BlockHeader, BLOCK_ALIGN, BLOCK_HEADER_SIZE, MIN_BLOCK_SIZE,
};
use crate::error::{CoreError, CoreResult};
use crate::space::PoolSpace;
use crate::types::Oid;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Free,
    /// Chosen by `reserve`, not yet published. Still free on disk.
    Reserved,
    Allocated,
}

/// Volatile view of one block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockInfo {
    pub(crate) size: u64,
    state: BlockState,
    pub(crate) type_num: u32,
}

impl BlockInfo {
    /// Usable data bytes of the block.
    pub(crate) fn data_size(&self) -> u64 {
        self.size - BLOCK_HEADER_SIZE
    }
}

/// A free block set aside for one allocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reservation {
    offset: u64,
    /// Block size the allocation needs.
    needed: u64,
    /// Size of the free block it came from.
    available: u64,
}

impl Reservation {
    /// The oid the object will have once published.
    pub(crate) fn oid(&self, type_num: u32) -> Oid {
        Oid::new(self.offset + BLOCK_HEADER_SIZE, type_num)
    }
}

/// The heap region: a chain of blocks tiling `[start, end)`.
///
/// The persistent chain is the source of truth. `blocks` indexes it by
/// offset and is rebuilt by [`Heap::load`]. Free never merges blocks, so a
/// freed block keeps its header and a repeated free is a no-op; adjacent
/// free blocks are merged lazily when a reservation needs the room.
#[derive(Debug)]
pub(crate) struct Heap {
    start: u64,
    end: u64,
    blocks: BTreeMap<u64, BlockInfo>,
}

impl Heap {
    /// Formats `[start, end)` as one free block.
    pub(crate) fn format(space: &mut PoolSpace, start: u64, end: u64) -> CoreResult<Self> {
        if start % BLOCK_ALIGN != 0 || end % BLOCK_ALIGN != 0 || end < start + MIN_BLOCK_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "heap [{start:#x}, {end:#x}) is too small or misaligned"
            )));
        }
        let header = BlockHeader::free(end - start);
        space.write_u64_persist(start + 8, header.type_word())?;
        space.write_u64_persist(start, header.size_word())?;

        let mut blocks = BTreeMap::new();
        blocks.insert(
            start,
            BlockInfo {
                size: header.size,
                state: BlockState::Free,
                type_num: 0,
            },
        );
        Ok(Self { start, end, blocks })
    }

    /// Rebuilds the block index by walking the persistent chain.
    pub(crate) fn load(space: &PoolSpace, start: u64, end: u64) -> CoreResult<Self> {
        let mut blocks = BTreeMap::new();
        for (offset, header) in walk(space, start, end)? {
            blocks.insert(
                offset,
                BlockInfo {
                    size: header.size,
                    state: if header.allocated {
                        BlockState::Allocated
                    } else {
                        BlockState::Free
                    },
                    type_num: header.type_num,
                },
            );
        }
        debug!(blocks = blocks.len(), "heap index rebuilt");
        Ok(Self { start, end, blocks })
    }

    /// Finds a free block for `size` data bytes, merging free neighbours
    /// when a block alone is too small.
    pub(crate) fn reserve(&mut self, space: &mut PoolSpace, size: u64) -> CoreResult<Reservation> {
        let needed = block_size_for(size).ok_or(CoreError::HeapExhausted { requested: size })?;

        let mut cursor = self.start;
        loop {
            let next = self.blocks.range(cursor..).next().map(|(&o, &i)| (o, i));
            let Some((offset, info)) = next else {
                break;
            };
            if info.state != BlockState::Free {
                cursor = offset + info.size;
                continue;
            }

            let mut merged = info.size;
            if merged < needed {
                merged = self.coalesce(space, offset, needed)?;
            }
            if merged >= needed {
                if let Some(block) = self.blocks.get_mut(&offset) {
                    block.state = BlockState::Reserved;
                }
                return Ok(Reservation {
                    offset,
                    needed,
                    available: merged,
                });
            }
            cursor = offset + merged;
        }

        Err(CoreError::HeapExhausted { requested: size })
    }

    /// Merges the run of free blocks following `offset` into it, stopping
    /// once `target` bytes are reached. Returns the new size.
    fn coalesce(&mut self, space: &mut PoolSpace, offset: u64, target: u64) -> CoreResult<u64> {
        let Some(first) = self.blocks.get(&offset).copied() else {
            return Ok(0);
        };
        let mut size = first.size;
        let mut absorbed = Vec::new();
        while size < target {
            match self.blocks.get(&(offset + size)) {
                Some(next) if next.state == BlockState::Free => {
                    absorbed.push(offset + size);
                    size += next.size;
                }
                _ => break,
            }
        }
        if absorbed.is_empty() {
            return Ok(size);
        }

        space.write_u64_persist(offset, BlockHeader::free(size).size_word())?;
        for next in &absorbed {
            self.blocks.remove(next);
        }
        if let Some(block) = self.blocks.get_mut(&offset) {
            block.size = size;
        }
        debug!(offset, size, merged = absorbed.len(), "coalesced free blocks");
        Ok(size)
    }

    /// Returns a reservation that will not be published.
    pub(crate) fn unreserve(&mut self, reservation: Reservation) {
        if let Some(block) = self.blocks.get_mut(&reservation.offset) {
            if block.state == BlockState::Reserved {
                block.state = BlockState::Free;
            }
        }
    }

    /// Makes a reserved block a live, zeroed object.
    ///
    /// The split-off remainder and the zeroed data are persisted before the
    /// size word, whose write is the single point at which the block becomes
    /// allocated.
    pub(crate) fn publish(
        &mut self,
        space: &mut PoolSpace,
        reservation: Reservation,
        type_num: u32,
    ) -> CoreResult<Oid> {
        let Reservation {
            offset,
            needed,
            available,
        } = reservation;

        let remainder = available - needed;
        let size = if remainder >= MIN_BLOCK_SIZE {
            let tail = BlockHeader::free(remainder);
            space.write_u64_persist(offset + needed + 8, tail.type_word())?;
            space.write_u64_persist(offset + needed, tail.size_word())?;
            needed
        } else {
            available
        };

        space.zero_persist(offset + BLOCK_HEADER_SIZE, size - BLOCK_HEADER_SIZE)?;
        let header = BlockHeader {
            size,
            allocated: true,
            type_num,
        };
        space.write_u64_persist(offset + 8, header.type_word())?;
        space.write_u64_persist(offset, header.size_word())?;

        self.blocks.insert(
            offset,
            BlockInfo {
                size,
                state: BlockState::Allocated,
                type_num,
            },
        );
        if size != available {
            self.blocks.insert(
                offset + size,
                BlockInfo {
                    size: remainder,
                    state: BlockState::Free,
                    type_num: 0,
                },
            );
        }
        Ok(Oid::new(offset + BLOCK_HEADER_SIZE, type_num))
    }

    /// Frees the block behind `oid` if it is allocated.
    ///
    /// Returns whether anything changed. Unknown or already free blocks are
    /// ignored, so replaying a free is harmless.
    pub(crate) fn free_if_allocated(&mut self, space: &mut PoolSpace, oid: Oid) -> CoreResult<bool> {
        let Some(offset) = oid.offset().checked_sub(BLOCK_HEADER_SIZE) else {
            return Ok(false);
        };
        let Some(info) = self.blocks.get(&offset).copied() else {
            debug!(%oid, "free ignored: not the start of a block");
            return Ok(false);
        };
        if info.state == BlockState::Free {
            debug!(%oid, "free ignored: block already free");
            return Ok(false);
        }

        space.write_u64_persist(offset, BlockHeader::free(info.size).size_word())?;
        if let Some(block) = self.blocks.get_mut(&offset) {
            block.state = BlockState::Free;
        }
        Ok(true)
    }

    /// Returns the live block behind `oid`.
    pub(crate) fn block(&self, oid: Oid) -> CoreResult<BlockInfo> {
        if oid.is_null() {
            return Err(CoreError::invalid_reference(0, "null reference"));
        }
        if !self.contains(oid.offset(), 0) {
            return Err(CoreError::invalid_reference(
                oid.offset(),
                "outside the heap",
            ));
        }
        let info = oid
            .offset()
            .checked_sub(BLOCK_HEADER_SIZE)
            .and_then(|offset| self.blocks.get(&offset))
            .ok_or_else(|| CoreError::invalid_reference(oid.offset(), "not the start of an object"))?;
        if info.state != BlockState::Allocated {
            return Err(CoreError::invalid_reference(
                oid.offset(),
                "object is not allocated",
            ));
        }
        if info.type_num != oid.type_num() {
            return Err(CoreError::invalid_reference(
                oid.offset(),
                format!(
                    "type number mismatch: reference says {}, object is {}",
                    oid.type_num(),
                    info.type_num
                ),
            ));
        }
        Ok(*info)
    }

    /// Checks that `[offset, offset + len)` of `oid` is inside the object.
    pub(crate) fn check_range(&self, oid: Oid, offset: u64, len: u64) -> CoreResult<u64> {
        let info = self.block(oid)?;
        match offset.checked_add(len) {
            Some(end) if end <= info.data_size() => Ok(oid.offset() + offset),
            _ => Err(CoreError::invalid_reference(
                oid.offset(),
                format!(
                    "range {offset}+{len} exceeds object of {} bytes",
                    info.data_size()
                ),
            )),
        }
    }

    /// Returns true if `[offset, offset + len)` lies inside the heap.
    pub(crate) fn contains(&self, offset: u64, len: u64) -> bool {
        offset >= self.start && matches!(offset.checked_add(len), Some(end) if end <= self.end)
    }

    /// Oids of every allocated block.
    pub(crate) fn allocated(&self) -> impl Iterator<Item = Oid> + '_ {
        self.blocks
            .iter()
            .filter(|(_, info)| info.state == BlockState::Allocated)
            .map(|(&offset, info)| Oid::new(offset + BLOCK_HEADER_SIZE, info.type_num))
    }

    /// Walks the persistent chain and checks it against the index.
    pub(crate) fn audit(&self, space: &PoolSpace) -> CoreResult<HeapAudit> {
        let chain = walk(space, self.start, self.end)?;
        if chain.len() != self.blocks.len() {
            return Err(CoreError::consistency(format!(
                "heap index holds {} blocks, persistent chain has {}",
                self.blocks.len(),
                chain.len()
            )));
        }
        for (offset, header) in &chain {
            let matches = self.blocks.get(offset).is_some_and(|info| {
                info.size == header.size
                    && (info.state == BlockState::Allocated) == header.allocated
            });
            if !matches {
                return Err(CoreError::consistency(format!(
                    "heap index disagrees with block at {offset:#x}"
                )));
            }
        }
        Ok(HeapAudit::from_chain(&chain))
    }

    /// Compares the allocated blocks with the set of oids the caller can
    /// reach. `root` is always considered reachable.
    pub(crate) fn audit_reachable(&self, root: Oid, reachable: &[Oid]) -> ReachabilityAudit {
        let reachable: BTreeSet<Oid> = reachable
            .iter()
            .copied()
            .filter(|oid| !oid.is_null())
            .chain(std::iter::once(root))
            .collect();
        let allocated: BTreeSet<Oid> = self.allocated().collect();

        ReachabilityAudit {
            allocated: allocated.len(),
            leaked: allocated.difference(&reachable).copied().collect(),
            dangling: reachable.difference(&allocated).copied().collect(),
        }
    }
}

/// Reads the persistent block chain of `[start, end)`.
pub(crate) fn walk(space: &PoolSpace, start: u64, end: u64) -> CoreResult<Vec<(u64, BlockHeader)>> {
    let mut chain = Vec::new();
    let mut offset = start;
    while offset < end {
        let header = BlockHeader::read(space, offset)?;
        let next = match offset.checked_add(header.size) {
            Some(next) if next <= end => next,
            _ => {
                return Err(CoreError::consistency(format!(
                    "block at {offset:#x} of {} bytes overruns the heap",
                    header.size
                )))
            }
        };
        chain.push((offset, header));
        offset = next;
    }
    Ok(chain)
}
