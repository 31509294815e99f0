//! Heap audits.

use crate::alloc::block::BlockHeader;
use crate::types::Oid;
use serde::Serialize;

/// Summary of the persistent block chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapAudit {
    /// Number of blocks in the chain.
    pub blocks: usize,
    /// Number of allocated blocks.
    pub allocated_blocks: usize,
    /// Bytes held by allocated blocks, headers included.
    pub allocated_bytes: u64,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Bytes held by free blocks, headers included.
    pub free_bytes: u64,
    /// Size of the largest free block.
    pub largest_free: u64,
}

impl HeapAudit {
    pub(crate) fn from_chain(chain: &[(u64, BlockHeader)]) -> Self {
        let mut audit = Self {
            blocks: chain.len(),
            ..Self::default()
        };
        for (_, header) in chain {
            if header.allocated {
                audit.allocated_blocks += 1;
                audit.allocated_bytes += header.size;
            } else {
                audit.free_blocks += 1;
                audit.free_bytes += header.size;
                audit.largest_free = audit.largest_free.max(header.size);
            }
        }
        audit
    }

    /// Total bytes covered by the chain.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.allocated_bytes + self.free_bytes
    }
}

/// Allocated blocks compared with a caller-supplied reachable set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReachabilityAudit {
    /// Number of allocated blocks.
    pub allocated: usize,
    /// Allocated but not reachable.
    pub leaked: Vec<Oid>,
    /// Reachable but not allocated.
    pub dangling: Vec<Oid>,
}

impl ReachabilityAudit {
    /// Returns true when nothing leaked and nothing dangles.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty() && self.dangling.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_chain() {
        let chain = vec![
            (
                0,
                BlockHeader {
                    size: 32,
                    allocated: true,
                    type_num: 1,
                },
            ),
            (32, BlockHeader::free(64)),
            (96, BlockHeader::free(32)),
        ];
        let audit = HeapAudit::from_chain(&chain);
        assert_eq!(audit.blocks, 3);
        assert_eq!(audit.allocated_blocks, 1);
        assert_eq!(audit.free_blocks, 2);
        assert_eq!(audit.largest_free, 64);
        assert_eq!(audit.total_bytes(), 128);
    }
}
