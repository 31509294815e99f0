//! Read-only pool consistency check.
//!
//! Unlike open, a check never writes: it does not take the file lock, does
//! not run recovery and does not tidy the log. A pool with a pending but
//! replayable undo log passes; recovery will handle it at the next open.

use crate::alloc::{walk, HeapAudit, BLOCK_HEADER_SIZE};
use crate::error::CoreResult;
use crate::header::PoolHeader;
use crate::log::{LogHeader, LogState, UndoLog, UndoRecord};
use crate::space::PoolSpace;
use crate::types::ROOT_TYPE_NUM;
use objpool_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// Result of a consistency check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// The pool header.
    pub header: PoolHeader,
    /// The undo log header, if it could be read.
    pub log: Option<LogHeader>,
    /// Records waiting for recovery.
    pub pending_records: usize,
    /// Heap summary, if the block chain could be walked.
    pub heap: Option<HeapAudit>,
    /// Everything found wrong. Empty for a consistent pool.
    pub problems: Vec<String>,
}

impl CheckReport {
    /// Returns true if no problem was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    /// Returns true if the next open will run recovery.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.log.is_some_and(|log| log.state != LogState::None)
    }
}

/// Checks the pool file at `path` without opening it.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no valid pool
/// header. Everything else is reported in [`CheckReport::problems`].
pub fn check_path(path: &Path, layout: Option<&str>) -> CoreResult<CheckReport> {
    let backend = FileBackend::open(path)?;
    let space = PoolSpace::new(Box::new(backend));
    check_space(&space, layout)
}

/// Reads the undo log header and pending records of the pool file at
/// `path` without opening the pool.
pub fn read_log(path: &Path) -> CoreResult<(LogHeader, Vec<UndoRecord>)> {
    let space = PoolSpace::new(Box::new(FileBackend::open(path)?));
    let header = PoolHeader::read(&space)?;
    UndoLog::inspect(&space, header.log_offset, header.log_size)
}

pub(crate) fn check_space(space: &PoolSpace, layout: Option<&str>) -> CoreResult<CheckReport> {
    let header = PoolHeader::read(space)?;
    let mut problems = Vec::new();

    if let Some(expected) = layout {
        if header.layout != expected {
            problems.push(format!(
                "layout mismatch: pool has {:?}, expected {expected:?}",
                header.layout
            ));
        }
    }

    let heap_start = header.heap_offset;
    let heap_end = header.heap_offset + header.heap_size;
    let heap = match walk(space, heap_start, heap_end) {
        Ok(chain) => {
            let root_block = header.root.offset() - BLOCK_HEADER_SIZE;
            let root_ok = chain.iter().any(|(offset, block)| {
                *offset == root_block && block.allocated && block.type_num == ROOT_TYPE_NUM
            });
            if !root_ok {
                problems.push(format!("root object {} is not allocated", header.root));
            }
            Some(HeapAudit::from_chain(&chain))
        }
        Err(e) => {
            problems.push(format!("heap: {e}"));
            None
        }
    };

    let (log, pending_records) = match UndoLog::inspect(space, header.log_offset, header.log_size) {
        Ok((log, records)) => {
            for record in &records {
                let (start, len) = match record {
                    UndoRecord::Snapshot { oid, offset, data } => {
                        (oid.offset().checked_add(*offset), data.len() as u64)
                    }
                    UndoRecord::Alloc { oid } | UndoRecord::Free { oid } => {
                        (Some(oid.offset()), 0)
                    }
                };
                let inside = start.is_some_and(|start| {
                    start >= heap_start && start.checked_add(len).is_some_and(|end| end <= heap_end)
                });
                if !inside {
                    problems.push(format!(
                        "undo {:?} record for {} targets bytes outside the heap",
                        record.kind(),
                        record.oid()
                    ));
                }
            }
            (Some(log), records.len())
        }
        Err(e) => {
            problems.push(format!("undo log: {e}"));
            (None, 0)
        }
    };

    Ok(CheckReport {
        header,
        log,
        pending_records,
        heap,
        problems,
    })
}
