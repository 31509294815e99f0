//! Inspect command implementation.

use super::format_size;
use objpool_core::{check_path, read_log, HeapAudit, LogHeader, Oid, PoolHeader, UndoRecord};
use serde::Serialize;
use std::path::Path;

/// Pool inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Pool path.
    pub path: String,
    /// Pool header.
    pub header: PoolHeader,
    /// Undo log header.
    pub log: Option<LogHeader>,
    /// Heap summary.
    pub heap: Option<HeapAudit>,
    /// Pending undo records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordSummary>>,
    /// Problems found while reading.
    pub problems: Vec<String>,
}

/// One pending undo record.
#[derive(Debug, Serialize)]
pub struct RecordSummary {
    /// Record kind.
    pub kind: &'static str,
    /// Object the record refers to.
    pub oid: Oid,
    /// Offset inside the object (snapshots only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Saved byte count (snapshots only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
}

impl From<&UndoRecord> for RecordSummary {
    fn from(record: &UndoRecord) -> Self {
        match record {
            UndoRecord::Snapshot { oid, offset, data } => Self {
                kind: "snapshot",
                oid: *oid,
                offset: Some(*offset),
                len: Some(data.len()),
            },
            UndoRecord::Alloc { oid } => Self {
                kind: "alloc",
                oid: *oid,
                offset: None,
                len: None,
            },
            UndoRecord::Free { oid } => Self {
                kind: "free",
                oid: *oid,
                offset: None,
                len: None,
            },
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_records: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No pool found at {}", path.display()).into());
    }

    let report = check_path(path, None)?;
    let records = if show_records {
        let (_, records) = read_log(path)?;
        Some(records.iter().map(RecordSummary::from).collect())
    } else {
        None
    };

    let result = InspectResult {
        path: path.display().to_string(),
        header: report.header,
        log: report.log,
        heap: report.heap,
        records,
        problems: report.problems,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let header = &result.header;
    println!("objpool Pool Inspection");
    println!("=======================");
    println!();
    println!("Path:    {}", result.path);
    println!("Layout:  {}", header.layout);
    println!("UUID:    {}", header.uuid);
    println!(
        "Format:  v{}.{}",
        header.format_version.0, header.format_version.1
    );
    println!("Root:    {} ({} bytes)", header.root, header.root_size);
    println!();
    println!("Regions:");
    println!("  Pool: {}", format_size(header.pool_size));
    println!(
        "  Log:  {} at offset {}",
        format_size(header.log_size),
        header.log_offset
    );
    println!(
        "  Heap: {} at offset {}",
        format_size(header.heap_size),
        header.heap_offset
    );
    println!();

    match &result.log {
        Some(log) => {
            println!("Undo log:");
            println!("  State:   {:?}", log.state);
            println!("  Records: {}", log.record_count);
            println!("  Last tx: {}", log.txid);
            if log.lock_id != 0 {
                println!("  Lock:    {}", log.lock_id);
            }
        }
        None => println!("Undo log: unreadable"),
    }
    if let Some(records) = &result.records {
        for (i, record) in records.iter().enumerate() {
            match (record.offset, record.len) {
                (Some(offset), Some(len)) => println!(
                    "  [{i}] {} {} +{offset} ({len} bytes)",
                    record.kind, record.oid
                ),
                _ => println!("  [{i}] {} {}", record.kind, record.oid),
            }
        }
    }
    println!();

    match &result.heap {
        Some(heap) => {
            println!("Heap:");
            println!(
                "  Allocated: {} objects, {}",
                heap.allocated_blocks,
                format_size(heap.allocated_bytes)
            );
            println!(
                "  Free:      {} blocks, {}",
                heap.free_blocks,
                format_size(heap.free_bytes)
            );
            println!("  Largest free block: {}", format_size(heap.largest_free));
        }
        None => println!("Heap: unreadable"),
    }

    if !result.problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in &result.problems {
            println!("  - {problem}");
        }
    }
}
