//! Check command implementation.

use objpool_core::{check_path, CheckReport};
use std::path::Path;

/// Runs the check command. Fails if any problem is found.
pub fn run(path: &Path, layout: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = check_path(path, layout)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(path, &report),
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(format!("{} problem(s) found", report.problems.len()).into())
    }
}

fn print_text_output(path: &Path, report: &CheckReport) {
    println!("Checking pool at {}", path.display());
    println!();
    println!("Header:  OK (layout {:?})", report.header.layout);
    match &report.heap {
        Some(heap) => println!(
            "Heap:    {} blocks, {} allocated, {} free",
            heap.blocks, heap.allocated_blocks, heap.free_blocks
        ),
        None => println!("Heap:    unreadable"),
    }
    match &report.log {
        Some(log) if report.needs_recovery() => println!(
            "Log:     {:?}, {} records pending; recovery will run at next open",
            log.state, report.pending_records
        ),
        Some(_) => println!("Log:     empty"),
        None => println!("Log:     unreadable"),
    }
    println!();

    if report.is_ok() {
        println!("Pool is consistent");
    } else {
        println!("Problems:");
        for problem in &report.problems {
            println!("  - {problem}");
        }
    }
}
