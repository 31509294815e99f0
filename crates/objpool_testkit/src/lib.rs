//! # objpool Testkit
//!
//! Test utilities for objpool.
//!
//! This crate provides:
//! - A backend that simulates crashes by discarding unpersisted writes
//! - A harness that crashes a transaction at every persist point
//! - Ready-made crash scenarios
//! - Test fixtures and pool helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objpool_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_pool() {
//!     with_temp_pool(|pool| {
//!         let root = pool.root();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::{CrashImage, CrashRecoveryHarness, CrashScenario, CrashableBackend, Outcome};
pub use fixtures::*;
pub use generators::*;
