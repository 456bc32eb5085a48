//! # THL Testkit
//!
//! Test utilities for the THL disk log.
//!
//! This crate provides:
//! - Temporary-directory log fixtures and event builders
//! - Property-based event stream generators using proptest
//! - Crash simulation helpers for recovery tests
//! - A tailing-reader stress harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use thl_testkit::prelude::*;
//!
//! #[test]
//! fn reads_back() {
//!     with_temp_log(|log| {
//!         let mut writer = log.writer();
//!         store_events(&mut writer, 0..10);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
