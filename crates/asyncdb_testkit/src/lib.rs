//! # AsyncDB Testkit
//!
//! Test utilities for AsyncDB.
//!
//! This crate provides:
//! - Test fixtures: seeded databases from JSON
//! - Property-based test generators using proptest
//! - A counter-increment stress driver
//! - Tracing setup for test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use asyncdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_database() {
//!     let mut db = TestDb::new();
//!     db.add_int_table("t").unwrap();
//!     db.put(&db.conn, "t", 1, 2).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Output is controlled by `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
