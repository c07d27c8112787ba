//! # AsyncDB Table
//!
//! Table capability trait and in-process backends for AsyncDB.
//!
//! This crate provides the lowest-level data abstraction for AsyncDB.
//! A table is an **opaque keyed store**: it knows how to read, write and
//! delete rows and how to check that a key/value pair has the types it
//! declares. It knows nothing about transactions or locking; the engine
//! owns all of that.
//!
//! ## Design Principles
//!
//! - Tables are simple keyed stores (get, put, delete, validate)
//! - No knowledge of transactions, logs or lock state
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns isolation and commit ordering
//!
//! ## Available Backends
//!
//! - [`InMemoryTable`] - Typed hash map, for tests and ephemeral data
//! - [`SimulatedTable`] - Fixed-latency backend that stores nothing
//!
//! ## Example
//!
//! ```rust
//! use asyncdb_table::{InMemoryTable, Table, Value, ValueKind};
//!
//! let table = InMemoryTable::new("accounts", ValueKind::Integer, ValueKind::Integer).unwrap();
//! table.put(Value::from(1), Value::from(100)).unwrap();
//! assert_eq!(table.get(&Value::from(1)).unwrap(), Value::from(100));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod simulated;
mod table;
mod value;

pub use error::{TableError, TableResult, TypeSlot};
pub use memory::InMemoryTable;
pub use simulated::SimulatedTable;
pub use table::Table;
pub use value::{Value, ValueKind};
