//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases, either
//! empty or seeded from a JSON description:
//!
//! ```json
//! {
//!   "tables": [
//!     { "name": "accounts", "key_kind": "integer", "value_kind": "integer",
//!       "rows": [[1, 100], [2, 250]] }
//!   ]
//! }
//! ```

use asyncdb_core::{AsyncDb, Config, Connection, CoreError, Fnv1aHasher, LogicalClock};
use asyncdb_table::{InMemoryTable, Table, TableError, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The fixture JSON is malformed.
    #[error("invalid fixture: {0}")]
    Json(#[from] serde_json::Error),

    /// A table rejected a seed row.
    #[error("seed failed: {0}")]
    Table(#[from] TableError),

    /// The database rejected a table.
    #[error("database error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for fixture operations.
pub type FixtureResult<T> = Result<T, FixtureError>;

/// One seeded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFixture {
    /// Table name.
    pub name: String,
    /// Declared key type.
    #[serde(default = "any_kind")]
    pub key_kind: ValueKind,
    /// Declared value type.
    #[serde(default = "any_kind")]
    pub value_kind: ValueKind,
    /// Initial rows as `[key, value]` pairs.
    #[serde(default)]
    pub rows: Vec<(Value, Value)>,
}

fn any_kind() -> ValueKind {
    ValueKind::Any
}

/// A set of tables to seed a database with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    /// The tables.
    pub tables: Vec<TableFixture>,
}

impl Fixture {
    /// Parses a fixture from JSON.
    pub fn from_json(json: &str) -> FixtureResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the fixture to pretty JSON.
    pub fn to_json(&self) -> FixtureResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A database with one open connection and direct handles to its tables.
///
/// Dereferences to [`AsyncDb`], so database calls can be made on it
/// directly.
pub struct TestDb {
    /// The database instance.
    pub db: AsyncDb,
    /// A connection for the test to use.
    pub conn: Connection,
    tables: HashMap<String, Arc<InMemoryTable>>,
}

impl TestDb {
    /// Creates an empty database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty database with `config`.
    pub fn with_config(config: Config) -> Self {
        Self::from_db(AsyncDb::new(config))
    }

    /// Creates an empty database whose transactions are stamped 1, 2, 3, ...
    /// in `begin` order.
    pub fn deterministic(config: Config) -> Self {
        Self::from_db(AsyncDb::with_parts(
            config,
            Arc::new(LogicalClock::default()),
            Arc::new(Fnv1aHasher::new()),
        ))
    }

    /// Creates a database seeded from `fixture`.
    pub fn from_fixture(config: Config, fixture: &Fixture) -> FixtureResult<Self> {
        let mut test_db = Self::with_config(config);
        for spec in &fixture.tables {
            let table = test_db.add_table(&spec.name, spec.key_kind, spec.value_kind)?;
            table.load(spec.rows.iter().cloned())?;
        }
        Ok(test_db)
    }

    /// Creates a database seeded from fixture JSON.
    pub fn from_json(config: Config, json: &str) -> FixtureResult<Self> {
        Self::from_fixture(config, &Fixture::from_json(json)?)
    }

    fn from_db(db: AsyncDb) -> Self {
        let conn = db.connect();
        Self {
            db,
            conn,
            tables: HashMap::new(),
        }
    }

    /// Creates and registers an in-memory table.
    pub fn add_table(
        &mut self,
        name: &str,
        key_kind: ValueKind,
        value_kind: ValueKind,
    ) -> FixtureResult<Arc<InMemoryTable>> {
        let table = Arc::new(InMemoryTable::new(name, key_kind, value_kind)?);
        self.register(table)
    }

    /// Creates and registers an integer-to-integer table.
    pub fn add_int_table(&mut self, name: &str) -> FixtureResult<Arc<InMemoryTable>> {
        self.register(int_table(name)?)
    }

    fn register(&mut self, table: Arc<InMemoryTable>) -> FixtureResult<Arc<InMemoryTable>> {
        self.db.create_table(&self.conn, Arc::clone(&table) as Arc<dyn asyncdb_table::Table>)?;
        self.tables.insert(table.name().to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Returns the backend of a table added through this fixture.
    ///
    /// Reading the backend directly bypasses locking and transaction
    /// buffers, which is what committed-state assertions want.
    pub fn table(&self, name: &str) -> Option<&Arc<InMemoryTable>> {
        self.tables.get(name)
    }

    /// Returns the committed value of `key`, bypassing transactions.
    pub fn committed(&self, table: &str, key: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        self.table(table)?
            .snapshot()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDb {
    type Target = AsyncDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Creates an integer-to-integer in-memory table.
pub fn int_table(name: &str) -> Result<Arc<InMemoryTable>, TableError> {
    Ok(Arc::new(InMemoryTable::new(
        name,
        ValueKind::Integer,
        ValueKind::Integer,
    )?))
}
