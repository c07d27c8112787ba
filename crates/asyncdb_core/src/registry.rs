//! Table registry.

use crate::error::{CoreError, CoreResult};
use crate::hash::TableHasher;
use crate::types::TableId;
use asyncdb_table::Table;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps table names to table backends.
pub struct TableRegistry {
    hasher: Arc<dyn TableHasher>,
    tables: RwLock<HashMap<TableId, Arc<dyn Table>>>,
}

impl TableRegistry {
    /// Creates an empty registry using `hasher` for table IDs.
    pub fn new(hasher: Arc<dyn TableHasher>) -> Self {
        Self {
            hasher,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the ID a table name maps to.
    pub fn table_id(&self, name: &str) -> TableId {
        self.hasher.table_id(name)
    }

    /// Registers a table under its own name.
    pub fn create(&self, table: Arc<dyn Table>) -> CoreResult<TableId> {
        let name = table.name().to_string();
        if name.is_empty() {
            return Err(CoreError::EmptyTableName);
        }
        let id = self.table_id(&name);
        let mut tables = self.tables.write();
        if tables.contains_key(&id) {
            return Err(CoreError::table_exists(name));
        }
        tables.insert(id, table);
        debug!(table = %name, id = %id, "table created");
        Ok(id)
    }

    /// Removes a table.
    pub fn drop_table(&self, name: &str) -> CoreResult<Arc<dyn Table>> {
        let id = self.table_id(name);
        let table = self
            .tables
            .write()
            .remove(&id)
            .ok_or_else(|| CoreError::table_not_found(name))?;
        debug!(table = %name, id = %id, "table dropped");
        Ok(table)
    }

    /// Returns the names of all tables, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .values()
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Looks a table up by name.
    pub fn resolve(&self, name: &str) -> CoreResult<(TableId, Arc<dyn Table>)> {
        let id = self.table_id(name);
        self.get(id)
            .map(|table| (id, table))
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    /// Looks a table up by ID.
    pub fn get(&self, id: TableId) -> Option<Arc<dyn Table>> {
        self.tables.read().get(&id).cloned()
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true if no table is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRegistry")
            .field("hasher", &self.hasher)
            .field("tables", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Fnv1aHasher;
    use asyncdb_table::{InMemoryTable, ValueKind};

    fn registry() -> TableRegistry {
        TableRegistry::new(Arc::new(Fnv1aHasher::new()))
    }

    fn table(name: &str) -> Arc<dyn Table> {
        Arc::new(InMemoryTable::new(name, ValueKind::Integer, ValueKind::Integer).unwrap())
    }

    #[test]
    fn create_resolve_drop() {
        let reg = registry();
        let id = reg.create(table("t")).unwrap();
        let (resolved, t) = reg.resolve("t").unwrap();
        assert_eq!(resolved, id);
        assert_eq!(t.name(), "t");

        reg.drop_table("t").unwrap();
        assert_eq!(reg.resolve("t").err(), Some(CoreError::table_not_found("t")));
        assert!(reg.is_empty());
    }

    #[test]
    fn ddl_errors() {
        let reg = registry();
        reg.create(table("t")).unwrap();
        let err = reg.create(table("t")).unwrap_err();
        assert_eq!(err.to_string(), "table already exists - t");

        let err = reg.drop_table("missing").err().unwrap();
        assert_eq!(err.to_string(), "table not found - missing");
    }

    #[test]
    fn list_is_sorted() {
        let reg = registry();
        for name in ["zeta", "alpha", "mid"] {
            reg.create(table(name)).unwrap();
        }
        assert_eq!(reg.list(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(reg.len(), 3);
    }
}
