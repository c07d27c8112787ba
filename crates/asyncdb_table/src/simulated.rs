//! Fixed-latency simulated table.

use crate::error::TableResult;
use crate::table::Table;
use crate::value::Value;
use std::time::Duration;

/// A table that simulates storage access time without storing anything.
///
/// Every access blocks the calling thread for `access_time`; reads always
/// return the text `"value"`. Since nothing is stored there is no data
/// contention, so any waiting observed by callers comes from the engine's
/// lock protocol alone.
#[derive(Debug, Clone)]
pub struct SimulatedTable {
    name: String,
    access_time: Duration,
}

impl SimulatedTable {
    /// Creates a simulated table with the given per-access latency.
    pub fn new(name: impl Into<String>, access_time: Duration) -> Self {
        Self {
            name: name.into(),
            access_time,
        }
    }

    /// Returns the simulated per-access latency.
    #[must_use]
    pub fn access_time(&self) -> Duration {
        self.access_time
    }

    fn simulate_work(&self) {
        if !self.access_time.is_zero() {
            std::thread::sleep(self.access_time);
        }
    }
}

impl Table for SimulatedTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, _key: &Value) -> TableResult<Value> {
        self.simulate_work();
        Ok(Value::from("value"))
    }

    fn put(&self, _key: Value, _value: Value) -> TableResult<()> {
        self.simulate_work();
        Ok(())
    }

    fn delete(&self, _key: &Value) -> TableResult<()> {
        self.simulate_work();
        Ok(())
    }

    fn validate_types(&self, _key: &Value, _value: Option<&Value>) -> TableResult<()> {
        Ok(())
    }
}
