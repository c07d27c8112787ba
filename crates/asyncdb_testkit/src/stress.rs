//! Stress tests for AsyncDB.
//!
//! The counter workload has every task repeatedly read a single counter,
//! increment it and commit, retrying whenever it loses a lock race. With
//! correct isolation no increment is ever lost.

use asyncdb_core::{AsyncDb, Connection, CoreError, CoreResult};
use asyncdb_table::{InMemoryTable, Table, Value, ValueKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::debug;

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressReport {
    /// Transactions that committed.
    pub committed: usize,
    /// Attempts that failed with a retryable error and were retried.
    pub retries: usize,
    /// Total duration.
    pub duration: Duration,
    /// Counter value after the run.
    pub final_value: i64,
}

impl StressReport {
    /// Committed transactions per second.
    pub fn commits_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Committed: {}", self.committed);
        println!("Retries: {}", self.retries);
        println!("Final value: {}", self.final_value);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second());
    }
}

/// Configuration of the counter workload.
#[derive(Debug, Clone)]
pub struct CounterStress {
    /// Number of concurrent tasks, each with its own connection.
    pub tasks: usize,
    /// Increments per task.
    pub iterations: usize,
    /// Table holding the counter. Created if missing.
    pub table: String,
    /// Counter key.
    pub key: i64,
    /// Retries allowed per increment before giving up.
    pub max_retries: usize,
}

impl Default for CounterStress {
    fn default() -> Self {
        Self {
            tasks: 8,
            iterations: 25,
            table: "counter".to_string(),
            key: 0,
            max_retries: 10_000,
        }
    }
}

impl CounterStress {
    /// Creates a workload of `tasks` × `iterations` increments.
    pub fn new(tasks: usize, iterations: usize) -> Self {
        Self {
            tasks,
            iterations,
            ..Self::default()
        }
    }

    /// Number of increments the run should commit.
    pub fn expected(&self) -> usize {
        self.tasks * self.iterations
    }

    /// Runs the workload against `db` and reads back the counter.
    ///
    /// The counter starts at zero. The first non-retryable error, or an
    /// increment that exhausts `max_retries`, aborts the run.
    pub async fn run(&self, db: &AsyncDb) -> CoreResult<StressReport> {
        let setup = db.connect();
        if !db.list_tables(&setup).contains(&self.table) {
            let table: Arc<dyn Table> = Arc::new(InMemoryTable::new(
                self.table.as_str(),
                ValueKind::Integer,
                ValueKind::Integer,
            )?);
            db.create_table(&setup, table)?;
        }
        db.put(&setup, &self.table, self.key, 0).await?;

        let retries = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let mut workers = JoinSet::new();
        for worker in 0..self.tasks {
            let db = db.clone();
            let config = self.clone();
            let retries = Arc::clone(&retries);
            workers.spawn(async move {
                let conn = db.connect();
                for _ in 0..config.iterations {
                    config.increment_with_retry(&db, &conn, &retries).await?;
                }
                db.disconnect(&conn).await?;
                debug!(worker, "stress worker finished");
                Ok::<usize, CoreError>(config.iterations)
            });
        }

        let mut committed = 0;
        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(count)) => committed += count,
                Ok(Err(err)) => failure = Some(err),
                Err(err) => failure = Some(CoreError::task_failed(err.to_string())),
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        let duration = start.elapsed();

        let final_value = db
            .get(&setup, &self.table, self.key)
            .await?
            .as_integer()
            .unwrap_or_default();
        db.disconnect(&setup).await?;

        Ok(StressReport {
            committed,
            retries: retries.load(Ordering::Relaxed),
            duration,
            final_value,
        })
    }

    async fn increment_with_retry(
        &self,
        db: &AsyncDb,
        conn: &Connection,
        retries: &AtomicUsize,
    ) -> CoreResult<()> {
        let mut attempts = 0;
        loop {
            match self.increment(db, conn).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempts < self.max_retries => {
                    attempts += 1;
                    retries.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
                Err(err) => {
                    if db.in_transaction(conn) {
                        let _ = db.rollback_transaction(conn).await;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One read-modify-write transaction.
    ///
    /// A lock conflict leaves the connection in a restarted transaction,
    /// so `begin` is only issued when none is open.
    async fn increment(&self, db: &AsyncDb, conn: &Connection) -> CoreResult<()> {
        if !db.in_transaction(conn) {
            db.begin_transaction(conn)?;
        }
        let current = db.get(conn, &self.table, self.key).await?;
        let next = current.as_integer().unwrap_or_default() + 1;
        db.put(conn, &self.table, self.key, Value::from(next)).await?;
        db.commit_transaction(conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncdb_core::Config;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counter_is_exact() {
        let db = AsyncDb::new(Config::default());
        let stress = CounterStress::new(4, 20);
        let report = stress.run(&db).await.unwrap();
        assert_eq!(report.committed, stress.expected());
        assert_eq!(report.final_value, stress.expected() as i64);
    }

    #[tokio::test]
    async fn single_task_never_retries() {
        let db = AsyncDb::new(Config::default());
        let report = CounterStress::new(1, 10).run(&db).await.unwrap();
        assert_eq!(report.final_value, 10);
        assert_eq!(report.retries, 0);
    }
}
