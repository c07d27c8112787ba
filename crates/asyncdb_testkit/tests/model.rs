//! A transaction behaves like a map until it commits or rolls back.

use asyncdb_core::{Config, CoreError, LockManager, LockMode, TableId, Timestamp, TransactionId};
use asyncdb_table::Value;
use asyncdb_testkit::prelude::*;
use proptest::prelude::*;

fn outcome(result: Result<Value, CoreError>) -> ModelOutcome {
    match result {
        Ok(Value::Null) => ModelOutcome::Done,
        Ok(value) => ModelOutcome::Value(value.as_integer().unwrap()),
        Err(err) if err.is_key_not_found() => ModelOutcome::KeyNotFound,
        Err(err) => panic!("unexpected error: {err}"),
    }
}

async fn run_ops(db: &TestDb, ops: &[TableOp]) -> Vec<ModelOutcome> {
    let mut out = Vec::new();
    for op in ops {
        let result = match *op {
            TableOp::Put { key, value } => db.put(&db.conn, "t", key, value).await.map(|()| Value::Null),
            TableOp::Get { key } => db.get(&db.conn, "t", key).await,
            TableOp::Delete { key } => db.delete(&db.conn, "t", key).await.map(|()| Value::Null),
        };
        out.push(outcome(result));
    }
    out
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn committed_transaction_matches_model(
        seed in table_ops_strategy(6, 12),
        ops in table_ops_strategy(6, 24),
    ) {
        let rt = runtime();
        let (expected_outcomes, actual_outcomes, expected_rows, actual_rows) = rt.block_on(async {
            let mut db = TestDb::new();
            db.add_int_table("t").unwrap();
            let mut model = TableModel::new();

            // Seed with implicit transactions.
            for op in &seed {
                model.apply(*op);
            }
            run_ops(&db, &seed).await;

            db.begin_transaction(&db.conn).unwrap();
            let expected: Vec<_> = ops.iter().map(|op| model.apply(*op)).collect();
            let actual = run_ops(&db, &ops).await;
            db.commit_transaction(&db.conn).await.unwrap();

            let rows = db.table("t").unwrap().snapshot();
            (expected, actual, model.rows(), rows)
        });
        prop_assert_eq!(expected_outcomes, actual_outcomes);
        prop_assert_eq!(expected_rows, actual_rows);
    }

    #[test]
    fn rolled_back_transaction_changes_nothing(
        seed in table_ops_strategy(6, 12),
        ops in table_ops_strategy(6, 24),
    ) {
        let rt = runtime();
        let (before, after) = rt.block_on(async {
            let mut db = TestDb::deterministic(Config::default());
            db.add_int_table("t").unwrap();
            run_ops(&db, &seed).await;
            let before = db.table("t").unwrap().snapshot();

            db.begin_transaction(&db.conn).unwrap();
            run_ops(&db, &ops).await;
            db.rollback_transaction(&db.conn).await.unwrap();
            (before, db.table("t").unwrap().snapshot())
        });
        prop_assert_eq!(before, after);
    }

    #[test]
    fn key_shapes_lock_by_priority(
        keys in prop::collection::btree_set(key_strategy(), 1..8),
    ) {
        let rt = runtime();
        let (conflicts, handed_over) = rt.block_on(async {
            let lm = LockManager::new();
            let table = TableId::new(7);
            let (old, young) = (TransactionId::new(), TransactionId::new());
            for key in &keys {
                lm.lock(LockMode::Write, old, Timestamp::new(1), table, key).await.unwrap();
            }

            let mut conflicts = 0;
            for key in &keys {
                let result = lm.lock(LockMode::Write, young, Timestamp::new(2), table, key).await;
                if result == Err(CoreError::LockConflict) {
                    conflicts += 1;
                }
            }

            lm.release_locks(old).unwrap();
            let mut handed_over = 0;
            for key in &keys {
                lm.lock(LockMode::Write, young, Timestamp::new(2), table, key).await.unwrap();
                if lm.holders(table, key).and_then(|s| s.writer) == Some(young) {
                    handed_over += 1;
                }
            }
            (conflicts, handed_over)
        });
        prop_assert_eq!(conflicts, keys.len());
        prop_assert_eq!(handed_over, keys.len());
    }
}
