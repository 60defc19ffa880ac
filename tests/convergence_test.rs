//! Convergence property: for any pair of table states, a sync run leaves the
//! destination equal to the source, and a second run moves nothing.

use proptest::prelude::*;
use rowsync::{
    sync_stores, Column, Database, MemoryStore, Row, SyncOptions, SyncReport, Table, Value,
};
use std::collections::BTreeMap;

fn table() -> Table {
    Table {
        name: "proptbl".into(),
        columns: vec![
            Column::new("id", "INT", false),
            Column::new("num", "INT", true),
            Column::new("txt", "VARCHAR(8)", true),
        ],
        primary_key_columns: vec![0],
        keys: vec![],
    }
}

fn store_with(rows: &BTreeMap<i64, (Option<i64>, String)>) -> MemoryStore {
    let store = MemoryStore::new(Database {
        tables: vec![table()],
    });
    for (&id, (num, txt)) in rows {
        let row: Row = vec![
            Value::Int(id),
            num.map(Value::Int).unwrap_or(Value::Null),
            Value::Text(txt.clone()),
        ];
        store.insert("proptbl", row);
    }
    store
}

async fn sync_once(from: &MemoryStore, to: &MemoryStore) -> SyncReport {
    sync_stores(
        vec![from.handle()],
        vec![to.handle()],
        SyncOptions::default(),
    )
    .await
    .expect("sync run")
}

fn table_state() -> impl Strategy<Value = BTreeMap<i64, (Option<i64>, String)>> {
    prop::collection::btree_map(
        0i64..64,
        (prop::option::of(-5i64..5), "[a-c]{0,3}"),
        0..40,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sync_converges_and_is_idempotent(from_rows in table_state(), to_rows in table_state()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let from = store_with(&from_rows);
            let to = store_with(&to_rows);

            sync_once(&from, &to).await;
            prop_assert_eq!(to.rows("proptbl"), from.rows("proptbl"));

            let second = sync_once(&from, &to).await;
            prop_assert_eq!(second.rows_changed(), 0);
            Ok(())
        })?;
    }
}
