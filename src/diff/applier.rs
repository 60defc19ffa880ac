//! Destination-side application of a received row range.
//!
//! A range is applied only once its terminator has arrived, so a dropped
//! connection never leaves a half-applied range behind. Within the range the
//! source's rows win: received rows are inserted or replace their local
//! counterparts, and local rows the source didn't send no longer exist over
//! there and are deleted.

use crate::schema::Table;
use crate::store::WritableDatastore;
use crate::value::{KeyTuple, Row};
use anyhow::Result;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct RowApplier {
    pub rows_changed: usize,
}

impl RowApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converge local content of `(prev_key, last_key]` to exactly `received`.
    pub fn apply_range<S: WritableDatastore + ?Sized>(
        &mut self,
        store: &mut S,
        table: &Table,
        prev_key: &KeyTuple,
        last_key: &KeyTuple,
        received: Vec<Row>,
    ) -> Result<()> {
        let mut incoming: BTreeMap<KeyTuple, Row> = received
            .into_iter()
            .map(|row| (table.key_of(&row), row))
            .collect();

        let mut local: Vec<(KeyTuple, Row)> = Vec::new();
        store.visit_range(table, prev_key, last_key, &mut |row| {
            local.push((table.key_of(row), row.clone()));
            Ok(())
        })?;

        for (key, existing) in local {
            match incoming.remove(&key) {
                Some(row) => {
                    if row != existing {
                        store.replace_row(table, row)?;
                        self.rows_changed += 1;
                    }
                }
                None => {
                    store.delete_row(table, &key)?;
                    self.rows_changed += 1;
                }
            }
        }
        for (_, row) in incoming {
            store.replace_row(table, row)?;
            self.rows_changed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Database};
    use crate::store::{Datastore, MemoryStore};
    use crate::value::Value;

    fn footbl() -> Table {
        Table {
            name: "footbl".into(),
            columns: vec![
                Column::new("col1", "INT", false),
                Column::new("col3", "VARCHAR(10)", true),
            ],
            primary_key_columns: vec![0],
            keys: vec![],
        }
    }

    fn row(k: i64, text: &str) -> Row {
        vec![Value::Int(k), Value::Text(text.into())]
    }

    fn key(n: i64) -> KeyTuple {
        KeyTuple(vec![Value::Int(n)])
    }

    fn store_with(rows: &[Row]) -> MemoryStore {
        let store = MemoryStore::new(Database {
            tables: vec![footbl()],
        });
        for r in rows {
            store.insert("footbl", r.clone());
        }
        store
    }

    #[test]
    fn test_replaces_differing_rows_in_range() {
        let mut store = store_with(&[row(2, "old"), row(4, "same")]);
        let mut applier = RowApplier::new();
        applier
            .apply_range(
                &mut store,
                &footbl(),
                &KeyTuple::empty(),
                &key(4),
                vec![row(2, "new"), row(4, "same")],
            )
            .unwrap();
        assert_eq!(store.rows("footbl"), vec![row(2, "new"), row(4, "same")]);
        assert_eq!(applier.rows_changed, 1);
    }

    #[test]
    fn test_inserts_missing_rows() {
        let mut store = store_with(&[row(2, "a")]);
        let mut applier = RowApplier::new();
        applier
            .apply_range(
                &mut store,
                &footbl(),
                &KeyTuple::empty(),
                &key(8),
                vec![row(2, "a"), row(5, "b"), row(8, "c")],
            )
            .unwrap();
        assert_eq!(
            store.rows("footbl"),
            vec![row(2, "a"), row(5, "b"), row(8, "c")]
        );
        assert_eq!(applier.rows_changed, 2);
    }

    #[test]
    fn test_deletes_rows_absent_from_range() {
        let mut store = store_with(&[row(2, "a"), row(4, "gone"), row(8, "b")]);
        let mut applier = RowApplier::new();
        applier
            .apply_range(
                &mut store,
                &footbl(),
                &KeyTuple::empty(),
                &key(8),
                vec![row(2, "a"), row(8, "b")],
            )
            .unwrap();
        assert_eq!(store.rows("footbl"), vec![row(2, "a"), row(8, "b")]);
        assert_eq!(applier.rows_changed, 1);
    }

    #[test]
    fn test_only_touches_rows_inside_the_range() {
        let mut store = store_with(&[row(2, "a"), row(4, "b"), row(100, "outside")]);
        let mut applier = RowApplier::new();
        applier
            .apply_range(&mut store, &footbl(), &key(2), &key(8), vec![])
            .unwrap();
        assert_eq!(store.rows("footbl"), vec![row(2, "a"), row(100, "outside")]);
    }

    #[test]
    fn test_open_ended_range_clears_to_table_end() {
        let mut store = store_with(&[row(2, "a"), row(4, "b"), row(100, "c")]);
        let mut applier = RowApplier::new();
        applier
            .apply_range(
                &mut store,
                &footbl(),
                &KeyTuple::empty(),
                &KeyTuple::empty(),
                vec![],
            )
            .unwrap();
        assert!(store.rows("footbl").is_empty());
        assert_eq!(applier.rows_changed, 3);
    }

    #[test]
    fn test_identical_range_changes_nothing() {
        let mut store = store_with(&[row(2, "a"), row(4, "b")]);
        let mut applier = RowApplier::new();
        applier
            .apply_range(
                &mut store,
                &footbl(),
                &KeyTuple::empty(),
                &KeyTuple::empty(),
                vec![row(2, "a"), row(4, "b")],
            )
            .unwrap();
        assert_eq!(applier.rows_changed, 0);
    }
}
