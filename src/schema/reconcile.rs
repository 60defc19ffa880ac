//! Schema reconciliation: decide whether the destination's live schema can
//! serve the source's declared schema.
//!
//! The declared schema is authoritative. Anything extra on the destination
//! (tables, columns, secondary keys) is dropped locally; anything missing or
//! structurally different is fatal, reported as a single diagnostic line.
//! Both sides are walked in name order; ignored tables are invisible to the
//! comparison entirely.

use crate::error::SyncError;
use crate::schema::{column_names_list, Column, Database, Key, Table};
use std::collections::HashSet;

/// Destructive actions the destination applies locally before syncing rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    DropTable { table: String },
    DropColumns { table: String, columns: Vec<String> },
    DropKey { table: String, key: String },
}

/// Which tables take part in the sync at all.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    ignore: HashSet<String>,
    only: HashSet<String>,
}

impl TableFilter {
    pub fn new(ignore: impl IntoIterator<Item = String>, only: impl IntoIterator<Item = String>) -> Self {
        Self {
            ignore: ignore.into_iter().collect(),
            only: only.into_iter().collect(),
        }
    }

    /// Parse a comma-separated table list, ignoring empty entries.
    pub fn parse_list(list: &str) -> impl Iterator<Item = String> + '_ {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    pub fn skips(&self, name: &str) -> bool {
        self.ignore.contains(name) || (!self.only.is_empty() && !self.only.contains(name))
    }
}

type ReconcileResult<T> = Result<T, SyncError>;

fn mismatch<T>(message: String) -> ReconcileResult<T> {
    Err(SyncError::SchemaMismatch(message))
}

/// Compare the declared schema against the live one and produce the drop
/// actions needed, or the first fatal mismatch found.
pub fn reconcile(
    declared: &Database,
    live: &Database,
    filter: &TableFilter,
) -> ReconcileResult<Vec<SchemaChange>> {
    let mut from_tables: Vec<&Table> = declared
        .tables
        .iter()
        .filter(|t| !filter.skips(&t.name))
        .collect();
    let mut to_tables: Vec<&Table> = live
        .tables
        .iter()
        .filter(|t| !filter.skips(&t.name))
        .collect();
    from_tables.sort_by(|a, b| a.name.cmp(&b.name));
    to_tables.sort_by(|a, b| a.name.cmp(&b.name));

    let mut changes = Vec::new();
    let mut from_iter = from_tables.into_iter().peekable();
    let mut to_iter = to_tables.into_iter().peekable();

    loop {
        match (from_iter.peek(), to_iter.peek()) {
            (None, None) => break,
            (Some(from), None) => return mismatch(format!("Missing table {}", from.name)),
            (None, Some(to)) => {
                changes.push(SchemaChange::DropTable {
                    table: to.name.clone(),
                });
                to_iter.next();
            }
            (Some(from), Some(to)) => {
                if from.name < to.name {
                    return mismatch(format!("Missing table {}", from.name));
                } else if to.name < from.name {
                    changes.push(SchemaChange::DropTable {
                        table: to.name.clone(),
                    });
                    to_iter.next();
                } else {
                    match_table(from, to, &mut changes)?;
                    from_iter.next();
                    to_iter.next();
                }
            }
        }
    }
    Ok(changes)
}

fn match_table(from: &Table, to: &Table, changes: &mut Vec<SchemaChange>) -> ReconcileResult<()> {
    match_columns(from, to, changes)?;
    match_primary_key(from, to)?;
    match_keys(from, to, changes)?;
    Ok(())
}

fn match_columns(from: &Table, to: &Table, changes: &mut Vec<SchemaChange>) -> ReconcileResult<()> {
    let mut drops: Vec<String> = Vec::new();
    let mut fi = 0;
    let mut ti = 0;

    while ti < to.columns.len() {
        let to_column = &to.columns[ti];
        if fi < from.columns.len() && from.columns[fi].name == to_column.name {
            match_column(&from.columns[fi], to_column, &from.name)?;
            fi += 1;
            ti += 1;
        } else if !from.columns[fi..].iter().any(|c| c.name == to_column.name) {
            // Extra column on our end, regardless of position: drop it.
            drops.push(to_column.name.clone());
            ti += 1;
        } else if !to.columns[ti..]
            .iter()
            .any(|c| c.name == from.columns[fi].name)
        {
            return mismatch(format!(
                "Missing column {} on table {}",
                from.columns[fi].name, from.name
            ));
        } else {
            return mismatch(format!(
                "Misordered column {} on table {}, should have {} first",
                from.columns[fi].name, from.name, to_column.name
            ));
        }
    }
    if fi < from.columns.len() {
        return mismatch(format!(
            "Missing column {} on table {}",
            from.columns[fi].name, from.name
        ));
    }

    if !drops.is_empty() {
        changes.push(SchemaChange::DropColumns {
            table: to.name.clone(),
            columns: drops,
        });
    }
    Ok(())
}

fn match_column(from: &Column, to: &Column, table: &str) -> ReconcileResult<()> {
    if from.base_type() != to.base_type() {
        return mismatch(format!(
            "Column {} on table {} should have type {} but has type {}",
            from.name,
            table,
            from.base_type(),
            to.base_type()
        ));
    }
    if from.nullable != to.nullable {
        let describe = |nullable: bool| if nullable { "nullable" } else { "not nullable" };
        return mismatch(format!(
            "Column {} on table {} should be {} but is {}",
            from.name,
            table,
            describe(from.nullable),
            describe(to.nullable)
        ));
    }
    Ok(())
}

fn match_primary_key(from: &Table, to: &Table) -> ReconcileResult<()> {
    let from_names = from.primary_key_names();
    let to_names = to.primary_key_names();
    if from_names != to_names {
        return mismatch(format!(
            "Mismatching primary key {} on table {}, should have {}",
            column_names_list(&to_names),
            from.name,
            column_names_list(&from_names)
        ));
    }
    Ok(())
}

fn match_keys(from: &Table, to: &Table, changes: &mut Vec<SchemaChange>) -> ReconcileResult<()> {
    let mut from_keys: Vec<&Key> = from.keys.iter().collect();
    let mut to_keys: Vec<&Key> = to.keys.iter().collect();
    from_keys.sort_by(|a, b| a.name.cmp(&b.name));
    to_keys.sort_by(|a, b| a.name.cmp(&b.name));

    let mut from_iter = from_keys.into_iter().peekable();
    let mut to_iter = to_keys.into_iter().peekable();

    loop {
        match (from_iter.peek(), to_iter.peek()) {
            (None, None) => break,
            (Some(from_key), None) => {
                return mismatch(format!(
                    "Missing key {} on table {}",
                    from_key.name, from.name
                ));
            }
            (None, Some(to_key)) => {
                changes.push(SchemaChange::DropKey {
                    table: to.name.clone(),
                    key: to_key.name.clone(),
                });
                to_iter.next();
            }
            (Some(from_key), Some(to_key)) => {
                if from_key.name < to_key.name {
                    return mismatch(format!(
                        "Missing key {} on table {}",
                        from_key.name, from.name
                    ));
                } else if to_key.name < from_key.name {
                    changes.push(SchemaChange::DropKey {
                        table: to.name.clone(),
                        key: to_key.name.clone(),
                    });
                    to_iter.next();
                } else {
                    match_key(from, from_key, to, to_key)?;
                    from_iter.next();
                    to_iter.next();
                }
            }
        }
    }
    Ok(())
}

fn match_key(from: &Table, from_key: &Key, to: &Table, to_key: &Key) -> ReconcileResult<()> {
    if from_key.unique != to_key.unique {
        return mismatch(format!(
            "Mismatching unique flag on table {} key {}",
            from.name, from_key.name
        ));
    }
    let from_names = from.column_names(&from_key.columns);
    let to_names = to.column_names(&to_key.columns);
    if from_names != to_names {
        return mismatch(format!(
            "Mismatching columns {} on table {} key {}, should have {}",
            column_names_list(&to_names),
            from.name,
            from_key.name,
            column_names_list(&from_names)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footbl() -> Table {
        Table {
            name: "footbl".into(),
            columns: vec![
                Column::new("col1", "INT", false),
                Column::new("another_col", "SMALLINT", true),
                Column::new("col3", "VARCHAR(10)", true),
            ],
            primary_key_columns: vec![0],
            keys: vec![],
        }
    }

    fn middletbl() -> Table {
        Table {
            name: "middletbl".into(),
            columns: vec![Column::new("pri", "INT", false)],
            primary_key_columns: vec![0],
            keys: vec![],
        }
    }

    fn secondtbl() -> Table {
        Table {
            name: "secondtbl".into(),
            columns: vec![
                Column::new("pri1", "INT", false),
                Column::new("pri2", "CHAR(2)", false),
                Column::new("sec", "INT", true),
                Column::new("tri", "INT", true),
            ],
            primary_key_columns: vec![1, 0],
            keys: vec![Key {
                name: "secidx".into(),
                unique: false,
                columns: vec![2],
            }],
        }
    }

    fn db(tables: Vec<Table>) -> Database {
        Database { tables }
    }

    fn no_filter() -> TableFilter {
        TableFilter::default()
    }

    fn error_of(declared: &Database, live: &Database) -> String {
        reconcile(declared, live, &no_filter()).unwrap_err().to_string()
    }

    #[test]
    fn test_empty_schemas_match() {
        assert_eq!(
            reconcile(&db(vec![]), &db(vec![]), &no_filter()).unwrap(),
            vec![]
        );
    }

    #[test]
    fn test_matching_schemas_need_no_changes() {
        let declared = db(vec![footbl(), middletbl(), secondtbl()]);
        let live = db(vec![footbl(), middletbl(), secondtbl()]);
        assert_eq!(reconcile(&declared, &live, &no_filter()).unwrap(), vec![]);
    }

    #[test]
    fn test_missing_tables_are_fatal_wherever_they_fall() {
        let declared = db(vec![footbl(), middletbl(), secondtbl()]);
        assert_eq!(
            error_of(&declared, &db(vec![middletbl(), secondtbl()])),
            "Missing table footbl"
        );
        assert_eq!(
            error_of(&declared, &db(vec![footbl(), secondtbl()])),
            "Missing table middletbl"
        );
        assert_eq!(
            error_of(&declared, &db(vec![footbl(), middletbl()])),
            "Missing table secondtbl"
        );
    }

    #[test]
    fn test_extra_tables_are_dropped_wherever_they_fall() {
        let live = db(vec![footbl(), middletbl(), secondtbl()]);
        for (declared, dropped) in [
            (db(vec![middletbl(), secondtbl()]), "footbl"),
            (db(vec![footbl(), secondtbl()]), "middletbl"),
            (db(vec![footbl(), middletbl()]), "secondtbl"),
        ] {
            assert_eq!(
                reconcile(&declared, &live, &no_filter()).unwrap(),
                vec![SchemaChange::DropTable {
                    table: dropped.into()
                }]
            );
        }
    }

    #[test]
    fn test_ignored_tables_are_invisible_on_both_sides() {
        let filter = TableFilter::new(["footbl".to_string()], []);
        // Missing on the live side: no complaint.
        let declared = db(vec![footbl(), middletbl()]);
        let live = db(vec![middletbl()]);
        assert_eq!(reconcile(&declared, &live, &filter).unwrap(), vec![]);
        // Extra on the live side: not dropped either.
        let declared = db(vec![middletbl()]);
        let live = db(vec![footbl(), middletbl()]);
        assert_eq!(reconcile(&declared, &live, &filter).unwrap(), vec![]);
    }

    #[test]
    fn test_only_list_restricts_comparison() {
        let filter = TableFilter::new([], ["middletbl".to_string()]);
        let declared = db(vec![footbl(), middletbl()]);
        let live = db(vec![middletbl(), secondtbl()]);
        assert_eq!(reconcile(&declared, &live, &filter).unwrap(), vec![]);
    }

    #[test]
    fn test_missing_middle_column_is_fatal() {
        let mut live_footbl = footbl();
        live_footbl.columns.remove(1);
        live_footbl.primary_key_columns = vec![0];
        assert_eq!(
            error_of(&db(vec![footbl()]), &db(vec![live_footbl])),
            "Missing column another_col on table footbl"
        );
    }

    #[test]
    fn test_missing_trailing_column_is_fatal() {
        let mut live_footbl = footbl();
        live_footbl.columns.pop();
        assert_eq!(
            error_of(&db(vec![footbl()]), &db(vec![live_footbl])),
            "Missing column col3 on table footbl"
        );
    }

    #[test]
    fn test_extra_columns_are_dropped_wherever_they_fall() {
        let live = db(vec![footbl()]);
        for (kept, dropped) in [(vec![0, 2], "another_col"), (vec![0, 1], "col3")] {
            let mut declared_footbl = footbl();
            declared_footbl.columns = kept
                .iter()
                .map(|&i| footbl().columns[i].clone())
                .collect();
            let changes = reconcile(&db(vec![declared_footbl]), &live, &no_filter()).unwrap();
            assert_eq!(
                changes,
                vec![SchemaChange::DropColumns {
                    table: "footbl".into(),
                    columns: vec![dropped.to_string()],
                }]
            );
        }
    }

    #[test]
    fn test_extra_leading_column_is_dropped() {
        let mut live_footbl = footbl();
        live_footbl.columns.insert(0, Column::new("legacy", "INT", true));
        live_footbl.primary_key_columns = vec![1];
        let changes = reconcile(&db(vec![footbl()]), &db(vec![live_footbl]), &no_filter()).unwrap();
        assert_eq!(
            changes,
            vec![SchemaChange::DropColumns {
                table: "footbl".into(),
                columns: vec!["legacy".to_string()],
            }]
        );
    }

    #[test]
    fn test_misordered_columns_are_fatal() {
        let mut declared_footbl = footbl();
        // Declared order: col1, col3, another_col
        declared_footbl.columns = vec![
            footbl().columns[0].clone(),
            footbl().columns[2].clone(),
            footbl().columns[1].clone(),
        ];
        assert_eq!(
            error_of(&db(vec![declared_footbl]), &db(vec![footbl()])),
            "Misordered column col3 on table footbl, should have another_col first"
        );
    }

    #[test]
    fn test_column_type_mismatch_reports_base_tokens() {
        let mut live_footbl = footbl();
        live_footbl.columns[1].column_type = "VARCHAR(11)".into();
        let mut declared_footbl = footbl();
        declared_footbl.columns[1].column_type = "INT".into();
        assert_eq!(
            error_of(&db(vec![declared_footbl]), &db(vec![live_footbl])),
            "Column another_col on table footbl should have type INT but has type VARCHAR"
        );
    }

    #[test]
    fn test_type_length_suffix_is_not_a_mismatch() {
        let mut live_footbl = footbl();
        live_footbl.columns[2].column_type = "VARCHAR(255)".into();
        assert_eq!(
            reconcile(&db(vec![footbl()]), &db(vec![live_footbl]), &no_filter()).unwrap(),
            vec![]
        );
    }

    #[test]
    fn test_nullability_mismatch_is_fatal() {
        let mut live_footbl = footbl();
        live_footbl.columns[1].nullable = false;
        assert_eq!(
            error_of(&db(vec![footbl()]), &db(vec![live_footbl])),
            "Column another_col on table footbl should be nullable but is not nullable"
        );
    }

    #[test]
    fn test_primary_key_order_mismatch_is_fatal() {
        let mut declared = secondtbl();
        declared.primary_key_columns = vec![0, 1];
        assert_eq!(
            error_of(&db(vec![declared]), &db(vec![secondtbl()])),
            "Mismatching primary key (pri2, pri1) on table secondtbl, should have (pri1, pri2)"
        );
    }

    #[test]
    fn test_primary_key_extra_trailing_column_is_fatal() {
        let mut declared = secondtbl();
        declared.primary_key_columns = vec![1, 0, 2];
        assert_eq!(
            error_of(&db(vec![declared]), &db(vec![secondtbl()])),
            "Mismatching primary key (pri2, pri1) on table secondtbl, should have (pri2, pri1, sec)"
        );
    }

    #[test]
    fn test_primary_key_extra_leading_column_is_fatal() {
        let mut declared = secondtbl();
        declared.primary_key_columns = vec![2, 1, 0];
        assert_eq!(
            error_of(&db(vec![declared]), &db(vec![secondtbl()])),
            "Mismatching primary key (pri2, pri1) on table secondtbl, should have (sec, pri2, pri1)"
        );
    }

    #[test]
    fn test_extra_keys_are_dropped() {
        let mut live = secondtbl();
        live.keys.push(Key {
            name: "extrakey".into(),
            unique: false,
            columns: vec![2, 3],
        });
        assert_eq!(
            reconcile(&db(vec![secondtbl()]), &db(vec![live]), &no_filter()).unwrap(),
            vec![SchemaChange::DropKey {
                table: "secondtbl".into(),
                key: "extrakey".into(),
            }]
        );
    }

    #[test]
    fn test_missing_keys_are_fatal() {
        let mut declared = secondtbl();
        declared.keys.push(Key {
            name: "missingkey".into(),
            unique: false,
            columns: vec![2],
        });
        assert_eq!(
            error_of(&db(vec![declared]), &db(vec![secondtbl()])),
            "Missing key missingkey on table secondtbl"
        );
    }

    #[test]
    fn test_unique_flag_mismatch_is_fatal() {
        let mut declared = secondtbl();
        declared.keys[0].unique = true;
        assert_eq!(
            error_of(&db(vec![declared]), &db(vec![secondtbl()])),
            "Mismatching unique flag on table secondtbl key secidx"
        );
    }

    #[test]
    fn test_key_column_list_mismatch_is_fatal() {
        let mut declared = secondtbl();
        declared.keys[0].columns = vec![2, 0];
        assert_eq!(
            error_of(&db(vec![declared]), &db(vec![secondtbl()])),
            "Mismatching columns (sec) on table secondtbl key secidx, should have (sec, pri1)"
        );
    }
}
