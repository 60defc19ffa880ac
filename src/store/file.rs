//! JSON-file persistence for the in-memory store.
//!
//! Format: `{"tables": [{<table definition>, "rows": [[...], ...]}]}` - the
//! table definition fields inline with a `rows` array per table. This is the
//! CLI's database format; real engines plug in behind the store traits
//! instead.

use crate::schema::{Database, Table};
use crate::store::{Datastore, MemoryStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct FileTable {
    #[serde(flatten)]
    table: Table,
    #[serde(default)]
    rows: Vec<crate::value::Row>,
}

#[derive(Serialize, Deserialize)]
struct FileDatabase {
    tables: Vec<FileTable>,
}

pub struct FileStore;

impl FileStore {
    pub fn load(path: &Path) -> Result<MemoryStore> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read database file {}", path.display()))?;
        let file: FileDatabase = serde_json::from_slice(&data)
            .with_context(|| format!("Invalid database file {}", path.display()))?;

        let database = Database {
            tables: file.tables.iter().map(|t| t.table.clone()).collect(),
        };
        let store = MemoryStore::new(database);
        for table in file.tables {
            for row in table.rows {
                store.insert(&table.table.name, row);
            }
        }
        Ok(store)
    }

    pub fn save(store: &MemoryStore, path: &Path) -> Result<()> {
        let database = store.schema()?;
        let file = FileDatabase {
            tables: database
                .tables
                .into_iter()
                .map(|table| {
                    let rows = store.rows(&table.name);
                    FileTable { table, rows }
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write database file {}", path.display()))?;
        Ok(())
    }
}
