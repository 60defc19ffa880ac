//! In-memory datastore: tables as key-ordered maps.
//!
//! Handles cloned from one store share the same underlying data, which is how
//! multiple sync workers see one database. Snapshots are frozen copies held
//! in a shared registry keyed by opaque token, so the snapshot handshake
//! behaves like the real thing: a handle that exports or imports a token
//! reads that frozen view while the live data keeps moving.

use crate::schema::{Database, Table};
use crate::store::{Datastore, RowVisitor, WritableDatastore};
use crate::value::{KeyTuple, Row};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct Contents {
    database: Database,
    rows: HashMap<String, BTreeMap<KeyTuple, Row>>,
}

impl Contents {
    fn new(database: Database) -> Self {
        let rows = database
            .tables
            .iter()
            .map(|t| (t.name.clone(), BTreeMap::new()))
            .collect();
        Self { database, rows }
    }
}

#[derive(Debug)]
struct Shared {
    live: Contents,
    snapshots: HashMap<String, Arc<Contents>>,
    next_snapshot: u64,
    undo: Option<Contents>,
}

/// One handle onto a shared in-memory database.
#[derive(Debug)]
pub struct MemoryStore {
    shared: Arc<RwLock<Shared>>,
    /// Frozen read view adopted via the snapshot contract; live when absent.
    view: Option<Arc<Contents>>,
}

impl MemoryStore {
    pub fn new(database: Database) -> Self {
        Self {
            shared: Arc::new(RwLock::new(Shared {
                live: Contents::new(database),
                snapshots: HashMap::new(),
                next_snapshot: 1,
                undo: None,
            })),
            view: None,
        }
    }

    /// Another handle onto the same data, reading live until it adopts a view.
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            view: None,
        }
    }

    /// Insert a row directly (test fixtures and file loading).
    pub fn insert(&self, table_name: &str, row: Row) {
        let mut shared = self.shared.write().unwrap();
        let table = shared
            .live
            .database
            .table_by_name(table_name)
            .unwrap_or_else(|| panic!("no such table {}", table_name))
            .clone();
        let key = table.key_of(&row);
        shared
            .live
            .rows
            .get_mut(table_name)
            .expect("row map exists for every table")
            .insert(key, row);
    }

    /// All rows of a table in key order (test oracle and file saving).
    pub fn rows(&self, table_name: &str) -> Vec<Row> {
        let shared = self.shared.read().unwrap();
        let contents = match &self.view {
            Some(view) => view.as_ref(),
            None => &shared.live,
        };
        contents
            .rows
            .get(table_name)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    fn with_contents<T>(&self, f: impl FnOnce(&Contents) -> Result<T>) -> Result<T> {
        match &self.view {
            Some(view) => f(view.as_ref()),
            None => {
                let shared = self.shared.read().unwrap();
                f(&shared.live)
            }
        }
    }
}

impl Datastore for MemoryStore {
    fn schema(&self) -> Result<Database> {
        self.with_contents(|c| Ok(c.database.clone()))
    }

    fn visit_range(
        &self,
        table: &Table,
        after: &KeyTuple,
        last: &KeyTuple,
        visit: &mut RowVisitor<'_>,
    ) -> Result<()> {
        self.with_contents(|c| {
            let map = c
                .rows
                .get(&table.name)
                .with_context(|| format!("no such table {}", table.name))?;
            let lower = if after.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(after.clone())
            };
            let upper = if last.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Included(last.clone())
            };
            for row in map.range((lower, upper)).map(|(_, r)| r) {
                visit(row)?;
            }
            Ok(())
        })
    }

    fn visit_limit(
        &self,
        table: &Table,
        after: &KeyTuple,
        limit: usize,
        visit: &mut RowVisitor<'_>,
    ) -> Result<()> {
        self.with_contents(|c| {
            let map = c
                .rows
                .get(&table.name)
                .with_context(|| format!("no such table {}", table.name))?;
            let lower = if after.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(after.clone())
            };
            for row in map
                .range((lower, Bound::Unbounded))
                .take(limit)
                .map(|(_, r)| r)
            {
                visit(row)?;
            }
            Ok(())
        })
    }

    fn export_snapshot(&mut self) -> Result<String> {
        let mut shared = self.shared.write().unwrap();
        let token = format!("snap-{}", shared.next_snapshot);
        shared.next_snapshot += 1;
        let frozen = Arc::new(shared.live.clone());
        shared.snapshots.insert(token.clone(), Arc::clone(&frozen));
        self.view = Some(frozen);
        Ok(token)
    }

    fn import_snapshot(&mut self, token: &str) -> Result<()> {
        let shared = self.shared.read().unwrap();
        let frozen = shared
            .snapshots
            .get(token)
            .with_context(|| format!("unknown snapshot token {}", token))?;
        self.view = Some(Arc::clone(frozen));
        Ok(())
    }

    fn unhold_snapshot(&mut self) -> Result<()> {
        // Drop the registry entry; handles that already adopted the view keep
        // their reference alive.
        let mut shared = self.shared.write().unwrap();
        shared.snapshots.retain(|_, v| {
            !self
                .view
                .as_ref()
                .map(|held| Arc::ptr_eq(held, v))
                .unwrap_or(false)
        });
        Ok(())
    }

    fn start_read_transaction(&mut self) -> Result<()> {
        let shared = self.shared.read().unwrap();
        self.view = Some(Arc::new(shared.live.clone()));
        Ok(())
    }
}

impl WritableDatastore for MemoryStore {
    // Handles share one transaction: the first begin_write takes the undo
    // image, and whichever handle finishes last settles it. Real engines get
    // per-connection transactions from their own adapter instead.
    fn begin_write(&mut self) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        if shared.undo.is_none() {
            let undo = shared.live.clone();
            shared.undo = Some(undo);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        shared.undo = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        if let Some(undo) = shared.undo.take() {
            shared.live = undo;
        }
        Ok(())
    }

    fn replace_row(&mut self, table: &Table, row: Row) -> Result<()> {
        let key = table.key_of(&row);
        let mut shared = self.shared.write().unwrap();
        shared
            .live
            .rows
            .get_mut(&table.name)
            .with_context(|| format!("no such table {}", table.name))?
            .insert(key, row);
        Ok(())
    }

    fn delete_row(&mut self, table: &Table, key: &KeyTuple) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        shared
            .live
            .rows
            .get_mut(&table.name)
            .with_context(|| format!("no such table {}", table.name))?
            .remove(key);
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        shared.live.database.tables.retain(|t| t.name != name);
        shared.live.rows.remove(name);
        Ok(())
    }

    fn drop_columns(&mut self, table: &str, columns: &[String]) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        let def = shared
            .live
            .database
            .tables
            .iter_mut()
            .find(|t| t.name == table)
            .with_context(|| format!("no such table {}", table))?;

        let dropped: Vec<usize> = def
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| columns.contains(&c.name))
            .map(|(i, _)| i)
            .collect();

        // Remap ordinals in the primary key and remaining keys; the
        // reconciler never drops a column a surviving key still references.
        let remap = |ordinal: usize| -> Result<usize> {
            if dropped.contains(&ordinal) {
                anyhow::bail!("dropped column still referenced by a key on {}", table);
            }
            Ok(ordinal - dropped.iter().filter(|&&d| d < ordinal).count())
        };
        def.primary_key_columns = def
            .primary_key_columns
            .iter()
            .map(|&i| remap(i))
            .collect::<Result<_>>()?;
        for key in &mut def.keys {
            key.columns = key.columns.iter().map(|&i| remap(i)).collect::<Result<_>>()?;
        }
        def.columns = def
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, c)| c.clone())
            .collect();

        let map = shared
            .live
            .rows
            .get_mut(table)
            .with_context(|| format!("no such table {}", table))?;
        for row in map.values_mut() {
            *row = row
                .iter()
                .enumerate()
                .filter(|(i, _)| !dropped.contains(i))
                .map(|(_, v)| v.clone())
                .collect();
        }
        Ok(())
    }

    fn drop_key(&mut self, table: &str, key: &str) -> Result<()> {
        let mut shared = self.shared.write().unwrap();
        let def = shared
            .live
            .database
            .tables
            .iter_mut()
            .find(|t| t.name == table)
            .with_context(|| format!("no such table {}", table))?;
        def.keys.retain(|k| k.name != key);
        Ok(())
    }
}
