//! Table definition model.
//!
//! Read once per session from the live catalog (source side) or from the
//! peer's SCHEMA payload (destination side), then immutable. Column order is
//! declaration order and governs row value layout; primary key column order
//! is independent and governs key tuples, cursors, and range bounds.

pub mod reconcile;

use crate::value::{KeyTuple, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Engine-neutral type name, e.g. "INT", "VARCHAR(11)".
    pub column_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable,
        }
    }

    /// Type token with any parenthesized length/scale suffix stripped;
    /// "VARCHAR(11)" and "VARCHAR" compare equal.
    pub fn base_type(&self) -> &str {
        match self.column_type.find('(') {
            Some(pos) => self.column_type[..pos].trim_end(),
            None => &self.column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    pub unique: bool,
    /// Ordinals into the owning table's column list, in key order.
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Ordinals into `columns`, in key order (not necessarily declaration order).
    pub primary_key_columns: Vec<usize>,
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl Table {
    /// Project a row onto its key tuple: primary key values in key order.
    pub fn key_of(&self, row: &Row) -> KeyTuple {
        KeyTuple(
            self.primary_key_columns
                .iter()
                .map(|&i| row[i].clone())
                .collect(),
        )
    }

    pub fn column_names(&self, ordinals: &[usize]) -> Vec<&str> {
        ordinals
            .iter()
            .map(|&i| self.columns[i].name.as_str())
            .collect()
    }

    pub fn primary_key_names(&self) -> Vec<&str> {
        self.column_names(&self.primary_key_columns)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub tables: Vec<Table>,
}

impl Database {
    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Format a column name list for diagnostics: "(a, b)", or "(NULL)" if empty.
pub fn column_names_list(names: &[&str]) -> String {
    if names.is_empty() {
        return "(NULL)".to_string();
    }
    format!("({})", names.join(", "))
}
