use super::{Table, TableSchema};
use crate::core::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All tables of the target store. Cloning is the scratch-copy mechanism used
/// to stage a schema change before it is committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryStorage {
    tables: BTreeMap<String, Table>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();

        if self.tables.contains_key(&name) {
            return Err(MigrateError::TableExists(name));
        }

        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn drop_table(&mut self, table_name: &str) -> Result<Table> {
        self.tables
            .remove(table_name)
            .ok_or_else(|| MigrateError::TableNotFound(table_name.to_string()))
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MigrateError::TableNotFound(name.to_string()))
    }

    pub fn get_schema(&self, table_name: &str) -> Result<&TableSchema> {
        self.get_table(table_name).map(Table::schema)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn row_count(&self, table_name: &str) -> Result<usize> {
        self.get_table(table_name).map(Table::row_count)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Table::row_count).sum()
    }
}
