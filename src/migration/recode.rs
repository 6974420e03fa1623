use std::collections::HashSet;

use crate::core::{MigrateError, Result, RowId, Value};
use crate::storage::Table;

/// Remaps stored values of one column under a fixed old → new mapping.
///
/// The mapping must be injective and must not chain, so that the swapped
/// mapping is its inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRecode {
    table: String,
    column: String,
    mapping: Vec<(Value, Value)>,
}

impl ColumnRecode {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            mapping: Vec::new(),
        }
    }

    pub fn map(mut self, old: impl Into<Value>, new: impl Into<Value>) -> Self {
        self.mapping.push((old.into(), new.into()));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn mapping(&self) -> &[(Value, Value)] {
        &self.mapping
    }

    pub fn inverse(&self) -> Self {
        Self {
            table: self.table.clone(),
            column: self.column.clone(),
            mapping: self
                .mapping
                .iter()
                .map(|(old, new)| (new.clone(), old.clone()))
                .collect(),
        }
    }

    pub fn target_for(&self, value: &Value) -> Option<&Value> {
        self.mapping
            .iter()
            .find(|(old, _)| old == value)
            .map(|(_, new)| new)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mapping.is_empty() {
            return Err(MigrateError::InvalidStep(format!(
                "recode of '{}.{}' has no mapping",
                self.table, self.column
            )));
        }

        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for (old, new) in &self.mapping {
            if old == new {
                return Err(MigrateError::InvalidStep(format!(
                    "recode of '{}.{}' maps {} onto itself",
                    self.table, self.column, old
                )));
            }
            if !sources.insert(old) {
                return Err(MigrateError::InvalidStep(format!(
                    "recode of '{}.{}' maps {} more than once",
                    self.table, self.column, old
                )));
            }
            if !targets.insert(new) {
                return Err(MigrateError::InvalidStep(format!(
                    "recode of '{}.{}' is not invertible: {} is the target of several values",
                    self.table, self.column, new
                )));
            }
        }
        if let Some(chained) = sources.intersection(&targets).next() {
            return Err(MigrateError::InvalidStep(format!(
                "recode of '{}.{}' chains through {}",
                self.table, self.column, chained
            )));
        }
        Ok(())
    }

    /// Rows whose current value is a source of this mapping, ascending.
    pub fn matching_rows(&self, table: &Table) -> Result<Vec<RowId>> {
        let mut rows = Vec::new();
        for (old, _) in &self.mapping {
            rows.extend(table.rows_matching(&self.column, old)?);
        }
        rows.sort();
        Ok(rows)
    }

    /// Fails unless every target of the mapping is a valid value of the column.
    pub fn check_targets(&self, table: &Table) -> Result<()> {
        let column = table.schema().column(&self.column).ok_or_else(|| {
            MigrateError::ColumnNotFound(self.column.clone(), self.table.clone())
        })?;
        for (_, new) in &self.mapping {
            column.validate(new)?;
        }
        Ok(())
    }

    /// Rewrites `rows`; targets are validated against the column first so a
    /// batch is written entirely or not at all.
    pub(crate) fn apply_to(&self, table: &mut Table, rows: &[RowId]) -> Result<usize> {
        self.check_targets(table)?;

        let mut writes = Vec::with_capacity(rows.len());
        for id in rows {
            let current = table.value(*id, &self.column)?;
            if let Some(new) = current.and_then(|value| self.target_for(value)) {
                writes.push((*id, new.clone()));
            }
        }
        let written = writes.len();
        for (id, value) in writes {
            table.update_value(id, &self.column, value)?;
        }
        Ok(written)
    }
}
