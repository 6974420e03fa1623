use crate::core::{Column, MigrateError, Result, Row, RowId, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowId, Row>,
    next_row_id: u64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn insert(&mut self, row: Row) -> Result<RowId> {
        self.validate_row(&row)?;

        let id = RowId(self.next_row_id);
        self.next_row_id += 1;
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Inserts a row given by column name; omitted columns take their default.
    pub fn insert_named<'a, I>(&mut self, values: I) -> Result<RowId>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let columns = self.schema.schema().columns();
        let mut row: Row = columns.iter().map(Column::fill_value).collect();
        for (name, value) in values {
            let idx = self.column_index(name)?;
            row[idx] = value;
        }
        self.insert(row)
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn value(&self, id: RowId, column: &str) -> Result<Option<&Value>> {
        let idx = self.column_index(column)?;
        Ok(self.rows.get(&id).map(|row| &row[idx]))
    }

    pub fn scan(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    /// Row ids whose `column` currently equals `value`, in ascending order.
    pub fn rows_matching(&self, column: &str, value: &Value) -> Result<Vec<RowId>> {
        let idx = self.column_index(column)?;
        Ok(self
            .rows
            .iter()
            .filter(|(_, row)| &row[idx] == value)
            .map(|(id, _)| *id)
            .collect())
    }

    pub fn update_value(&mut self, id: RowId, column: &str, value: Value) -> Result<()> {
        let idx = self.column_index(column)?;
        self.schema.schema().columns()[idx].validate(&value)?;
        let row = self.rows.get_mut(&id).ok_or_else(|| {
            MigrateError::ConstraintViolation(format!(
                "Row {} not found in table '{}'",
                id,
                self.schema.name()
            ))
        })?;
        row[idx] = value;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.keys().copied().collect()
    }

    /// Rows whose current `column` value cannot be stored under `target`.
    pub fn violations(&self, column: &str, target: &Column) -> Result<Vec<RowId>> {
        let idx = self.column_index(column)?;
        let mut offending = Vec::new();
        for (id, row) in &self.rows {
            let fits = target
                .data_type
                .cast(&row[idx])
                .and_then(|cast| target.validate(&cast))
                .is_ok();
            if !fits {
                offending.push(*id);
            }
        }
        Ok(offending)
    }

    /// Replaces the definition of `column`, casting every stored value.
    /// Nothing changes if any row would not fit the new definition.
    pub fn alter_column(&mut self, column: &str, target: Column) -> Result<()> {
        let idx = self.column_index(column)?;
        if target.name != column && self.schema.schema().get_column(&target.name).is_some() {
            return Err(MigrateError::ColumnExists(
                target.name.clone(),
                self.schema.name().to_string(),
            ));
        }

        let mut cast_values = Vec::with_capacity(self.rows.len());
        for (id, row) in &self.rows {
            let cast = target.data_type.cast(&row[idx])?;
            target.validate(&cast).map_err(|e| {
                MigrateError::ConstraintViolation(format!("row {}: {}", id, e))
            })?;
            cast_values.push(cast);
        }

        for (row, value) in self.rows.values_mut().zip(cast_values) {
            row[idx] = value;
        }
        self.schema.schema_mut().replace_column(idx, target);
        Ok(())
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.schema.schema().get_column(&column.name).is_some() {
            return Err(MigrateError::ColumnExists(
                column.name.clone(),
                self.schema.name().to_string(),
            ));
        }
        let fill = column.fill_value();
        if !self.rows.is_empty() {
            column.validate(&fill)?;
        }

        for row in self.rows.values_mut() {
            row.push(fill.clone());
        }
        self.schema.schema_mut().push_column(column);
        Ok(())
    }

    pub fn drop_column(&mut self, column: &str) -> Result<Column> {
        let idx = self.column_index(column)?;
        for row in self.rows.values_mut() {
            row.remove(idx);
        }
        Ok(self.schema.schema_mut().remove_column(idx))
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.schema.schema().find_column_index(column).ok_or_else(|| {
            MigrateError::ColumnNotFound(column.to_string(), self.schema.name().to_string())
        })
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(MigrateError::ConstraintViolation(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema.get_column(name)
    }

    fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }
}
