use std::fmt;

use crate::core::{Column, MigrateError, Result, StepId};
use crate::storage::{InMemoryStorage, TableSchema};

use super::ColumnRecode;

/// One reversible schema mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    CreateTable(TableSchema),
    /// Refuses to drop a table that still holds rows.
    DropTable(TableSchema),
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: Column },
    AlterColumn {
        table: String,
        from: Column,
        to: Column,
    },
}

impl SchemaChange {
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable(schema) | Self::DropTable(schema) => schema.name(),
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. } => table,
        }
    }

    pub fn inverse(&self) -> SchemaChange {
        match self {
            Self::CreateTable(schema) => Self::DropTable(schema.clone()),
            Self::DropTable(schema) => Self::CreateTable(schema.clone()),
            Self::AddColumn { table, column } => Self::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Self::DropColumn { table, column } => Self::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Self::AlterColumn { table, from, to } => Self::AlterColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
        }
    }

    pub(crate) fn apply(&self, step: StepId, storage: &mut InMemoryStorage) -> Result<()> {
        match self {
            Self::CreateTable(schema) => storage.create_table(schema.clone()),
            Self::DropTable(schema) => {
                let table = storage.get_table(schema.name())?;
                if table.schema() != schema {
                    return Err(MigrateError::SchemaDrift {
                        table: schema.name().to_string(),
                        column: "*".to_string(),
                        detail: "table definition differs from the one being dropped".to_string(),
                    });
                }
                if !table.is_empty() {
                    return Err(MigrateError::NarrowingViolation {
                        step,
                        table: schema.name().to_string(),
                        column: "*".to_string(),
                        rows: table.row_ids(),
                    });
                }
                storage.drop_table(schema.name()).map(|_| ())
            }
            Self::AddColumn { table, column } => storage.get_table_mut(table)?.add_column(column.clone()),
            Self::DropColumn { table, column } => {
                expect_column(storage, table, column)?;
                storage.get_table_mut(table)?.drop_column(&column.name).map(|_| ())
            }
            Self::AlterColumn { table, from, to } => {
                expect_column(storage, table, from)?;
                let target = storage.get_table_mut(table)?;
                let offending = target.violations(&from.name, to)?;
                if !offending.is_empty() {
                    return Err(MigrateError::NarrowingViolation {
                        step,
                        table: table.clone(),
                        column: from.name.clone(),
                        rows: offending,
                    });
                }
                target.alter_column(&from.name, to.clone())
            }
        }
    }
}

fn expect_column(storage: &InMemoryStorage, table: &str, expected: &Column) -> Result<()> {
    let current = storage
        .get_schema(table)?
        .column(&expected.name)
        .ok_or_else(|| MigrateError::ColumnNotFound(expected.name.clone(), table.to_string()))?;
    if current != expected {
        return Err(MigrateError::SchemaDrift {
            table: table.to_string(),
            column: expected.name.clone(),
            detail: format!("expected `{}`, found `{}`", expected, current),
        });
    }
    Ok(())
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(schema) => write!(f, "create table {}", schema.name()),
            Self::DropTable(schema) => write!(f, "drop table {}", schema.name()),
            Self::AddColumn { table, column } => write!(f, "add column {}.{}", table, column),
            Self::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column.name)
            }
            Self::AlterColumn { table, from, to } => {
                write!(f, "alter column {}.{} from {} to {}", table, from.name, from.data_type, to)
            }
        }
    }
}

/// A forward and backward schema/data change unit.
///
/// The backward action is derived: inverse schema changes in reverse order,
/// preceded by the inverse recode.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    id: StepId,
    description: String,
    changes: Vec<SchemaChange>,
    recode: Option<ColumnRecode>,
}

impl MigrationStep {
    pub fn new(id: StepId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            changes: Vec::new(),
            recode: None,
        }
    }

    pub fn with_change(mut self, change: SchemaChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn create_table(self, schema: TableSchema) -> Self {
        self.with_change(SchemaChange::CreateTable(schema))
    }

    pub fn drop_table(self, schema: TableSchema) -> Self {
        self.with_change(SchemaChange::DropTable(schema))
    }

    pub fn add_column(self, table: impl Into<String>, column: Column) -> Self {
        self.with_change(SchemaChange::AddColumn {
            table: table.into(),
            column,
        })
    }

    pub fn alter_column(self, table: impl Into<String>, from: Column, to: Column) -> Self {
        self.with_change(SchemaChange::AlterColumn {
            table: table.into(),
            from,
            to,
        })
    }

    pub fn with_recode(mut self, recode: ColumnRecode) -> Self {
        self.recode = Some(recode);
        self
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn changes(&self) -> &[SchemaChange] {
        &self.changes
    }

    pub fn recode(&self) -> Option<&ColumnRecode> {
        self.recode.as_ref()
    }

    pub fn inverse_changes(&self) -> Vec<SchemaChange> {
        self.changes.iter().rev().map(SchemaChange::inverse).collect()
    }

    /// Tables whose definition this step changes.
    pub fn touched_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self.changes.iter().map(SchemaChange::table).collect();
        tables.dedup();
        tables
    }

    pub fn validate(&self) -> Result<()> {
        if self.id == StepId::ZERO {
            return Err(MigrateError::InvalidStep(
                "step id 0 is reserved for the empty ledger".to_string(),
            ));
        }
        if self.changes.is_empty() && self.recode.is_none() {
            return Err(MigrateError::InvalidStep(format!(
                "step {} has neither schema changes nor a recode",
                self.id
            )));
        }
        for change in &self.changes {
            match change {
                SchemaChange::DropColumn { table, column } => {
                    return Err(MigrateError::InvalidStep(format!(
                        "step {} drops {}.{}, which cannot be reversed without losing data",
                        self.id, table, column.name
                    )));
                }
                SchemaChange::AddColumn { column, .. } if !column.nullable && column.default.is_none() => {
                    return Err(MigrateError::InvalidStep(format!(
                        "step {} adds NOT NULL column {} without a default",
                        self.id, column.name
                    )));
                }
                SchemaChange::AlterColumn { table, from, to } => {
                    if from.name != to.name {
                        return Err(MigrateError::InvalidStep(format!(
                            "step {} renames {}.{}; renames are not supported",
                            self.id, table, from.name
                        )));
                    }
                    if !from.data_type.can_cast_to(&to.data_type)
                        || !to.data_type.can_cast_to(&from.data_type)
                    {
                        return Err(MigrateError::InvalidStep(format!(
                            "step {} changes {}.{} from {} to {}, which cannot be cast both ways",
                            self.id, table, from.name, from.data_type, to.data_type
                        )));
                    }
                }
                _ => {}
            }
        }
        if let Some(recode) = &self.recode {
            recode.validate()?;
        }
        Ok(())
    }
}
