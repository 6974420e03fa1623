use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{DataType, MigrateError, Result, Value};

pub type Row = Vec<Value>;

/// Ordered migration step identifier.
///
/// Timestamp-style ids are accepted with separators, so
/// `2024_04_21_055733` and `20240421055733` name the same step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u64);

impl StepId {
    /// The position before any step has been applied.
    pub const ZERO: StepId = StepId(0);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StepId {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.chars().filter(|c| *c != '_' && *c != '-').collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(MigrateError::InvalidStep(format!(
                "'{}' is not a step identifier",
                s
            )));
        }
        digits
            .parse::<u64>()
            .map(StepId)
            .map_err(|e| MigrateError::InvalidStep(format!("'{}': {}", s, e)))
    }
}

/// Stable identifier of a row inside its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(MigrateError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(MigrateError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name, self.data_type, value
            )));
        }

        Ok(())
    }

    /// Value written into rows that do not provide this column.
    pub fn fill_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {}", default)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn push_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub(crate) fn replace_column(&mut self, idx: usize, column: Column) {
        self.columns[idx] = column;
    }

    pub(crate) fn remove_column(&mut self, idx: usize) -> Column {
        self.columns.remove(idx)
    }
}
