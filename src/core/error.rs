use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{RowId, StepId};

/// Which half of a step was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Schema,
    DataTransform,
    Ledger,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::DataTransform => write!(f, "data-transform"),
            Self::Ledger => write!(f, "ledger"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Forward,
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Step {step} is already recorded as applied")]
    DuplicateApplication { step: StepId },

    #[error("Cannot revert step {step}: ledger tail is {}", display_tail(.tail))]
    OutOfOrderRevert { step: StepId, tail: Option<StepId> },

    #[error("Cannot apply step {step} after {}: steps must be applied in ascending order", display_tail(.tail))]
    OutOfOrderApply { step: StepId, tail: Option<StepId> },

    #[error(
        "Step {step} was left partially applied ({direction}, stage {stage}, {rows_done} rows done): {reason}; operator intervention required"
    )]
    PartialMigration {
        step: StepId,
        direction: Direction,
        stage: Stage,
        rows_done: usize,
        reason: String,
    },

    #[error("Step {step} would narrow '{table}.{column}' but rows {} violate the new definition", display_rows(.rows))]
    NarrowingViolation {
        step: StepId,
        table: String,
        column: String,
        rows: Vec<RowId>,
    },

    #[error("Timed out after {waited:?} waiting for the migration lock on '{}'", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Step {step} failed at stage {stage}: {source}")]
    StepFailed {
        step: StepId,
        stage: Stage,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("Unknown migration step {0}")]
    UnknownStep(StepId),

    #[error("Ledger is corrupted: {0}")]
    LedgerCorrupted(String),

    #[error("Invalid migration step: {0}")]
    InvalidStep(String),

    #[error("Schema drift on '{table}.{column}': {detail}")]
    SchemaDrift {
        table: String,
        column: String,
        detail: String,
    },

    #[error("Resource '{resource}' field '{field}' is incompatible: {reason}")]
    ResourceIncompatible {
        resource: String,
        field: String,
        reason: String,
    },

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Column '{0}' already exists in table '{1}'")]
    ColumnExists(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

fn display_tail(tail: &Option<StepId>) -> String {
    match tail {
        Some(step) => step.to_string(),
        None => "empty".to_string(),
    }
}

fn display_rows(rows: &[RowId]) -> String {
    let ids: Vec<String> = rows.iter().map(|id| id.to_string()).collect();
    format!("[{}]", ids.join(", "))
}

impl MigrateError {
    /// Stable name of the error kind, printed in CLI diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateApplication { .. } => "DuplicateApplicationError",
            Self::OutOfOrderRevert { .. } => "OutOfOrderRevertError",
            Self::OutOfOrderApply { .. } => "OutOfOrderApplyError",
            Self::PartialMigration { .. } => "PartialMigrationError",
            Self::NarrowingViolation { .. } => "NarrowingViolationError",
            Self::LockTimeout { .. } => "LockTimeoutError",
            Self::StepFailed { source, .. } => source.kind(),
            Self::UnknownStep(_) => "UnknownStep",
            Self::LedgerCorrupted(_) => "LedgerCorrupted",
            Self::InvalidStep(_) => "InvalidStep",
            Self::SchemaDrift { .. } => "SchemaDrift",
            Self::ResourceIncompatible { .. } => "ResourceIncompatible",
            Self::TableExists(_) => "TableExists",
            Self::TableNotFound(_) => "TableNotFound",
            Self::ColumnNotFound(..) => "ColumnNotFound",
            Self::ColumnExists(..) => "ColumnExists",
            Self::TypeMismatch(_) => "TypeMismatch",
            Self::ConstraintViolation(_) => "ConstraintViolation",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
            Self::Serialization(_) => "Serialization",
        }
    }

    /// Step the error is attributed to, if any.
    pub fn step(&self) -> Option<StepId> {
        match self {
            Self::DuplicateApplication { step }
            | Self::OutOfOrderRevert { step, .. }
            | Self::OutOfOrderApply { step, .. }
            | Self::PartialMigration { step, .. }
            | Self::NarrowingViolation { step, .. }
            | Self::StepFailed { step, .. } => Some(*step),
            Self::UnknownStep(step) => Some(*step),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::PartialMigration { stage, .. } | Self::StepFailed { stage, .. } => Some(*stage),
            Self::NarrowingViolation { .. } => Some(Stage::Schema),
            Self::DuplicateApplication { .. }
            | Self::OutOfOrderRevert { .. }
            | Self::OutOfOrderApply { .. } => Some(Stage::Ledger),
            _ => None,
        }
    }

    /// Unwraps `StepFailed` wrappers down to the error that caused them.
    pub fn root(&self) -> &MigrateError {
        match self {
            Self::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn at_stage(self, step: StepId, stage: Stage) -> Self {
        match self {
            // Already attributed to this step.
            err @ (Self::NarrowingViolation { .. }
            | Self::PartialMigration { .. }
            | Self::StepFailed { .. }) => err,
            other => Self::StepFailed {
                step,
                stage,
                source: Box::new(other),
            },
        }
    }
}

impl From<std::io::Error> for MigrateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
