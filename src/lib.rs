// ============================================================================
// rowshift: ledger-driven schema and data migrations
// ============================================================================

pub mod config;
pub mod core;
pub mod ledger;
pub mod migration;
pub mod migrations;
pub mod resource;
pub mod storage;

// Re-export main types for convenience
pub use config::MigratorConfig;
pub use crate::core::{
    Column, DataType, Direction, MigrateError, Result, RowId, Stage, StepId, Value,
};
pub use ledger::{InFlight, Ledger, LedgerEntry};
pub use migration::{
    ColumnRecode, MigrationLock, MigrationPlan, MigrationReport, MigrationStep, Migrator,
    Resolution, SchemaChange, StepExecutor, StepState, StepStatus,
};
pub use resource::{ResourceDefinition, product_resource, slugify};
pub use storage::{
    FileStateStore, InMemoryStorage, MemoryStateStore, PersistedState, StateStore, Table,
    TableSchema,
};
