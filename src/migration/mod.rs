pub mod executor;
pub mod lock;
pub mod plan;
pub mod recode;
pub mod runner;
pub mod step;

pub use executor::StepExecutor;
pub use lock::{LockGuard, MigrationLock};
pub use plan::MigrationPlan;
pub use recode::ColumnRecode;
pub use runner::{MigrationReport, Migrator, Resolution, StepState, StepStatus};
pub use step::{MigrationStep, SchemaChange};
