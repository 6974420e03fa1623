pub mod error;
pub mod types;
pub mod value;

pub use error::{Direction, MigrateError, Result, Stage};
pub use types::{Column, Row, RowId, Schema, StepId};
pub use value::{DataType, Value};
