use crate::core::{Column, DataType, StepId};
use crate::migration::{ColumnRecode, MigrationStep};

use super::m0001;

pub const ID: StepId = StepId(2024_04_21_055733);

pub fn order_status() -> Column {
    m0001::order_status().with_type(DataType::Varchar(255))
}

/// Frees `orders.status` from the enum and folds `declined` into `delivered`.
pub fn step() -> MigrationStep {
    MigrationStep::new(ID, "change order status to varchar")
        .alter_column("orders", m0001::order_status(), order_status())
        .with_recode(ColumnRecode::new("orders", "status").map("declined", "delivered"))
}
