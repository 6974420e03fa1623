use crate::core::{DataType, StepId};
use crate::migration::MigrationStep;

use super::m0002;

pub const ID: StepId = StepId(2024_04_21_055956);

pub fn step() -> MigrationStep {
    let wide = m0002::order_status();
    let narrow = wide.clone().with_type(DataType::Varchar(20));
    MigrationStep::new(ID, "limit order status length").alter_column("orders", wide, narrow)
}
