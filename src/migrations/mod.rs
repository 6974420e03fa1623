//! Migrations shipped with the shop schema.
//!
//! | Step | Change |
//! |------|--------|
//! | [`m0001`] `2024_04_21_000000` | creates `products` and `orders` |
//! | [`m0002`] `2024_04_21_055733` | `orders.status` enum → `VARCHAR(255)`, `declined` recoded to `delivered` |
//! | [`m0003`] `2024_04_21_055956` | `orders.status` narrowed to `VARCHAR(20)` |

pub mod m0001;
pub mod m0002;
pub mod m0003;

use crate::core::Result;
use crate::migration::MigrationPlan;

/// Every shipped step, in order.
pub fn builtin_plan() -> Result<MigrationPlan> {
    MigrationPlan::new()
        .with_step(m0001::step())?
        .with_step(m0002::step())?
        .with_step(m0003::step())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepId;

    #[test]
    fn test_builtin_plan_order() {
        let plan = builtin_plan().unwrap();
        let ids: Vec<StepId> = plan.steps().iter().map(|s| s.id()).collect();
        assert_eq!(
            ids,
            vec![m0001::ID, m0002::ID, m0003::ID]
        );
        assert_eq!(m0002::ID, "2024_04_21_055733".parse::<StepId>().unwrap());
    }
}
