use std::collections::HashSet;

use crate::core::{MigrateError, Result, StepId};
use crate::ledger::Ledger;

use super::MigrationStep;

/// The ordered set of known steps.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Creates a new empty migration plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registered steps in ascending id order.
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Adds a migration step to the plan, validating it immediately.
    pub fn add_step(&mut self, step: MigrationStep) -> Result<()> {
        step.validate()?;
        if self.get(step.id()).is_some() {
            return Err(MigrateError::InvalidStep(format!(
                "duplicate migration step {}",
                step.id()
            )));
        }
        self.steps.push(step);
        self.steps.sort_by_key(MigrationStep::id);
        Ok(())
    }

    /// Fluent builder method to add a step.
    pub fn with_step(mut self, step: MigrationStep) -> Result<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    pub fn get(&self, id: StepId) -> Option<&MigrationStep> {
        self.steps.iter().find(|step| step.id() == id)
    }

    pub fn latest(&self) -> Option<StepId> {
        self.steps.last().map(MigrationStep::id)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Validates the integrity of the plan: every step valid, ids unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            step.validate()?;
            if !seen.insert(step.id()) {
                return Err(MigrateError::InvalidStep(format!(
                    "duplicate migration step {}",
                    step.id()
                )));
            }
        }
        Ok(())
    }

    /// Steps `migrate up` would apply, in ascending order.
    ///
    /// A pending step below the ledger tail is a gap: applying it would put
    /// the ledger out of order, so it is reported instead of skipped.
    pub fn pending_up(&self, ledger: &Ledger, target: Option<StepId>) -> Result<Vec<&MigrationStep>> {
        let target = match target {
            Some(id) => {
                self.get(id).ok_or(MigrateError::UnknownStep(id))?;
                id
            }
            None => match self.latest() {
                Some(id) => id,
                None => return Ok(Vec::new()),
            },
        };

        let pending: Vec<&MigrationStep> = self
            .steps
            .iter()
            .filter(|step| step.id() <= target && !ledger.contains(step.id()))
            .collect();

        if let (Some(first), Some(tail)) = (pending.first(), ledger.tail())
            && first.id() < tail
        {
            return Err(MigrateError::OutOfOrderApply {
                step: first.id(),
                tail: Some(tail),
            });
        }

        Ok(pending)
    }

    /// Steps `migrate down` would revert, in descending order.
    pub fn pending_down(&self, ledger: &Ledger, target: StepId) -> Result<Vec<&MigrationStep>> {
        if target != StepId::ZERO && self.get(target).is_none() {
            return Err(MigrateError::UnknownStep(target));
        }

        ledger
            .list_applied()
            .into_iter()
            .rev()
            .filter(|id| *id > target)
            .map(|id| self.get(id).ok_or(MigrateError::UnknownStep(id)))
            .collect()
    }
}
