//! Durable record of applied migration steps.
//!
//! The ledger is the only mutable state a migration run owns: the ordered
//! list of applied steps, the rows each recode touched, and the marker of a
//! step caught between two checkpoints. It is persisted in the same document
//! as the tables, so a ledger write and the schema change it accompanies land
//! in one atomic save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Direction, MigrateError, Result, RowId, Stage, StepId};

/// One applied step: `(step_id, applied_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step_id: StepId,
    pub applied_at: DateTime<Utc>,
}

/// Rows changed by the forward recode of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecodeJournal {
    pub step_id: StepId,
    pub rows: Vec<RowId>,
}

/// A step that has persisted part of its work but not its final checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub step_id: StepId,
    pub direction: Direction,
    pub stage: Stage,
    pub rows_done: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    journal: Vec<RecodeJournal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    in_flight: Option<InFlight>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_applied(&mut self, step_id: StepId) -> Result<&LedgerEntry> {
        self.record_applied_at(step_id, Utc::now())
    }

    pub fn record_applied_at(
        &mut self,
        step_id: StepId,
        applied_at: DateTime<Utc>,
    ) -> Result<&LedgerEntry> {
        self.check_can_apply(step_id)?;
        self.entries.push(LedgerEntry {
            step_id,
            applied_at,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Removes `step_id`, which must be the most recently applied step.
    pub fn record_reverted(&mut self, step_id: StepId) -> Result<LedgerEntry> {
        self.check_can_revert(step_id)?;
        self.journal.retain(|j| j.step_id != step_id);
        self.entries.pop().ok_or(MigrateError::OutOfOrderRevert {
            step: step_id,
            tail: None,
        })
    }

    pub fn check_can_apply(&self, step_id: StepId) -> Result<()> {
        if self.contains(step_id) {
            return Err(MigrateError::DuplicateApplication { step: step_id });
        }
        match self.tail() {
            Some(tail) if tail > step_id => Err(MigrateError::OutOfOrderApply {
                step: step_id,
                tail: Some(tail),
            }),
            _ => Ok(()),
        }
    }

    pub fn check_can_revert(&self, step_id: StepId) -> Result<()> {
        match self.tail() {
            Some(tail) if tail == step_id => Ok(()),
            tail => Err(MigrateError::OutOfOrderRevert {
                step: step_id,
                tail,
            }),
        }
    }

    pub fn list_applied(&self) -> Vec<StepId> {
        self.entries.iter().map(|e| e.step_id).collect()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn tail(&self) -> Option<StepId> {
        self.entries.last().map(|e| e.step_id)
    }

    pub fn contains(&self, step_id: StepId) -> bool {
        self.entries.iter().any(|e| e.step_id == step_id)
    }

    pub fn applied_at(&self, step_id: StepId) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|e| e.step_id == step_id)
            .map(|e| e.applied_at)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_recoded(&mut self, step_id: StepId, rows: &[RowId]) {
        match self.journal.iter_mut().find(|j| j.step_id == step_id) {
            Some(journal) => journal.rows.extend_from_slice(rows),
            None => self.journal.push(RecodeJournal {
                step_id,
                rows: rows.to_vec(),
            }),
        }
    }

    pub fn recoded_rows(&self, step_id: StepId) -> Option<&[RowId]> {
        self.journal
            .iter()
            .find(|j| j.step_id == step_id)
            .map(|j| j.rows.as_slice())
    }

    pub(crate) fn forget_recoded(&mut self, step_id: StepId, rows: &[RowId]) {
        if let Some(journal) = self.journal.iter_mut().find(|j| j.step_id == step_id) {
            journal.rows.retain(|id| !rows.contains(id));
        }
    }

    pub(crate) fn discard_journal(&mut self, step_id: StepId) {
        self.journal.retain(|j| j.step_id != step_id);
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    pub(crate) fn begin(&mut self, step_id: StepId, direction: Direction, stage: Stage) {
        self.in_flight = Some(InFlight {
            step_id,
            direction,
            stage,
            rows_done: 0,
            started_at: Utc::now(),
        });
    }

    pub(crate) fn advance(&mut self, rows: usize) {
        if let Some(marker) = self.in_flight.as_mut() {
            marker.rows_done += rows;
        }
    }

    pub(crate) fn finish(&mut self) -> Option<InFlight> {
        self.in_flight.take()
    }

    /// Ledger ids must be strictly ascending.
    pub fn verify_order(&self) -> Result<()> {
        for pair in self.entries.windows(2) {
            if pair[0].step_id >= pair[1].step_id {
                return Err(MigrateError::LedgerCorrupted(format!(
                    "step {} is recorded after step {}",
                    pair[1].step_id, pair[0].step_id
                )));
            }
        }
        Ok(())
    }
}
