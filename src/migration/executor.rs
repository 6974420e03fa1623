//! Applies and reverts single steps against a persisted state.
//!
//! Schema changes are rehearsed on a copy of the tables first, so a step
//! that fails its checks leaves nothing behind. Steps with a recode then
//! move through several checkpoints; between the first and the last one the
//! ledger carries an in-flight marker, and any failure in that window is a
//! partial migration for the operator to resolve.

use tracing::{debug, error, info, warn};

use crate::core::{Direction, MigrateError, Result, RowId, Stage, StepId};
use crate::resource::ResourceDefinition;
use crate::storage::{InMemoryStorage, PersistedState, StateStore};

use super::{ColumnRecode, MigrationStep, Resolution, SchemaChange};

pub struct StepExecutor<'a> {
    store: &'a dyn StateStore,
    batch_size: usize,
    resources: &'a [ResourceDefinition],
}

impl<'a> StepExecutor<'a> {
    pub fn new(store: &'a dyn StateStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            resources: &[],
        }
    }

    /// Resources whose tables must stay compatible after every step.
    pub fn with_resources(mut self, resources: &'a [ResourceDefinition]) -> Self {
        self.resources = resources;
        self
    }

    pub async fn apply_forward(&self, state: &mut PersistedState, step: &MigrationStep) -> Result<()> {
        let id = step.id();
        state.ledger.check_can_apply(id)?;

        let mut scratch = state.tables.clone();
        self.rehearse_schema(id, step.changes(), &mut scratch)?;

        let Some(recode) = step.recode() else {
            state.tables = scratch;
            state.ledger.record_applied(id)?;
            self.checkpoint(state)
                .await
                .map_err(|e| e.at_stage(id, Stage::Ledger))?;
            info!(step = %id, description = step.description(), "Applied migration step");
            return Ok(());
        };

        let rows = {
            let table = scratch
                .get_table(recode.table())
                .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
            recode
                .check_targets(table)
                .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
            recode
                .matching_rows(table)
                .map_err(|e| e.at_stage(id, Stage::DataTransform))?
        };

        state.tables = scratch;
        state.ledger.begin(id, Direction::Forward, Stage::DataTransform);
        state.ledger.record_recoded(id, &[]);
        self.checkpoint(state)
            .await
            .map_err(|e| e.at_stage(id, Stage::Schema))?;
        debug!(step = %id, rows = rows.len(), "Schema persisted, recoding rows");

        let mut rows_done = 0;
        if let Err(err) = self
            .recode_batches(state, id, recode, &rows, Direction::Forward, &mut rows_done)
            .await
        {
            return Err(partial(id, Direction::Forward, Stage::DataTransform, rows_done, err));
        }

        state.ledger.finish();
        if let Err(err) = state.ledger.record_applied(id) {
            return Err(partial(id, Direction::Forward, Stage::Ledger, rows_done, err));
        }
        if let Err(err) = self.checkpoint(state).await {
            return Err(partial(id, Direction::Forward, Stage::Ledger, rows_done, err));
        }

        info!(
            step = %id,
            description = step.description(),
            recoded = rows_done,
            "Applied migration step"
        );
        Ok(())
    }

    pub async fn apply_backward(&self, state: &mut PersistedState, step: &MigrationStep) -> Result<()> {
        let id = step.id();
        state.ledger.check_can_revert(id)?;

        let inverse_changes = step.inverse_changes();
        let revert = match step.recode() {
            Some(recode) => {
                let inverse = recode.inverse();
                let rows = rows_to_revert(state, id, &inverse)
                    .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
                Some((inverse, rows))
            }
            None => None,
        };

        let mut scratch = state.tables.clone();
        if let Some((inverse, rows)) = &revert {
            scratch
                .get_table_mut(inverse.table())
                .and_then(|table| inverse.apply_to(table, rows))
                .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
        }
        self.rehearse_schema(id, &inverse_changes, &mut scratch)?;

        let Some((inverse, rows)) = revert else {
            state.tables = scratch;
            state.ledger.record_reverted(id)?;
            self.checkpoint(state)
                .await
                .map_err(|e| e.at_stage(id, Stage::Ledger))?;
            info!(step = %id, description = step.description(), "Reverted migration step");
            return Ok(());
        };

        state.ledger.begin(id, Direction::Backward, Stage::DataTransform);
        self.checkpoint(state)
            .await
            .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
        debug!(step = %id, rows = rows.len(), "Reverting recoded rows");

        let mut rows_done = 0;
        if let Err(err) = self
            .recode_batches(state, id, &inverse, &rows, Direction::Backward, &mut rows_done)
            .await
        {
            return Err(partial(id, Direction::Backward, Stage::DataTransform, rows_done, err));
        }

        for change in &inverse_changes {
            if let Err(err) = change.apply(id, &mut state.tables) {
                return Err(partial(id, Direction::Backward, Stage::Schema, rows_done, err));
            }
        }
        state.ledger.finish();
        if let Err(err) = state.ledger.record_reverted(id) {
            return Err(partial(id, Direction::Backward, Stage::Ledger, rows_done, err));
        }
        if let Err(err) = self.checkpoint(state).await {
            return Err(partial(id, Direction::Backward, Stage::Ledger, rows_done, err));
        }

        info!(
            step = %id,
            description = step.description(),
            restored = rows_done,
            "Reverted migration step"
        );
        Ok(())
    }

    /// Brings a step left in flight by a `direction` run to `resolution` in a
    /// single checkpoint.
    ///
    /// Settling as applied recodes the rows still holding a source value.
    /// Settling as reverted restores the journaled rows and undoes the
    /// step's schema changes. Both are rehearsed on a copy first, so a
    /// refusal leaves the marker in place.
    pub async fn settle(
        &self,
        state: &mut PersistedState,
        step: &MigrationStep,
        direction: Direction,
        resolution: Resolution,
    ) -> Result<usize> {
        let id = step.id();
        let mut scratch = state.tables.clone();

        let rows = match (resolution, step.recode()) {
            (Resolution::Applied, Some(recode)) => {
                let table = scratch
                    .get_table_mut(recode.table())
                    .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
                let rows = recode
                    .matching_rows(table)
                    .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
                recode
                    .apply_to(table, &rows)
                    .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
                rows
            }
            (Resolution::Applied, None) => Vec::new(),
            (Resolution::Reverted, recode) => {
                let mut rows = Vec::new();
                if let Some(recode) = recode {
                    let inverse = recode.inverse();
                    rows = rows_to_revert(state, id, &inverse)
                        .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
                    scratch
                        .get_table_mut(inverse.table())
                        .and_then(|table| inverse.apply_to(table, &rows))
                        .map_err(|e| e.at_stage(id, Stage::DataTransform))?;
                }
                self.rehearse_schema(id, &step.inverse_changes(), &mut scratch)?;
                rows
            }
        };

        state.tables = scratch;
        let ledger = &mut state.ledger;
        ledger.finish();
        match (resolution, direction) {
            (Resolution::Applied, Direction::Forward) => {
                ledger.record_recoded(id, &rows);
                ledger.record_applied(id)?;
            }
            (Resolution::Applied, Direction::Backward) => ledger.record_recoded(id, &rows),
            (Resolution::Reverted, Direction::Forward) => ledger.discard_journal(id),
            (Resolution::Reverted, Direction::Backward) => {
                ledger.record_reverted(id)?;
            }
        }
        self.checkpoint(state)
            .await
            .map_err(|e| e.at_stage(id, Stage::Ledger))?;
        Ok(rows.len())
    }

    /// Runs `changes` against `storage`, then checks bound resources.
    fn rehearse_schema(
        &self,
        step: StepId,
        changes: &[SchemaChange],
        storage: &mut InMemoryStorage,
    ) -> Result<()> {
        for change in changes {
            change
                .apply(step, storage)
                .map_err(|e| e.at_stage(step, Stage::Schema))?;
            debug!(step = %step, change = %change, "Schema change checked");
        }

        for resource in self.resources {
            let touched = changes.iter().any(|change| change.table() == resource.table);
            // A dropped table has nothing left to be compatible with.
            if !touched || !storage.table_exists(&resource.table) {
                continue;
            }
            let schema = storage.get_schema(&resource.table)?;
            resource
                .check_compatibility(schema)
                .map_err(|e| e.at_stage(step, Stage::Schema))?;
        }
        Ok(())
    }

    async fn recode_batches(
        &self,
        state: &mut PersistedState,
        step: StepId,
        recode: &ColumnRecode,
        rows: &[RowId],
        direction: Direction,
        rows_done: &mut usize,
    ) -> Result<()> {
        for batch in rows.chunks(self.batch_size) {
            let table = state.tables.get_table_mut(recode.table())?;
            recode.apply_to(table, batch)?;
            match direction {
                Direction::Forward => state.ledger.record_recoded(step, batch),
                Direction::Backward => state.ledger.forget_recoded(step, batch),
            }
            state.ledger.advance(batch.len());
            self.checkpoint(state).await?;
            *rows_done += batch.len();
            debug!(step = %step, %direction, rows = batch.len(), total = *rows_done, "Recode batch saved");
        }
        Ok(())
    }

    async fn checkpoint(&self, state: &PersistedState) -> Result<()> {
        self.store.save(state).await?;
        debug!(store = %self.store.describe(), "Checkpoint saved");
        Ok(())
    }
}

/// Rows the backward recode should restore: journaled rows that still hold
/// a recoded value, or every matching row when the step has no journal.
fn rows_to_revert(state: &PersistedState, step: StepId, inverse: &ColumnRecode) -> Result<Vec<RowId>> {
    let table = state.tables.get_table(inverse.table())?;
    let Some(journaled) = state.ledger.recoded_rows(step) else {
        warn!(
            step = %step,
            table = inverse.table(),
            column = inverse.column(),
            "No recode journal for step, reverting every row holding a recoded value"
        );
        return inverse.matching_rows(table);
    };

    let mut rows = Vec::with_capacity(journaled.len());
    for row in journaled {
        match table.value(*row, inverse.column())? {
            Some(value) if inverse.target_for(value).is_some() => rows.push(*row),
            current => warn!(
                step = %step,
                row = %row,
                current = ?current,
                "Recoded row changed since the migration, leaving it as is"
            ),
        }
    }
    Ok(rows)
}

fn partial(
    step: StepId,
    direction: Direction,
    stage: Stage,
    rows_done: usize,
    err: MigrateError,
) -> MigrateError {
    error!(
        step = %step,
        %direction,
        %stage,
        rows_done,
        error = %err,
        "Step left partially applied, operator intervention required"
    );
    MigrateError::PartialMigration {
        step,
        direction,
        stage,
        rows_done,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};
    use crate::storage::{MemoryStateStore, TableSchema};

    fn status(data_type: DataType) -> Column {
        Column::new("status", data_type).not_null().default_value("pending")
    }

    fn seeded(statuses: &[&str]) -> PersistedState {
        let mut state = PersistedState::default();
        state
            .tables
            .create_table(TableSchema::new("orders", vec![status(DataType::Varchar(255))]))
            .unwrap();
        let orders = state.tables.get_table_mut("orders").unwrap();
        for s in statuses {
            orders.insert_named([("status", Value::from(*s))]).unwrap();
        }
        state
    }

    fn recode_step() -> MigrationStep {
        MigrationStep::new(StepId(2), "recode declined")
            .with_recode(ColumnRecode::new("orders", "status").map("declined", "delivered"))
    }

    fn statuses(state: &PersistedState) -> Vec<String> {
        state
            .tables
            .get_table("orders")
            .unwrap()
            .scan()
            .map(|(_, row)| row[0].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_forward_recode_checkpoints_every_batch() {
        let store = MemoryStateStore::new();
        let executor = StepExecutor::new(&store, 2);
        let mut state = seeded(&["declined", "declined", "pending", "declined"]);

        executor.apply_forward(&mut state, &recode_step()).await.unwrap();

        assert_eq!(statuses(&state), ["delivered", "delivered", "pending", "delivered"]);
        assert_eq!(state.ledger.list_applied(), vec![StepId(2)]);
        assert_eq!(
            state.ledger.recoded_rows(StepId(2)),
            Some(&[RowId(1), RowId(2), RowId(4)][..])
        );
        assert!(state.ledger.in_flight().is_none());
        assert_eq!(store.snapshot().await.unwrap().ledger, state.ledger);
    }

    #[tokio::test]
    async fn test_backward_recode_skips_rows_changed_since() {
        let store = MemoryStateStore::new();
        let executor = StepExecutor::new(&store, 10);
        let mut state = seeded(&["declined", "delivered", "declined"]);
        executor.apply_forward(&mut state, &recode_step()).await.unwrap();

        // Row 3 moved on after the migration.
        state
            .tables
            .get_table_mut("orders")
            .unwrap()
            .update_value(RowId(3), "status", Value::from("shipped"))
            .unwrap();

        executor.apply_backward(&mut state, &recode_step()).await.unwrap();
        assert_eq!(statuses(&state), ["declined", "delivered", "shipped"]);
        assert!(state.ledger.is_empty());
        assert_eq!(state.ledger.recoded_rows(StepId(2)), None);
    }

    #[tokio::test]
    async fn test_narrowing_fails_before_anything_is_saved() {
        let store = MemoryStateStore::new();
        let executor = StepExecutor::new(&store, 10);
        let mut state = seeded(&["pending", "a status far longer than twenty"]);
        let narrow = MigrationStep::new(StepId(3), "narrow").alter_column(
            "orders",
            status(DataType::Varchar(255)),
            status(DataType::Varchar(20)),
        );

        let err = executor.apply_forward(&mut state, &narrow).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::NarrowingViolation { ref rows, .. } if rows == &vec![RowId(2)]
        ));
        assert!(store.snapshot().await.is_none());
        assert_eq!(
            state.tables.get_schema("orders").unwrap().column("status").unwrap().data_type,
            DataType::Varchar(255)
        );
    }

    #[tokio::test]
    async fn test_settle_interrupted_revert_finishes_it() {
        let store = MemoryStateStore::new();
        let executor = StepExecutor::new(&store, 10);
        let mut state = seeded(&["declined", "pending"]);
        let widen = MigrationStep::new(StepId(2), "widen and recode")
            .alter_column(
                "orders",
                status(DataType::Varchar(255)),
                status(DataType::Varchar(300)),
            )
            .with_recode(ColumnRecode::new("orders", "status").map("declined", "delivered"));
        executor.apply_forward(&mut state, &widen).await.unwrap();

        // A revert that stopped before its first batch.
        state.ledger.begin(StepId(2), Direction::Backward, Stage::DataTransform);
        let settled = executor
            .settle(&mut state, &widen, Direction::Backward, Resolution::Reverted)
            .await
            .unwrap();

        assert_eq!(settled, 1);
        assert_eq!(statuses(&state), ["declined", "pending"]);
        assert_eq!(
            state.tables.get_schema("orders").unwrap().column("status").unwrap().data_type,
            DataType::Varchar(255)
        );
        assert!(state.ledger.is_empty());
        assert!(state.ledger.in_flight().is_none());
        assert_eq!(store.snapshot().await.unwrap().ledger, state.ledger);
    }
}
