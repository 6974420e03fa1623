use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::MigratorConfig;
use crate::core::{Direction, MigrateError, Result, StepId};
use crate::ledger::Ledger;
use crate::resource::ResourceDefinition;
use crate::storage::{InMemoryStorage, PersistedState, StateStore};

use super::{LockGuard, MigrationLock, MigrationPlan, MigrationStep, StepExecutor};

/// Resting state an operator assigns to an interrupted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Reverted,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Reverted => write!(f, "reverted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Applying,
    Applied,
    Reverting,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Applying => write!(f, "applying"),
            Self::Applied => write!(f, "applied"),
            Self::Reverting => write!(f, "reverting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub step_id: StepId,
    pub description: String,
    pub state: StepState,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Steps a successful `up` or `down` run went through, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub direction: Direction,
    pub steps: Vec<StepId>,
}

impl MigrationReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            steps: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Runs a migration plan against one state store.
///
/// `migrate_up`, `migrate_down` and `resolve` hold the migration lock for
/// their whole run and start from a fresh load of the store.
pub struct Migrator<S: StateStore> {
    plan: MigrationPlan,
    store: S,
    config: MigratorConfig,
    resources: Vec<ResourceDefinition>,
    state: PersistedState,
}

impl<S: StateStore> Migrator<S> {
    pub async fn open(plan: MigrationPlan, store: S, config: MigratorConfig) -> Result<Self> {
        config.validate()?;
        plan.validate()?;
        let state = store.load().await?.unwrap_or_default();
        info!(
            store = %store.describe(),
            known = plan.steps().len(),
            applied = state.ledger.entries().len(),
            "Opened migration state"
        );
        Ok(Self {
            plan,
            store,
            config,
            resources: Vec::new(),
            state,
        })
    }

    /// Binds a resource: later steps touching its table must keep it
    /// compatible.
    pub fn with_resource(mut self, resource: ResourceDefinition) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.state.ledger
    }

    pub fn storage(&self) -> &InMemoryStorage {
        &self.state.tables
    }

    /// Direct access to the tables; call [`Migrator::save`] to persist edits.
    pub fn storage_mut(&mut self) -> &mut InMemoryStorage {
        &mut self.state.tables
    }

    pub async fn save(&mut self) -> Result<()> {
        let _guard = self.lock().await?;
        self.store.save(&self.state).await
    }

    /// Replaces the in-memory state with what the store holds.
    pub async fn reload(&mut self) -> Result<()> {
        self.state = self.store.load().await?.unwrap_or_default();
        Ok(())
    }

    /// Detects state a run must not start from: an interrupted step, ledger
    /// entries out of order, or entries the plan does not know.
    pub fn check_consistency(&self) -> Result<()> {
        if let Some(marker) = self.state.ledger.in_flight() {
            return Err(MigrateError::PartialMigration {
                step: marker.step_id,
                direction: marker.direction,
                stage: marker.stage,
                rows_done: marker.rows_done,
                reason: format!("run started at {} did not finish", marker.started_at),
            });
        }
        self.state.ledger.verify_order()?;
        for id in self.state.ledger.list_applied() {
            if self.plan.get(id).is_none() {
                return Err(MigrateError::UnknownStep(id));
            }
        }
        Ok(())
    }

    pub fn plan_up(&self, target: Option<StepId>) -> Result<Vec<&MigrationStep>> {
        self.plan.pending_up(&self.state.ledger, target)
    }

    pub fn plan_down(&self, target: StepId) -> Result<Vec<&MigrationStep>> {
        self.plan.pending_down(&self.state.ledger, target)
    }

    /// Applies pending steps up to `target` (default: the latest known
    /// step), stopping at the first failure.
    pub async fn migrate_up(&mut self, target: Option<StepId>) -> Result<MigrationReport> {
        let _guard = self.lock().await?;
        self.reload().await?;
        self.check_consistency()?;

        let steps = self.plan.pending_up(&self.state.ledger, target)?;
        info!(pending = steps.len(), "Migrating up");

        let executor = StepExecutor::new(&self.store, self.config.batch_size)
            .with_resources(&self.resources);
        let mut report = MigrationReport::new(Direction::Forward);
        for step in steps {
            if let Err(err) = executor.apply_forward(&mut self.state, step).await {
                recover(&self.store, &mut self.state).await;
                return Err(err);
            }
            report.steps.push(step.id());
        }

        info!(applied = report.steps.len(), "Migration up finished");
        Ok(report)
    }

    /// Reverts applied steps above `target` in descending order, stopping at
    /// the first failure. `StepId::ZERO` reverts everything.
    pub async fn migrate_down(&mut self, target: StepId) -> Result<MigrationReport> {
        let _guard = self.lock().await?;
        self.reload().await?;
        self.check_consistency()?;

        let steps = self.plan.pending_down(&self.state.ledger, target)?;
        info!(pending = steps.len(), target = %target, "Migrating down");

        let executor = StepExecutor::new(&self.store, self.config.batch_size)
            .with_resources(&self.resources);
        let mut report = MigrationReport::new(Direction::Backward);
        for step in steps {
            if let Err(err) = executor.apply_backward(&mut self.state, step).await {
                recover(&self.store, &mut self.state).await;
                return Err(err);
            }
            report.steps.push(step.id());
        }

        info!(reverted = report.steps.len(), "Migration down finished");
        Ok(report)
    }

    pub fn status(&self) -> Vec<StepStatus> {
        let marker = self.state.ledger.in_flight();
        self.plan
            .steps()
            .iter()
            .map(|step| {
                let id = step.id();
                let state = match marker {
                    Some(m) if m.step_id == id && m.direction == Direction::Forward => {
                        StepState::Applying
                    }
                    Some(m) if m.step_id == id => StepState::Reverting,
                    _ if self.state.ledger.contains(id) => StepState::Applied,
                    _ => StepState::Pending,
                };
                StepStatus {
                    step_id: id,
                    description: step.description().to_string(),
                    state,
                    applied_at: self.state.ledger.applied_at(id),
                }
            })
            .collect()
    }

    /// Settles a step left in flight by a failed or crashed run.
    ///
    /// The stored state is moved to `resolution`: the remaining rows are
    /// recoded for `Applied`, while `Reverted` restores the journaled rows
    /// and undoes the step's schema changes.
    pub async fn resolve(&mut self, step: StepId, resolution: Resolution) -> Result<()> {
        let _guard = self.lock().await?;
        self.reload().await?;

        let marker = match self.state.ledger.in_flight() {
            Some(marker) if marker.step_id == step => marker.clone(),
            _ => {
                return Err(MigrateError::InvalidStep(format!(
                    "step {} has no interrupted run to resolve",
                    step
                )));
            }
        };
        let planned = self.plan.get(step).ok_or(MigrateError::UnknownStep(step))?;

        let executor = StepExecutor::new(&self.store, self.config.batch_size)
            .with_resources(&self.resources);
        let rows = match executor
            .settle(&mut self.state, planned, marker.direction, resolution)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                recover(&self.store, &mut self.state).await;
                return Err(err);
            }
        };

        warn!(
            step = %step,
            direction = %marker.direction,
            rows_done = marker.rows_done,
            rows_settled = rows,
            resolution = %resolution,
            "Interrupted step resolved by operator"
        );
        Ok(())
    }

    async fn lock(&self) -> Result<LockGuard> {
        MigrationLock::from_config(&self.config).acquire().await
    }
}

/// Drops in-memory changes of a failed run in favour of the stored state.
async fn recover<S: StateStore>(store: &S, state: &mut PersistedState) {
    match store.load().await {
        Ok(stored) => *state = stored.unwrap_or_default(),
        Err(err) => warn!(error = %err, "Failed to reload state after error"),
    }
}
