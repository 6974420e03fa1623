use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rowshift::migrations::{builtin_plan, m0001, m0002};
use rowshift::{
    Column, ColumnRecode, DataType, Direction, MemoryStateStore, MigrateError, MigrationPlan,
    MigrationStep, Migrator, MigratorConfig, PersistedState, Resolution, Result, Stage,
    StateStore, StepId, StepState, TableSchema, Value,
};
use tempfile::TempDir;

/// Shares state with an inner memory store but fails its `fail_on`-th save,
/// standing in for a crash at that checkpoint.
#[derive(Clone)]
struct CrashingStore {
    inner: MemoryStateStore,
    saves: Arc<AtomicUsize>,
    fail_on: usize,
}

impl CrashingStore {
    fn new(inner: MemoryStateStore, fail_on: usize) -> Self {
        Self {
            inner,
            saves: Arc::new(AtomicUsize::new(0)),
            fail_on,
        }
    }
}

#[async_trait]
impl StateStore for CrashingStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        self.inner.load().await
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(MigrateError::Io("simulated crash".to_string()));
        }
        self.inner.save(state).await
    }

    fn describe(&self) -> String {
        "crashing".to_string()
    }
}

fn plan() -> MigrationPlan {
    let status = Column::new("status", DataType::Varchar(20))
        .not_null()
        .default_value("pending");
    MigrationPlan::new()
        .with_step(
            MigrationStep::new(StepId(1), "create orders")
                .create_table(TableSchema::new("orders", vec![status])),
        )
        .unwrap()
        .with_step(
            MigrationStep::new(StepId(2), "recode declined")
                .with_recode(ColumnRecode::new("orders", "status").map("declined", "delivered")),
        )
        .unwrap()
}

fn config(dir: &TempDir) -> MigratorConfig {
    MigratorConfig::new(dir.path().join("state.json"))
        .lock_timeout(Duration::from_secs(5))
        .lock_poll_interval(Duration::from_millis(10))
        .batch_size(2)
}

/// Step 1 applied with rows `declined, pending, declined` in `store`.
async fn seed(dir: &TempDir, store: MemoryStateStore) {
    let mut migrator = Migrator::open(plan(), store, config(dir)).await.unwrap();
    migrator.migrate_up(Some(StepId(1))).await.unwrap();
    let orders = migrator.storage_mut().get_table_mut("orders").unwrap();
    for s in ["declined", "pending", "declined"] {
        orders.insert_named([("status", Value::from(s))]).unwrap();
    }
    migrator.save().await.unwrap();
}

fn statuses<S: StateStore>(migrator: &Migrator<S>) -> Vec<String> {
    migrator
        .storage()
        .get_table("orders")
        .unwrap()
        .scan()
        .map(|(_, row)| row[0].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_crash_before_data_transform_is_detected_and_resolved() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStateStore::new();
    seed(&dir, store.clone()).await;

    // Save 1 persists the marker, save 2 is the first recode batch.
    let mut crashing = Migrator::open(plan(), CrashingStore::new(store.clone(), 2), config(&dir))
        .await
        .unwrap();
    let err = crashing.migrate_up(None).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::PartialMigration {
            step: StepId(2),
            direction: Direction::Forward,
            stage: Stage::DataTransform,
            rows_done: 0,
            ..
        }
    ));
    assert_eq!(err.kind(), "PartialMigrationError");
    drop(crashing);

    // Restart.
    let mut migrator = Migrator::open(plan(), store.clone(), config(&dir)).await.unwrap();
    let err = migrator.check_consistency().unwrap_err();
    assert!(matches!(err, MigrateError::PartialMigration { step: StepId(2), .. }));
    assert_eq!(migrator.status()[1].state, StepState::Applying);
    assert!(matches!(
        migrator.migrate_up(None).await,
        Err(MigrateError::PartialMigration { .. })
    ));
    assert_eq!(statuses(&migrator), ["declined", "pending", "declined"]);

    // The data was never touched, so the step goes back to unapplied.
    assert!(migrator.resolve(StepId(1), Resolution::Reverted).await.is_err());
    migrator.resolve(StepId(2), Resolution::Reverted).await.unwrap();
    migrator.check_consistency().unwrap();
    assert_eq!(migrator.ledger().list_applied(), vec![StepId(1)]);

    migrator.migrate_up(None).await.unwrap();
    assert_eq!(statuses(&migrator), ["delivered", "pending", "delivered"]);
}

#[tokio::test]
async fn test_crash_before_ledger_write_resolved_as_applied() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStateStore::new();
    seed(&dir, store.clone()).await;

    // Marker, one batch of two rows, then the final checkpoint fails.
    let mut crashing = Migrator::open(plan(), CrashingStore::new(store.clone(), 3), config(&dir))
        .await
        .unwrap();
    let err = crashing.migrate_up(None).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::PartialMigration {
            step: StepId(2),
            stage: Stage::Ledger,
            rows_done: 2,
            ..
        }
    ));
    drop(crashing);

    let mut migrator = Migrator::open(plan(), store.clone(), config(&dir)).await.unwrap();
    assert_eq!(statuses(&migrator), ["delivered", "pending", "delivered"]);
    migrator.resolve(StepId(2), Resolution::Applied).await.unwrap();
    assert_eq!(migrator.ledger().list_applied(), vec![StepId(1), StepId(2)]);

    // The journal written before the crash still drives the revert.
    migrator.migrate_down(StepId(1)).await.unwrap();
    assert_eq!(statuses(&migrator), ["declined", "pending", "declined"]);
}

#[tokio::test]
async fn test_failed_first_checkpoint_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStateStore::new();
    seed(&dir, store.clone()).await;
    let before = store.snapshot().await.unwrap();

    let mut crashing = Migrator::open(plan(), CrashingStore::new(store.clone(), 1), config(&dir))
        .await
        .unwrap();
    let err = crashing.migrate_up(None).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::StepFailed { step: StepId(2), stage: Stage::Schema, .. }
    ));
    assert_eq!(err.kind(), "Io");

    let after = store.snapshot().await.unwrap();
    assert_eq!(after.ledger, before.ledger);
    assert_eq!(after.tables, before.tables);
    assert!(crashing.ledger().in_flight().is_none());
}

const ORDERS: [&str; 4] = ["declined", "delivered", "declined", "pending"];

/// Shop tables from the built-in plan with `ORDERS` inserted.
async fn seed_shop(dir: &TempDir, store: MemoryStateStore) {
    let mut migrator = Migrator::open(builtin_plan().unwrap(), store, config(dir))
        .await
        .unwrap();
    migrator.migrate_up(Some(m0001::ID)).await.unwrap();
    let orders = migrator.storage_mut().get_table_mut("orders").unwrap();
    for (i, status) in ORDERS.iter().enumerate() {
        orders
            .insert_named([
                ("id", Value::Integer(i as i64 + 1)),
                ("user_id", Value::Integer(3)),
                ("status", Value::from(*status)),
            ])
            .unwrap();
    }
    migrator.save().await.unwrap();
}

/// Runs `up --to m0002` with one row per batch against a store that fails
/// its third save: the schema and the first recoded row are durable.
async fn interrupted_status_change(dir: &TempDir, store: &MemoryStateStore) {
    let mut crashing = Migrator::open(
        builtin_plan().unwrap(),
        CrashingStore::new(store.clone(), 3),
        config(dir).batch_size(1),
    )
    .await
    .unwrap();
    let err = crashing.migrate_up(Some(m0002::ID)).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::PartialMigration {
            step: m0002::ID,
            stage: Stage::DataTransform,
            rows_done: 1,
            ..
        }
    ));
}

fn shop_statuses<S: StateStore>(migrator: &Migrator<S>) -> Vec<String> {
    let orders = migrator.storage().get_table("orders").unwrap();
    orders
        .row_ids()
        .into_iter()
        .map(|id| {
            orders
                .value(id, "status")
                .unwrap()
                .and_then(Value::as_str)
                .unwrap()
                .to_string()
        })
        .collect()
}

fn shop_status_column<S: StateStore>(migrator: &Migrator<S>) -> Column {
    migrator
        .storage()
        .get_schema("orders")
        .unwrap()
        .column("status")
        .unwrap()
        .clone()
}

#[tokio::test]
async fn test_status_change_resolved_as_reverted_undoes_schema_and_rows() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStateStore::new();
    seed_shop(&dir, store.clone()).await;
    interrupted_status_change(&dir, &store).await;

    let mut migrator = Migrator::open(builtin_plan().unwrap(), store.clone(), config(&dir))
        .await
        .unwrap();
    assert_eq!(shop_statuses(&migrator), ["delivered", "delivered", "declined", "pending"]);
    assert_eq!(shop_status_column(&migrator), m0002::order_status());

    migrator.resolve(m0002::ID, Resolution::Reverted).await.unwrap();
    migrator.check_consistency().unwrap();
    assert_eq!(migrator.ledger().list_applied(), vec![m0001::ID]);
    assert_eq!(shop_statuses(&migrator), ORDERS);
    assert_eq!(shop_status_column(&migrator), m0001::order_status());
    assert_eq!(migrator.ledger().recoded_rows(m0002::ID), None);

    // The step runs cleanly again.
    migrator.migrate_up(Some(m0002::ID)).await.unwrap();
    assert_eq!(shop_statuses(&migrator), ["delivered", "delivered", "delivered", "pending"]);
}

#[tokio::test]
async fn test_status_change_resolved_as_applied_keeps_revert_exact() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStateStore::new();
    seed_shop(&dir, store.clone()).await;
    interrupted_status_change(&dir, &store).await;

    let mut migrator = Migrator::open(builtin_plan().unwrap(), store.clone(), config(&dir))
        .await
        .unwrap();
    migrator.resolve(m0002::ID, Resolution::Applied).await.unwrap();
    assert_eq!(migrator.ledger().list_applied(), vec![m0001::ID, m0002::ID]);
    assert_eq!(shop_statuses(&migrator), ["delivered", "delivered", "delivered", "pending"]);
    let journaled: Vec<u64> = migrator
        .ledger()
        .recoded_rows(m0002::ID)
        .unwrap()
        .iter()
        .map(|id| id.0)
        .collect();
    assert_eq!(journaled, vec![1, 3]);

    // Order 2 was delivered before the step and stays delivered.
    migrator.migrate_down(m0001::ID).await.unwrap();
    assert_eq!(shop_statuses(&migrator), ORDERS);
    assert_eq!(shop_status_column(&migrator), m0001::order_status());
}

#[tokio::test]
async fn test_resolve_refusal_keeps_marker() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStateStore::new();
    seed_shop(&dir, store.clone()).await;
    interrupted_status_change(&dir, &store).await;

    // A status the enum cannot hold was written after the crash.
    let mut state = store.snapshot().await.unwrap();
    state
        .tables
        .get_table_mut("orders")
        .unwrap()
        .insert_named([
            ("id", Value::Integer(5)),
            ("user_id", Value::Integer(3)),
            ("status", Value::from("on-hold")),
        ])
        .unwrap();
    store.save(&state).await.unwrap();

    let mut migrator = Migrator::open(builtin_plan().unwrap(), store.clone(), config(&dir))
        .await
        .unwrap();
    let err = migrator.resolve(m0002::ID, Resolution::Reverted).await.unwrap_err();
    assert!(matches!(err.root(), MigrateError::NarrowingViolation { .. }));
    assert_eq!(migrator.status()[1].state, StepState::Applying);
    assert!(store.snapshot().await.unwrap().ledger.in_flight().is_some());

    // Settling forward needs no narrowing.
    migrator.resolve(m0002::ID, Resolution::Applied).await.unwrap();
    migrator.check_consistency().unwrap();
}
