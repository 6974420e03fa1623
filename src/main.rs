use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rowshift::config::{DEFAULT_BATCH_SIZE, DEFAULT_STATE_PATH};
use rowshift::migrations::builtin_plan;
use rowshift::{
    FileStateStore, MigrateError, MigrationReport, MigrationStep, Migrator, MigratorConfig,
    Resolution, StepId, product_resource,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "migrate")]
#[command(about = "Apply and revert shop schema migrations")]
struct Cli {
    /// State document holding tables and ledger
    #[arg(long, env = "ROWSHIFT_STATE", default_value = DEFAULT_STATE_PATH, global = true)]
    state: PathBuf,

    /// Seconds to wait for the migration lock; 0 waits indefinitely
    #[arg(long, env = "ROWSHIFT_LOCK_TIMEOUT", default_value_t = 30, value_name = "SECS", global = true)]
    lock_timeout: u64,

    /// Rows recoded per checkpoint
    #[arg(long, env = "ROWSHIFT_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE, global = true)]
    batch_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending steps
    Up {
        /// Last step to apply; defaults to the latest known step
        #[arg(long)]
        to: Option<StepId>,
        /// Print the steps without running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Revert applied steps above a target (0 reverts everything)
    Down {
        #[arg(long)]
        to: StepId,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show every known step and whether it is applied
    Status,
    /// Verify the ledger and detect interrupted runs
    Check,
    /// Settle a step left in flight by a failed run
    Resolve {
        #[arg(long)]
        step: StepId,
        #[arg(long = "as", value_enum)]
        resolution: ResolutionArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    Applied,
    Reverted,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Applied => Resolution::Applied,
            ResolutionArg::Reverted => Resolution::Reverted,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", diagnostic(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rowshift=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = MigratorConfig::new(&cli.state).batch_size(cli.batch_size);
    let config = match cli.lock_timeout {
        0 => config.wait_forever(),
        secs => config.lock_timeout(Duration::from_secs(secs)),
    };

    let plan = builtin_plan().context("built-in migrations are invalid")?;
    let store = FileStateStore::new(&cli.state);
    let mut migrator = Migrator::open(plan, store, config)
        .await?
        .with_resource(product_resource());

    match cli.command {
        Command::Up { to, dry_run: true } => {
            migrator.check_consistency()?;
            print_plan("apply", &migrator.plan_up(to)?);
        }
        Command::Up { to, dry_run: false } => {
            let report = migrator.migrate_up(to).await?;
            print_report(&report);
        }
        Command::Down { to, dry_run: true } => {
            migrator.check_consistency()?;
            print_plan("revert", &migrator.plan_down(to)?);
        }
        Command::Down { to, dry_run: false } => {
            let report = migrator.migrate_down(to).await?;
            print_report(&report);
        }
        Command::Status => {
            for status in migrator.status() {
                let applied_at = status
                    .applied_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<16} {:<10} {:<26} {}",
                    status.step_id, status.state, applied_at, status.description
                );
            }
        }
        Command::Check => {
            migrator.check_consistency()?;
            println!("state is consistent");
        }
        Command::Resolve { step, resolution } => {
            let resolution = Resolution::from(resolution);
            migrator.resolve(step, resolution).await?;
            println!("step {} resolved as {}", step, resolution);
        }
    }

    Ok(())
}

fn print_plan(verb: &str, steps: &[&MigrationStep]) {
    if steps.is_empty() {
        println!("nothing to {}", verb);
        return;
    }
    for step in steps {
        println!("would {} {} {}", verb, step.id(), step.description());
    }
}

fn print_report(report: &MigrationReport) {
    if report.is_empty() {
        println!("nothing to do");
        return;
    }
    for step in &report.steps {
        println!("{} {}", report.direction, step);
    }
}

/// `error[<Kind>] step <id> (<stage>): <message>`
fn diagnostic(err: &anyhow::Error) -> String {
    let Some(migrate) = err.downcast_ref::<MigrateError>() else {
        return format!("error: {:#}", err);
    };

    let mut line = format!("error[{}]", migrate.kind());
    if let Some(step) = migrate.step() {
        line.push_str(&format!(" step {}", step));
        if let Some(stage) = migrate.stage() {
            line.push_str(&format!(" ({})", stage));
        }
    }
    line.push_str(&format!(": {}", migrate.root()));
    line
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrateError>().map(MigrateError::root) {
        Some(MigrateError::Config(_)) => 2,
        Some(MigrateError::LockTimeout { .. }) => 3,
        Some(MigrateError::PartialMigration { .. }) => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowshift::{Direction, RowId, Stage};

    fn narrowing() -> MigrateError {
        MigrateError::NarrowingViolation {
            step: StepId(2024_04_21_055956),
            table: "orders".to_string(),
            column: "status".to_string(),
            rows: vec![RowId(2), RowId(5)],
        }
    }

    #[test]
    fn test_partial_migration_exits_4() {
        let err = anyhow::Error::from(MigrateError::PartialMigration {
            step: StepId(2024_04_21_055733),
            direction: Direction::Forward,
            stage: Stage::DataTransform,
            rows_done: 500,
            reason: "I/O error: disk full".to_string(),
        });
        assert_eq!(exit_code(&err), 4);
        assert!(diagnostic(&err).starts_with(
            "error[PartialMigrationError] step 20240421055733 (data-transform): Step 20240421055733 was left partially applied"
        ));
    }

    #[test]
    fn test_lock_timeout_exits_3() {
        let err = anyhow::Error::from(MigrateError::LockTimeout {
            path: PathBuf::from("rowshift.state.json.lock"),
            waited: Duration::from_secs(30),
        });
        assert_eq!(exit_code(&err), 3);
        assert_eq!(
            diagnostic(&err),
            "error[LockTimeoutError]: Timed out after 30s waiting for the migration lock on 'rowshift.state.json.lock'"
        );
    }

    #[test]
    fn test_config_error_exits_2() {
        let err = anyhow::Error::from(MigrateError::Config("batch size must be at least 1".to_string()));
        assert_eq!(exit_code(&err), 2);
        assert_eq!(
            diagnostic(&err),
            "error[Config]: Invalid configuration: batch size must be at least 1"
        );
    }

    #[test]
    fn test_wrapped_failure_reports_root_cause() {
        let err = anyhow::Error::from(MigrateError::StepFailed {
            step: StepId(2024_04_21_055956),
            stage: Stage::Schema,
            source: Box::new(narrowing()),
        });
        assert_eq!(exit_code(&err), 1);
        assert_eq!(
            diagnostic(&err),
            "error[NarrowingViolationError] step 20240421055956 (schema): Step 20240421055956 would narrow 'orders.status' but rows [2, 5] violate the new definition"
        );
        assert_eq!(diagnostic(&anyhow::Error::from(narrowing())), diagnostic(&err));
    }

    #[test]
    fn test_other_failures_exit_1() {
        let err = anyhow::anyhow!("built-in migrations are invalid");
        assert_eq!(exit_code(&err), 1);
        assert_eq!(diagnostic(&err), "error: built-in migrations are invalid");
    }

    #[test]
    fn test_cli_parses_resolve() {
        let cli = Cli::try_parse_from([
            "migrate",
            "--lock-timeout",
            "0",
            "resolve",
            "--step",
            "2024_04_21_055733",
            "--as",
            "reverted",
        ])
        .unwrap();
        assert_eq!(cli.lock_timeout, 0);
        assert!(matches!(
            cli.command,
            Command::Resolve { step: StepId(2024_04_21_055733), resolution: ResolutionArg::Reverted }
        ));
        assert!(Cli::try_parse_from(["migrate", "resolve", "--step", "x", "--as", "reverted"]).is_err());
    }
}
