mod cli;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};
use ingest_core::error::IngestError;
use ingest_core::types::RunReport;
use ingest_core::Config;
use ingest_orchestrator::{Orchestrator, UpdateOptions};
use ingest_repository::{Db, Ledger, Repository};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DB_MAX_CONNECTIONS: u32 = 10;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_cli=info,ingest_orchestrator=info,ingest_processors=info".into()),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start tokio runtime: {e}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(run())
}

async fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let db = match Db::connect(&config.db.url, DB_MAX_CONNECTIONS).await {
        Ok(db) => db,
        Err(e) => {
            error!("database connection failed: {e}");
            return ExitCode::from(2);
        }
    };
    let repo = Repository::new(db.clone());
    let ledger = Ledger::new(db);

    let orchestrator = match Orchestrator::new(config, repo, ledger) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("failed to construct orchestrator: {e}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, canceling in-flight work");
                cancel.cancel();
            }
        })
    };

    let outcome = match cli.command {
        Command::Update { from_date, prices_only, dividends_only, companies_only, force, limit } => {
            let opts = UpdateOptions { from_date, prices_only, dividends_only, companies_only, force, limit };
            orchestrator.run_update(&opts, &cancel).await
        }
        Command::Discover => orchestrator.run_discover(&cancel).await,
        Command::RefreshCompanies { limit } => orchestrator.run_refresh_companies(limit, &cancel).await,
        Command::FutureDividends { days_ahead } => orchestrator.run_future_dividends(days_ahead, &cancel).await,
    };

    watcher.abort();

    if cancel.is_cancelled() {
        info!("run canceled");
        return ExitCode::from(130);
    }

    match outcome {
        Ok(report) => exit_code_for(&report),
        Err(e) => {
            error!("run failed: {e}");
            exit_code_for_error(&e)
        }
    }
}

fn exit_code_for(report: &RunReport) -> ExitCode {
    if let Some(reason) = &report.skipped_reason {
        info!("run skipped: {reason}");
        return ExitCode::SUCCESS;
    }

    print_summary(report);

    let any_phase_over_threshold = report.phases.iter().any(|p| {
        if p.processed == 0 {
            return false;
        }
        (p.failed as f64 / p.processed as f64) >= 0.05
    });

    if any_phase_over_threshold {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn exit_code_for_error(e: &IngestError) -> ExitCode {
    match e {
        IngestError::Config(_) => ExitCode::from(2),
        IngestError::Canceled => ExitCode::from(130),
        _ => ExitCode::from(1),
    }
}

fn print_summary(report: &RunReport) {
    for phase in &report.phases {
        info!(
            phase = %phase.phase,
            inputs = phase.inputs,
            processed = phase.processed,
            succeeded = phase.succeeded,
            failed = phase.failed,
            elapsed_ms = phase.elapsed_ms,
            "phase complete",
        );
    }
    for failure in &report.failures {
        error!("{failure}");
    }
}
