use crate::{
    commands::{Commands, StageCommand},
    error::CliError,
    shutdown::{Exit, Shutdown},
};
use clap::Parser;
use engine_config::{
    env::EnvVars,
    settings::{MigrationSettings, validated::ValidatedSettings},
};
use engine_core::{
    migration_state::MigrationService, state::sled_store::SledMigrationStore,
};
use engine_processing::transfer::{
    local::LocalObjectStore, pipeline::TransferPipeline, uploader::UploaderConfig,
};
use engine_runtime::extract::{DatabaseExtractor, PgDumpExtractor};
use model::{stage::MigrationStage, transfer::TransferReportSnapshot};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "skylift", version = "0.1.0", about = "Data center to cloud migration tool")]
struct Cli {
    #[arg(long, global = true, help = "Settings file (JSON)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "File with SKYLIFT_* variable overrides")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = Shutdown::listen();

    let exit = match run(cli, &shutdown).await {
        Ok(()) => Exit::Success,
        Err(CliError::ShutdownRequested) => Exit::Interrupted,
        Err(e) if shutdown.requested() => {
            warn!(error = %e, "Command interrupted");
            Exit::Interrupted
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            Exit::Failure
        }
    };
    exit.into()
}

async fn run(cli: Cli, shutdown: &Shutdown) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref(), cli.env_file.as_deref())?;

    match cli.command {
        Commands::Status { json } => {
            let service = open_migration_service(&settings, false)?;
            let migration = service.current_migration().await?;
            let context = service.current_context().await?;
            output::print_status(&migration, &context, json)?;
        }
        Commands::Reset => {
            let service = open_migration_service(&settings, false)?;
            let removed = service.delete_migrations().await?;
            println!("Removed {removed} migration record(s)");
        }
        Commands::Stage {
            command: StageCommand::Set { stage, force },
        } => {
            let stage = MigrationStage::from_str(&stage)?;
            let service = open_migration_service(&settings, force)?;
            set_stage(&service, stage).await?;
            println!("Migration is now in stage {stage}");
        }
        Commands::Copy {
            source,
            target,
            bucket,
            json,
        } => {
            let report = copy(&settings, &source, &target, &bucket, shutdown.token()).await;
            match report {
                Ok(report) => output::print_report(&report, json)?,
                Err(CopyError::Interrupted(report)) => {
                    output::print_report(&report, json)?;
                    return Err(CliError::ShutdownRequested);
                }
                Err(CopyError::Failed(e)) => return Err(e),
            }
        }
        Commands::Export { pg_dump, jobs } => {
            let dump = export(&settings, pg_dump, jobs).await?;
            println!("Database dumped to {}", dump.display());
        }
    }

    Ok(())
}

fn load_settings(
    config: Option<&Path>,
    env_file: Option<&Path>,
) -> Result<ValidatedSettings, CliError> {
    let mut settings = match config {
        Some(path) => MigrationSettings::from_file(path)?,
        None => MigrationSettings::default(),
    };

    let mut env = EnvVars::from_process();
    if let Some(path) = env_file {
        env.load_from_file(path)?;
    }
    settings.apply_env(&env)?;

    Ok(settings.validate()?)
}

fn open_migration_service(
    settings: &ValidatedSettings,
    allow_any: bool,
) -> Result<MigrationService, CliError> {
    let store = Arc::new(SledMigrationStore::open(settings.state_dir())?);
    Ok(if allow_any {
        MigrationService::allow_any_transition(store)
    } else {
        MigrationService::new(store)
    })
}

async fn set_stage(service: &MigrationService, stage: MigrationStage) -> Result<(), CliError> {
    if stage == MigrationStage::Error {
        service.error_with_cause(&"set by operator").await?;
    } else {
        service.transition(stage).await?;
    }
    Ok(())
}

enum CopyError {
    /// Stopped by a signal; carries the report of what was copied.
    Interrupted(TransferReportSnapshot),
    Failed(CliError),
}

async fn copy(
    settings: &ValidatedSettings,
    source: &Path,
    target: &Path,
    bucket: &str,
    cancel: CancellationToken,
) -> Result<TransferReportSnapshot, CopyError> {
    let config = UploaderConfig {
        max_in_flight: settings.max_concurrent_uploads(),
        multipart_threshold: settings.multipart_threshold_bytes(),
        part_size: settings.multipart_part_size_bytes,
        ..UploaderConfig::new(bucket)
    };
    let pipeline = TransferPipeline::new(Arc::new(LocalObjectStore::new(target)), config);

    info!(source = %source.display(), target = %target.display(), bucket, "Copying");
    let transfer = pipeline.transfer(source);
    tokio::pin!(transfer);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Stopping crawler; files already queued are still uploaded");
            pipeline.stop();
            transfer.await.map_err(|e| CopyError::Failed(e.into()))?;
            pipeline.report().mark_failed();
            Err(CopyError::Interrupted(pipeline.report().snapshot()))
        }
        result = &mut transfer => result.map_err(|e| CopyError::Failed(e.into())),
    }
}

async fn export(
    settings: &ValidatedSettings,
    pg_dump: PathBuf,
    jobs: usize,
) -> Result<PathBuf, CliError> {
    let database_url = settings
        .database_url
        .clone()
        .ok_or(CliError::MissingSetting("database_url"))?;
    let extractor = PgDumpExtractor::new(database_url)
        .with_program(pg_dump)
        .with_jobs(jobs);
    Ok(extractor.dump(&settings.dump_dir).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_runtime::error::ExtractError;
    use model::transfer::TransferStatus;

    fn settings(state: &Path) -> ValidatedSettings {
        MigrationSettings {
            state_dir: Some(state.to_path_buf()),
            ..MigrationSettings::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn copy_writes_every_file_into_the_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("a.txt"), b"a").unwrap();
        std::fs::write(source.join("nested/b.txt"), b"b").unwrap();
        let target = dir.path().join("target");

        let result = copy(
            &settings(&dir.path().join("state")),
            &source,
            &target,
            "backup",
            CancellationToken::new(),
        )
        .await;

        let Ok(report) = result else {
            panic!("copy failed");
        };
        assert_eq!(report.completed, 2);
        assert_eq!(
            std::fs::read(target.join("backup/nested/b.txt")).unwrap(),
            b"b"
        );
    }

    #[tokio::test]
    async fn interrupted_copy_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("nested/a.txt"), b"a").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = copy(
            &settings(&dir.path().join("state")),
            &source,
            &dir.path().join("target"),
            "backup",
            cancel,
        )
        .await;

        let Err(CopyError::Interrupted(report)) = result else {
            panic!("copy was not interrupted");
        };
        assert_eq!(report.status, TransferStatus::Failed);
        assert!(report.completed_at.is_some());
    }

    #[tokio::test]
    async fn export_needs_a_database_url() {
        let dir = tempfile::tempdir().unwrap();
        let err = export(&settings(dir.path()), PathBuf::from("pg_dump"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::MissingSetting("database_url")));

        let settings = MigrationSettings {
            state_dir: Some(dir.path().to_path_buf()),
            database_url: Some("postgres://localhost/jira".into()),
            ..MigrationSettings::default()
        }
        .validate()
        .unwrap();
        let err = export(&settings, dir.path().join("no-such-pg_dump"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Export(ExtractError::Spawn { .. })));
    }

    #[tokio::test]
    async fn forced_stage_skips_validation() {
        let enforced_dir = tempfile::tempdir().unwrap();
        let enforced = open_migration_service(&settings(enforced_dir.path()), false).unwrap();
        assert!(matches!(
            set_stage(&enforced, MigrationStage::Validate).await,
            Err(CliError::Stage(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let service = open_migration_service(&settings(dir.path()), true).unwrap();
        set_stage(&service, MigrationStage::Validate).await.unwrap();
        assert_eq!(
            service.current_stage().await.unwrap(),
            MigrationStage::Validate
        );
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "skylift",
            "stage",
            "set",
            "fs_migration_copy",
            "--force",
            "--config",
            "settings.json",
        ])
        .unwrap();

        assert_eq!(cli.config.as_deref(), Some(Path::new("settings.json")));
        assert!(matches!(
            cli.command,
            Commands::Stage {
                command: StageCommand::Set { force: true, .. }
            }
        ));
    }
}
