use crate::error::ExtractError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

pub const DUMP_DIR_NAME: &str = "db.dump";

/// Produces a database export on local disk.
#[async_trait]
pub trait DatabaseExtractor: Send + Sync {
    /// Dumps the database under `dir` and returns the dump location.
    async fn dump(&self, dir: &Path) -> Result<PathBuf, ExtractError>;
}

/// Runs `pg_dump` in directory format.
#[derive(Debug, Clone)]
pub struct PgDumpExtractor {
    database_url: String,
    program: PathBuf,
    jobs: usize,
}

impl PgDumpExtractor {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            program: PathBuf::from("pg_dump"),
            jobs: 4,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    fn command(&self, target: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-owner")
            .arg("--no-acl")
            .arg("--compress=9")
            .arg("--format=directory")
            .arg("--jobs")
            .arg(self.jobs.to_string())
            .arg("--file")
            .arg(target)
            .arg("--dbname")
            .arg(&self.database_url)
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl DatabaseExtractor for PgDumpExtractor {
    async fn dump(&self, dir: &Path) -> Result<PathBuf, ExtractError> {
        let prepare = |source| ExtractError::Prepare {
            path: dir.to_path_buf(),
            source,
        };

        let target = dir.join(DUMP_DIR_NAME);
        if tokio::fs::try_exists(&target).await.map_err(prepare)? {
            debug!(target = %target.display(), "Removing previous dump");
            tokio::fs::remove_dir_all(&target).await.map_err(prepare)?;
        }
        tokio::fs::create_dir_all(dir).await.map_err(prepare)?;

        let program = self.program.display().to_string();
        info!(program = %program, target = %target.display(), jobs = self.jobs, "Starting database dump");

        let output = self
            .command(&target)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                program,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(target = %target.display(), "Database dump finished");
        Ok(target)
    }
}
