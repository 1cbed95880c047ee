use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Show the persisted migration stage and context
    Status {
        #[arg(long, help = "Print the status as JSON instead of a table")]
        json: bool,
    },
    /// Remove the migration record and its context
    Reset,
    Stage {
        #[command(subcommand)]
        command: StageCommand,
    },
    /// Copy a directory tree into a local object store
    Copy {
        #[arg(long, help = "Directory to copy")]
        source: PathBuf,

        #[arg(long, help = "Object store root; each bucket is a sub-directory")]
        target: PathBuf,

        #[arg(long, default_value = "local", help = "Bucket to write into")]
        bucket: String,

        #[arg(long, help = "Print the report as JSON instead of a table")]
        json: bool,
    },
    /// Dump the source database into the configured dump directory
    Export {
        #[arg(long, default_value = "pg_dump", help = "pg_dump executable to run")]
        pg_dump: PathBuf,

        #[arg(long, default_value_t = 4, help = "Parallel dump jobs")]
        jobs: usize,
    },
}

#[derive(Subcommand)]
pub enum StageCommand {
    /// Move the migration to a stage
    Set {
        /// Stage key (`fs_migration_copy`) or name (`FS_MIGRATION_COPY`)
        stage: String,

        #[arg(long, help = "Skip predecessor validation")]
        force: bool,
    },
}
