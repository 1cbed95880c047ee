use crate::env::EnvVars;
use error::SettingsError;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::{debug, info};
use validated::ValidatedSettings;

pub mod error;
pub mod validated;

pub const ENV_SHARED_HOME: &str = "SKYLIFT_SHARED_HOME";
pub const ENV_BUCKET: &str = "SKYLIFT_BUCKET";
pub const ENV_STATE_DIR: &str = "SKYLIFT_STATE_DIR";
pub const ENV_MAX_CONCURRENT_UPLOADS: &str = "SKYLIFT_MAX_CONCURRENT_UPLOADS";
pub const ENV_INSTANCE_ID: &str = "SKYLIFT_INSTANCE_ID";
pub const ENV_DATABASE_URL: &str = "SKYLIFT_DATABASE_URL";

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Raw settings as written in the JSON settings file. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub shared_home: Option<PathBuf>,
    pub bucket: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub dump_dir: Option<PathBuf>,
    pub application_template_url: Option<String>,
    pub migration_template_url: Option<String>,
    pub instance_id: Option<String>,
    pub database_url: Option<String>,

    pub max_concurrent_uploads: usize,
    pub multipart_threshold_bytes: u64,
    pub multipart_part_size_bytes: u64,

    pub stack_poll_interval_secs: u64,
    pub stack_timeout_secs: u64,
    pub command_poll_attempts: usize,
    pub command_poll_interval_secs: u64,
    pub command_timeout_secs: u64,
    pub fs_download_poll_interval_secs: u64,
    pub fs_download_timeout_secs: u64,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            shared_home: None,
            bucket: None,
            state_dir: None,
            dump_dir: None,
            application_template_url: None,
            migration_template_url: None,
            instance_id: None,
            database_url: None,
            max_concurrent_uploads: 50,
            multipart_threshold_bytes: 5 * GIB,
            multipart_part_size_bytes: 100 * MIB,
            stack_poll_interval_secs: 30,
            stack_timeout_secs: 60 * 60,
            command_poll_attempts: 10,
            command_poll_interval_secs: 1,
            command_timeout_secs: 600,
            fs_download_poll_interval_secs: 5 * 60,
            fs_download_timeout_secs: 12 * 60 * 60,
        }
    }
}

impl MigrationSettings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "Loaded migration settings");
        Ok(settings)
    }

    /// Overlay the `SKYLIFT_*` variables found in `env` onto these settings.
    pub fn apply_env(&mut self, env: &EnvVars) -> Result<(), SettingsError> {
        if let Some(v) = env.get(ENV_SHARED_HOME) {
            self.shared_home = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get(ENV_BUCKET) {
            self.bucket = Some(v.to_string());
        }
        if let Some(v) = env.get(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get(ENV_INSTANCE_ID) {
            self.instance_id = Some(v.to_string());
        }
        if let Some(v) = env.get(ENV_DATABASE_URL) {
            self.database_url = Some(v.to_string());
        }
        if let Some(v) = env.get(ENV_MAX_CONCURRENT_UPLOADS) {
            self.max_concurrent_uploads = parse_override(ENV_MAX_CONCURRENT_UPLOADS, v)?;
        }

        debug!(?self, "Applied environment overrides");
        Ok(())
    }

    pub fn validate(self) -> Result<ValidatedSettings, SettingsError> {
        if self.max_concurrent_uploads == 0 {
            return Err(invalid("max_concurrent_uploads", "must be at least 1"));
        }
        if self.multipart_part_size_bytes == 0 {
            return Err(invalid("multipart_part_size_bytes", "must be positive"));
        }
        if self.multipart_part_size_bytes > self.multipart_threshold_bytes {
            return Err(invalid(
                "multipart_part_size_bytes",
                "must not exceed multipart_threshold_bytes",
            ));
        }
        if self.command_poll_attempts == 0 {
            return Err(invalid("command_poll_attempts", "must be at least 1"));
        }
        check_window(
            "stack_timeout_secs",
            self.stack_poll_interval_secs,
            self.stack_timeout_secs,
        )?;
        check_window(
            "fs_download_timeout_secs",
            self.fs_download_poll_interval_secs,
            self.fs_download_timeout_secs,
        )?;

        let state_dir = match self.state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        let dump_dir = self
            .dump_dir
            .unwrap_or_else(|| state_dir.join("db-dump"));

        Ok(ValidatedSettings {
            shared_home: self.shared_home,
            bucket: self.bucket,
            state_dir,
            dump_dir,
            application_template_url: self.application_template_url,
            migration_template_url: self.migration_template_url,
            instance_id: self.instance_id,
            database_url: self.database_url,
            max_concurrent_uploads: self.max_concurrent_uploads,
            multipart_threshold_bytes: self.multipart_threshold_bytes,
            multipart_part_size_bytes: self.multipart_part_size_bytes,
            stack_poll_interval: Duration::from_secs(self.stack_poll_interval_secs),
            stack_timeout: Duration::from_secs(self.stack_timeout_secs),
            command_poll_attempts: self.command_poll_attempts,
            command_poll_interval: Duration::from_secs(self.command_poll_interval_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            fs_download_poll_interval: Duration::from_secs(self.fs_download_poll_interval_secs),
            fs_download_timeout: Duration::from_secs(self.fs_download_timeout_secs),
        })
    }
}

/// `~/.skylift/state`
pub fn default_state_dir() -> Result<PathBuf, SettingsError> {
    dirs::home_dir()
        .map(|home| home.join(".skylift").join("state"))
        .ok_or(SettingsError::NoHomeDirectory)
}

fn parse_override<T>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| SettingsError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn check_window(field: &'static str, interval: u64, timeout: u64) -> Result<(), SettingsError> {
    if interval == 0 {
        return Err(invalid(field, "poll interval must be positive"));
    }
    if timeout < interval {
        return Err(invalid(field, "must be at least one poll interval"));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_migration_constants() {
        let settings = MigrationSettings::default();
        assert_eq!(settings.max_concurrent_uploads, 50);
        assert_eq!(settings.multipart_threshold_bytes, 5 * GIB);
        assert_eq!(settings.multipart_part_size_bytes, 100 * MIB);
        assert_eq!(settings.stack_poll_interval_secs, 30);
        assert_eq!(settings.command_poll_attempts, 10);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bucket": "b1", "max_concurrent_uploads": 8}}"#).unwrap();

        let settings = MigrationSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.bucket.as_deref(), Some("b1"));
        assert_eq!(settings.max_concurrent_uploads, 8);
        assert_eq!(settings.command_timeout_secs, 600);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut settings = MigrationSettings {
            bucket: Some("from-file".into()),
            ..Default::default()
        };
        let mut env = EnvVars::empty();
        env.set(ENV_BUCKET, "from-env");
        env.set(ENV_MAX_CONCURRENT_UPLOADS, "12");
        env.set(ENV_STATE_DIR, "/tmp/skylift-state");

        settings.apply_env(&env).unwrap();
        let validated = settings.validate().unwrap();
        assert_eq!(validated.bucket.as_deref(), Some("from-env"));
        assert_eq!(validated.max_concurrent_uploads(), 12);
        assert_eq!(validated.dump_dir, PathBuf::from("/tmp/skylift-state/db-dump"));
    }

    #[test]
    fn bad_numeric_override_is_reported() {
        let mut env = EnvVars::empty();
        env.set(ENV_MAX_CONCURRENT_UPLOADS, "lots");
        let err = MigrationSettings::default().apply_env(&env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidOverride { .. }));
    }

    #[test]
    fn rejects_zero_concurrency_and_oversized_parts() {
        let settings = MigrationSettings {
            max_concurrent_uploads: 0,
            state_dir: Some("/tmp".into()),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = MigrationSettings {
            multipart_part_size_bytes: 10 * GIB,
            state_dir: Some("/tmp".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "multipart_part_size_bytes",
                ..
            })
        ));
    }
}
