use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a command executed on a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Delayed,
    Success,
    Cancelled,
    TimedOut,
    Failed,
    Cancelling,
}

impl CommandStatus {
    pub fn is_success(self) -> bool {
        self == CommandStatus::Success
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            CommandStatus::Cancelled | CommandStatus::TimedOut | CommandStatus::Failed
        )
    }

    pub fn is_terminal(self) -> bool {
        self.is_success() || self.is_failure()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "Pending",
            CommandStatus::InProgress => "InProgress",
            CommandStatus::Delayed => "Delayed",
            CommandStatus::Success => "Success",
            CommandStatus::Cancelled => "Cancelled",
            CommandStatus::TimedOut => "TimedOut",
            CommandStatus::Failed => "Failed",
            CommandStatus::Cancelling => "Cancelling",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// Status of a provisioned cloud stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    RollbackInProgress,
    RollbackComplete,
    RollbackFailed,
}

impl StackStatus {
    pub fn is_complete(self) -> bool {
        self == StackStatus::CreateComplete
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            StackStatus::CreateFailed | StackStatus::RollbackComplete | StackStatus::RollbackFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            StackStatus::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// Progress payload printed by the download status command on the migration host.
///
/// Every field is optional: a payload that omits one is indeterminate rather
/// than malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncCommandStatus {
    #[serde(default)]
    pub finished: Option<bool>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<SyncProgress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    #[serde(default)]
    pub progress: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub files_remaining: Option<u64>,
    #[serde(default, rename = "isCalculating")]
    pub is_calculating: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Indeterminate,
    InProgress,
    Succeeded,
    Failed(String),
}

impl SyncCommandStatus {
    pub fn outcome(&self) -> SyncOutcome {
        let errors = self.errors.as_deref().unwrap_or_default();
        match (self.finished, self.code) {
            (None, _) => SyncOutcome::Indeterminate,
            (Some(false), _) => SyncOutcome::InProgress,
            (Some(true), Some(0)) if errors.is_empty() => SyncOutcome::Succeeded,
            (Some(true), None) if errors.is_empty() => SyncOutcome::Indeterminate,
            (Some(true), code) => SyncOutcome::Failed(format!(
                "exit code {}, errors: [{}]",
                code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                errors.join("; ")
            )),
        }
    }
}
