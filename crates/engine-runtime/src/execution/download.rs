use async_trait::async_trait;
use engine_processing::{
    error::{OperationError, RemoteCallError},
    remote::{
        command::{ParseJson, RemoteCommand},
        poller::{OperationStatus, Poller, RemoteOperation},
    },
};
use model::remote::{SyncCommandStatus, SyncOutcome};
use tracing::{debug, info};

/// Progress of the target-side filesystem download.
///
/// Each status query runs the status document on the migration host and waits
/// for it with `query_poller`. A query that fails for any reason counts as a
/// transient failure of this operation; the outer poller's breaker decides when
/// to give up.
pub struct DownloadProgress {
    query: RemoteCommand<ParseJson<SyncCommandStatus>>,
    query_poller: Poller,
    target: String,
    name: String,
}

impl DownloadProgress {
    pub fn new(
        query: RemoteCommand<ParseJson<SyncCommandStatus>>,
        query_poller: Poller,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self {
            query,
            query_poller,
            name: format!("filesystem download on {target}"),
            target,
        }
    }
}

#[async_trait]
impl RemoteOperation for DownloadProgress {
    type Handle = String;
    type Status = SyncCommandStatus;
    type Output = SyncCommandStatus;

    fn name(&self) -> &str {
        &self.name
    }

    /// The download has already been launched; the handle is the host it runs on.
    async fn initiate(&self) -> Result<String, OperationError> {
        Ok(self.target.clone())
    }

    async fn status(
        &self,
        _target: &String,
    ) -> Result<OperationStatus<SyncCommandStatus>, RemoteCallError> {
        let status = self
            .query_poller
            .run(&self.query)
            .await
            .map_err(|e| RemoteCallError::Transient(e.to_string()))?;

        if let Some(progress) = &status.status {
            debug!(
                progress = ?progress.progress,
                total = ?progress.total,
                files_remaining = ?progress.files_remaining,
                "Download progress"
            );
        }

        Ok(match status.outcome() {
            SyncOutcome::Indeterminate | SyncOutcome::InProgress => OperationStatus::Running,
            SyncOutcome::Succeeded => OperationStatus::Succeeded(status),
            SyncOutcome::Failed(reason) => OperationStatus::Failed(reason),
        })
    }

    async fn handle_success(
        &self,
        target: &String,
        status: SyncCommandStatus,
    ) -> Result<SyncCommandStatus, OperationError> {
        info!(target = %target, "Filesystem download complete");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_processing::remote::{
        command::{CommandExecutor, CommandInvocation},
        poller::PollStrategy,
    };
    use model::remote::CommandStatus;
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };

    /// Answers each status document run with the next scripted stdout.
    struct ScriptedStatus {
        stdout: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl CommandExecutor for ScriptedStatus {
        async fn run_document(
            &self,
            _document: &str,
            _target: &str,
            _params: &HashMap<String, Vec<String>>,
            _timeout: Duration,
        ) -> Result<String, RemoteCallError> {
            Ok("status-cmd".into())
        }

        async fn command_status(
            &self,
            _command_id: &str,
            _target: &str,
        ) -> Result<CommandInvocation, RemoteCallError> {
            let mut stdout = self.stdout.lock().unwrap();
            let next = if stdout.len() > 1 {
                stdout.remove(0)
            } else {
                stdout[0]
            };
            Ok(CommandInvocation {
                status: CommandStatus::Success,
                stdout: next.to_string(),
                stderr: String::new(),
            })
        }
    }

    fn progress(stdout: Vec<&'static str>) -> DownloadProgress {
        let executor = Arc::new(ScriptedStatus {
            stdout: Mutex::new(stdout),
        });
        let query = RemoteCommand::new(executor, "download-status", "i-1", ParseJson::default());
        let query_poller = Poller::new(PollStrategy::Attempts {
            max_attempts: 3,
            interval: Duration::from_secs(1),
        });
        DownloadProgress::new(query, query_poller, "i-1")
    }

    fn outer() -> Poller {
        Poller::new(PollStrategy::Deadline {
            interval: Duration::from_secs(300),
            timeout: Duration::from_secs(12 * 3600),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn indeterminate_payloads_keep_polling() {
        let op = progress(vec![
            "{}",
            r#"{"finished": false, "status": {"progress": 10, "total": 20}}"#,
            r#"{"finished": true}"#,
            r#"{"finished": true, "code": 0, "errors": []}"#,
        ]);

        let status = outer().run(&op).await.unwrap();
        assert_eq!(status.code, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_with_errors_fails() {
        let op = progress(vec![
            r#"{"finished": true, "code": 1, "errors": ["access denied"]}"#,
        ]);

        let err = outer().run(&op).await.unwrap_err();
        match err {
            OperationError::Unsuccessful { reason, .. } => {
                assert!(reason.contains("access denied"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_finishing_download_times_out() {
        let op = progress(vec![r#"{"finished": false}"#]);

        let err = outer().run(&op).await.unwrap_err();
        assert!(matches!(err, OperationError::TimedOut { .. }));
    }
}
