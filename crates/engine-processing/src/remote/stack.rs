use crate::{
    error::{OperationError, RemoteCallError},
    remote::poller::{OperationStatus, RemoteOperation},
};
use async_trait::async_trait;
use model::remote::StackStatus;
use std::{collections::HashMap, sync::Arc};

pub const OUTPUT_DOWNLOAD_DOCUMENT: &str = "DownloadSSMDocument";
pub const OUTPUT_DOWNLOAD_STATUS_DOCUMENT: &str = "DownloadStatusSSMDocument";
pub const OUTPUT_RESTORE_DOCUMENT: &str = "RdsRestoreSSMDocument";
pub const OUTPUT_MIGRATION_BUCKET: &str = "MigrationBucket";
pub const OUTPUT_HOST_INSTANCE_ID: &str = "MigrationHostInstanceId";

/// Cloud stack provisioning.
#[async_trait]
pub trait StackProvisioner: Send + Sync {
    /// Requests creation of `name`. `None` means the request was not accepted.
    async fn provision_stack(
        &self,
        template_url: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<Option<String>, RemoteCallError>;

    async fn stack_status(&self, name: &str) -> Result<StackStatus, RemoteCallError>;

    async fn stack_outputs(&self, name: &str) -> Result<HashMap<String, String>, RemoteCallError>;
}

/// Creates a stack and waits for `CREATE_COMPLETE`. Its output is the stack id and outputs.
pub struct StackDeployment {
    provisioner: Arc<dyn StackProvisioner>,
    template_url: String,
    stack_name: String,
    params: HashMap<String, String>,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedStack {
    pub stack_id: String,
    pub outputs: HashMap<String, String>,
}

impl StackDeployment {
    pub fn new(
        provisioner: Arc<dyn StackProvisioner>,
        template_url: impl Into<String>,
        stack_name: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Self {
        let stack_name = stack_name.into();
        Self {
            provisioner,
            template_url: template_url.into(),
            name: format!("stack '{stack_name}'"),
            stack_name,
            params,
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }
}

#[async_trait]
impl RemoteOperation for StackDeployment {
    type Handle = String;
    type Status = ();
    type Output = DeployedStack;

    fn name(&self) -> &str {
        &self.name
    }

    async fn initiate(&self) -> Result<String, OperationError> {
        let cannot_start = |reason: String| OperationError::CannotStart {
            operation: self.name.clone(),
            reason,
        };

        self.provisioner
            .provision_stack(&self.template_url, &self.stack_name, &self.params)
            .await
            .map_err(|e| cannot_start(e.to_string()))?
            .ok_or_else(|| cannot_start("provisioning request returned no stack id".into()))
    }

    async fn status(&self, _stack_id: &String) -> Result<OperationStatus<()>, RemoteCallError> {
        let status = self.provisioner.stack_status(&self.stack_name).await?;
        Ok(if status.is_complete() {
            OperationStatus::Succeeded(())
        } else if status.is_failed() {
            OperationStatus::Failed(format!("stack {} reached {status}", self.stack_name))
        } else {
            OperationStatus::Running
        })
    }

    async fn handle_success(
        &self,
        stack_id: &String,
        _status: (),
    ) -> Result<DeployedStack, OperationError> {
        let outputs = self
            .provisioner
            .stack_outputs(&self.stack_name)
            .await
            .map_err(|e| OperationError::ResultProcessing {
                operation: self.name.clone(),
                reason: format!("could not read stack outputs: {e}"),
            })?;

        Ok(DeployedStack {
            stack_id: stack_id.clone(),
            outputs,
        })
    }
}

/// Outputs of the migration helper stack that later phases depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperStackOutputs {
    pub download_document: String,
    pub download_status_document: String,
    pub restore_document: String,
    pub migration_bucket: String,
    pub host_instance_id: String,
}

impl HelperStackOutputs {
    pub fn from_outputs(
        stack_name: &str,
        outputs: &HashMap<String, String>,
    ) -> Result<Self, OperationError> {
        let require = |key: &str| {
            outputs
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| OperationError::ResultProcessing {
                    operation: format!("stack '{stack_name}'"),
                    reason: format!("missing stack output {key}"),
                })
        };

        Ok(Self {
            download_document: require(OUTPUT_DOWNLOAD_DOCUMENT)?,
            download_status_document: require(OUTPUT_DOWNLOAD_STATUS_DOCUMENT)?,
            restore_document: require(OUTPUT_RESTORE_DOCUMENT)?,
            migration_bucket: require(OUTPUT_MIGRATION_BUCKET)?,
            host_instance_id: require(OUTPUT_HOST_INSTANCE_ID)?,
        })
    }
}

/// Name of the helper stack deployed next to an application stack.
pub fn helper_stack_name(application_stack: &str) -> String {
    format!("{application_stack}-migration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::poller::{PollStrategy, Poller};
    use std::{sync::Mutex, time::Duration};

    struct FakeProvisioner {
        accept: bool,
        statuses: Mutex<Vec<StackStatus>>,
        outputs: HashMap<String, String>,
    }

    #[async_trait]
    impl StackProvisioner for FakeProvisioner {
        async fn provision_stack(
            &self,
            _template_url: &str,
            name: &str,
            _params: &HashMap<String, String>,
        ) -> Result<Option<String>, RemoteCallError> {
            Ok(self.accept.then(|| format!("arn:stack/{name}")))
        }

        async fn stack_status(&self, _name: &str) -> Result<StackStatus, RemoteCallError> {
            let mut statuses = self.statuses.lock().unwrap();
            Ok(if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            })
        }

        async fn stack_outputs(
            &self,
            _name: &str,
        ) -> Result<HashMap<String, String>, RemoteCallError> {
            Ok(self.outputs.clone())
        }
    }

    fn provisioner(accept: bool, statuses: Vec<StackStatus>) -> Arc<FakeProvisioner> {
        Arc::new(FakeProvisioner {
            accept,
            statuses: Mutex::new(statuses),
            outputs: HashMap::from([(OUTPUT_MIGRATION_BUCKET.to_string(), "bucket-1".to_string())]),
        })
    }

    fn poller() -> Poller {
        Poller::new(PollStrategy::Deadline {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(3600),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn waits_through_in_progress_to_complete() {
        let deployment = StackDeployment::new(
            provisioner(true, vec![StackStatus::CreateInProgress, StackStatus::CreateComplete]),
            "https://templates/helper.yml",
            helper_stack_name("app"),
            HashMap::new(),
        );

        let stack = poller().run(&deployment).await.unwrap();
        assert_eq!(stack.stack_id, "arn:stack/app-migration");
        assert_eq!(stack.outputs[OUTPUT_MIGRATION_BUCKET], "bucket-1");
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_is_a_failure() {
        let deployment = StackDeployment::new(
            provisioner(
                true,
                vec![StackStatus::RollbackInProgress, StackStatus::RollbackComplete],
            ),
            "url",
            "app",
            HashMap::new(),
        );

        let err = poller().run(&deployment).await.unwrap_err();
        assert!(matches!(err, OperationError::Unsuccessful { ref reason, .. } if reason.contains("ROLLBACK_COMPLETE")));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_stack_id_cannot_start() {
        let deployment =
            StackDeployment::new(provisioner(false, vec![StackStatus::CreateComplete]), "url", "app", HashMap::new());
        let err = poller().run(&deployment).await.unwrap_err();
        assert!(matches!(err, OperationError::CannotStart { .. }));
    }

    #[test]
    fn missing_helper_output_is_a_processing_error() {
        let outputs = HashMap::from([(OUTPUT_MIGRATION_BUCKET.to_string(), "b".to_string())]);
        let err = HelperStackOutputs::from_outputs("app-migration", &outputs).unwrap_err();
        assert!(
            matches!(err, OperationError::ResultProcessing { ref reason, .. } if reason.contains(OUTPUT_DOWNLOAD_DOCUMENT))
        );
    }
}
