use crate::{
    error::{OperationError, RemoteCallError},
    remote::poller::{OperationStatus, RemoteOperation},
};
use async_trait::async_trait;
use model::remote::CommandStatus;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, marker::PhantomData, sync::Arc, time::Duration};

/// Result of one command invocation on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Runs named documents (scripts) on remote hosts.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Returns the command id used for status queries.
    async fn run_document(
        &self,
        document: &str,
        target: &str,
        params: &HashMap<String, Vec<String>>,
        timeout: Duration,
    ) -> Result<String, RemoteCallError>;

    async fn command_status(
        &self,
        command_id: &str,
        target: &str,
    ) -> Result<CommandInvocation, RemoteCallError>;
}

/// Turns the stdout of a successful command into a phase result.
pub trait CommandOutput: Send + Sync {
    type Output: Send;

    fn interpret(&self, invocation: CommandInvocation) -> Result<Self::Output, String>;
}

/// Accepts any successful command and keeps its stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureSuccess;

impl CommandOutput for EnsureSuccess {
    type Output = String;

    fn interpret(&self, invocation: CommandInvocation) -> Result<String, String> {
        Ok(invocation.stdout)
    }
}

/// Parses stdout as a JSON document.
#[derive(Debug)]
pub struct ParseJson<T>(PhantomData<fn() -> T>);

impl<T> Default for ParseJson<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: DeserializeOwned + Send> CommandOutput for ParseJson<T> {
    type Output = T;

    fn interpret(&self, invocation: CommandInvocation) -> Result<T, String> {
        serde_json::from_str(invocation.stdout.trim()).map_err(|e| {
            format!("unparseable command output '{}': {e}", invocation.stdout.trim())
        })
    }
}

/// A document execution on one host, polled until the command reaches a terminal status.
pub struct RemoteCommand<H> {
    executor: Arc<dyn CommandExecutor>,
    name: String,
    document: String,
    target: String,
    timeout: Duration,
    output: H,
}

impl<H: CommandOutput> RemoteCommand<H> {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        document: impl Into<String>,
        target: impl Into<String>,
        output: H,
    ) -> Self {
        let document = document.into();
        Self {
            executor,
            name: format!("command '{document}'"),
            document,
            target: target.into(),
            timeout: Duration::from_secs(600),
            output,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<H: CommandOutput> RemoteOperation for RemoteCommand<H> {
    type Handle = String;
    type Status = CommandInvocation;
    type Output = H::Output;

    fn name(&self) -> &str {
        &self.name
    }

    async fn initiate(&self) -> Result<String, OperationError> {
        self.executor
            .run_document(&self.document, &self.target, &HashMap::new(), self.timeout)
            .await
            .map_err(|e| OperationError::CannotStart {
                operation: self.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn status(
        &self,
        command_id: &String,
    ) -> Result<OperationStatus<CommandInvocation>, RemoteCallError> {
        let invocation = self
            .executor
            .command_status(command_id, &self.target)
            .await?;

        let status = invocation.status;
        Ok(if status.is_success() {
            OperationStatus::Succeeded(invocation)
        } else if status.is_failure() {
            OperationStatus::Failed(format!(
                "command {command_id} on {} finished with status {status}: {}",
                self.target,
                invocation.stderr.trim()
            ))
        } else {
            OperationStatus::Running
        })
    }

    async fn handle_success(
        &self,
        _command_id: &String,
        invocation: CommandInvocation,
    ) -> Result<H::Output, OperationError> {
        self.output
            .interpret(invocation)
            .map_err(|reason| OperationError::ResultProcessing {
                operation: self.name.clone(),
                reason,
            })
    }
}
