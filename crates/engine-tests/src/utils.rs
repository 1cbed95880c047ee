#![allow(dead_code)]

use async_trait::async_trait;
use engine_processing::{
    error::{ObjectStoreError, RemoteCallError},
    remote::command::{CommandExecutor, CommandInvocation},
    remote::stack::StackProvisioner,
    transfer::{
        local::LocalObjectStore,
        store::{CompletedPart, ObjectStore, PutResult},
    },
};
use engine_runtime::{error::ExtractError, extract::DatabaseExtractor, extract::DUMP_DIR_NAME};
use model::remote::{CommandStatus, StackStatus};
use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};
use tokio::sync::Semaphore;

/// Replays status answers per document; the last answer repeats.
#[derive(Default)]
pub struct ScriptedCommands {
    answers: Mutex<HashMap<String, VecDeque<CommandInvocation>>>,
    launched: Mutex<Vec<(String, String)>>,
}

impl ScriptedCommands {
    pub fn script(self, document: &str, answers: Vec<CommandInvocation>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(document.to_string(), answers.into());
        self
    }

    /// `(document, target)` for every launched command, in order.
    pub fn launched(&self) -> Vec<(String, String)> {
        self.launched.lock().unwrap().clone()
    }
}

pub fn success(stdout: &str) -> CommandInvocation {
    CommandInvocation {
        status: CommandStatus::Success,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn in_progress() -> CommandInvocation {
    CommandInvocation {
        status: CommandStatus::InProgress,
        stdout: String::new(),
        stderr: String::new(),
    }
}

pub fn failed(stderr: &str) -> CommandInvocation {
    CommandInvocation {
        status: CommandStatus::Failed,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl CommandExecutor for ScriptedCommands {
    async fn run_document(
        &self,
        document: &str,
        target: &str,
        _params: &HashMap<String, Vec<String>>,
        _timeout: Duration,
    ) -> Result<String, RemoteCallError> {
        if !self.answers.lock().unwrap().contains_key(document) {
            return Err(RemoteCallError::Rejected(format!("unknown document {document}")));
        }
        let mut launched = self.launched.lock().unwrap();
        launched.push((document.to_string(), target.to_string()));
        Ok(format!("{document}#{}", launched.len()))
    }

    async fn command_status(
        &self,
        command_id: &str,
        _target: &str,
    ) -> Result<CommandInvocation, RemoteCallError> {
        let document = command_id.split('#').next().unwrap_or_default();
        let mut answers = self.answers.lock().unwrap();
        let queue = answers
            .get_mut(document)
            .ok_or_else(|| RemoteCallError::Rejected(format!("unknown command {command_id}")))?;
        let answer = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        answer.ok_or_else(|| RemoteCallError::Transient("no status yet".into()))
    }
}

/// Stacks that walk through scripted statuses and then expose fixed outputs.
#[derive(Default)]
pub struct ScriptedStacks {
    statuses: Mutex<HashMap<String, VecDeque<StackStatus>>>,
    outputs: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl ScriptedStacks {
    pub fn stack(
        self,
        name: &str,
        statuses: Vec<StackStatus>,
        outputs: HashMap<String, String>,
    ) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(name.to_string(), statuses.into());
        self.outputs
            .lock()
            .unwrap()
            .insert(name.to_string(), outputs);
        self
    }
}

#[async_trait]
impl StackProvisioner for ScriptedStacks {
    async fn provision_stack(
        &self,
        _template_url: &str,
        name: &str,
        _params: &HashMap<String, String>,
    ) -> Result<Option<String>, RemoteCallError> {
        let known = self.statuses.lock().unwrap().contains_key(name);
        Ok(known.then(|| format!("arn:aws:cloudformation:stack/{name}")))
    }

    async fn stack_status(&self, name: &str) -> Result<StackStatus, RemoteCallError> {
        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses
            .get_mut(name)
            .ok_or_else(|| RemoteCallError::Rejected(format!("no stack {name}")))?;
        let status = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        status.ok_or_else(|| RemoteCallError::Transient("stack not visible yet".into()))
    }

    async fn stack_outputs(&self, name: &str) -> Result<HashMap<String, String>, RemoteCallError> {
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Writes a small directory-format dump instead of running `pg_dump`.
pub struct FakeDump {
    pub files: Vec<(&'static str, &'static [u8])>,
}

#[async_trait]
impl DatabaseExtractor for FakeDump {
    async fn dump(&self, dir: &Path) -> Result<PathBuf, ExtractError> {
        let target = dir.join(DUMP_DIR_NAME);
        let prepare = |source| ExtractError::Prepare {
            path: target.clone(),
            source,
        };
        tokio::fs::create_dir_all(&target).await.map_err(prepare)?;
        for (name, body) in &self.files {
            tokio::fs::write(target.join(name), body)
                .await
                .map_err(prepare)?;
        }
        Ok(target)
    }
}

/// Dumps into a fixed directory of its own, ignoring the directory it is given.
pub struct RelocatedDump {
    pub target: PathBuf,
}

#[async_trait]
impl DatabaseExtractor for RelocatedDump {
    async fn dump(&self, _dir: &Path) -> Result<PathBuf, ExtractError> {
        let prepare = |source| ExtractError::Prepare {
            path: self.target.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.target).await.map_err(prepare)?;
        tokio::fs::write(self.target.join("toc.dat"), b"toc")
            .await
            .map_err(prepare)?;
        Ok(self.target.clone())
    }
}

/// Local object store whose writes wait until the gate is opened.
pub struct GatedStore {
    inner: LocalObjectStore,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalObjectStore::new(root),
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }

    async fn pass(&self) {
        let _permit = self.gate.acquire().await.unwrap();
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<PutResult, ObjectStoreError> {
        self.pass().await;
        self.inner.put_object(bucket, key, path).await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, ObjectStoreError> {
        self.pass().await;
        self.inner.create_multipart_upload(bucket, key).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, ObjectStoreError> {
        self.inner
            .upload_part(bucket, key, upload_id, part_number, body)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<PutResult, ObjectStoreError> {
        self.inner
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ObjectStoreError> {
        self.inner.abort_multipart_upload(bucket, key, upload_id).await
    }
}

/// Writes `count` one-line files into each of `dirs` (relative to `root`).
pub fn populate(root: &Path, dirs: &[&str], count: usize) -> usize {
    let mut written = 0;
    for dir in dirs {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            std::fs::write(dir.join(format!("attachment-{i}.bin")), format!("{i}\n")).unwrap();
            written += 1;
        }
    }
    written
}
