use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The other side of the transfer queue went away before end-of-stream.
    #[error("Transfer queue was closed before the stream finished")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Crawl root {path} is not accessible: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Crawl root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A structural failure that aborts a whole transfer run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Crawler failed: {0}")]
    Crawl(#[source] CrawlError),

    #[error("Uploader failed: {0}")]
    Upload(#[source] UploadError),

    #[error("Transfer task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Unknown multipart upload '{0}'")]
    UnknownUpload(String),

    /// Throttling or a dropped connection; the call may be repeated.
    #[error("Transient object store failure: {0}")]
    Transient(String),

    #[error("Object store rejected the request: {0}")]
    Rejected(String),
}

impl ObjectStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Transient(_))
    }
}

/// Failure reported by a remote control-plane collaborator.
#[derive(Error, Debug, Clone)]
pub enum RemoteCallError {
    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote call rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Cannot start {operation}: {reason}")]
    CannotStart { operation: String, reason: String },

    #[error("{operation} was unsuccessful: {reason}")]
    Unsuccessful { operation: String, reason: String },

    #[error("{operation} did not reach a terminal state after {waited}")]
    TimedOut { operation: String, waited: String },

    #[error("Could not process the result of {operation}: {reason}")]
    ResultProcessing { operation: String, reason: String },

    #[error("Status query for {operation} failed: {source}")]
    Query {
        operation: String,
        #[source]
        source: RemoteCallError,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },
}
