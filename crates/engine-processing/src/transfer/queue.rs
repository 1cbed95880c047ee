use crate::error::QueueError;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug)]
enum QueueMessage {
    Item(PathBuf),
    Finished,
}

/// Creates a bounded transfer queue. `put` waits while `capacity` items are
/// waiting to be taken.
pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx, finished: false })
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<QueueMessage>,
}

impl QueueSender {
    pub async fn put(&self, item: PathBuf) -> Result<(), QueueError> {
        self.tx
            .send(QueueMessage::Item(item))
            .await
            .map_err(|_| QueueError::Disconnected)
    }

    /// Signals end-of-stream. A receiver that is already gone needs no signal.
    pub async fn finish(&self) {
        let _ = self.tx.send(QueueMessage::Finished).await;
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueueMessage>,
    finished: bool,
}

impl QueueReceiver {
    /// Next item, or `None` once the producer called `finish`.
    pub async fn take(&mut self) -> Result<Option<PathBuf>, QueueError> {
        if self.finished {
            return Ok(None);
        }

        match self.rx.recv().await {
            Some(QueueMessage::Item(path)) => Ok(Some(path)),
            Some(QueueMessage::Finished) => {
                self.finished = true;
                self.rx.close();
                Ok(None)
            }
            None => Err(QueueError::Disconnected),
        }
    }
}
