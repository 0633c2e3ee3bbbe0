// packages/executor/src/queue/line.rs
//! Newline-delimited task queue over any async reader
//!
//! The binary feeds stdin through this: one JSON envelope per line. Blank
//! lines are skipped and EOF closes the queue.

use crate::queue::TaskQueue;
use crate::utils::errors::{ExecutorError, Result};
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest accepted line (1 MiB)
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

type LineReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, LinesCodec>;

/// Line-oriented task queue
pub struct LineQueue {
    reader: Mutex<LineReader>,

    /// Messages pushed locally, served before the reader
    pending: SegQueue<Vec<u8>>,
}

impl LineQueue {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            reader: Mutex::new(FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            )),
            pending: SegQueue::new(),
        }
    }

    /// Queue over the process's stdin
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

#[async_trait]
impl TaskQueue for LineQueue {
    async fn next(&self) -> Result<Vec<u8>> {
        if let Some(message) = self.pending.pop() {
            return Ok(message);
        }

        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => return Ok(line.into_bytes()),
                // an oversized line is handed on so the consumer drops it as malformed
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => return Ok(Vec::new()),
                Some(Err(LinesCodecError::Io(e))) => return Err(ExecutorError::Io(e)),
                None => return Err(ExecutorError::QueueClosed),
            }
        }
    }

    async fn push(&self, message: Vec<u8>) -> Result<()> {
        self.pending.push(message);
        Ok(())
    }
}
