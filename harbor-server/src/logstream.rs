//! Job log streams
//!
//! Runners write terminal output for a job through a [`LogWriter`]; clients
//! follow it through a [`LogReader`]. Entries written before a reader
//! attaches are replayed to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use harbor_core::domain::log::LogEntry;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LogStreamError {
    #[error("log stream for job {0} already has an active writer")]
    WriterActive(Uuid),

    #[error("log stream for job {0} is closed")]
    Closed(Uuid),
}

pub trait LogWriter: Send {
    /// Buffers an entry until the next flush
    fn new_event(&mut self, entry: LogEntry);

    /// Publishes buffered entries to readers
    fn flush(&mut self) -> Result<(), LogStreamError>;

    /// Flushes and marks the stream finished
    fn close(&mut self) -> Result<(), LogStreamError>;
}

#[async_trait]
pub trait LogReader: Send {
    /// Next batch of entries. `None` once the current writer closed and its
    /// entries were drained; reading again waits for a reattached writer.
    /// Cancel-safe: no entries are lost when the future is dropped.
    async fn read_stream(&mut self) -> Option<Vec<LogEntry>>;
}

pub trait LogStreamProvider: Send + Sync {
    fn start_writer(&self, job_id: Uuid) -> Result<Box<dyn LogWriter>, LogStreamError>;

    fn start_reader(&self, job_id: Uuid) -> Box<dyn LogReader>;

    /// Everything stored for a job, used to replay finished jobs
    fn read_completed(&self, job_id: Uuid) -> Vec<LogEntry>;
}

#[derive(Default)]
struct Stream {
    entries: Vec<LogEntry>,
    writer_active: bool,
    closed: bool,
    /// Bumped by every writer, so readers report each close once
    generation: u64,
}

struct Inner {
    streams: Mutex<HashMap<Uuid, Stream>>,
    notify: watch::Sender<u64>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Stream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.notify.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// In-process log streams
#[derive(Clone)]
pub struct MemoryLogStreams {
    inner: Arc<Inner>,
}

impl MemoryLogStreams {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                streams: Mutex::new(HashMap::new()),
                notify,
            }),
        }
    }
}

impl Default for MemoryLogStreams {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStreamProvider for MemoryLogStreams {
    fn start_writer(&self, job_id: Uuid) -> Result<Box<dyn LogWriter>, LogStreamError> {
        {
            let mut streams = self.inner.lock();
            let stream = streams.entry(job_id).or_default();
            if stream.writer_active {
                return Err(LogStreamError::WriterActive(job_id));
            }
            // a reattached runner continues the same stream
            stream.writer_active = true;
            stream.closed = false;
            stream.generation += 1;
        }
        self.inner.wake();

        Ok(Box::new(MemoryLogWriter {
            inner: self.inner.clone(),
            job_id,
            buffer: Vec::new(),
            done: false,
        }))
    }

    fn start_reader(&self, job_id: Uuid) -> Box<dyn LogReader> {
        Box::new(MemoryLogReader {
            inner: self.inner.clone(),
            job_id,
            cursor: 0,
            reported_close: None,
        })
    }

    fn read_completed(&self, job_id: Uuid) -> Vec<LogEntry> {
        self.inner
            .lock()
            .get(&job_id)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }
}

struct MemoryLogWriter {
    inner: Arc<Inner>,
    job_id: Uuid,
    buffer: Vec<LogEntry>,
    done: bool,
}

impl MemoryLogWriter {
    fn publish(&mut self, finish: bool) -> Result<(), LogStreamError> {
        if self.done {
            return Err(LogStreamError::Closed(self.job_id));
        }
        {
            let mut streams = self.inner.lock();
            let stream = streams.entry(self.job_id).or_default();
            stream.entries.append(&mut self.buffer);
            if finish {
                stream.writer_active = false;
                stream.closed = true;
            }
        }
        if finish {
            self.done = true;
        }
        self.inner.wake();
        Ok(())
    }
}

impl LogWriter for MemoryLogWriter {
    fn new_event(&mut self, entry: LogEntry) {
        self.buffer.push(entry);
    }

    fn flush(&mut self) -> Result<(), LogStreamError> {
        self.publish(false)
    }

    fn close(&mut self) -> Result<(), LogStreamError> {
        self.publish(true)
    }
}

impl Drop for MemoryLogWriter {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.publish(true);
        }
    }
}

struct MemoryLogReader {
    inner: Arc<Inner>,
    job_id: Uuid,
    cursor: usize,
    /// Writer generation whose close was already returned
    reported_close: Option<u64>,
}

#[async_trait]
impl LogReader for MemoryLogReader {
    async fn read_stream(&mut self) -> Option<Vec<LogEntry>> {
        loop {
            let mut rx = {
                let streams = self.inner.lock();
                if let Some(stream) = streams.get(&self.job_id) {
                    if stream.entries.len() > self.cursor {
                        let batch = stream.entries[self.cursor..].to_vec();
                        self.cursor = stream.entries.len();
                        return Some(batch);
                    }
                    if stream.closed && self.reported_close != Some(stream.generation) {
                        self.reported_close = Some(stream.generation);
                        return None;
                    }
                }
                self.inner.notify.subscribe()
            };
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}
