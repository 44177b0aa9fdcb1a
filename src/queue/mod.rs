//! Durable FIFO work queues
//!
//! A [`DurableQueue`] keeps its items in memory and persists the whole sequence
//! to one JSON file on [`DurableQueue::flush`]. A background flusher calls
//! `flush` on a fixed interval.
//!
//! Items handed out by [`DurableQueue::dequeue`] stay "in flight" until
//! [`DurableQueue::settle`] is called and are written to the snapshot ahead of
//! the pending items. A crash between dequeue and settle therefore redelivers
//! the in-flight items on the next start instead of losing them.

pub mod snapshot;
mod work_item;

pub use work_item::WorkItem;

use crate::shutdown::Flushable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue failures
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was closed by shutdown and accepts no more work
    #[error("Queue {0} is closed")]
    Closed(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode snapshot {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl QueueError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        QueueError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

struct State<T> {
    pending: VecDeque<T>,
    in_flight: Vec<T>,
    closed: bool,
}

struct Inner<T> {
    name: String,
    path: PathBuf,
    state: Mutex<State<T>>,
}

/// Disk-backed FIFO queue; clones share the same queue
pub struct DurableQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DurableQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for DurableQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl<T> DurableQueue<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Open the queue backed by `path`, recovering any existing snapshot
    ///
    /// A missing file yields an empty queue and the file is created. An
    /// unparsable file is moved aside and the queue starts empty. Other I/O
    /// errors are returned.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let name = name.into();
        let path = path.into();

        let (items, create) = match snapshot::read::<Vec<T>>(&path)? {
            snapshot::Loaded::Found(items) => (items, false),
            snapshot::Loaded::Missing => (Vec::new(), true),
            snapshot::Loaded::Corrupt { moved_to, reason } => {
                error!(
                    queue = %name,
                    moved_to = %moved_to.display(),
                    reason = %reason,
                    "Queue snapshot is unparsable, starting empty"
                );
                (Vec::new(), true)
            }
        };

        info!(queue = %name, path = %path.display(), items = items.len(), "Opened queue");

        let queue = Self {
            inner: Arc::new(Inner {
                name,
                path,
                state: Mutex::new(State {
                    pending: items.into(),
                    in_flight: Vec::new(),
                    closed: false,
                }),
            }),
        };
        if create {
            queue.flush()?;
        }
        Ok(queue)
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Append an item
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.closed {
            return Err(QueueError::Closed(self.inner.name.clone()));
        }
        state.pending.push_back(item);
        Ok(())
    }

    /// Remove up to `n` items from the front
    ///
    /// The items stay in the snapshot as in-flight until [`settle`](Self::settle).
    pub fn dequeue(&self, n: usize) -> Vec<T> {
        let mut state = self.state();
        let take = n.min(state.pending.len());
        let batch: Vec<T> = state.pending.drain(..take).collect();
        state.in_flight.extend(batch.iter().cloned());
        batch
    }

    /// Forget every in-flight item (its outcome has been handled)
    pub fn settle(&self) {
        self.state().in_flight.clear();
    }

    /// Remove and return every pending item
    pub fn take_all(&self) -> Vec<T> {
        self.state().pending.drain(..).collect()
    }

    /// Pending items, excluding in-flight ones
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Stop accepting new items
    pub fn close(&self) {
        self.state().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Atomically persist in-flight and pending items
    ///
    /// The lock is held for the write so that a flush never interleaves with a
    /// mutation or another flush.
    pub fn flush(&self) -> Result<(), QueueError> {
        let state = self.state();
        let items: Vec<&T> = state.in_flight.iter().chain(state.pending.iter()).collect();
        snapshot::write(&self.inner.path, &items)?;
        debug!(queue = %self.inner.name, items = items.len(), "Flushed queue");
        Ok(())
    }

    /// Flush every `interval` on a blocking thread until the handle is dropped
    pub fn spawn_flusher(&self, interval: Duration) -> FlusherHandle {
        let queue = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let q = queue.clone();
                match tokio::task::spawn_blocking(move || q.flush()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(queue = %queue.name(), error = %e, "Periodic flush failed"),
                    Err(e) => warn!(queue = %queue.name(), error = %e, "Periodic flush task failed"),
                }
            }
        });
        FlusherHandle { task }
    }
}

impl<T> Flushable for DurableQueue<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        DurableQueue::name(self)
    }

    fn close(&self) {
        DurableQueue::close(self)
    }

    fn flush(&self) -> crate::Result<()> {
        Ok(DurableQueue::flush(self)?)
    }
}

/// Background flusher; aborted when dropped
#[derive(Debug)]
pub struct FlusherHandle {
    task: JoinHandle<()>,
}

impl FlusherHandle {
    /// Stop flushing now rather than at the end of the scope
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for FlusherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn read_snapshot(path: &Path) -> Vec<String> {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_file_creates_empty_queue() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queues").join("parents.json");

        let queue = DurableQueue::<String>::open("parents", &path).unwrap();
        assert!(queue.is_empty());
        assert!(path.exists());
        assert!(read_snapshot(&path).is_empty());
    }

    #[test]
    fn test_recovers_existing_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");
        fs::write(&path, r#"["a", "b", "c"]"#).unwrap();

        let queue = DurableQueue::<String>::open("q", &path).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(10), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unparsable_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");
        fs::write(&path, "not json").unwrap();

        let queue = DurableQueue::<String>::open("q", &path).unwrap();
        assert!(queue.is_empty());
        assert!(read_snapshot(&path).is_empty());

        let moved = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("q.json.corrupt-"));
        assert!(moved);
    }

    #[test]
    fn test_fifo_dequeue() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open("q", dir.path().join("q.json")).unwrap();
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }

        assert_eq!(queue.dequeue(2), vec![0, 1]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(10), vec![2, 3, 4]);
        assert!(queue.dequeue(3).is_empty());
    }

    #[test]
    fn test_in_flight_items_survive_until_settled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");
        let queue = DurableQueue::open("q", &path).unwrap();
        for s in ["a", "b", "c"] {
            queue.enqueue(s.to_string()).unwrap();
        }

        let batch = queue.dequeue(2);
        assert_eq!(batch, vec!["a", "b"]);
        assert_eq!(queue.in_flight(), 2);
        queue.flush().unwrap();
        assert_eq!(read_snapshot(&path), vec!["a", "b", "c"]);

        // a restart before settle redelivers the batch
        let reopened = DurableQueue::<String>::open("q", &path).unwrap();
        assert_eq!(reopened.len(), 3);

        queue.settle();
        queue.flush().unwrap();
        assert_eq!(read_snapshot(&path), vec!["c"]);
    }

    #[test]
    fn test_closed_queue_rejects_work() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open("q", dir.path().join("q.json")).unwrap();
        queue.enqueue(1).unwrap();
        queue.close();

        assert!(matches!(queue.enqueue(2), Err(QueueError::Closed(_))));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_all() {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open("q", dir.path().join("q.json")).unwrap();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        assert_eq!(queue.take_all(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");
        let queue = DurableQueue::open("q", &path).unwrap();
        let flusher = queue.spawn_flusher(Duration::from_millis(20));

        queue.enqueue("x".to_string()).unwrap();
        assert!(read_snapshot(&path).is_empty());

        let mut flushed = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flushed = read_snapshot(&path);
            if !flushed.is_empty() {
                break;
            }
        }
        assert_eq!(flushed, vec!["x"]);
        flusher.stop();
    }

    #[tokio::test]
    async fn test_stopped_flusher_writes_nothing_more() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");
        let queue = DurableQueue::open("q", &path).unwrap();
        let flusher = queue.spawn_flusher(Duration::from_millis(10));

        flusher.stop();
        // let a flush already running on the blocking pool finish
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.enqueue("late".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(read_snapshot(&path).is_empty());
    }
}
