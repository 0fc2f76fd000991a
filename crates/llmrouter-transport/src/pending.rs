//! Pending-request table: in-flight request id -> completion handle.
//!
//! Each id owns at most one live handle. Single-shot handles are
//! `oneshot` senders; stream handles are unbounded queues allocated when
//! the handle is created. Once the table is closed every entry has been
//! failed and new registrations are refused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, RouterError};

/// One item delivered to a stream consumer.
#[derive(Debug)]
pub enum StreamItem {
    /// A chunk payload, in wire order.
    Chunk(Value),
    /// End-of-stream sentinel.
    End,
    /// Terminal error marker.
    Failed(RouterError),
}

enum Completion {
    Single(oneshot::Sender<Result<Value>>),
    Stream(mpsc::UnboundedSender<StreamItem>),
}

/// Outcome of routing a reply into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered and the entry stays registered.
    Delivered,
    /// Delivered and the entry was removed.
    Completed,
    /// No entry for the id.
    Unknown,
    /// The entry exists but is of the other handle type.
    Mismatched,
}

struct TableState {
    entries: HashMap<String, Completion>,
    closed: bool,
}

/// Table of in-flight requests guarded by a single mutex.
pub struct PendingTable {
    state: Mutex<TableState>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    /// Creates an empty, open table.
    pub fn new() -> Self {
        Self { state: Mutex::new(TableState { entries: HashMap::new(), closed: false }) }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: &str, completion: Completion) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(RouterError::ConnectionClosed);
        }
        if state.entries.contains_key(id) {
            return Err(RouterError::validation(format!("request id {id} is already in flight")));
        }
        state.entries.insert(id.to_string(), completion);
        Ok(())
    }

    /// Registers a single-shot handle under `id`.
    pub fn register_single(&self, id: &str) -> Result<oneshot::Receiver<Result<Value>>> {
        let (tx, rx) = oneshot::channel();
        self.insert(id, Completion::Single(tx))?;
        Ok(rx)
    }

    /// Registers a stream handle under `id`. The queue exists from here on.
    pub fn register_stream(&self, id: &str) -> Result<mpsc::UnboundedReceiver<StreamItem>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(id, Completion::Stream(tx))?;
        Ok(rx)
    }

    /// Resolves a reply for `id`.
    ///
    /// A single-shot handle receives `result`. A stream handle is
    /// terminated: an error becomes its error marker, a value its last
    /// chunk. The entry is removed either way.
    pub fn resolve(&self, id: &str, result: Result<Value>) -> Delivery {
        let completion = match self.lock().entries.remove(id) {
            Some(c) => c,
            None => return Delivery::Unknown,
        };
        match completion {
            Completion::Single(tx) => {
                let _ = tx.send(result);
            }
            Completion::Stream(tx) => match result {
                Ok(value) => {
                    let _ = tx.send(StreamItem::Chunk(value));
                    let _ = tx.send(StreamItem::End);
                }
                Err(err) => {
                    let _ = tx.send(StreamItem::Failed(err));
                }
            },
        }
        Delivery::Completed
    }

    /// Pushes a chunk onto the stream registered under `id`.
    ///
    /// With `complete`, the end sentinel follows the chunk and the entry is
    /// removed; the consumer can still drain its queue.
    pub fn push_chunk(&self, id: &str, chunk: Value, complete: bool) -> Delivery {
        let tx = {
            let mut state = self.lock();
            let entries = &mut state.entries;
            match entries.get(id) {
                None => return Delivery::Unknown,
                Some(Completion::Single(_)) => return Delivery::Mismatched,
                Some(Completion::Stream(tx)) => {
                    let tx = tx.clone();
                    if complete {
                        entries.remove(id);
                    }
                    tx
                }
            }
        };
        let _ = tx.send(StreamItem::Chunk(chunk));
        if complete {
            let _ = tx.send(StreamItem::End);
            Delivery::Completed
        } else {
            Delivery::Delivered
        }
    }

    /// Terminates the stream under `id` with an error marker.
    pub fn fail_stream(&self, id: &str, err: RouterError) -> Delivery {
        let tx = {
            let mut state = self.lock();
            let entries = &mut state.entries;
            match entries.get(id) {
                None => return Delivery::Unknown,
                Some(Completion::Single(_)) => return Delivery::Mismatched,
                Some(Completion::Stream(tx)) => {
                    let tx = tx.clone();
                    entries.remove(id);
                    tx
                }
            }
        };
        let _ = tx.send(StreamItem::Failed(err));
        Delivery::Completed
    }

    /// Deregisters `id` without resolving it. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    /// Closes the table: every entry fails with an error from `make_err`
    /// and later registrations are refused. Returns the number failed.
    pub fn close_all(&self, make_err: impl Fn() -> RouterError) -> usize {
        let drained: Vec<Completion> = {
            let mut state = self.lock();
            state.closed = true;
            state.entries.drain().map(|(_, c)| c).collect()
        };
        let count = drained.len();
        for completion in drained {
            match completion {
                Completion::Single(tx) => {
                    let _ = tx.send(Err(make_err()));
                }
                Completion::Stream(tx) => {
                    let _ = tx.send(StreamItem::Failed(make_err()));
                }
            }
        }
        count
    }

    /// Whether the table was closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether `id` is in flight.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes an entry when dropped.
///
/// Held by a waiting caller so that abandoning the wait (timeout or a
/// dropped future) always deregisters the id. Ids are never reused on a
/// connection, so removing an already-resolved id is a no-op.
pub struct PendingGuard {
    table: Arc<PendingTable>,
    id: String,
}

impl PendingGuard {
    /// Guards `id` in `table`.
    pub fn new(table: Arc<PendingTable>, id: impl Into<String>) -> Self {
        Self { table, id: id.into() }
    }

    /// The guarded id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Removes the entry now rather than on drop.
    pub fn release(&self) {
        self.table.remove(&self.id);
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_single_resolve_removes_entry() {
        let table = PendingTable::new();
        let rx = table.register_single("1").unwrap();
        assert_eq!(table.len(), 1);

        assert_eq!(table.resolve("1", Ok(json!({"ok": true}))), Delivery::Completed);
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = PendingTable::new();
        let _rx = table.register_single("1").unwrap();
        assert!(table.register_single("1").is_err());
        assert!(table.register_stream("1").is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_is_noop() {
        let table = PendingTable::new();
        assert_eq!(table.resolve("nope", Ok(Value::Null)), Delivery::Unknown);
        assert_eq!(table.push_chunk("nope", Value::Null, true), Delivery::Unknown);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_stream_chunks_in_order_then_end() {
        let table = PendingTable::new();
        let mut rx = table.register_stream("7").unwrap();

        assert_eq!(table.push_chunk("7", json!("a"), false), Delivery::Delivered);
        assert_eq!(table.push_chunk("7", json!("b"), false), Delivery::Delivered);
        assert_eq!(table.push_chunk("7", json!("c"), true), Delivery::Completed);
        assert!(!table.contains("7"));

        let mut seen = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                StreamItem::Chunk(v) => seen.push(v),
                StreamItem::End => break,
                StreamItem::Failed(e) => panic!("unexpected failure {e}"),
            }
        }
        assert_eq!(seen, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_chunk_for_single_is_mismatched() {
        let table = PendingTable::new();
        let _rx = table.register_single("1").unwrap();
        assert_eq!(table.push_chunk("1", json!({}), true), Delivery::Mismatched);
        assert_eq!(table.fail_stream("1", RouterError::ConnectionClosed), Delivery::Mismatched);
        assert!(table.contains("1"));
    }

    #[tokio::test]
    async fn test_response_terminates_stream() {
        let table = PendingTable::new();
        let mut rx = table.register_stream("2").unwrap();
        table.resolve("2", Err(RouterError::rpc("denied")));
        assert!(matches!(rx.recv().await, Some(StreamItem::Failed(RouterError::Rpc { .. }))));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_fails_everything() {
        let table = PendingTable::new();
        let single = table.register_single("1").unwrap();
        let mut stream = table.register_stream("2").unwrap();

        assert_eq!(table.close_all(|| RouterError::ConnectionClosed), 2);
        assert!(table.is_empty());
        assert!(table.is_closed());
        assert!(matches!(single.await.unwrap(), Err(RouterError::ConnectionClosed)));
        assert!(matches!(stream.recv().await, Some(StreamItem::Failed(RouterError::ConnectionClosed))));

        assert!(matches!(table.register_single("3"), Err(RouterError::ConnectionClosed)));
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let table = Arc::new(PendingTable::new());
        let _rx = table.register_single("9").unwrap();
        {
            let guard = PendingGuard::new(Arc::clone(&table), "9");
            assert_eq!(guard.id(), "9");
        }
        assert!(!table.contains("9"));
    }

    #[tokio::test]
    async fn test_concurrent_registrations() {
        let table = Arc::new(PendingTable::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                let id = i.to_string();
                let rx = table.register_single(&id).unwrap();
                table.resolve(&id, Ok(json!(i)));
                rx.await.unwrap().unwrap()
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), json!(i));
        }
        assert!(table.is_empty());
    }
}
