//! Pending on-demand reading requests.
//!
//! Every request is resolved exactly once: by a matching reading, by its
//! deadline, or by the connection going away. All three paths remove the
//! entry under the same lock, so whichever runs first wins and the others
//! find nothing to resolve.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::data::{Reading, ReadingKind};
use crate::error::{Error, Result};

/// A registered, not yet resolved request.
struct PendingEntry {
    kind: ReadingKind,
    tx: oneshot::Sender<Result<Reading>>,
    timer: JoinHandle<()>,
}

struct RegistryInner {
    /// Whether new requests are accepted.
    open: bool,
    next_id: u64,
    /// Pending requests keyed by id; ids increase, so iteration is oldest first.
    pending: BTreeMap<u64, PendingEntry>,
}

/// Registry of pending on-demand requests.
#[derive(Clone)]
pub struct RequestRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl RequestRegistry {
    /// Create a closed registry. Call [`open`](Self::open) once connected.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                open: false,
                next_id: 0,
                pending: BTreeMap::new(),
            })),
        }
    }

    /// Start accepting requests.
    pub fn open(&self) {
        self.inner.lock().open = true;
    }

    /// Whether requests are currently accepted.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Register a request for the next reading of `kind`.
    ///
    /// Fails with [`Error::NotConnected`] while the registry is closed. The
    /// deadline timer runs as a Tokio task, so this must be called from
    /// within a Tokio runtime.
    pub fn register(&self, kind: ReadingKind, timeout: Duration) -> Result<ReadingRequest> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(Error::NotConnected);
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                RequestRegistry { inner }.expire(id);
            }
        });

        inner.pending.insert(id, PendingEntry { kind, tx, timer });
        trace!("Registered request {} for {} ({:?})", id, kind, timeout);

        Ok(ReadingRequest {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Resolve every pending request of the reading's kind with `reading`,
    /// oldest first. Returns how many were resolved.
    pub fn fulfill(&self, reading: Reading) -> usize {
        let kind = reading.kind();
        let mut inner = self.inner.lock();

        let ids: Vec<u64> = inner
            .pending
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(entry) = inner.pending.remove(id) {
                entry.timer.abort();
                let _ = entry.tx.send(Ok(reading));
            }
        }

        if !ids.is_empty() {
            trace!("Fulfilled {} pending {} request(s)", ids.len(), kind);
        }

        ids.len()
    }

    /// Reject request `id` with [`Error::RequestTimeout`] if still pending.
    pub fn expire(&self, id: u64) -> bool {
        let entry = self.inner.lock().pending.remove(&id);
        match entry {
            Some(entry) => {
                debug!("Request {} for {} timed out", id, entry.kind);
                let _ = entry.tx.send(Err(Error::RequestTimeout));
                true
            }
            None => false,
        }
    }

    /// Stop accepting requests and fail every pending one with
    /// [`Error::ConnectionLost`]. Returns how many were failed.
    pub fn close(&self) -> usize {
        let drained = {
            let mut inner = self.inner.lock();
            inner.open = false;
            std::mem::take(&mut inner.pending)
        };

        let count = drained.len();
        for (_, entry) in drained {
            entry.timer.abort();
            let _ = entry.tx.send(Err(Error::ConnectionLost));
        }

        if count > 0 {
            debug!("Failed {} pending request(s): connection lost", count);
        }

        count
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether no requests are pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    fn cancel(inner: &Mutex<RegistryInner>, id: u64) {
        if let Some(entry) = inner.lock().pending.remove(&id) {
            trace!("Request {} dropped before resolution", id);
            entry.timer.abort();
        }
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a pending request; resolves to the reading or an error.
///
/// Dropping the handle withdraws the request.
pub struct ReadingRequest {
    id: u64,
    rx: oneshot::Receiver<Result<Reading>>,
    registry: Weak<Mutex<RegistryInner>>,
}

impl ReadingRequest {
    /// Identifier of this request within its registry.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for ReadingRequest {
    type Output = Result<Reading>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The sender only disappears without sending if the registry
            // itself was dropped.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ConnectionLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ReadingRequest {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            RequestRegistry::cancel(&inner, self.id);
        }
    }
}

impl std::fmt::Debug for ReadingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingRequest").field("id", &self.id).finish()
    }
}
