//! Lock holder identity and interrupt signal
//!
//! A `LockHolder` stands for one execution context (a task, a worker, a
//! request) that acquires locks. The manager identifies the owner of a
//! reentrant hold by the holder's id and persists its name as the row's
//! `lockThread`. `abort()` and `destroy()` reach a holder through its
//! interrupt flag, which the holder checks at its own await points.
//!
//! A holder is alive while any clone of it exists. Dropping every clone
//! without unlocking is treated like a thread that exited while holding a
//! lock: its leases stop being refreshed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Notify;

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

struct HolderInner {
    id: u64,
    name: String,
    interrupted: AtomicBool,
    notify: Notify,
}

/// Execution-context identity that owns locks
#[derive(Clone)]
pub struct LockHolder {
    inner: Arc<HolderInner>,
}

impl LockHolder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HolderInner {
                id: NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                interrupted: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// A holder named after the calling OS thread
    pub fn current_thread() -> Self {
        let thread = std::thread::current();
        let name = thread
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", thread.id()));
        Self::new(name)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Request that this holder stop and release its locks
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Read and reset the interrupt flag
    pub fn clear_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Resolves once this holder has been interrupted
    pub async fn interrupted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn downgrade(&self) -> WeakHolder {
        WeakHolder {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for LockHolder {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for LockHolder {}

impl fmt::Debug for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHolder")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.name, self.inner.id)
    }
}

/// Non-owning reference kept by the manager
#[derive(Clone)]
pub(crate) struct WeakHolder {
    id: u64,
    inner: Weak<HolderInner>,
}

impl WeakHolder {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn upgrade(&self) -> Option<LockHolder> {
        self.inner.upgrade().map(|inner| LockHolder { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}
