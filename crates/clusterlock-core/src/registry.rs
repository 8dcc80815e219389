// In-process registry of locks held by this node
// Tracks the (holder, hold count) pair of every key this manager has acquired

use dashmap::DashMap;

use crate::holder::{LockHolder, WeakHolder};

pub(crate) struct HeldLock {
    holder: WeakHolder,
    thread: String,
    hold_count: u32,
    abort_delivered: bool,
}

impl HeldLock {
    fn new(holder: &LockHolder) -> Self {
        Self {
            holder: holder.downgrade(),
            thread: holder.name().to_string(),
            hold_count: 1,
            abort_delivered: false,
        }
    }

    pub(crate) fn thread(&self) -> &str {
        &self.thread
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.holder.is_alive()
    }

    /// Interrupt the holder once; later calls are no-ops
    fn deliver_abort(&mut self) -> bool {
        if self.abort_delivered {
            return false;
        }
        match self.holder.upgrade() {
            Some(holder) => {
                holder.interrupt();
                self.abort_delivered = true;
                true
            }
            None => false,
        }
    }
}

/// What `lock()` finds locally before touching the store
pub(crate) enum LocalHold {
    /// The caller already holds the key; the hold count was incremented
    Reentered(u32),
    /// Another live holder of this node holds the key
    HeldByOther { thread: String },
    /// The previous holder went away without unlocking; its entry was removed
    Abandoned { thread: String },
    Vacant,
}

/// What `unlock()` did to the caller's hold
pub(crate) enum LocalRelease {
    NotHeld,
    NotOwner { thread: String },
    Remaining(u32),
    /// Hold count reached zero; the entry was removed and the row must be freed
    Released,
}

#[derive(Default)]
pub(crate) struct HeldLocks {
    locks: DashMap<String, HeldLock>,
}

impl HeldLocks {
    pub(crate) fn try_reenter(&self, key: &str, holder: &LockHolder) -> LocalHold {
        if let Some(mut held) = self.locks.get_mut(key) {
            if held.holder.id() == holder.id() {
                held.hold_count += 1;
                return LocalHold::Reentered(held.hold_count);
            }
            if held.is_alive() {
                return LocalHold::HeldByOther {
                    thread: held.thread.clone(),
                };
            }
        }

        match self.locks.remove_if(key, |_, held| !held.is_alive()) {
            Some((_, abandoned)) => LocalHold::Abandoned {
                thread: abandoned.thread,
            },
            None => LocalHold::Vacant,
        }
    }

    pub(crate) fn insert(&self, key: &str, holder: &LockHolder) {
        self.locks.insert(key.to_string(), HeldLock::new(holder));
    }

    pub(crate) fn exit(&self, key: &str, holder: &LockHolder) -> LocalRelease {
        let mut outcome = LocalRelease::NotHeld;
        self.locks.remove_if_mut(key, |_, held| {
            if held.holder.id() != holder.id() {
                outcome = LocalRelease::NotOwner {
                    thread: held.thread.clone(),
                };
                return false;
            }
            held.hold_count = held.hold_count.saturating_sub(1);
            if held.hold_count == 0 {
                outcome = LocalRelease::Released;
                true
            } else {
                outcome = LocalRelease::Remaining(held.hold_count);
                false
            }
        });
        outcome
    }

    /// Drop the entry of `key` if it still belongs to `holder_id`
    pub(crate) fn forget(&self, key: &str, holder_id: u64) -> bool {
        self.locks
            .remove_if(key, |_, held| held.holder.id() == holder_id)
            .is_some()
    }

    pub(crate) fn hold_count(&self, key: &str, holder: &LockHolder) -> u32 {
        self.locks
            .get(key)
            .filter(|held| held.holder.id() == holder.id())
            .map(|held| held.hold_count)
            .unwrap_or(0)
    }

    /// Keys whose holder is still alive
    pub(crate) fn live_keys(&self) -> Vec<String> {
        self.locks
            .iter()
            .filter(|held| held.is_alive())
            .map(|held| held.key().clone())
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.locks.iter().filter(|held| held.is_alive()).count()
    }

    pub(crate) fn has_live_holders(&self) -> bool {
        self.locks.iter().any(|held| held.is_alive())
    }

    /// Interrupt the holder of `key`, returning whether a live holder was reached
    pub(crate) fn interrupt(&self, key: &str) -> bool {
        match self.locks.get_mut(key) {
            Some(mut held) => {
                held.abort_delivered = false;
                held.deliver_abort()
            }
            None => false,
        }
    }

    /// Interrupt the holders of `keys` that have not been interrupted for this abort yet
    pub(crate) fn deliver_aborts(&self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|key| {
                self.locks
                    .get_mut(key.as_str())
                    .is_some_and(|mut held| held.deliver_abort())
            })
            .count()
    }

    pub(crate) fn interrupt_all(&self) -> usize {
        let mut interrupted = 0;
        for held in self.locks.iter() {
            if let Some(holder) = held.holder.upgrade() {
                holder.interrupt();
                interrupted += 1;
            }
        }
        interrupted
    }

    pub(crate) fn drain(&self) -> Vec<(String, HeldLock)> {
        let keys: Vec<String> = self.locks.iter().map(|held| held.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.locks.remove(&key))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
