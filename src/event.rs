use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;

use crate::dispatch::{ChainState, Completion};
use crate::store::DataStore;

/// Per-dispatch control object handed to every listener.
///
/// Handles are cheap clones sharing one underlying state, so a listener may
/// keep a clone and call [`Event::next`] or [`Event::done`] later from a
/// deferred task. The object is live for exactly one dispatch at a time;
/// retaining it past the dispatch's terminal callback is a caller error.
///
/// Which of [`Event::abort`] and [`Event::prevent`] actually take effect
/// depends on the protocol that armed the event: `emit` permits abort only,
/// `chain` permits both, `parallel` permits prevent only. Calls outside the
/// granted capability are no-ops.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    event_type: String,
    abortable: AtomicBool,
    preventable: AtomicBool,
    aborted: AtomicBool,
    prevented: AtomicBool,
    position: AtomicI64,
    pending: AtomicI64,
    chain: Mutex<Option<ChainState>>,
    complete: Mutex<Option<Completion>>,
    data: DataStore,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Event {
            inner: Arc::new(EventInner {
                event_type: event_type.into(),
                abortable: AtomicBool::new(false),
                preventable: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                prevented: AtomicBool::new(false),
                position: AtomicI64::new(-1),
                pending: AtomicI64::new(0),
                chain: Mutex::new(None),
                complete: Mutex::new(None),
                data: DataStore::new(),
            }),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.inner.event_type
    }

    pub fn is_abortable(&self) -> bool {
        self.inner.abortable.load(Ordering::SeqCst)
    }

    pub fn is_preventable(&self) -> bool {
        self.inner.preventable.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn is_prevented(&self) -> bool {
        self.inner.prevented.load(Ordering::SeqCst)
    }

    /// Index of the listener currently (or last) invoked, `-1` before any.
    pub fn position(&self) -> i64 {
        self.inner.position.load(Ordering::SeqCst)
    }

    /// Outstanding join count for a `parallel` dispatch.
    pub fn pending(&self) -> i64 {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Marks the event aborted, when the protocol permits it, and forces
    /// the chain (if any) to skip the remaining listeners and complete.
    pub fn abort(&self) {
        if self.is_abortable() {
            self.inner.aborted.store(true, Ordering::SeqCst);
            debug!(event_type = %self.inner.event_type, "event aborted");
            self.next();
        }
    }

    /// Marks the event prevented, when the protocol permits it, and forces
    /// the chain (if any) to skip the remaining listeners and complete.
    pub fn prevent(&self) {
        if self.is_preventable() {
            self.inner.prevented.store(true, Ordering::SeqCst);
            debug!(event_type = %self.inner.event_type, "event prevented");
            self.next();
        }
    }

    /// Applies whichever of abort/prevent the protocol permits, then forces
    /// an advance if either took effect.
    pub fn stop(&self) {
        if self.is_abortable() {
            self.inner.aborted.store(true, Ordering::SeqCst);
        }
        if self.is_preventable() {
            self.inner.prevented.store(true, Ordering::SeqCst);
        }
        if self.is_aborted() || self.is_prevented() {
            debug!(event_type = %self.inner.event_type, "event stopped");
            self.next();
        }
    }

    /// Continuation trigger for `chain`: runs the next listener, or the
    /// completion callback once the chain is exhausted or halted. A no-op
    /// when no chain is waiting on this event.
    pub fn next(&self) {
        let state = self.chain_slot().take();
        if let Some(state) = state {
            state.advance(self);
        }
    }

    /// Join trigger for `parallel`: counts down the outstanding listeners
    /// and fires the completion callback exactly once when the count
    /// reaches zero. Calls after completion has fired are inert.
    pub fn done(&self) {
        let mut slot = self.complete_slot();
        if slot.is_some() && self.inner.pending.fetch_sub(1, Ordering::SeqCst) <= 1 {
            let complete = slot.take();
            drop(slot);
            if let Some(complete) = complete {
                complete(self);
            }
        }
    }

    /// Returns the value stored under `key`, or `default` when absent.
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.inner.data.get(key, default)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.data.set(key, value);
    }

    pub fn unset(&self, key: &str) {
        self.inner.data.unset(key);
    }

    /// The event's scoped key/value store.
    pub fn data(&self) -> &DataStore {
        &self.inner.data
    }

    pub(crate) fn set_abortable(&self) {
        self.inner.abortable.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_preventable(&self) {
        self.inner.preventable.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_position(&self, position: i64) {
        self.inner.position.store(position, Ordering::SeqCst);
    }

    pub(crate) fn bump_position(&self) {
        self.inner.position.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_pending(&self, pending: i64) {
        self.inner.pending.store(pending, Ordering::SeqCst);
    }

    pub(crate) fn install_chain(&self, state: ChainState) {
        *self.chain_slot() = Some(state);
    }

    pub(crate) fn chain_idle(&self) -> bool {
        self.chain_slot().is_none()
    }

    pub(crate) fn install_completion(&self, complete: Completion) {
        *self.complete_slot() = Some(complete);
    }

    /// Fires the completion callback directly, bypassing the join count
    /// (empty `parallel` snapshot).
    pub(crate) fn complete_now(&self) {
        let complete = self.complete_slot().take();
        if let Some(complete) = complete {
            complete(self);
        }
    }

    fn chain_slot(&self) -> MutexGuard<'_, Option<ChainState>> {
        self.inner.chain.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn complete_slot(&self) -> MutexGuard<'_, Option<Completion>> {
        self.inner.complete.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.inner.event_type)
            .field("aborted", &self.is_aborted())
            .field("prevented", &self.is_prevented())
            .field("position", &self.position())
            .field("pending", &self.pending())
            .finish()
    }
}
