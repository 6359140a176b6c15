use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::event::Event;

/// Invocation budget sentinel meaning "never expires".
pub(crate) const UNLIMITED: i64 = -1;

/// A registrable callable.
///
/// Identity is pointer identity: clones of the same `Listener` are the same
/// registration callable, while two separate `Listener::new` wrappings of
/// identical closures are not. Registering clones of one `Listener` under
/// the same type creates independent records that all fire; removal by
/// listener ([`crate::Emitter::off_listener`]) drops the first match only.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&Event, &[Value]) + Send + Sync>);

impl Listener {
    pub fn new(f: impl Fn(&Event, &[Value]) + Send + Sync + 'static) -> Self {
        Listener(Arc::new(f))
    }

    /// Invokes the callable with the dispatch's control object and arguments.
    pub fn call(&self, event: &Event, args: &[Value]) {
        (self.0.as_ref())(event, args);
    }

    /// Whether two handles refer to the same registration callable.
    pub fn same(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// One registration's bookkeeping: a callable registered under a single
/// event type, with its remaining invocation budget.
#[derive(Debug)]
pub struct Record {
    event_type: String,
    listener: Listener,
    remaining: AtomicI64,
}

/// Shared handle to a [`Record`]. Record identity is handle identity.
pub type RecordRef = Arc<Record>;

impl Record {
    pub(crate) fn new(event_type: String, listener: Listener, limit: i64) -> RecordRef {
        Arc::new(Record {
            event_type,
            listener,
            remaining: AtomicI64::new(limit),
        })
    }

    /// The event type this record is registered under.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Remaining invocations, `-1` for unlimited.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Decrements a finite invocation budget. Returns true once the budget
    /// is spent and the record should be unregistered.
    pub(crate) fn spend(&self) -> bool {
        if self.remaining.load(Ordering::SeqCst) < 0 {
            return false;
        }
        self.remaining.fetch_sub(1, Ordering::SeqCst) <= 1
    }
}

/// One event-type name or a list of them, decided at the API boundary.
pub trait IntoTypes {
    fn into_types(self) -> Vec<String>;
}

impl IntoTypes for &str {
    fn into_types(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoTypes for String {
    fn into_types(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoTypes for &String {
    fn into_types(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<const N: usize> IntoTypes for [&str; N] {
    fn into_types(self) -> Vec<String> {
        self.iter().map(|t| t.to_string()).collect()
    }
}

impl IntoTypes for &[&str] {
    fn into_types(self) -> Vec<String> {
        self.iter().map(|t| t.to_string()).collect()
    }
}

impl IntoTypes for Vec<&str> {
    fn into_types(self) -> Vec<String> {
        self.into_iter().map(|t| t.to_string()).collect()
    }
}

impl IntoTypes for Vec<String> {
    fn into_types(self) -> Vec<String> {
        self
    }
}

/// One listener or a list of them, decided at the API boundary.
pub trait IntoListeners {
    fn into_listeners(self) -> Vec<Listener>;
}

impl IntoListeners for Listener {
    fn into_listeners(self) -> Vec<Listener> {
        vec![self]
    }
}

impl IntoListeners for &Listener {
    fn into_listeners(self) -> Vec<Listener> {
        vec![self.clone()]
    }
}

impl<const N: usize> IntoListeners for [Listener; N] {
    fn into_listeners(self) -> Vec<Listener> {
        self.into_iter().collect()
    }
}

impl IntoListeners for &[Listener] {
    fn into_listeners(self) -> Vec<Listener> {
        self.to_vec()
    }
}

impl IntoListeners for Vec<Listener> {
    fn into_listeners(self) -> Vec<Listener> {
        self
    }
}
