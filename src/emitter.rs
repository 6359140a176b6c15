use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::event::Event;
use crate::record::{IntoListeners, IntoTypes, Listener, Record, RecordRef, UNLIMITED};
use crate::registry::Registry;
use crate::store::DataStore;

/// Factory producing the control object for each dispatch of a given type.
///
/// Overriding it is the hook for pre-populating events (seeded data,
/// application-specific defaults) without subclassing.
pub type EventFactory = Arc<dyn Fn(&str) -> Event + Send + Sync>;

/// Callback invoked with the removed records when a `within` time box
/// expires.
pub type ExpireCallback = Box<dyn FnOnce(Vec<RecordRef>) + Send>;

/// Construction options for [`Emitter`].
#[derive(Default)]
pub struct EmitterOptions {
    /// Dispatch a synthetic `"newListener"` event on every registration,
    /// carrying `[type, limit]` as arguments.
    pub new_listener: bool,
    /// Attach a key/value [`DataStore`] to the emitter itself.
    pub data_store: bool,
    /// Override the control-object factory for this emitter.
    pub event_factory: Option<EventFactory>,
}

/// The dispatch hub: owns the listener registry and the
/// conditional-unregistration ledger.
///
/// `Emitter` is a cheap-`Clone` handle over shared state; clones observe
/// and mutate the same registry. The registry lock is held only for map
/// manipulation, never across a listener invocation, so listener code may
/// freely re-enter the emitter (register, unregister, dispatch).
#[derive(Clone)]
pub struct Emitter {
    shared: Arc<EmitterShared>,
}

struct EmitterShared {
    registry: Mutex<Registry>,
    new_listener: bool,
    store: Option<DataStore>,
    event_factory: Option<EventFactory>,
}

/// Builder describing one registration call: the types×listeners
/// cross-product plus invocation limit, firing-order placement, and
/// conditional-unregistration triggers.
pub struct Registration {
    types: Vec<String>,
    listeners: Vec<Listener>,
    limit: i64,
    triggers: Vec<String>,
    first: bool,
}

impl Registration {
    pub fn new(types: impl IntoTypes, listeners: impl IntoListeners) -> Self {
        Registration {
            types: types.into_types(),
            listeners: listeners.into_listeners(),
            limit: UNLIMITED,
            triggers: Vec::new(),
            first: false,
        }
    }

    /// Caps each created record at `limit` invocations.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = i64::from(limit);
        self
    }

    /// Prepends the created records to the firing order.
    pub fn first(mut self) -> Self {
        self.first = true;
        self
    }

    /// Files the created records for removal when any of `triggers` is
    /// next dispatched.
    pub fn until(mut self, triggers: impl IntoTypes) -> Self {
        self.triggers.extend(triggers.into_types());
        self
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self::with_options(EmitterOptions::default())
    }

    pub fn with_options(options: EmitterOptions) -> Self {
        Emitter {
            shared: Arc::new(EmitterShared {
                registry: Mutex::new(Registry::default()),
                new_listener: options.new_listener,
                store: options.data_store.then(DataStore::new),
                event_factory: options.event_factory,
            }),
        }
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.shared.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn make_event(&self, event_type: &str) -> Event {
        match &self.shared.event_factory {
            Some(factory) => (factory.as_ref())(event_type),
            None => Event::new(event_type),
        }
    }

    /// Registers the cross-product of the registration's types and
    /// listeners and returns the records just created (useful for exact
    /// removal later via [`Emitter::off_record`]).
    pub fn register(&self, registration: Registration) -> Vec<RecordRef> {
        let Registration {
            types,
            listeners,
            limit,
            triggers,
            first,
        } = registration;

        let mut records = Vec::with_capacity(types.len() * listeners.len());
        {
            let mut registry = self.registry();
            for event_type in &types {
                for listener in &listeners {
                    let record = Record::new(event_type.clone(), listener.clone(), limit);
                    registry.insert(record.clone(), first);
                    records.push(record);
                }
            }
            for trigger in &triggers {
                registry.file_until(trigger, &records);
            }
        }
        debug!(types = ?types, count = records.len(), limit, first, "listeners registered");

        if self.shared.new_listener {
            for record in &records {
                // Can't fail: only the `error` type makes dispatch fallible.
                let _ = self.emit("newListener", [json!(record.event_type()), json!(limit)]);
            }
        }

        self.registry().set_last_registered(records.clone());
        records
    }

    /// Registers listeners for one or more event types, appended to the
    /// firing order, with no invocation limit.
    pub fn on(&self, types: impl IntoTypes, listeners: impl IntoListeners) -> &Self {
        self.register(Registration::new(types, listeners));
        self
    }

    /// Registers with an invocation budget: each created record fires at
    /// most `limit` times before it is unregistered.
    pub fn on_limit(&self, types: impl IntoTypes, listeners: impl IntoListeners, limit: u32) -> &Self {
        self.register(Registration::new(types, listeners).limit(limit));
        self
    }

    pub fn once(&self, types: impl IntoTypes, listeners: impl IntoListeners) -> &Self {
        self.on_limit(types, listeners, 1)
    }

    /// Registers at the front of the firing order.
    pub fn first(&self, types: impl IntoTypes, listeners: impl IntoListeners) -> &Self {
        self.register(Registration::new(types, listeners).first());
        self
    }

    /// Registers listeners that are dropped the moment any of `triggers`
    /// is next dispatched, no matter which type they listen to.
    pub fn until(
        &self,
        triggers: impl IntoTypes,
        types: impl IntoTypes,
        listeners: impl IntoListeners,
    ) -> &Self {
        self.register(Registration::new(types, listeners).until(triggers));
        self
    }

    pub fn until_once(
        &self,
        triggers: impl IntoTypes,
        types: impl IntoTypes,
        listeners: impl IntoListeners,
    ) -> &Self {
        self.register(Registration::new(types, listeners).limit(1).until(triggers));
        self
    }

    /// For a set of types sharing the same listeners: registers each type
    /// with the *other* types as triggers, so the first type to fire
    /// retires the rest of the set. A singleton set has nothing to act as
    /// a trigger and registers nothing.
    pub fn until_mutually(&self, types: impl IntoTypes, listeners: impl IntoListeners) -> &Self {
        self.mutual(types.into_types(), listeners.into_listeners(), false);
        self
    }

    pub fn until_once_mutually(&self, types: impl IntoTypes, listeners: impl IntoListeners) -> &Self {
        self.mutual(types.into_types(), listeners.into_listeners(), true);
        self
    }

    fn mutual(&self, types: Vec<String>, listeners: Vec<Listener>, once: bool) {
        for event_type in &types {
            let triggers: Vec<String> = types
                .iter()
                .filter(|t| *t != event_type)
                .cloned()
                .collect();
            if triggers.is_empty() {
                continue;
            }
            let mut registration =
                Registration::new(event_type.as_str(), listeners.clone()).until(triggers);
            if once {
                registration = registration.limit(1);
            }
            self.register(registration);
        }
    }

    /// Registers listeners, then removes exactly those records after
    /// `delay`, whether or not they fired. Requires a Tokio runtime
    /// context (the removal rides the runtime timer).
    pub fn within(
        &self,
        delay: Duration,
        types: impl IntoTypes,
        listeners: impl IntoListeners,
    ) -> &Self {
        self.expire_after(delay, Registration::new(types, listeners), None)
    }

    pub fn within_once(
        &self,
        delay: Duration,
        types: impl IntoTypes,
        listeners: impl IntoListeners,
    ) -> &Self {
        self.expire_after(delay, Registration::new(types, listeners).limit(1), None)
    }

    /// [`Emitter::within`] with an expiry callback receiving the removed
    /// records.
    pub fn within_notify(
        &self,
        delay: Duration,
        types: impl IntoTypes,
        listeners: impl IntoListeners,
        on_expire: impl FnOnce(Vec<RecordRef>) + Send + 'static,
    ) -> &Self {
        self.expire_after(
            delay,
            Registration::new(types, listeners),
            Some(Box::new(on_expire)),
        )
    }

    pub fn within_once_notify(
        &self,
        delay: Duration,
        types: impl IntoTypes,
        listeners: impl IntoListeners,
        on_expire: impl FnOnce(Vec<RecordRef>) + Send + 'static,
    ) -> &Self {
        self.expire_after(
            delay,
            Registration::new(types, listeners).limit(1),
            Some(Box::new(on_expire)),
        )
    }

    fn expire_after(
        &self,
        delay: Duration,
        registration: Registration,
        on_expire: Option<ExpireCallback>,
    ) -> &Self {
        let records = self.register(registration);
        let emitter = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for record in &records {
                emitter.off_record(record);
            }
            debug!(count = records.len(), "time-boxed listeners expired");
            if let Some(on_expire) = on_expire {
                on_expire(records);
            }
        });
        self
    }

    /// Clears every record registered for each of `types`. A reserved
    /// bucket survives, empty.
    pub fn off(&self, types: impl IntoTypes) -> &Self {
        let mut registry = self.registry();
        for event_type in types.into_types() {
            registry.clear_type(&event_type);
        }
        self
    }

    /// Removes the first record matching `listener` by identity for each
    /// of `types`. Unknown listeners are a no-op.
    pub fn off_listener(&self, types: impl IntoTypes, listener: &Listener) -> &Self {
        let mut registry = self.registry();
        for event_type in types.into_types() {
            registry.remove_listener(&event_type, listener);
        }
        self
    }

    /// Removes exactly `record` from its own type. Returns whether it was
    /// still registered.
    pub fn off_record(&self, record: &RecordRef) -> bool {
        self.registry().remove_record(record)
    }

    /// Number of records registered for `event_type`.
    pub fn size(&self, event_type: &str) -> usize {
        self.registry().count(event_type)
    }

    /// Number of records across every type.
    pub fn total_size(&self) -> usize {
        self.registry().count_all()
    }

    /// Lifetime dispatch count for `event_type`, zero-listener dispatches
    /// included.
    pub fn ever(&self, event_type: &str) -> u64 {
        self.registry().dispatched(event_type)
    }

    /// Sum of dispatch counts over every type ever dispatched.
    pub fn total_ever(&self) -> u64 {
        self.registry().dispatched_total()
    }

    /// Snapshot of the bare callables registered for `event_type`.
    pub fn listeners(&self, event_type: &str) -> Vec<Listener> {
        self.registry()
            .snapshot(event_type)
            .iter()
            .map(|r| r.listener().clone())
            .collect()
    }

    pub fn all_listeners(&self) -> Vec<Listener> {
        self.registry()
            .all_records()
            .iter()
            .map(|r| r.listener().clone())
            .collect()
    }

    /// Snapshot of the full records registered for `event_type`.
    pub fn records(&self, event_type: &str) -> Vec<RecordRef> {
        self.registry().snapshot(event_type)
    }

    pub fn all_records(&self) -> Vec<RecordRef> {
        self.registry().all_records()
    }

    /// Records created by the most recent registration call; cleared at
    /// the start of every dispatch.
    pub fn last_registered(&self) -> Vec<RecordRef> {
        self.registry().last_registered()
    }

    /// Event-type names whose bucket exists (reserved buckets included)
    /// and whose name matches `pattern`.
    pub fn lookup(&self, pattern: &Regex) -> Vec<String> {
        self.registry()
            .event_types()
            .into_iter()
            .filter(|t| pattern.is_match(t))
            .collect()
    }

    /// Every existing bucket name, reserved buckets included.
    pub fn event_types(&self) -> Vec<String> {
        self.registry().event_types()
    }

    /// Keeps the named buckets alive even with zero records.
    pub fn reserve(&self, types: impl IntoTypes) -> &Self {
        let mut registry = self.registry();
        for event_type in types.into_types() {
            registry.reserve(&event_type);
        }
        self
    }

    pub fn unreserve(&self, types: impl IntoTypes) -> &Self {
        let mut registry = self.registry();
        for event_type in types.into_types() {
            registry.unreserve(&event_type);
        }
        self
    }

    /// The emitter-level data store, when enabled via
    /// [`EmitterOptions::data_store`].
    pub fn store(&self) -> Option<&DataStore> {
        self.shared.store.as_ref()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.total_size())
            .field("dispatches", &self.total_ever())
            .finish()
    }
}
