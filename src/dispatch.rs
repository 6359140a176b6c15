use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::emitter::Emitter;
use crate::error::DispatchError;
use crate::event::Event;
use crate::record::RecordRef;

/// What a dispatch call is aimed at: a bare event-type name, or a pre-built
/// control object being relayed into another dispatch.
///
/// A relayed event keeps its flags: an already-aborted control object
/// delivers to no listeners. Relaying under a type other than the one the
/// event was built with is a caller-contract violation the engine cannot
/// observe (the type travels with the event); relaying while a chain
/// continuation is still installed is asserted in debug builds.
pub enum Trigger {
    Type(String),
    Event(Event),
}

impl From<&str> for Trigger {
    fn from(event_type: &str) -> Self {
        Trigger::Type(event_type.to_string())
    }
}

impl From<String> for Trigger {
    fn from(event_type: String) -> Self {
        Trigger::Type(event_type)
    }
}

impl From<Event> for Trigger {
    fn from(event: Event) -> Self {
        Trigger::Event(event)
    }
}

impl From<&Event> for Trigger {
    fn from(event: &Event) -> Self {
        Trigger::Event(event.clone())
    }
}

/// Terminal callback fired exactly once per `chain`/`parallel` dispatch.
pub type Completion = Box<dyn FnOnce(&Event) + Send>;

/// Invokes the listener a hook was given charge of.
pub type Proceed = Box<dyn FnOnce() + Send>;

/// Interceptor invoked in place of each listener during `chain` and
/// `parallel` dispatch.
///
/// The hook owns delivery: it must eventually call `proceed` (directly or
/// deferred) to run the listener. Forward progress of a chain still comes
/// only from the event's continuation ([`Event::next`]).
pub type Hook = Arc<dyn Fn(&RecordRef, &Event, &[Value], Proceed) + Send + Sync>;

impl Emitter {
    /// Shared dispatch preamble: resolve the control object, bump the
    /// lifetime counter, apply due ledger removals, snapshot the listener
    /// list, and fail an unhandled `error` dispatch.
    fn arm(&self, trigger: Trigger, args: &[Value]) -> Result<(Event, Vec<RecordRef>), DispatchError> {
        let event = match trigger {
            Trigger::Type(event_type) => self.make_event(&event_type),
            Trigger::Event(event) => {
                debug_assert!(
                    event.chain_idle(),
                    "control object relayed while its chain is still running"
                );
                event
            }
        };
        let event_type = event.event_type().to_string();

        let (snapshot, dispatched) = {
            let mut registry = self.registry();
            registry.clear_last_registered();
            let dispatched = registry.record_dispatch(&event_type);
            for record in registry.take_due(&event_type) {
                registry.remove_record(&record);
            }
            (registry.snapshot(&event_type), dispatched)
        };

        if snapshot.is_empty() && event_type == "error" {
            return Err(match args.first() {
                None | Some(Value::Null) => DispatchError::UnspecifiedError,
                Some(value) => DispatchError::UnhandledError(value.clone()),
            });
        }

        trace!(
            event_type = %event_type,
            listeners = snapshot.len(),
            dispatched,
            "dispatch armed"
        );
        Ok((event, snapshot))
    }

    /// Applies a record's invocation budget: decrements a finite budget and
    /// unregisters the record once spent. The running snapshot still
    /// delivers to it this one time.
    pub(crate) fn spend(&self, record: &RecordRef) {
        if record.spend() {
            debug!(event_type = %record.event_type(), "listener budget spent, unregistering");
            self.off_record(record);
        }
    }

    /// Synchronous in-order broadcast.
    ///
    /// The only control available to listeners is [`Event::abort`], which
    /// halts delivery before the next listener runs; it does not interrupt
    /// the listener that called it. A listener that panics propagates to
    /// the caller and abandons the remaining delivery.
    pub fn emit(
        &self,
        trigger: impl Into<Trigger>,
        args: impl IntoIterator<Item = Value>,
    ) -> Result<&Self, DispatchError> {
        let args: Vec<Value> = args.into_iter().collect();
        let (event, snapshot) = self.arm(trigger.into(), &args)?;
        event.set_abortable();

        for (index, record) in snapshot.iter().enumerate() {
            if event.is_aborted() {
                break;
            }
            event.set_position(index as i64);
            self.spend(record);
            record.listener().call(&event, &args);
        }
        Ok(self)
    }

    /// Begins a cooperative sequential dispatch: listeners run one at a
    /// time and each must call [`Event::next`] before the next one runs.
    /// Configure and start it with [`ChainDispatch::dispatch`].
    pub fn chain(&self, trigger: impl Into<Trigger>) -> ChainDispatch<'_> {
        ChainDispatch {
            emitter: self,
            trigger: trigger.into(),
            args: Vec::new(),
            complete: None,
            hook: None,
        }
    }

    /// Begins a concurrent fan-out dispatch: every listener is scheduled on
    /// the runtime and the completion fires once all of them have called
    /// [`Event::done`]. Configure and start it with
    /// [`ParallelDispatch::dispatch`].
    pub fn parallel(&self, trigger: impl Into<Trigger>) -> ParallelDispatch<'_> {
        ParallelDispatch {
            emitter: self,
            trigger: trigger.into(),
            args: Vec::new(),
            complete: None,
            hook: None,
        }
    }
}

/// Explicit continuation state for one `chain` dispatch.
///
/// Lives in the event's continuation slot between steps; [`Event::next`]
/// takes it out and advances. Completion fires exactly once because the
/// callback is consumed by the terminal transition.
pub(crate) struct ChainState {
    emitter: Emitter,
    remaining: VecDeque<RecordRef>,
    args: Arc<Vec<Value>>,
    complete: Option<Completion>,
    hook: Option<Hook>,
}

impl ChainState {
    pub(crate) fn advance(mut self, event: &Event) {
        if event.is_aborted() || event.is_prevented() {
            self.finish(event);
            return;
        }
        let Some(record) = self.remaining.pop_front() else {
            self.finish(event);
            return;
        };

        event.bump_position();
        let emitter = self.emitter.clone();
        let args = Arc::clone(&self.args);
        let hook = self.hook.clone();

        // Reinstall before delivering so the listener's own `next()` can
        // advance the chain, synchronously or from a deferred task.
        event.install_chain(self);
        deliver(&emitter, &record, event, &args, hook);
    }

    fn finish(mut self, event: &Event) {
        if let Some(complete) = self.complete.take() {
            complete(event);
        }
    }
}

/// Spends the record's budget, then delivers either directly to the
/// listener or through the hook, which takes charge of invoking it.
fn deliver(emitter: &Emitter, record: &RecordRef, event: &Event, args: &Arc<Vec<Value>>, hook: Option<Hook>) {
    emitter.spend(record);
    match hook {
        Some(hook) => {
            let proceed: Proceed = {
                let record = record.clone();
                let event = event.clone();
                let args = Arc::clone(args);
                Box::new(move || record.listener().call(&event, &args))
            };
            (hook.as_ref())(record, event, args.as_slice(), proceed);
        }
        None => record.listener().call(event, args),
    }
}

/// Builder for one `chain` dispatch.
#[must_use = "a chain dispatch does nothing until `.dispatch()` is called"]
pub struct ChainDispatch<'a> {
    emitter: &'a Emitter,
    trigger: Trigger,
    args: Vec<Value>,
    complete: Option<Completion>,
    hook: Option<Hook>,
}

impl ChainDispatch<'_> {
    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Terminal callback: fires exactly once, after the last listener's
    /// continuation, or immediately on abort/prevent or an empty snapshot.
    pub fn complete(mut self, complete: impl FnOnce(&Event) + Send + 'static) -> Self {
        self.complete = Some(Box::new(complete));
        self
    }

    pub fn hook(
        mut self,
        hook: impl Fn(&RecordRef, &Event, &[Value], Proceed) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Arms the dispatch and runs the first listener (synchronously, on
    /// the calling context). The engine never auto-advances: a listener
    /// that never calls [`Event::next`] stalls the chain and its
    /// completion forever.
    pub fn dispatch(self) -> Result<(), DispatchError> {
        let ChainDispatch {
            emitter,
            trigger,
            args,
            complete,
            hook,
        } = self;
        let (event, snapshot) = emitter.arm(trigger, &args)?;
        event.set_abortable();
        event.set_preventable();
        event.set_position(-1);

        let state = ChainState {
            emitter: emitter.clone(),
            remaining: snapshot.into_iter().collect(),
            args: Arc::new(args),
            complete,
            hook,
        };
        state.advance(&event);
        Ok(())
    }
}

/// Builder for one `parallel` dispatch.
#[must_use = "a parallel dispatch does nothing until `.dispatch()` is called"]
pub struct ParallelDispatch<'a> {
    emitter: &'a Emitter,
    trigger: Trigger,
    args: Vec<Value>,
    complete: Option<Completion>,
    hook: Option<Hook>,
}

impl ParallelDispatch<'_> {
    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Terminal callback: fires exactly once, after every listener has
    /// called [`Event::done`], or on the next scheduling turn for an empty
    /// snapshot.
    pub fn complete(mut self, complete: impl FnOnce(&Event) + Send + 'static) -> Self {
        self.complete = Some(Box::new(complete));
        self
    }

    pub fn hook(
        mut self,
        hook: impl Fn(&RecordRef, &Event, &[Value], Proceed) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Arms the dispatch and schedules every listener on the runtime.
    /// Nothing caller-visible runs synchronously within this call, even
    /// for an empty snapshot. Requires a Tokio runtime context.
    ///
    /// [`Event::prevent`] only affects the flags the completion observes;
    /// it does not stop already-scheduled listener invocations.
    pub fn dispatch(self) -> Result<(), DispatchError> {
        let ParallelDispatch {
            emitter,
            trigger,
            args,
            complete,
            hook,
        } = self;
        let (event, snapshot) = emitter.arm(trigger, &args)?;
        event.set_preventable();
        event.set_pending(snapshot.len() as i64);

        // Always install a completion so `done()` counts down even when
        // the caller supplied no callback.
        let complete = complete.unwrap_or_else(|| Box::new(|_| {}));
        event.install_completion(complete);

        if snapshot.is_empty() {
            let event = event.clone();
            tokio::spawn(async move {
                event.complete_now();
            });
            return Ok(());
        }

        let args = Arc::new(args);
        for record in snapshot {
            let emitter = emitter.clone();
            let event = event.clone();
            let args = Arc::clone(&args);
            let hook = hook.clone();
            tokio::spawn(async move {
                deliver(&emitter, &record, &event, &args, hook);
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Listener;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_snapshot_ignores_registrations_made_mid_dispatch() {
        let emitter = Emitter::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_calls = calls.clone();
        let registering = {
            let emitter = emitter.clone();
            Listener::new(move |_, _| {
                let count = inner_calls.clone();
                emitter.on(
                    "test",
                    Listener::new(move |_, _| {
                        count.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            })
        };

        emitter.on("test", registering);
        emitter.emit("test", []).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0, "late registration fired in-flight");

        emitter.emit("test", []).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_listener_dispatch_still_counts() {
        let emitter = Emitter::new();
        emitter.emit("test", []).unwrap();
        assert_eq!(emitter.ever("test"), 1);
        assert_eq!(emitter.size("test"), 0);
    }

    #[test]
    fn unhandled_error_event_carries_first_argument() {
        let emitter = Emitter::new();

        match emitter.emit("error", [json!("boom")]).map(|_| ()) {
            Err(DispatchError::UnhandledError(value)) => assert_eq!(value, json!("boom")),
            other => panic!("expected UnhandledError, got {other:?}"),
        }

        match emitter.emit("error", []).map(|_| ()) {
            Err(DispatchError::UnspecifiedError) => {}
            other => panic!("expected UnspecifiedError, got {other:?}"),
        }
    }

    #[test]
    fn relayed_aborted_event_delivers_to_no_one() {
        let emitter = Emitter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        emitter.on(
            "test",
            Listener::new(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let event = Event::new("test");
        emitter.emit(&event, []).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        event.abort();
        emitter.emit(&event, []).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
