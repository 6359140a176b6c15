//! In-process event dispatch with three delivery protocols.
//!
//! An [`Emitter`] holds named listener registrations and dispatches events
//! to them: [`Emitter::emit`] delivers synchronously in order,
//! [`Emitter::chain`] hands control from listener to listener through
//! [`Event::next`], and [`Emitter::parallel`] fans listeners out on the
//! Tokio runtime and joins them through [`Event::done`]. Registrations can
//! carry invocation budgets, conditional-unregistration triggers (`until`),
//! and time boxes (`within`).
//!
//! ```
//! use emcee::{Emitter, Listener};
//! use serde_json::json;
//!
//! let emitter = Emitter::new();
//! emitter.on(
//!     "greet",
//!     Listener::new(|_event, args| {
//!         assert_eq!(args[0], json!("world"));
//!     }),
//! );
//! emitter.emit("greet", [json!("world")]).unwrap();
//! assert_eq!(emitter.ever("greet"), 1);
//! ```

pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod event;
pub mod record;
mod registry;
pub mod store;

pub use dispatch::{ChainDispatch, Completion, Hook, ParallelDispatch, Proceed, Trigger};
pub use emitter::{Emitter, EmitterOptions, EventFactory, ExpireCallback, Registration};
pub use error::DispatchError;
pub use event::Event;
pub use record::{IntoListeners, IntoTypes, Listener, Record, RecordRef};
pub use store::DataStore;
