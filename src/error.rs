use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the dispatch entry points.
///
/// Dispatching the reserved `error` event type with no listeners registered
/// is the only way dispatch itself can fail; everything else (stalled
/// chains, `done()` overshoot) is a documented caller contract rather than
/// an error the engine raises.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The `error` event type was dispatched with no listeners registered;
    /// the first dispatch argument is carried.
    #[error("unhandled 'error' event: {0}")]
    UnhandledError(Value),

    /// The `error` event type was dispatched with no listeners registered
    /// and nothing to report.
    #[error("uncaught, unspecified 'error' event")]
    UnspecifiedError,
}
