#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use emcee::Listener;

/// A listener that counts its invocations.
pub fn counting_listener() -> (Listener, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let listener = Listener::new(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (listener, calls)
}

/// Shared ordered log for asserting invocation order across listeners.
pub fn call_log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// A listener that appends `label` to `log` each time it fires.
pub fn logging_listener(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Listener {
    let log = log.clone();
    Listener::new(move |_, _| {
        log.lock().unwrap().push(label);
    })
}

pub fn logged(log: &Arc<Mutex<Vec<&'static str>>>) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}
