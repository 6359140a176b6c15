use std::collections::HashMap;
use std::sync::Arc;

use crate::record::{Listener, RecordRef};

/// One event type's ordered listener list.
///
/// Emptiness and existence are orthogonal: an empty bucket survives in the
/// registry only while `reserved` is set.
#[derive(Debug, Default)]
struct Bucket {
    records: Vec<RecordRef>,
    reserved: bool,
}

/// Owning storage behind an [`crate::Emitter`]: listener buckets, lifetime
/// dispatch counters, the conditional-unregistration ledger, and the most
/// recently created registration records.
///
/// Pure map manipulation; callers hold the emitter's lock around these
/// operations and never across a listener invocation.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    buckets: HashMap<String, Bucket>,
    emitted: HashMap<String, u64>,
    until: HashMap<String, Vec<RecordRef>>,
    last_registered: Option<Vec<RecordRef>>,
}

impl Registry {
    /// Appends (or prepends) a record to its type's bucket.
    pub fn insert(&mut self, record: RecordRef, first: bool) {
        let bucket = self.buckets.entry(record.event_type().to_string()).or_default();
        if first {
            bucket.records.insert(0, record);
        } else {
            bucket.records.push(record);
        }
    }

    /// Removes every record of `event_type`. The bucket itself survives,
    /// empty, only if reserved.
    pub fn clear_type(&mut self, event_type: &str) {
        if let Some(bucket) = self.buckets.get_mut(event_type) {
            if bucket.reserved {
                bucket.records.clear();
            } else {
                self.buckets.remove(event_type);
            }
        }
    }

    /// Removes the first record of `event_type` whose listener matches by
    /// identity. Returns whether anything was removed.
    pub fn remove_listener(&mut self, event_type: &str, listener: &Listener) -> bool {
        let Some(bucket) = self.buckets.get_mut(event_type) else {
            return false;
        };
        let Some(index) = bucket.records.iter().position(|r| r.listener().same(listener)) else {
            return false;
        };
        bucket.records.remove(index);
        self.prune(event_type);
        true
    }

    /// Removes exactly `record` from its own type's bucket.
    pub fn remove_record(&mut self, record: &RecordRef) -> bool {
        let Some(bucket) = self.buckets.get_mut(record.event_type()) else {
            return false;
        };
        let Some(index) = bucket.records.iter().position(|r| Arc::ptr_eq(r, record)) else {
            return false;
        };
        bucket.records.remove(index);
        self.prune(record.event_type());
        true
    }

    fn prune(&mut self, event_type: &str) {
        if let Some(bucket) = self.buckets.get(event_type) {
            if bucket.records.is_empty() && !bucket.reserved {
                self.buckets.remove(event_type);
            }
        }
    }

    /// An owned copy of the type's current records, empty if absent.
    pub fn snapshot(&self, event_type: &str) -> Vec<RecordRef> {
        self.buckets
            .get(event_type)
            .map(|b| b.records.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.buckets.get(event_type).map_or(0, |b| b.records.len())
    }

    pub fn count_all(&self) -> usize {
        self.buckets.values().map(|b| b.records.len()).sum()
    }

    pub fn all_records(&self) -> Vec<RecordRef> {
        self.buckets
            .values()
            .flat_map(|b| b.records.iter().cloned())
            .collect()
    }

    pub fn reserve(&mut self, event_type: &str) {
        self.buckets.entry(event_type.to_string()).or_default().reserved = true;
    }

    pub fn unreserve(&mut self, event_type: &str) {
        if let Some(bucket) = self.buckets.get_mut(event_type) {
            if bucket.records.is_empty() {
                self.buckets.remove(event_type);
            } else {
                bucket.reserved = false;
            }
        }
    }

    /// Names of every existing bucket, reserved ones included.
    pub fn event_types(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    /// Bumps the lifetime dispatch counter for `event_type` and returns
    /// the new count.
    pub fn record_dispatch(&mut self, event_type: &str) -> u64 {
        let count = self.emitted.entry(event_type.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn dispatched(&self, event_type: &str) -> u64 {
        self.emitted.get(event_type).copied().unwrap_or(0)
    }

    pub fn dispatched_total(&self) -> u64 {
        self.emitted.values().sum()
    }

    /// Files records for removal when `trigger` is next dispatched.
    pub fn file_until(&mut self, trigger: &str, records: &[RecordRef]) {
        self.until
            .entry(trigger.to_string())
            .or_default()
            .extend(records.iter().cloned());
    }

    /// Drains the ledger entry for `trigger`.
    pub fn take_due(&mut self, trigger: &str) -> Vec<RecordRef> {
        self.until.remove(trigger).unwrap_or_default()
    }

    pub fn set_last_registered(&mut self, records: Vec<RecordRef>) {
        self.last_registered = Some(records);
    }

    pub fn clear_last_registered(&mut self) {
        self.last_registered = None;
    }

    pub fn last_registered(&self) -> Vec<RecordRef> {
        self.last_registered.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, UNLIMITED};

    fn record(event_type: &str) -> RecordRef {
        Record::new(event_type.to_string(), Listener::new(|_, _| {}), UNLIMITED)
    }

    #[test]
    fn insert_first_prepends() {
        let mut registry = Registry::default();
        let a = record("test");
        let b = record("test");

        registry.insert(a.clone(), false);
        registry.insert(b.clone(), true);

        let snapshot = registry.snapshot("test");
        assert!(Arc::ptr_eq(&snapshot[0], &b));
        assert!(Arc::ptr_eq(&snapshot[1], &a));
    }

    #[test]
    fn empty_unreserved_bucket_is_pruned() {
        let mut registry = Registry::default();
        let rec = record("test");

        registry.insert(rec.clone(), false);
        assert_eq!(registry.event_types(), vec!["test".to_string()]);

        registry.remove_record(&rec);
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn reserved_bucket_survives_clearing() {
        let mut registry = Registry::default();
        registry.insert(record("test"), false);
        registry.reserve("test");

        registry.clear_type("test");
        assert_eq!(registry.event_types(), vec!["test".to_string()]);
        assert_eq!(registry.count("test"), 0);

        registry.unreserve("test");
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn unreserve_keeps_populated_bucket() {
        let mut registry = Registry::default();
        registry.reserve("test");
        registry.insert(record("test"), false);

        registry.unreserve("test");
        assert_eq!(registry.count("test"), 1);
    }

    #[test]
    fn remove_listener_drops_first_match_only() {
        let mut registry = Registry::default();
        let listener = Listener::new(|_, _| {});
        registry.insert(
            Record::new("test".to_string(), listener.clone(), UNLIMITED),
            false,
        );
        registry.insert(
            Record::new("test".to_string(), listener.clone(), UNLIMITED),
            false,
        );

        assert!(registry.remove_listener("test", &listener));
        assert_eq!(registry.count("test"), 1);

        assert!(registry.remove_listener("test", &listener));
        assert_eq!(registry.count("test"), 0);
        assert!(!registry.remove_listener("test", &listener));
    }

    #[test]
    fn dispatch_counters_accumulate() {
        let mut registry = Registry::default();
        assert_eq!(registry.dispatched("test"), 0);

        registry.record_dispatch("test");
        registry.record_dispatch("test");
        registry.record_dispatch("other");

        assert_eq!(registry.dispatched("test"), 2);
        assert_eq!(registry.dispatched("other"), 1);
        assert_eq!(registry.dispatched_total(), 3);
    }

    #[test]
    fn until_ledger_drains_once() {
        let mut registry = Registry::default();
        let rec = record("test");
        registry.insert(rec.clone(), false);
        registry.file_until("trigger", &[rec]);

        assert_eq!(registry.take_due("trigger").len(), 1);
        assert!(registry.take_due("trigger").is_empty());
    }
}
