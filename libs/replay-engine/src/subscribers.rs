use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use replay_api::{EventRecord, TypeKey};

use crate::dispatch::{HookContext, HookError, Subscriber};

/// Shared per-type counters. Outlives the subscriber that fills it.
#[derive(Debug, Clone, Default)]
pub struct EventCounts(Arc<Mutex<BTreeMap<TypeKey, u64>>>);

impl EventCounts {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<TypeKey, u64>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn increment(&self, type_key: &TypeKey) {
        *self.lock().entry(type_key.clone()).or_insert(0) += 1;
    }

    pub fn get(&self, type_key: &TypeKey) -> u64 {
        self.lock().get(type_key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.lock().values().sum()
    }

    pub fn snapshot(&self) -> BTreeMap<TypeKey, u64> {
        self.lock().clone()
    }
}

/// Counts received records per type and logs the tally on end.
#[derive(Debug)]
pub struct CountingSubscriber {
    name: String,
    counts: EventCounts,
}

impl CountingSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counts: EventCounts::default(),
        }
    }

    pub fn counts(&self) -> EventCounts {
        self.counts.clone()
    }
}

impl Subscriber for CountingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&mut self, record: &EventRecord, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.counts.increment(record.type_key());
        Ok(())
    }

    fn on_end(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        for (type_key, count) in self.counts.snapshot() {
            tracing::info!(subscriber = %self.name, %type_key, count, "records received");
        }
        Ok(())
    }
}

/// Logs each received record in its structured form.
#[derive(Debug)]
pub struct LogSubscriber {
    name: String,
}

impl LogSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Subscriber for LogSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&mut self, record: &EventRecord, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        let fields = serde_json::to_string(&record.structured())?;
        tracing::info!(
            subscriber = %self.name,
            type_key = %record.type_key(),
            event_time = record.event_time().as_i64(),
            %fields,
            "record"
        );
        Ok(())
    }
}
