use std::collections::VecDeque;

use replay_api::{EventRecord, UnixNanos};

use crate::error::{DispatchFault, EngineError};
use crate::source::EventSource;

/// Position of a source in registration order. Breaks `event_time` ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub usize);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Open,
    Exhausted,
    /// Excluded after a failure or an ordering violation.
    Excluded,
}

/// Per-source counters, exposed for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub name: String,
    pub state: SourceState,
    pub emitted: u64,
}

struct SourceSlot {
    /// Released once the source is exhausted or excluded.
    source: Option<Box<dyn EventSource>>,
    name: String,
    head: Option<EventRecord>,
    last_event_time: Option<UnixNanos>,
    last_ingestion_time: Option<UnixNanos>,
    state: SourceState,
    emitted: u64,
}

impl SourceSlot {
    /// Pull the next record into `head`. Returns a fault if the source had to
    /// be excluded.
    async fn fill(&mut self) -> Option<DispatchFault> {
        let source = self.source.as_mut()?;
        match source.next().await {
            Ok(Some(record)) => {
                if let Some(previous) = self.last_event_time.filter(|p| record.event_time() < *p) {
                    self.close(SourceState::Excluded);
                    return Some(DispatchFault::NonMonotonicSource {
                        source_name: self.name.clone(),
                        previous,
                        got: record.event_time(),
                    });
                }
                if let Some(previous) = self.last_ingestion_time.filter(|p| record.ingestion_time() < *p) {
                    tracing::warn!(
                        source = %self.name,
                        previous = %previous,
                        got = %record.ingestion_time(),
                        "ingestion_time went backwards"
                    );
                }
                self.last_event_time = Some(record.event_time());
                self.last_ingestion_time = Some(record.ingestion_time());
                self.head = Some(record);
                None
            }
            Ok(None) => {
                tracing::debug!(source = %self.name, emitted = self.emitted, "source exhausted");
                self.close(SourceState::Exhausted);
                None
            }
            Err(e) => {
                self.close(SourceState::Excluded);
                Some(DispatchFault::SourceFailure {
                    source_name: self.name.clone(),
                    message: e.message,
                })
            }
        }
    }

    /// Release the source. A live producer sees its channel close.
    fn close(&mut self, state: SourceState) {
        self.state = state;
        self.source = None;
    }
}

/// K-way merge over registered sources.
///
/// Yields records in non-decreasing `event_time`. Equal times resolve by
/// source registration order, then by each source's own order. The feed
/// holds at most one buffered head per source and never emits a record while
/// an open source has no head, so a slow live source delays the merge rather
/// than being overtaken.
#[derive(Default)]
pub struct EventFeed {
    slots: Vec<SourceSlot>,
    faults: VecDeque<DispatchFault>,
}

impl std::fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("sources", &self.stats())
            .field("pending_faults", &self.faults.len())
            .finish()
    }
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Names must be unique within the feed.
    pub fn add_source(&mut self, source: Box<dyn EventSource>) -> Result<SourceId, EngineError> {
        let name = source.name().to_string();
        if self.slots.iter().any(|s| s.name == name) {
            return Err(EngineError::DuplicateSource(name));
        }
        let id = SourceId(self.slots.len());
        tracing::debug!(source = %name, id = %id, "registered source");
        self.slots.push(SourceSlot {
            source: Some(source),
            name,
            head: None,
            last_event_time: None,
            last_ingestion_time: None,
            state: SourceState::Open,
            emitted: 0,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> Vec<SourceStats> {
        self.slots
            .iter()
            .map(|s| SourceStats {
                name: s.name.clone(),
                state: s.state,
                emitted: s.emitted,
            })
            .collect()
    }

    /// Next merged record, or a fault raised while refilling heads.
    ///
    /// `None` once every source is exhausted or excluded and all buffered
    /// heads were emitted. Cancel-safe between pulls: a record already
    /// pulled stays buffered as its source's head.
    pub async fn next(&mut self) -> Option<Result<EventRecord, DispatchFault>> {
        loop {
            if let Some(fault) = self.faults.pop_front() {
                return Some(Err(fault));
            }

            for slot in self.slots.iter_mut() {
                if slot.state != SourceState::Open || slot.head.is_some() {
                    continue;
                }
                if let Some(fault) = slot.fill().await {
                    self.faults.push_back(fault);
                }
            }
            if !self.faults.is_empty() {
                continue;
            }

            let (_, idx) = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(idx, s)| s.head.as_ref().map(|h| (h.event_time(), idx)))
                .min()?;

            let slot = &mut self.slots[idx];
            slot.emitted += 1;
            return slot.head.take().map(Ok);
        }
    }

    /// Drop every source and buffered head.
    pub fn close(&mut self) {
        self.slots.clear();
        self.faults.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChannelSource, VecSource};
    use replay_api::{StructuredForm, TypeKey};

    fn record(kind: &str, t: i64) -> EventRecord {
        EventRecord::new(TypeKey::new(kind), kind, UnixNanos(t), UnixNanos(t), StructuredForm::new())
    }

    async fn drain(feed: &mut EventFeed) -> (Vec<EventRecord>, Vec<DispatchFault>) {
        let mut records = Vec::new();
        let mut faults = Vec::new();
        while let Some(item) = feed.next().await {
            match item {
                Ok(r) => records.push(r),
                Err(f) => faults.push(f),
            }
        }
        (records, faults)
    }

    #[tokio::test]
    async fn ties_follow_registration_order() {
        let mut feed = EventFeed::new();
        feed.add_source(Box::new(VecSource::new("a", vec![record("A", 100)]))).unwrap();
        feed.add_source(Box::new(VecSource::new("b", vec![record("B", 100)]))).unwrap();

        let (records, faults) = drain(&mut feed).await;
        assert!(faults.is_empty());
        let kinds: Vec<_> = records.iter().map(|r| r.type_key().as_str().to_string()).collect();
        assert_eq!(kinds, ["A", "B"]);
    }

    #[tokio::test]
    async fn merge_is_ordered_and_complete() {
        let mut feed = EventFeed::new();
        feed.add_source(Box::new(VecSource::new(
            "one",
            vec![record("x", 1), record("x", 4), record("x", 4), record("x", 9)],
        )))
        .unwrap();
        feed.add_source(Box::new(VecSource::new("two", vec![record("y", 2), record("y", 4)])))
            .unwrap();
        feed.add_source(Box::new(VecSource::new("empty", vec![]))).unwrap();

        let (records, faults) = drain(&mut feed).await;
        assert!(faults.is_empty());
        let order: Vec<_> = records
            .iter()
            .map(|r| (r.type_key().as_str().to_string(), r.event_time().0))
            .collect();
        assert_eq!(
            order,
            [
                ("x".to_string(), 1),
                ("y".to_string(), 2),
                ("x".to_string(), 4),
                ("x".to_string(), 4),
                ("y".to_string(), 4),
                ("x".to_string(), 9),
            ]
        );
        let stats = feed.stats();
        assert_eq!(stats[0].emitted, 4);
        assert_eq!(stats[1].emitted, 2);
        assert!(stats.iter().all(|s| s.state == SourceState::Exhausted));
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn non_monotonic_source_is_excluded() {
        let mut feed = EventFeed::new();
        feed.add_source(Box::new(VecSource::new(
            "broken",
            vec![record("x", 10), record("x", 5), record("x", 20)],
        )))
        .unwrap();
        feed.add_source(Box::new(VecSource::new("fine", vec![record("y", 7), record("y", 30)])))
            .unwrap();

        let (records, faults) = drain(&mut feed).await;
        let times: Vec<_> = records.iter().map(|r| r.event_time().0).collect();
        assert_eq!(times, [7, 10, 30]);
        assert_eq!(
            faults,
            [DispatchFault::NonMonotonicSource {
                source_name: "broken".into(),
                previous: UnixNanos(10),
                got: UnixNanos(5),
            }]
        );
        assert_eq!(feed.stats()[0].state, SourceState::Excluded);
    }

    #[tokio::test]
    async fn excluded_live_source_closes_its_channel() {
        let (tx, live) = ChannelSource::new("live", 1);
        let mut feed = EventFeed::new();
        feed.add_source(Box::new(live)).unwrap();

        tx.send(Ok(record("x", 10))).await.unwrap();
        assert_eq!(feed.next().await.unwrap().unwrap().event_time(), UnixNanos(10));
        tx.send(Ok(record("x", 5))).await.unwrap();
        assert!(matches!(
            feed.next().await,
            Some(Err(DispatchFault::NonMonotonicSource { .. }))
        ));

        assert!(tx.is_closed());
        assert!(tx.send(Ok(record("x", 20))).await.is_err());
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn ingestion_regression_is_tolerated() {
        let mut feed = EventFeed::new();
        let late = EventRecord::new(TypeKey::new("x"), "s", UnixNanos(1), UnixNanos(50), StructuredForm::new());
        let early = EventRecord::new(TypeKey::new("x"), "s", UnixNanos(2), UnixNanos(10), StructuredForm::new());
        feed.add_source(Box::new(VecSource::new("s", vec![late, early]))).unwrap();

        let (records, faults) = drain(&mut feed).await;
        assert_eq!(records.len(), 2);
        assert!(faults.is_empty());
    }

    #[tokio::test]
    async fn failing_source_is_excluded_and_others_continue() {
        let (tx, live) = ChannelSource::new("live", 4);
        tx.send(Ok(record("live", 3))).await.unwrap();
        tx.send(Err(crate::error::SourceError::new("disconnected"))).await.unwrap();
        drop(tx);

        let mut feed = EventFeed::new();
        feed.add_source(Box::new(live)).unwrap();
        feed.add_source(Box::new(VecSource::new("mem", vec![record("mem", 1), record("mem", 8)])))
            .unwrap();

        let (records, faults) = drain(&mut feed).await;
        let times: Vec<_> = records.iter().map(|r| r.event_time().0).collect();
        assert_eq!(times, [1, 3, 8]);
        assert!(matches!(
            faults.as_slice(),
            [DispatchFault::SourceFailure { source_name, .. }] if source_name == "live"
        ));
    }

    #[test]
    fn duplicate_source_names_are_rejected() {
        let mut feed = EventFeed::new();
        feed.add_source(Box::new(VecSource::new("s", vec![]))).unwrap();
        assert!(matches!(
            feed.add_source(Box::new(VecSource::new("s", vec![]))),
            Err(EngineError::DuplicateSource(name)) if name == "s"
        ));
    }
}
