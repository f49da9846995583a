use std::sync::Arc;

use tokio::sync::watch;

use replay_api::{EventRecord, TypeKey, UnixNanos};

use crate::error::{DispatchFault, EngineError};
use crate::feed::{EventFeed, SourceId, SourceStats};
use crate::registry::{SubscriberId, SubscriptionRegistry};
use crate::source::EventSource;

/// Error returned by a subscriber hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Start,
    Event,
    End,
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::Start => f.write_str("on_start"),
            Hook::Event => f.write_str("on_event"),
            Hook::End => f.write_str("on_end"),
        }
    }
}

/// Lifecycle of a [`DispatchLoop`].
///
/// `Idle → Running → Draining → Terminated`. Draining is entered on source
/// exhaustion or on a stop request; no further records are pulled from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Terminated,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => f.write_str("idle"),
            LoopState::Running => f.write_str("running"),
            LoopState::Draining => f.write_str("draining"),
            LoopState::Terminated => f.write_str("terminated"),
        }
    }
}

/// Consumer of dispatched records.
///
/// Hooks run on the loop's task, one at a time. `on_start` runs for every
/// subscriber before the first record, `on_end` after the last. An error from
/// any hook is recorded and the loop moves on.
pub trait Subscriber: Send {
    fn name(&self) -> &str;

    fn on_start(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_event(&mut self, record: &EventRecord, ctx: &mut HookContext<'_>) -> Result<(), HookError>;

    fn on_end(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

enum Deferred {
    Subscribe(SubscriberId, TypeKey),
    Unsubscribe(SubscriberId, TypeKey),
    Stop,
}

/// Handle passed to subscriber hooks.
///
/// Subscription changes and stop requests made here are queued and applied
/// once the current record has reached every subscriber resolved for it, so
/// they take effect from the next record on. Changes queued from `on_end`
/// are discarded.
pub struct HookContext<'a> {
    subscriber: SubscriberId,
    now: Option<UnixNanos>,
    pending: &'a mut Vec<Deferred>,
}

impl HookContext<'_> {
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber
    }

    /// `event_time` of the record being dispatched, or of the last one
    /// dispatched. `None` before the first record.
    pub fn now(&self) -> Option<UnixNanos> {
        self.now
    }

    pub fn subscribe(&mut self, type_key: impl Into<TypeKey>) {
        self.pending.push(Deferred::Subscribe(self.subscriber, type_key.into()));
    }

    pub fn unsubscribe(&mut self, type_key: impl Into<TypeKey>) {
        self.pending.push(Deferred::Unsubscribe(self.subscriber, type_key.into()));
    }

    pub fn request_stop(&mut self) {
        self.pending.push(Deferred::Stop);
    }
}

/// Cloneable handle that asks a running loop to stop.
///
/// A record already pulled is still delivered to all of its subscribers; a
/// pull that is still waiting on a source is abandoned.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a single [`DispatchLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One record was pulled and handed to this many subscribers.
    Dispatched { deliveries: usize },
    /// A source was excluded; no record was pulled.
    Faulted,
    /// Every source is done. The loop is now draining.
    Exhausted,
    /// A stop request was observed. The loop is now draining.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    pub name: String,
    pub deliveries: u64,
    pub failures: u64,
}

/// Summary returned when the loop terminates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records pulled from the feed.
    pub records: u64,
    /// Records no subscriber was registered for.
    pub dropped: u64,
    /// `on_event` invocations.
    pub deliveries: u64,
    /// Whether the loop ended on a stop request rather than exhaustion.
    pub stopped: bool,
    pub subscribers: Vec<SubscriberStats>,
    pub sources: Vec<SourceStats>,
    /// Faults in the order they happened, up to the loop's fault limit.
    pub faults: Vec<DispatchFault>,
    /// Faults past the limit, counted but not kept.
    pub faults_omitted: u64,
}

/// Faults kept in a [`DispatchReport`] unless changed with
/// [`DispatchLoop::set_fault_limit`].
pub const DEFAULT_FAULT_LIMIT: usize = 1024;

struct SubscriberSlot {
    name: String,
    subscriber: Box<dyn Subscriber>,
    deliveries: u64,
    failures: u64,
}

/// Single-threaded driver: pulls the next record from the feed, resolves its
/// subscribers and runs their hooks to completion before pulling again.
pub struct DispatchLoop {
    state: LoopState,
    feed: EventFeed,
    registry: SubscriptionRegistry,
    subscribers: Vec<SubscriberSlot>,
    pending: Vec<Deferred>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    now: Option<UnixNanos>,
    report: DispatchReport,
    fault_limit: usize,
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("state", &self.state)
            .field("feed", &self.feed)
            .field("registry", &self.registry)
            .field("subscribers", &self.subscribers.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("now", &self.now)
            .finish()
    }
}

impl Default for DispatchLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchLoop {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            state: LoopState::Idle,
            feed: EventFeed::new(),
            registry: SubscriptionRegistry::new(),
            subscribers: Vec::new(),
            pending: Vec::new(),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            now: None,
            report: DispatchReport::default(),
            fault_limit: DEFAULT_FAULT_LIMIT,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn now(&self) -> Option<UnixNanos> {
        self.now
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Cap the faults kept in the report. Later faults are only counted.
    pub fn set_fault_limit(&mut self, limit: usize) {
        self.fault_limit = limit;
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn add_source(&mut self, source: Box<dyn EventSource>) -> Result<SourceId, EngineError> {
        self.expect(LoopState::Idle)?;
        self.feed.add_source(source)
    }

    /// Register a subscriber with its initial subscriptions.
    pub fn add_subscriber(
        &mut self,
        subscriber: Box<dyn Subscriber>,
        types: impl IntoIterator<Item = TypeKey>,
    ) -> Result<SubscriberId, EngineError> {
        self.expect(LoopState::Idle)?;
        let name = subscriber.name().to_string();
        if self.subscribers.iter().any(|s| s.name == name) {
            return Err(EngineError::DuplicateSubscriber(name));
        }
        let id = SubscriberId(self.subscribers.len());
        for type_key in types {
            self.registry.subscribe(id, type_key);
        }
        tracing::debug!(subscriber = %name, id = %id, types = ?self.registry.types_of(id), "registered subscriber");
        self.subscribers.push(SubscriberSlot {
            name,
            subscriber,
            deliveries: 0,
            failures: 0,
        });
        Ok(id)
    }

    /// Subscribe from outside a hook. Takes effect on the next pulled record.
    pub fn subscribe(&mut self, id: SubscriberId, type_key: impl Into<TypeKey>) -> Result<bool, EngineError> {
        self.expect_mutable(id)?;
        Ok(self.registry.subscribe(id, type_key.into()))
    }

    pub fn unsubscribe(&mut self, id: SubscriberId, type_key: impl Into<TypeKey>) -> Result<bool, EngineError> {
        self.expect_mutable(id)?;
        Ok(self.registry.unsubscribe(id, &type_key.into()))
    }

    /// Run every `on_start` hook, in registration order, and enter `Running`.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.expect(LoopState::Idle)?;
        tracing::info!(
            sources = self.feed.len(),
            subscribers = self.subscribers.len(),
            "dispatch loop starting"
        );
        for idx in 0..self.subscribers.len() {
            let result = {
                let slot = &mut self.subscribers[idx];
                let mut ctx = HookContext {
                    subscriber: SubscriberId(idx),
                    now: self.now,
                    pending: &mut self.pending,
                };
                slot.subscriber.on_start(&mut ctx)
            };
            self.settle(idx, Hook::Start, result);
        }
        self.state = LoopState::Running;
        self.apply_pending();
        Ok(())
    }

    /// Pull one record and deliver it.
    ///
    /// Suspends only while the feed waits on a source. A stop request wins
    /// over a pending pull.
    pub async fn step(&mut self) -> Result<Step, EngineError> {
        self.expect(LoopState::Running)?;

        let stop_requested = *self.stop_rx.borrow_and_update();
        if stop_requested {
            return Ok(self.drain(Step::Stopped));
        }

        let next = tokio::select! {
            biased;
            _ = self.stop_rx.changed() => return Ok(self.drain(Step::Stopped)),
            next = self.feed.next() => next,
        };

        match next {
            None => Ok(self.drain(Step::Exhausted)),
            Some(Err(fault)) => {
                tracing::warn!(%fault, "source excluded from feed");
                self.record_fault(fault);
                Ok(Step::Faulted)
            }
            Some(Ok(record)) => Ok(Step::Dispatched {
                deliveries: self.dispatch(&record),
            }),
        }
    }

    /// Start if idle, step until draining, then finish.
    pub async fn run(&mut self) -> Result<DispatchReport, EngineError> {
        if self.state == LoopState::Idle {
            self.start()?;
        }
        while self.state == LoopState::Running {
            self.step().await?;
        }
        self.finish()
    }

    /// Run every `on_end` hook in registration order, release sources,
    /// subscribers and subscriptions, and return the report.
    ///
    /// Called on a running loop, this ends it as if stopped.
    pub fn finish(&mut self) -> Result<DispatchReport, EngineError> {
        match self.state {
            LoopState::Draining => {}
            LoopState::Running => {
                self.drain(Step::Stopped);
            }
            actual => {
                return Err(EngineError::InvalidState {
                    expected: LoopState::Draining,
                    actual,
                });
            }
        }

        for idx in 0..self.subscribers.len() {
            let result = {
                let slot = &mut self.subscribers[idx];
                let mut ctx = HookContext {
                    subscriber: SubscriberId(idx),
                    now: self.now,
                    pending: &mut self.pending,
                };
                slot.subscriber.on_end(&mut ctx)
            };
            self.settle(idx, Hook::End, result);
        }
        self.pending.clear();

        let mut report = std::mem::take(&mut self.report);
        report.subscribers = self
            .subscribers
            .iter()
            .map(|s| SubscriberStats {
                name: s.name.clone(),
                deliveries: s.deliveries,
                failures: s.failures,
            })
            .collect();
        report.sources = self.feed.stats();

        self.feed.close();
        self.registry.clear();
        self.subscribers.clear();
        self.state = LoopState::Terminated;

        tracing::info!(
            records = report.records,
            deliveries = report.deliveries,
            dropped = report.dropped,
            faults = report.faults.len() as u64 + report.faults_omitted,
            stopped = report.stopped,
            "dispatch loop terminated"
        );
        Ok(report)
    }

    fn dispatch(&mut self, record: &EventRecord) -> usize {
        self.now = Some(record.event_time());
        self.report.records += 1;

        let targets = self.registry.resolve(record.type_key()).to_vec();
        if targets.is_empty() {
            self.report.dropped += 1;
            tracing::trace!(type_key = %record.type_key(), "no subscribers, record dropped");
        }

        for id in &targets {
            let idx = id.index();
            let result = {
                let slot = &mut self.subscribers[idx];
                let mut ctx = HookContext {
                    subscriber: *id,
                    now: self.now,
                    pending: &mut self.pending,
                };
                slot.subscriber.on_event(record, &mut ctx)
            };
            self.settle(idx, Hook::Event, result);
        }

        self.apply_pending();
        targets.len()
    }

    fn settle(&mut self, idx: usize, hook: Hook, result: Result<(), HookError>) {
        let slot = &mut self.subscribers[idx];
        if hook == Hook::Event {
            slot.deliveries += 1;
            self.report.deliveries += 1;
        }
        if let Err(e) = result {
            slot.failures += 1;
            tracing::warn!(subscriber = %slot.name, %hook, error = %e, "subscriber hook failed");
            let fault = DispatchFault::SubscriberHookFailure {
                subscriber: slot.name.clone(),
                hook,
                message: e.to_string(),
            };
            self.record_fault(fault);
        }
    }

    fn record_fault(&mut self, fault: DispatchFault) {
        if self.report.faults.len() < self.fault_limit {
            self.report.faults.push(fault);
        } else {
            self.report.faults_omitted += 1;
        }
    }

    fn apply_pending(&mut self) {
        for change in std::mem::take(&mut self.pending) {
            match change {
                Deferred::Subscribe(id, type_key) => {
                    if self.registry.subscribe(id, type_key.clone()) {
                        tracing::debug!(subscriber = %id, %type_key, "subscribed");
                    }
                }
                Deferred::Unsubscribe(id, type_key) => {
                    if self.registry.unsubscribe(id, &type_key) {
                        tracing::debug!(subscriber = %id, %type_key, "unsubscribed");
                    }
                }
                Deferred::Stop => {
                    self.stop_tx.send_replace(true);
                }
            }
        }
    }

    fn drain(&mut self, step: Step) -> Step {
        self.state = LoopState::Draining;
        self.report.stopped = step == Step::Stopped;
        tracing::debug!(?step, "dispatch loop draining");
        step
    }

    fn expect(&self, expected: LoopState) -> Result<(), EngineError> {
        if self.state != expected {
            return Err(EngineError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn expect_mutable(&self, id: SubscriberId) -> Result<(), EngineError> {
        if !matches!(self.state, LoopState::Idle | LoopState::Running) {
            return Err(EngineError::InvalidState {
                expected: LoopState::Running,
                actual: self.state,
            });
        }
        if id.index() >= self.subscribers.len() {
            return Err(EngineError::UnknownSubscriber(id.to_string()));
        }
        Ok(())
    }
}
