pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod loader;
pub mod registry;
pub mod source;
pub mod subscribers;

pub use bootstrap::{Replay, ReplayOutcome, build_codecs};
pub use config::{ConfigParser, ReplayConfig, TomlParser};
pub use dispatch::{
    DEFAULT_FAULT_LIMIT, DispatchLoop, DispatchReport, Hook, HookContext, HookError, LoopState, Step, StopHandle, Subscriber,
    SubscriberStats,
};
pub use error::{DispatchFault, EngineError, SourceError};
pub use feed::{EventFeed, SourceId, SourceState, SourceStats};
pub use registry::{SubscriberId, SubscriptionRegistry};
pub use source::{ChannelSender, ChannelSource, EventSource, SourceFuture, VecSource};
pub use subscribers::{CountingSubscriber, EventCounts, LogSubscriber};
