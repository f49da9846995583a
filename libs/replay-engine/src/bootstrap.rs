use std::sync::Arc;

use replay_api::{CodecRegistry, SchemaCodec, TypeKey};

use crate::config::{ReplayConfig, SubscriberKind};
use crate::dispatch::{DispatchLoop, DispatchReport, StopHandle, Subscriber};
use crate::error::EngineError;
use crate::loader;
use crate::source::VecSource;
use crate::subscribers::{CountingSubscriber, EventCounts, LogSubscriber};

/// A configured replay: codecs registered, sources loaded, subscribers
/// attached, loop idle.
pub struct Replay {
    codecs: Arc<CodecRegistry>,
    dispatch: DispatchLoop,
    counters: Vec<(String, EventCounts)>,
    rejected: usize,
}

impl std::fmt::Debug for Replay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replay")
            .field("codecs", &self.codecs)
            .field("dispatch", &self.dispatch)
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// Everything a finished replay produced.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub report: DispatchReport,
    /// Final tallies of every `counter` subscriber, in declaration order.
    pub counts: Vec<(String, EventCounts)>,
    /// Records skipped while loading sources.
    pub rejected: usize,
}

/// Register every declared type as a schema-driven codec.
///
/// A codec failing its registration check aborts startup.
pub fn build_codecs(config: &ReplayConfig) -> Result<CodecRegistry, EngineError> {
    let mut codecs = CodecRegistry::new();
    for type_cfg in &config.types {
        let ctx = format!("type '{}'", type_cfg.name);
        let codec = SchemaCodec::new(TypeKey::new(&type_cfg.name), type_cfg.fields.clone())
            .map_err(|e| EngineError::from(e).with_context(&ctx))?;
        codecs
            .register(Arc::new(codec))
            .map_err(|e| EngineError::from(e).with_context(&ctx))?;
        tracing::info!(type_key = %type_cfg.name, fields = type_cfg.fields.len(), "registered codec");
    }
    Ok(codecs)
}

impl Replay {
    /// Bootstrap a replay from a parsed configuration.
    ///
    /// Registers codecs, loads every source file, attaches subscribers.
    pub fn bootstrap(config: &ReplayConfig) -> Result<Self, EngineError> {
        config.validate()?;

        // --- 1. Codecs ---
        let codecs = Arc::new(build_codecs(config)?);
        let mut dispatch = DispatchLoop::new();

        // --- 2. Sources ---
        let mut rejected = 0;
        for source_cfg in &config.sources {
            let ctx = format!("source '{}'", source_cfg.name);
            let path = config.resolve_path(&source_cfg.path);
            let loaded = loader::load_file(&path, source_cfg.format, &codecs).map_err(|e| e.with_context(&ctx))?;
            rejected += loaded.rejected;
            dispatch
                .add_source(Box::new(VecSource::new(source_cfg.name.clone(), loaded.records)))
                .map_err(|e| e.with_context(&ctx))?;
        }

        // --- 3. Subscribers ---
        let mut counters = Vec::new();
        for sub_cfg in &config.subscribers {
            let subscriber: Box<dyn Subscriber> = match sub_cfg.kind {
                SubscriberKind::Counter => {
                    let counter = CountingSubscriber::new(sub_cfg.name.clone());
                    counters.push((sub_cfg.name.clone(), counter.counts()));
                    Box::new(counter)
                }
                SubscriberKind::Log => Box::new(LogSubscriber::new(sub_cfg.name.clone())),
            };
            dispatch.add_subscriber(subscriber, sub_cfg.types.iter().map(TypeKey::new))?;
            tracing::info!(subscriber = %sub_cfg.name, kind = %sub_cfg.kind, types = ?sub_cfg.types, "attached subscriber");
        }

        Ok(Replay {
            codecs,
            dispatch,
            counters,
            rejected,
        })
    }

    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    /// The idle loop, e.g. to attach further sources or subscribers.
    pub fn dispatch_mut(&mut self) -> &mut DispatchLoop {
        &mut self.dispatch
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.dispatch.stop_handle()
    }

    /// Run the loop to completion.
    pub async fn run(mut self) -> Result<ReplayOutcome, EngineError> {
        let report = self.dispatch.run().await?;
        Ok(ReplayOutcome {
            report,
            counts: self.counters,
            rejected: self.rejected,
        })
    }
}
