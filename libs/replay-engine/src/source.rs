use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use replay_api::EventRecord;

use crate::error::SourceError;

/// Boxed future returned by [`EventSource::next`].
pub type SourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<EventRecord>, SourceError>> + Send + 'a>>;

/// Producer of records in non-decreasing `event_time` order.
///
/// Pulling from a source is the only point where the dispatch loop may
/// suspend. `Ok(None)` means the source is exhausted and will not be polled
/// again.
pub trait EventSource: Send {
    fn name(&self) -> &str;

    fn next(&mut self) -> SourceFuture<'_>;
}

/// In-memory source over a pre-loaded list of records.
#[derive(Debug)]
pub struct VecSource {
    name: String,
    records: std::vec::IntoIter<EventRecord>,
}

impl VecSource {
    pub fn new(name: impl Into<String>, records: Vec<EventRecord>) -> Self {
        Self {
            name: name.into(),
            records: records.into_iter(),
        }
    }

    /// Records not yet pulled.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl EventSource for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&mut self) -> SourceFuture<'_> {
        let next = self.records.next();
        Box::pin(async move { Ok(next) })
    }
}

/// Live source fed through a tokio channel.
///
/// The source is exhausted once every sender is dropped and the buffer has
/// drained. A sender may push `Err` to report a producer failure.
#[derive(Debug)]
pub struct ChannelSource {
    name: String,
    rx: mpsc::Receiver<Result<EventRecord, SourceError>>,
}

/// Sending half of a [`ChannelSource`].
pub type ChannelSender = mpsc::Sender<Result<EventRecord, SourceError>>;

impl ChannelSource {
    pub fn new(name: impl Into<String>, buffer: usize) -> (ChannelSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            Self {
                name: name.into(),
                rx,
            },
        )
    }
}

impl EventSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&mut self) -> SourceFuture<'_> {
        Box::pin(async move { self.rx.recv().await.transpose() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_api::{StructuredForm, TypeKey, UnixNanos};

    fn record(t: i64) -> EventRecord {
        EventRecord::new(TypeKey::new("tick"), "X", UnixNanos(t), UnixNanos(t), StructuredForm::new())
    }

    #[tokio::test]
    async fn vec_source_yields_then_exhausts() {
        let mut source = VecSource::new("mem", vec![record(1), record(2)]);
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.next().await.unwrap(), Some(record(1)));
        assert_eq!(source.next().await.unwrap(), Some(record(2)));
        assert_eq!(source.next().await.unwrap(), None);
        assert_eq!(source.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn channel_source_ends_when_senders_drop() {
        let (tx, mut source) = ChannelSource::new("live", 4);
        tx.send(Ok(record(5))).await.unwrap();
        tx.send(Err(SourceError::new("socket reset"))).await.unwrap();
        drop(tx);

        assert_eq!(source.name(), "live");
        assert_eq!(source.next().await.unwrap(), Some(record(5)));
        assert_eq!(source.next().await.unwrap_err().message, "socket reset");
        assert_eq!(source.next().await.unwrap(), None);
    }
}
