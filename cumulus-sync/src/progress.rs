use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc::UnboundedSender;

use crate::context::SyncEvent;

/// Shared byte counter of one batch. Every part's stream feeds it, so the
/// reported `sent` value is the batch-wide running total.
#[derive(Clone)]
pub(crate) struct ProgressSink {
    sent: Arc<AtomicI64>,
    total: i64,
    events: UnboundedSender<SyncEvent>,
}

impl ProgressSink {
    pub(crate) fn new(total: i64, events: UnboundedSender<SyncEvent>) -> Self {
        Self {
            sent: Arc::new(AtomicI64::new(0)),
            total,
            events,
        }
    }

    fn add(&self, bytes: usize) {
        let sent = self.sent.fetch_add(bytes as i64, Ordering::Relaxed) + bytes as i64;
        let _ = self.events.send(SyncEvent::Progress {
            sent,
            total: self.total,
        });
    }
}

/// Wraps a read stream and reports every chunk that goes onto the wire.
pub(crate) struct ProgressStream<S> {
    inner: S,
    sink: ProgressSink,
}

impl<S> ProgressStream<S> {
    pub(crate) fn new(inner: S, sink: ProgressSink) -> Self {
        Self { inner, sink }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            this.sink.add(chunk.len());
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn reports_running_totals_per_chunk() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chunks: Vec<io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"de"))];
        let mut stream = ProgressStream::new(
            futures_util::stream::iter(chunks),
            ProgressSink::new(5, tx),
        );

        while stream.next().await.is_some() {}

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::Progress { sent, total } = event {
                seen.push((sent, total));
            }
        }
        assert_eq!(seen, vec![(3, 5), (5, 5)]);
    }
}
