//! Lazy per-handle event sequence.

use crate::ClientError;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use worksync_types::FileEvent;

/// One item on a [`FileStream`]: a normalized event, or the error that ended
/// the file's initial opening phase.
pub type StreamItem = Result<FileEvent, ClientError>;

pub(crate) type EventSink = mpsc::UnboundedSender<StreamItem>;

/// The lazy event sequence for one opened file.
///
/// The first item is the `Opened` event (native or synthesized); later items
/// are `Updated` and `Written` events in server order. The stream terminates
/// after the file is closed and the buffered events drain. There is no
/// backpressure: events buffer without bound until the consumer catches up.
///
/// A stream is obtained at most once per file via
/// [`RemoteFile::events`](crate::RemoteFile::events), which enforces the
/// single-consumer rule.
pub struct FileStream {
    receiver: mpsc::UnboundedReceiver<StreamItem>,
}

impl FileStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<StreamItem>) -> Self {
        Self { receiver }
    }

    /// Await the next event; `None` once the file is closed and drained.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }

    /// Stop accepting new events. Already-buffered events still deliver;
    /// idempotent.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Stream for FileStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
