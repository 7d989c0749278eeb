//! Per-request frame channel between the orchestrator and the response body.
//!
//! A bounded single-producer/single-consumer channel. `publish` waits while
//! the buffer is full and fails as soon as the consumer is gone. The stream
//! side yields frames in publication order and ends after the end-of-stream
//! frame; if the sink is dropped without one, the stream just stops.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use toolstream_core::{StreamClosed, StreamFrame};
use tracing::trace;

/// Create a sink/stream pair holding at most `capacity` frames in flight.
pub fn frame_channel(capacity: usize) -> (FrameSink, FrameStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameSink { tx },
        FrameStream {
            rx: ReceiverStream::new(rx),
            finished: false,
        },
    )
}

/// Producer half, owned by the orchestrator run.
#[derive(Debug)]
pub struct FrameSink {
    tx: mpsc::Sender<StreamFrame>,
}

impl FrameSink {
    /// Publish one frame, waiting for buffer space.
    pub async fn publish(&self, frame: StreamFrame) -> Result<(), StreamClosed> {
        trace!(ordinal = frame.ordinal, "publish frame");
        self.tx.send(frame).await.map_err(|_| StreamClosed)
    }

    /// Publish the end-of-stream frame. Nothing published afterwards is
    /// delivered.
    pub async fn finish(&self, ordinal: u32) -> Result<(), StreamClosed> {
        self.publish(StreamFrame::end_of_stream(ordinal)).await
    }

    /// Resolves once the consumer has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, drained by the wire encoder.
#[derive(Debug)]
pub struct FrameStream {
    rx: ReceiverStream<StreamFrame>,
    finished: bool,
}

impl FrameStream {
    /// Next frame, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        if self.finished {
            return None;
        }
        let frame = self.rx.next().await;
        self.observe(frame.as_ref());
        frame
    }

    fn observe(&mut self, frame: Option<&StreamFrame>) {
        match frame {
            Some(f) if f.is_end_of_stream() => {
                self.finished = true;
                self.rx.close();
            }
            None => self.finished = true,
            Some(_) => {}
        }
    }
}

impl Stream for FrameStream {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamFrame>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(frame) => {
                self.observe(frame.as_ref());
                Poll::Ready(frame)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
