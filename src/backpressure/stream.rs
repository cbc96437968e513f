// Copyright (c) 2025 - Cowboy AI, Inc.
//! Async bridge from [`Flowable`] to `futures::Stream`.
//!
//! The stream requests `batch` values up front and another `batch` each time
//! the previous batch has been polled out, so at most `batch` values are ever
//! in flight between the flowable and the async consumer.
//!
//! ```rust,ignore
//! let mut stream = Flowable::range(0, 1_000).into_stream(32);
//! while let Some(value) = stream.next().await {
//!     handle(value?).await;
//! }
//! ```

use super::{Demand, FlowObserver, Flowable};
use crate::errors::{StreamError, StreamResult};
use crate::event::Event;
use futures::channel::mpsc;
use futures::stream::{FusedStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Demand-driven stream of `StreamResult<T>`; dropping it cancels upstream
pub struct FlowStream<T> {
    receiver: mpsc::UnboundedReceiver<Event<T>>,
    demand: Demand,
    batch: u64,
    received: u64,
    done: bool,
}

struct ChannelObserver<T> {
    sender: mpsc::UnboundedSender<Event<T>>,
}

impl<T: Send + 'static> FlowObserver<T> for ChannelObserver<T> {
    fn on_next(&mut self, value: T, demand: &Demand) {
        if self.sender.unbounded_send(Event::Next(value)).is_err() {
            demand.cancel();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        let _ = self.sender.unbounded_send(Event::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.sender.unbounded_send(Event::Complete);
    }
}

impl<T: Send + 'static> Flowable<T> {
    /// Consume this flowable as an async stream, `batch` values at a time
    pub fn into_stream(self, batch: u64) -> FlowStream<T> {
        let batch = batch.max(1);
        let (sender, receiver) = mpsc::unbounded();
        let demand = self.subscribe(batch, ChannelObserver { sender });
        FlowStream {
            receiver,
            demand,
            batch,
            received: 0,
            done: false,
        }
    }
}

impl<T> FlowStream<T> {
    /// The demand handle backing this stream
    pub fn demand(&self) -> &Demand {
        &self.demand
    }
}

impl<T> Stream for FlowStream<T> {
    type Item = StreamResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Event::Next(value))) => {
                self.received += 1;
                if self.received == self.batch {
                    self.received = 0;
                    self.demand.request(self.batch);
                }
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Event::Error(error))) => {
                self.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Event::Complete)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> FusedStream for FlowStream<T> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<T> Drop for FlowStream<T> {
    fn drop(&mut self) {
        self.demand.cancel();
    }
}
