// Copyright (c) 2025 - Cowboy AI, Inc.
//! Cooperative Demand Channel
//!
//! A pull-based channel for producers that can be suspended. The receiver
//! grants demand with [`DemandReceiver::request`]; [`DemandSender::send`]
//! waits until a unit of demand is available, so the producer can never get
//! ahead of what the consumer asked for and nothing is ever dropped.
//!
//! ```text
//!   DemandSender ──send().await──▶ [ permits ] ──▶ DemandReceiver
//!                                      ▲                 │
//!                                      └── request(k) ◀──┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let (sender, mut receiver) = demand_channel();
//!
//! tokio::spawn(async move {
//!     for i in 0..1_000 {
//!         sender.send(i).await?;   // suspends without demand
//!     }
//!     Ok::<_, StreamError>(())
//! });
//!
//! receiver.drive(&MyHandler, 16).await?;
//! ```

use crate::errors::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace};

/// Consumer-side processing for [`DemandReceiver::drive`]
#[async_trait]
pub trait DemandHandler<T: Send + 'static>: Send + Sync {
    /// Process one item
    ///
    /// # Returns
    ///
    /// Ok(()) to continue, Err to stop driving the channel
    async fn handle(&self, item: T) -> StreamResult<()>;
}

/// Create a demand channel with zero initial demand
pub fn demand_channel<T: Send + 'static>() -> (DemandSender<T>, DemandReceiver<T>) {
    let permits = Arc::new(Semaphore::new(0));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        DemandSender {
            permits: permits.clone(),
            tx,
        },
        DemandReceiver { permits, rx },
    )
}

/// Producer half; cloneable
pub struct DemandSender<T> {
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for DemandSender<T> {
    fn clone(&self) -> Self {
        Self {
            permits: self.permits.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> DemandSender<T> {
    /// Send `item` once the receiver has demand for it
    ///
    /// Fails with `Cancelled` once the receiver is gone.
    pub async fn send(&self, item: T) -> StreamResult<()> {
        let permit = self.permits.acquire().await?;
        permit.forget();
        self.tx.send(item).map_err(|_| StreamError::Cancelled)
    }

    /// Blocking variant of [`DemandSender::send`] for non-async producers
    ///
    /// Must not be called from inside an async runtime worker.
    pub fn blocking_send(&self, item: T) -> StreamResult<()> {
        futures::executor::block_on(self.send(item))
    }

    /// Demand granted but not yet spent
    pub fn outstanding_demand(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed() || self.tx.is_closed()
    }
}

/// Consumer half
pub struct DemandReceiver<T> {
    permits: Arc<Semaphore>,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Send + 'static> DemandReceiver<T> {
    /// Grant `k` more sends
    ///
    /// Demand beyond what the permit counter can hold is clamped.
    pub fn request(&self, k: u64) {
        let room = Semaphore::MAX_PERMITS.saturating_sub(self.permits.available_permits());
        let granted = usize::try_from(k).unwrap_or(usize::MAX).min(room);
        if granted > 0 {
            trace!(granted, "demand granted");
            self.permits.add_permits(granted);
        }
    }

    /// Next item, or None once every sender is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Feed every item to `handler`, requesting `batch` at a time
    ///
    /// # Returns
    ///
    /// Number of items handled before all senders were dropped
    pub async fn drive<H>(&mut self, handler: &H, batch: u64) -> StreamResult<u64>
    where
        H: DemandHandler<T> + ?Sized,
    {
        let batch = batch.max(1);
        let mut handled = 0u64;
        self.request(batch);
        while let Some(item) = self.rx.recv().await {
            handler.handle(item).await?;
            handled += 1;
            if handled % batch == 0 {
                self.request(batch);
            }
        }
        debug!(handled, "demand channel drained");
        Ok(handled)
    }
}

impl<T> Drop for DemandReceiver<T> {
    fn drop(&mut self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[test]
    fn test_send_waits_for_demand() {
        let (sender, mut receiver) = demand_channel::<i32>();
        let mut send = task::spawn(sender.send(1));

        assert_pending!(send.poll());
        receiver.request(1);
        assert!(send.is_woken());
        assert_ready_ok!(send.poll());

        assert_eq!(receiver.rx.try_recv().ok(), Some(1));
        assert_eq!(sender.outstanding_demand(), 0);
    }

    #[test]
    fn test_dropped_receiver_cancels_waiting_sender() {
        let (sender, receiver) = demand_channel::<i32>();
        let mut send = task::spawn(sender.send(1));

        assert_pending!(send.poll());
        drop(receiver);
        assert!(send.is_woken());
        match send.poll() {
            std::task::Poll::Ready(Err(StreamError::Cancelled)) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(sender.is_closed());
    }

    #[test]
    fn test_request_clamps_huge_demand() {
        let (sender, receiver) = demand_channel::<i32>();
        receiver.request(u64::MAX);
        receiver.request(u64::MAX);
        assert_eq!(sender.outstanding_demand(), Semaphore::MAX_PERMITS);
    }

    struct Recording {
        items: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl DemandHandler<u32> for Recording {
        async fn handle(&self, item: u32) -> StreamResult<()> {
            self.items.lock().unwrap().push(item);
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_producer_stops_at_granted_demand() {
        let (sender, mut receiver) = demand_channel::<u32>();
        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();
        tokio::spawn(async move {
            for i in 0..10u32 {
                if sender.send(i).await.is_err() {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        receiver.request(3);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sent.load(Ordering::SeqCst), 3);
        assert_eq!(receiver.recv().await, Some(0));
    }

    #[tokio::test]
    async fn test_drive_handles_everything_in_order() {
        let (sender, mut receiver) = demand_channel::<u32>();
        let producer = tokio::spawn(async move {
            for i in 0..100u32 {
                sender.send(i).await?;
            }
            Ok::<_, StreamError>(())
        });

        let handler = Recording {
            items: Mutex::new(Vec::new()),
        };
        let handled = receiver.drive(&handler, 8).await.unwrap();
        producer.await.unwrap().unwrap();

        assert_eq!(handled, 100);
        assert_eq!(*handler.items.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    struct Failing;

    #[async_trait]
    impl DemandHandler<u32> for Failing {
        async fn handle(&self, _item: u32) -> StreamResult<()> {
            Err(StreamError::source("handler refused"))
        }
    }

    #[tokio::test]
    async fn test_drive_stops_on_handler_error() {
        let (sender, mut receiver) = demand_channel::<u32>();
        tokio::spawn(async move {
            let _ = sender.send(1).await;
        });
        let result = receiver.drive(&Failing, 4).await;
        assert_eq!(result, Err(StreamError::source("handler refused")));
    }
}
