//! Last-value-wins image broadcast
//!
//! A single dispatcher moves one encoded image at a time to however many
//! clients are waiting. Clients register a one-shot handoff slot; the
//! dispatcher fills up to `fanout_limit` registered slots per image without
//! blocking, and only when an image found nobody waiting does it hold that
//! image and block for the next arrival. No image history is kept: whatever
//! was not handed off when the next image arrives is gone.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Default cap on clients served from a single image in one delivery pass.
/// Bounds how long one encode cycle's fan-out can take.
pub const DEFAULT_FANOUT_LIMIT: usize = 50;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame distributor closed")]
pub struct DistributorClosed;

type Waiter = oneshot::Sender<Bytes>;

/// Creates a connected distributor handle and dispatcher pair.
///
/// The `Distributor` side is cloned into every client session; the
/// `Dispatcher` side is owned by the encode task.
pub fn channel(fanout_limit: usize) -> (Distributor, Dispatcher) {
    let (waiters_tx, waiters_rx) = mpsc::unbounded_channel();

    (
        Distributor { waiters: waiters_tx },
        Dispatcher {
            waiters: waiters_rx,
            fanout_limit: fanout_limit.max(1),
            stats: DispatchStats::default(),
        },
    )
}

/// Client-side handle for requesting images
#[derive(Clone)]
pub struct Distributor {
    waiters: mpsc::UnboundedSender<Waiter>,
}

impl Distributor {
    /// Registers this client as waiting for the next dispatched image.
    ///
    /// Registration is immediate; the returned future resolves once the
    /// dispatcher hands an image over. Dropping the future deregisters the
    /// client.
    pub fn register(&self) -> Result<PendingImage, DistributorClosed> {
        let (tx, rx) = oneshot::channel();
        self.waiters.send(tx).map_err(|_| DistributorClosed)?;
        Ok(PendingImage { rx })
    }

    /// Opens a subscription, discarding one image first.
    ///
    /// The throwaway receive swallows whatever image was mid-delivery when
    /// this client arrived, so the first image a subscription yields was
    /// produced after the client connected.
    pub async fn subscribe(&self) -> Result<Subscription, DistributorClosed> {
        self.register()?.await?;
        Ok(Subscription {
            distributor: self.clone(),
        })
    }
}

/// A registered wait for one image
pub struct PendingImage {
    rx: oneshot::Receiver<Bytes>,
}

impl Future for PendingImage {
    type Output = Result<Bytes, DistributorClosed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| DistributorClosed))
    }
}

/// A drained client session receiving images in production order
pub struct Subscription {
    distributor: Distributor,
}

impl Subscription {
    /// Waits for the next image
    pub async fn next(&self) -> Result<Bytes, DistributorClosed> {
        self.distributor.register()?.await
    }
}

/// Counters for image delivery
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStats {
    /// Images offered for delivery
    pub images_dispatched: u64,
    /// Client handoffs completed
    pub deliveries: u64,
    /// Dispatches that found no client and had to hold the image
    pub idle_handoffs: u64,
}

/// Producer-side delivery engine, owned by the encode task
pub struct Dispatcher {
    waiters: mpsc::UnboundedReceiver<Waiter>,
    fanout_limit: usize,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Delivers one image to currently waiting clients.
    ///
    /// Two phases: a non-blocking fan-out serving up to `fanout_limit`
    /// registered clients with the same image, then, only if that pass
    /// served nobody, one blocking handoff that waits for a client and
    /// delivers this exact image to it. Clients that deregistered before
    /// delivery are skipped and do not count toward the limit.
    ///
    /// Returns the number of clients served.
    pub async fn dispatch(&mut self, image: Bytes) -> Result<usize, DistributorClosed> {
        self.stats.images_dispatched += 1;

        let mut served = 0;
        while served < self.fanout_limit {
            match self.waiters.try_recv() {
                Ok(waiter) => {
                    if waiter.send(image.clone()).is_ok() {
                        served += 1;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                // No client can ever register again; the blocking phase
                // reports closure when nothing was served
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }

        if served == 0 {
            self.stats.idle_handoffs += 1;
            // Nobody was waiting; hold this image until one client arrives
            loop {
                let waiter = self.waiters.recv().await.ok_or(DistributorClosed)?;
                if waiter.send(image.clone()).is_ok() {
                    served = 1;
                    break;
                }
            }
        }

        self.stats.deliveries += served as u64;
        debug!(served, "image dispatched");
        Ok(served)
    }

    /// Delivery counters so far
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_single_delivery_shares_buffer() {
        let (distributor, mut dispatcher) = channel(DEFAULT_FANOUT_LIMIT);
        let pending = distributor.register().unwrap();

        let image = Bytes::from_static(b"frame-a");
        let served = dispatcher.dispatch(image.clone()).await.unwrap();
        assert_eq!(served, 1);

        let received = pending.await.unwrap();
        assert_eq!(received, image);
        // Same allocation, not a copy
        assert_eq!(received.as_ptr(), image.as_ptr());
    }

    #[tokio::test]
    async fn test_fanout_serves_all_waiters_up_to_limit() {
        let (distributor, mut dispatcher) = channel(3);

        let mut pending: Vec<_> = (0..5).map(|_| distributor.register().unwrap()).collect();

        let a = Bytes::from_static(b"frame-a");
        let b = Bytes::from_static(b"frame-b");

        // First image reaches exactly the first three registrations
        assert_eq!(dispatcher.dispatch(a.clone()).await.unwrap(), 3);
        // Next image picks up the remaining two
        assert_eq!(dispatcher.dispatch(b.clone()).await.unwrap(), 2);

        let last_two = pending.split_off(3);
        for waiter in pending {
            assert_eq!(waiter.await.unwrap(), a);
        }
        for waiter in last_two {
            assert_eq!(waiter.await.unwrap(), b);
        }
    }

    #[tokio::test]
    async fn test_default_limit_fanout() {
        let (distributor, mut dispatcher) = channel(DEFAULT_FANOUT_LIMIT);

        let pending: Vec<_> = (0..60).map(|_| distributor.register().unwrap()).collect();

        let a = Bytes::from_static(b"frame-a");
        let b = Bytes::from_static(b"frame-b");
        assert_eq!(dispatcher.dispatch(a.clone()).await.unwrap(), 50);
        assert_eq!(dispatcher.dispatch(b.clone()).await.unwrap(), 10);

        for (i, waiter) in pending.into_iter().enumerate() {
            let expected = if i < 50 { &a } else { &b };
            assert_eq!(&waiter.await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_dispatch_blocks_until_first_client() {
        let (distributor, mut dispatcher) = channel(DEFAULT_FANOUT_LIMIT);

        let image = Bytes::from_static(b"held-frame");
        let held = image.clone();
        let mut dispatch = tokio::spawn(async move { dispatcher.dispatch(held).await });

        // No clients: the dispatch must not complete
        assert!(timeout(Duration::from_millis(50), &mut dispatch)
            .await
            .is_err());

        // First client arrival releases it with that exact image
        let pending = distributor.register().unwrap();
        let served = dispatch.await.unwrap().unwrap();
        assert_eq!(served, 1);

        let received = pending.await.unwrap();
        assert_eq!(received, image);
        assert_eq!(received.as_ptr(), image.as_ptr());
    }

    #[tokio::test]
    async fn test_deregistered_client_is_skipped() {
        let (distributor, mut dispatcher) = channel(1);

        let gone = distributor.register().unwrap();
        drop(gone);
        let live = distributor.register().unwrap();

        // The dead registration does not count toward the fan-out limit
        let served = dispatcher
            .dispatch(Bytes::from_static(b"frame-a"))
            .await
            .unwrap();
        assert_eq!(served, 1);
        assert_eq!(&live.await.unwrap()[..], b"frame-a");
    }

    #[tokio::test]
    async fn test_subscription_discards_in_flight_image() {
        let (distributor, mut dispatcher) = channel(DEFAULT_FANOUT_LIMIT);

        // An established client is already waiting for image A
        let established = distributor.register().unwrap();

        // A new client connects while A is about to be delivered
        let late = distributor.clone();
        let late_session = tokio::spawn(async move {
            let subscription = late.subscribe().await.unwrap();
            subscription.next().await.unwrap()
        });
        sleep(Duration::from_millis(20)).await;

        let a = Bytes::from_static(b"frame-a");
        let b = Bytes::from_static(b"frame-b");
        assert_eq!(dispatcher.dispatch(a.clone()).await.unwrap(), 2);
        assert_eq!(established.await.unwrap(), a);

        dispatcher.dispatch(b.clone()).await.unwrap();

        // The late client's first used image postdates its connection
        assert_eq!(late_session.await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_closed_after_dispatcher_drop() {
        let (distributor, dispatcher) = channel(DEFAULT_FANOUT_LIMIT);

        let pending = distributor.register().unwrap();
        drop(dispatcher);

        assert_eq!(pending.await, Err(DistributorClosed));
        assert!(distributor.register().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_stats() {
        let (distributor, mut dispatcher) = channel(2);

        let p1 = distributor.register().unwrap();
        let p2 = distributor.register().unwrap();
        dispatcher
            .dispatch(Bytes::from_static(b"frame-a"))
            .await
            .unwrap();
        drop((p1, p2));

        let stats = dispatcher.stats();
        assert_eq!(stats.images_dispatched, 1);
        assert_eq!(stats.deliveries, 2);
        assert_eq!(stats.idle_handoffs, 0);
    }
}
