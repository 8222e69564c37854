//! Fan-out notifications.
//!
//! `Notifier::register` hands back a `Subscription` (the delivery stream) and
//! a `CancelSubscription`. `trigger` never waits on a subscriber: every
//! delivery is its own spawned task, so one stalled consumer cannot hold up
//! the producer or any other subscriber. Within a single subscription, values
//! usually arrive in trigger order, but two triggers racing their delivery
//! tasks may land out of order.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SUBSCRIPTION_BUFFER: usize = 16;

struct Slot<T> {
    tx: mpsc::Sender<T>,
    cancelled: CancellationToken,
}

type Slots<T> = Arc<RwLock<HashMap<u64, Slot<T>>>>;

/// Publish/subscribe hub for values of one type.
pub struct Notifier<T> {
    slots: Slots<T>,
    next_id: AtomicU64,
}

impl<T> Default for Notifier<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Notifier<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Open a new subscription for future values.
    pub fn register(&self) -> (Subscription<T>, CancelSubscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancelled = CancellationToken::new();

        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Slot {
                    tx,
                    cancelled: cancelled.clone(),
                },
            );

        let slots: Weak<RwLock<HashMap<u64, Slot<T>>>> = Arc::downgrade(&self.slots);
        let cancel = CancelSubscription {
            cancelled: cancelled.clone(),
            detach: Arc::new(move || {
                if let Some(slots) = slots.upgrade() {
                    slots
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                }
            }),
        };

        (Subscription { rx, cancelled }, cancel)
    }

    /// Deliver `value` to every active subscription.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self, value: T) {
        let mut closed = Vec::new();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            for (id, slot) in slots.iter() {
                if slot.tx.is_closed() {
                    closed.push(*id);
                    continue;
                }
                let tx = slot.tx.clone();
                let cancelled = slot.cancelled.clone();
                let value = value.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancelled.cancelled() => {}
                        _ = tx.send(value) => {}
                    }
                });
            }
        }

        // Subscriptions dropped without cancel() are pruned lazily.
        if !closed.is_empty() {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            for id in closed {
                slots.remove(&id);
            }
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving half of a registration.
///
/// Yields `None` once the subscription has been cancelled.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    cancelled: CancellationToken,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.cancelled.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.cancelled.is_cancelled())
            .finish()
    }
}

/// Cancels one subscription. Cloneable; calling `cancel` repeatedly is a no-op.
#[derive(Clone)]
pub struct CancelSubscription {
    cancelled: CancellationToken,
    detach: Arc<dyn Fn() + Send + Sync>,
}

impl CancelSubscription {
    pub fn cancel(&self) {
        self.cancelled.cancel();
        (self.detach)();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

impl fmt::Debug for CancelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSubscription")
            .field("cancelled", &self.cancelled.is_cancelled())
            .finish()
    }
}
