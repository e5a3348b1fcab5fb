//! Owned subscription handles.
//!
//! Every component that listens to a store owns one [`Subscription`] per
//! listener and must release it when its view goes away. Stopping detaches
//! the listener from the backend immediately and cancels the task applying
//! its snapshots; dropping the handle does the same.
//!
//! A [`SubscriptionScope`] additionally lets the owner of a whole session
//! release every subscription opened in it at once, whoever holds them.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::debug;

use ebchat_store::{DetachGuard, Listener};

/// The releasable half of a subscription, shared with its scope.
#[derive(Debug, Default)]
struct Slot {
    guard: Mutex<Option<DetachGuard>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Slot {
    /// Detach and cancel. Returns whether anything was still attached.
    fn release(&self) -> bool {
        let guard = self
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        guard.is_some()
    }

    fn is_active(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[derive(Debug)]
pub struct Subscription {
    name: &'static str,
    slot: Arc<Slot>,
}

impl Subscription {
    /// Drive `listener` on a new task, handing every snapshot to `handler`
    /// in delivery order.
    pub fn spawn<T, F, Fut>(name: &'static str, listener: Listener<T>, mut handler: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (mut rx, guard) = listener.into_parts();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                handler(snapshot).await;
            }
            debug!(subscription = name, "listener closed by backend");
        });
        debug!(subscription = name, "subscription started");
        Self {
            name,
            slot: Arc::new(Slot {
                guard: Mutex::new(Some(guard)),
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// A handle that owns nothing, for views whose store refused the
    /// subscription.
    pub fn inactive(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }

    pub fn stop(&mut self) {
        if self.slot.release() {
            debug!(subscription = self.name, "subscription stopped");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Every subscription opened for one session. Closing the scope releases
/// them all synchronously; subscriptions adopted afterwards are released on
/// arrival.
#[derive(Debug)]
pub struct SubscriptionScope {
    // `None` once closed.
    slots: Mutex<Option<Vec<Weak<Slot>>>>,
}

impl SubscriptionScope {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Some(Vec::new())),
        }
    }

    /// Tie `subscription` to this scope.
    pub fn adopt(&self, mut subscription: Subscription) -> Subscription {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slots) = slots.as_mut() {
                slots.retain(|slot| slot.strong_count() > 0);
                slots.push(Arc::downgrade(&subscription.slot));
                return subscription;
            }
        }
        debug!(subscription = subscription.name, "scope already closed");
        subscription.stop();
        subscription
    }

    /// Release every adopted subscription still attached. Returns how many
    /// were released.
    pub fn close(&self) -> usize {
        let slots = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        slots
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| slot.release())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for SubscriptionScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn stop_detaches_synchronously() {
        let detached = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let counter = detached.clone();
        let listener = Listener::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let seen_in_task = seen.clone();
        let mut sub = Subscription::spawn("test", listener, move |_v| {
            let seen = seen_in_task.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(sub.is_active());

        tx.send(1).unwrap();
        tokio::task::yield_now().await;

        sub.stop();
        assert!(!sub.is_active());
        assert_eq!(detached.load(Ordering::SeqCst), 1);

        // Dropping after stop does not detach twice.
        drop(sub);
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inactive_handle_is_inert() {
        let mut sub = Subscription::inactive("nothing");
        assert!(!sub.is_active());
        sub.stop();
        assert_eq!(sub.name(), "nothing");
    }

    fn counting_listener(detached: &Arc<AtomicUsize>) -> (mpsc::UnboundedSender<u32>, Listener<u32>) {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let counter = detached.clone();
        let listener = Listener::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (tx, listener)
    }

    #[tokio::test]
    async fn closing_scope_releases_held_subscriptions() {
        let detached = Arc::new(AtomicUsize::new(0));
        let scope = SubscriptionScope::new();

        let (_tx1, first) = counting_listener(&detached);
        let (_tx2, second) = counting_listener(&detached);
        let first = scope.adopt(Subscription::spawn("first", first, |_v| async {}));
        let mut second = scope.adopt(Subscription::spawn("second", second, |_v| async {}));
        second.stop();
        assert_eq!(detached.load(Ordering::SeqCst), 1);

        assert_eq!(scope.close(), 1);
        assert!(scope.is_closed());
        assert!(!first.is_active());
        assert_eq!(detached.load(Ordering::SeqCst), 2);

        // Late arrivals are released straight away.
        let (_tx3, late) = counting_listener(&detached);
        let late = scope.adopt(Subscription::spawn("late", late, |_v| async {}));
        assert!(!late.is_active());
        assert_eq!(detached.load(Ordering::SeqCst), 3);

        drop(first);
        drop(late);
        assert_eq!(detached.load(Ordering::SeqCst), 3);
    }
}
