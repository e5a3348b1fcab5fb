//! Live subscription primitive shared by every store.
//!
//! A [`Listener`] receives full snapshots (never diffs). Its [`DetachGuard`]
//! unregisters it from the backend when dropped, so a forgotten listener
//! cannot keep receiving updates for a view that no longer exists.

use tokio::sync::mpsc;

type Detach = Box<dyn FnOnce() + Send>;

/// Unregisters a subscription from its backend exactly once, on drop.
pub struct DetachGuard(Option<Detach>);

impl DetachGuard {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(detach)))
    }
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.0.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for DetachGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DetachGuard").field(&self.0.is_some()).finish()
    }
}

#[derive(Debug)]
pub struct Listener<T> {
    rx: mpsc::UnboundedReceiver<T>,
    guard: DetachGuard,
}

impl<T> Listener<T> {
    /// Wrap a delivery channel. `detach` runs when the listener (or its
    /// guard, after [`Listener::into_parts`]) is dropped.
    pub fn new(rx: mpsc::UnboundedReceiver<T>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            guard: DetachGuard::new(detach),
        }
    }

    /// Wait for the next snapshot. `None` once the backend side is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a snapshot that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Collapse everything queued into the newest snapshot.
    pub fn latest(&mut self) -> Option<T> {
        let mut last = None;
        while let Ok(value) = self.rx.try_recv() {
            last = Some(value);
        }
        last
    }

    /// Split into the receiving half and the guard, so the owner can detach
    /// synchronously while another task drains the receiver.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<T>, DetachGuard) {
        (self.rx, self.guard)
    }

    /// Unregister from the backend now.
    pub fn detach(self) {
        drop(self);
    }
}
