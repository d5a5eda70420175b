//! Closable subscriptions to transport streams.
//!
//! A [`Subscription`] drives a stream on a background task and hands each item
//! to a callback. Closing it is synchronous: once [`Subscription::close`]
//! returns, no further item is delivered.

use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a stream being consumed in the background.
///
/// Dropping the handle closes the subscription.
pub struct Subscription {
    label: &'static str,
    open: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn a task feeding every item of `stream` to `on_item`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T, F>(label: &'static str, mut stream: BoxStream<'static, T>, mut on_item: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let open = Arc::new(AtomicBool::new(true));
        let still_open = open.clone();

        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                if !still_open.load(Ordering::SeqCst) {
                    break;
                }
                on_item(item);
            }
            still_open.store(false, Ordering::SeqCst);
            debug!("{} stream ended", label);
        });

        Self {
            label,
            open,
            handle: Some(handle),
        }
    }

    /// Whether items are still being delivered.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Stop delivering items and abort the background task.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("{} subscription closed", self.label);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .finish()
    }
}
