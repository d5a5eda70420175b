//! High-level entry point tying the BLE link, the sample history and the
//! visible time window together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ble::{
    BtleplugTransport, ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionState,
    Transport,
};
use crate::config::Config;
use crate::data::{filter, Sample, SampleStore, TimeWindow};
use crate::error::{Error, Result};
use crate::notify::{AlertEvent, AlertSink, LogAlertSink, NotificationGateway};
use crate::registry::DeviceRegistry;
use crate::storage::{FileStore, KeyValueStore};
use crate::utils::{Clock, SystemClock};

/// Handle for a registered callback.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Snapshot of the link for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Whether a scan is running.
    pub scanning: bool,
    /// Identifier of the connected peripheral.
    pub identifier: Option<String>,
}

/// A micro:bit thermometer session.
pub struct TemperatureMonitor<T: Transport = BtleplugTransport> {
    manager: ConnectionManager<T>,
    store: SampleStore,
    gateway: Arc<NotificationGateway>,
    window_tx: watch::Sender<TimeWindow>,
    callback_counter: AtomicU64,
}

impl TemperatureMonitor<BtleplugTransport> {
    /// Open a monitor on the system Bluetooth adapter with file-backed state.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is unavailable or the storage directory
    /// cannot be created.
    pub async fn open(config: &Config) -> Result<Self> {
        let transport = Arc::new(BtleplugTransport::new().await?);
        let storage = Arc::new(FileStore::open(config.storage_dir())?);

        Ok(Self::with_parts(
            transport,
            storage,
            Box::new(LogAlertSink),
            Arc::new(SystemClock),
            config,
        ))
    }
}

impl<T: Transport> TemperatureMonitor<T> {
    /// Assemble a monitor from explicit parts.
    ///
    /// Persisted history and the remembered device are loaded here.
    pub fn with_parts(
        transport: Arc<T>,
        storage: Arc<dyn KeyValueStore>,
        sink: Box<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let store = SampleStore::open(storage.clone(), config.persist_policy());
        let registry = Arc::new(DeviceRegistry::load(storage));
        let gateway = Arc::new(NotificationGateway::with_text(
            sink,
            config.alert_title.clone(),
            config.alert_body.clone(),
        ));

        let manager = ConnectionManager::new(
            transport,
            store.clone(),
            registry,
            gateway.clone(),
            clock,
            ConnectionOptions::from(config),
        );

        let (window_tx, _) = watch::channel(TimeWindow::ALL_TIME);

        Self {
            manager,
            store,
            gateway,
            window_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Find the thermometer and start receiving temperatures.
    ///
    /// A stale disconnect alert is dismissed once notifications flow again.
    pub async fn connect(&self) -> Result<()> {
        self.manager.start_discovery().await?;
        self.gateway.cancel_all();
        Ok(())
    }

    /// Stop a [`connect`](Self::connect) that is still scanning or
    /// connecting. The interrupted call returns [`Error::Cancelled`].
    pub async fn cancel_connect(&self) -> Result<()> {
        self.manager.cancel_discovery().await
    }

    /// Disconnect without raising an alert.
    pub async fn disconnect_manually(&self) -> Result<()> {
        self.manager.disconnect_manually().await
    }

    /// Narrow the visible samples to `[start, end)`.
    pub fn set_time_window(&self, start: Option<i64>, end: Option<i64>) -> Result<()> {
        self.set_window(TimeWindow::new(start, end)?);
        Ok(())
    }

    /// Replace the visible window.
    pub fn set_window(&self, window: TimeWindow) {
        debug!("Time window set to {}", window);
        self.window_tx.send_replace(window);
    }

    /// Show every sample again.
    pub fn reset_time_window(&self) {
        self.set_window(TimeWindow::ALL_TIME);
    }

    /// The visible window.
    pub fn time_window(&self) -> TimeWindow {
        *self.window_tx.borrow()
    }

    /// Samples inside the current window, in arrival order.
    pub fn visible_samples(&self) -> Vec<Sample> {
        filter::apply(&self.store.all(), &self.time_window())
    }

    /// Every stored sample, in arrival order.
    pub fn all_samples(&self) -> Vec<Sample> {
        self.store.all()
    }

    /// Most recent sample.
    pub fn latest_sample(&self) -> Option<Sample> {
        self.store.latest()
    }

    /// Snapshot of the connection state, scan activity and peripheral.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.manager.state(),
            scanning: self.manager.is_scanning(),
            identifier: self.manager.peripheral_identifier(),
        }
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe()
    }

    /// Subscribe to disconnect alerts being raised and dismissed.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.gateway.subscribe()
    }

    /// Register a callback receiving the visible samples.
    ///
    /// Called once with the current view, then again whenever a sample
    /// arrives or the window changes. Must be called from within a Tokio
    /// runtime.
    pub fn on_visible_samples_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&[Sample]) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut samples_rx = self.store.subscribe();
        let mut window_rx = self.window_tx.subscribe();
        let store = self.store.clone();

        let handle = tokio::spawn(async move {
            loop {
                let window = *window_rx.borrow_and_update();
                callback(&filter::apply(&store.all(), &window));

                tokio::select! {
                    received = samples_rx.recv() => match received {
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    changed = window_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Connection manager driving the link.
    pub fn manager(&self) -> &ConnectionManager<T> {
        &self.manager
    }

    /// The sample history.
    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Disconnect if needed and flush pending history writes.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down temperature monitor");

        match self.manager.disconnect_manually().await {
            Ok(()) | Err(Error::InvalidState { .. }) => {}
            Err(e) => warn!("Error disconnecting during shutdown: {}", e),
        }

        self.store.flush()
    }
}
