//! BLE connection management.
//!
//! [`ConnectionManager`] owns the scan → connect → discover → subscribe
//! lifecycle for the single target peripheral. It is the only writer of the
//! [`ConnectionState`] and of the peripheral handle. Only one discovery
//! sequence runs at a time; a second request while one is in flight is
//! rejected with [`Error::InvalidState`].

use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::subscription::Subscription;
use super::transport::{Advertisement, Transport};
use super::uuids::{
    matches_device_name, DEVICE_NAME_MARKER, TEMPERATURE_CHARACTERISTIC_UUID,
    TEMPERATURE_PERIOD_UUID, TEMPERATURE_SERVICE_UUID,
};
use crate::config::Config;
use crate::data::{Sample, SampleStore};
use crate::error::{Error, Result};
use crate::notify::NotificationGateway;
use crate::registry::DeviceRegistry;
use crate::utils::Clock;

/// Connection state of the target peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link and no discovery in progress.
    #[default]
    Disconnected,
    /// Scanning for a device whose name matches the marker.
    Scanning,
    /// Establishing the link.
    Connecting,
    /// Enumerating services and subscribing.
    Discovering,
    /// Receiving temperature notifications.
    Subscribed,
}

impl ConnectionState {
    /// Check if temperature notifications are flowing.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Subscribed)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Scanning | Self::Connecting | Self::Discovering)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Subscribed => write!(f, "Subscribed"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The peripheral involved, once one has been targeted.
    pub identifier: Option<String>,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Tunables for the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Substring an advertised name must contain.
    pub name_marker: String,
    /// Deadline applied to each of connect, discovery and subscribe.
    pub connect_timeout: Option<Duration>,
    /// Sampling period to request from the peripheral after subscribing.
    pub sample_period_ms: Option<u16>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            name_marker: DEVICE_NAME_MARKER.to_string(),
            connect_timeout: Some(Duration::from_secs(20)),
            sample_period_ms: None,
        }
    }
}

impl From<&Config> for ConnectionOptions {
    fn from(config: &Config) -> Self {
        Self {
            name_marker: config.device_name_marker.clone(),
            connect_timeout: config.connect_timeout(),
            sample_period_ms: config.sample_period_ms,
        }
    }
}

/// Why an in-flight discovery sequence was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    Manual,
    LinkLost,
}

struct Attempt {
    token: CancellationToken,
    abort: Option<AbortReason>,
}

struct Status {
    state: ConnectionState,
    /// Peripheral targeted by the current sequence or link.
    target: Option<String>,
}

/// The live link to the peripheral. Dropping it closes both subscriptions.
struct PeripheralHandle {
    identifier: String,
    notifications: Option<Subscription>,
    _watcher: Subscription,
}

/// State shared with the background notification and disconnect tasks.
struct Shared {
    status: RwLock<Status>,
    link: Mutex<Option<PeripheralHandle>>,
    scanning: AtomicBool,
    attempt: Mutex<Option<Attempt>>,
    store: SampleStore,
    gateway: Arc<NotificationGateway>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn emit(&self, state: ConnectionState, identifier: Option<&str>) {
        debug!("Connection state changed: {}", state);
        let _ = self.event_tx.send(ConnectionEvent {
            identifier: identifier.map(str::to_string),
            state,
        });
    }

    fn abort_attempt(&self, reason: AbortReason) {
        if let Some(attempt) = self.attempt.lock().as_mut() {
            attempt.abort.get_or_insert(reason);
            attempt.token.cancel();
        }
    }

    /// Handle one notification payload from the temperature characteristic.
    fn ingest(&self, payload: &[u8]) {
        let state = self.status.read().state;
        if !matches!(state, ConnectionState::Discovering | ConnectionState::Subscribed) {
            trace!("Dropping notification received while {}", state);
            return;
        }

        trace!("Temperature payload: {:02X?}", payload);

        match Sample::decode(payload, self.clock.now_millis()) {
            Ok(sample) => self.store.append(sample),
            Err(e) => warn!("Dropping notification: {}", e),
        }
    }

    /// Handle an involuntary disconnect reported by the transport.
    fn on_link_lost(&self, identifier: &str) {
        let link = {
            let mut status = self.status.write();
            if status.state == ConnectionState::Disconnected
                || status.target.as_deref() != Some(identifier)
            {
                trace!("Ignoring stale disconnect from {}", identifier);
                return;
            }
            status.state = ConnectionState::Disconnected;
            status.target = None;
            self.link.lock().take()
        };

        self.abort_attempt(AbortReason::LinkLost);
        drop(link);

        warn!("Lost connection to {}", identifier);
        self.emit(ConnectionState::Disconnected, Some(identifier));
        self.gateway.fire_disconnect_alert();
    }
}

/// Manages the connection to the single target peripheral.
///
/// Dropping the manager closes both subscriptions and releases the link in
/// the background.
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    registry: Arc<DeviceRegistry>,
    options: ConnectionOptions,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a new connection manager.
    pub fn new(
        transport: Arc<T>,
        store: SampleStore,
        registry: Arc<DeviceRegistry>,
        gateway: Arc<NotificationGateway>,
        clock: Arc<dyn Clock>,
        options: ConnectionOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            transport,
            shared: Arc::new(Shared {
                status: RwLock::new(Status {
                    state: ConnectionState::Disconnected,
                    target: None,
                }),
                link: Mutex::new(None),
                scanning: AtomicBool::new(false),
                attempt: Mutex::new(None),
                store,
                gateway,
                clock,
                event_tx,
            }),
            registry,
            options,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.status.read().state
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    /// Identifier of the connected peripheral, if a link is up.
    pub fn peripheral_identifier(&self) -> Option<String> {
        self.shared
            .link
            .lock()
            .as_ref()
            .map(|link| link.identifier.clone())
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The store receiving decoded samples.
    pub fn store(&self) -> &SampleStore {
        &self.shared.store
    }

    /// The registry remembering the last matched device.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The gateway raising disconnect alerts.
    pub fn gateway(&self) -> &Arc<NotificationGateway> {
        &self.shared.gateway
    }

    /// The lifecycle options in effect.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Find the peripheral, connect, and subscribe to temperature updates.
    ///
    /// A remembered device is tried directly first; scanning is the fallback.
    /// Returns once notifications are flowing, or with the failure that reset
    /// the manager to [`ConnectionState::Disconnected`]. Failures are never
    /// retried automatically.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if not disconnected or a sequence is in flight
    /// - [`Error::ScanFailed`] if the scan could not run
    /// - [`Error::ConnectionFailed`] / [`Error::DeviceNotFound`] if the link failed
    /// - [`Error::ServiceNotFound`] / [`Error::CharacteristicNotFound`] if the
    ///   device lacks the temperature service
    /// - [`Error::Cancelled`] if [`disconnect_manually`](Self::disconnect_manually)
    ///   or [`cancel_discovery`](Self::cancel_discovery) interrupted it
    pub async fn start_discovery(&self) -> Result<()> {
        let token = self.begin()?;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.run_sequence() => result,
        };

        let abort = self
            .shared
            .attempt
            .lock()
            .take()
            .and_then(|attempt| attempt.abort);

        self.stop_scan().await;

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = match abort {
                    Some(AbortReason::Manual) => Error::Cancelled,
                    Some(AbortReason::LinkLost) => Error::ConnectionFailed {
                        reason: "peripheral disconnected during setup".to_string(),
                    },
                    None => e,
                };
                self.abandon().await;
                match &e {
                    Error::Cancelled => info!("Discovery cancelled"),
                    e if e.is_discovery_failure() => {
                        error!("Connected device is not a temperature sensor: {}", e)
                    }
                    e => error!("Discovery failed: {}", e),
                }
                Err(e)
            }
        }
    }

    /// Stop an in-flight discovery sequence. No alert is raised.
    ///
    /// Does nothing if no sequence is running.
    pub async fn cancel_discovery(&self) -> Result<()> {
        if self.shared.attempt.lock().is_none() {
            return Ok(());
        }
        self.disconnect_manually().await
    }

    /// User-initiated disconnect.
    ///
    /// Valid from any state except [`ConnectionState::Disconnected`]. Cancels
    /// a running scan or connect, closes the notification subscription before
    /// releasing the link, and never raises a disconnect alert.
    pub async fn disconnect_manually(&self) -> Result<()> {
        let (previous, target, link) = {
            let mut status = self.shared.status.write();
            let in_flight = self.shared.attempt.lock().is_some();
            if status.state == ConnectionState::Disconnected && !in_flight {
                return Err(Error::InvalidState {
                    operation: "disconnect",
                    state: status.state.to_string(),
                });
            }
            let previous = std::mem::replace(&mut status.state, ConnectionState::Disconnected);
            (previous, status.target.take(), self.shared.link.lock().take())
        };

        self.shared.abort_attempt(AbortReason::Manual);
        drop(link);

        if previous != ConnectionState::Disconnected {
            self.shared
                .emit(ConnectionState::Disconnected, target.as_deref());
        }

        self.stop_scan().await;

        if let Some(identifier) = target {
            info!("Disconnecting from {} at user request", identifier);
            self.transport.disconnect(&identifier).await?;
        }

        Ok(())
    }

    /// Claim the single in-flight slot.
    fn begin(&self) -> Result<CancellationToken> {
        let status = self.shared.status.read();
        let mut attempt = self.shared.attempt.lock();

        if status.state != ConnectionState::Disconnected || attempt.is_some() {
            return Err(Error::InvalidState {
                operation: "start discovery",
                state: if attempt.is_some() {
                    "a discovery is in flight".to_string()
                } else {
                    status.state.to_string()
                },
            });
        }

        let token = CancellationToken::new();
        *attempt = Some(Attempt {
            token: token.clone(),
            abort: None,
        });
        Ok(token)
    }

    async fn run_sequence(&self) -> Result<()> {
        if let Some(identifier) = self.registry.get() {
            info!("Trying remembered device {}", identifier);
            match self.connect_to(&identifier).await {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(
                        "Direct reconnect to {} failed, scanning instead: {}",
                        identifier, e
                    );
                    self.release_target().await;
                }
            }
        }

        let found = self.scan_for_device().await?;

        if let Err(e) = self.registry.set(&found.identifier) {
            warn!("Failed to remember device {}: {}", found.identifier, e);
        }

        self.connect_to(&found.identifier).await
    }

    /// Move to `to` if currently in one of `from`.
    fn advance(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
        target: Option<&str>,
    ) -> Result<()> {
        {
            let mut status = self.shared.status.write();
            if !from.contains(&status.state) {
                return Err(Error::Cancelled);
            }
            if let Some(target) = target {
                status.target = Some(target.to_string());
            }
            status.state = to;
        }
        self.shared.emit(to, target);
        Ok(())
    }

    async fn scan_for_device(&self) -> Result<Advertisement> {
        self.advance(
            &[
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Discovering,
            ],
            ConnectionState::Scanning,
            None,
        )?;

        let mut advertisements = self.transport.start_scan().await.map_err(scan_failure)?;
        self.shared.scanning.store(true, Ordering::SeqCst);

        info!("Scanning for '{}'", self.options.name_marker);

        let found = loop {
            match advertisements.next().await {
                Some(ad) if matches_device_name(ad.name.as_deref(), &self.options.name_marker) => {
                    break ad;
                }
                Some(ad) => trace!("Ignoring {} ({:?})", ad.identifier, ad.name),
                None => {
                    self.stop_scan().await;
                    return Err(Error::ScanFailed {
                        reason: "advertisement stream ended".to_string(),
                    });
                }
            }
        };

        self.stop_scan().await;

        info!(
            "Found {} ({})",
            found.name.as_deref().unwrap_or("unnamed"),
            found.identifier
        );

        Ok(found)
    }

    async fn connect_to(&self, identifier: &str) -> Result<()> {
        self.advance(
            &[ConnectionState::Disconnected, ConnectionState::Scanning],
            ConnectionState::Connecting,
            Some(identifier),
        )?;

        let disconnects = self
            .transport
            .disconnect_events(identifier)
            .await
            .map_err(connect_failure)?;
        let shared = Arc::downgrade(&self.shared);
        let watched = identifier.to_string();
        let watcher = Subscription::spawn("disconnect", disconnects, move |()| {
            if let Some(shared) = shared.upgrade() {
                shared.on_link_lost(&watched);
            }
        });

        info!("Connecting to {}", identifier);
        self.with_deadline("connect", self.transport.connect(identifier))
            .await
            .map_err(connect_failure)?;

        {
            let mut status = self.shared.status.write();
            if status.state != ConnectionState::Connecting {
                return Err(Error::Cancelled);
            }
            status.state = ConnectionState::Discovering;
            *self.shared.link.lock() = Some(PeripheralHandle {
                identifier: identifier.to_string(),
                notifications: None,
                _watcher: watcher,
            });
        }
        self.shared
            .emit(ConnectionState::Discovering, Some(identifier));

        let services = self
            .with_deadline(
                "service discovery",
                self.transport.discover_services(identifier),
            )
            .await
            .map_err(connect_failure)?;

        let service = services
            .iter()
            .find(|s| s.uuid == TEMPERATURE_SERVICE_UUID)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: TEMPERATURE_SERVICE_UUID.to_string(),
            })?;

        if !service.has_characteristic(&TEMPERATURE_CHARACTERISTIC_UUID) {
            return Err(Error::CharacteristicNotFound {
                uuid: TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
            });
        }

        let values = self
            .with_deadline(
                "subscribe",
                self.transport.subscribe(
                    identifier,
                    TEMPERATURE_SERVICE_UUID,
                    TEMPERATURE_CHARACTERISTIC_UUID,
                ),
            )
            .await
            .map_err(connect_failure)?;

        let shared = Arc::downgrade(&self.shared);
        let notifications = Subscription::spawn("temperature", values, move |payload: Vec<u8>| {
            if let Some(shared) = shared.upgrade() {
                shared.ingest(&payload);
            }
        });

        if let Some(period) = self.options.sample_period_ms {
            if service.has_characteristic(&TEMPERATURE_PERIOD_UUID) {
                let written = self
                    .with_deadline(
                        "period write",
                        self.transport.write(
                            identifier,
                            TEMPERATURE_SERVICE_UUID,
                            TEMPERATURE_PERIOD_UUID,
                            &period.to_le_bytes(),
                        ),
                    )
                    .await;
                match written {
                    Ok(()) => debug!("Sample period set to {} ms", period),
                    Err(e) => warn!("Failed to set sample period: {}", e),
                }
            } else {
                warn!("Peripheral has no temperature period characteristic");
            }
        }

        {
            let mut status = self.shared.status.write();
            if status.state != ConnectionState::Discovering {
                return Err(Error::Cancelled);
            }
            let mut link = self.shared.link.lock();
            match link.as_mut() {
                Some(handle) if handle.identifier == identifier => {
                    handle.notifications = Some(notifications);
                }
                _ => return Err(Error::Cancelled),
            }
            status.state = ConnectionState::Subscribed;
        }
        self.shared
            .emit(ConnectionState::Subscribed, Some(identifier));

        info!("Subscribed to temperature notifications from {}", identifier);

        Ok(())
    }

    async fn with_deadline<R>(
        &self,
        step: &'static str,
        operation: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        match self.options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| Error::ConnectionFailed {
                    reason: format!("{} timed out after {:?}", step, limit),
                })?,
            None => operation.await,
        }
    }

    async fn stop_scan(&self) {
        if self.shared.scanning.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }

    /// Drop the link to the current target without changing state.
    async fn release_target(&self) {
        let target = {
            let mut status = self.shared.status.write();
            self.shared.link.lock().take();
            status.target.take()
        };

        if let Some(identifier) = target {
            if let Err(e) = self.transport.disconnect(&identifier).await {
                debug!("Release of {} failed: {}", identifier, e);
            }
        }
    }

    /// Reset to disconnected after a failed sequence.
    async fn abandon(&self) {
        let changed = {
            let mut status = self.shared.status.write();
            let previous = std::mem::replace(&mut status.state, ConnectionState::Disconnected);
            previous != ConnectionState::Disconnected
        };

        if changed {
            self.shared.emit(ConnectionState::Disconnected, None);
        }

        self.release_target().await;
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.shared.abort_attempt(AbortReason::Manual);

        let (target, link) = {
            let mut status = self.shared.status.write();
            status.state = ConnectionState::Disconnected;
            (status.target.take(), self.shared.link.lock().take())
        };
        drop(link);

        let scanning = self.shared.scanning.swap(false, Ordering::SeqCst);
        if target.is_none() && !scanning {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No runtime to release {:?} on drop", target);
                return;
            }
        };

        let transport = self.transport.clone();
        runtime.spawn(async move {
            if scanning {
                if let Err(e) = transport.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            if let Some(identifier) = target {
                match transport.disconnect(&identifier).await {
                    Ok(()) => debug!("Released {} on drop", identifier),
                    Err(e) => warn!("Failed to release {} on drop: {}", identifier, e),
                }
            }
        });
    }
}

fn scan_failure(e: Error) -> Error {
    match e {
        e @ Error::ScanFailed { .. } => e,
        other => Error::ScanFailed {
            reason: other.to_string(),
        },
    }
}

fn connect_failure(e: Error) -> Error {
    match e {
        e @ (Error::ConnectionFailed { .. }
        | Error::DeviceNotFound { .. }
        | Error::ServiceNotFound { .. }
        | Error::CharacteristicNotFound { .. }
        | Error::Cancelled) => e,
        other => Error::ConnectionFailed {
            reason: other.to_string(),
        },
    }
}
