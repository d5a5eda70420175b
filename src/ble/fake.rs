//! In-memory [`Transport`] for tests.

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::transport::{
    Advertisement, AdvertisementStream, DisconnectStream, GattService, NotificationStream,
    Transport,
};
use super::uuids::{
    TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_PERIOD_UUID, TEMPERATURE_SERVICE_UUID,
};
use crate::error::{Error, Result};

/// Scripted peripheral world with a call log.
pub(crate) struct FakeTransport {
    calls: Mutex<Vec<String>>,
    advertisements: Mutex<Vec<Advertisement>>,
    scan_tx: Mutex<Option<UnboundedSender<Advertisement>>>,
    fail_scan: AtomicBool,
    reachable: Mutex<HashSet<String>>,
    hang_connect: AtomicBool,
    services: Mutex<Vec<GattService>>,
    notify_tx: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    disconnect_tx: Mutex<Option<UnboundedSender<()>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
}

impl FakeTransport {
    /// A world exposing the micro:bit temperature service on every device.
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            advertisements: Mutex::new(Vec::new()),
            scan_tx: Mutex::new(None),
            fail_scan: AtomicBool::new(false),
            reachable: Mutex::new(HashSet::new()),
            hang_connect: AtomicBool::new(false),
            services: Mutex::new(vec![GattService {
                uuid: TEMPERATURE_SERVICE_UUID,
                characteristics: vec![TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_PERIOD_UUID],
            }]),
            notify_tx: Mutex::new(None),
            disconnect_tx: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Queue an advertisement; delivered immediately if a scan is running.
    pub(crate) fn advertise(&self, identifier: &str, name: Option<&str>) {
        let ad = Advertisement {
            identifier: identifier.to_string(),
            name: name.map(str::to_string),
            rssi: Some(-60),
        };
        if let Some(tx) = self.scan_tx.lock().as_ref() {
            let _ = tx.unbounded_send(ad.clone());
        }
        self.advertisements.lock().push(ad);
    }

    pub(crate) fn make_reachable(&self, identifier: &str) {
        self.reachable.lock().insert(identifier.to_string());
    }

    pub(crate) fn set_services(&self, services: Vec<GattService>) {
        *self.services.lock() = services;
    }

    pub(crate) fn fail_next_scan(&self) {
        self.fail_scan.store(true, Ordering::SeqCst);
    }

    /// Make every connect wait forever.
    pub(crate) fn hang_connect(&self) {
        self.hang_connect.store(true, Ordering::SeqCst);
    }

    /// Push a value on the temperature characteristic.
    pub(crate) fn notify(&self, payload: &[u8]) -> bool {
        self.notify_tx
            .lock()
            .as_ref()
            .map(|tx| tx.unbounded_send(payload.to_vec()).is_ok())
            .unwrap_or(false)
    }

    /// Simulate the peripheral going out of range.
    pub(crate) fn drop_link(&self) -> bool {
        self.notify_tx.lock().take();
        self.disconnect_tx
            .lock()
            .take()
            .map(|tx| tx.unbounded_send(()).is_ok())
            .unwrap_or(false)
    }

    pub(crate) fn has_disconnect_watch(&self) -> bool {
        self.disconnect_tx.lock().is_some()
    }

    pub(crate) fn scan_active(&self) -> bool {
        self.scan_tx.lock().is_some()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start_scan(&self) -> Result<AdvertisementStream> {
        self.record("start_scan");
        if self.fail_scan.swap(false, Ordering::SeqCst) {
            return Err(Error::ScanFailed {
                reason: "adapter powered off".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded();
        for ad in self.advertisements.lock().iter() {
            let _ = tx.unbounded_send(ad.clone());
        }
        *self.scan_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record("stop_scan");
        self.scan_tx.lock().take();
        Ok(())
    }

    async fn connect(&self, identifier: &str) -> Result<()> {
        self.record(format!("connect {identifier}"));
        if self.hang_connect.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.reachable.lock().contains(identifier) {
            Ok(())
        } else {
            Err(Error::DeviceNotFound {
                identifier: identifier.to_string(),
            })
        }
    }

    async fn discover_services(&self, identifier: &str) -> Result<Vec<GattService>> {
        self.record(format!("discover {identifier}"));
        Ok(self.services.lock().clone())
    }

    async fn subscribe(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        self.record(format!("subscribe {identifier}"));
        let known = self
            .services
            .lock()
            .iter()
            .any(|s| s.uuid == service && s.has_characteristic(&characteristic));
        if !known {
            return Err(Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded();
        *self.notify_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn write(
        &self,
        identifier: &str,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.record(format!("write {identifier}"));
        self.writes.lock().push((characteristic, value.to_vec()));
        Ok(())
    }

    async fn disconnect_events(&self, identifier: &str) -> Result<DisconnectStream> {
        self.record(format!("watch {identifier}"));
        let (tx, rx) = mpsc::unbounded();
        *self.disconnect_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self, identifier: &str) -> Result<()> {
        self.record(format!("disconnect {identifier}"));
        self.notify_tx.lock().take();
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
