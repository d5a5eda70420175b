//! [`Transport`] implementation over btleplug.
//!
//! Peripherals seen while scanning are cached by identifier so a later
//! connect does not need another adapter lookup. A remembered identifier that
//! was never scanned in this process is resolved through the adapter's list
//! of known peripherals.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::transport::{
    Advertisement, AdvertisementStream, DisconnectStream, GattService, NotificationStream,
    Transport,
};
use crate::error::{Error, Result};

/// BLE transport backed by the first available system adapter.
pub struct BtleplugTransport {
    /// The BLE adapter to use.
    adapter: Adapter,
    /// Peripherals seen so far, by identifier.
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
}

impl BtleplugTransport {
    /// Create a transport on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Resolve an identifier to a peripheral handle.
    async fn peripheral(&self, identifier: &str) -> Result<Peripheral> {
        let cached = self.peripherals.read().get(identifier).cloned();
        if let Some(peripheral) = cached {
            return Ok(peripheral);
        }

        let peripheral = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == identifier)
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: identifier.to_string(),
            })?;

        self.peripherals
            .write()
            .insert(identifier.to_string(), peripheral.clone());

        Ok(peripheral)
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn start_scan(&self) -> Result<AdvertisementStream> {
        let events = self.adapter.events().await.map_err(|e| Error::ScanFailed {
            reason: e.to_string(),
        })?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::ScanFailed {
                reason: e.to_string(),
            })?;

        info!("BLE scan started");

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();

        let advertisements = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();

            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };

                let peripheral = adapter.peripheral(&id).await.ok()?;
                let properties = peripheral.properties().await.ok().flatten()?;
                let identifier = id.to_string();

                trace!(
                    "Advertisement from {} ({:?}, rssi {:?})",
                    identifier,
                    properties.local_name,
                    properties.rssi
                );

                peripherals.write().insert(identifier.clone(), peripheral);

                Some(Advertisement {
                    identifier,
                    name: properties.local_name,
                    rssi: properties.rssi,
                })
            }
        });

        Ok(advertisements.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }

    async fn connect(&self, identifier: &str) -> Result<()> {
        let peripheral = self.peripheral(identifier).await?;

        if peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral {} already connected at BLE level", identifier);
            return Ok(());
        }

        peripheral
            .connect()
            .await
            .map_err(|e| Error::ConnectionFailed {
                reason: e.to_string(),
            })
    }

    async fn discover_services(&self, identifier: &str) -> Result<Vec<GattService>> {
        let peripheral = self.peripheral(identifier).await?;
        peripheral.discover_services().await?;

        let services: Vec<GattService> = peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect();

        debug!(
            "Discovered {} services on {}",
            services.len(),
            identifier
        );

        Ok(services)
    }

    async fn subscribe(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let peripheral = self.peripheral(identifier).await?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;

        // Open the stream before enabling notifications so the first value
        // is not missed.
        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(&target).await?;

        debug!("Subscribed to notifications from {}", characteristic);

        let values = notifications.filter_map(move |notification| {
            future::ready((notification.uuid == characteristic).then_some(notification.value))
        });

        Ok(values.boxed())
    }

    async fn write(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral(identifier).await?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;

        peripheral
            .write(&target, value, WriteType::WithResponse)
            .await?;

        trace!("Wrote {} bytes to characteristic {}", value.len(), characteristic);

        Ok(())
    }

    async fn disconnect_events(&self, identifier: &str) -> Result<DisconnectStream> {
        let events = self.adapter.events().await?;
        let identifier = identifier.to_string();

        let disconnects = events.filter_map(move |event| {
            let hit = matches!(
                &event,
                CentralEvent::DeviceDisconnected(id) if id.to_string() == identifier
            );
            future::ready(hit.then_some(()))
        });

        Ok(disconnects.boxed())
    }

    async fn disconnect(&self, identifier: &str) -> Result<()> {
        let peripheral = self.peripheral(identifier).await?;

        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
            info!("Disconnected from {}", identifier);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_shareable() {
        fn assert_transport<T: Transport>() {}
        assert_transport::<BtleplugTransport>();
    }
}
