//! The BLE operations the connection manager relies on.
//!
//! [`Transport`] is the seam between the connection state machine and the
//! radio stack. [`BtleplugTransport`](super::btleplug_transport::BtleplugTransport)
//! implements it over btleplug.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// One advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Transport-specific peripheral identifier.
    pub identifier: String,
    /// Advertised local name, if present.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// A GATT service and the characteristics it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristic UUIDs within the service.
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    /// Whether the service exposes `characteristic`.
    pub fn has_characteristic(&self, characteristic: &Uuid) -> bool {
        self.characteristics.contains(characteristic)
    }
}

/// Stream of advertisements. Ends if the adapter stops delivering events.
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Stream of raw characteristic values.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Stream yielding once per involuntary disconnect of a peripheral.
pub type DisconnectStream = BoxStream<'static, ()>;

/// BLE central operations for a single peripheral at a time.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start an unfiltered scan.
    async fn start_scan(&self) -> Result<AdvertisementStream>;

    /// Stop scanning. Stopping an idle scanner is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to the peripheral with `identifier`.
    async fn connect(&self, identifier: &str) -> Result<()>;

    /// Enumerate the peripheral's services and characteristics.
    async fn discover_services(&self, identifier: &str) -> Result<Vec<GattService>>;

    /// Enable notifications on a characteristic and stream its values.
    async fn subscribe(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream>;

    /// Write a characteristic value with response.
    async fn write(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Observe disconnects of the peripheral.
    async fn disconnect_events(&self, identifier: &str) -> Result<DisconnectStream>;

    /// Release the link to the peripheral.
    async fn disconnect(&self, identifier: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_service_lookup() {
        let service = GattService {
            uuid: Uuid::nil(),
            characteristics: vec![Uuid::from_u128(1)],
        };
        assert!(service.has_characteristic(&Uuid::from_u128(1)));
        assert!(!service.has_characteristic(&Uuid::from_u128(2)));
    }
}
