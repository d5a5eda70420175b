//! BLE communication module.
//!
//! This module provides the transport seam, its btleplug implementation and
//! the connection state machine for the micro:bit temperature service.

pub mod btleplug_transport;
pub mod connection;
pub mod subscription;
pub mod transport;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use btleplug_transport::BtleplugTransport;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionState};
pub use subscription::Subscription;
pub use transport::{Advertisement, GattService, Transport};
pub use uuids::*;
