// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # microbit-thermo
//!
//! A cross-platform Rust library for logging the temperature of a BBC
//! micro:bit over Bluetooth Low Energy.
//!
//! The library finds a micro:bit by its advertised name, subscribes to the
//! micro:bit temperature service, and keeps a durable history of every
//! reading. A time window narrows the history to the samples of interest.
//!
//! ## Features
//!
//! - **Fast reconnect**: The last matched device is remembered and tried
//!   before scanning
//! - **Durable history**: Samples survive restarts as versioned JSON
//! - **Time windows**: Half-open `[start, end)` filtering of the history
//! - **Disconnect alerts**: At most one outstanding alert per lost link
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microbit_thermo::{Config, Result, TemperatureMonitor};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     let monitor = TemperatureMonitor::open(&config).await?;
//!
//!     monitor.connect().await?;
//!
//!     let _handle = monitor.on_visible_samples_changed(|samples| {
//!         if let Some(latest) = samples.last() {
//!             println!("{}", latest);
//!         }
//!     });
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!
//!     monitor.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod registry;
pub mod storage;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use monitor::{CallbackHandle, ConnectionStatus, TemperatureMonitor};
pub use utils::celsius_to_fahrenheit;

// Re-export commonly used types from submodules
pub use ble::{ConnectionEvent, ConnectionState, Transport};
pub use data::{PersistPolicy, Sample, SampleStore, TimeWindow};
pub use notify::{Alert, AlertEvent, AlertSink, NotificationGateway};
pub use registry::DeviceRegistry;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
