//! Remembers the last peripheral that matched the device name marker.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{KeyValueStore, LAST_DEVICE_KEY};

/// Persisted pointer to the last bonded peripheral.
///
/// The identifier is opaque to the registry; it is whatever the transport
/// reported for the device.
pub struct DeviceRegistry {
    storage: Arc<dyn KeyValueStore>,
    cached: RwLock<Option<String>>,
}

impl DeviceRegistry {
    /// Load the registry from storage.
    ///
    /// A read failure is logged and treated as "no remembered device".
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let cached = match storage.get(LAST_DEVICE_KEY) {
            Ok(Some(id)) if !id.is_empty() => {
                debug!("Remembered device: {}", id);
                Some(id)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read remembered device: {}", e);
                None
            }
        };

        Self {
            storage,
            cached: RwLock::new(cached),
        }
    }

    /// The remembered identifier, if any.
    pub fn get(&self) -> Option<String> {
        self.cached.read().clone()
    }

    /// Remember `identifier`.
    ///
    /// The in-memory value is updated even if the durable write fails.
    pub fn set(&self, identifier: &str) -> Result<()> {
        *self.cached.write() = Some(identifier.to_string());
        self.storage.set(LAST_DEVICE_KEY, identifier)
    }

    /// Forget the remembered identifier.
    pub fn clear(&self) -> Result<()> {
        *self.cached.write() = None;
        self.storage.remove(LAST_DEVICE_KEY)
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("identifier", &*self.cached.read())
            .finish()
    }
}
