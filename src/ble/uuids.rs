//! BLE Service and Characteristic UUIDs.
//!
//! The BBC micro:bit temperature service from the micro:bit Bluetooth profile.

use uuid::Uuid;

/// micro:bit Temperature Service UUID.
pub const TEMPERATURE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xe95d6100_251d_470a_a062_fa1922dfa9a8);

/// Temperature characteristic UUID (Read, Notify). First byte is the reading in °C.
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xe95d9250_251d_470a_a062_fa1922dfa9a8);

/// Temperature period characteristic UUID (Read, Write). u16 LE milliseconds.
pub const TEMPERATURE_PERIOD_UUID: Uuid =
    Uuid::from_u128(0xe95d1b25_251d_470a_a062_fa1922dfa9a8);

/// Substring present in the advertised local name of every micro:bit.
pub const DEVICE_NAME_MARKER: &str = "micro:bit";

/// Check whether an advertised name belongs to the target device.
pub fn matches_device_name(name: Option<&str>, marker: &str) -> bool {
    name.map(|n| n.contains(marker)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TEMPERATURE_SERVICE_UUID.to_string(),
            "e95d6100-251d-470a-a062-fa1922dfa9a8"
        );
        assert_eq!(
            TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
            "e95d9250-251d-470a-a062-fa1922dfa9a8"
        );
        assert_eq!(
            TEMPERATURE_PERIOD_UUID.to_string(),
            "e95d1b25-251d-470a-a062-fa1922dfa9a8"
        );
    }

    #[test]
    fn test_matches_device_name() {
        assert!(matches_device_name(
            Some("BBC micro:bit [zevip]"),
            DEVICE_NAME_MARKER
        ));
        assert!(!matches_device_name(Some("Polar H10"), DEVICE_NAME_MARKER));
        assert!(!matches_device_name(None, DEVICE_NAME_MARKER));
    }
}
