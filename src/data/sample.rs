//! Temperature sample type and notification payload decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::{celsius_to_fahrenheit, millis_to_datetime};

/// A single temperature reading received from the peripheral.
///
/// Samples are immutable once created. Two samples may carry identical values
/// when the sensor repeats a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// When the reading arrived, in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Temperature in whole degrees Celsius.
    pub temperature: u8,
}

impl Sample {
    /// Create a new sample.
    pub fn new(timestamp: i64, temperature: u8) -> Self {
        Self {
            timestamp,
            temperature,
        }
    }

    /// Decode a temperature characteristic notification.
    ///
    /// The first byte of the payload is the reading in degrees Celsius; any
    /// trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] for an empty payload.
    pub fn decode(payload: &[u8], timestamp: i64) -> Result<Self> {
        let temperature = *payload.first().ok_or_else(|| Error::InvalidData {
            context: "empty temperature payload".to_string(),
        })?;

        Ok(Self::new(timestamp, temperature))
    }

    /// Temperature in degrees Fahrenheit.
    pub fn fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(f64::from(self.temperature))
    }

    /// Arrival time as a UTC datetime.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.timestamp)
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.recorded_at() {
            Some(at) => write!(f, "{}°C at {}", self.temperature, at.format("%H:%M:%S")),
            None => write!(f, "{}°C at {}ms", self.temperature, self.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_first_byte() {
        let sample = Sample::decode(&[0x16], 1000).unwrap();
        assert_eq!(sample, Sample::new(1000, 22));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let sample = Sample::decode(&[0xFF, 0x01, 0x02], 5).unwrap();
        assert_eq!(sample.temperature, 255);
    }

    #[test]
    fn test_decode_empty_payload() {
        let err = Sample::decode(&[], 5).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn test_fahrenheit() {
        assert!((Sample::new(0, 100).fahrenheit() - 212.0).abs() < 0.001);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&Sample::new(1000, 22)).unwrap();
        assert_eq!(json, r#"{"timestamp":1000,"temperature":22}"#);
    }
}
