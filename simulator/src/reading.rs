use serde::{Deserialize, Serialize};

/// Payload an ESP32 temperature/humidity sensor publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub temp: f64,
    pub humid: i64,
    /// "0" when the sensor read succeeded
    pub status: String,
}
