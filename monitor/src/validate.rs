use crate::errors::{Error, Result};
use crate::model::{MeasurementRecord, HUMIDITY, TEMPERATURE};

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;

/// Validates a routed measurement before it is queued for storage
pub fn validate(record: &MeasurementRecord) -> Result<()> {
    if record.device_id.is_empty() {
        return Err(Error::Validation("Device ID cannot be empty".to_string()));
    }

    if record.measure_name.is_empty() {
        return Err(Error::Validation("Measure name cannot be empty".to_string()));
    }

    let value = record.value.as_f64();
    if !value.is_finite() {
        return Err(Error::Validation(format!(
            "{} value {} is not a finite number",
            record.measure_name, value
        )));
    }

    let range = match record.measure_name.as_str() {
        TEMPERATURE => Some((TEMP_MIN, TEMP_MAX)),
        HUMIDITY => Some((HUMIDITY_MIN, HUMIDITY_MAX)),
        _ => None,
    };

    if let Some((min, max)) = range {
        if value < min || value > max {
            return Err(Error::Validation(format!(
                "{} {} out of range [{}, {}]",
                record.measure_name, value, min, max
            )));
        }
    }

    Ok(())
}
