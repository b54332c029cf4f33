use crate::errors::{Error, Result};
use crate::model::{ColumnValue, NormalizedRow, QueryResponse, HUMIDITY, TEMPERATURE};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

pub const TIME_COLUMN: &str = "time";
pub const NOT_AVAILABLE: &str = "N/A";
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Flattens a column-described row set into one map per row, order preserved.
/// NULL cells are left out rather than filled.
pub fn normalize(response: &QueryResponse) -> Result<Vec<NormalizedRow>> {
    response
        .rows
        .iter()
        .map(|row| -> Result<NormalizedRow> {
            let mut out = NormalizedRow::new();
            for (column, datum) in response.column_info.iter().zip(&row.data) {
                let Some(raw) = datum.scalar_value.as_deref() else {
                    continue;
                };
                let value = if column.name == TIME_COLUMN {
                    ColumnValue::Time(parse_time(raw)?)
                } else {
                    ColumnValue::Text(raw.to_string())
                };
                out.insert(column.name.clone(), value);
            }
            Ok(out)
        })
        .collect()
}

/// Accepts RFC 3339 or the store's `YYYY-MM-DD HH:MM:SS[.f]` text, taken as UTC
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| Error::Normalize(format!("invalid timestamp '{}': {}", raw, e)))
}

/// Typed view over a normalized row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub measure_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub double_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bigint_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl MeasurementRow {
    pub fn from_normalized(row: &NormalizedRow) -> Self {
        let text = |key: &str| {
            row.get(key)
                .and_then(ColumnValue::as_text)
                .map(str::to_string)
        };

        Self {
            device_id: text("deviceid"),
            time: row.get(TIME_COLUMN).and_then(ColumnValue::as_time),
            measure_name: text("measure_name"),
            double_value: text("measure_value::double"),
            bigint_value: text("measure_value::bigint"),
            value: text("value"),
        }
    }

    pub fn is_measure(&self, name: &str) -> bool {
        self.measure_name.as_deref() == Some(name)
    }

    /// Temperature shows one decimal, humidity its integer, other doubles two decimals
    pub fn display_value(&self) -> String {
        if self.is_measure(TEMPERATURE) {
            if let Some(v) = self.double_value.as_deref().or(self.value.as_deref()) {
                return fixed(v, 1);
            }
        }
        if self.is_measure(HUMIDITY) {
            if let Some(v) = &self.bigint_value {
                return v.clone();
            }
        }
        if let Some(v) = self.double_value.as_deref().or(self.value.as_deref()) {
            return fixed(v, 2);
        }
        if let Some(v) = &self.bigint_value {
            return v.clone();
        }
        NOT_AVAILABLE.to_string()
    }

    pub fn unit(&self) -> &'static str {
        match self.measure_name.as_deref() {
            Some(TEMPERATURE) => "°C",
            Some(HUMIDITY) => "%",
            _ => "",
        }
    }

    pub fn display_time(&self) -> String {
        self.time
            .map(|t| t.format(DISPLAY_TIME_FORMAT).to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }
}

fn fixed(raw: &str, decimals: usize) -> String {
    match raw.parse::<f64>() {
        Ok(v) => format!("{:.*}", decimals, v),
        Err(_) => raw.to_string(),
    }
}

pub fn to_measurement_rows(rows: &[NormalizedRow]) -> Vec<MeasurementRow> {
    rows.iter().map(MeasurementRow::from_normalized).collect()
}

/// Newest temperature and humidity of a newest-first batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestValues {
    pub temperature: String,
    pub humidity: String,
    pub time: String,
}

impl LatestValues {
    pub fn from_rows(rows: &[MeasurementRow]) -> Self {
        let temperature = rows.iter().find(|r| r.is_measure(TEMPERATURE));
        let humidity = rows.iter().find(|r| r.is_measure(HUMIDITY));

        Self {
            temperature: temperature
                .map(MeasurementRow::display_value)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            humidity: humidity
                .map(MeasurementRow::display_value)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            time: temperature
                .map(MeasurementRow::display_time)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }
}
