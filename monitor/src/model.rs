use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::query::TimeWindow;

pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";

/// Value of a single measure. A stored row carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureValue {
    Double(f64),
    BigInt(i64),
}

impl MeasureValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MeasureValue::Double(v) => *v,
            MeasureValue::BigInt(v) => *v as f64,
        }
    }
}

/// One measure reported by one device at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub device_id: String,
    pub time: DateTime<Utc>,
    pub measure_name: String,
    pub value: MeasureValue,
}

/// Column metadata of a store response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
}

/// A single cell; `None` when the column is NULL for this row
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Datum {
    pub scalar_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Row {
    pub data: Vec<Datum>,
}

/// Column-described row set returned by a time-series query
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResponse {
    pub column_info: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Time(DateTime<Utc>),
    Text(String),
}

impl ColumnValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            ColumnValue::Time(_) => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            ColumnValue::Time(t) => Some(*t),
            ColumnValue::Text(_) => None,
        }
    }
}

/// Column name to value, only for columns present in the row
pub type NormalizedRow = BTreeMap<String, ColumnValue>;

/// Tagged result of a measurement query
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementsResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<NormalizedRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeWindow>,
    pub query_time: DateTime<Utc>,
}

impl MeasurementsResult {
    pub fn ok(data: Vec<NormalizedRow>, time_range: Option<TimeWindow>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            time_range,
            query_time: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>, time_range: Option<TimeWindow>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            time_range,
            query_time: Utc::now(),
        }
    }
}

/// Tagged result of an advice request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl AdviceResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            advice: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
            total_tokens: None,
            finish_reason: None,
        }
    }
}

/// Tagged result of a weather question
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    pub timestamp: DateTime<Utc>,
}
