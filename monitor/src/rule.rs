//! Topic rule turning device payloads into measurement records.
//!
//! The default rule mirrors what the sensor fleet publishes:
//! `SELECT temp AS temperature, humid AS humidity FROM 'esp32-thing/example/topic'
//! WHERE status = '0'`, with the device id taken from the first topic level.

use crate::errors::{Error, Result};
use crate::model::{MeasureValue, MeasurementRecord, HUMIDITY, TEMPERATURE};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const DEFAULT_TOPIC: &str = "esp32-thing/example/topic";

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub source: String,
    pub alias: String,
}

impl Selection {
    pub fn new(source: &str, alias: &str) -> Self {
        Self {
            source: source.to_string(),
            alias: alias.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub equals: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicRule {
    pub topic: String,
    pub selections: Vec<Selection>,
    pub condition: Option<Condition>,
    /// 1-based topic level used as the device id
    pub device_level: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// The payload did not satisfy the rule condition
    Skipped,
    Records(Vec<MeasurementRecord>),
}

impl TopicRule {
    pub fn sensor_rule(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            selections: vec![
                Selection::new("temp", TEMPERATURE),
                Selection::new("humid", HUMIDITY),
            ],
            condition: Some(Condition {
                field: "status".to_string(),
                equals: "0".to_string(),
            }),
            device_level: 1,
        }
    }

    pub fn apply(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Result<RuleOutcome> {
        let object: Map<String, Value> = match serde_json::from_slice(payload) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(Error::Validation(
                    "Payload must be a JSON object".to_string(),
                ))
            }
            Err(e) => return Err(Error::Validation(format!("JSON parse error: {}", e))),
        };

        if let Some(condition) = &self.condition {
            let matched = object
                .get(&condition.field)
                .and_then(scalar_text)
                .is_some_and(|v| v == condition.equals);
            if !matched {
                return Ok(RuleOutcome::Skipped);
            }
        }

        let device_id = topic_level(topic, self.device_level).ok_or_else(|| {
            Error::Validation(format!(
                "Topic '{}' has no level {} for the device id",
                topic, self.device_level
            ))
        })?;

        let mut records = Vec::with_capacity(self.selections.len());
        for selection in &self.selections {
            let Some(raw) = object.get(&selection.source) else {
                continue;
            };
            if raw.is_null() {
                continue;
            }
            records.push(MeasurementRecord {
                device_id: device_id.to_string(),
                time: now,
                measure_name: selection.alias.clone(),
                value: measure_value(&selection.source, raw)?,
            });
        }

        Ok(RuleOutcome::Records(records))
    }
}

/// `topic(n)`: the n-th level of a topic, counting from 1
pub fn topic_level(topic: &str, level: usize) -> Option<&str> {
    level
        .checked_sub(1)
        .and_then(|i| topic.split('/').nth(i))
        .filter(|segment| !segment.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn measure_value(field: &str, raw: &Value) -> Result<MeasureValue> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .map(MeasureValue::BigInt)
            .or_else(|| n.as_f64().map(MeasureValue::Double))
            .ok_or_else(|| Error::Validation(format!("'{}' is out of numeric range", field))),
        other => Err(Error::Validation(format!(
            "'{}' must be numeric, got {}",
            field, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(payload: &str) -> Result<RuleOutcome> {
        TopicRule::sensor_rule(DEFAULT_TOPIC).apply(DEFAULT_TOPIC, payload.as_bytes(), Utc::now())
    }

    #[test]
    fn test_selects_and_renames() {
        let RuleOutcome::Records(records) =
            apply(r#"{"temp": 24.3, "humid": 61, "status": "0"}"#).unwrap()
        else {
            panic!("expected records");
        };

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].measure_name, "temperature");
        assert_eq!(records[0].value, MeasureValue::Double(24.3));
        assert_eq!(records[1].measure_name, "humidity");
        assert_eq!(records[1].value, MeasureValue::BigInt(61));
        assert!(records.iter().all(|r| r.device_id == "esp32-thing"));
    }

    #[test]
    fn test_status_mismatch_is_skipped() {
        assert_eq!(
            apply(r#"{"temp": 24.3, "humid": 61, "status": "1"}"#).unwrap(),
            RuleOutcome::Skipped
        );
        assert_eq!(
            apply(r#"{"temp": 24.3, "humid": 61}"#).unwrap(),
            RuleOutcome::Skipped
        );
    }

    #[test]
    fn test_numeric_status_matches() {
        assert!(matches!(
            apply(r#"{"temp": 20.5, "status": 0}"#).unwrap(),
            RuleOutcome::Records(records) if records.len() == 1
        ));
    }

    #[test]
    fn test_bad_payloads() {
        assert!(apply("not json").is_err());
        assert!(apply("[1, 2]").is_err());
        assert!(apply(r#"{"temp": "hot", "status": "0"}"#).is_err());
    }

    #[test]
    fn test_topic_levels() {
        assert_eq!(topic_level("esp32-thing/example/topic", 1), Some("esp32-thing"));
        assert_eq!(topic_level("esp32-thing/example/topic", 2), Some("example"));
        assert_eq!(topic_level("esp32-thing/example/topic", 4), None);
        assert_eq!(topic_level("esp32-thing", 0), None);
        assert_eq!(topic_level("/leading", 1), None);
    }
}
