use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_LIMIT: u32 = 1000;
const MAX_MEASURE_NAME_LEN: usize = 64;

/// Relative time range a query is bounded by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[default]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 5] = [
        TimeWindow::FiveMinutes,
        TimeWindow::FifteenMinutes,
        TimeWindow::OneHour,
        TimeWindow::SixHours,
        TimeWindow::OneDay,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            TimeWindow::FiveMinutes => "5m",
            TimeWindow::FifteenMinutes => "15m",
            TimeWindow::OneHour => "1h",
            TimeWindow::SixHours => "6h",
            TimeWindow::OneDay => "24h",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for TimeWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TimeWindow::ALL
            .into_iter()
            .find(|w| w.token() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Unsupported time window '{}', expected one of 5m, 15m, 1h, 6h, 24h",
                    s
                ))
            })
    }
}

/// A measure name that passed the allow-list check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MeasureName(String);

impl MeasureName {
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(Error::Validation("Measure name cannot be empty".to_string()));
        }
        if name.len() > MAX_MEASURE_NAME_LEN {
            return Err(Error::Validation(format!(
                "Measure name longer than {} characters",
                MAX_MEASURE_NAME_LEN
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        {
            return Err(Error::Validation(format!(
                "Measure name '{}' contains unsupported characters",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Empty or whitespace-only input means no filter
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => Self::parse(name).map(Some),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for MeasureName {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        MeasureName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Which columns a query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Device, time, measure name and both typed value columns
    Raw,
    /// Time, measure name and the value cast to double
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementQuery {
    pub window: TimeWindow,
    pub measure_name: Option<MeasureName>,
    pub limit: u32,
    pub projection: Projection,
}

/// SQL text plus the values bound to its `$n` placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedQuery {
    pub sql: String,
    pub params: Vec<String>,
}

impl MeasurementQuery {
    pub fn new(
        window: TimeWindow,
        measure_name: Option<MeasureName>,
        limit: u32,
        projection: Projection,
    ) -> Result<Self> {
        if limit == 0 {
            return Err(Error::Validation("Limit must be a positive integer".to_string()));
        }

        Ok(Self {
            window,
            measure_name,
            limit: limit.min(MAX_LIMIT),
            projection,
        })
    }

    pub fn format(&self) -> FormattedQuery {
        let columns = match self.projection {
            Projection::Raw => {
                r#"device_id AS deviceid,
       time,
       measure_name,
       measure_value_double::text AS "measure_value::double",
       measure_value_bigint::text AS "measure_value::bigint""#
            }
            Projection::Value => {
                r#"time,
       measure_name,
       COALESCE(measure_value_double, measure_value_bigint::double precision)::text AS value"#
            }
        };

        let mut params = Vec::new();
        let measure_filter = match &self.measure_name {
            Some(name) => {
                params.push(name.as_str().to_string());
                format!("\n  AND measure_name = ${}", params.len())
            }
            None => String::new(),
        };

        // The window token comes from a closed set, so inlining it is safe
        let sql = format!(
            "SELECT {columns}
FROM measurements
WHERE time BETWEEN ago('{window}') AND now(){measure_filter}
ORDER BY time DESC
LIMIT {limit}",
            columns = columns,
            window = self.window.token(),
            measure_filter = measure_filter,
            limit = self.limit,
        );

        FormattedQuery { sql, params }
    }
}
