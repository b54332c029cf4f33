use crate::errors::Result;
use crate::metrics::{QUERIES_TOTAL, QUERY_FAILURES_TOTAL};
use crate::model::{MeasurementsResult, NormalizedRow};
use crate::normalize::normalize;
use crate::query::{MeasureName, MeasurementQuery, Projection, TimeWindow};
use crate::store::TimeSeriesStore;
use tracing::{debug, error};

pub const DEFAULT_RECENT_LIMIT: u32 = 10;

async fn run(store: &dyn TimeSeriesStore, query: &MeasurementQuery) -> Result<Vec<NormalizedRow>> {
    QUERIES_TOTAL.inc();
    let formatted = query.format();
    let response = store.execute(&formatted).await?;
    let rows = normalize(&response)?;
    debug!("Query over last {} returned {} rows", query.window, rows.len());
    Ok(rows)
}

/// Latest rows of the last 15 minutes, every measure, both value columns
pub async fn fetch_recent(store: &dyn TimeSeriesStore, limit: u32) -> MeasurementsResult {
    fetch_projected(store, TimeWindow::FifteenMinutes, None, limit, Projection::Raw, false).await
}

/// Rows within `window`, optionally for one measure, both value columns
pub async fn fetch_raw(
    store: &dyn TimeSeriesStore,
    window: TimeWindow,
    measure_name: Option<MeasureName>,
    limit: u32,
) -> MeasurementsResult {
    fetch_projected(store, window, measure_name, limit, Projection::Raw, true).await
}

/// Rows within `window`, optionally for one measure, value cast to double
pub async fn fetch_in_window(
    store: &dyn TimeSeriesStore,
    window: TimeWindow,
    measure_name: Option<MeasureName>,
    limit: u32,
) -> MeasurementsResult {
    fetch_projected(store, window, measure_name, limit, Projection::Value, true).await
}

async fn fetch_projected(
    store: &dyn TimeSeriesStore,
    window: TimeWindow,
    measure_name: Option<MeasureName>,
    limit: u32,
    projection: Projection,
    report_window: bool,
) -> MeasurementsResult {
    let time_range = report_window.then_some(window);
    let outcome = match MeasurementQuery::new(window, measure_name, limit, projection) {
        Ok(query) => run(store, &query).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(rows) => MeasurementsResult::ok(rows, time_range),
        Err(e) => {
            QUERY_FAILURES_TOTAL.inc();
            error!("Error querying measurements for last {}: {}", window, e);
            MeasurementsResult::failed(e.to_string(), time_range)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnValue;
    use crate::testing::{raw_response, MockStore};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_ten_rows_round_trip_newest_first() {
        let newest = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let store = MockStore::returning(raw_response(10, newest));

        let result = fetch_recent(&store, 10).await;

        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data.len(), 10);
        let times: Vec<_> = data
            .iter()
            .map(|row| row["time"].as_time().unwrap())
            .collect();
        assert_eq!(times[0], newest);
        assert!(times.windows(2).all(|pair| pair[0] > pair[1]));

        let query = store.last_query().unwrap();
        assert!(query.sql.contains("LIMIT 10"));
        assert!(query.sql.contains("ago('15m')"));
    }

    #[tokio::test]
    async fn test_store_failure_is_tagged() {
        let store = MockStore::failing("connection refused");

        let result = fetch_in_window(&store, TimeWindow::OneHour, None, 10).await;

        assert!(!result.success);
        assert!(result.data.is_none());
        assert!(result.error.unwrap().contains("connection refused"));
        assert_eq!(result.time_range, Some(TimeWindow::OneHour));
    }

    #[tokio::test]
    async fn test_invalid_limit_never_reaches_store() {
        let store = MockStore::new();

        let result = fetch_recent(&store, 0).await;

        assert!(!result.success);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_window_query_binds_measure_filter() {
        let store = MockStore::new();
        let name = MeasureName::parse("humidity").unwrap();

        let result = fetch_in_window(&store, TimeWindow::OneDay, Some(name), 5).await;

        assert!(result.success);
        assert_eq!(result.data.unwrap().len(), 0);
        let query = store.last_query().unwrap();
        assert_eq!(query.params, vec!["humidity".to_string()]);
        assert!(query.sql.contains("ago('24h')"));
    }

    #[tokio::test]
    async fn test_raw_fetch_reports_window() {
        let store = MockStore::returning(raw_response(3, Utc::now()));

        let result = fetch_raw(&store, TimeWindow::SixHours, None, 3).await;

        assert!(result.success);
        assert_eq!(result.time_range, Some(TimeWindow::SixHours));
        assert!(store.last_query().unwrap().sql.contains("measure_value_bigint::text"));
    }

    #[tokio::test]
    async fn test_unparsable_time_is_tagged_failure() {
        let mut response = raw_response(1, Utc::now());
        response.rows[0].data[1].scalar_value = Some("not a time".to_string());
        let store = MockStore::returning(response);

        let result = fetch_recent(&store, 10).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid timestamp"));
    }

    #[tokio::test]
    async fn test_values_stay_text() {
        let store = MockStore::returning(raw_response(2, Utc::now()));

        let data = fetch_recent(&store, 10).await.data.unwrap();

        assert_eq!(
            data[0]["measure_value::double"],
            ColumnValue::Text("24.30".to_string())
        );
        assert_eq!(
            data[1]["measure_value::bigint"],
            ColumnValue::Text("62".to_string())
        );
    }
}
