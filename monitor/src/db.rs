use crate::errors::{Error, Result};
use crate::metrics::{DB_FAILURES_TOTAL, RETENTION_DELETED_TOTAL};
use crate::model::{MeasureValue, MeasurementRecord};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

pub async fn insert_batch(pool: &PgPool, batch: &[MeasurementRecord]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let mut attempts = 0;
    let max_attempts = 5;

    loop {
        attempts += 1;
        match insert_batch_inner(pool, batch).await {
            Ok(()) => return Ok(()),
            Err(e) => match &e {
                Error::Database(db_err) => {
                    if attempts >= max_attempts || !is_transient_error(db_err) {
                        error!(
                            "Database insert failed permanently after {} attempts: {}",
                            attempts, e
                        );
                        return Err(e);
                    }

                    let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                    warn!(
                        "Database insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, max_attempts, wait_ms, db_err
                    );
                    DB_FAILURES_TOTAL.inc();
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                _ => {
                    error!("Database insert failed with non-database error: {}", e);
                    return Err(e);
                }
            },
        }
    }
}

/// Column-wise arrays for an `UNNEST` insert. Exactly one of the two value
/// arrays is non-null at every index.
struct Columns<'a> {
    device_ids: Vec<&'a str>,
    times: Vec<DateTime<Utc>>,
    measure_names: Vec<&'a str>,
    doubles: Vec<Option<f64>>,
    bigints: Vec<Option<i64>>,
}

fn split_columns(batch: &[MeasurementRecord]) -> Columns<'_> {
    let mut columns = Columns {
        device_ids: Vec::with_capacity(batch.len()),
        times: Vec::with_capacity(batch.len()),
        measure_names: Vec::with_capacity(batch.len()),
        doubles: Vec::with_capacity(batch.len()),
        bigints: Vec::with_capacity(batch.len()),
    };

    for record in batch {
        columns.device_ids.push(record.device_id.as_str());
        columns.times.push(record.time);
        columns.measure_names.push(record.measure_name.as_str());
        match record.value {
            MeasureValue::Double(v) => {
                columns.doubles.push(Some(v));
                columns.bigints.push(None);
            }
            MeasureValue::BigInt(v) => {
                columns.doubles.push(None);
                columns.bigints.push(Some(v));
            }
        }
    }

    columns
}

async fn insert_batch_inner(pool: &PgPool, batch: &[MeasurementRecord]) -> Result<()> {
    let columns = split_columns(batch);

    let query = r#"
        INSERT INTO measurements (device_id, time, measure_name, measure_value_double, measure_value_bigint)
        SELECT * FROM UNNEST($1::text[], $2::timestamptz[], $3::text[], $4::float8[], $5::int8[])
        ON CONFLICT (device_id, measure_name, time) DO NOTHING
        "#;

    sqlx::query(query)
        .bind(&columns.device_ids)
        .bind(&columns.times)
        .bind(&columns.measure_names)
        .bind(&columns.doubles)
        .bind(&columns.bigints)
        .execute(pool)
        .await?;

    Ok(())
}

/// Deletes measurements older than `retention_days`, returning the row count
pub async fn purge_older_than(pool: &PgPool, retention_days: u32) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let result = sqlx::query("DELETE FROM measurements WHERE time < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn run_retention(pool: PgPool, retention_days: u32, period: Duration) {
    info!(
        "Starting retention task: keeping {} days, checking every {:?}",
        retention_days, period
    );

    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match purge_older_than(&pool, retention_days).await {
            Ok(0) => {}
            Ok(deleted) => {
                RETENTION_DELETED_TOTAL.inc_by(deleted as f64);
                info!("Retention removed {} expired measurements", deleted);
            }
            Err(e) => error!("Retention cleanup failed: {}", e),
        }
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
