use crate::errors::Result;
use crate::model::{ColumnInfo, Datum, QueryResponse, Row};
use crate::query::FormattedQuery;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row as _, TypeInfo};
use tracing::debug;

/// Read side of the time-series store
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn execute(&self, query: &FormattedQuery) -> Result<QueryResponse>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimeSeriesStore for PgStore {
    async fn execute(&self, query: &FormattedQuery) -> Result<QueryResponse> {
        debug!("Executing query with {} bound params", query.params.len());

        let mut statement = sqlx::query(&query.sql);
        for param in &query.params {
            statement = statement.bind(param);
        }

        let rows = statement.fetch_all(&self.pool).await?;
        to_response(&rows)
    }
}

fn to_response(rows: &[PgRow]) -> Result<QueryResponse> {
    let column_info = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| -> Result<Row> {
            let data = row
                .columns()
                .iter()
                .map(|column| -> Result<Datum> {
                    let i = column.ordinal();
                    let scalar_value = match column.type_info().name() {
                        "TIMESTAMPTZ" => row
                            .try_get::<Option<DateTime<Utc>>, _>(i)?
                            .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                        _ => row.try_get::<Option<String>, _>(i)?,
                    };
                    Ok(Datum { scalar_value })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Row { data })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResponse { column_info, rows })
}
