//! PostgreSQL measurement store
//!
//! Reads the tide gauge tables and the daily tide summary table. Aggregated gauge queries are
//! pushed down to the database with `date_bin`, using the same Monday origin as the in-process
//! reduction. Tide summaries are aggregated with `date_trunc` by day or week.

use crate::models::{QueryFilter, DEFAULT_DATA_SOURCE, TIDES_DATA_SOURCE};
use crate::store::{MeasurementStore, StoreError};
use crate::types::{tide, Measurement, TideSummary};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{event, Level};

const RAW_QUERY: &str = r#"
SELECT m."Tab_DateTime" AS timestamp,
       l."Station" AS station,
       m."Tab_Value_mDepthC1"::float8 AS value,
       m."Tab_Value_monT2m"::float8 AS secondary_value,
       NULL::bigint AS sample_count
FROM "Monitors_info2" m
JOIN "Locations" l ON m."Tab_TabularTag" = l."Tab_TabularTag"
WHERE ($1::text[] IS NULL OR l."Station" = ANY($1))
  AND ($2::date IS NULL OR DATE(m."Tab_DateTime") >= $2)
  AND ($3::date IS NULL OR DATE(m."Tab_DateTime") <= $3)
ORDER BY m."Tab_DateTime" ASC, l."Station" ASC
"#;

// A station's duplicate samples at one timestamp count once.
const AGGREGATED_QUERY: &str = r#"
SELECT date_bin($4::bigint * INTERVAL '1 second', s.time, TIMESTAMP '2000-01-03') AS timestamp,
       s.station,
       AVG(s.value)::float8 AS value,
       AVG(s.secondary_value)::float8 AS secondary_value,
       COUNT(*) AS sample_count
FROM (
    SELECT DISTINCT ON (l."Station", m."Tab_DateTime")
           m."Tab_DateTime" AS time,
           l."Station" AS station,
           m."Tab_Value_mDepthC1" AS value,
           m."Tab_Value_monT2m" AS secondary_value
    FROM "Monitors_info2" m
    JOIN "Locations" l ON m."Tab_TabularTag" = l."Tab_TabularTag"
    WHERE ($1::text[] IS NULL OR l."Station" = ANY($1))
      AND ($2::date IS NULL OR DATE(m."Tab_DateTime") >= $2)
      AND ($3::date IS NULL OR DATE(m."Tab_DateTime") <= $3)
    ORDER BY l."Station", m."Tab_DateTime"
) s
GROUP BY 1, 2
ORDER BY 1 ASC, 2 ASC
"#;

const TIDES_RAW_QUERY: &str = r#"
SELECT "Date"::timestamp AS date,
       "Station" AS station,
       "HighTide"::float8 AS high,
       "HighTideTime"::time AS high_time,
       "HighTideTemp"::float8 AS high_temperature,
       "LowTide"::float8 AS low,
       "LowTideTime"::time AS low_time,
       "LowTideTemp"::float8 AS low_temperature,
       "MeasurementCount"::bigint AS measurement_count,
       NULL::bigint AS sample_count
FROM "SeaTides"
WHERE ($1::text[] IS NULL OR "Station" = ANY($1))
  AND ($2::date IS NULL OR "Date"::date >= $2)
  AND ($3::date IS NULL OR "Date"::date <= $3)
ORDER BY "Date" ASC, "Station" ASC
"#;

const TIDES_AGGREGATED_QUERY: &str = r#"
SELECT date_trunc($4::text, s."Date"::timestamp) AS date,
       s."Station" AS station,
       AVG(s."HighTide")::float8 AS high,
       NULL::time AS high_time,
       AVG(s."HighTideTemp")::float8 AS high_temperature,
       AVG(s."LowTide")::float8 AS low,
       NULL::time AS low_time,
       AVG(s."LowTideTemp")::float8 AS low_temperature,
       SUM(s."MeasurementCount")::bigint AS measurement_count,
       COUNT(*) AS sample_count
FROM (
    SELECT DISTINCT ON ("Station", "Date") *
    FROM "SeaTides"
    WHERE ($1::text[] IS NULL OR "Station" = ANY($1))
      AND ($2::date IS NULL OR "Date"::date >= $2)
      AND ($3::date IS NULL OR "Date"::date <= $3)
    ORDER BY "Station", "Date"
) s
GROUP BY 1, 2
ORDER BY 1 ASC, 2 ASC
"#;

/// Tables a data source is read from
#[derive(Clone, Copy, Debug, PartialEq)]
enum Source {
    Gauge,
    Tides,
}

#[derive(sqlx::FromRow)]
struct Row {
    timestamp: NaiveDateTime,
    station: String,
    value: Option<f64>,
    secondary_value: Option<f64>,
    sample_count: Option<i64>,
}

impl From<Row> for Measurement {
    fn from(row: Row) -> Self {
        let mut measurement = Measurement::new(
            row.station,
            row.timestamp.and_utc(),
            row.value,
            row.secondary_value,
        );
        measurement.sample_count = row.sample_count.and_then(|count| u32::try_from(count).ok());
        measurement
    }
}

#[derive(sqlx::FromRow)]
struct TideRow {
    date: NaiveDateTime,
    station: String,
    high: Option<f64>,
    high_time: Option<NaiveTime>,
    high_temperature: Option<f64>,
    low: Option<f64>,
    low_time: Option<NaiveTime>,
    low_temperature: Option<f64>,
    measurement_count: Option<i64>,
    sample_count: Option<i64>,
}

impl From<TideRow> for Measurement {
    fn from(row: TideRow) -> Self {
        let summary = TideSummary {
            high: row.high,
            high_time: row.high_time,
            high_temperature: row.high_temperature,
            low: row.low,
            low_time: row.low_time,
            low_temperature: row.low_temperature,
            measurement_count: row.measurement_count.and_then(|count| u32::try_from(count).ok()),
        };
        let mut measurement = Measurement::tide(row.station, row.date.and_utc(), summary);
        measurement.sample_count = row.sample_count.and_then(|count| u32::try_from(count).ok());
        measurement
    }
}

/// A [MeasurementStore] backed by a PostgreSQL connection pool.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Returns a PostgresStore for `url`.
    ///
    /// Connections are opened on first use.
    ///
    /// # Arguments
    ///
    /// * `url`: PostgreSQL connection URL
    /// * `max_connections`: Size of the connection pool
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        event!(
            Level::INFO,
            "PostgreSQL store configured with {} connections",
            max_connections
        );
        Ok(Self { pool })
    }

    fn source(filter: &QueryFilter) -> Result<Source, StoreError> {
        match filter.data_source.as_str() {
            DEFAULT_DATA_SOURCE => Ok(Source::Gauge),
            TIDES_DATA_SOURCE => Ok(Source::Tides),
            other => Err(StoreError::UnsupportedDataSource(other.to_string())),
        }
    }

    fn station_names(filter: &QueryFilter) -> Option<Vec<String>> {
        filter
            .stations
            .names()
            .map(|names| names.into_iter().map(str::to_string).collect())
    }
}

#[async_trait]
impl MeasurementStore for PostgresStore {
    async fn fetch_raw(&self, filter: &QueryFilter) -> Result<Vec<Measurement>, StoreError> {
        if Self::source(filter)? == Source::Tides {
            let rows: Vec<TideRow> = sqlx::query_as(TIDES_RAW_QUERY)
                .bind(Self::station_names(filter))
                .bind(filter.start_date)
                .bind(filter.end_date)
                .fetch_all(&self.pool)
                .await?;
            return Ok(rows.into_iter().map(Measurement::from).collect());
        }
        let rows: Vec<Row> = sqlx::query_as(RAW_QUERY)
            .bind(Self::station_names(filter))
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Measurement::from).collect())
    }

    async fn fetch_aggregated(
        &self,
        filter: &QueryFilter,
        bucket: Duration,
    ) -> Result<Vec<Measurement>, StoreError> {
        if Self::source(filter)? == Source::Tides {
            let rows: Vec<TideRow> = sqlx::query_as(TIDES_AGGREGATED_QUERY)
                .bind(Self::station_names(filter))
                .bind(filter.start_date)
                .bind(filter.end_date)
                .bind(tide::truncation_unit(bucket))
                .fetch_all(&self.pool)
                .await?;
            return Ok(rows.into_iter().map(Measurement::from).collect());
        }
        let rows: Vec<Row> = sqlx::query_as(AGGREGATED_QUERY)
            .bind(Self::station_names(filter))
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(bucket.num_seconds())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Measurement::from).collect())
    }
}
