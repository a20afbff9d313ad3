//! Router, handlers and response mapping for the HTTP API

use crate::app_state::SharedAppState;
use crate::assembler::{DataResponse, ResponseAssembler};
use crate::error::SeaLevelError;
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};
use crate::models::{BatchQuery, DataQuery, QueryFilter};
use crate::validated_query::ValidatedQuery;

use axum::{
    extract::State,
    http::header::{self, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

static HEADER_AGGREGATION_LEVEL: HeaderName = HeaderName::from_static("x-aggregation-level");
static HEADER_RECORD_COUNT: HeaderName = HeaderName::from_static("x-record-count");
static HEADER_STATIONS_COUNT: HeaderName = HeaderName::from_static("x-stations-count");
static HEADER_TOTAL_COUNT: HeaderName = HeaderName::from_static("x-total-count");
static HEADER_TRUNCATED: HeaderName = HeaderName::from_static("x-truncated");

/// Service type returned by [service].
pub type Service = NormalizePath<Router>;

impl IntoResponse for DataResponse {
    fn into_response(self) -> Response {
        let mut extra = HeaderMap::new();
        if let Some(stations_count) = self.stations_count {
            extra.insert(HEADER_STATIONS_COUNT.clone(), stations_count.into());
        }
        if self.is_truncated() {
            extra.insert(HEADER_TRUNCATED.clone(), HeaderValue::from_static("true"));
            extra.insert(HEADER_TOTAL_COUNT.clone(), self.total_count.into());
        }
        (
            [
                (&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string()),
                (&HEADER_AGGREGATION_LEVEL, self.level.to_string()),
                (&HEADER_RECORD_COUNT, self.record_count.to_string()),
            ],
            extra,
            self.body,
        )
            .into_response()
    }
}

/// Returns a [Router] for the API.
///
/// # Arguments
///
/// * `state`: Shared application state
pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/data", get(data))
        .route("/data/batch", get(batch))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(
            TraceLayer::new_for_http()
                .on_request(request_counter)
                .on_response(record_response_metrics),
        )
        .with_state(state)
}

/// Returns a [Service] for the API.
///
/// Trailing slashes are trimmed before routing, so `/data/` and `/data` are equivalent.
pub fn service(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

async fn health() -> &'static str {
    "OK"
}

/// Handler for `GET /data`: measurements of one station, or of every station.
async fn data(
    State(state): State<SharedAppState>,
    ValidatedQuery(query): ValidatedQuery<DataQuery>,
) -> Result<DataResponse, SeaLevelError> {
    let filter = QueryFilter::from_data_query(&query, state.args.max_range_days)?;
    let output = state.pipeline.run(&filter).await?;
    ResponseAssembler::assemble(&output.measurements, output.level, query.limit, None)
}

/// Handler for `GET /data/batch`: measurements of a list of stations in one response.
async fn batch(
    State(state): State<SharedAppState>,
    ValidatedQuery(query): ValidatedQuery<BatchQuery>,
) -> Result<DataResponse, SeaLevelError> {
    let filter = QueryFilter::from_batch_query(&query, state.args.max_range_days)?;
    let stations_count = filter.stations.names().map(|names| names.len());
    let output = state.pipeline.run(&filter).await?;
    ResponseAssembler::assemble(
        &output.measurements,
        output.level,
        query.limit,
        stations_count,
    )
}
