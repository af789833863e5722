//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::LogFilter;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_filter).put(set_filter))
}

async fn get_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilter>> {
    let logging = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("logging is not configured"))?;
    Ok(Json(LogFilter {
        filter: logging.get_filter(),
    }))
}

/// Replace the active filter, e.g. `rust_restream=debug,sqlx=warn`.
async fn set_filter(
    State(state): State<AppState>,
    Json(body): Json<LogFilter>,
) -> ApiResult<Json<LogFilter>> {
    let logging = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("logging is not configured"))?;
    logging.set_filter(&body.filter)?;
    Ok(Json(LogFilter {
        filter: logging.get_filter(),
    }))
}
