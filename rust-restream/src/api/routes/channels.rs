//! Conversion and channel management routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/convert` | Request conversion of a source into a channel |
//! | GET | `/api/channels` | List channels |
//! | GET | `/api/channels/{key}` | Channel status |
//! | GET | `/api/channels/{key}/window` | Published window versus files on disk |
//! | DELETE | `/api/channels/{key}` | Stop a channel and delete its output |

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{ChannelListResponse, ConvertRequest, ConvertResponse, RemoveResponse};
use crate::api::server::AppState;
use crate::domain::{ChannelKey, ChannelStatus};
use crate::store::WindowReport;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_channels))
        .route("/{key}", get(get_channel).delete(remove_channel))
        .route("/{key}/window", get(get_window))
}

/// Returns immediately; the playlist appears once the pipeline is streaming.
pub async fn convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> (StatusCode, Json<ConvertResponse>) {
    let response = state
        .manager
        .request_conversion(&request.channel, &request.source);
    let status = if response.is_accepted() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response.into()))
}

async fn list_channels(State(state): State<AppState>) -> Json<ChannelListResponse> {
    let channels = state.manager.list();
    Json(ChannelListResponse {
        total: channels.len(),
        channels,
    })
}

async fn get_channel(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ChannelStatus>> {
    state
        .manager
        .status(&key)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("channel '{}' not found", key)))
}

async fn get_window(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<WindowReport>> {
    let key = ChannelKey::new(&key)?;
    let report = state.store().inspect(&key).await?;
    Ok(Json(report))
}

async fn remove_channel(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<RemoveResponse>> {
    let removed = state.manager.remove(&key).await?;
    if !removed {
        return Err(ApiError::not_found(format!("channel '{}' not found", key)));
    }
    Ok(Json(RemoveResponse { removed }))
}
