//! Serves playlists and segments out of the segment store.

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::store::StoreFile;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

pub fn router() -> Router<AppState> {
    Router::new().route("/{file}", get(serve_file))
}

async fn serve_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> ApiResult<Response> {
    let file = StoreFile::parse(&file_name)
        .ok_or_else(|| ApiError::not_found(format!("'{}' not found", file_name)))?;
    let path = state.store().file_path(&file);

    let not_found = || ApiError::not_found(format!("'{}' not found", file_name));
    let read_failed = |e: std::io::Error| {
        warn!(path = %path.display(), error = %e, "Failed to read store file");
        ApiError::internal("failed to read file")
    };

    match file {
        // Small and rewritten on every segment; read it whole so a response
        // never mixes two versions.
        StoreFile::Playlist(_) => {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
                Err(e) => return Err(read_failed(e)),
            };
            Ok((
                [
                    (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                Body::from(bytes),
            )
                .into_response())
        }
        // Segments never change once listed; stream them from disk.
        StoreFile::Segment(..) => {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
                Err(e) => return Err(read_failed(e)),
            };
            let length = file.metadata().await.map_err(read_failed)?.len();
            Ok((
                [
                    (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE.to_string()),
                    (header::CACHE_CONTROL, "public, max-age=60".to_string()),
                    (header::CONTENT_LENGTH, length.to_string()),
                ],
                Body::from_stream(ReaderStream::new(file)),
            )
                .into_response())
        }
    }
}
