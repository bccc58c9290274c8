use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

pub mod dto;
pub mod events;
pub mod handler;
pub mod service;
pub mod stream_handler;

pub fn router() -> Router<AppState> {
    Router::new()
        // uploads stream to disk, so the in-memory body cap does not apply
        .route(
            "/upload",
            post(handler::upload_videos).layer(DefaultBodyLimit::disable()),
        )
        .route("/{id}/playback", get(handler::get_playback_url))
        .route("/{id}/hls/{*path}", get(stream_handler::stream_hls))
}
