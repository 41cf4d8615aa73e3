pub mod config;
pub mod game_session;
pub mod judge;

pub use config::*;
pub use game_session::*;
pub use judge::*;

use crate::error::AppError;
use crate::{health, websocket};
use actix_web::web;

/// Register every route and the JSON/query extractor error handlers.
///
/// Extractor failures are reported with the same JSON error body as handler
/// errors instead of actix's plain-text default.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/config", web::put().to(update_config))
            .route("/judge", web::post().to(judge_answer))
            .route("/game-session", web::get().to(get_game_session)),
    )
    .route("/ws/audio", web::get().to(websocket::audio_websocket))
    .route("/health", web::get().to(health::health_check));
}
