use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Public view of the configuration. The judge API key is reported only as
/// present or absent.
fn config_json(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "audio": {
            "frame_size": config.audio.frame_size,
            "processor": config.audio.processor,
            "channel_capacity": config.audio.channel_capacity
        },
        "judge": {
            "api_base_url": config.judge.api_base_url,
            "model": config.judge.model,
            "api_key_configured": !config.judge.api_key.trim().is_empty(),
            "timeout_secs": config.judge.timeout_secs
        },
        "database": {
            "path": config.database.path
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

/// Partial runtime update; see [`AppConfig::update_from_json`] for the
/// fields that can change. New audio settings apply to sessions opened after
/// the update.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    tracing::info!(
        frame_size = current_config.audio.frame_size,
        model = %current_config.judge.model,
        "Configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}
