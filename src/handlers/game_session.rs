//! # Game Session Endpoint
//!
//! `GET /api/v1/game-session?courseId=..&gameType=..&lessonId=..`
//!
//! Returns the `content` and `concepts` of the most recently created game
//! session for a course and game type. `lessonId` is optional and narrows the
//! match when a course has several sessions of the same type.
//!
//! ## Status Codes:
//! - **200**: `{"content": ..., "concepts": ...}`
//! - **400**: `courseId` or `gameType` missing or blank
//! - **404**: no matching session

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::GameSessionQuery;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSessionParams {
    pub course_id: Option<String>,
    pub game_type: Option<String>,
    pub lesson_id: Option<String>,
}

fn required(value: Option<String>, name: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::ValidationError(format!("{} is required", name)))
}

impl GameSessionParams {
    fn into_query(self) -> AppResult<GameSessionQuery> {
        Ok(GameSessionQuery {
            course_id: required(self.course_id, "courseId")?,
            game_type: required(self.game_type, "gameType")?,
            lesson_id: self
                .lesson_id
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

pub async fn get_game_session(
    state: web::Data<AppState>,
    params: web::Query<GameSessionParams>,
) -> Result<HttpResponse, AppError> {
    let query = params.into_inner().into_query()?;
    let store = state.store.clone();

    let lookup = query.clone();
    let session = web::block(move || store.latest(&lookup))
        .await
        .map_err(|e| AppError::Internal(format!("Game session lookup was cancelled: {}", e)))??;

    match session {
        Some(session) => Ok(HttpResponse::Ok().json(json!({
            "content": session.content,
            "concepts": session.concepts
        }))),
        None => Err(AppError::NotFound(format!(
            "No {} game session for course {}{}",
            query.game_type,
            query.course_id,
            query
                .lesson_id
                .as_deref()
                .map(|lesson| format!(" and lesson {}", lesson))
                .unwrap_or_default()
        ))),
    }
}
