//! # Judgement Cat Endpoint
//!
//! `POST /api/v1/judge`
//!
//! ## Request Body:
//! ```json
//! { "question": "What is 7 × 8?", "userAnswer": "56" }
//! ```
//!
//! ## Response:
//! ```json
//! { "isCorrect": true, "catResponse": "Purrfect!", "explanation": "7 × 8 = 56." }
//! ```
//!
//! ## Status Codes:
//! - **200**: verdict from the model, or the malformed-reply fallback
//! - **400**: blank question or answer (standard error body)
//! - **502**: model API unavailable (fallback verdict body)
//! - **504**: model API timed out (fallback verdict body)
//!
//! Upstream failures never leak as raw errors: the body is always a verdict.

use crate::error::{AppError, AppResult};
use crate::judge::prompt::build_messages;
use crate::judge::verdict::{verdict_from_reply, Verdict};
use crate::state::AppState;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub question: String,
    pub user_answer: String,
}

impl JudgeRequest {
    fn validate(&self) -> AppResult<()> {
        if self.question.trim().is_empty() {
            return Err(AppError::ValidationError("question must not be empty".to_string()));
        }
        if self.user_answer.trim().is_empty() {
            return Err(AppError::ValidationError("userAnswer must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Status and fallback verdict for an upstream failure.
fn fallback_for(err: &AppError) -> (StatusCode, Verdict) {
    match err {
        AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, Verdict::upstream_timeout()),
        _ => (StatusCode::BAD_GATEWAY, Verdict::upstream_unavailable()),
    }
}

pub async fn judge_answer(
    state: web::Data<AppState>,
    body: web::Json<JudgeRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    request.validate()?;

    let config = state.get_config().judge;
    let messages = build_messages(&request.question, &request.user_answer);
    let start_time = Instant::now();

    match state.judge.complete(&config, messages).await {
        Ok(reply) => {
            let verdict = verdict_from_reply(&reply);
            info!(
                model = %config.model,
                is_correct = verdict.is_correct,
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Answer judged"
            );
            Ok(HttpResponse::Ok().json(verdict))
        }
        Err(err) => {
            let (status, verdict) = fallback_for(&err);
            warn!(
                error = %err,
                status = status.as_u16(),
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Judge request failed, returning fallback verdict"
            );
            Ok(HttpResponse::build(status).json(verdict))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::handlers;
    use crate::judge::verdict::{Verdict, MALFORMED_REPLY_RESPONSE};
    use crate::state::test_support::{state_with, CannedJudge};
    use crate::store::SqliteGameSessionStore;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};
    use serde_json::json;
    use std::sync::Arc;

    async fn judge(judge: CannedJudge, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let store = Arc::new(SqliteGameSessionStore::open(":memory:").unwrap());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with(judge, store)))
                .configure(handlers::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/judge")
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    fn answer() -> serde_json::Value {
        json!({ "question": "What is 7 x 8?", "userAnswer": "56" })
    }

    #[actix_web::test]
    async fn test_correct_answer() {
        let reply = "```json\n{\"isCorrect\": true, \"catResponse\": \"Purrfect!\", \"explanation\": \"56\"}\n```";
        let (status, body) = judge(CannedJudge::replying(reply), answer()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isCorrect"], true);
        assert_eq!(body["catResponse"], "Purrfect!");
    }

    #[actix_web::test]
    async fn test_malformed_reply_falls_back() {
        let (status, body) = judge(CannedJudge::replying("I refuse to answer in JSON"), answer()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isCorrect"], false);
        assert_eq!(body["catResponse"], MALFORMED_REPLY_RESPONSE);
    }

    #[actix_web::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let failing = CannedJudge::failing(|| AppError::Timeout("slow".into()));
        let (status, body) = judge(failing, answer()).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        let verdict: Verdict = serde_json::from_value(body).unwrap();
        assert_eq!(verdict, Verdict::upstream_timeout());
    }

    #[actix_web::test]
    async fn test_upstream_error_maps_to_bad_gateway() {
        let failing = CannedJudge::failing(|| AppError::Upstream("500".into()));
        let (status, body) = judge(failing, answer()).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["isCorrect"], false);
    }

    #[actix_web::test]
    async fn test_blank_answer_is_rejected() {
        let body = json!({ "question": "What is 7 x 8?", "userAnswer": "   " });
        let (status, body) = judge(CannedJudge::replying("{}"), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[actix_web::test]
    async fn test_missing_field_is_rejected_as_json() {
        let (status, body) = judge(CannedJudge::replying("{}"), json!({ "question": "Hi" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "bad_request");
    }
}
