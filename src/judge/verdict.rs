//! # Verdict Parsing
//!
//! The model is asked to answer with a JSON object, but what comes back is
//! free-form text: sometimes wrapped in a Markdown code fence, sometimes with
//! a sentence before or after, occasionally not JSON at all. This module digs
//! the object out and falls back to a fixed verdict when that fails.
//!
//! ## Accepted Reply Shapes:
//! - `{"isCorrect": true, "catResponse": "...", "explanation": "..."}`
//! - the same object inside a ```` ```json ```` fence
//! - the same object surrounded by prose
//!
//! `explanation` may be omitted; `isCorrect` and `catResponse` may not.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MALFORMED_REPLY_RESPONSE: &str =
    "Mrrp? My whiskers got tangled judging that one. Try again in a moment!";
pub const MALFORMED_REPLY_EXPLANATION: &str =
    "The judge returned an answer that could not be read.";

pub const TIMEOUT_RESPONSE: &str = "Zzz... Judgement Cat dozed off before deciding. Try again!";
pub const TIMEOUT_EXPLANATION: &str = "The judge did not answer in time.";

pub const UNAVAILABLE_RESPONSE: &str = "Hiss! Judgement Cat is away from the bench right now.";
pub const UNAVAILABLE_EXPLANATION: &str = "The judging service is currently unavailable.";

/// Judging result returned to the browser.
///
/// Serialized with camelCase keys:
/// `{"isCorrect": bool, "catResponse": string, "explanation": string}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_correct: bool,
    pub cat_response: String,
    #[serde(default)]
    pub explanation: String,
}

impl Verdict {
    /// Fallback when the model's reply cannot be parsed.
    pub fn malformed_reply() -> Self {
        Self::fallback(MALFORMED_REPLY_RESPONSE, MALFORMED_REPLY_EXPLANATION)
    }

    /// Fallback when the model did not answer in time.
    pub fn upstream_timeout() -> Self {
        Self::fallback(TIMEOUT_RESPONSE, TIMEOUT_EXPLANATION)
    }

    /// Fallback when the model API is unreachable or returned an error.
    pub fn upstream_unavailable() -> Self {
        Self::fallback(UNAVAILABLE_RESPONSE, UNAVAILABLE_EXPLANATION)
    }

    fn fallback(cat_response: &str, explanation: &str) -> Self {
        Self {
            is_correct: false,
            cat_response: cat_response.to_string(),
            explanation: explanation.to_string(),
        }
    }
}

/// Locate the outermost JSON object in a model reply.
///
/// Code fences need no special handling: everything outside the first `{`
/// and the last `}` is ignored.
fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

/// Parse a model reply into a verdict.
///
/// ## Returns:
/// - **Ok(Verdict)**: a JSON object with the required fields was found
/// - **Err(String)**: no object, invalid JSON, or missing/mistyped fields
pub fn parse_model_reply(reply: &str) -> Result<Verdict, String> {
    let object = extract_json_object(reply)
        .ok_or_else(|| "Reply does not contain a JSON object".to_string())?;

    let verdict: Verdict = serde_json::from_str(object)
        .map_err(|e| format!("Reply JSON does not match verdict shape: {}", e))?;

    if verdict.cat_response.trim().is_empty() {
        return Err("Reply has an empty catResponse".to_string());
    }

    Ok(verdict)
}

/// Parse a model reply, substituting [`Verdict::malformed_reply`] on failure.
pub fn verdict_from_reply(reply: &str) -> Verdict {
    match parse_model_reply(reply) {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(error = %err, reply_len = reply.len(), "Malformed judge reply, using fallback");
            Verdict::malformed_reply()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json_reply() {
        let reply = r#"{"isCorrect": true, "catResponse": "Purrfect!", "explanation": "Paris is the capital."}"#;
        let verdict = parse_model_reply(reply).unwrap();
        assert!(verdict.is_correct);
        assert_eq!(verdict.cat_response, "Purrfect!");
        assert_eq!(verdict.explanation, "Paris is the capital.");
    }

    #[test]
    fn test_fenced_reply() {
        let reply = "```json\n{\"isCorrect\": false, \"catResponse\": \"Nope.\", \"explanation\": \"It is 4.\"}\n```";
        let verdict = parse_model_reply(reply).unwrap();
        assert!(!verdict.is_correct);
        assert_eq!(verdict.explanation, "It is 4.");
    }

    #[test]
    fn test_reply_with_surrounding_prose() {
        let reply = "Here is my judgement:\n{\"isCorrect\": true, \"catResponse\": \"Meow!\"}\nHope that helps.";
        let verdict = parse_model_reply(reply).unwrap();
        assert!(verdict.is_correct);
        assert_eq!(verdict.explanation, "");
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        assert!(parse_model_reply(r#"{"catResponse": "Meow"}"#).is_err());
        assert!(parse_model_reply(r#"{"isCorrect": "yes", "catResponse": "Meow"}"#).is_err());
        assert!(parse_model_reply(r#"{"isCorrect": true, "catResponse": "  "}"#).is_err());
    }

    #[test]
    fn test_garbage_falls_back() {
        for reply in ["", "I think it's right", "}{", "{not json}"] {
            assert_eq!(verdict_from_reply(reply), Verdict::malformed_reply());
        }
    }

    #[test]
    fn test_fallbacks_are_never_correct() {
        for verdict in [
            Verdict::malformed_reply(),
            Verdict::upstream_timeout(),
            Verdict::upstream_unavailable(),
        ] {
            assert!(!verdict.is_correct);
            assert!(!verdict.cat_response.is_empty());
        }
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(Verdict::malformed_reply()).unwrap();
        assert_eq!(value["isCorrect"], false);
        assert_eq!(value["catResponse"], MALFORMED_REPLY_RESPONSE);
        assert!(value.get("is_correct").is_none());
    }
}
