//! Chat messages sent to the judging model.

use serde::Serialize;

const SYSTEM_PROMPT: &str = "You are Judgement Cat, a playful but fair quiz judge for a learning game. \
Decide whether the student's answer correctly answers the question. Accept answers that are \
correct in substance even if phrased differently. Reply with only a JSON object of the form \
{\"isCorrect\": boolean, \"catResponse\": string, \"explanation\": string}. \
catResponse is one or two short sentences in a cat persona; explanation briefly states the correct answer.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

/// Build the system + user messages for one judging request.
pub fn build_messages(question: &str, user_answer: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", SYSTEM_PROMPT.to_string()),
        ChatMessage::new(
            "user",
            format!(
                "Question: {}\nStudent answer: {}",
                question.trim(),
                user_answer.trim()
            ),
        ),
    ]
}
