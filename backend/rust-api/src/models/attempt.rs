use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// One user's pass through a quiz. Rows are never deleted, only transitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSession {
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

impl AttemptSession {
    pub fn is_active(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single answer. Appended to its attempt and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    #[validate(length(min = 1, max = 128, message = "question_id must be 1-128 characters"))]
    pub question_id: String,
    pub answer: AnswerValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    /// Seconds spent on the question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(max = 86400, message = "time_spent must not exceed one day"))]
    pub time_spent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Choices(Vec<String>),
}

/// Outcome of start-or-resume: `created` is false when an existing attempt was returned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptResponse {
    pub created: bool,
    pub session: AttemptSession,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(nested)]
    pub answer: Answer,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct FinishAttemptRequest {
    #[serde(default)]
    #[validate(nested, length(max = 500, message = "Too many final answers"))]
    pub answers: Option<Vec<Answer>>,
}

/// Emitted once per attempt when it transitions to completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpReward {
    pub user_id: String,
    pub name: String,
    pub session_id: String,
    pub amount: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_value_accepts_every_variant() {
        let cases = [
            (json!(true), AnswerValue::Flag(true)),
            (json!(42.5), AnswerValue::Number(42.5)),
            (json!("Paris"), AnswerValue::Text("Paris".to_string())),
            (
                json!(["a", "c"]),
                AnswerValue::Choices(vec!["a".to_string(), "c".to_string()]),
            ),
        ];

        for (raw, expected) in cases {
            let parsed: AnswerValue = serde_json::from_value(raw).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn answer_rejects_empty_question_id() {
        let answer = Answer {
            question_id: String::new(),
            answer: AnswerValue::Flag(false),
            is_correct: None,
            time_spent: None,
        };
        assert!(answer.validate().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(AttemptStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        assert!(AttemptStatus::Completed.is_terminal());
        assert!(!AttemptStatus::InProgress.is_terminal());
    }
}
