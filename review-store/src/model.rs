//! Row model and the review state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Review lifecycle. Transitions are one-way:
/// `Pending -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states set `completed_at` exactly once.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legality of a transition under the review lifecycle.
    pub fn can_transition_to(&self, to: ReviewState) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// A persisted review header row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReviewRecord {
    pub id: Uuid,
    pub provider: String,
    pub repository_id: String,
    pub change_request_number: i64,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub raw_response: Option<String>,
    pub summary: Option<String>,
    pub overall_confidence: Option<f32>,
}

impl ReviewRecord {
    pub fn state(&self) -> Option<ReviewState> {
        ReviewState::parse(&self.state)
    }
}

/// A persisted issue row, materialized with its review.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StoredIssue {
    pub id: Uuid,
    pub review_id: Uuid,
    pub file: String,
    pub start_line: i32,
    pub severity: String,
    pub title: String,
    pub suggestion: Option<String>,
    pub confidence_score: Option<f32>,
    pub inline_comment_posted: bool,
    pub scm_comment_id: Option<String>,
    pub fallback_reason: Option<String>,
    pub position_metadata: Option<String>,
}

/// A persisted non-blocking note row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StoredNote {
    pub id: Uuid,
    pub review_id: Uuid,
    pub file: String,
    pub line: i32,
    pub note: String,
}

/// Input for inserting/replacing an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssue {
    pub file: String,
    pub start_line: i32,
    pub severity: String,
    pub title: String,
    pub suggestion: Option<String>,
    pub confidence_score: Option<f32>,
    pub inline_comment_posted: bool,
    pub scm_comment_id: Option<String>,
    pub fallback_reason: Option<String>,
    pub position_metadata: Option<String>,
}

/// Input for inserting/replacing a note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNote {
    pub file: String,
    pub line: i32,
    pub note: String,
}

/// Input for `save`: the review header plus its composed findings.
#[derive(Debug, Clone)]
pub struct NewReview {
    pub provider: String,
    pub repository_id: String,
    pub change_request_number: i64,
    /// Defaults to [`ReviewState::Pending`] when `None`.
    pub state: Option<ReviewState>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub raw_response: Option<String>,
    pub summary: Option<String>,
    pub overall_confidence: Option<f32>,
    pub issues: Vec<NewIssue>,
    pub notes: Vec<NewNote>,
}

/// A fully materialized review aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewAggregate {
    pub review: ReviewRecord,
    pub issues: Vec<StoredIssue>,
    pub notes: Vec<StoredNote>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_round_trip() {
        for s in [
            ReviewState::Pending,
            ReviewState::Processing,
            ReviewState::Completed,
            ReviewState::Failed,
        ] {
            assert_eq!(ReviewState::parse(s.as_str()), Some(s));
        }
        assert_eq!(ReviewState::parse("BOGUS"), None);
    }

    #[test]
    fn only_lifecycle_transitions_are_legal() {
        use ReviewState::*;
        let legal = [
            (Pending, Processing),
            (Processing, Completed),
            (Processing, Failed),
        ];
        for from in [Pending, Processing, Completed, Failed] {
            for to in [Pending, Processing, Completed, Failed] {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(ReviewState::Completed.is_terminal());
        assert!(ReviewState::Failed.is_terminal());
        assert!(!ReviewState::Pending.is_terminal());
        assert!(!ReviewState::Processing.is_terminal());
    }
}
