//! Shared types for the conversation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::{AssessmentSession, AssessmentStatus, QuestionPrompt, QuestionnaireId};
use crate::classifier::CrisisVerdict;
use crate::pipeline::{ConversationState, TurnStage};
use crate::resources::Resource;
use crate::synthesis::Recommendation;

// ── Inbound query ───────────────────────────────────────────────────

/// One user message entering the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuery {
    pub session_id: String,
    pub user_id: String,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl UserQuery {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

// ── Turn outcomes ───────────────────────────────────────────────────

/// Fixed safety message plus helplines. Produced whenever the crisis check
/// says CRISIS; nothing downstream runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisResponse {
    pub message: String,
    pub resources: Vec<Resource>,
    pub verdict: CrisisVerdict,
}

impl CrisisResponse {
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        for resource in &self.resources {
            out.push_str("\n- ");
            out.push_str(&resource.display_line());
        }
        out
    }
}

/// What kind of assessment message this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Asking whether the user wants to take the questionnaire.
    Offer,
    /// Next questionnaire item.
    Question,
    /// The last reply could not be understood; asking again.
    Reprompt,
}

/// A message inside the questionnaire flow, awaiting the user's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentPrompt {
    pub kind: PromptKind,
    pub questionnaire: QuestionnaireId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionPrompt>,
}

/// Result of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Crisis(CrisisResponse),
    Assessment(AssessmentPrompt),
    Recommendation(Recommendation),
}

impl TurnOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Crisis(_) => "crisis",
            Self::Assessment(_) => "assessment",
            Self::Recommendation(_) => "recommendation",
        }
    }

    /// Plain-text rendering for the transcript and the CLI.
    pub fn render(&self) -> String {
        match self {
            Self::Crisis(response) => response.render(),
            Self::Assessment(prompt) => prompt.text.clone(),
            Self::Recommendation(recommendation) => recommendation.render(),
        }
    }
}

// ── Session snapshot ────────────────────────────────────────────────

/// Assessment progress as exposed to clients. Scores stay internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub questionnaire: Option<QuestionnaireId>,
    pub status: AssessmentStatus,
    pub answered: usize,
}

impl From<&AssessmentSession> for AssessmentSummary {
    fn from(session: &AssessmentSession) -> Self {
        Self {
            questionnaire: session.questionnaire,
            status: session.status,
            answered: session.answers.len(),
        }
    }
}

/// Read-only view of a stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub version: i64,
    pub turns: u32,
    pub last_stage: Option<TurnStage>,
    pub assessment: Option<AssessmentSummary>,
    /// The question awaiting an answer, if any.
    pub pending_question: Option<QuestionPrompt>,
    pub resolved: Vec<AssessmentSummary>,
}

impl SessionSnapshot {
    pub fn new(session_id: &str, state: &ConversationState, version: i64) -> Self {
        Self {
            session_id: session_id.to_string(),
            version,
            turns: state.turns,
            last_stage: state.last_stage,
            assessment: state.assessment.as_ref().map(AssessmentSummary::from),
            pending_question: state.assessment.as_ref().and_then(|s| s.current_question()),
            resolved: state.resolved.iter().map(AssessmentSummary::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{CrisisLabel, VerdictSource};
    use crate::resources::{ResourceDirectory, SAFETY_MESSAGE};

    #[test]
    fn outcome_is_tagged_by_type() {
        let outcome = TurnOutcome::Crisis(CrisisResponse {
            message: SAFETY_MESSAGE.to_string(),
            resources: ResourceDirectory::builtin("bt").helplines(None),
            verdict: CrisisVerdict {
                label: CrisisLabel::Crisis,
                confidence: 1.0,
                source: VerdictSource::Rules,
                explanation: None,
            },
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "crisis");
        assert_eq!(json["verdict"]["label"], "CRISIS");
        assert!(json["resources"].as_array().unwrap().len() >= 2);
        assert_eq!(outcome.label(), "crisis");
    }

    #[test]
    fn crisis_render_lists_helplines() {
        let response = CrisisResponse {
            message: SAFETY_MESSAGE.to_string(),
            resources: ResourceDirectory::builtin("bt").helplines(None),
            verdict: CrisisVerdict {
                label: CrisisLabel::Crisis,
                confidence: 0.0,
                source: VerdictSource::FailClosed,
                explanation: None,
            },
        };
        let text = response.render();
        assert!(text.starts_with(SAFETY_MESSAGE));
        assert!(text.contains("1010"));
    }
}
