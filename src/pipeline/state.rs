//! Turn stage machine and persisted per-conversation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::{AssessmentSession, AssessmentStatus, QuestionnaireId};
use crate::classifier::ConditionLabel;
use crate::error::PipelineError;

/// Where a turn is in the pipeline.
///
/// ```text
/// Received → CrisisChecked → CrisisExit
///                          → ProfileLoaded → ConditionClassified → AssessmentPending → AwaitingUser
///                                          ↘ AssessmentPending  ↘ AssessmentResolved
///            AssessmentPending → AssessmentResolved → KnowledgeRetrieved → Synthesized → Delivered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Received,
    CrisisChecked,
    CrisisExit,
    ProfileLoaded,
    ConditionClassified,
    AssessmentPending,
    AwaitingUser,
    AssessmentResolved,
    KnowledgeRetrieved,
    Synthesized,
    Delivered,
}

impl TurnStage {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: TurnStage) -> bool {
        use TurnStage::*;
        matches!(
            (self, target),
            (Received, CrisisChecked)
                | (CrisisChecked, CrisisExit)
                | (CrisisChecked, ProfileLoaded)
                | (ProfileLoaded, ConditionClassified)
                | (ProfileLoaded, AssessmentPending)
                | (ConditionClassified, AssessmentPending)
                | (ConditionClassified, AssessmentResolved)
                | (AssessmentPending, AwaitingUser)
                | (AssessmentPending, AssessmentResolved)
                | (AssessmentResolved, KnowledgeRetrieved)
                | (KnowledgeRetrieved, Synthesized)
                | (Synthesized, Delivered)
        )
    }

    /// A turn ends in exactly one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CrisisExit | Self::AwaitingUser | Self::Delivered)
    }
}

impl std::fmt::Display for TurnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::CrisisChecked => "crisis_checked",
            Self::CrisisExit => "crisis_exit",
            Self::ProfileLoaded => "profile_loaded",
            Self::ConditionClassified => "condition_classified",
            Self::AssessmentPending => "assessment_pending",
            Self::AwaitingUser => "awaiting_user",
            Self::AssessmentResolved => "assessment_resolved",
            Self::KnowledgeRetrieved => "knowledge_retrieved",
            Self::Synthesized => "synthesized",
            Self::Delivered => "delivered",
        };
        write!(f, "{s}")
    }
}

/// Records the stages one turn passes through, rejecting invalid jumps.
#[derive(Debug, Clone)]
pub struct TurnTracker {
    session_id: String,
    history: Vec<TurnStage>,
}

impl TurnTracker {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            history: vec![TurnStage::Received],
        }
    }

    pub fn current(&self) -> TurnStage {
        self.history
            .last()
            .copied()
            .unwrap_or(TurnStage::Received)
    }

    pub fn advance(&mut self, target: TurnStage) -> Result<(), PipelineError> {
        let from = self.current();
        if !from.can_transition_to(target) {
            return Err(PipelineError::InvalidStage {
                from: from.to_string(),
                to: target.to_string(),
            });
        }
        tracing::debug!(session_id = %self.session_id, %from, to = %target, "Stage transition");
        self.history.push(target);
        Ok(())
    }

    pub fn history(&self) -> &[TurnStage] {
        &self.history
    }
}

/// The message an assessment offer interrupted. Its recommendation is
/// produced once the assessment resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTurn {
    pub text: String,
    pub condition: ConditionLabel,
    pub received_at: DateTime<Utc>,
}

/// Everything a conversation carries between messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Offered or in-progress assessment awaiting the user.
    #[serde(default)]
    pub assessment: Option<AssessmentSession>,
    #[serde(default)]
    pub pending: Option<PendingTurn>,
    /// Declined and completed assessments, oldest first.
    #[serde(default)]
    pub resolved: Vec<AssessmentSession>,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub last_stage: Option<TurnStage>,
}

impl ConversationState {
    /// Whether the next message belongs to an open assessment.
    pub fn awaiting_assessment(&self) -> bool {
        self.assessment
            .as_ref()
            .is_some_and(|s| matches!(s.status, AssessmentStatus::Offered | AssessmentStatus::InProgress))
    }

    /// Move the active assessment into the resolved history.
    pub fn resolve_active(&mut self) -> Option<&AssessmentSession> {
        let session = self.assessment.take()?;
        self.resolved.push(session);
        self.resolved.last()
    }

    /// Most recent resolved session for `questionnaire`.
    pub fn prior(&self, questionnaire: QuestionnaireId) -> Option<&AssessmentSession> {
        self.resolved
            .iter()
            .rev()
            .find(|s| s.questionnaire == Some(questionnaire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ConditionKind;

    #[test]
    fn valid_transitions() {
        use TurnStage::*;
        assert!(Received.can_transition_to(CrisisChecked));
        assert!(CrisisChecked.can_transition_to(CrisisExit));
        assert!(ProfileLoaded.can_transition_to(AssessmentPending));
        assert!(AssessmentPending.can_transition_to(AssessmentResolved));
        assert!(Synthesized.can_transition_to(Delivered));
    }

    #[test]
    fn invalid_transitions() {
        use TurnStage::*;
        assert!(!Received.can_transition_to(ProfileLoaded));
        assert!(!CrisisExit.can_transition_to(ProfileLoaded));
        assert!(!ConditionClassified.can_transition_to(KnowledgeRetrieved));
        assert!(!AwaitingUser.can_transition_to(AssessmentResolved));
        assert!(!Delivered.can_transition_to(Received));
    }

    #[test]
    fn terminal_stages() {
        assert!(TurnStage::CrisisExit.is_terminal());
        assert!(TurnStage::AwaitingUser.is_terminal());
        assert!(TurnStage::Delivered.is_terminal());
        assert!(!TurnStage::Synthesized.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        for stage in [
            TurnStage::Received,
            TurnStage::CrisisExit,
            TurnStage::AssessmentPending,
            TurnStage::KnowledgeRetrieved,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }

    #[test]
    fn tracker_rejects_skipped_stage() {
        let mut tracker = TurnTracker::new("s1");
        tracker.advance(TurnStage::CrisisChecked).unwrap();
        let err = tracker.advance(TurnStage::Synthesized).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStage { .. }));
        assert_eq!(tracker.current(), TurnStage::CrisisChecked);
        assert_eq!(tracker.history(), [TurnStage::Received, TurnStage::CrisisChecked]);
    }

    #[test]
    fn resolve_moves_session_to_history() {
        let mut state = ConversationState {
            assessment: Some(AssessmentSession::offer(ConditionKind::Anxiety, QuestionnaireId::Gad7)),
            ..ConversationState::default()
        };
        assert!(state.awaiting_assessment());
        state.assessment.as_mut().unwrap().decline().unwrap();
        assert!(!state.awaiting_assessment());

        state.resolve_active();
        assert!(state.assessment.is_none());
        assert_eq!(
            state.prior(QuestionnaireId::Gad7).map(|s| s.status),
            Some(AssessmentStatus::Declined)
        );
        assert!(state.prior(QuestionnaireId::Phq9).is_none());
    }

    #[test]
    fn empty_json_is_default_state() {
        let state: ConversationState = serde_json::from_str("{}").unwrap();
        assert!(state.assessment.is_none());
        assert_eq!(state.turns, 0);
    }
}
