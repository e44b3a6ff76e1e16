//! Standardized questionnaires: catalog, session state machine, scoring.

pub mod catalog;
pub mod session;

pub use catalog::{Questionnaire, QuestionnaireId, SeverityBand};
pub use session::{
    AnswerOutcome, AnswerRecord, AssessmentResult, AssessmentSession, AssessmentStatus, Consent,
    QuestionPrompt, evaluate, parse_consent,
};

use crate::classifier::ConditionLabel;

/// Decide whether a condition label earns a questionnaire offer.
///
/// Returns an Offered session when the label maps to an instrument and its
/// confidence reaches `threshold`; otherwise a resolved NotOffered record.
pub fn select(label: &ConditionLabel, threshold: f32) -> AssessmentSession {
    match catalog::for_condition(label.kind) {
        Some(questionnaire) if label.confidence >= threshold => {
            AssessmentSession::offer(label.kind, questionnaire.id)
        }
        _ => AssessmentSession::not_offered(label.kind),
    }
}

/// User-facing offer text for an Offered session.
pub fn offer_text(session: &AssessmentSession) -> Option<String> {
    let questionnaire = catalog::get(session.questionnaire?);
    Some(questionnaire.offer_text(session.condition))
}
