//! Prompt construction and response parsing for recommendation synthesis.

use crate::assessment::{AssessmentResult, catalog};
use crate::knowledge::RetrievedPassage;
use crate::llm::extract_json_object;
use crate::synthesis::{SeverityFlag, SynthesisInput};

/// Max characters of the user's message placed in the prompt.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Max characters per retrieved passage.
const MAX_PASSAGE_CHARS: usize = 1500;

/// How much context a synthesis attempt carries. Each level drops more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextLevel {
    Full,
    WithoutPassages,
    WithoutAssessmentDetail,
}

impl ContextLevel {
    /// Levels to try in order, skipping ones that would send the same prompt
    /// as the level before.
    pub fn ladder(has_passages: bool, has_assessment: bool) -> Vec<ContextLevel> {
        let mut levels = vec![Self::Full];
        if has_passages {
            levels.push(Self::WithoutPassages);
        }
        if has_assessment {
            levels.push(Self::WithoutAssessmentDetail);
        }
        levels
    }

    pub fn includes_passages(&self) -> bool {
        *self == Self::Full
    }

    pub fn includes_assessment_detail(&self) -> bool {
        *self != Self::WithoutAssessmentDetail
    }
}

// ── Prompt construction ─────────────────────────────────────────────

pub(crate) fn build_synthesis_system_prompt() -> String {
    "You are a warm, supportive mental health assistant. You write short, practical \
     self-care recommendations for the person you are talking with.\n\n\
     Guidelines:\n\
     - Be empathetic and non-judgmental. Acknowledge how they feel before giving advice\n\
     - Be culturally sensitive. Respect family, community, and spiritual practices the person may value\n\
     - Give 3 to 5 concrete, actionable steps they can take this week\n\
     - Ground your advice in the reference passages when they are relevant; never invent facts\n\
     - Do not diagnose, and do not mention questionnaire names, scores, or severity labels\n\
     - Encourage speaking with a counsellor or doctor when symptoms are significant\n\
     - Do not list phone numbers; support contacts are added separately\n\n\
     Also rate how urgently the person should seek professional help:\n\
     \"routine\" (self-care is enough for now), \"elevated\" (should talk to a professional soon), \
     \"urgent\" (needs help today).\n\n\
     Respond with ONLY a JSON object:\n\
     {\"response\": \"...\", \"severity\": \"routine|elevated|urgent\"}"
        .to_string()
}

pub(crate) fn build_synthesis_user_prompt(input: &SynthesisInput<'_>, level: ContextLevel) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(&format!("About the user: {}\n", input.profile.summary()));
    prompt.push_str(&format!(
        "Main concern: {}\n",
        input.condition.kind.describe()
    ));

    if let Some(result) = input.assessment {
        if level.includes_assessment_detail() {
            prompt.push_str(&format!("Screening: {}\n", describe_result(result)));
        } else {
            prompt.push_str("Screening: completed\n");
        }
    } else if input.assessment_declined {
        prompt.push_str("Screening: the user chose not to answer a questionnaire; do not suggest it again\n");
    }

    if level.includes_passages() && !input.passages.is_empty() {
        prompt.push_str("\nReference passages:\n");
        for (i, passage) in input.passages.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, format_passage(passage)));
        }
    }

    let message: String = input.text.chars().take(MAX_MESSAGE_CHARS).collect();
    prompt.push_str(&format!("\nUser's message:\n{message}"));
    prompt
}

fn describe_result(result: &AssessmentResult) -> String {
    let questionnaire = catalog::get(result.questionnaire);
    let mut line = format!(
        "{} score {}/{} ({})",
        questionnaire.id, result.raw_score, result.max_score, result.band
    );
    if result.critical_item {
        line.push_str(", reported thoughts of self-harm");
    }
    line
}

fn format_passage(passage: &RetrievedPassage) -> String {
    let text: String = passage.text.chars().take(MAX_PASSAGE_CHARS).collect();
    match &passage.title {
        Some(title) => format!("{title}: {text}"),
        None => text,
    }
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    severity: String,
}

/// Parsed model output: the recommendation text and the model's own
/// urgency rating, if it gave a recognisable one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Draft {
    pub text: String,
    pub severity: Option<SeverityFlag>,
}

/// Parse synthesis output. Plain prose without JSON is accepted as the
/// recommendation text.
pub(crate) fn parse_synthesis_response(raw: &str) -> Result<Draft, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty response".into());
    }

    let json_str = extract_json_object(trimmed);
    match serde_json::from_str::<SynthesisResponse>(&json_str) {
        Ok(parsed) => {
            let text = parsed.response.trim().to_string();
            if text.is_empty() {
                return Err("response field is empty".into());
            }
            Ok(Draft {
                text,
                severity: parsed.severity.parse().ok(),
            })
        }
        Err(_) if !trimmed.starts_with('{') => Ok(Draft {
            text: trimmed.to_string(),
            severity: None,
        }),
        Err(e) => Err(format!("JSON parse error: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::QuestionnaireId;
    use crate::classifier::{ConditionKind, ConditionLabel, CrisisLabel, CrisisVerdict, VerdictSource};
    use crate::profile::UserProfile;

    fn verdict() -> CrisisVerdict {
        CrisisVerdict {
            label: CrisisLabel::NoCrisis,
            confidence: 0.9,
            source: VerdictSource::Classifier,
            explanation: None,
        }
    }

    fn passage() -> RetrievedPassage {
        RetrievedPassage {
            document_id: "sleep".into(),
            title: Some("Sleep hygiene".into()),
            source: None,
            text: "Keep a regular bedtime.".into(),
            score: 0.8,
        }
    }

    fn result() -> AssessmentResult {
        AssessmentResult {
            questionnaire: QuestionnaireId::Phq9,
            raw_score: 12,
            max_score: 27,
            band: "moderate".into(),
            top_tier: false,
            critical_item: false,
        }
    }

    #[test]
    fn ladder_skips_empty_rungs() {
        assert_eq!(ContextLevel::ladder(false, false), vec![ContextLevel::Full]);
        assert_eq!(
            ContextLevel::ladder(true, false),
            vec![ContextLevel::Full, ContextLevel::WithoutPassages]
        );
        assert_eq!(
            ContextLevel::ladder(false, true),
            vec![ContextLevel::Full, ContextLevel::WithoutAssessmentDetail]
        );
        assert_eq!(ContextLevel::ladder(true, true).len(), 3);
    }

    #[test]
    fn system_prompt_forbids_revealing_scores() {
        let prompt = build_synthesis_system_prompt();
        assert!(prompt.contains("do not mention questionnaire names, scores"));
        assert!(prompt.contains("culturally sensitive"));
        assert!(prompt.contains("\"severity\""));
    }

    #[test]
    fn user_prompt_levels_drop_context() {
        let profile = UserProfile::default();
        let condition = ConditionLabel {
            kind: ConditionKind::Depression,
            confidence: 0.9,
            rationale: None,
        };
        let passages = vec![passage()];
        let result = result();
        let crisis = verdict();
        let input = SynthesisInput {
            text: "I can't sleep and feel hopeless",
            profile: &profile,
            condition: &condition,
            assessment: Some(&result),
            assessment_declined: false,
            passages: &passages,
            crisis: &crisis,
            degraded: false,
        };

        let full = build_synthesis_user_prompt(&input, ContextLevel::Full);
        assert!(full.contains("[1] Sleep hygiene: Keep a regular bedtime."));
        assert!(full.contains("PHQ-9 score 12/27 (moderate)"));
        assert!(full.contains("I can't sleep"));

        let reduced = build_synthesis_user_prompt(&input, ContextLevel::WithoutPassages);
        assert!(!reduced.contains("Reference passages"));
        assert!(reduced.contains("PHQ-9 score"));

        let minimal = build_synthesis_user_prompt(&input, ContextLevel::WithoutAssessmentDetail);
        assert!(!minimal.contains("PHQ-9"));
        assert!(minimal.contains("Screening: completed"));
    }

    #[test]
    fn parse_json_response() {
        let draft =
            parse_synthesis_response(r#"{"response": "Try a short walk.", "severity": "elevated"}"#).unwrap();
        assert_eq!(draft.text, "Try a short walk.");
        assert_eq!(draft.severity, Some(SeverityFlag::Elevated));
    }

    #[test]
    fn parse_markdown_wrapped_response() {
        let raw = "```json\n{\"response\": \"Rest well.\", \"severity\": \"routine\"}\n```";
        let draft = parse_synthesis_response(raw).unwrap();
        assert_eq!(draft.text, "Rest well.");
        assert_eq!(draft.severity, Some(SeverityFlag::Routine));
    }

    #[test]
    fn parse_plain_text_response() {
        let draft = parse_synthesis_response("Here are a few ideas that might help.").unwrap();
        assert_eq!(draft.text, "Here are a few ideas that might help.");
        assert_eq!(draft.severity, None);
    }

    #[test]
    fn parse_unknown_severity_is_ignored() {
        let draft = parse_synthesis_response(r#"{"response": "Ok.", "severity": "meh"}"#).unwrap();
        assert_eq!(draft.severity, None);
    }

    #[test]
    fn parse_empty_fails() {
        assert!(parse_synthesis_response("   ").is_err());
        assert!(parse_synthesis_response(r#"{"response": "", "severity": "urgent"}"#).is_err());
    }
}
