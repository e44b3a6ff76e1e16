//! LLM-backed classifier.
//!
//! Sends a tight JSON-only prompt and parses the reply. Unparseable replies
//! are errors; the crisis gate turns those into fail-closed verdicts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::classifier::{Classifier, ConditionKind, ConditionLabel, CrisisLabel, CrisisVerdict, VerdictSource};
use crate::error::ClassifierError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::profile::UserProfile;

const CLASSIFIER_MAX_TOKENS: u32 = 200;

/// Longest message excerpt sent to the classifier.
const MAX_INPUT_CHARS: usize = 2000;

pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    temperature: f32,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    async fn ask(&self, system: String, user: String) -> Result<String, ClassifierError> {
        let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(self.temperature)
            .with_max_tokens(CLASSIFIER_MAX_TOKENS);
        let response = self.llm.complete(request).await?;
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Classifier call complete"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify_crisis(&self, text: &str) -> Result<CrisisVerdict, ClassifierError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClassifierError::EmptyInput);
        }
        let raw = self.ask(build_crisis_system_prompt(), truncate(text)).await?;
        parse_crisis_response(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Failed to parse crisis response");
            ClassifierError::Parse(e)
        })
    }

    async fn classify_condition(
        &self,
        text: &str,
        profile: &UserProfile,
    ) -> Result<ConditionLabel, ClassifierError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClassifierError::EmptyInput);
        }
        let raw = self
            .ask(build_condition_system_prompt(), build_condition_user_prompt(text, profile))
            .await?;
        parse_condition_response(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Failed to parse condition response");
            ClassifierError::Parse(e)
        })
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_INPUT_CHARS).collect()
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_crisis_system_prompt() -> String {
    "You are a safety screener for a mental-health support service. Decide whether the message \
     indicates a crisis: suicidal thoughts or plans, self-harm, intent to harm others, or immediate danger.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"is_crisis\": true|false, \"confidence\": 0.0, \"reason\": \"...\"}\n\n\
     Rules:\n\
     - confidence is how sure you are of your is_crisis answer (0.0-1.0)\n\
     - Passive wishes to be dead or to disappear count as crisis\n\
     - Ordinary sadness, stress, or worry is not a crisis\n\
     - When in doubt, answer is_crisis: true\n\
     - reason is one short sentence"
        .to_string()
}

fn build_condition_system_prompt() -> String {
    let labels: Vec<&str> = ConditionKind::ALL.iter().map(|k| k.as_str()).collect();
    format!(
        "You classify the main mental-health concern in a message.\n\n\
         Labels: {}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"condition\": \"...\", \"confidence\": 0.0, \"rationale\": \"...\"}}\n\n\
         Rules:\n\
         - Use \"general\" when no single condition stands out\n\
         - confidence is 0.0-1.0; above 0.8 only for clear, explicit descriptions\n\
         - Use the profile only as context, never as evidence on its own\n\
         - rationale is one short sentence",
        labels.join(", ")
    )
}

fn build_condition_user_prompt(text: &str, profile: &UserProfile) -> String {
    format!("Profile: {}\n\nMessage:\n{}", profile.summary(), truncate(text))
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct CrisisResponse {
    is_crisis: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, serde::Deserialize)]
struct ConditionResponse {
    condition: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    rationale: String,
}

fn parse_crisis_response(raw: &str) -> Result<CrisisVerdict, String> {
    let json_str = extract_json_object(raw);
    let response: CrisisResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    Ok(CrisisVerdict {
        label: if response.is_crisis {
            CrisisLabel::Crisis
        } else {
            CrisisLabel::NoCrisis
        },
        confidence: response.confidence.clamp(0.0, 1.0),
        source: VerdictSource::Classifier,
        explanation: (!response.reason.is_empty()).then_some(response.reason),
    })
}

fn parse_condition_response(raw: &str) -> Result<ConditionLabel, String> {
    let json_str = extract_json_object(raw);
    let response: ConditionResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    if response.condition.trim().is_empty() {
        return Err("empty condition label".into());
    }

    Ok(ConditionLabel {
        kind: ConditionKind::from_label(&response.condition),
        confidence: response.confidence.clamp(0.0, 1.0),
        rationale: (!response.rationale.is_empty()).then_some(response.rationale),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};

    struct MockClassifierLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockClassifierLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            assert!(request.system_prompt().is_some());
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 80,
                output_tokens: 20,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn classifier(response: &str) -> LlmClassifier {
        LlmClassifier::new(
            Arc::new(MockClassifierLlm {
                response: response.into(),
            }),
            0.0,
        )
    }

    #[test]
    fn parse_crisis_true() {
        let v = parse_crisis_response(r#"{"is_crisis": true, "confidence": 0.92, "reason": "plan"}"#).unwrap();
        assert!(v.is_crisis());
        assert_eq!(v.explanation.as_deref(), Some("plan"));
    }

    #[test]
    fn parse_crisis_missing_confidence_is_zero() {
        let v = parse_crisis_response(r#"{"is_crisis": false}"#).unwrap();
        assert_eq!(v.label, CrisisLabel::NoCrisis);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn parse_crisis_confidence_clamped() {
        let v = parse_crisis_response(r#"{"is_crisis": false, "confidence": 7}"#).unwrap();
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn parse_crisis_garbage_fails() {
        assert!(parse_crisis_response("I cannot help with that").is_err());
    }

    #[test]
    fn parse_condition_with_alias() {
        let label = parse_condition_response(
            "```json\n{\"condition\": \"GAD-7\", \"confidence\": 0.7, \"rationale\": \"worry\"}\n```",
        )
        .unwrap();
        assert_eq!(label.kind, ConditionKind::Anxiety);
        assert_eq!(label.confidence, 0.7);
    }

    #[test]
    fn parse_condition_empty_label_fails() {
        assert!(parse_condition_response(r#"{"condition": ""}"#).is_err());
    }

    #[test]
    fn condition_prompt_lists_labels_and_profile() {
        let system = build_condition_system_prompt();
        assert!(system.contains("substance-use"));
        assert!(system.contains("alcohol-use"));
        let mut profile = UserProfile::empty("u");
        profile.age = Some(19);
        let user = build_condition_user_prompt("I can't stop worrying", &profile);
        assert!(user.contains("age 19"));
        assert!(user.contains("can't stop worrying"));
    }

    #[tokio::test]
    async fn classify_crisis_via_llm() {
        let v = classifier(r#"{"is_crisis": false, "confidence": 0.9}"#)
            .classify_crisis("exams are stressful")
            .await
            .unwrap();
        assert!(!v.is_crisis());
        assert_eq!(v.source, VerdictSource::Classifier);
    }

    #[tokio::test]
    async fn classify_condition_via_llm() {
        let label = classifier(r#"{"condition": "depression", "confidence": 0.85}"#)
            .classify_condition("nothing feels worth doing", &UserProfile::default())
            .await
            .unwrap();
        assert_eq!(label.kind, ConditionKind::Depression);
    }

    #[tokio::test]
    async fn empty_input_rejected() {
        let err = classifier("{}").classify_crisis("   ").await.unwrap_err();
        assert!(matches!(err, ClassifierError::EmptyInput));
    }

    #[tokio::test]
    async fn unparseable_reply_is_parse_error() {
        let err = classifier("sorry").classify_crisis("hi").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Parse(_)));
    }
}
