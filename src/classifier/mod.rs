//! Crisis and condition classification.
//!
//! A regex rule set runs first on the crisis path and can only escalate; the
//! LLM-backed [`Classifier`] decides everything else. Callers never see a
//! classifier error on the crisis path: [`CrisisGate`] converts failures and
//! low-confidence clears into a fail-closed CRISIS verdict.

pub mod llm;
pub mod rules;

pub use llm::LlmClassifier;
pub use rules::CrisisRules;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::ClassifierError;
use crate::profile::UserProfile;

/// Binary safety label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrisisLabel {
    Crisis,
    NoCrisis,
}

/// What produced a crisis verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Rules,
    Classifier,
    /// Classifier failed, timed out, or was not confident enough to clear.
    FailClosed,
}

/// Crisis verdict for one message. Never revised once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisVerdict {
    pub label: CrisisLabel,
    pub confidence: f32,
    pub source: VerdictSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl CrisisVerdict {
    pub fn is_crisis(&self) -> bool {
        self.label == CrisisLabel::Crisis
    }

    fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            label: CrisisLabel::Crisis,
            confidence: 0.0,
            source: VerdictSource::FailClosed,
            explanation: Some(reason.into()),
        }
    }
}

/// Coarse mental-health category driving questionnaire selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    Depression,
    Anxiety,
    SubstanceUse,
    AlcoholUse,
    Bipolar,
    General,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 6] = [
        Self::Depression,
        Self::Anxiety,
        Self::SubstanceUse,
        Self::AlcoholUse,
        Self::Bipolar,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Depression => "depression",
            Self::Anxiety => "anxiety",
            Self::SubstanceUse => "substance-use",
            Self::AlcoholUse => "alcohol-use",
            Self::Bipolar => "bipolar",
            Self::General => "general",
        }
    }

    /// Phrase used in user-facing text.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Depression => "low mood or depression",
            Self::Anxiety => "anxiety",
            Self::SubstanceUse => "substance use",
            Self::AlcoholUse => "alcohol use",
            Self::Bipolar => "mood swings",
            Self::General => "a difficult time",
        }
    }

    /// Parse classifier output, accepting common aliases and questionnaire
    /// names. Unrecognised labels become `General`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "depression" | "depressed" | "phq-9" | "phq9" | "low-mood" => Self::Depression,
            "anxiety" | "anxious" | "gad-7" | "gad7" | "panic" | "worry" => Self::Anxiety,
            "substance-use" | "substance" | "substance-abuse" | "drugs" | "drug-use" | "dast-10" | "dast10" => {
                Self::SubstanceUse
            }
            "alcohol-use" | "alcohol" | "drinking" | "audit" => Self::AlcoholUse,
            "bipolar" | "mania" | "mdq" => Self::Bipolar,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Condition label with the classifier's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionLabel {
    pub kind: ConditionKind,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl ConditionLabel {
    /// Label used when classification is unavailable.
    pub fn general() -> Self {
        Self {
            kind: ConditionKind::General,
            confidence: 0.0,
            rationale: None,
        }
    }
}

/// Classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_crisis(&self, text: &str) -> Result<CrisisVerdict, ClassifierError>;

    async fn classify_condition(
        &self,
        text: &str,
        profile: &UserProfile,
    ) -> Result<ConditionLabel, ClassifierError>;
}

/// Crisis check that always produces a verdict.
///
/// Rules run first. The classifier is bounded by `timeout`; an error, a
/// timeout, or a NO_CRISIS verdict below `min_confidence` all yield CRISIS.
pub struct CrisisGate {
    rules: CrisisRules,
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    min_confidence: f32,
}

impl CrisisGate {
    pub fn new(
        rules: CrisisRules,
        classifier: Arc<dyn Classifier>,
        timeout: Duration,
        min_confidence: f32,
    ) -> Self {
        Self {
            rules,
            classifier,
            timeout,
            min_confidence,
        }
    }

    pub async fn check(&self, text: &str) -> CrisisVerdict {
        if let Some(rule) = self.rules.evaluate(text) {
            info!(rule = %rule, "Crisis rule matched");
            return CrisisVerdict {
                label: CrisisLabel::Crisis,
                confidence: 1.0,
                source: VerdictSource::Rules,
                explanation: Some(rule.to_string()),
            };
        }

        let verdict = match tokio::time::timeout(self.timeout, self.classifier.classify_crisis(text)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                error!(error = %e, "Crisis classifier failed, failing closed");
                return CrisisVerdict::fail_closed(format!("classifier unavailable: {e}"));
            }
            Err(_) => {
                error!(timeout = ?self.timeout, "Crisis classifier timed out, failing closed");
                return CrisisVerdict::fail_closed(ClassifierError::Timeout(self.timeout).to_string());
            }
        };

        if verdict.label == CrisisLabel::NoCrisis && verdict.confidence < self.min_confidence {
            error!(
                confidence = verdict.confidence,
                threshold = self.min_confidence,
                "Ambiguous crisis verdict, failing closed"
            );
            return CrisisVerdict::fail_closed(format!(
                "no-crisis confidence {:.2} below {:.2}",
                verdict.confidence, self.min_confidence
            ));
        }

        debug!(label = ?verdict.label, confidence = verdict.confidence, "Crisis check complete");
        verdict
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Classifier returning fixed answers, or failing.
    pub(crate) struct StubClassifier {
        pub crisis: Option<CrisisVerdict>,
        pub condition: Option<ConditionLabel>,
        pub delay: Option<Duration>,
    }

    impl StubClassifier {
        pub(crate) fn calm(kind: ConditionKind, confidence: f32) -> Self {
            Self {
                crisis: Some(CrisisVerdict {
                    label: CrisisLabel::NoCrisis,
                    confidence: 0.95,
                    source: VerdictSource::Classifier,
                    explanation: None,
                }),
                condition: Some(ConditionLabel {
                    kind,
                    confidence,
                    rationale: None,
                }),
                delay: None,
            }
        }

        pub(crate) fn broken() -> Self {
            Self {
                crisis: None,
                condition: None,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify_crisis(&self, _text: &str) -> Result<CrisisVerdict, ClassifierError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.crisis
                .clone()
                .ok_or_else(|| ClassifierError::Unavailable("stub".into()))
        }

        async fn classify_condition(
            &self,
            _text: &str,
            _profile: &UserProfile,
        ) -> Result<ConditionLabel, ClassifierError> {
            self.condition
                .clone()
                .ok_or_else(|| ClassifierError::Unavailable("stub".into()))
        }
    }

    fn gate(classifier: StubClassifier) -> CrisisGate {
        CrisisGate::new(
            CrisisRules::default_rules(),
            Arc::new(classifier),
            Duration::from_millis(50),
            0.5,
        )
    }

    #[tokio::test]
    async fn rules_short_circuit_classifier() {
        let verdict = gate(StubClassifier::broken()).check("I want to end it all").await;
        assert!(verdict.is_crisis());
        assert_eq!(verdict.source, VerdictSource::Rules);
    }

    #[tokio::test]
    async fn classifier_failure_fails_closed() {
        let verdict = gate(StubClassifier::broken()).check("I feel a bit low").await;
        assert!(verdict.is_crisis());
        assert_eq!(verdict.source, VerdictSource::FailClosed);
    }

    #[tokio::test]
    async fn classifier_timeout_fails_closed() {
        let mut slow = StubClassifier::calm(ConditionKind::General, 0.9);
        slow.delay = Some(Duration::from_secs(2));
        let verdict = gate(slow).check("hello").await;
        assert!(verdict.is_crisis());
        assert_eq!(verdict.source, VerdictSource::FailClosed);
    }

    #[tokio::test]
    async fn low_confidence_clear_fails_closed() {
        let mut unsure = StubClassifier::calm(ConditionKind::General, 0.9);
        unsure.crisis = Some(CrisisVerdict {
            label: CrisisLabel::NoCrisis,
            confidence: 0.3,
            source: VerdictSource::Classifier,
            explanation: None,
        });
        let verdict = gate(unsure).check("hello").await;
        assert!(verdict.is_crisis());
    }

    #[tokio::test]
    async fn confident_clear_passes() {
        let verdict = gate(StubClassifier::calm(ConditionKind::Anxiety, 0.8))
            .check("I get nervous before exams")
            .await;
        assert!(!verdict.is_crisis());
        assert_eq!(verdict.source, VerdictSource::Classifier);
    }

    #[test]
    fn condition_aliases() {
        assert_eq!(ConditionKind::from_label("Anxiety"), ConditionKind::Anxiety);
        assert_eq!(ConditionKind::from_label("PHQ-9"), ConditionKind::Depression);
        assert_eq!(ConditionKind::from_label("substance"), ConditionKind::SubstanceUse);
        assert_eq!(ConditionKind::from_label("alcohol"), ConditionKind::AlcoholUse);
        assert_eq!(ConditionKind::from_label("substance_use"), ConditionKind::SubstanceUse);
        assert_eq!(ConditionKind::from_label("stress"), ConditionKind::General);
    }

    #[test]
    fn display_matches_serde() {
        for kind in ConditionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
            assert_eq!(ConditionKind::from_label(kind.as_str()), kind);
        }
        let json = serde_json::to_string(&CrisisLabel::NoCrisis).unwrap();
        assert_eq!(json, "\"NO_CRISIS\"");
    }
}
