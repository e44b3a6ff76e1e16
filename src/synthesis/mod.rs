//! Recommendation synthesis.
//!
//! Turns the accumulated turn context into a user-facing recommendation.
//! Severity only ever moves up: crisis verdicts and top-tier or critical
//! assessment results set a floor the model cannot talk its way below, and
//! the model's own rating is honoured only when it is higher.

pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assessment::{AssessmentResult, catalog};
use crate::classifier::{ConditionLabel, CrisisVerdict};
use crate::config::PipelineConfig;
use crate::error::SynthesisError;
use crate::knowledge::RetrievedPassage;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::profile::UserProfile;
use crate::resources::{FALLBACK_MESSAGE, Resource, ResourceDirectory, ResourceKind};

pub use prompts::ContextLevel;
use prompts::{Draft, build_synthesis_system_prompt, build_synthesis_user_prompt, parse_synthesis_response};

/// Organisations listed with a routine recommendation.
const MAX_ROUTINE_RESOURCES: usize = 3;

/// How urgently the user should seek help. Ordered lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityFlag {
    Routine,
    Elevated,
    Urgent,
}

impl std::fmt::Display for SeverityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Routine => "routine",
            Self::Elevated => "elevated",
            Self::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SeverityFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "routine" | "low" => Ok(Self::Routine),
            "elevated" | "moderate" | "medium" => Ok(Self::Elevated),
            "urgent" | "high" | "crisis" => Ok(Self::Urgent),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Everything the synthesizer knows about the turn.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    /// The message the recommendation answers.
    pub text: &'a str,
    pub profile: &'a UserProfile,
    pub condition: &'a ConditionLabel,
    pub assessment: Option<&'a AssessmentResult>,
    pub assessment_declined: bool,
    pub passages: &'a [RetrievedPassage],
    pub crisis: &'a CrisisVerdict,
    /// An upstream stage substituted defaults.
    pub degraded: bool,
}

impl SynthesisInput<'_> {
    /// Lowest severity the recommendation may carry.
    pub fn severity_floor(&self) -> SeverityFlag {
        if self.crisis.is_crisis() || self.assessment.is_some_and(AssessmentResult::escalates) {
            return SeverityFlag::Urgent;
        }
        match self.assessment {
            Some(result) => {
                let questionnaire = catalog::get(result.questionnaire);
                let lowest = questionnaire.bands.first().map(|b| b.max).unwrap_or(0);
                if result.raw_score > lowest {
                    SeverityFlag::Elevated
                } else {
                    SeverityFlag::Routine
                }
            }
            None => SeverityFlag::Routine,
        }
    }
}

/// Final user-facing output of a non-crisis turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    /// Passages the text was generated from.
    pub citations: Vec<RetrievedPassage>,
    pub resources: Vec<Resource>,
    pub severity: SeverityFlag,
    /// Produced with partial context.
    pub degraded: bool,
    /// Generation failed and the fixed fallback message was used.
    pub fallback: bool,
}

impl Recommendation {
    /// The fixed supportive message with `resources`, used when no
    /// recommendation could be generated.
    pub fn fallback(resources: Vec<Resource>, severity: SeverityFlag) -> Self {
        Self {
            text: FALLBACK_MESSAGE.to_string(),
            citations: Vec::new(),
            resources,
            severity,
            degraded: true,
            fallback: true,
        }
    }

    /// Text plus resource list, for plain-text channels.
    pub fn render(&self) -> String {
        let mut out = self.text.clone();
        if !self.resources.is_empty() {
            out.push_str("\n\nSupport you can reach out to:");
            for resource in &self.resources {
                out.push_str("\n- ");
                out.push_str(&resource.display_line());
            }
        }
        out
    }
}

pub struct RecommendationSynthesizer {
    llm: Arc<dyn LlmProvider>,
    directory: Arc<ResourceDirectory>,
    timeout: Duration,
    retries: u32,
    temperature: f32,
    max_tokens: u32,
}

impl RecommendationSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, directory: Arc<ResourceDirectory>, config: &PipelineConfig) -> Self {
        Self {
            llm,
            directory,
            timeout: config.synthesis_timeout,
            retries: config.synthesis_retries,
            temperature: config.synthesis_temperature,
            max_tokens: config.synthesis_max_tokens,
        }
    }

    /// Produce a recommendation. Never fails: after the retry ladder is
    /// exhausted the fixed fallback message is returned with helplines.
    pub async fn synthesize(&self, input: &SynthesisInput<'_>) -> Recommendation {
        let floor = input.severity_floor();
        let ladder = ContextLevel::ladder(!input.passages.is_empty(), input.assessment.is_some());
        let attempts = 1 + self.retries as usize;

        for attempt in 0..attempts {
            let level = ladder[attempt.min(ladder.len() - 1)];
            match self.generate(input, level).await {
                Ok(draft) => {
                    let severity = floor.max(draft.severity.unwrap_or(SeverityFlag::Routine));
                    if severity > floor {
                        info!(%floor, %severity, "Model raised recommendation severity");
                    }
                    let citations = if level.includes_passages() {
                        input.passages.to_vec()
                    } else {
                        Vec::new()
                    };
                    debug!(attempt, ?level, %severity, "Recommendation generated");
                    return Recommendation {
                        text: draft.text,
                        citations,
                        resources: self.resources_for(input.profile, severity),
                        severity,
                        degraded: input.degraded || level != ContextLevel::Full,
                        fallback: false,
                    };
                }
                Err(e) => {
                    warn!(attempt, ?level, error = %e, "Recommendation attempt failed");
                }
            }
        }

        warn!(attempts, "Synthesis exhausted, using fallback message");
        Recommendation::fallback(self.directory.helplines(input.profile.region.as_deref()), floor)
    }

    async fn generate(&self, input: &SynthesisInput<'_>, level: ContextLevel) -> Result<Draft, SynthesisError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_synthesis_system_prompt()),
            ChatMessage::user(build_synthesis_user_prompt(input, level)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| SynthesisError::Timeout(self.timeout))??;

        parse_synthesis_response(&response.content).map_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Failed to parse synthesis response"
            );
            SynthesisError::EmptyOutput
        })
    }

    /// Urgent recommendations carry helplines; elevated ones every local
    /// entry; routine ones a few organisations.
    fn resources_for(&self, profile: &UserProfile, severity: SeverityFlag) -> Vec<Resource> {
        let region = profile.region.as_deref();
        match severity {
            SeverityFlag::Urgent => self.directory.helplines(region),
            SeverityFlag::Elevated => self.directory.for_region(region),
            SeverityFlag::Routine => self
                .directory
                .for_region(region)
                .into_iter()
                .filter(|r| r.kind == ResourceKind::Organization)
                .take(MAX_ROUTINE_RESOURCES)
                .collect(),
        }
    }
}
