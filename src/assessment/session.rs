//! Assessment session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assessment::catalog::{self, Questionnaire, QuestionnaireId};
use crate::classifier::ConditionKind;
use crate::error::AssessmentError;

/// Lifecycle of an assessment session.
///
/// NotOffered → Offered → (Declined | InProgress); InProgress → InProgress
/// (each answer) → Completed. NotOffered, Declined, and Completed are final
/// for the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    NotOffered,
    Offered,
    Declined,
    InProgress,
    Completed,
}

impl AssessmentStatus {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: AssessmentStatus) -> bool {
        use AssessmentStatus::*;
        matches!(
            (self, target),
            (NotOffered, Offered)
                | (Offered, Declined)
                | (Offered, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
        )
    }

    /// Whether the session is resolved. A session created as NotOffered is
    /// a resolved record; offering always builds a fresh session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotOffered | Self::Declined | Self::Completed)
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotOffered => "not_offered",
            Self::Offered => "offered",
            Self::Declined => "declined",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// One recorded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Zero-based item index.
    pub item: usize,
    pub question: String,
    /// Canonical option label, or "skipped".
    pub answer: String,
    pub score: u32,
    #[serde(default)]
    pub skipped: bool,
}

/// Scored, interpreted outcome of a completed questionnaire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub questionnaire: QuestionnaireId,
    pub raw_score: u32,
    pub max_score: u32,
    pub band: String,
    /// Score falls in the instrument's highest band.
    pub top_tier: bool,
    /// A critical item (e.g. PHQ-9 item 9) was answered above zero.
    pub critical_item: bool,
}

impl AssessmentResult {
    /// Whether this result forces crisis resources into the response.
    pub fn escalates(&self) -> bool {
        self.top_tier || self.critical_item
    }
}

/// The next question to put to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPrompt {
    pub questionnaire: QuestionnaireId,
    /// One-based position.
    pub number: usize,
    pub total: usize,
    pub text: String,
    pub options: Vec<String>,
}

impl QuestionPrompt {
    fn new(questionnaire: &Questionnaire, index: usize) -> Option<Self> {
        let item = questionnaire.items.get(index)?;
        let mut text = String::new();
        if index == 0 {
            text.push_str(questionnaire.instructions);
            text.push_str("\n\n");
        }
        text.push_str(&format!(
            "Question {} of {}: {}\nAnswer with one of: {}",
            index + 1,
            questionnaire.len(),
            item.text,
            item.options_hint()
        ));
        Some(Self {
            questionnaire: questionnaire.id,
            number: index + 1,
            total: questionnaire.len(),
            text,
            options: item.options.iter().map(|o| o.label.to_string()).collect(),
        })
    }
}

/// What recording an answer led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Next(QuestionPrompt),
    Completed(AssessmentResult),
}

/// The user's reply to an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Accept,
    Decline,
}

/// Interpret a reply to an assessment offer.
pub fn parse_consent(text: &str) -> Result<Consent, AssessmentError> {
    let cleaned = text
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    const ACCEPT: &[&str] = &[
        "yes", "y", "yeah", "yep", "sure", "ok", "okay", "alright", "let's do it", "lets do it", "start",
        "go ahead", "yes please", "fine",
    ];
    const DECLINE: &[&str] = &[
        "no", "n", "nope", "nah", "not now", "no thanks", "no thank you", "skip", "later", "decline",
        "i'd rather not", "rather not",
    ];
    if ACCEPT.contains(&cleaned.as_str()) {
        Ok(Consent::Accept)
    } else if DECLINE.contains(&cleaned.as_str()) {
        Ok(Consent::Decline)
    } else if cleaned.starts_with("no ") || cleaned.starts_with("no,") {
        Ok(Consent::Decline)
    } else if cleaned.starts_with("yes ") || cleaned.starts_with("yes,") {
        Ok(Consent::Accept)
    } else {
        Err(AssessmentError::InvalidConsent(text.trim().to_string()))
    }
}

/// A questionnaire run within one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub id: Uuid,
    pub condition: ConditionKind,
    pub questionnaire: Option<QuestionnaireId>,
    pub status: AssessmentStatus,
    pub answers: Vec<AnswerRecord>,
    /// Index of the next item to ask.
    pub next_item: usize,
    pub result: Option<AssessmentResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssessmentSession {
    fn blank(condition: ConditionKind, questionnaire: Option<QuestionnaireId>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            condition,
            questionnaire,
            status: AssessmentStatus::NotOffered,
            answers: Vec::new(),
            next_item: 0,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolved record for a turn where no questionnaire applies.
    pub fn not_offered(condition: ConditionKind) -> Self {
        Self::blank(condition, catalog::for_condition(condition).map(|q| q.id))
    }

    /// New session offering `questionnaire`.
    pub fn offer(condition: ConditionKind, questionnaire: QuestionnaireId) -> Self {
        let mut session = Self::blank(condition, Some(questionnaire));
        session.status = AssessmentStatus::Offered;
        session
    }

    fn transition(&mut self, target: AssessmentStatus) -> Result<(), AssessmentError> {
        if !self.status.can_transition_to(target) {
            return Err(AssessmentError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn instrument(&self) -> Result<&'static Questionnaire, AssessmentError> {
        self.questionnaire
            .map(catalog::get)
            .ok_or_else(|| AssessmentError::UnknownQuestionnaire(self.condition.to_string()))
    }

    /// Offered → Declined.
    pub fn decline(&mut self) -> Result<(), AssessmentError> {
        self.transition(AssessmentStatus::Declined)
    }

    /// Offered → InProgress. Returns the first question.
    pub fn consent(&mut self) -> Result<QuestionPrompt, AssessmentError> {
        let questionnaire = self.instrument()?;
        self.transition(AssessmentStatus::InProgress)?;
        QuestionPrompt::new(questionnaire, self.next_item).ok_or(AssessmentError::Incomplete {
            answered: 0,
            required: 0,
        })
    }

    /// The question awaiting an answer, if the session is in progress.
    pub fn current_question(&self) -> Option<QuestionPrompt> {
        if self.status != AssessmentStatus::InProgress {
            return None;
        }
        QuestionPrompt::new(self.instrument().ok()?, self.next_item)
    }

    /// Record an answer to the current question.
    ///
    /// Invalid answers leave the session untouched. Recording the last
    /// answer scores the questionnaire and completes the session.
    pub fn record_answer(&mut self, raw: &str) -> Result<AnswerOutcome, AssessmentError> {
        if self.status != AssessmentStatus::InProgress {
            return Err(AssessmentError::Closed {
                status: self.status.to_string(),
            });
        }
        let questionnaire = self.instrument()?;
        let index = self.next_item;
        let item = questionnaire
            .items
            .get(index)
            .ok_or(AssessmentError::Incomplete {
                answered: self.answers.len(),
                required: questionnaire.len(),
            })?;
        let option = item.parse_answer(raw).ok_or_else(|| AssessmentError::InvalidAnswer {
            question: index + 1,
            reason: format!("expected one of: {}", item.options_hint()),
        })?;

        self.transition(AssessmentStatus::InProgress)?;
        self.answers.push(AnswerRecord {
            item: index,
            question: item.text.to_string(),
            answer: option.label.to_string(),
            score: option.score,
            skipped: false,
        });
        self.next_item = index + 1;

        if let Some(rule) = questionnaire.skip_rule
            && rule.trigger_item == index
            && rule.trigger_value == option.value
        {
            for skipped in self.next_item..rule.resume_at.min(questionnaire.len()) {
                self.answers.push(AnswerRecord {
                    item: skipped,
                    question: questionnaire.items[skipped].text.to_string(),
                    answer: "skipped".to_string(),
                    score: 0,
                    skipped: true,
                });
            }
            self.next_item = self.next_item.max(rule.resume_at);
        }

        if self.next_item >= questionnaire.len() {
            let result = evaluate(questionnaire, &self.answers)?;
            self.transition(AssessmentStatus::Completed)?;
            self.result = Some(result.clone());
            return Ok(AnswerOutcome::Completed(result));
        }

        QuestionPrompt::new(questionnaire, self.next_item)
            .map(AnswerOutcome::Next)
            .ok_or(AssessmentError::Incomplete {
                answered: self.answers.len(),
                required: questionnaire.len(),
            })
    }
}

/// Score and interpret a full answer set. Pure and deterministic.
pub fn evaluate(
    questionnaire: &Questionnaire,
    answers: &[AnswerRecord],
) -> Result<AssessmentResult, AssessmentError> {
    if answers.len() != questionnaire.len() {
        return Err(AssessmentError::Incomplete {
            answered: answers.len(),
            required: questionnaire.len(),
        });
    }
    let raw_score: u32 = answers.iter().map(|a| a.score).sum();
    let band = questionnaire.interpret(raw_score);
    let critical_item = answers
        .iter()
        .any(|a| questionnaire.critical_items.contains(&a.item) && a.score > 0);

    Ok(AssessmentResult {
        questionnaire: questionnaire.id,
        raw_score,
        max_score: questionnaire.max_score(),
        band: band.label.to_string(),
        top_tier: questionnaire.is_top_tier(band),
        critical_item,
    })
}
