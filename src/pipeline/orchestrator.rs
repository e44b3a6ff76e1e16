//! Turn orchestrator: runs one user message through the pipeline.
//!
//! Flow:
//! 1. Crisis gate (every message, including questionnaire answers) → may exit
//! 2. Profile lookup (bounded, defaults on failure)
//! 3. Open assessment? continue it. Otherwise classify the condition and
//!    maybe offer a questionnaire → may pause for the user
//! 4. Knowledge retrieval (bounded, empty on failure)
//! 5. Recommendation synthesis (retry ladder, fallback)

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::assessment::{
    self, AnswerOutcome, AssessmentResult, AssessmentSession, AssessmentStatus, Consent, parse_consent,
};
use crate::classifier::{Classifier, ConditionKind, ConditionLabel, CrisisGate, CrisisRules, CrisisVerdict};
use crate::config::PipelineConfig;
use crate::error::{AssessmentError, PipelineError};
use crate::knowledge::{KnowledgeIndex, KnowledgeRetriever, Reranker, refine_query};
use crate::llm::LlmProvider;
use crate::pipeline::sessions::SessionRegistry;
use crate::pipeline::state::{ConversationState, PendingTurn, TurnStage, TurnTracker};
use crate::pipeline::types::{AssessmentPrompt, CrisisResponse, PromptKind, SessionSnapshot, TurnOutcome};
use crate::profile::{ANONYMOUS_USER_ID, ProfileLoader, UserProfile};
use crate::resources::{ResourceDirectory, SAFETY_MESSAGE};
use crate::store::{ProfileStore, SessionStore};
use crate::synthesis::{Recommendation, RecommendationSynthesizer, SeverityFlag, SynthesisInput};

/// Collaborators the orchestrator is built from.
pub struct OrchestratorDeps {
    pub classifier: Arc<dyn Classifier>,
    pub rules: CrisisRules,
    pub profiles: Arc<dyn ProfileStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub index: Arc<dyn KnowledgeIndex>,
    /// Second-pass ordering of retrieved passages, if any.
    pub reranker: Option<Arc<dyn Reranker>>,
    pub llm: Arc<dyn LlmProvider>,
    pub directory: Arc<ResourceDirectory>,
}

/// Assessment context a recommendation is built on.
struct Resolution {
    text: String,
    condition: ConditionLabel,
    result: Option<AssessmentResult>,
    declined: bool,
}

enum AssessmentStep {
    Prompt(AssessmentPrompt),
    Resolved(AssessmentSession),
}

pub struct Orchestrator {
    config: PipelineConfig,
    crisis: CrisisGate,
    classifier: Arc<dyn Classifier>,
    profiles: ProfileLoader,
    retriever: KnowledgeRetriever,
    synthesizer: RecommendationSynthesizer,
    directory: Arc<ResourceDirectory>,
    sessions: SessionRegistry,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, deps: OrchestratorDeps) -> Self {
        let crisis = CrisisGate::new(
            deps.rules,
            deps.classifier.clone(),
            config.classifier_timeout,
            config.crisis_min_confidence,
        );
        let synthesizer = RecommendationSynthesizer::new(deps.llm, deps.directory.clone(), &config);
        let mut retriever = KnowledgeRetriever::new(deps.index, config.retrieval_timeout);
        if let Some(reranker) = deps.reranker {
            retriever = retriever.with_reranker(reranker);
        }
        Self {
            crisis,
            classifier: deps.classifier,
            profiles: ProfileLoader::new(deps.profiles, config.profile_timeout),
            retriever,
            synthesizer,
            directory: deps.directory,
            sessions: SessionRegistry::new(deps.sessions),
            config,
        }
    }

    pub fn directory(&self) -> &ResourceDirectory {
        &self.directory
    }

    /// Run one user message through the pipeline.
    ///
    /// Only empty input is an error; every other failure degrades to a
    /// default and the turn still produces an outcome.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<TurnOutcome, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let user_id = match user_id.trim() {
            "" => ANONYMOUS_USER_ID,
            id => id,
        };

        let mut handle = self.sessions.checkout(session_id, user_id).await;
        let mut tracker = TurnTracker::new(session_id);
        info!(session_id, turn = handle.state.turns + 1, "Handling turn");

        let outcome = match self.run(&mut handle.state, &mut tracker, user_id, text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id, error = %e, stage = %tracker.current(), "Turn failed, sending fallback");
                // Drop the open assessment so the next message starts clean.
                handle.state.assessment = None;
                handle.state.pending = None;
                TurnOutcome::Recommendation(Recommendation::fallback(
                    self.directory.helplines(None),
                    SeverityFlag::Routine,
                ))
            }
        };

        handle.state.turns += 1;
        handle.state.last_stage = Some(tracker.current());
        if self.sessions.save(&mut handle).await.is_err() {
            warn!(session_id, "Turn delivered without persisting session state");
        }
        self.sessions
            .record_exchange(session_id, text, &outcome.render())
            .await;

        info!(
            session_id,
            outcome = outcome.label(),
            stage = %tracker.current(),
            "Turn complete"
        );
        debug!(session_id, path = ?tracker.history(), "Turn stages");
        Ok(outcome)
    }

    /// Stored view of a session, if it exists.
    pub async fn session_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>, PipelineError> {
        Ok(self
            .sessions
            .snapshot(session_id)
            .await?
            .map(|(state, version)| SessionSnapshot::new(session_id, &state, version)))
    }

    async fn run(
        &self,
        state: &mut ConversationState,
        tracker: &mut TurnTracker,
        user_id: &str,
        text: &str,
    ) -> Result<TurnOutcome, PipelineError> {
        let verdict = self.crisis.check(text).await;
        tracker.advance(TurnStage::CrisisChecked)?;
        if verdict.is_crisis() {
            tracker.advance(TurnStage::CrisisExit)?;
            info!(source = ?verdict.source, "Crisis exit");
            return Ok(TurnOutcome::Crisis(self.crisis_response(verdict)));
        }

        let lookup = self.profiles.load(user_id).await;
        tracker.advance(TurnStage::ProfileLoaded)?;
        let mut degraded = lookup.degraded;

        let resolution = if state.awaiting_assessment() {
            tracker.advance(TurnStage::AssessmentPending)?;
            match self.continue_assessment(state, text)? {
                AssessmentStep::Prompt(prompt) => {
                    tracker.advance(TurnStage::AwaitingUser)?;
                    return Ok(TurnOutcome::Assessment(prompt));
                }
                AssessmentStep::Resolved(session) => {
                    tracker.advance(TurnStage::AssessmentResolved)?;
                    let pending = state.pending.take();
                    Resolution {
                        text: pending
                            .as_ref()
                            .map(|p| p.text.clone())
                            .unwrap_or_else(|| text.to_string()),
                        condition: pending
                            .map(|p| p.condition)
                            .unwrap_or_else(ConditionLabel::general),
                        declined: session.status == AssessmentStatus::Declined,
                        result: session.result,
                    }
                }
            }
        } else {
            let (condition, classified) = self.classify_condition(text, &lookup.profile).await;
            degraded |= !classified;
            tracker.advance(TurnStage::ConditionClassified)?;

            let session = assessment::select(&condition, self.config.assessment_offer_threshold);
            let prior = session.questionnaire.and_then(|q| state.prior(q));

            match (session.status, prior) {
                (AssessmentStatus::Offered, None) => {
                    tracker.advance(TurnStage::AssessmentPending)?;
                    let prompt = offer_prompt(&session, PromptKind::Offer)?;
                    info!(questionnaire = ?session.questionnaire, "Offering assessment");
                    state.assessment = Some(session);
                    state.pending = Some(PendingTurn {
                        text: text.to_string(),
                        condition,
                        received_at: Utc::now(),
                    });
                    tracker.advance(TurnStage::AwaitingUser)?;
                    return Ok(TurnOutcome::Assessment(prompt));
                }
                (AssessmentStatus::Offered, Some(prior)) => {
                    debug!(questionnaire = ?prior.questionnaire, status = %prior.status, "Questionnaire already resolved in this conversation");
                    let result = prior.result.clone();
                    let declined = prior.status == AssessmentStatus::Declined;
                    tracker.advance(TurnStage::AssessmentResolved)?;
                    Resolution {
                        text: text.to_string(),
                        condition,
                        result,
                        declined,
                    }
                }
                _ => {
                    tracker.advance(TurnStage::AssessmentResolved)?;
                    Resolution {
                        text: text.to_string(),
                        condition,
                        result: None,
                        declined: false,
                    }
                }
            }
        };

        let query = refine_query(&resolution.text, resolution.condition.kind);
        let retrieval = self
            .retriever
            .retrieve(&query, self.config.retrieval_top_k)
            .await;
        degraded |= retrieval.degraded;
        tracker.advance(TurnStage::KnowledgeRetrieved)?;

        let input = SynthesisInput {
            text: &resolution.text,
            profile: &lookup.profile,
            condition: &resolution.condition,
            assessment: resolution.result.as_ref(),
            assessment_declined: resolution.declined,
            passages: &retrieval.passages,
            crisis: &verdict,
            degraded,
        };
        let recommendation = self.synthesizer.synthesize(&input).await;
        tracker.advance(TurnStage::Synthesized)?;
        tracker.advance(TurnStage::Delivered)?;

        Ok(TurnOutcome::Recommendation(recommendation))
    }

    /// Apply the user's reply to the open assessment.
    fn continue_assessment(
        &self,
        state: &mut ConversationState,
        text: &str,
    ) -> Result<AssessmentStep, PipelineError> {
        let Some(session) = state.assessment.as_mut() else {
            return Err(AssessmentError::Closed {
                status: AssessmentStatus::NotOffered.to_string(),
            }
            .into());
        };

        match session.status {
            AssessmentStatus::Offered => match parse_consent(text) {
                Ok(Consent::Accept) => {
                    let question = session.consent()?;
                    info!(questionnaire = %question.questionnaire, "Assessment started");
                    Ok(AssessmentStep::Prompt(AssessmentPrompt {
                        kind: PromptKind::Question,
                        questionnaire: question.questionnaire,
                        text: question.text.clone(),
                        question: Some(question),
                    }))
                }
                Ok(Consent::Decline) => {
                    session.decline()?;
                    info!(questionnaire = ?session.questionnaire, "Assessment declined");
                    Ok(self.resolve(state))
                }
                Err(e) => {
                    debug!(error = %e, "Unclear consent, asking again");
                    let mut prompt = offer_prompt(session, PromptKind::Reprompt)?;
                    prompt.text = format!("Sorry, I didn't quite catch that. {}", prompt.text);
                    Ok(AssessmentStep::Prompt(prompt))
                }
            },
            AssessmentStatus::InProgress => match session.record_answer(text) {
                Ok(AnswerOutcome::Next(question)) => Ok(AssessmentStep::Prompt(AssessmentPrompt {
                    kind: PromptKind::Question,
                    questionnaire: question.questionnaire,
                    text: question.text.clone(),
                    question: Some(question),
                })),
                Ok(AnswerOutcome::Completed(result)) => {
                    info!(
                        questionnaire = %result.questionnaire,
                        band = %result.band,
                        escalates = result.escalates(),
                        "Assessment completed"
                    );
                    Ok(self.resolve(state))
                }
                Err(AssessmentError::InvalidAnswer { reason, .. }) => {
                    let question = session.current_question().ok_or(AssessmentError::Closed {
                        status: session.status.to_string(),
                    })?;
                    debug!(number = question.number, "Invalid answer, asking again");
                    Ok(AssessmentStep::Prompt(AssessmentPrompt {
                        kind: PromptKind::Reprompt,
                        questionnaire: question.questionnaire,
                        text: format!("I couldn't match that answer ({reason}).\n\n{}", question.text),
                        question: Some(question),
                    }))
                }
                Err(e) => Err(e.into()),
            },
            status => Err(AssessmentError::Closed {
                status: status.to_string(),
            }
            .into()),
        }
    }

    fn resolve(&self, state: &mut ConversationState) -> AssessmentStep {
        match state.resolve_active() {
            Some(session) => AssessmentStep::Resolved(session.clone()),
            None => AssessmentStep::Resolved(AssessmentSession::not_offered(ConditionKind::General)),
        }
    }

    /// Condition label for `text`; `General` if classification fails.
    /// The flag is false when the default was substituted.
    async fn classify_condition(
        &self,
        text: &str,
        profile: &UserProfile,
    ) -> (ConditionLabel, bool) {
        let timeout = self.config.classifier_timeout;
        match tokio::time::timeout(timeout, self.classifier.classify_condition(text, profile)).await {
            Ok(Ok(label)) => {
                debug!(condition = %label.kind, confidence = label.confidence, "Condition classified");
                (label, true)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Condition classifier failed, using general");
                (ConditionLabel::general(), false)
            }
            Err(_) => {
                warn!(timeout = ?timeout, "Condition classifier timed out, using general");
                (ConditionLabel::general(), false)
            }
        }
    }

    fn crisis_response(&self, verdict: CrisisVerdict) -> CrisisResponse {
        CrisisResponse {
            message: SAFETY_MESSAGE.to_string(),
            resources: self.directory.helplines(None),
            verdict,
        }
    }
}

fn offer_prompt(session: &AssessmentSession, kind: PromptKind) -> Result<AssessmentPrompt, PipelineError> {
    let questionnaire = session
        .questionnaire
        .ok_or_else(|| AssessmentError::UnknownQuestionnaire(session.condition.to_string()))?;
    let text = assessment::offer_text(session)
        .ok_or_else(|| AssessmentError::UnknownQuestionnaire(session.condition.to_string()))?;
    Ok(AssessmentPrompt {
        kind,
        questionnaire,
        text,
        question: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::assessment::QuestionnaireId;
    use crate::classifier::tests::StubClassifier;
    use crate::error::{DatabaseError, LlmError, RetrievalError};
    use crate::knowledge::{Document, EmbeddingIndex, HashingEmbedder, Ingestor, RetrievedPassage};
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason};
    use crate::resources::{FALLBACK_MESSAGE, ResourceKind};
    use crate::store::LibSqlBackend;

    /// Mock LLM returning a fixed recommendation and counting calls.
    struct MockRecommenderLlm {
        response: String,
        calls: AtomicUsize,
    }

    impl MockRecommenderLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockRecommenderLlm {
        fn model_name(&self) -> &str {
            "mock-recommender"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 100,
                output_tokens: 50,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        llm: Arc<MockRecommenderLlm>,
        db: Arc<LibSqlBackend>,
    }

    /// Profile backend that is always down.
    struct FailingProfiles;

    #[async_trait]
    impl ProfileStore for FailingProfiles {
        async fn get_profile(&self, _user_id: &str) -> Result<UserProfile, DatabaseError> {
            Err(DatabaseError::Query("profiles table locked".into()))
        }

        async fn upsert_profile(&self, _profile: &UserProfile) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("profiles table locked".into()))
        }
    }

    /// Vector store that is always down.
    struct FailingIndex;

    #[async_trait]
    impl KnowledgeIndex for FailingIndex {
        async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
            Err(RetrievalError::Unavailable("vector store offline".into()))
        }
    }

    async fn harness(classifier: StubClassifier) -> Harness {
        harness_with(classifier, None, None).await
    }

    /// Harness with optional replacements for the profile store and index.
    async fn harness_with(
        classifier: StubClassifier,
        profiles: Option<Arc<dyn ProfileStore>>,
        index_override: Option<Arc<dyn KnowledgeIndex>>,
    ) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let index = Arc::new(EmbeddingIndex::new(Arc::new(HashingEmbedder::new(256))));
        Ingestor::new(index.clone(), db.clone())
            .ingest(vec![Document {
                id: "worry".into(),
                title: Some("Managing worry".into()),
                source: None,
                text: "Slow breathing and grounding exercises ease anxiety and worry.".into(),
            }])
            .await
            .unwrap();
        let llm = Arc::new(MockRecommenderLlm::new(
            r#"{"response": "Try slow breathing for five minutes.", "severity": "routine"}"#,
        ));
        let config = PipelineConfig {
            classifier_timeout: Duration::from_millis(200),
            ..PipelineConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            OrchestratorDeps {
                classifier: Arc::new(classifier),
                rules: CrisisRules::default_rules(),
                profiles: profiles.unwrap_or_else(|| db.clone() as Arc<dyn ProfileStore>),
                sessions: db.clone(),
                index: index_override.unwrap_or(index),
                reranker: None,
                llm: llm.clone(),
                directory: Arc::new(ResourceDirectory::builtin("bt")),
            },
        );
        Harness { orchestrator, llm, db }
    }

    fn expect_prompt(outcome: TurnOutcome) -> AssessmentPrompt {
        match outcome {
            TurnOutcome::Assessment(prompt) => prompt,
            other => panic!("expected assessment prompt, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let h = harness(StubClassifier::calm(ConditionKind::General, 0.9)).await;
        let err = h.orchestrator.handle_turn("s1", "u1", "   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[tokio::test]
    async fn crisis_message_exits_before_synthesis() {
        let h = harness(StubClassifier::calm(ConditionKind::Depression, 0.9)).await;
        let outcome = h
            .orchestrator
            .handle_turn("s1", ANONYMOUS_USER_ID, "I want to end it all")
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Crisis(response) => {
                assert_eq!(response.message, SAFETY_MESSAGE);
                assert!(response.resources.iter().any(|r| r.phone.as_deref() == Some("1010")));
            }
            other => panic!("expected crisis, got {}", other.label()),
        }
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn classifier_outage_fails_closed() {
        let h = harness(StubClassifier::broken()).await;
        let outcome = h.orchestrator.handle_turn("s1", "u1", "I feel a little tired").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Crisis(_)));
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn anxiety_offer_then_decline_gives_recommendation() {
        let h = harness(StubClassifier::calm(ConditionKind::Anxiety, 0.9)).await;

        let prompt = expect_prompt(
            h.orchestrator
                .handle_turn("s1", "u1", "I've been really worried about everything lately")
                .await
                .unwrap(),
        );
        assert_eq!(prompt.kind, PromptKind::Offer);
        assert_eq!(prompt.questionnaire, QuestionnaireId::Gad7);

        let outcome = h.orchestrator.handle_turn("s1", "u1", "no").await.unwrap();
        let TurnOutcome::Recommendation(rec) = outcome else {
            panic!("expected recommendation");
        };
        assert_eq!(rec.text, "Try slow breathing for five minutes.");
        assert_eq!(rec.severity, SeverityFlag::Routine);
        assert_eq!(rec.citations.first().map(|p| p.document_id.as_str()), Some("worry"));

        let snapshot = h.orchestrator.session_snapshot("s1").await.unwrap().unwrap();
        assert!(snapshot.assessment.is_none());
        assert_eq!(snapshot.resolved[0].status, AssessmentStatus::Declined);
        assert_eq!(snapshot.turns, 2);
        assert_eq!(snapshot.last_stage, Some(TurnStage::Delivered));
    }

    #[tokio::test]
    async fn declined_questionnaire_is_not_offered_again() {
        let h = harness(StubClassifier::calm(ConditionKind::Anxiety, 0.9)).await;
        h.orchestrator.handle_turn("s1", "u1", "I'm anxious").await.unwrap();
        h.orchestrator.handle_turn("s1", "u1", "no thanks").await.unwrap();
        let outcome = h.orchestrator.handle_turn("s1", "u1", "Still anxious today").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Recommendation(_)));
    }

    #[tokio::test]
    async fn unclear_consent_reprompts() {
        let h = harness(StubClassifier::calm(ConditionKind::Anxiety, 0.9)).await;
        h.orchestrator.handle_turn("s1", "u1", "I'm anxious").await.unwrap();
        let prompt = expect_prompt(h.orchestrator.handle_turn("s1", "u1", "hmm maybe").await.unwrap());
        assert_eq!(prompt.kind, PromptKind::Reprompt);
        assert!(prompt.text.contains("yes or no"));
    }

    #[tokio::test]
    async fn severe_phq9_escalates_with_helplines() {
        let h = harness(StubClassifier::calm(ConditionKind::Depression, 0.9)).await;
        let offer = expect_prompt(
            h.orchestrator
                .handle_turn("s1", "u1", "I feel down and hopeless most days")
                .await
                .unwrap(),
        );
        assert_eq!(offer.questionnaire, QuestionnaireId::Phq9);

        let first = expect_prompt(h.orchestrator.handle_turn("s1", "u1", "yes").await.unwrap());
        assert_eq!(first.question.as_ref().map(|q| q.number), Some(1));

        let mut outcome = None;
        for _ in 0..9 {
            outcome = Some(h.orchestrator.handle_turn("s1", "u1", "3").await.unwrap());
        }
        let Some(TurnOutcome::Recommendation(rec)) = outcome else {
            panic!("expected recommendation after the last answer");
        };
        assert_eq!(rec.severity, SeverityFlag::Urgent);
        assert!(rec.resources.iter().all(|r| r.kind == ResourceKind::Helpline));
        assert!(!rec.text.contains("27"));
    }

    #[tokio::test]
    async fn invalid_answer_keeps_question() {
        let h = harness(StubClassifier::calm(ConditionKind::Anxiety, 0.9)).await;
        h.orchestrator.handle_turn("s1", "u1", "I'm anxious").await.unwrap();
        h.orchestrator.handle_turn("s1", "u1", "yes").await.unwrap();
        let prompt = expect_prompt(h.orchestrator.handle_turn("s1", "u1", "purple").await.unwrap());
        assert_eq!(prompt.kind, PromptKind::Reprompt);
        assert_eq!(prompt.question.map(|q| q.number), Some(1));

        let next = expect_prompt(h.orchestrator.handle_turn("s1", "u1", "several days").await.unwrap());
        assert_eq!(next.question.map(|q| q.number), Some(2));
    }

    #[tokio::test]
    async fn crisis_mid_assessment_keeps_session_resumable() {
        let h = harness(StubClassifier::calm(ConditionKind::Anxiety, 0.9)).await;
        h.orchestrator.handle_turn("s1", "u1", "I'm anxious").await.unwrap();
        h.orchestrator.handle_turn("s1", "u1", "yes").await.unwrap();
        h.orchestrator.handle_turn("s1", "u1", "1").await.unwrap();

        let outcome = h.orchestrator.handle_turn("s1", "u1", "I want to kill myself").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Crisis(_)));

        let snapshot = h.orchestrator.session_snapshot("s1").await.unwrap().unwrap();
        let assessment = snapshot.assessment.unwrap();
        assert_eq!(assessment.status, AssessmentStatus::InProgress);
        assert_eq!(assessment.answered, 1);
        assert_eq!(snapshot.pending_question.map(|q| q.number), Some(2));
    }

    #[tokio::test]
    async fn low_confidence_condition_skips_offer() {
        let h = harness(StubClassifier::calm(ConditionKind::Depression, 0.2)).await;
        let outcome = h.orchestrator.handle_turn("s1", "u1", "Work has been a lot").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Recommendation(_)));
    }

    #[tokio::test]
    async fn condition_failure_degrades_to_general() {
        let mut classifier = StubClassifier::calm(ConditionKind::General, 0.9);
        classifier.condition = None;
        let h = harness(classifier).await;
        let outcome = h.orchestrator.handle_turn("s1", "u1", "Rough week").await.unwrap();
        let TurnOutcome::Recommendation(rec) = outcome else {
            panic!("expected recommendation");
        };
        assert!(rec.degraded);
    }

    #[tokio::test]
    async fn profile_store_outage_still_recommends() {
        let h = harness_with(
            StubClassifier::calm(ConditionKind::General, 0.9),
            Some(Arc::new(FailingProfiles)),
            None,
        )
        .await;
        let outcome = h.orchestrator.handle_turn("s1", "u1", "Rough week at work").await.unwrap();
        let TurnOutcome::Recommendation(rec) = outcome else {
            panic!("expected recommendation");
        };
        assert!(rec.degraded);
        assert!(!rec.fallback);
        assert_eq!(rec.text, "Try slow breathing for five minutes.");
    }

    #[tokio::test]
    async fn knowledge_outage_still_recommends() {
        let h = harness_with(
            StubClassifier::calm(ConditionKind::General, 0.9),
            None,
            Some(Arc::new(FailingIndex)),
        )
        .await;
        let outcome = h.orchestrator.handle_turn("s1", "u1", "Rough week at work").await.unwrap();
        let TurnOutcome::Recommendation(rec) = outcome else {
            panic!("expected recommendation");
        };
        assert!(rec.degraded);
        assert!(rec.citations.is_empty());
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_session_state_gets_fallback_then_recovers() {
        let h = harness(StubClassifier::calm(ConditionKind::General, 0.9)).await;
        let mut session = AssessmentSession::offer(ConditionKind::Anxiety, QuestionnaireId::Gad7);
        session.questionnaire = None;
        let state = ConversationState {
            assessment: Some(session),
            ..ConversationState::default()
        };
        h.db.save_conversation("s1", "u1", &state, 0).await.unwrap();

        let outcome = h.orchestrator.handle_turn("s1", "u1", "yes").await.unwrap();
        let TurnOutcome::Recommendation(rec) = outcome else {
            panic!("expected fallback recommendation");
        };
        assert!(rec.fallback);
        assert!(rec.degraded);
        assert_eq!(rec.text, FALLBACK_MESSAGE);
        assert!(!rec.resources.is_empty());
        assert!(rec.resources.iter().all(|r| r.kind == ResourceKind::Helpline));
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);

        let snapshot = h.orchestrator.session_snapshot("s1").await.unwrap().unwrap();
        assert!(snapshot.assessment.is_none());
        assert_eq!(snapshot.turns, 1);

        let outcome = h.orchestrator.handle_turn("s1", "u1", "Hello there").await.unwrap();
        let TurnOutcome::Recommendation(rec) = outcome else {
            panic!("expected recommendation");
        };
        assert!(!rec.fallback);
        assert_eq!(rec.text, "Try slow breathing for five minutes.");
    }

    #[tokio::test]
    async fn transcript_is_recorded() {
        let h = harness(StubClassifier::calm(ConditionKind::General, 0.9)).await;
        h.orchestrator.handle_turn("s1", "u1", "Hello there").await.unwrap();
        let messages = h.db.list_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hello there");
        assert_eq!(messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn unknown_session_has_no_snapshot() {
        let h = harness(StubClassifier::calm(ConditionKind::General, 0.9)).await;
        assert!(h.orchestrator.session_snapshot("missing").await.unwrap().is_none());
    }
}
