//! Conversation pipeline.
//!
//! Every user message flows through:
//! 1. `CrisisGate::check()`: rules, then classifier; fails closed
//! 2. `ProfileLoader::load()`: bounded profile lookup
//! 3. Condition classification and assessment offer / continuation
//! 4. `KnowledgeRetriever::retrieve()`: bounded RAG lookup
//! 5. `RecommendationSynthesizer::synthesize()`
//!
//! **A CRISIS verdict always exits with the safety message.** Nothing
//! downstream runs for that turn.

pub mod orchestrator;
pub mod sessions;
pub mod state;
pub mod types;

pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use sessions::{SessionHandle, SessionRegistry};
pub use state::{ConversationState, PendingTurn, TurnStage, TurnTracker};
pub use types::{
    AssessmentPrompt, AssessmentSummary, CrisisResponse, PromptKind, SessionSnapshot, TurnOutcome,
    UserQuery,
};
