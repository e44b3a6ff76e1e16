//! Care Assist: a supportive mental-health conversation pipeline.
//!
//! Every message passes a crisis gate first. Non-crisis turns may run a
//! standard questionnaire, then get a recommendation grounded in a local
//! knowledge corpus.

pub mod api;
pub mod assessment;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod profile;
pub mod resources;
pub mod store;
pub mod synthesis;
