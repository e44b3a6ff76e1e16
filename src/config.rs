//! Configuration types.
//!
//! Built once at startup and handed to the orchestrator; nothing reads the
//! environment after that.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Tunables for a single pipeline turn.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout for the crisis and condition classifier calls.
    pub classifier_timeout: Duration,
    /// Timeout for the profile store lookup.
    pub profile_timeout: Duration,
    /// Timeout for knowledge retrieval.
    pub retrieval_timeout: Duration,
    /// Timeout for each synthesis attempt.
    pub synthesis_timeout: Duration,
    /// Upper bound on retrieved passages per turn.
    pub retrieval_top_k: usize,
    /// Rerank retrieved passages by query-term coverage.
    pub rerank: bool,
    /// A NO_CRISIS verdict below this confidence is treated as ambiguous.
    pub crisis_min_confidence: f32,
    /// Minimum condition confidence before a questionnaire is offered.
    pub assessment_offer_threshold: f32,
    /// How many reduced-context retries synthesis gets before the fallback.
    pub synthesis_retries: u32,
    /// Helpline region used when the profile has none (and for crisis exits).
    pub default_region: String,
    /// Temperature for classification calls.
    pub classifier_temperature: f32,
    /// Temperature for recommendation generation.
    pub synthesis_temperature: f32,
    /// Max tokens for recommendation generation.
    pub synthesis_max_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_secs(20),
            profile_timeout: Duration::from_secs(5),
            retrieval_timeout: Duration::from_secs(10),
            synthesis_timeout: Duration::from_secs(45),
            retrieval_top_k: 3,
            rerank: true,
            crisis_min_confidence: 0.5,
            assessment_offer_threshold: 0.5,
            synthesis_retries: 1,
            default_region: "bt".to_string(),
            classifier_temperature: 0.0,
            synthesis_temperature: 0.4,
            synthesis_max_tokens: 1024,
        }
    }
}

impl PipelineConfig {
    /// Load overrides from `CARE_ASSIST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("CARE_ASSIST_STAGE_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "CARE_ASSIST_STAGE_TIMEOUT_SECS".into(),
                    message: "must be greater than zero".into(),
                });
            }
            let timeout = Duration::from_secs(secs);
            config.classifier_timeout = timeout;
            config.profile_timeout = timeout;
            config.retrieval_timeout = timeout;
        }
        if let Some(secs) = env_parse::<u64>("CARE_ASSIST_SYNTHESIS_TIMEOUT_SECS")? {
            config.synthesis_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(top_k) = env_parse::<usize>("CARE_ASSIST_TOP_K")? {
            config.retrieval_top_k = top_k;
        }
        if let Some(rerank) = env_parse::<bool>("CARE_ASSIST_RERANK")? {
            config.rerank = rerank;
        }
        if let Some(threshold) = env_parse::<f32>("CARE_ASSIST_CRISIS_MIN_CONFIDENCE")? {
            config.crisis_min_confidence = unit_interval("CARE_ASSIST_CRISIS_MIN_CONFIDENCE", threshold)?;
        }
        if let Some(threshold) = env_parse::<f32>("CARE_ASSIST_OFFER_THRESHOLD")? {
            config.assessment_offer_threshold = unit_interval("CARE_ASSIST_OFFER_THRESHOLD", threshold)?;
        }
        if let Some(retries) = env_parse::<u32>("CARE_ASSIST_SYNTHESIS_RETRIES")? {
            config.synthesis_retries = retries;
        }
        if let Ok(region) = std::env::var("CARE_ASSIST_REGION")
            && !region.trim().is_empty()
        {
            config.default_region = region.trim().to_lowercase();
        }

        Ok(config)
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Directory of `.md` / `.txt` documents ingested at startup.
    pub knowledge_dir: Option<PathBuf>,
    /// Directory for daily-rotated log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/care-assist.db"),
            knowledge_dir: None,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(port) = env_parse::<u16>("CARE_ASSIST_PORT")? {
            config.port = port;
        }
        if let Ok(path) = std::env::var("CARE_ASSIST_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        config.knowledge_dir = std::env::var("CARE_ASSIST_KNOWLEDGE_DIR").ok().map(PathBuf::from);
        config.log_dir = std::env::var("CARE_ASSIST_LOG_DIR").ok().map(PathBuf::from);
        Ok(config)
    }
}

/// Parse an optional environment variable, reporting garbage as a config error.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        _ => Ok(None),
    }
}

fn unit_interval(key: &str, value: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value} is outside 0.0..=1.0"),
        })
    }
}
