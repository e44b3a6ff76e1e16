//! User profiles and the read-only, timeout-bounded lookup used by a turn.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::store::ProfileStore;

/// Identifier used when the caller has no account.
pub const ANONYMOUS_USER_ID: &str = "anon_user";

/// Structured user record. The pipeline only ever holds a read-only copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    /// Region code used to pick helplines (e.g. `bt`).
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub marital_status: Option<String>,
    #[serde(default)]
    pub prior_diagnoses: Vec<String>,
    #[serde(default)]
    pub ethnicity: Option<String>,
}

impl UserProfile {
    /// Empty profile carrying only an identifier.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            age: None,
            gender: None,
            region: None,
            profession: None,
            marital_status: None,
            prior_diagnoses: Vec::new(),
            ethnicity: None,
        }
    }

    /// True when no demographic attribute is known.
    pub fn is_default(&self) -> bool {
        self.name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.region.is_none()
            && self.profession.is_none()
            && self.marital_status.is_none()
            && self.prior_diagnoses.is_empty()
            && self.ethnicity.is_none()
    }

    /// Short human-readable summary for LLM prompts. Unknown fields are omitted.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(age) = self.age {
            parts.push(format!("age {age}"));
        }
        if let Some(gender) = &self.gender {
            parts.push(format!("gender {gender}"));
        }
        if let Some(region) = &self.region {
            parts.push(format!("region {region}"));
        }
        if let Some(profession) = &self.profession {
            parts.push(format!("profession {profession}"));
        }
        if let Some(status) = &self.marital_status {
            parts.push(format!("marital status {status}"));
        }
        if !self.prior_diagnoses.is_empty() {
            parts.push(format!("prior diagnoses: {}", self.prior_diagnoses.join(", ")));
        }
        if let Some(ethnicity) = &self.ethnicity {
            parts.push(format!("ethnicity {ethnicity}"));
        }
        if parts.is_empty() {
            "No profile information available.".to_string()
        } else {
            parts.join("; ")
        }
    }
}

impl Default for UserProfile {
    fn default() -> Self {
        Self::empty(ANONYMOUS_USER_ID)
    }
}

/// Result of a profile lookup for one turn.
#[derive(Debug, Clone)]
pub struct ProfileLookup {
    pub profile: UserProfile,
    /// The store had a record for this user.
    pub found: bool,
    /// The store failed or timed out and defaults were substituted.
    pub degraded: bool,
}

/// Fetches profiles with a bounded wait, never failing the turn.
pub struct ProfileLoader {
    store: Arc<dyn ProfileStore>,
    timeout: Duration,
}

impl ProfileLoader {
    pub fn new(store: Arc<dyn ProfileStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Look up `user_id`. NotFound and anonymous users get the default
    /// profile; backend errors and timeouts get it too, flagged degraded.
    pub async fn load(&self, user_id: &str) -> ProfileLookup {
        let user_id = user_id.trim();
        if user_id.is_empty() || user_id == ANONYMOUS_USER_ID {
            return ProfileLookup {
                profile: UserProfile::default(),
                found: false,
                degraded: false,
            };
        }

        match tokio::time::timeout(self.timeout, self.store.get_profile(user_id)).await {
            Ok(Ok(profile)) => {
                debug!(user_id, "Profile loaded");
                ProfileLookup {
                    profile,
                    found: true,
                    degraded: false,
                }
            }
            Ok(Err(DatabaseError::NotFound { .. })) => {
                debug!(user_id, "No profile on record, using defaults");
                ProfileLookup {
                    profile: UserProfile::empty(user_id),
                    found: false,
                    degraded: false,
                }
            }
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "Profile store failed, using defaults");
                ProfileLookup {
                    profile: UserProfile::empty(user_id),
                    found: false,
                    degraded: true,
                }
            }
            Err(_) => {
                warn!(user_id, timeout = ?self.timeout, "Profile lookup timed out, using defaults");
                ProfileLookup {
                    profile: UserProfile::empty(user_id),
                    found: false,
                    degraded: true,
                }
            }
        }
    }
}
