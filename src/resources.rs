//! Static crisis-helpline and support-organisation directory, by region.
//!
//! The directory is loaded once at startup and held in memory so the crisis
//! path never waits on I/O.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::ResourceStore;

/// Region used when nothing more specific is known.
pub const INTERNATIONAL_REGION: &str = "intl";

/// Fixed text delivered on every crisis exit.
pub const SAFETY_MESSAGE: &str = "I'm really sorry you're going through this. You don't have to face it alone, \
and your safety matters most right now. Please reach out to one of the helplines below, \
or contact emergency services if you are in immediate danger. If you can, let someone you trust know how you are feeling.";

/// Shown when a non-crisis turn could not produce a recommendation at all.
pub const FALLBACK_MESSAGE: &str = "Thank you for sharing this with me. I wasn't able to put together detailed suggestions \
right now, but what you're feeling matters. Talking with someone you trust or a counsellor can really help, \
and the support lines below are there whenever you need them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Helpline,
    Organization,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Helpline => write!(f, "helpline"),
            Self::Organization => write!(f, "organization"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helpline" => Ok(Self::Helpline),
            "organization" | "organisation" => Ok(Self::Organization),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}

/// A helpline or support organisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub hours: Option<String>,
    pub description: String,
    pub kind: ResourceKind,
    pub region: String,
}

impl Resource {
    fn entry(
        region: &str,
        kind: ResourceKind,
        name: &str,
        phone: Option<&str>,
        hours: Option<&str>,
        website: Option<&str>,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            phone: phone.map(str::to_string),
            website: website.map(str::to_string),
            hours: hours.map(str::to_string),
            description: description.to_string(),
            kind,
            region: region.to_string(),
        }
    }

    /// One-line rendering for plain-text channels.
    pub fn display_line(&self) -> String {
        let mut line = self.name.clone();
        if let Some(phone) = &self.phone {
            line.push_str(&format!(": {phone}"));
        }
        if let Some(hours) = &self.hours {
            line.push_str(&format!(" ({hours})"));
        }
        if let Some(website) = &self.website {
            line.push_str(&format!(" {website}"));
        }
        line
    }
}

/// Built-in directory entries, used to seed an empty store.
pub fn builtin_resources() -> Vec<Resource> {
    use ResourceKind::{Helpline, Organization};
    vec![
        Resource::entry(
            "bt",
            Helpline,
            "Primary Crisis Hotline",
            Some("1010"),
            Some("24/7"),
            Some("https://bhutanyouth.org"),
            "Support for mental health issues and suicide prevention, run with the Ministry of Health.",
        ),
        Resource::entry(
            "bt",
            Helpline,
            "Emergency Line",
            Some("112"),
            Some("24/7"),
            Some("moh.gov.bt"),
            "National emergency number for immediate assistance.",
        ),
        Resource::entry(
            "bt",
            Helpline,
            "Mental Health Support Line",
            Some("1098"),
            Some("24/7"),
            None,
            "National helpline for children and vulnerable groups.",
        ),
        Resource::entry(
            "bt",
            Helpline,
            "Sherig Counselling Services (MoE)",
            Some("17861294"),
            Some("Weekdays 9am-5pm"),
            Some("https://sites.google.com/moe.gov.bt/sherigcounsellingservices"),
            "Counselling helpline for students and youth, staffed by trained school counsellors.",
        ),
        Resource::entry(
            "bt",
            Organization,
            "PEMA (Psychosocial Education and Mental Health Awareness)",
            Some("1010"),
            None,
            Some("https://thepema.gov.bt/"),
            "National agency for mental health services: counselling, crisis intervention, rehabilitation and walk-in support.",
        ),
        Resource::entry(
            "bt",
            Organization,
            "RENEW (Respect, Educate, Nurture, and Empower Women)",
            Some("+975 2 332 159"),
            None,
            Some("https://renew.org.bt/"),
            "Non-profit organisation supporting women.",
        ),
        Resource::entry(
            "bt",
            Organization,
            "Jigme Dorji Wangchuck National Referral Hospital",
            Some("+975 17 32 24 96"),
            None,
            Some("https://jdwnrh.gov.bt/"),
            "Psychiatric ward providing specialised mental health services.",
        ),
        Resource::entry(
            "bt",
            Organization,
            "Bhutan Board for Certified Counselors (BBCC)",
            None,
            None,
            Some("https://www.counselingbhutan.com"),
            "Accredits and supports professional counsellors in Thimphu and across Bhutan.",
        ),
        Resource::entry(
            "bt",
            Organization,
            "Institute of Traditional Medicine Services",
            None,
            None,
            None,
            "Traditional Bhutanese treatments, including mental and spiritual healing (Langjophakha, Thimphu).",
        ),
        Resource::entry(
            INTERNATIONAL_REGION,
            Helpline,
            "Find A Helpline",
            None,
            Some("24/7"),
            Some("https://findahelpline.com"),
            "Directory of free, confidential crisis lines in over 130 countries.",
        ),
        Resource::entry(
            INTERNATIONAL_REGION,
            Organization,
            "Befrienders Worldwide",
            None,
            None,
            Some("https://www.befrienders.org"),
            "Emotional support centres worldwide for people in distress.",
        ),
    ]
}

/// In-memory view of the directory, keyed by lower-case region code.
#[derive(Debug, Clone)]
pub struct ResourceDirectory {
    by_region: HashMap<String, Vec<Resource>>,
    default_region: String,
}

impl ResourceDirectory {
    pub fn new(resources: Vec<Resource>, default_region: &str) -> Self {
        let mut by_region: HashMap<String, Vec<Resource>> = HashMap::new();
        for resource in resources {
            by_region
                .entry(resource.region.to_lowercase())
                .or_default()
                .push(resource);
        }
        Self {
            by_region,
            default_region: default_region.to_lowercase(),
        }
    }

    /// Directory of built-in entries only.
    pub fn builtin(default_region: &str) -> Self {
        Self::new(builtin_resources(), default_region)
    }

    /// Load from the store, seeding it with the built-in entries when empty.
    pub async fn load(store: &dyn ResourceStore, default_region: &str) -> Result<Self, DatabaseError> {
        let mut resources = store.list_resources().await?;
        if resources.is_empty() {
            let seed = builtin_resources();
            for resource in &seed {
                store.insert_resource(resource).await?;
            }
            info!(count = seed.len(), "Seeded resource directory");
            resources = seed;
        }
        Ok(Self::new(resources, default_region))
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// All entries for `region`, falling back to the default region and then
    /// to the international list. Never empty while any entry exists.
    pub fn for_region(&self, region: Option<&str>) -> Vec<Resource> {
        self.first_match(region, |_| true)
            .unwrap_or_else(|| self.by_region.values().flatten().cloned().collect())
    }

    /// Helpline entries only, for crisis exits and urgent recommendations.
    ///
    /// A region that lists only organisations falls through to the next
    /// region in the chain, so helplines are returned whenever any exist.
    pub fn helplines(&self, region: Option<&str>) -> Vec<Resource> {
        self.first_match(region, |r| r.kind == ResourceKind::Helpline)
            .unwrap_or_else(|| {
                let any: Vec<Resource> = self
                    .by_region
                    .values()
                    .flatten()
                    .filter(|r| r.kind == ResourceKind::Helpline)
                    .cloned()
                    .collect();
                if any.is_empty() { self.for_region(region) } else { any }
            })
    }

    /// First region in the region → default → international chain with a
    /// matching entry.
    fn first_match(&self, region: Option<&str>, keep: impl Fn(&Resource) -> bool) -> Option<Vec<Resource>> {
        let candidates = [
            region.map(str::to_lowercase),
            Some(self.default_region.clone()),
            Some(INTERNATIONAL_REGION.to_string()),
        ];
        candidates.into_iter().flatten().find_map(|key| {
            let list: Vec<Resource> = self
                .by_region
                .get(&key)?
                .iter()
                .filter(|r| keep(r))
                .cloned()
                .collect();
            (!list.is_empty()).then_some(list)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_bhutan_helplines_present() {
        let dir = ResourceDirectory::builtin("bt");
        let helplines = dir.helplines(Some("bt"));
        assert!(helplines.iter().any(|r| r.phone.as_deref() == Some("1010")));
        assert!(helplines.iter().any(|r| r.phone.as_deref() == Some("112")));
        assert!(helplines.iter().all(|r| r.kind == ResourceKind::Helpline));
    }

    #[test]
    fn unknown_region_falls_back_to_default() {
        let dir = ResourceDirectory::builtin("bt");
        let list = dir.for_region(Some("zz"));
        assert!(!list.is_empty());
        assert!(list.iter().all(|r| r.region == "bt"));
    }

    #[test]
    fn missing_default_falls_back_to_international() {
        let dir = ResourceDirectory::builtin("nowhere");
        let list = dir.for_region(None);
        assert!(list.iter().all(|r| r.region == INTERNATIONAL_REGION));
    }

    #[test]
    fn organisation_only_region_falls_back_to_default_helplines() {
        let mut resources = builtin_resources();
        resources.push(Resource {
            name: "Local Counselling Centre".into(),
            phone: None,
            website: None,
            hours: None,
            description: "Walk-in counselling.".into(),
            kind: ResourceKind::Organization,
            region: "xx".into(),
        });
        let dir = ResourceDirectory::new(resources, "bt");

        assert!(dir.for_region(Some("xx")).iter().all(|r| r.region == "xx"));
        let helplines = dir.helplines(Some("xx"));
        assert!(!helplines.is_empty());
        assert!(helplines.iter().all(|r| r.kind == ResourceKind::Helpline && r.region == "bt"));
    }

    #[test]
    fn region_lookup_is_case_insensitive() {
        let dir = ResourceDirectory::builtin("intl");
        assert!(dir.for_region(Some("BT")).iter().all(|r| r.region == "bt"));
    }

    #[test]
    fn display_line_includes_phone_and_hours() {
        let r = &builtin_resources()[0];
        assert_eq!(
            r.display_line(),
            "Primary Crisis Hotline: 1010 (24/7) https://bhutanyouth.org"
        );
    }
}
