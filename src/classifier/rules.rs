//! Pre-classifier crisis rules.
//!
//! Explicit statements of suicidal intent, self-harm, or immediate danger
//! match here and skip the classifier entirely. Rules only ever escalate: a
//! message that matches nothing still goes to the classifier.

use regex::Regex;
use tracing::debug;

/// A single crisis pattern.
#[derive(Debug, Clone)]
pub struct CrisisRule {
    /// Human-readable name, logged on match.
    pub name: String,
    pub regex: Regex,
}

/// Regex fast path for the crisis check.
pub struct CrisisRules {
    rules: Vec<CrisisRule>,
}

impl CrisisRules {
    /// Rule set covering common English phrasings.
    pub fn default_rules() -> Self {
        let rules = vec![
            CrisisRule {
                name: "suicidal ideation".into(),
                regex: Regex::new(
                    r"(?i)\b(suicid(e|al)|kill(ing)? my ?self|take my (own )?life|end(ing)? my (own )?life)\b",
                )
                .unwrap(),
            },
            CrisisRule {
                name: "ending it".into(),
                regex: Regex::new(r"(?i)\b(end it all|end everything|better off dead|no reason to live)\b").unwrap(),
            },
            CrisisRule {
                name: "not wanting to live".into(),
                regex: Regex::new(
                    r"(?i)\b(do ?not|don'?t|no longer) want to (live|be alive|exist|wake up)\b",
                )
                .unwrap(),
            },
            CrisisRule {
                name: "self-harm".into(),
                regex: Regex::new(r"(?i)\b(self[- ]?harm(ing)?|hurt(ing)? my ?self|cut(ting)? my ?self)\b").unwrap(),
            },
            CrisisRule {
                name: "immediate danger".into(),
                regex: Regex::new(
                    r"(?i)\b(overdos(e|ing)|jump(ing)? off|hang(ing)? my ?self|wrote (a|my) (suicide )?note)\b",
                )
                .unwrap(),
            },
        ];
        Self { rules }
    }

    /// A rule set that never matches.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a custom rule.
    pub fn add_rule(&mut self, name: &str, pattern: &str) -> Result<(), regex::Error> {
        self.rules.push(CrisisRule {
            name: name.into(),
            regex: Regex::new(pattern)?,
        });
        Ok(())
    }

    /// Name of the first matching rule, if any.
    pub fn evaluate(&self, text: &str) -> Option<&str> {
        let rule = self.rules.iter().find(|r| r.regex.is_match(text))?;
        debug!(rule = %rule.name, "Message matched crisis rule");
        Some(&rule.name)
    }
}
