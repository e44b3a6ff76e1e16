//! Query refinement before similarity search.

use std::sync::LazyLock;

use regex::Regex;

use crate::classifier::ConditionKind;

/// Informal spellings rewritten before expansion.
static NORMALIZATIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bim\b", "i'm"),
        (r"\bu\b", "you"),
        (r"\bur\b", "your"),
        (r"\bdepressed\b", "depression"),
        (r"\banxious\b", "anxiety"),
        (r"\bstressed\b", "stress"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

/// Terms appended when the key term appears.
static EXPANSIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("depression", "mood sadness hopelessness"),
        ("anxiety", "worry nervousness panic"),
        ("stress", "pressure tension burnout"),
        ("therapy", "counseling psychotherapy CBT DBT"),
        ("suicide", "self-harm hopelessness crisis"),
        ("support", "group counseling help"),
    ]
    .into_iter()
    .map(|(term, expansion)| (Regex::new(&format!(r"\b{term}\b")).unwrap(), expansion))
    .collect()
});

/// Lower-case and rewrite common abbreviations.
pub fn normalize_query(text: &str) -> String {
    let mut normalized = text.trim().to_lowercase();
    for (regex, replacement) in NORMALIZATIONS.iter() {
        normalized = regex.replace_all(&normalized, *replacement).into_owned();
    }
    normalized
}

/// Normalize, expand with related terms, and tag with the condition.
pub fn refine_query(text: &str, condition: ConditionKind) -> String {
    let mut refined = normalize_query(text);
    let expansions: Vec<&str> = EXPANSIONS
        .iter()
        .filter(|(regex, _)| regex.is_match(&refined))
        .map(|(_, expansion)| *expansion)
        .collect();
    for expansion in expansions {
        refined.push(' ');
        refined.push_str(expansion);
    }
    if condition != ConditionKind::General {
        refined.push_str(&format!(" Condition: {condition}"));
    }
    refined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_abbreviations() {
        assert_eq!(normalize_query("Im so depressed, u know"), "i'm so depression, you know");
        assert_eq!(normalize_query("ur right"), "your right");
        // Word boundaries only.
        assert_eq!(normalize_query("umbrella"), "umbrella");
    }

    #[test]
    fn expands_and_tags_condition() {
        let refined = refine_query("I'm anxious about therapy", ConditionKind::Anxiety);
        assert!(refined.starts_with("i'm anxiety about therapy"));
        assert!(refined.contains("worry nervousness panic"));
        assert!(refined.contains("counseling psychotherapy CBT DBT"));
        assert!(refined.ends_with("Condition: anxiety"));
    }

    #[test]
    fn general_condition_not_tagged() {
        assert_eq!(refine_query("hello there", ConditionKind::General), "hello there");
    }
}
