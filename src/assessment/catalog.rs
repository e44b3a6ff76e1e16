//! Questionnaire catalog: items, answer domains, and published severity bands.

use serde::{Deserialize, Serialize};

use crate::classifier::ConditionKind;
use crate::error::AssessmentError;

/// Identifier of a standardized screening instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionnaireId {
    #[serde(rename = "PHQ-9")]
    Phq9,
    #[serde(rename = "GAD-7")]
    Gad7,
    #[serde(rename = "DAST-10")]
    Dast10,
    #[serde(rename = "AUDIT")]
    Audit,
    #[serde(rename = "MDQ")]
    Mdq,
}

impl QuestionnaireId {
    pub const ALL: [QuestionnaireId; 5] = [Self::Phq9, Self::Gad7, Self::Dast10, Self::Audit, Self::Mdq];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phq9 => "PHQ-9",
            Self::Gad7 => "GAD-7",
            Self::Dast10 => "DAST-10",
            Self::Audit => "AUDIT",
            Self::Mdq => "MDQ",
        }
    }
}

impl std::fmt::Display for QuestionnaireId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QuestionnaireId {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '_'], "-").as_str() {
            "phq-9" | "phq9" => Ok(Self::Phq9),
            "gad-7" | "gad7" => Ok(Self::Gad7),
            "dast-10" | "dast10" => Ok(Self::Dast10),
            "audit" => Ok(Self::Audit),
            "mdq" | "bipolar" => Ok(Self::Mdq),
            _ => Err(AssessmentError::UnknownQuestionnaire(s.to_string())),
        }
    }
}

/// One accepted answer for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOption {
    pub label: &'static str,
    /// Number a user may type instead of the label.
    pub value: u32,
    /// Points contributed to the raw score.
    pub score: u32,
    pub aliases: &'static [&'static str],
}

const fn opt(label: &'static str, value: u32, score: u32, aliases: &'static [&'static str]) -> AnswerOption {
    AnswerOption {
        label,
        value,
        score,
        aliases,
    }
}

/// A single questionnaire item.
#[derive(Debug, Clone, Copy)]
pub struct Item {
    pub text: &'static str,
    pub options: &'static [AnswerOption],
}

const fn item(text: &'static str, options: &'static [AnswerOption]) -> Item {
    Item { text, options }
}

impl Item {
    /// Resolve free-text input to one of this item's options.
    ///
    /// Accepts the option label, an alias, or the option's number, all
    /// case-insensitive. Forms like `"2 - more than half the days"` or `"(3)"`
    /// resolve too.
    pub fn parse_answer(&self, raw: &str) -> Option<&'static AnswerOption> {
        let cleaned = raw
            .trim()
            .trim_end_matches(['.', '!'])
            .trim_matches(['(', ')'])
            .trim()
            .to_lowercase();
        if cleaned.is_empty() {
            return None;
        }

        let by_text = |needle: &str| {
            self.options.iter().find(|o| {
                o.label.eq_ignore_ascii_case(needle) || o.aliases.iter().any(|a| a.eq_ignore_ascii_case(needle))
            })
        };

        if let Some(option) = by_text(&cleaned) {
            return Some(option);
        }
        if let Ok(n) = cleaned.parse::<u32>() {
            return self.options.iter().find(|o| o.value == n);
        }
        // "2 - more than half the days" / "3) nearly every day"
        let (head, tail) = cleaned.split_once(['-', ')', ':'])?;
        let tail = tail.trim();
        if let Some(option) = by_text(tail) {
            return Some(option);
        }
        let n = head.trim().trim_start_matches('(').parse::<u32>().ok()?;
        self.options.iter().find(|o| o.value == n)
    }

    /// Comma-separated "label (value)" list for prompts.
    pub fn options_hint(&self) -> String {
        self.options
            .iter()
            .map(|o| format!("{} ({})", o.label, o.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Inclusive score range with its interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityBand {
    pub min: u32,
    pub max: u32,
    pub label: &'static str,
}

/// Answering `trigger_item` with `trigger_value` skips ahead to `resume_at`;
/// skipped items score 0.
#[derive(Debug, Clone, Copy)]
pub struct SkipRule {
    pub trigger_item: usize,
    pub trigger_value: u32,
    pub resume_at: usize,
}

/// A complete screening instrument.
#[derive(Debug)]
pub struct Questionnaire {
    pub id: QuestionnaireId,
    pub title: &'static str,
    pub condition: ConditionKind,
    pub instructions: &'static str,
    pub items: &'static [Item],
    /// Ascending, contiguous, covering 0..=max_score. The last band is the top tier.
    pub bands: &'static [SeverityBand],
    pub skip_rule: Option<SkipRule>,
    /// Items whose non-zero answer escalates regardless of total score.
    pub critical_items: &'static [usize],
}

impl Questionnaire {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_score(&self) -> u32 {
        self.items
            .iter()
            .map(|i| i.options.iter().map(|o| o.score).max().unwrap_or(0))
            .sum()
    }

    /// Band containing `raw_score`. Scores past the last band clamp to it.
    pub fn interpret(&self, raw_score: u32) -> &SeverityBand {
        self.bands
            .iter()
            .find(|b| (b.min..=b.max).contains(&raw_score))
            .unwrap_or_else(|| &self.bands[self.bands.len() - 1])
    }

    pub fn is_top_tier(&self, band: &SeverityBand) -> bool {
        self.bands.last() == Some(band)
    }

    /// Text offered to the user before the first item.
    pub fn offer_text(&self, condition: ConditionKind) -> String {
        format!(
            "It sounds like you may be dealing with {}. Would you like to answer a short {} questionnaire ({} questions) \
so I can tailor my suggestions to you? Please reply yes or no.",
            condition.describe(),
            self.id,
            self.len()
        )
    }
}

// ── Answer domains ──────────────────────────────────────────────────

const FREQUENCY: &[AnswerOption] = &[
    opt("Not at all", 0, 0, &[]),
    opt("Several days", 1, 1, &[]),
    opt("More than half the days", 2, 2, &[]),
    opt("Nearly every day", 3, 3, &[]),
];

const YES_NO: &[AnswerOption] = &[
    opt("No", 0, 0, &["n", "false", "nope"]),
    opt("Yes", 1, 1, &["y", "true", "yeah", "yep"]),
];

const YES_NO_REVERSED: &[AnswerOption] = &[
    opt("No", 0, 1, &["n", "false", "nope"]),
    opt("Yes", 1, 0, &["y", "true", "yeah", "yep"]),
];

const AUDIT_HOW_OFTEN: &[AnswerOption] = &[
    opt("Never", 0, 0, &[]),
    opt("Monthly or less", 1, 1, &[]),
    opt("2 to 4 times a month", 2, 2, &[]),
    opt("2 to 3 times a week", 3, 3, &[]),
    opt("4 or more times a week", 4, 4, &[]),
];

const AUDIT_HOW_MANY: &[AnswerOption] = &[
    opt("1 or 2", 0, 0, &[]),
    opt("3 or 4", 1, 1, &[]),
    opt("5 or 6", 2, 2, &[]),
    opt("7, 8, or 9", 3, 3, &["7 to 9", "7-9"]),
    opt("10 or more", 4, 4, &[]),
];

const AUDIT_FREQUENCY: &[AnswerOption] = &[
    opt("Never", 0, 0, &[]),
    opt("Less than monthly", 1, 1, &[]),
    opt("Monthly", 2, 2, &[]),
    opt("Weekly", 3, 3, &[]),
    opt("Daily or almost daily", 4, 4, &["daily"]),
];

const AUDIT_TRIAD: &[AnswerOption] = &[
    opt("No", 0, 0, &["n"]),
    opt("Yes, but not in the last year", 2, 2, &["yes but not in the last year"]),
    opt("Yes, during the last year", 4, 4, &["yes during the last year"]),
];

// ── Instruments ─────────────────────────────────────────────────────

pub static PHQ9: Questionnaire = Questionnaire {
    id: QuestionnaireId::Phq9,
    title: "Patient Health Questionnaire",
    condition: ConditionKind::Depression,
    instructions: "Over the last 2 weeks, how often have you been bothered by the following problem?",
    items: &[
        item("Little interest or pleasure in doing things", FREQUENCY),
        item("Feeling down, depressed, or hopeless", FREQUENCY),
        item("Trouble falling or staying asleep, or sleeping too much", FREQUENCY),
        item("Feeling tired or having little energy", FREQUENCY),
        item("Poor appetite or overeating", FREQUENCY),
        item(
            "Feeling bad about yourself, or that you are a failure or have let yourself or your family down",
            FREQUENCY,
        ),
        item("Trouble concentrating on things, such as reading or watching television", FREQUENCY),
        item(
            "Moving or speaking so slowly that other people could have noticed, or being so fidgety or restless that you have been moving around a lot more than usual",
            FREQUENCY,
        ),
        item(
            "Thoughts that you would be better off dead, or of hurting yourself in some way",
            FREQUENCY,
        ),
    ],
    bands: &[
        SeverityBand { min: 0, max: 4, label: "minimal" },
        SeverityBand { min: 5, max: 9, label: "mild" },
        SeverityBand { min: 10, max: 14, label: "moderate" },
        SeverityBand { min: 15, max: 19, label: "moderately severe" },
        SeverityBand { min: 20, max: 27, label: "severe" },
    ],
    skip_rule: None,
    critical_items: &[8],
};

pub static GAD7: Questionnaire = Questionnaire {
    id: QuestionnaireId::Gad7,
    title: "Generalized Anxiety Disorder scale",
    condition: ConditionKind::Anxiety,
    instructions: "Over the last 2 weeks, how often have you been bothered by the following problem?",
    items: &[
        item("Feeling nervous, anxious, or on edge", FREQUENCY),
        item("Not being able to stop or control worrying", FREQUENCY),
        item("Worrying too much about different things", FREQUENCY),
        item("Trouble relaxing", FREQUENCY),
        item("Being so restless that it is hard to sit still", FREQUENCY),
        item("Becoming easily annoyed or irritable", FREQUENCY),
        item("Feeling afraid, as if something awful might happen", FREQUENCY),
    ],
    bands: &[
        SeverityBand { min: 0, max: 4, label: "minimal" },
        SeverityBand { min: 5, max: 9, label: "mild" },
        SeverityBand { min: 10, max: 14, label: "moderate" },
        SeverityBand { min: 15, max: 21, label: "severe" },
    ],
    skip_rule: None,
    critical_items: &[],
};

pub static DAST10: Questionnaire = Questionnaire {
    id: QuestionnaireId::Dast10,
    title: "Drug Abuse Screening Test",
    condition: ConditionKind::SubstanceUse,
    instructions: "These questions are about drug use (not including alcohol) in the past 12 months. Answer yes or no.",
    items: &[
        item("Have you used drugs other than those required for medical reasons?", YES_NO),
        item("Do you use more than one drug at a time?", YES_NO),
        item("Are you always able to stop using drugs when you want to?", YES_NO_REVERSED),
        item("Have you had blackouts or flashbacks as a result of drug use?", YES_NO),
        item("Do you ever feel bad or guilty about your drug use?", YES_NO),
        item("Does your spouse or family ever complain about your involvement with drugs?", YES_NO),
        item("Have you neglected your family because of your use of drugs?", YES_NO),
        item("Have you engaged in illegal activities in order to obtain drugs?", YES_NO),
        item("Have you ever experienced withdrawal symptoms when you stopped taking drugs?", YES_NO),
        item(
            "Have you had medical problems as a result of your drug use (memory loss, hepatitis, convulsions, bleeding)?",
            YES_NO,
        ),
    ],
    bands: &[
        SeverityBand { min: 0, max: 0, label: "no problems reported" },
        SeverityBand { min: 1, max: 2, label: "low level" },
        SeverityBand { min: 3, max: 5, label: "moderate level" },
        SeverityBand { min: 6, max: 8, label: "substantial level" },
        SeverityBand { min: 9, max: 10, label: "severe level" },
    ],
    skip_rule: None,
    critical_items: &[],
};

pub static AUDIT: Questionnaire = Questionnaire {
    id: QuestionnaireId::Audit,
    title: "Alcohol Use Disorders Identification Test",
    condition: ConditionKind::AlcoholUse,
    instructions: "Please answer based on your alcohol use over the past 12 months.",
    items: &[
        item("How often do you have a drink containing alcohol?", AUDIT_HOW_OFTEN),
        item(
            "How many drinks containing alcohol do you have on a typical day when you are drinking?",
            AUDIT_HOW_MANY,
        ),
        item("How often do you have six or more drinks on one occasion?", AUDIT_FREQUENCY),
        item(
            "How often during the last year have you found that you were not able to stop drinking once you had started?",
            AUDIT_FREQUENCY,
        ),
        item(
            "How often during the last year have you failed to do what was normally expected of you because of drinking?",
            AUDIT_FREQUENCY,
        ),
        item(
            "How often during the last year have you needed a first drink in the morning to get yourself going after a heavy drinking session?",
            AUDIT_FREQUENCY,
        ),
        item(
            "How often during the last year have you had a feeling of guilt or remorse after drinking?",
            AUDIT_FREQUENCY,
        ),
        item(
            "How often during the last year have you been unable to remember what happened the night before because of your drinking?",
            AUDIT_FREQUENCY,
        ),
        item("Have you or someone else been injured because of your drinking?", AUDIT_TRIAD),
        item(
            "Has a relative, friend, doctor, or other health worker been concerned about your drinking or suggested you cut down?",
            AUDIT_TRIAD,
        ),
    ],
    bands: &[
        SeverityBand { min: 0, max: 7, label: "low risk" },
        SeverityBand { min: 8, max: 15, label: "hazardous" },
        SeverityBand { min: 16, max: 19, label: "harmful" },
        SeverityBand { min: 20, max: 40, label: "possible dependence" },
    ],
    skip_rule: Some(SkipRule {
        trigger_item: 0,
        trigger_value: 0,
        resume_at: 8,
    }),
    critical_items: &[],
};

pub static MDQ: Questionnaire = Questionnaire {
    id: QuestionnaireId::Mdq,
    title: "Mood Disorder Questionnaire",
    condition: ConditionKind::Bipolar,
    instructions: "Has there ever been a period of time when you were not your usual self and... Answer yes or no.",
    items: &[
        item(
            "You felt so good or so hyper that other people thought you were not your normal self, or you got into trouble?",
            YES_NO,
        ),
        item("You were so irritable that you shouted at people or started fights or arguments?", YES_NO),
        item("You felt much more self-confident than usual?", YES_NO),
        item("You got much less sleep than usual and found you didn't really miss it?", YES_NO),
        item("You were much more talkative or spoke much faster than usual?", YES_NO),
        item("Thoughts raced through your head or you couldn't slow your mind down?", YES_NO),
        item("You were so easily distracted that you had trouble concentrating or staying on track?", YES_NO),
        item("You had much more energy than usual?", YES_NO),
        item("You were much more active or did many more things than usual?", YES_NO),
        item("You were much more social or outgoing than usual?", YES_NO),
        item("You were much more interested in sex than usual?", YES_NO),
        item("You did things that were unusual for you, or that others thought were excessive, foolish, or risky?", YES_NO),
        item("Spending money got you or your family into trouble?", YES_NO),
    ],
    bands: &[
        SeverityBand { min: 0, max: 6, label: "negative screen" },
        SeverityBand { min: 7, max: 13, label: "positive screen" },
    ],
    skip_rule: None,
    critical_items: &[],
};

/// Look up an instrument by id.
pub fn get(id: QuestionnaireId) -> &'static Questionnaire {
    match id {
        QuestionnaireId::Phq9 => &PHQ9,
        QuestionnaireId::Gad7 => &GAD7,
        QuestionnaireId::Dast10 => &DAST10,
        QuestionnaireId::Audit => &AUDIT,
        QuestionnaireId::Mdq => &MDQ,
    }
}

/// Instrument offered for a condition, if any.
pub fn for_condition(condition: ConditionKind) -> Option<&'static Questionnaire> {
    match condition {
        ConditionKind::Depression => Some(&PHQ9),
        ConditionKind::Anxiety => Some(&GAD7),
        ConditionKind::SubstanceUse => Some(&DAST10),
        ConditionKind::AlcoholUse => Some(&AUDIT),
        ConditionKind::Bipolar => Some(&MDQ),
        ConditionKind::General => None,
    }
}
