//! Crisis and policy classifiers
//!
//! Both classifiers are pure, in-memory functions over message text. Terms
//! are matched case-insensitively on word boundaries after punctuation is
//! folded to whitespace, so "Self-Harm!" matches the term `self harm` but
//! "therapist" does not match `the rapist`.

use serde::Serialize;

use crate::config::{SafetyConfig, SeverityThresholds};
use crate::data::{CrisisSeverity, PolicyCategory, SafetyColumns};

/// Result of the crisis classifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisDetection {
    pub detected: bool,
    /// Distinct matched keywords, in configuration order
    pub keywords: Vec<String>,
    pub severity: Option<CrisisSeverity>,
}

impl CrisisDetection {
    pub fn is_critical(&self) -> bool {
        self.severity == Some(CrisisSeverity::Critical)
    }
}

/// Result of the policy classifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVerdict {
    pub categories: Vec<PolicyCategory>,
    pub terms: Vec<String>,
}

impl PolicyVerdict {
    pub fn is_flagged(&self) -> bool {
        !self.categories.is_empty()
    }
}

/// Combined verdict stored on a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assessment {
    pub crisis: CrisisDetection,
    pub policy: PolicyVerdict,
}

impl Assessment {
    pub fn columns(&self) -> SafetyColumns {
        SafetyColumns {
            crisis_detected: self.crisis.detected,
            crisis_keywords: self.crisis.keywords.clone(),
            crisis_severity: self.crisis.severity,
            policy_flags: self
                .policy
                .categories
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Term {
    original: String,
    /// Normalized and padded with spaces on both sides
    needle: String,
}

fn compile_terms(terms: &[String]) -> Vec<Term> {
    let mut compiled: Vec<Term> = Vec::new();
    for term in terms {
        let normalized = normalize(term);
        if normalized.trim().is_empty() || compiled.iter().any(|t| t.needle == normalized) {
            continue;
        }
        compiled.push(Term {
            original: term.trim().to_string(),
            needle: normalized,
        });
    }
    compiled
}

/// Lowercase, fold punctuation to spaces, collapse runs of whitespace and
/// pad both ends so a term can be matched as `" term "`. Typographic
/// apostrophes count as `'`.
fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\'' => '\'',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();

    let mut normalized = String::with_capacity(folded.len() + 2);
    normalized.push(' ');
    for word in folded.split_whitespace() {
        normalized.push_str(word);
        normalized.push(' ');
    }
    normalized
}

fn matches<'a>(haystack: &str, terms: &'a [Term]) -> Vec<&'a str> {
    terms
        .iter()
        .filter(|term| haystack.contains(&term.needle))
        .map(|term| term.original.as_str())
        .collect()
}

/// Map a distinct-keyword count to a severity
pub fn severity_for(count: usize, thresholds: &SeverityThresholds) -> Option<CrisisSeverity> {
    match count {
        0 => None,
        n if n >= thresholds.critical_at => Some(CrisisSeverity::Critical),
        n if n >= thresholds.high_at => Some(CrisisSeverity::High),
        n if n >= thresholds.medium_at => Some(CrisisSeverity::Medium),
        _ => Some(CrisisSeverity::Low),
    }
}

/// Crisis and policy classifier built once from configuration
#[derive(Debug, Clone)]
pub struct SafetyClassifier {
    crisis_terms: Vec<Term>,
    policy_terms: Vec<(PolicyCategory, Vec<Term>)>,
    thresholds: SeverityThresholds,
}

impl SafetyClassifier {
    pub fn new(config: &SafetyConfig) -> Self {
        let policy = &config.policy_terms;
        Self {
            crisis_terms: compile_terms(&config.crisis_keywords),
            policy_terms: vec![
                (PolicyCategory::Harassment, compile_terms(&policy.harassment)),
                (PolicyCategory::HateSpeech, compile_terms(&policy.hate_speech)),
                (PolicyCategory::Profanity, compile_terms(&policy.profanity)),
            ],
            thresholds: config.thresholds,
        }
    }

    /// Classify self-harm risk language
    ///
    /// Absent or empty text is "no detection", never an error.
    pub fn classify(&self, text: Option<&str>) -> CrisisDetection {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return CrisisDetection::default();
        };

        let haystack = normalize(text);
        let keywords: Vec<String> = matches(&haystack, &self.crisis_terms)
            .into_iter()
            .map(String::from)
            .collect();
        let severity = severity_for(keywords.len(), &self.thresholds);

        CrisisDetection {
            detected: severity.is_some(),
            keywords,
            severity,
        }
    }

    /// Flag general policy-violating content
    pub fn check_policy(&self, text: Option<&str>) -> PolicyVerdict {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return PolicyVerdict::default();
        };

        let haystack = normalize(text);
        let mut verdict = PolicyVerdict::default();
        for (category, terms) in &self.policy_terms {
            let hits = matches(&haystack, terms);
            if !hits.is_empty() {
                verdict.categories.push(*category);
                verdict.terms.extend(hits.into_iter().map(String::from));
            }
        }
        verdict
    }

    /// Run both classifiers
    pub fn assess(&self, text: Option<&str>) -> Assessment {
        Assessment {
            crisis: self.classify(text),
            policy: self.check_policy(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyTermsConfig;

    fn classifier() -> SafetyClassifier {
        SafetyClassifier::new(&SafetyConfig::default())
    }

    #[test]
    fn no_keywords_means_no_detection() {
        let detection = classifier().classify(Some("see you at the meeting tomorrow"));
        assert!(!detection.detected);
        assert!(detection.keywords.is_empty());
        assert_eq!(detection.severity, None);
    }

    #[test]
    fn absent_or_blank_text_is_not_an_error() {
        let classifier = classifier();
        assert_eq!(classifier.classify(None), CrisisDetection::default());
        assert_eq!(classifier.classify(Some("   ")), CrisisDetection::default());
        assert!(!classifier.check_policy(None).is_flagged());
    }

    #[test]
    fn one_keyword_is_medium() {
        let detection = classifier().classify(Some("Some days I feel suicidal."));
        assert!(detection.detected);
        assert_eq!(detection.keywords, vec!["suicidal".to_string()]);
        assert_eq!(detection.severity, Some(CrisisSeverity::Medium));
    }

    #[test]
    fn two_keywords_is_high() {
        let detection = classifier().classify(Some("I want to die, I keep thinking about suicide"));
        assert_eq!(detection.keywords.len(), 2);
        assert_eq!(detection.severity, Some(CrisisSeverity::High));
    }

    #[test]
    fn three_distinct_keywords_is_critical() {
        let detection = classifier()
            .classify(Some("I want to die. I might overdose and end it all tonight"));
        assert_eq!(detection.keywords.len(), 3);
        assert_eq!(detection.severity, Some(CrisisSeverity::Critical));
        assert!(detection.is_critical());
    }

    #[test]
    fn repeated_keyword_counts_once() {
        let detection = classifier().classify(Some("suicide suicide SUICIDE"));
        assert_eq!(detection.keywords, vec!["suicide".to_string()]);
        assert_eq!(detection.severity, Some(CrisisSeverity::Medium));
    }

    #[test]
    fn punctuation_and_case_are_folded() {
        let detection = classifier().classify(Some("thinking about SELF-HARM again"));
        assert_eq!(detection.keywords, vec!["self harm".to_string()]);
    }

    #[test]
    fn typographic_apostrophes_match_plain_ones() {
        let mut config = SafetyConfig::default();
        config.crisis_keywords = vec!["don't want to live".to_string()];
        let classifier = SafetyClassifier::new(&config);

        for text in [
            "I don\u{2019}t want to live",
            "I DON'T want to live",
            "i don\u{2018}t want to live",
        ] {
            let detection = classifier.classify(Some(text));
            assert_eq!(
                detection.keywords,
                vec!["don't want to live".to_string()],
                "{}",
                text
            );
        }
        assert!(!classifier.classify(Some("I don t want to live")).detected);
    }

    #[test]
    fn matches_respect_word_boundaries() {
        let mut config = SafetyConfig::default();
        config.crisis_keywords = vec!["die".to_string()];
        let classifier = SafetyClassifier::new(&config);

        assert!(!classifier.classify(Some("the diet is going well")).detected);
        assert!(classifier.classify(Some("I could die")).detected);
    }

    #[test]
    fn below_medium_threshold_is_low() {
        let mut config = SafetyConfig::default();
        config.thresholds = SeverityThresholds {
            medium_at: 2,
            high_at: 3,
            critical_at: 4,
        };
        let detection = SafetyClassifier::new(&config).classify(Some("suicidal"));
        assert!(detection.detected);
        assert_eq!(detection.severity, Some(CrisisSeverity::Low));
    }

    #[test]
    fn policy_violations_are_tracked_by_category() {
        let verdict = classifier().check_policy(Some("Nobody likes you, you piece of shit"));
        assert!(verdict.is_flagged());
        assert_eq!(
            verdict.categories,
            vec![PolicyCategory::Harassment, PolicyCategory::Profanity]
        );
        assert!(verdict.terms.contains(&"shit".to_string()));
    }

    #[test]
    fn policy_and_crisis_are_independent() {
        let mut config = SafetyConfig::default();
        config.policy_terms = PolicyTermsConfig {
            harassment: vec![],
            hate_speech: vec![],
            profanity: vec!["damn".to_string()],
        };
        let assessment = SafetyClassifier::new(&config).assess(Some("damn, I feel suicidal"));

        assert!(assessment.crisis.detected);
        assert!(assessment.policy.is_flagged());
        let columns = assessment.columns();
        assert_eq!(columns.policy_flags, vec!["profanity".to_string()]);
        assert_eq!(columns.crisis_severity, Some(CrisisSeverity::Medium));
    }
}
