//! Iteration budget classifiers.
//!
//! Some instructions need more model rounds than the configured floor:
//! date pickers take several clicks to reach the right month, and a
//! verification usually needs one round to look and one to answer.

use std::sync::LazyLock;

use regex::Regex;

/// Minimum rounds for an instruction that selects a date.
pub const DATE_SELECTION_MIN_ITERATIONS: u32 = 6;

/// Minimum rounds for a pure verification instruction.
pub const VERIFICATION_MIN_ITERATIONS: u32 = 2;

const SELECTION_VERBS: &[&str] = &["select", "pick", "set", "enter", "choose"];

const DATE_WORDS: &[&str] = &["date", "day", "calendar", "datepicker", "date picker"];

const MONTHS: &[&str] = &[
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const VERIFICATION_OPENERS: &[&str] = &[
    "verify",
    "check",
    "assert",
    "confirm",
    "ensure",
    "validate",
    "make sure",
];

static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,4}[/.-]\d{1,2}[/.-]\d{1,4}\b").expect("valid regex"));

/// Lowercased instruction split into words, with the lowercased text kept
/// for phrase matching.
struct Words {
    text: String,
    tokens: Vec<String>,
}

impl Words {
    fn new(instruction: &str) -> Self {
        let text = instruction.trim().to_lowercase();
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        Self { text, tokens }
    }

    /// Single words match whole tokens; phrases match as substrings.
    fn has(&self, term: &str) -> bool {
        if term.contains(' ') {
            self.text.contains(term)
        } else {
            self.tokens.iter().any(|t| t == term)
        }
    }

    fn has_any(&self, terms: &[&str]) -> bool {
        terms.iter().any(|t| self.has(t))
    }
}

/// A selection verb co-occurring with a date word, a month name, or a
/// numeric date.
#[must_use]
pub fn is_date_selection(instruction: &str) -> bool {
    let words = Words::new(instruction);
    words.has_any(SELECTION_VERBS)
        && (words.has_any(DATE_WORDS)
            || words.has_any(MONTHS)
            || NUMERIC_DATE_RE.is_match(&words.text))
}

/// The instruction opens with a verification verb.
#[must_use]
pub fn is_verification(instruction: &str) -> bool {
    let words = Words::new(instruction);
    VERIFICATION_OPENERS.iter().any(|opener| {
        if opener.contains(' ') {
            words.text.starts_with(opener)
        } else {
            words.tokens.first().is_some_and(|t| t == opener)
        }
    })
}

/// Iteration budget for `instruction`: the configured value raised to
/// every floor that applies.
#[must_use]
pub fn effective_max_iterations(instruction: &str, configured: u32) -> u32 {
    let mut budget = configured.max(1);
    if is_date_selection(instruction) {
        budget = budget.max(DATE_SELECTION_MIN_ITERATIONS);
    }
    if is_verification(instruction) {
        budget = budget.max(VERIFICATION_MIN_ITERATIONS);
    }
    budget
}
