//! Response grammar.
//!
//! Every sentinel the model is asked to emit is parsed here. Matching is
//! deliberately tolerant: models decorate, reorder and paraphrase, so each
//! reading is a list of prioritized rules, most exact first.
//!
//! | Sentinel | Reader |
//! |---|---|
//! | `NEED_SNAPSHOT` | [`is_need_snapshot`] |
//! | `EXECUTED_STEP_NUMBERS: 5,6` | [`parse_executed_step_numbers`] |
//! | `Step 5: PASS - reason` | [`parse_step_verdicts`] |
//! | `EXTRACTED_VARIABLE:name=value` | [`parse_extracted_variables`] |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The snapshot-request sentinel.
pub const NEED_SNAPSHOT: &str = "NEED_SNAPSHOT";

static EXECUTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*_`>-]*EXECUTED_STEP_NUMBERS[*_`]*\s*:\s*(.*)$").expect("valid regex")
});

static STRICT_VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*_#>-]*step\s+(\d+)[*_]*\s*:\s*[*_]*(pass|fail)(?:ed)?\b[*_]*(?:\s*[-–—:]\s*(.*?))?\s*$")
        .expect("valid regex")
});

static LOOSE_VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)step\s+(\d+)\s*[:.)-]?\s*[*_]*(pass|fail)(?:ed)?\b[*_]*(?:\s*[-–—:]\s*([^\n]*))?")
        .expect("valid regex")
});

static STEP_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstep\s+(\d+)\b").expect("valid regex"));

static FAIL_SIGNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fail|failed|failure|error|unable|could\s+not|couldn't|cannot|not\s+found)\b|❌|✗")
        .expect("valid regex")
});

static PASS_SIGNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:pass|passed|success|successful|successfully|completed|verified)\b|✅|✓")
        .expect("valid regex")
});

static LEADING_VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s*_#>-]*(pass|fail)(?:ed)?\b[*_]*(?:\s*[-–—:]\s*(.*?))?\s*$").expect("valid regex")
});

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*EXTRACTED_VARIABLE\s*:\s*([^=\s]+)\s*=\s*(.*?)\s*$").expect("valid regex")
});

static REQUIRED_CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bREQUIRED_CONTROL_MISSING\b|\brequired\s+(?:control|element|field|button|option|input)s?\s+(?:is\s+|are\s+|was\s+|were\s+)?(?:missing|absent|not\s+(?:present|found|available|visible|on\s+the\s+page))",
    )
    .expect("valid regex")
});

// ─────────────────────────────────────────────────────────────────────────────
// Verdicts
// ─────────────────────────────────────────────────────────────────────────────

/// Pass or fail for one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The step succeeded.
    Pass,
    /// The step failed.
    Fail,
}

/// Parsed outcome of one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepVerdict {
    /// Pass or fail.
    pub verdict: Verdict,
    /// Reason text, if the model gave one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepVerdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass(reason: Option<String>) -> Self {
        Self {
            verdict: Verdict::Pass,
            reason,
        }
    }

    /// A failing verdict.
    #[must_use]
    pub fn fail(reason: Option<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            reason,
        }
    }

    /// Whether this is a failure.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}

fn verdict_from(word: &str, reason: Option<&str>) -> StepVerdict {
    let reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_owned);
    if word.eq_ignore_ascii_case("fail") {
        StepVerdict::fail(reason)
    } else {
        StepVerdict::pass(reason)
    }
}

/// Whether `text` asks for a fresh snapshot: the whole trimmed reply, or any
/// line on its own, is `NEED_SNAPSHOT` (case-insensitive).
#[must_use]
pub fn is_need_snapshot(text: &str) -> bool {
    is_bare_need_snapshot(text) || text.lines().any(is_bare_need_snapshot)
}

/// The reply is nothing but the sentinel. Such replies carry no other
/// information and are not kept in history.
#[must_use]
pub fn is_bare_need_snapshot(text: &str) -> bool {
    text.trim()
        .trim_matches(|c| matches!(c, '*' | '`' | '_'))
        .eq_ignore_ascii_case(NEED_SNAPSHOT)
}

/// Numbers on the last `EXECUTED_STEP_NUMBERS:` line.
///
/// `None` when the line is absent; `Some(vec![])` when present but empty
/// (or `none`). Non-numeric tokens are skipped.
#[must_use]
pub fn parse_executed_step_numbers(text: &str) -> Option<Vec<u32>> {
    let caps = EXECUTED_RE.captures_iter(text).last()?;
    let list = caps.get(1).map_or("", |m| m.as_str());
    Some(
        list.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter_map(|tok| {
                tok.trim_matches(|c: char| !c.is_ascii_digit())
                    .parse::<u32>()
                    .ok()
            })
            .collect(),
    )
}

/// Per-step verdicts for the `offered` steps.
///
/// Rules, first hit per step wins:
/// 1. a line that starts with `Step N: PASS|FAIL [- reason]`;
/// 2. the same shape anywhere in a line;
/// 3. block scan: text between a `Step N` mention and the next one is
///    searched for fail and pass signals. A fail signal beats any pass
///    signal in the same block. This is a heuristic.
#[must_use]
pub fn parse_step_verdicts(text: &str, offered: &[u32]) -> BTreeMap<u32, StepVerdict> {
    let wanted: BTreeSet<u32> = offered.iter().copied().collect();
    let mut verdicts: BTreeMap<u32, StepVerdict> = BTreeMap::new();

    for re in [&*STRICT_VERDICT_RE, &*LOOSE_VERDICT_RE] {
        for caps in re.captures_iter(text) {
            let Some(step) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                continue;
            };
            if !wanted.contains(&step) || verdicts.contains_key(&step) {
                continue;
            }
            let word = caps.get(2).map_or("pass", |m| m.as_str());
            let _ = verdicts.insert(step, verdict_from(word, caps.get(3).map(|m| m.as_str())));
        }
    }

    if verdicts.len() < wanted.len() {
        for (step, verdict) in block_scan(text) {
            if wanted.contains(&step) && !verdicts.contains_key(&step) {
                let _ = verdicts.insert(step, verdict);
            }
        }
    }
    verdicts
}

fn block_scan(text: &str) -> BTreeMap<u32, StepVerdict> {
    let headers: Vec<(usize, u32)> = STEP_HEADER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let step = caps.get(1)?.as_str().parse().ok()?;
            Some((start, step))
        })
        .collect();

    // (fail seen, pass seen, first fail line)
    let mut signals: BTreeMap<u32, (bool, bool, Option<String>)> = BTreeMap::new();
    for (i, &(start, step)) in headers.iter().enumerate() {
        let end = headers.get(i + 1).map_or(text.len(), |&(next, _)| next);
        let block = &text[start..end];
        let entry = signals.entry(step).or_default();
        if let Some(m) = FAIL_SIGNAL_RE.find(block) {
            entry.0 = true;
            if entry.2.is_none() {
                entry.2 = line_around(block, m.start());
            }
        }
        if PASS_SIGNAL_RE.is_match(block) {
            entry.1 = true;
        }
    }

    signals
        .into_iter()
        .filter_map(|(step, (fail, pass, reason))| {
            if fail {
                Some((step, StepVerdict::fail(reason)))
            } else if pass {
                Some((step, StepVerdict::pass(None)))
            } else {
                None
            }
        })
        .collect()
}

fn line_around(block: &str, at: usize) -> Option<String> {
    let start = block[..at].rfind('\n').map_or(0, |i| i + 1);
    let end = block[at..].find('\n').map_or(block.len(), |i| at + i);
    let line = block[start..end].trim();
    (!line.is_empty()).then(|| line.to_owned())
}

/// `EXTRACTED_VARIABLE:name=value` lines. A later line for the same name
/// wins.
#[must_use]
pub fn parse_extracted_variables(text: &str) -> BTreeMap<String, String> {
    VARIABLE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_owned();
            let value = caps.get(2).map_or("", |m| m.as_str()).to_owned();
            Some((name, value))
        })
        .collect()
}

/// Executed steps the caller may trust.
///
/// Walks `offered` in plan order and keeps each step the model reported,
/// stopping at the first one it did not report (no skipping ahead) and
/// right after the first one with a FAIL verdict.
#[must_use]
pub fn clamp_executed(
    offered: &[u32],
    reported: &[u32],
    verdicts: &BTreeMap<u32, StepVerdict>,
) -> Vec<u32> {
    let reported: BTreeSet<u32> = reported.iter().copied().collect();
    let mut executed = Vec::new();
    for &step in offered {
        if !reported.contains(&step) {
            break;
        }
        executed.push(step);
        if verdicts.get(&step).is_some_and(StepVerdict::is_fail) {
            break;
        }
    }
    executed
}

// ─────────────────────────────────────────────────────────────────────────────
// Hard failures
// ─────────────────────────────────────────────────────────────────────────────

/// A reply pattern that means the current step genuinely failed, even when
/// the model also asked for a new snapshot. Re-snapshotting would loop.
pub trait HardFailureRule: Send + Sync {
    /// Rule name for logs.
    fn name(&self) -> &str;

    /// Diagnostic when `text` matches.
    fn detect(&self, text: &str) -> Option<String>;
}

/// The model reports that a control the step requires does not exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredControlMissing;

impl HardFailureRule for RequiredControlMissing {
    fn name(&self) -> &'static str {
        "required_control_missing"
    }

    fn detect(&self, text: &str) -> Option<String> {
        let m = REQUIRED_CONTROL_RE.find(text)?;
        line_around(text, m.start()).or_else(|| Some(m.as_str().to_owned()))
    }
}

/// The rules applied when none are configured.
#[must_use]
pub fn default_hard_failure_rules() -> Vec<Box<dyn HardFailureRule>> {
    vec![Box::new(RequiredControlMissing)]
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch reading
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a batch reply says, already clamped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReading {
    /// Trusted executed steps (a prefix of the offered order).
    pub executed: Vec<u32>,
    /// Verdicts for offered steps.
    pub verdicts: BTreeMap<u32, StepVerdict>,
    /// The model asked for a fresh snapshot.
    pub need_snapshot: bool,
    /// Hard-failure diagnostic, if a rule fired.
    pub hard_failure: Option<String>,
}

/// Read a final batch reply.
///
/// `forced` holds verdicts the caller already knows (tool failures); they
/// override the model's wording and count as reported. Without an
/// `EXECUTED_STEP_NUMBERS` line the steps with verdicts count as reported,
/// and so do the `dispatched` steps whose tagged tool calls succeeded.
#[must_use]
pub fn read_batch_reply(
    text: &str,
    offered: &[u32],
    forced: &BTreeMap<u32, StepVerdict>,
    dispatched: &BTreeSet<u32>,
    rules: &[Box<dyn HardFailureRule>],
) -> BatchReading {
    let mut verdicts = parse_step_verdicts(text, offered);
    for (step, verdict) in forced {
        let _ = verdicts.insert(*step, verdict.clone());
    }

    let mut reported = parse_executed_step_numbers(text).unwrap_or_else(|| {
        verdicts
            .keys()
            .chain(dispatched)
            .copied()
            .collect()
    });
    reported.extend(forced.keys().copied());
    let executed = clamp_executed(offered, &reported, &verdicts);
    let need_snapshot = is_need_snapshot(text);

    if executed.is_empty()
        && let Some(&first) = offered.first()
        && let Some((rule, diagnostic)) = rules
            .iter()
            .find_map(|r| r.detect(text).map(|d| (r.name(), d)))
    {
        tracing::debug!(rule, step = first, "hard failure rule matched");
        let _ = verdicts.insert(first, StepVerdict::fail(Some(diagnostic.clone())));
        return BatchReading {
            executed: vec![first],
            verdicts,
            need_snapshot: false,
            hard_failure: Some(diagnostic),
        };
    }

    BatchReading {
        executed,
        verdicts,
        need_snapshot,
        hard_failure: None,
    }
}

/// Verdict for a single-step reply.
///
/// In order: a `Step N:` verdict, a reply that opens with PASS or FAIL, a
/// hard-failure rule hit, otherwise PASS with the reply's first line as
/// the reason.
#[must_use]
pub fn read_step_reply(text: &str, step: u32, rules: &[Box<dyn HardFailureRule>]) -> StepVerdict {
    if let Some(verdict) = parse_step_verdicts(text, &[step]).remove(&step) {
        return verdict;
    }
    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty());
    if let Some(caps) = first_line.and_then(|l| LEADING_VERDICT_RE.captures(l)) {
        let word = caps.get(1).map_or("pass", |m| m.as_str());
        return verdict_from(word, caps.get(2).map(|m| m.as_str()));
    }
    if let Some(diagnostic) = rules.iter().find_map(|r| r.detect(text)) {
        return StepVerdict::fail(Some(diagnostic));
    }
    StepVerdict::pass(first_line.map(str::to_owned))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
