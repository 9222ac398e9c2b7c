//! Static repair pipeline.
//!
//! Repairs are driven by an ordered table of [`FixRule`] records (see
//! [`rules::RULES`]). Each rule is a detector plus a rewriter; the pipeline
//! processes the table uniformly: first every primary rule in order, then every
//! context-aware rule on the primary pass's output.
//!
//! The fixer is heuristic. It never fails and never guarantees the result is
//! valid; the structural validator and the sandbox decide that.

pub mod rules;

use crate::lexer::{scan, NeutralizeOptions};
use crate::source::{CandidateSource, Stage, StageError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

pub use rules::RULES;

/// Rewrites that stay inside one rule converge in a couple of rounds; the
/// bound only guards against a rewrite that reintroduces its own match.
const MAX_ROUNDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Renders the same, only warnings go away.
    Cosmetic,
    /// Code ran but showed the wrong thing.
    Semantic,
    /// Code would not parse.
    Syntax,
    /// Code breaks the artifact contract the host relies on.
    Contract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Primary,
    ContextAware,
}

/// Where a pattern match is allowed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Anywhere,
    /// The given capture group must start on a code byte (not inside a string,
    /// template body or comment).
    Code { anchor: usize },
}

/// Returns `None` to leave the match alone.
pub type Rewrite = fn(&Captures) -> Option<String>;

/// Whole-text scanner for fixes a single regex cannot express.
pub type Scanner = fn(&str) -> Vec<Edit>;

pub enum Detector {
    Pattern {
        regex: &'static Lazy<Regex>,
        rewrite: Rewrite,
        scope: Scope,
    },
    Scan(Scanner),
}

/// One row of the repair table.
pub struct FixRule {
    pub name: &'static str,
    pub severity: Severity,
    pub pass: Pass,
    pub detector: Detector,
}

impl std::fmt::Debug for FixRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("pass", &self.pass)
            .finish()
    }
}

/// A replacement produced by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Range<usize>,
    pub replacement: String,
}

/// One applied fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub rule: String,
    pub severity: Severity,
    /// Byte span in the text the rule was applied to.
    pub span: (usize, usize),
    pub matched: String,
    pub replacement: String,
}

/// Diagnostics for a repair run. Carries no behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixReport {
    pub records: Vec<FixRecord>,
    pub counts: BTreeMap<String, usize>,
}

impl FixReport {
    pub fn push(&mut self, record: FixRecord) {
        *self.counts.entry(record.rule.clone()).or_insert(0) += 1;
        self.records.push(record);
    }

    pub fn merge(&mut self, other: FixReport) {
        for record in other.records {
            self.push(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn count(&self, rule: &str) -> usize {
        self.counts.get(rule).copied().unwrap_or(0)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.records.iter().map(|r| r.severity).max()
    }

    /// `rule×n` pairs for log lines.
    pub fn summary(&self) -> String {
        self.counts
            .iter()
            .map(|(rule, n)| format!("{}×{}", rule, n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Output of [`repair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub source: CandidateSource,
    pub report: FixReport,
}

/// Run both passes over `text`.
pub fn repair(text: &str) -> RepairOutcome {
    let (repaired, report) = repair_text(text);
    RepairOutcome {
        source: CandidateSource::at_stage(repaired, Stage::Repaired),
        report,
    }
}

/// Repair a raw candidate. Any other stage is a programming error.
pub fn repair_candidate(candidate: &CandidateSource) -> Result<RepairOutcome, StageError> {
    let (repaired, report) = repair_text(candidate.text());
    Ok(RepairOutcome {
        source: candidate.advance(Stage::Repaired, repaired)?,
        report,
    })
}

/// Run both passes and return the new text plus the report.
pub fn repair_text(text: &str) -> (String, FixReport) {
    let mut report = FixReport::default();
    let mut current = text.to_string();
    for pass in [Pass::Primary, Pass::ContextAware] {
        current = run_pass(&current, pass, &mut report);
    }
    if !report.is_empty() {
        tracing::debug!(
            fixes = report.total(),
            rules = %report.summary(),
            "static repair applied"
        );
    }
    (current, report)
}

/// Apply every rule of one pass, in table order.
pub fn run_pass(text: &str, pass: Pass, report: &mut FixReport) -> String {
    let mut current = text.to_string();
    for rule in RULES.iter().filter(|r| r.pass == pass) {
        current = apply_rule(rule, &current, report);
    }
    current
}

/// Apply a single rule. Pattern rules repeat until their own matches are gone.
pub fn apply_rule(rule: &FixRule, text: &str, report: &mut FixReport) -> String {
    match &rule.detector {
        Detector::Pattern {
            regex,
            rewrite,
            scope,
        } => {
            let mut current = text.to_string();
            for _ in 0..MAX_ROUNDS {
                let (next, applied) = apply_pattern(rule, regex, *rewrite, *scope, &current, report);
                current = next;
                if applied == 0 {
                    break;
                }
            }
            current
        }
        Detector::Scan(scanner) => {
            let mut edits = scanner(text);
            edits.sort_by_key(|e| e.span.start);
            apply_edits(rule, text, edits, report)
        }
    }
}

fn apply_pattern(
    rule: &FixRule,
    regex: &Regex,
    rewrite: Rewrite,
    scope: Scope,
    text: &str,
    report: &mut FixReport,
) -> (String, usize) {
    let scanned = match scope {
        Scope::Anywhere => None,
        Scope::Code { .. } => Some(scan(text, NeutralizeOptions::ALL)),
    };
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut applied = 0;
    for caps in regex.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if let (Scope::Code { anchor }, Some(scanned)) = (scope, scanned.as_ref()) {
            match caps.get(anchor) {
                Some(m) if scanned.is_code_at(m.start()) => {}
                _ => continue,
            }
        }
        let Some(replacement) = rewrite(&caps) else {
            continue;
        };
        if replacement == whole.as_str() {
            continue;
        }
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replacement);
        last = whole.end();
        applied += 1;
        report.push(FixRecord {
            rule: rule.name.to_string(),
            severity: rule.severity,
            span: (whole.start(), whole.end()),
            matched: whole.as_str().to_string(),
            replacement,
        });
    }
    out.push_str(&text[last..]);
    (out, applied)
}

fn apply_edits(rule: &FixRule, text: &str, edits: Vec<Edit>, report: &mut FixReport) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for edit in edits {
        if edit.span.start < last || edit.span.end > text.len() || edit.span.start > edit.span.end {
            continue;
        }
        if !text.is_char_boundary(edit.span.start) || !text.is_char_boundary(edit.span.end) {
            continue;
        }
        let matched = &text[edit.span.clone()];
        if matched == edit.replacement {
            continue;
        }
        out.push_str(&text[last..edit.span.start]);
        out.push_str(&edit.replacement);
        last = edit.span.end;
        report.push(FixRecord {
            rule: rule.name.to_string(),
            severity: rule.severity,
            span: (edit.span.start, edit.span.end),
            matched: matched.to_string(),
            replacement: edit.replacement,
        });
    }
    out.push_str(&text[last..]);
    out
}

/// Look up a rule by name.
pub fn rule(name: &str) -> Option<&'static FixRule> {
    RULES.iter().find(|r| r.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repair_wraps_classname_interpolation() {
        let input = "<div className={base ${isActive ? 'a' : 'b'}}>x</div>";
        let outcome = repair(input);
        assert_eq!(
            outcome.source.text(),
            "<div className={`base ${isActive ? 'a' : 'b'}`}>x</div>"
        );
        assert_eq!(outcome.source.stage(), Stage::Repaired);
        assert_eq!(outcome.report.count("classname_unwrapped_interpolation"), 1);
    }

    #[test]
    fn test_repair_prefixes_hooks() {
        let input = "function App() {\n  const [count, setCount] = useState(0);\n  useEffect(() => {}, []);\n  return <p>{count}</p>;\n}";
        let outcome = repair(input);
        assert!(outcome.source.text().contains("React.useState(0)"));
        assert!(outcome.source.text().contains("React.useEffect(() =>"));
        assert_eq!(outcome.report.count("unprefixed_hook"), 2);
    }

    #[test]
    fn test_clean_input_is_untouched() {
        let input = "function App() {\n  const [n, setN] = React.useState(0);\n  return <button className={`p-2 ${n > 0 ? 'on' : ''}`} onClick={() => setN(n + 1)}>{n}</button>;\n}";
        let outcome = repair(input);
        assert_eq!(outcome.source.text(), input);
        assert!(outcome.report.is_empty());
    }

    #[test]
    fn test_repair_is_idempotent_on_mixed_input() {
        let input = "```jsx\nfunction App() {\n  const [count, setCount] = useState(0);\n  return (\n    <div class=\"p-4\" title=\"Count ${count}\">\n      <button onClick={() => setCount(count 1)}>+</button>\n      <span>{'Total: ${count}'}</span>\n    </div>\n  );\n```";
        let once = repair(input).source.into_text();
        let twice = repair(&once).source.into_text();
        assert_eq!(once, twice);
        assert!(once.contains("className=\"p-4\""));
        assert!(once.contains("title={`Count ${count}`}"));
        assert!(once.contains("setCount(count + 1)"));
        assert!(once.contains("{`Total: ${count}`}"));
        assert!(once.ends_with('}'));
    }

    #[test]
    fn test_repair_candidate_rejects_wrong_stage() {
        let repaired = repair("function App() {}").source;
        assert!(repair_candidate(&repaired).is_err());
        let raw = CandidateSource::raw("function App() {}");
        assert!(repair_candidate(&raw).is_ok());
    }

    #[test]
    fn test_report_merge_counts() {
        let mut a = repair("useState(0)").report;
        let b = repair("useRef(null)").report;
        a.merge(b);
        assert_eq!(a.count("unprefixed_hook"), 2);
        assert_eq!(a.highest_severity(), Some(Severity::Contract));
        assert_eq!(a.summary(), "unprefixed_hook×2");
    }
}
