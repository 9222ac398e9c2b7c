//! Structural validator.
//!
//! Lexical checks only: required tokens, bracket balance over neutralized text,
//! denylisted constructs. [`validate_raw`] runs before repair and rejects
//! responses that look cut off; [`validate`] gates sandbox execution.

use crate::lexer::{bracket_report, neutralize, strip_comments};
use crate::repair::rules::BUILTIN_HOOKS;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EmptyResponse,
    NoCode,
    Truncated,
    MissingEntryPoint,
    MissingReturn,
    UnbalancedBrackets,
    Denylisted,
    UnprefixedHook,
    NetworkAccess,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::EmptyResponse => "empty_response",
            IssueKind::NoCode => "no_code",
            IssueKind::Truncated => "truncated",
            IssueKind::MissingEntryPoint => "missing_entry_point",
            IssueKind::MissingReturn => "missing_return",
            IssueKind::UnbalancedBrackets => "unbalanced_brackets",
            IssueKind::Denylisted => "denylisted",
            IssueKind::UnprefixedHook => "unprefixed_hook",
            IssueKind::NetworkAccess => "network_access",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationOutcome {
    fn from_issues(errors: Vec<Issue>, warnings: Vec<Issue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn has_error(&self, kind: IssueKind) -> bool {
        self.errors.iter().any(|i| i.kind == kind)
    }

    pub fn has_warning(&self, kind: IssueKind) -> bool {
        self.warnings.iter().any(|i| i.kind == kind)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|i| i.message.clone()).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|i| i.message.clone()).collect()
    }

    /// The first blocking issue, used to name an attempt's failure.
    pub fn first_error(&self) -> Option<&Issue> {
        self.errors.first()
    }
}

struct Check {
    regex: Lazy<Regex>,
    message: &'static str,
}

static ENTRY_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bfunction\s+App\b|\b(?:const|let)\s+App\s*=|\bclass\s+App\s+extends\b|\bexport\s+default\b")
        .unwrap()
});

static RETURN_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\breturn\b").unwrap());

static UNPREFIXED_HOOK_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?m)(^|[^\w.$])(function\s+)?({})\s*\(",
        BUILTIN_HOOKS.join("|")
    ))
    .unwrap()
});

static CODE_SIGNAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfunction\b|=>|\breturn\b|\bconst\b").unwrap());

static TRAILING_EXPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\n)[ \t]*export\s+default\s+[A-Za-z_$][\w$]*\s*;?\s*$").unwrap());

static TRAILING_RENDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\n)[ \t]*(?:ReactDOM\.\w+|createRoot|root\.render)\([^\n]*\)\s*;?\s*$").unwrap()
});

static DENYLIST: [Check; 14] = [
    Check {
        regex: Lazy::new(|| Regex::new(r"\beval\s*\(").unwrap()),
        message: "Forbidden construct: eval()",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bnew\s+Function\s*\(").unwrap()),
        message: "Forbidden construct: new Function()",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bdangerouslySetInnerHTML\b").unwrap()),
        message: "Forbidden construct: dangerouslySetInnerHTML",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\.innerHTML\s*\+?=[^=]").unwrap()),
        message: "Forbidden construct: innerHTML assignment",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\.outerHTML\s*=[^=]").unwrap()),
        message: "Forbidden construct: outerHTML assignment",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\binsertAdjacentHTML\b").unwrap()),
        message: "Forbidden construct: insertAdjacentHTML",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bdocument\.write(?:ln)?\s*\(").unwrap()),
        message: "Forbidden construct: document.write()",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"(?i)<script\b").unwrap()),
        message: "Forbidden construct: <script> tag",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r#"(?i)createElement\(\s*['"`]script['"`]"#).unwrap()),
        message: "Forbidden construct: script element injection",
    },
    Check {
        regex: Lazy::new(|| {
            Regex::new(r"(?:\bwindow\.location|\bdocument\.location|\blocation\.href)\s*=[^=]").unwrap()
        }),
        message: "Forbidden construct: navigation by location assignment",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\blocation\.(?:assign|replace)\s*\(").unwrap()),
        message: "Forbidden construct: location.assign()/replace()",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\btop\.location\b").unwrap()),
        message: "Forbidden construct: top.location",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bwindow\.open\s*\(").unwrap()),
        message: "Forbidden construct: window.open()",
    },
    Check {
        regex: Lazy::new(|| {
            Regex::new(r#"\bconstructor\s*\.\s*constructor\b|\[\s*['"`]constructor['"`]\s*\]"#).unwrap()
        }),
        message: "Forbidden construct: constructor.constructor",
    },
];

/// Node globals a browser component has no business touching. Run on
/// neutralized code so prose in strings never trips them.
static REALM_ESCAPES: [Check; 3] = [
    Check {
        regex: Lazy::new(|| Regex::new(r"(?:^|[^.\w$])process\.[A-Za-z_$]").unwrap()),
        message: "Forbidden construct: process access",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"(?:^|[^.\w$])require\s*\(").unwrap()),
        message: "Forbidden construct: require()",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"(?:^|[^.\w$])import\s*\(").unwrap()),
        message: "Forbidden construct: dynamic import()",
    },
];

static NETWORK: [Check; 6] = [
    Check {
        regex: Lazy::new(|| Regex::new(r"\bfetch\s*\(").unwrap()),
        message: "Network access: fetch()",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bXMLHttpRequest\b").unwrap()),
        message: "Network access: XMLHttpRequest",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\baxios\.").unwrap()),
        message: "Network access: axios",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bnew\s+WebSocket\s*\(").unwrap()),
        message: "Network access: WebSocket",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bnavigator\.sendBeacon\b").unwrap()),
        message: "Network access: navigator.sendBeacon",
    },
    Check {
        regex: Lazy::new(|| Regex::new(r"\bnew\s+EventSource\s*\(").unwrap()),
        message: "Network access: EventSource",
    },
];

/// Full structural checks on repaired text.
pub fn validate(text: &str) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let code = neutralize(text);
    let uncommented = strip_comments(text);

    if !ENTRY_POINT.is_match(&code) {
        errors.push(Issue::new(
            IssueKind::MissingEntryPoint,
            "Missing entry point: expected `function App`, `const App =` or `export default`",
        ));
    }

    if !RETURN_KEYWORD.is_match(&code) {
        errors.push(Issue::new(
            IssueKind::MissingReturn,
            "Missing return statement: component has no render body",
        ));
    }

    let brackets = bracket_report(&code);
    for message in brackets.imbalances() {
        errors.push(Issue::new(IssueKind::UnbalancedBrackets, message));
    }
    if brackets.is_balanced() && brackets.mismatched {
        errors.push(Issue::new(
            IssueKind::UnbalancedBrackets,
            "Mismatched bracket nesting",
        ));
    }

    for check in DENYLIST.iter() {
        if check.regex.is_match(&uncommented) {
            errors.push(Issue::new(IssueKind::Denylisted, check.message));
        }
    }
    for check in REALM_ESCAPES.iter() {
        if check.regex.is_match(&code) {
            errors.push(Issue::new(IssueKind::Denylisted, check.message));
        }
    }

    let mut unprefixed: Vec<&str> = Vec::new();
    for caps in UNPREFIXED_HOOK_CALL.captures_iter(&code) {
        if caps.get(2).is_some() {
            continue;
        }
        if let Some(name) = caps.get(3) {
            if !unprefixed.contains(&name.as_str()) {
                unprefixed.push(name.as_str());
            }
        }
    }
    for name in unprefixed {
        errors.push(Issue::new(
            IssueKind::UnprefixedHook,
            format!("Hook `{}` must be called as `React.{}`", name, name),
        ));
    }

    for check in NETWORK.iter() {
        if check.regex.is_match(&uncommented) {
            warnings.push(Issue::new(IssueKind::NetworkAccess, check.message));
        }
    }

    ValidationOutcome::from_issues(errors, warnings)
}

/// Checks on the raw model output, before any repair.
pub fn validate_raw(text: &str) -> ValidationOutcome {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ValidationOutcome::from_issues(
            vec![Issue::new(IssueKind::EmptyResponse, "Empty response from model")],
            Vec::new(),
        );
    }

    let mut errors = Vec::new();
    if !CODE_SIGNAL.is_match(trimmed) {
        errors.push(Issue::new(
            IssueKind::NoCode,
            "No code detected in response",
        ));
    }
    if let Some(message) = truncation(trimmed) {
        errors.push(Issue::new(IssueKind::Truncated, message));
    }
    ValidationOutcome::from_issues(errors, Vec::new())
}

/// Explain why `text` looks cut off, if it does. Comments are ignored, so a
/// trailing `// done` after the closing brace is fine.
pub fn truncation(text: &str) -> Option<String> {
    let uncommented = strip_comments(text);
    let tail = significant_tail(&uncommented);
    let last = match tail.chars().last() {
        Some(c) => c,
        None => return Some("Response appears truncated: nothing after trailing exports".to_string()),
    };
    let reason = match last {
        '}' => return None,
        '+' | '-' | '*' | '/' | '%' | '=' | '&' | '|' | '^' | '<' | '>' | '?' | '!' => {
            format!("ends with dangling operator '{}'", last)
        }
        ',' => "ends with a trailing comma".to_string(),
        ':' => "ends with a dangling colon".to_string(),
        '.' => "ends with a dangling member access".to_string(),
        '(' | '[' | '{' => format!("ends with open bracket '{}'", last),
        _ => "does not end with a closing brace".to_string(),
    };
    Some(format!("Response appears truncated: {}", reason))
}

/// Strip what may legitimately follow the component's closing brace.
fn significant_tail(text: &str) -> &str {
    let mut tail = text.trim_end();
    loop {
        let before = tail.len();
        tail = tail.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if let Some(m) = TRAILING_EXPORT.find(tail) {
            tail = &tail[..m.start()];
        }
        if let Some(m) = TRAILING_RENDER.find(tail) {
            tail = &tail[..m.start()];
        }
        if tail.len() == before {
            return tail;
        }
    }
}
