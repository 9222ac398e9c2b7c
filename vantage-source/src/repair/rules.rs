//! The repair table.
//!
//! Order matters: fence removal first so later rules see code only, attribute
//! fixes before the generic string fix so JSX attributes get `{`...`}` and not
//! a bare template, and bracket closure last.

use super::{Detector, Edit, FixRule, Pass, Scope, Severity};
use crate::lexer::{bracket_report, closer_for, scan, NeutralizeOptions};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// ============================================================================
// Static Regexes
// ============================================================================

static MARKDOWN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*\r?(?:\n|\z)").unwrap());

static HTML_CLASS_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<[A-Za-z][\w.]*\b[^<>]*?\s)class=").unwrap());

static CLASSNAME_UNWRAPPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"className=\{([^`{}]*\$\{[^{}]*\}(?:[^`{}]*\$\{[^{}]*\})*[^`{}]*)\}").unwrap()
});

static JSX_ATTRIBUTE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(<[A-Za-z][\w.]*\b[^<>]*?\s[A-Za-z][\w-]*)=(?:"([^"\n`]*\$\{[^}\n]*\}[^"\n`]*)"|'([^'\n`]*\$\{[^}\n]*\}[^'\n`]*)')"#,
    )
    .unwrap()
});

static QUOTED_INTERPOLATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(^|[^\w'"`=\\])('[^'\n`\\]*\$\{[^}\n]*\}[^'\n`\\]*'|"[^"\n`\\]*\$\{[^}\n]*\}[^"\n`\\]*")"#,
    )
    .unwrap()
});

static UNPREFIXED_HOOK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?m)(^|[^\w.$])(function\s+)?({})(\s*\()",
        BUILTIN_HOOKS.join("|")
    ))
    .unwrap()
});

static SETTER_MISSING_OPERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(set[A-Z][\w$]*)\(\s*([A-Za-z_$][\w$.]*)\s+(\d+(?:\.\d+)?)\s*\)").unwrap()
});

static ARROW_MISSING_OPERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(=>\s*)([A-Za-z_$][\w$.]*)\s+(\d+(?:\.\d+)?)\s*([),;}])").unwrap()
});

static INTERPOLATION_MISSING_OPERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_$][\w$.]*)\s+(\d+(?:\.\d+)?)\s*\}").unwrap()
});

/// Built-in React hooks the artifact contract requires to be namespaced.
pub const BUILTIN_HOOKS: &[&str] = &[
    "useState",
    "useEffect",
    "useLayoutEffect",
    "useRef",
    "useMemo",
    "useCallback",
    "useReducer",
    "useContext",
    "useId",
    "useTransition",
    "useDeferredValue",
    "useImperativeHandle",
    "useSyncExternalStore",
];

/// Words that can legally precede a number after whitespace.
const KEYWORDS: &[&str] = &[
    "return",
    "case",
    "typeof",
    "yield",
    "await",
    "new",
    "delete",
    "void",
    "in",
    "of",
    "instanceof",
    "else",
    "do",
    "throw",
    "const",
    "let",
    "var",
];

pub static RULES: &[FixRule] = &[
    FixRule {
        name: "markdown_fence",
        severity: Severity::Syntax,
        pass: Pass::Primary,
        detector: Detector::Pattern {
            regex: &MARKDOWN_FENCE,
            rewrite: drop_match,
            scope: Scope::Anywhere,
        },
    },
    FixRule {
        name: "html_class_attribute",
        severity: Severity::Cosmetic,
        pass: Pass::Primary,
        detector: Detector::Pattern {
            regex: &HTML_CLASS_ATTRIBUTE,
            rewrite: rename_class_attribute,
            scope: Scope::Code { anchor: 0 },
        },
    },
    FixRule {
        name: "classname_unwrapped_interpolation",
        severity: Severity::Syntax,
        pass: Pass::Primary,
        detector: Detector::Pattern {
            regex: &CLASSNAME_UNWRAPPED,
            rewrite: wrap_classname,
            scope: Scope::Code { anchor: 0 },
        },
    },
    FixRule {
        name: "jsx_attribute_quoted_interpolation",
        severity: Severity::Semantic,
        pass: Pass::Primary,
        detector: Detector::Pattern {
            regex: &JSX_ATTRIBUTE_QUOTED,
            rewrite: wrap_jsx_attribute,
            scope: Scope::Code { anchor: 0 },
        },
    },
    FixRule {
        name: "quoted_string_interpolation",
        severity: Severity::Semantic,
        pass: Pass::Primary,
        detector: Detector::Pattern {
            regex: &QUOTED_INTERPOLATION,
            rewrite: quoted_to_template,
            scope: Scope::Code { anchor: 2 },
        },
    },
    FixRule {
        name: "unprefixed_hook",
        severity: Severity::Contract,
        pass: Pass::Primary,
        detector: Detector::Pattern {
            regex: &UNPREFIXED_HOOK,
            rewrite: prefix_hook,
            scope: Scope::Code { anchor: 3 },
        },
    },
    FixRule {
        name: "setter_missing_operator",
        severity: Severity::Syntax,
        pass: Pass::ContextAware,
        detector: Detector::Pattern {
            regex: &SETTER_MISSING_OPERATOR,
            rewrite: setter_operator,
            scope: Scope::Code { anchor: 1 },
        },
    },
    FixRule {
        name: "arrow_missing_operator",
        severity: Severity::Syntax,
        pass: Pass::ContextAware,
        detector: Detector::Pattern {
            regex: &ARROW_MISSING_OPERATOR,
            rewrite: arrow_operator,
            scope: Scope::Code { anchor: 1 },
        },
    },
    FixRule {
        name: "interpolation_missing_operator",
        severity: Severity::Syntax,
        pass: Pass::ContextAware,
        detector: Detector::Pattern {
            regex: &INTERPOLATION_MISSING_OPERATOR,
            rewrite: interpolation_operator,
            scope: Scope::Anywhere,
        },
    },
    FixRule {
        name: "unclosed_brackets",
        severity: Severity::Syntax,
        pass: Pass::ContextAware,
        detector: Detector::Scan(close_brackets),
    },
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn drop_match(_caps: &Captures) -> Option<String> {
    Some(String::new())
}

fn rename_class_attribute(caps: &Captures) -> Option<String> {
    Some(format!("{}className=", &caps[1]))
}

fn wrap_classname(caps: &Captures) -> Option<String> {
    let inner = caps[1].trim();
    if inner.is_empty() {
        return None;
    }
    Some(format!("className={{`{}`}}", inner))
}

fn wrap_jsx_attribute(caps: &Captures) -> Option<String> {
    let value = caps.get(2).or_else(|| caps.get(3))?;
    Some(format!("{}={{`{}`}}", &caps[1], value.as_str()))
}

fn quoted_to_template(caps: &Captures) -> Option<String> {
    let literal = &caps[2];
    let inner = &literal[1..literal.len() - 1];
    Some(format!("{}`{}`", &caps[1], inner))
}

fn prefix_hook(caps: &Captures) -> Option<String> {
    // `function useState(` is a declaration, not a call.
    if caps.get(2).is_some() {
        return None;
    }
    Some(format!("{}React.{}{}", &caps[1], &caps[3], &caps[4]))
}

fn setter_operator(caps: &Captures) -> Option<String> {
    if is_keyword(&caps[2]) {
        return None;
    }
    Some(format!("{}({} + {})", &caps[1], &caps[2], &caps[3]))
}

fn arrow_operator(caps: &Captures) -> Option<String> {
    if is_keyword(&caps[2]) {
        return None;
    }
    Some(format!("{}{} + {}{}", &caps[1], &caps[2], &caps[3], &caps[4]))
}

fn interpolation_operator(caps: &Captures) -> Option<String> {
    if is_keyword(&caps[1]) {
        return None;
    }
    Some(format!("${{{} + {}}}", &caps[1], &caps[2]))
}

/// Append closers for brackets left open at the end of the text.
///
/// Refuses when the text ends inside a string, template or comment (closing
/// those would need a guess about intent), or when a closer already mismatched.
fn close_brackets(text: &str) -> Vec<Edit> {
    let scanned = scan(text, NeutralizeOptions::ALL);
    if !scanned.ends_in_code() {
        return Vec::new();
    }
    let report = bracket_report(&scanned.text);
    if report.mismatched || report.unclosed.is_empty() {
        return Vec::new();
    }
    let closers: String = report.unclosed.iter().rev().map(|c| closer_for(*c)).collect();
    let replacement = if text.ends_with('\n') || text.is_empty() {
        closers
    } else {
        format!("\n{}", closers)
    };
    vec![Edit {
        span: text.len()..text.len(),
        replacement,
    }]
}

#[cfg(test)]
mod tests {
    use super::super::{apply_rule, rule, FixReport};
    use pretty_assertions::assert_eq;

    fn apply(name: &str, text: &str) -> String {
        let mut report = FixReport::default();
        apply_rule(rule(name).unwrap(), text, &mut report)
    }

    #[test]
    fn test_rule_order_is_stable() {
        let names: Vec<&str> = super::RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "markdown_fence",
                "html_class_attribute",
                "classname_unwrapped_interpolation",
                "jsx_attribute_quoted_interpolation",
                "quoted_string_interpolation",
                "unprefixed_hook",
                "setter_missing_operator",
                "arrow_missing_operator",
                "interpolation_missing_operator",
                "unclosed_brackets",
            ]
        );
    }

    #[test]
    fn test_markdown_fence() {
        assert_eq!(
            apply("markdown_fence", "```jsx\nconst a = 1;\n```\n"),
            "const a = 1;\n"
        );
        assert_eq!(apply("markdown_fence", "const a = 1;\n```"), "const a = 1;\n");
    }

    #[test]
    fn test_html_class_attribute() {
        assert_eq!(
            apply(
                "html_class_attribute",
                "<div class=\"a\" id=\"x\" class=\"b\"><span class={s}>t</span></div>"
            ),
            "<div className=\"a\" id=\"x\" className=\"b\"><span className={s}>t</span></div>"
        );
        // JS classes and strings are not attributes.
        let untouched = "class Foo extends Bar {}\nconst html = '<p class=\"x\">';";
        assert_eq!(apply("html_class_attribute", untouched), untouched);
    }

    #[test]
    fn test_classname_unwrapped_interpolation() {
        assert_eq!(
            apply(
                "classname_unwrapped_interpolation",
                "<div className={ base ${a} mid ${b ? 'x' : 'y'} }>"
            ),
            "<div className={`base ${a} mid ${b ? 'x' : 'y'}`}>"
        );
    }

    #[test]
    fn test_jsx_attribute_quoted_interpolation() {
        assert_eq!(
            apply(
                "jsx_attribute_quoted_interpolation",
                "<img alt=\"Photo ${n}\" title='by ${who}' src={url} />"
            ),
            "<img alt={`Photo ${n}`} title={`by ${who}`} src={url} />"
        );
    }

    #[test]
    fn test_quoted_string_interpolation() {
        assert_eq!(
            apply(
                "quoted_string_interpolation",
                "const label = 'Count: ${count}';\nalert(\"Hi ${name}!\");"
            ),
            "const label = `Count: ${count}`;\nalert(`Hi ${name}!`);"
        );
        let inside_template = "const s = `said '${x}'`;";
        assert_eq!(apply("quoted_string_interpolation", inside_template), inside_template);
    }

    #[test]
    fn test_unprefixed_hook_skips_declarations_and_members() {
        let src = "function useStateLike() {}\nfunction useState(x) {}\nconst a = React.useState(1);\nconst b = useMemo(() => 1, []);";
        assert_eq!(
            apply("unprefixed_hook", src),
            "function useStateLike() {}\nfunction useState(x) {}\nconst a = React.useState(1);\nconst b = React.useMemo(() => 1, []);"
        );
    }

    #[test]
    fn test_missing_operator_rules() {
        assert_eq!(
            apply("setter_missing_operator", "setCount(count 1)"),
            "setCount(count + 1)"
        );
        assert_eq!(
            apply("arrow_missing_operator", "setCount(prev => prev 1)"),
            "setCount(prev => prev + 1)"
        );
        assert_eq!(
            apply("interpolation_missing_operator", "`Next: ${count 1}`"),
            "`Next: ${count + 1}`"
        );
        assert_eq!(apply("arrow_missing_operator", "() => return 1;"), "() => return 1;");
        assert_eq!(
            apply("interpolation_missing_operator", "`${typeof 1}`"),
            "`${typeof 1}`"
        );
    }

    #[test]
    fn test_unclosed_brackets() {
        assert_eq!(
            apply("unclosed_brackets", "function App() {\n  return (<div>{[1, 2].map(x => x)}</div>"),
            "function App() {\n  return (<div>{[1, 2].map(x => x)}</div>\n)}"
        );
        let in_template = "const s = `open ${";
        assert_eq!(apply("unclosed_brackets", in_template), in_template);
        let mismatched = "function App() { return (]; ";
        assert_eq!(apply("unclosed_brackets", mismatched), mismatched);
    }
}
