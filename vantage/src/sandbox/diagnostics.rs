use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category of a runtime failure observed in the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticClass {
    /// Identifier used but never declared
    ReferenceError(String),
    TypeError,
    SyntaxError,
    InvalidHookCall,
    /// An object was rendered as a React child
    InvalidChild,
    Timeout,
    MissingEntryPoint,
    NoVisibleContent,
    Unknown,
}

/// A classified runtime error, ready to be fed into the next prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDiagnostic {
    pub class: DiagnosticClass,
    pub message: String,
    pub suspected_cause: Option<String>,
    pub suggested_fix: Option<String>,
}

impl RuntimeDiagnostic {
    /// One-line rendering used in fix prompts.
    pub fn to_prompt_line(&self) -> String {
        let mut line = self.message.clone();
        if let Some(cause) = &self.suspected_cause {
            line.push_str(&format!("\n  Suspected cause: {}", cause));
        }
        if let Some(fix) = &self.suggested_fix {
            line.push_str(&format!("\n  Suggested fix: {}", fix));
        }
        line
    }
}

/// Classifies raw runtime error text
pub struct ErrorRefiner {
    missing_app_re: Regex,
    reference_error_re: Regex,
    type_error_re: Regex,
    syntax_error_re: Regex,
    invalid_hook_re: Regex,
    invalid_child_re: Regex,
}

impl Default for ErrorRefiner {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRefiner {
    pub fn new() -> Self {
        Self {
            missing_app_re: Regex::new(
                r"(?:ReferenceError: App is not defined|No App component|App is not a function)",
            )
            .unwrap(),
            reference_error_re: Regex::new(r"ReferenceError: ([A-Za-z_$][\w$]*) is not defined")
                .unwrap(),
            type_error_re: Regex::new(r"TypeError: (.+)").unwrap(),
            syntax_error_re: Regex::new(r"SyntaxError: (.+)").unwrap(),
            invalid_hook_re: Regex::new(
                r"(?:Invalid hook call|Rendered (?:more|fewer) hooks than|Hooks can only be called)",
            )
            .unwrap(),
            invalid_child_re: Regex::new(r"Objects are not valid as a React child").unwrap(),
        }
    }

    /// Classify one runtime error message from the sandbox
    pub fn classify(&self, error: &str) -> RuntimeDiagnostic {
        let message = error.trim().to_string();

        if message.starts_with("Execution timed out") {
            return RuntimeDiagnostic {
                class: DiagnosticClass::Timeout,
                message,
                suspected_cause: Some(
                    "An infinite loop, a state update during render, or a promise that never settles."
                        .to_string(),
                ),
                suggested_fix: Some(
                    "Only update state inside event handlers or React.useEffect with a dependency array; bound every loop."
                        .to_string(),
                ),
            };
        }

        if message.contains("rendered no visible content") {
            return RuntimeDiagnostic {
                class: DiagnosticClass::NoVisibleContent,
                message,
                suspected_cause: Some("App returned null, an empty fragment or only whitespace.".to_string()),
                suggested_fix: Some(
                    "Return visible JSX from App on the first render, even before data is loaded."
                        .to_string(),
                ),
            };
        }

        if self.missing_app_re.is_match(&message) {
            return RuntimeDiagnostic {
                class: DiagnosticClass::MissingEntryPoint,
                message,
                suspected_cause: Some("The code does not define a top-level `App` component.".to_string()),
                suggested_fix: Some(
                    "Declare exactly one `function App() { ... }` at the top level, without export statements."
                        .to_string(),
                ),
            };
        }

        if self.invalid_hook_re.is_match(&message) {
            return RuntimeDiagnostic {
                class: DiagnosticClass::InvalidHookCall,
                message,
                suspected_cause: Some(
                    "A hook is called conditionally, inside a loop, or outside a component body.".to_string(),
                ),
                suggested_fix: Some(
                    "Call React.useState/React.useEffect only at the top level of a component, in the same order on every render."
                        .to_string(),
                ),
            };
        }

        if self.invalid_child_re.is_match(&message) {
            return RuntimeDiagnostic {
                class: DiagnosticClass::InvalidChild,
                message,
                suspected_cause: Some("A plain object or Date is rendered directly inside JSX.".to_string()),
                suggested_fix: Some(
                    "Render individual fields, map arrays to elements, or convert values with String(...).".to_string(),
                ),
            };
        }

        if let Some(caps) = self.reference_error_re.captures(&message) {
            let ident = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let suggested_fix = if ident.starts_with("use") {
                format!("Call the hook as `React.{}`; imports are not available.", ident)
            } else {
                format!(
                    "Declare `{}` before use, or replace it with a browser or React API; imports are not available.",
                    ident
                )
            };
            return RuntimeDiagnostic {
                class: DiagnosticClass::ReferenceError(ident.clone()),
                suspected_cause: Some(format!("`{}` is used but never declared.", ident)),
                message,
                suggested_fix: Some(suggested_fix),
            };
        }

        if let Some(caps) = self.type_error_re.captures(&message) {
            let details = caps.get(1).map_or("", |m| m.as_str());
            let suspected_cause = if details.contains("undefined") || details.contains("null") {
                "A value is read before it exists (undefined or null)."
            } else if details.contains("is not a function") {
                "A value is called as a function but holds something else."
            } else {
                "A value has a different type than the code expects."
            };
            return RuntimeDiagnostic {
                class: DiagnosticClass::TypeError,
                message,
                suspected_cause: Some(suspected_cause.to_string()),
                suggested_fix: Some(
                    "Initialise state with the right shape and guard optional values with `?.` or defaults."
                        .to_string(),
                ),
            };
        }

        if self.syntax_error_re.is_match(&message) {
            return RuntimeDiagnostic {
                class: DiagnosticClass::SyntaxError,
                message,
                suspected_cause: Some(
                    "Unbalanced brackets, a missing operator, or a `${}` outside backticks.".to_string(),
                ),
                suggested_fix: Some(
                    "Check every bracket pair and write dynamic strings as template literals.".to_string(),
                ),
            };
        }

        RuntimeDiagnostic {
            class: DiagnosticClass::Unknown,
            message,
            suspected_cause: None,
            suggested_fix: Some("Review the full error and simplify the failing code path.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reference_error() {
        let refiner = ErrorRefiner::new();
        let d = refiner.classify("ReferenceError: useState is not defined");
        assert!(matches!(d.class, DiagnosticClass::ReferenceError(ref id) if id == "useState"));
        assert!(d.suggested_fix.unwrap().contains("React.useState"));
    }

    #[test]
    fn test_missing_app_wins_over_reference_error() {
        let refiner = ErrorRefiner::new();
        let d = refiner.classify("ReferenceError: App is not defined");
        assert_eq!(d.class, DiagnosticClass::MissingEntryPoint);
    }

    #[test]
    fn test_classify_type_error() {
        let refiner = ErrorRefiner::new();
        let d = refiner.classify("TypeError: Cannot read properties of undefined (reading 'map')");
        assert_eq!(d.class, DiagnosticClass::TypeError);
        assert!(d.suspected_cause.unwrap().contains("undefined"));
    }

    #[test]
    fn test_classify_react_specific() {
        let refiner = ErrorRefiner::new();
        assert_eq!(
            refiner.classify("Error: Invalid hook call. Hooks can only be called inside the body of a function component.").class,
            DiagnosticClass::InvalidHookCall
        );
        assert_eq!(
            refiner.classify("Objects are not valid as a React child (found: object with keys {a})").class,
            DiagnosticClass::InvalidChild
        );
        assert_eq!(
            refiner.classify("Execution timed out after 5000 ms: possible infinite loop or pending async work").class,
            DiagnosticClass::Timeout
        );
    }

    #[test]
    fn test_prompt_line_includes_fix() {
        let d = ErrorRefiner::new().classify("SyntaxError: Unexpected token '}'");
        let line = d.to_prompt_line();
        assert!(line.starts_with("SyntaxError: Unexpected token '}'"));
        assert!(line.contains("Suggested fix:"));
    }
}
