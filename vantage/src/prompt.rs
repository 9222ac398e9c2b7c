//! Prompt construction for generation, fix, update and metadata calls.
//!
//! Every function here is pure string formatting.

use crate::request::{FlowKind, GenerationRequest};
use crate::sandbox::diagnostics::ErrorRefiner;
use serde::{Deserialize, Serialize};

/// Context for a prior failed attempt of the current request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorAttempt {
    /// The attempt number (1-based)
    pub attempt: u32,
    /// The code that failed, when the attempt got that far
    pub code: Option<String>,
    /// The error message
    pub error: String,
    /// Targeted fix guidance, when the error was classified
    #[serde(default)]
    pub guidance: Option<String>,
}

const FORMAT_RULES: &str = r#"
**Output Rules (MANDATORY)**:
1. Start the code with exactly these three comment lines:
   // APP_NAME: <short name>
   // APP_ICON: <single emoji>
   // APP_DESCRIPTION: <one sentence>
2. Define exactly one top-level component: `function App() { ... }`. Helper components go above it.
3. Do NOT write `import` or `export` statements. `React` is a global.
4. Always call hooks through the namespace: `React.useState(...)`, `React.useEffect(...)`, `React.useRef(...)`, `React.useMemo(...)`, `React.useCallback(...)`.
5. Any string containing `${...}` MUST be a template literal wrapped in backticks. Dynamic class names are written as className={`base ${cond ? 'a' : 'b'}`}.
6. Write every arithmetic operator explicitly, e.g. `setCount(count + 1)`.
7. Style with Tailwind utility classes only. No external CSS, fonts or images.
8. Do not use eval, new Function, dangerouslySetInnerHTML, innerHTML, document.write, window.open or navigation APIs.
9. Keep data in component state or localStorage; do not call remote APIs.
10. The file must end with the closing brace of `App`. Return the code in a single ```jsx block with no explanation.
"#;

/// Build the instruction text for one attempt of a request.
///
/// `history` holds the failed attempts of this request so far; it is empty
/// on the first attempt.
pub fn build_prompt(request: &GenerationRequest, history: &[PriorAttempt]) -> String {
    let mut prompt = match request.flow() {
        FlowKind::Create => format!(
            "Generate a self-contained React mini-app for the following request:\n\n**Task**: {}\n",
            request.description()
        ),
        FlowKind::Fix => fix_section(request),
        FlowKind::Update => format!(
            "Update the React component below according to the change request. Keep all existing behaviour that the request does not mention.\n\n**Change Request**: {}\n\n**Current Code**:\n```jsx\n{}\n```\n",
            request.description(),
            request.prior_source().unwrap_or_default()
        ),
    };

    if !history.is_empty() {
        prompt.push_str("\n**Failure History**:\nPrevious attempts at this request failed.\n");
        for attempt in history {
            prompt.push_str(&format!("\n--- Attempt #{} ---\n", attempt.attempt));
            if let Some(ref code) = attempt.code {
                prompt.push_str(&format!("**Failed Code**:\n```jsx\n{}\n```\n", code));
            }
            prompt.push_str(&format!("**Error**:\n{}\n", attempt.error));
            if let Some(ref guidance) = attempt.guidance {
                prompt.push_str(&format!("**Fix guidance**: {}\n", guidance));
            }
        }
        prompt.push_str("\n**Goal**: Analyze why previous attempts failed and generate a corrected version.\n");
    }

    prompt.push_str(FORMAT_RULES);
    prompt
}

fn fix_section(request: &GenerationRequest) -> String {
    let mut section = format!(
        "The React component below fails at runtime. Fix it so it renders without errors.\n\n**App Description**: {}\n\n**Broken Code**:\n```jsx\n{}\n```\n",
        request.description(),
        request.prior_source().unwrap_or_default()
    );
    if !request.prior_errors().is_empty() {
        let refiner = ErrorRefiner::new();
        section.push_str("\n**Observed Errors**:\n");
        for (i, error) in request.prior_errors().iter().enumerate() {
            let diagnostic = refiner.classify(error);
            section.push_str(&format!("{}. {}\n", i + 1, diagnostic.to_prompt_line()));
        }
    }
    section
}

/// Prompt asking for display metadata as a small JSON object.
pub fn metadata_prompt(description: &str) -> String {
    format!(
        "Suggest display metadata for a small web app described as:\n\n{}\n\nRespond with only a JSON object of the form {{\"name\": \"<2-4 words>\", \"icon\": \"<single emoji>\", \"description\": \"<one sentence>\"}}.",
        description
    )
}
