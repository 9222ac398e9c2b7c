//! Pulling component code out of a model response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static OPEN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*\r?$").unwrap());
static CLOSE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*```[ \t]*\r?$").unwrap());

static PREAMBLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*//[ \t]*APP_(NAME|ICON|DESCRIPTION)[ \t]*:[ \t]*(.*?)[ \t]*\r?$").unwrap()
});

static IMPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*import\b[^\n]*(?:from\s*)?['"][^'"\n]+['"];?[ \t]*\r?\n?"#).unwrap());
static EXPORT_DEFAULT_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s+default\s+[A-Za-z_$][\w$]*[ \t]*;?[ \t]*\r?(?:\n|\z)").unwrap());
static EXPORT_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+(?:default\s+)?").unwrap());
static RENDER_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:ReactDOM\.(?:render|createRoot)|createRoot)\([^\n]*\r?\n?").unwrap()
});

/// Return the code inside the first fenced block, or the trimmed response when
/// there is no fence. An opening fence with no closing fence yields everything
/// after the opener (the model was cut off mid-block).
pub fn extract_code_block(response: &str) -> String {
    let Some(open) = OPEN_FENCE.find(response) else {
        return response.trim().to_string();
    };
    let body_start = (open.end() + 1).min(response.len());
    let body = &response[body_start..];
    match CLOSE_FENCE.find(body) {
        Some(close) => body[..close.start()].trim_end().to_string(),
        None => body.trim_end().to_string(),
    }
}

/// Metadata lines at the top of a generated component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPreamble {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
}

impl AppPreamble {
    pub fn parse(source: &str) -> Self {
        let mut preamble = AppPreamble::default();
        for caps in PREAMBLE_LINE.captures_iter(source) {
            let value = caps[2].trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &caps[1] {
                "NAME" => &mut preamble.name,
                "ICON" => &mut preamble.icon,
                _ => &mut preamble.description,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        preamble
    }

    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.icon.is_some() && self.description.is_some()
    }

    /// Render the three preamble lines, falling back to the given defaults.
    pub fn render(&self, default_name: &str) -> String {
        format!(
            "// APP_NAME: {}\n// APP_ICON: {}\n// APP_DESCRIPTION: {}\n",
            self.name.as_deref().unwrap_or(default_name),
            self.icon.as_deref().unwrap_or("✨"),
            self.description.as_deref().unwrap_or(default_name),
        )
    }
}

/// Make a component evaluable as a plain script: drop module syntax and any
/// self-mounting render call, the host does the mounting.
pub fn prepare_for_eval(source: &str) -> String {
    let text = IMPORT_LINE.replace_all(source, "");
    let text = EXPORT_DEFAULT_IDENT.replace_all(&text, "");
    let text = EXPORT_KEYWORD.replace_all(&text, "$1");
    let text = RENDER_CALL.replace_all(&text, "");
    text.into_owned()
}
