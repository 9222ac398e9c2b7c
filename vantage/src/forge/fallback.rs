//! Deterministic component returned when every create attempt failed.

const MAX_DESCRIPTION_CHARS: usize = 200;
const MAX_NAME_WORDS: usize = 4;

/// Build the fallback component for `description`.
///
/// The description only appears inside a single-line comment without angle
/// brackets and inside a fully escaped string literal, so no description can
/// inject code or trip the validator's denylist.
pub fn fallback_component(description: &str) -> String {
    let summary = summarize(description);
    format!(
        r#"// APP_NAME: {name}
// APP_ICON: 🛠️
// APP_DESCRIPTION: {comment}
function App() {{
  const request = {literal};
  return (
    <div className="min-h-screen flex items-center justify-center bg-gray-50 p-6">
      <div className="max-w-md rounded-xl bg-white p-6 shadow text-center">
        <h1 className="text-xl font-semibold text-gray-800">This app could not be generated</h1>
        <p className="mt-3 text-gray-600">{{request}}</p>
        <p className="mt-4 text-sm text-gray-400">Try rephrasing the request or generating it again.</p>
      </div>
    </div>
  );
}}
"#,
        name = app_name(&summary),
        comment = if summary.is_empty() {
            "Placeholder for a failed generation".to_string()
        } else {
            summary.replace(['<', '>'], "")
        },
        literal = escaped_literal(&summary),
    )
}

/// Single-line, length-capped form of the description.
fn summarize(description: &str) -> String {
    let collapsed = description
        .split(char::is_whitespace)
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed: String = collapsed
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DESCRIPTION_CHARS)
        .collect();
    collapsed.trim_end().to_string()
}

fn app_name(summary: &str) -> String {
    let words: Vec<String> = summary
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(MAX_NAME_WORDS)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Untitled App".to_string()
    } else {
        words.join(" ")
    }
}

/// Double-quoted literal in which everything except lowercase ASCII letters,
/// digits and spaces is a `\u` escape.
fn escaped_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 2 + 2);
    out.push('"');
    for c in value.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' ' {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out.push('"');
    out
}
