//! Harness assets: the Node evaluation harness and the embedding document.

use super::SandboxPage;
use crate::config::SandboxConfig;
use crate::error::{VantageError, VantageResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use vantage_source::prepare_for_eval;

/// Node entry point; mounts `app.js` in a fresh vm context.
pub const HARNESS_JS: &str = include_str!("js/harness.js");
/// Installs the browser-like globals from inside the context.
pub const PRELUDE_JS: &str = include_str!("js/prelude.js");
/// React-compatible runtime evaluated inside the context.
pub const REACT_LITE_JS: &str = include_str!("js/react-lite.js");

pub const HARNESS_FILE: &str = "harness.js";
/// Name the runtime reports once it has loaded.
pub const RUNTIME_NAME: &str = "react-lite 18.2.0";

/// Value for the iframe `sandbox` attribute: scripts only, no same-origin
/// access, no top-level navigation, no forms or popups.
pub const IFRAME_SANDBOX: &str = "allow-scripts";

const REACT_URL: &str = "https://unpkg.com/react@18/umd/react.production.min.js";
const REACT_DOM_URL: &str = "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js";
const BABEL_URL: &str = "https://unpkg.com/@babel/standalone/babel.min.js";
const TAILWIND_URL: &str = "https://cdn.tailwindcss.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageManifest<'a> {
    settle_ms: u64,
    eval_timeout_ms: u64,
    allowed_origins: &'a [String],
}

/// Write the harness, runtime, page manifest and component into `dir`.
/// Returns the harness entry point.
pub async fn write_harness(
    dir: &Path,
    page: &SandboxPage,
    config: &SandboxConfig,
    eval_timeout_ms: u64,
) -> VantageResult<PathBuf> {
    let manifest = PageManifest {
        settle_ms: page.settle_ms,
        eval_timeout_ms,
        allowed_origins: &config.allowed_origins,
    };
    let manifest = serde_json::to_vec_pretty(&manifest)?;

    let files: [(&str, &[u8]); 5] = [
        (HARNESS_FILE, HARNESS_JS.as_bytes()),
        ("prelude.js", PRELUDE_JS.as_bytes()),
        ("react-lite.js", REACT_LITE_JS.as_bytes()),
        ("page.json", &manifest),
        ("app.js", page.script.as_bytes()),
    ];
    for (name, contents) in files {
        fs::write(dir.join(name), contents).await.map_err(|e| {
            VantageError::Sandbox(format!("Failed to write sandbox file {}: {}", name, e))
        })?;
    }
    Ok(dir.join(HARNESS_FILE))
}

/// Content-Security-Policy for an embedding document: scripts, styles and
/// requests only to the allow-listed origins.
pub fn content_security_policy(allowed_origins: &[String]) -> String {
    let origins = allowed_origins.join(" ");
    let connect = if allowed_origins.is_empty() {
        "'none'".to_string()
    } else {
        origins.clone()
    };
    format!(
        "default-src 'none'; script-src 'unsafe-inline' 'unsafe-eval' {origins}; style-src 'unsafe-inline' {origins}; img-src data: blob:; font-src data:; connect-src {connect}; base-uri 'none'; form-action 'none'",
        origins = origins,
        connect = connect
    )
}

/// A self-contained HTML page for live embedding in a sandboxed iframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedDocument {
    html: String,
}

impl EmbedDocument {
    pub fn render(source: &str, title: &str, config: &SandboxConfig) -> Self {
        let csp = content_security_policy(&config.allowed_origins);
        let script = escape_script(&prepare_for_eval(source));
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="Content-Security-Policy" content="{csp}">
<title>{title}</title>
<script src="{react}" crossorigin></script>
<script src="{react_dom}" crossorigin></script>
<script src="{babel}"></script>
<script src="{tailwind}"></script>
<script>
(function () {{
  function post(event) {{
    event.source = 'vantage-sandbox';
    try {{ parent.postMessage(event, '*'); }} catch (e) {{}}
  }}
  function text(args) {{
    return Array.prototype.map.call(args, function (a) {{
      return a && a.message ? a.message : String(a);
    }}).join(' ');
  }}
  var origError = console.error;
  console.error = function () {{
    var message = text(arguments);
    post({{ type: /^Warning:/.test(message) ? 'warning' : 'error', message: message }});
    origError.apply(console, arguments);
  }};
  var origWarn = console.warn;
  console.warn = function () {{
    post({{ type: 'warning', message: text(arguments) }});
    origWarn.apply(console, arguments);
  }};
  window.addEventListener('error', function (e) {{
    post({{ type: 'error', message: e.error && e.error.message ? e.error.name + ': ' + e.error.message : String(e.message) }});
  }});
  window.addEventListener('unhandledrejection', function (e) {{
    post({{ type: 'error', message: 'Unhandled promise rejection: ' + (e.reason && e.reason.message ? e.reason.message : String(e.reason)) }});
  }});
  window.__vantageReport = function () {{
    var root = document.getElementById('root');
    var visible = !!root && (root.textContent.trim().length > 0 || !!root.querySelector('img,svg,canvas,input,button,textarea,select,video,hr,progress'));
    post({{ type: 'rendered', visible: visible, html_length: root ? root.innerHTML.length : 0 }});
    if (visible) post({{ type: 'complete' }});
    return visible;
  }};
}})();
</script>
</head>
<body>
<div id="root"></div>
<script type="text/babel" data-presets="react">
{script}
;(function () {{
  if (typeof App === 'undefined') {{
    console.error('No App component defined: expected `function App()` at the top level');
    return;
  }}
  ReactDOM.createRoot(document.getElementById('root')).render(React.createElement(App));
  var timer = setInterval(function () {{
    if (window.__vantageReport()) clearInterval(timer);
  }}, 100);
}})();
</script>
</body>
</html>
"#,
            csp = escape_html(&csp),
            title = escape_html(title),
            react = REACT_URL,
            react_dom = REACT_DOM_URL,
            babel = BABEL_URL,
            tailwind = TAILWIND_URL,
            script = script,
        );
        Self { html }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// The document escaped for use inside a `srcdoc="..."` attribute.
    pub fn srcdoc_attribute(&self) -> String {
        escape_html(&self.html)
    }

    /// A complete iframe element embedding the document.
    pub fn iframe_tag(&self, title: &str) -> String {
        format!(
            r#"<iframe sandbox="{}" title="{}" srcdoc="{}"></iframe>"#,
            IFRAME_SANDBOX,
            escape_html(title),
            self.srcdoc_attribute()
        )
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Keep a component from closing its own script element.
fn escape_script(source: &str) -> String {
    source.replace("</script", "<\\/script")
}
