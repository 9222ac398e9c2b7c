//! JSX lowering.
//!
//! Rewrites JSX elements and fragments into `React.createElement` calls so the
//! component can run in a plain JavaScript engine. Everything that is not JSX
//! is copied through untouched, including strings, templates and comments.
//!
//! This is a small recursive-descent pass, not a JavaScript parser. It decides
//! whether `<` opens an element from the preceding code token, which is enough
//! for the component shapes the prompt asks for.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsxError {
    #[error("unexpected end of input inside {context} (line {line})")]
    UnexpectedEof { context: &'static str, line: usize },
    #[error("closing tag </{found}> does not match <{expected}> (line {line})")]
    MismatchedTag {
        expected: String,
        found: String,
        line: usize,
    },
    #[error("invalid JSX at line {line}: {message}")]
    Invalid { message: String, line: usize },
}

/// Lower every JSX expression in `src`.
pub fn lower_jsx(src: &str) -> Result<String, JsxError> {
    let mut lowerer = Lowerer { src, pos: 0 };
    let out = lowerer.code(false)?;
    Ok(out)
}

struct Lowerer<'a> {
    src: &'a str,
    pos: usize,
}

const JSX_PRECEDERS: &[char] = &[
    '(', ',', '=', '?', ':', '[', '{', '}', ';', '!', '&', '|', '>',
];
const JSX_KEYWORDS: &[&str] = &["return", "yield", "default", "await", "case"];

impl<'a> Lowerer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn line(&self) -> usize {
        self.src[..self.pos.min(self.src.len())].matches('\n').count() + 1
    }

    fn eof(&self, context: &'static str) -> JsxError {
        JsxError::UnexpectedEof {
            context,
            line: self.line(),
        }
    }

    /// Copy the next char (whole UTF-8 sequence) to `out`.
    fn bump_into(&mut self, out: &mut String) {
        if let Some(c) = self.src[self.pos..].chars().next() {
            out.push(c);
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Lower plain code. With `until_brace`, stop before the `}` that closes
    /// the enclosing expression container or template interpolation.
    fn code(&mut self, until_brace: bool) -> Result<String, JsxError> {
        let mut out = String::new();
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'/' if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump_into(&mut out);
                    }
                }
                b'/' if self.peek_at(1) == Some(b'*') => {
                    let end = self.src[self.pos + 2..]
                        .find("*/")
                        .map(|i| self.pos + 2 + i + 2)
                        .ok_or_else(|| self.eof("block comment"))?;
                    out.push_str(&self.src[self.pos..end]);
                    self.pos = end;
                }
                b'\'' | b'"' => self.string(&mut out)?,
                b'`' => self.template(&mut out)?,
                b'{' => {
                    depth += 1;
                    self.bump_into(&mut out);
                }
                b'}' => {
                    if depth == 0 && until_brace {
                        return Ok(out);
                    }
                    depth = depth.saturating_sub(1);
                    self.bump_into(&mut out);
                }
                b'<' if self.opens_element(&out) => {
                    let element = self.element()?;
                    out.push_str(&element);
                }
                _ => self.bump_into(&mut out),
            }
        }
        if until_brace {
            return Err(self.eof("expression"));
        }
        Ok(out)
    }

    fn opens_element(&self, out: &str) -> bool {
        match self.peek_at(1) {
            Some(b) if b.is_ascii_alphabetic() || b == b'>' => {}
            _ => return false,
        }
        let before = out.trim_end();
        let Some(last) = before.chars().last() else {
            return true;
        };
        if JSX_PRECEDERS.contains(&last) {
            return true;
        }
        let word = before
            .rsplit(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .next()
            .unwrap_or("");
        JSX_KEYWORDS.contains(&word)
    }

    fn string(&mut self, out: &mut String) -> Result<(), JsxError> {
        let quote = self.peek().ok_or_else(|| self.eof("string"))?;
        self.bump_into(out);
        while let Some(b) = self.peek() {
            match b {
                b'\\' => {
                    self.bump_into(out);
                    self.bump_into(out);
                }
                b'\n' => return Ok(()),
                _ if b == quote => {
                    self.bump_into(out);
                    return Ok(());
                }
                _ => self.bump_into(out),
            }
        }
        Ok(())
    }

    fn template(&mut self, out: &mut String) -> Result<(), JsxError> {
        self.bump_into(out);
        while let Some(b) = self.peek() {
            match b {
                b'\\' => {
                    self.bump_into(out);
                    self.bump_into(out);
                }
                b'`' => {
                    self.bump_into(out);
                    return Ok(());
                }
                b'$' if self.peek_at(1) == Some(b'{') => {
                    out.push_str("${");
                    self.pos += 2;
                    let inner = self.code(true)?;
                    out.push_str(&inner);
                    out.push('}');
                    self.pos += 1;
                }
                _ => self.bump_into(out),
            }
        }
        Err(self.eof("template literal"))
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'.' | b'-' | b':') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    /// Parse one element or fragment starting at `<`.
    fn element(&mut self) -> Result<String, JsxError> {
        self.pos += 1;
        if self.peek() == Some(b'>') {
            self.pos += 1;
            let children = self.children("")?;
            return Ok(create_element("React.Fragment", "null", &children));
        }

        let tag = self.name();
        if tag.is_empty() {
            return Err(JsxError::Invalid {
                message: "missing tag name".to_string(),
                line: self.line(),
            });
        }
        let element_type = if tag.starts_with(|c: char| c.is_ascii_lowercase()) && !tag.contains('.') {
            js_string(&tag)
        } else {
            tag.clone()
        };

        let mut props: Vec<String> = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.eof("tag")),
                Some(b'/') if self.peek_at(1) == Some(b'>') => {
                    self.pos += 2;
                    return Ok(create_element(&element_type, &props_object(&props), &[]));
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(b'{') => {
                    self.pos += 1;
                    let inner = self.code(true)?;
                    self.pos += 1;
                    let inner = inner.trim();
                    let spread = inner.strip_prefix("...").ok_or_else(|| JsxError::Invalid {
                        message: "expected spread attribute".to_string(),
                        line: self.line(),
                    })?;
                    props.push(format!("...{}", spread.trim()));
                }
                Some(_) => {
                    let name = self.name();
                    if name.is_empty() {
                        return Err(JsxError::Invalid {
                            message: format!("unexpected character in <{}>", tag),
                            line: self.line(),
                        });
                    }
                    self.skip_ws();
                    let value = if self.peek() == Some(b'=') {
                        self.pos += 1;
                        self.skip_ws();
                        self.attribute_value()?
                    } else {
                        "true".to_string()
                    };
                    props.push(format!("{}: {}", prop_key(&name), value));
                }
            }
        }

        let children = self.children(&tag)?;
        Ok(create_element(&element_type, &props_object(&props), &children))
    }

    fn attribute_value(&mut self) -> Result<String, JsxError> {
        match self.peek() {
            Some(q @ (b'"' | b'\'')) => {
                self.pos += 1;
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b == q {
                        let raw = &self.src[start..self.pos];
                        self.pos += 1;
                        return Ok(js_string(&decode_entities(raw)));
                    }
                    self.pos += 1;
                }
                Err(self.eof("attribute value"))
            }
            Some(b'{') => {
                self.pos += 1;
                let inner = self.code(true)?;
                self.pos += 1;
                Ok(inner.trim().to_string())
            }
            Some(b'<') => self.element(),
            _ => Err(JsxError::Invalid {
                message: "expected attribute value".to_string(),
                line: self.line(),
            }),
        }
    }

    /// Children up to and including the closing tag for `tag` (`""` for fragments).
    fn children(&mut self, tag: &str) -> Result<Vec<String>, JsxError> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.eof("element children")),
                Some(b'<') if self.peek_at(1) == Some(b'/') => {
                    self.pos += 2;
                    self.skip_ws();
                    let found = self.name();
                    self.skip_ws();
                    if self.peek() != Some(b'>') {
                        return Err(self.eof("closing tag"));
                    }
                    self.pos += 1;
                    if found != tag {
                        return Err(JsxError::MismatchedTag {
                            expected: tag.to_string(),
                            found,
                            line: self.line(),
                        });
                    }
                    return Ok(children);
                }
                Some(b'<') => children.push(self.element()?),
                Some(b'{') => {
                    self.pos += 1;
                    let inner = self.code(true)?;
                    self.pos += 1;
                    if !is_empty_expression(&inner) {
                        children.push(inner.trim().to_string());
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    while let Some(b) = self.peek() {
                        if b == b'<' || b == b'{' {
                            break;
                        }
                        self.pos += 1;
                    }
                    let text = clean_text(&self.src[start..self.pos]);
                    if !text.is_empty() {
                        children.push(js_string(&decode_entities(&text)));
                    }
                }
            }
        }
    }
}

fn create_element(element_type: &str, props: &str, children: &[String]) -> String {
    let mut out = format!("React.createElement({}, {}", element_type, props);
    for child in children {
        out.push_str(", ");
        out.push_str(child);
    }
    out.push(')');
    out
}

fn props_object(props: &[String]) -> String {
    if props.is_empty() {
        "null".to_string()
    } else {
        format!("{{{}}}", props.join(", "))
    }
}

fn prop_key(name: &str) -> String {
    let is_ident = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if is_ident {
        name.to_string()
    } else {
        js_string(name)
    }
}

/// `{}` and `{/* comment */}` render nothing.
fn is_empty_expression(inner: &str) -> bool {
    let mut rest = inner.trim();
    while let Some(after) = rest.strip_prefix("/*") {
        match after.find("*/") {
            Some(end) => rest = after[end + 2..].trim(),
            None => return false,
        }
    }
    while let Some(after) = rest.strip_prefix("//") {
        rest = after.find('\n').map(|i| after[i..].trim()).unwrap_or("");
    }
    rest.is_empty()
}

/// JSX text whitespace: lines are trimmed, blank lines dropped, line breaks
/// between non-blank lines become a single space.
fn clean_text(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let ends_with_newline = raw.ends_with('\n');
    let count = lines.len() + usize::from(ends_with_newline);
    let last_non_empty = lines.iter().rposition(|l| !l.trim().is_empty());
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut piece = line.replace('\t', " ");
        if i != 0 {
            piece = piece.trim_start_matches(' ').to_string();
        }
        if i + 1 != count {
            piece = piece.trim_end_matches(' ').to_string();
        }
        if piece.is_empty() {
            continue;
        }
        out.push_str(&piece);
        if Some(i) != last_non_empty {
            out.push(' ');
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", "\u{a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&copy;", "©")
        .replace("&times;", "×")
        .replace("&amp;", "&")
}

/// Double-quoted JavaScript string literal.
pub fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_element() {
        assert_eq!(
            lower_jsx("const el = <div className=\"p-4\">Hello</div>;").unwrap(),
            "const el = React.createElement(\"div\", {className: \"p-4\"}, \"Hello\");"
        );
    }

    #[test]
    fn test_component_self_closing_and_expressions() {
        assert_eq!(
            lower_jsx("return <Counter start={5} onChange={(v) => setN(v)} disabled />;").unwrap(),
            "return React.createElement(Counter, {start: 5, onChange: (v) => setN(v), disabled: true});"
        );
    }

    #[test]
    fn test_fragment_nested_and_children_expressions() {
        let src = "return (\n  <>\n    <h1>Count: {count}</h1>\n    {items.map(i => <li key={i}>{i}</li>)}\n    {/* note */}\n  </>\n);";
        assert_eq!(
            lower_jsx(src).unwrap(),
            "return (\n  React.createElement(React.Fragment, null, React.createElement(\"h1\", null, \"Count: \", count), items.map(i => React.createElement(\"li\", {key: i}, i)))\n);"
        );
    }

    #[test]
    fn test_spread_and_dashed_attributes() {
        assert_eq!(
            lower_jsx("<input {...rest} aria-label='Name' value={v} />").unwrap(),
            "React.createElement(\"input\", {...rest, \"aria-label\": \"Name\", value: v})"
        );
    }

    #[test]
    fn test_comparisons_and_strings_are_not_jsx() {
        let src = "for (let i = 0; i < n; i++) { const s = '<b>'; const t = `<i>${a < b}</i>`; }";
        assert_eq!(lower_jsx(src).unwrap(), src);
    }

    #[test]
    fn test_template_class_name_and_conditional() {
        let src = "return ok ? <p className={`a ${on ? 'x' : 'y'}`}>Don&apos;t</p> : null;";
        assert_eq!(
            lower_jsx(src).unwrap(),
            "return ok ? React.createElement(\"p\", {className: `a ${on ? 'x' : 'y'}`}, \"Don't\") : null;"
        );
    }

    #[test]
    fn test_multiline_text_whitespace() {
        let src = "<p>\n  Hello\n  world  \n</p>";
        assert_eq!(
            lower_jsx(src).unwrap(),
            "React.createElement(\"p\", null, \"Hello world\")"
        );
    }

    #[test]
    fn test_member_expression_tag() {
        assert_eq!(
            lower_jsx("<Ctx.Provider value={v}><App /></Ctx.Provider>").unwrap(),
            "React.createElement(Ctx.Provider, {value: v}, React.createElement(App, null))"
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            lower_jsx("return <div><span></div>;"),
            Err(JsxError::MismatchedTag { .. })
        ));
        assert!(matches!(
            lower_jsx("return (<div>"),
            Err(JsxError::UnexpectedEof { .. })
        ));
    }
}
