//! Lexical neutralization for generated component source.
//!
//! The repair rules and the structural validator never parse JavaScript. They
//! work on text, and the only lexical knowledge they need is "which bytes are
//! code". This module blanks string, template, regex and comment bodies so
//! that bracket counting and pattern checks only see code-level characters.
//!
//! Blanking replaces every byte of a body with an ASCII space (newlines are
//! kept), so byte offsets in the neutralized text line up with the input.

/// Where the scanner stopped when it reached the end of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Code,
    SingleQuote,
    DoubleQuote,
    Template,
    Regex,
    LineComment,
    BlockComment,
}

/// What to blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeutralizeOptions {
    pub strings: bool,
    pub comments: bool,
}

impl NeutralizeOptions {
    pub const ALL: NeutralizeOptions = NeutralizeOptions {
        strings: true,
        comments: true,
    };

    pub const COMMENTS_ONLY: NeutralizeOptions = NeutralizeOptions {
        strings: false,
        comments: true,
    };
}

/// Result of a scan: the neutralized text plus the state at end of input.
#[derive(Debug, Clone)]
pub struct Scan {
    pub text: String,
    /// Per input byte: true when the byte is code (string delimiters included).
    pub code: Vec<bool>,
    pub end_state: ScanState,
    /// Number of template literals (or their `${}` interpolations) still open at the end.
    pub open_templates: usize,
}

impl Scan {
    /// True when the input ended in plain code, so text appended after it is code too.
    /// A trailing line comment counts as clean because a newline terminates it.
    pub fn ends_in_code(&self) -> bool {
        matches!(self.end_state, ScanState::Code | ScanState::LineComment)
            && self.open_templates == 0
    }

    /// True when the byte at `offset` is code rather than string, template or comment body.
    pub fn is_code_at(&self, offset: usize) -> bool {
        self.code.get(offset).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Template,
    Interpolation { depth: usize },
}

/// Blank strings, templates, regex literals and comments.
pub fn neutralize(src: &str) -> String {
    scan(src, NeutralizeOptions::ALL).text
}

/// Blank comments only; string contents stay visible.
pub fn strip_comments(src: &str) -> String {
    scan(src, NeutralizeOptions::COMMENTS_ONLY).text
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Keywords after which a `/` starts an expression, not a division.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "case",
    "do",
    "else",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "instanceof",
    "yield",
    "await",
];

/// Whether a `/` at `i` opens a regex literal, judged from the previous
/// significant code byte. `<` and `>` are excluded so JSX `</tag>` and
/// `/>` stay code, and `}` and `)` are treated as ending an operand.
fn regex_may_start(bytes: &[u8], i: usize, last: Option<usize>) -> bool {
    if bytes.get(i + 1) == Some(&b'>') {
        return false;
    }
    let Some(pos) = last else {
        return true;
    };
    match bytes[pos] {
        b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b';' | b'+'
        | b'-' | b'*' | b'%' | b'~' | b'^' => true,
        b if is_word_byte(b) => {
            let start = bytes[..=pos]
                .iter()
                .rposition(|&c| !is_word_byte(c))
                .map_or(0, |p| p + 1);
            let word = &bytes[start..=pos];
            EXPRESSION_KEYWORDS.iter().any(|k| k.as_bytes() == word)
        }
        _ => false,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    Code,
    Str,
    Comment,
}

/// Run the scanner over `src`.
///
/// Quote characters directly preceded by a word character (`Don't`, `5'`) are
/// treated as text, not as string openers: that never happens in valid code but
/// happens constantly in JSX text. Single- and double-quoted strings also end at
/// an unescaped newline, which bounds the damage of a stray quote to one line.
/// Regex literals are recognized from the preceding token and are likewise
/// bounded by the line.
pub fn scan(src: &str, opts: NeutralizeOptions) -> Scan {
    let bytes = src.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut code: Vec<bool> = Vec::with_capacity(bytes.len());
    let mut state = ScanState::Code;
    let mut frames: Vec<Frame> = Vec::new();
    // Last significant byte outside comments
    let mut last_code: Option<usize> = None;
    let mut in_class = false;
    let mut i = 0;

    let mut emit = |b: u8, class: Class| {
        let blanked = match class {
            Class::Code => false,
            Class::Str => opts.strings,
            Class::Comment => opts.comments,
        };
        out.push(if blanked && b != b'\n' { b' ' } else { b });
        code.push(class == Class::Code);
    };

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            ScanState::Code => {
                match b {
                    b'/' if next == Some(b'/') => {
                        state = ScanState::LineComment;
                        emit(b, Class::Comment);
                        emit(b'/', Class::Comment);
                        i += 2;
                        continue;
                    }
                    b'/' if next == Some(b'*') => {
                        state = ScanState::BlockComment;
                        emit(b, Class::Comment);
                        emit(b'*', Class::Comment);
                        i += 2;
                        continue;
                    }
                    b'/' if regex_may_start(bytes, i, last_code) => {
                        emit(b, Class::Code);
                        state = ScanState::Regex;
                        in_class = false;
                    }
                    b'\'' | b'"' => {
                        let after_word = i > 0 && is_word_byte(bytes[i - 1]);
                        emit(b, Class::Code);
                        if !after_word {
                            state = if b == b'\'' {
                                ScanState::SingleQuote
                            } else {
                                ScanState::DoubleQuote
                            };
                        }
                    }
                    b'`' => {
                        emit(b, Class::Code);
                        frames.push(Frame::Template);
                        state = ScanState::Template;
                    }
                    b'{' => {
                        if let Some(Frame::Interpolation { depth }) = frames.last_mut() {
                            *depth += 1;
                        }
                        emit(b, Class::Code);
                    }
                    b'}' => match frames.last_mut() {
                        Some(Frame::Interpolation { depth }) if *depth == 0 => {
                            frames.pop();
                            state = ScanState::Template;
                            emit(b, Class::Str);
                        }
                        Some(Frame::Interpolation { depth }) => {
                            *depth -= 1;
                            emit(b, Class::Code);
                        }
                        _ => emit(b, Class::Code),
                    },
                    _ => emit(b, Class::Code),
                }
                if !b.is_ascii_whitespace() {
                    last_code = Some(i);
                }
            }
            ScanState::SingleQuote | ScanState::DoubleQuote => {
                last_code = Some(i);
                let quote = if state == ScanState::SingleQuote {
                    b'\''
                } else {
                    b'"'
                };
                if b == b'\\' {
                    emit(b, Class::Str);
                    if let Some(n) = next {
                        emit(n, Class::Str);
                        i += 2;
                        continue;
                    }
                } else if b == quote || b == b'\n' {
                    emit(b, Class::Code);
                    state = ScanState::Code;
                } else {
                    emit(b, Class::Str);
                }
            }
            ScanState::Template => {
                last_code = Some(i);
                if b == b'\\' {
                    emit(b, Class::Str);
                    if let Some(n) = next {
                        emit(n, Class::Str);
                        i += 2;
                        continue;
                    }
                } else if b == b'`' {
                    emit(b, Class::Code);
                    frames.pop();
                    state = ScanState::Code;
                } else if b == b'$' && next == Some(b'{') {
                    emit(b, Class::Str);
                    emit(b'{', Class::Str);
                    frames.push(Frame::Interpolation { depth: 0 });
                    state = ScanState::Code;
                    last_code = Some(i + 1);
                    i += 2;
                    continue;
                } else {
                    emit(b, Class::Str);
                }
            }
            ScanState::Regex => {
                if b == b'\\' {
                    emit(b, Class::Str);
                    if let Some(n) = next.filter(|&n| n != b'\n') {
                        emit(n, Class::Str);
                        i += 2;
                        continue;
                    }
                } else if b == b'\n' || (b == b'/' && !in_class) {
                    emit(b, Class::Code);
                    state = ScanState::Code;
                    last_code = Some(i);
                } else {
                    match b {
                        b'[' => in_class = true,
                        b']' => in_class = false,
                        _ => {}
                    }
                    emit(b, Class::Str);
                }
            }
            ScanState::LineComment => {
                if b == b'\n' {
                    emit(b, Class::Code);
                    state = ScanState::Code;
                } else {
                    emit(b, Class::Comment);
                }
            }
            ScanState::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    emit(b, Class::Comment);
                    emit(b'/', Class::Comment);
                    state = ScanState::Code;
                    i += 2;
                    continue;
                }
                emit(b, Class::Comment);
            }
        }
        i += 1;
    }

    // Only ASCII bytes were replaced, and always whole multi-byte sequences
    // (continuation bytes are never delimiters), so the buffer stays UTF-8.
    let text = String::from_utf8(out)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());

    Scan {
        text,
        code,
        end_state: state,
        open_templates: frames.len(),
    }
}

/// Bracket accounting over neutralized text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BracketReport {
    pub braces: (usize, usize),
    pub parens: (usize, usize),
    pub squares: (usize, usize),
    /// Openers still pending at end of input, innermost last.
    pub unclosed: Vec<char>,
    /// A closer that did not match the innermost opener.
    pub mismatched: bool,
}

impl BracketReport {
    pub fn is_balanced(&self) -> bool {
        self.braces.0 == self.braces.1
            && self.parens.0 == self.parens.1
            && self.squares.0 == self.squares.1
    }

    /// Human-readable summary of every unbalanced kind.
    pub fn imbalances(&self) -> Vec<String> {
        let mut found = Vec::new();
        for (label, (open, close)) in [
            ("braces {}", self.braces),
            ("parentheses ()", self.parens),
            ("brackets []", self.squares),
        ] {
            if open != close {
                found.push(format!(
                    "Unbalanced {}: {} opening vs {} closing",
                    label, open, close
                ));
            }
        }
        found
    }
}

/// Count brackets in already-neutralized text.
pub fn bracket_report(neutralized: &str) -> BracketReport {
    let mut report = BracketReport::default();
    let mut stack: Vec<char> = Vec::new();
    for c in neutralized.chars() {
        match c {
            '{' => {
                report.braces.0 += 1;
                stack.push(c);
            }
            '(' => {
                report.parens.0 += 1;
                stack.push(c);
            }
            '[' => {
                report.squares.0 += 1;
                stack.push(c);
            }
            '}' | ')' | ']' => {
                match c {
                    '}' => report.braces.1 += 1,
                    ')' => report.parens.1 += 1,
                    _ => report.squares.1 += 1,
                }
                let expected = match c {
                    '}' => '{',
                    ')' => '(',
                    _ => '[',
                };
                if stack.last() == Some(&expected) {
                    stack.pop();
                } else {
                    report.mismatched = true;
                }
            }
            _ => {}
        }
    }
    report.unclosed = stack;
    report
}

pub fn closer_for(open: char) -> char {
    match open {
        '{' => '}',
        '(' => ')',
        _ => ']',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_neutralize_keeps_offsets() {
        let src = "const a = '{'; // }\nlet b = \"(\";";
        let out = neutralize(src);
        assert_eq!(out.len(), src.len());
        assert_eq!(out, "const a = ' ';     \nlet b = \" \";");
    }

    #[test]
    fn test_template_interpolation_is_code() {
        let src = "const s = `a { ${fn({x: 1})} b`;";
        let scanned = scan(src, NeutralizeOptions::ALL);
        assert!(scanned.ends_in_code());
        let report = bracket_report(&scanned.text);
        assert!(report.is_balanced(), "{:?}", report);
        assert!(scanned.text.contains("fn({x: 1})"));
        assert!(!scanned.text.contains("a {"));
    }

    #[test]
    fn test_nested_template_in_interpolation() {
        let src = "`outer ${cond ? `inner ${x}` : '}'} done`";
        let scanned = scan(src, NeutralizeOptions::ALL);
        assert!(scanned.ends_in_code());
        assert!(bracket_report(&scanned.text).is_balanced());
    }

    #[test]
    fn test_apostrophe_in_jsx_text_is_not_a_string() {
        let src = "<p>Don't {count}</p>\n<span>{(a)}</span>";
        let report = bracket_report(&neutralize(src));
        assert!(report.is_balanced(), "{:?}", report);
        assert_eq!(report.braces, (2, 2));
    }

    #[test]
    fn test_unterminated_template_is_not_code() {
        let scanned = scan("const s = `abc ${x", NeutralizeOptions::ALL);
        assert!(!scanned.ends_in_code());
        let scanned = scan("/* open", NeutralizeOptions::ALL);
        assert_eq!(scanned.end_state, ScanState::BlockComment);
    }

    #[test]
    fn test_regex_literal_body_is_blanked() {
        let src = "if (/^https?:\\/\\//.test(url)) {\n  open(url);\n}";
        let scanned = scan(src, NeutralizeOptions::ALL);
        assert!(scanned.ends_in_code());
        assert_eq!(
            scanned.text.lines().next().unwrap(),
            "if (/            /.test(url)) {"
        );
        assert!(bracket_report(&scanned.text).is_balanced());
    }

    #[test]
    fn test_regex_class_may_hold_a_slash() {
        let src = "const parts = path.split(/[/\\\\]+/); return /}/.test(s);";
        let report = bracket_report(&neutralize(src));
        assert!(report.is_balanced(), "{:?}", report);
        assert_eq!(report.parens, (2, 2));
        assert_eq!(report.braces, (0, 0));
    }

    #[test]
    fn test_division_and_jsx_closers_stay_code() {
        let src = "const r = (a + b) / 2 / total;\n<div>{r}</div>\n<img src={x} />";
        let out = neutralize(src);
        assert_eq!(out, src);
    }

    #[test]
    fn test_code_mask() {
        let src = "f('a') // b\n`t ${x}`";
        let scanned = scan(src, NeutralizeOptions::ALL);
        assert!(scanned.is_code_at(0));
        assert!(scanned.is_code_at(2));
        assert!(!scanned.is_code_at(3));
        assert!(!scanned.is_code_at(src.find('b').unwrap()));
        assert!(!scanned.is_code_at(src.find('t').unwrap()));
        assert!(scanned.is_code_at(src.find('x').unwrap()));
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let out = strip_comments("eval('x') // eval(y)");
        assert!(out.contains("eval('x')"));
        assert!(!out.contains("eval(y)"));
    }

    #[test]
    fn test_bracket_report_unclosed_stack() {
        let report = bracket_report("function App() { return (<div>[");
        assert_eq!(report.unclosed, vec!['{', '(', '[']);
        assert!(!report.mismatched);
        assert_eq!(report.imbalances().len(), 3);
    }
}
