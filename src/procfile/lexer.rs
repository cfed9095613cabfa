// src/procfile/lexer.rs

//! Shell-style tokenisation of Procfile declaration lines, plus the
//! physical-line plumbing (continuations, indentation) the parser builds on.
//!
//! Quoting rules:
//! - `'…'` is literal, no escapes, must close on the same logical line.
//! - `"…"` honours `\n \t \r \\ \" \0`; any other escaped char passes
//!   through unchanged.
//! - A backslash outside quotes escapes the next character.
//! - Adjacent runs without whitespace concatenate into one token, so
//!   `ready=exec:'pg_isready -q'` is a single token.
//! - A `:` followed by whitespace or end-of-line separates the declaration
//!   from the command; any other `:` is an ordinary character (this is what
//!   lets `ready=http:8080/health` tokenise).

use crate::errors::Diagnostic;

/// One declaration-side token with its 1-based starting column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub col: usize,
}

/// Tokenise everything before the separator colon.
///
/// Returns the tokens and, when a separator was found, the byte offset just
/// past it (the start of the command side). `None` means the line has no
/// separator at all.
pub fn tokenize_declaration(
    line: &str,
    line_no: usize,
) -> Result<(Vec<Token>, Option<usize>), Diagnostic> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let mut tokens = Vec::new();
    let mut i = 0;

    loop {
        while matches!(at(i), Some(' ') | Some('\t')) {
            i += 1;
        }
        match at(i) {
            None => return Ok((tokens, None)),
            Some(':') if is_separator(&chars, i) => {
                return Ok((tokens, Some(chars[i].0 + 1)));
            }
            _ => {}
        }

        let start_col = i + 1;
        let mut text = String::new();
        loop {
            match at(i) {
                None | Some(' ') | Some('\t') => break,
                Some(':') if is_separator(&chars, i) => break,
                Some('\'') => {
                    let quote_col = i + 1;
                    i += 1;
                    loop {
                        match at(i) {
                            None => {
                                return Err(Diagnostic::at_col(
                                    line_no,
                                    quote_col,
                                    "unterminated single quote",
                                ))
                            }
                            Some('\'') => {
                                i += 1;
                                break;
                            }
                            Some(c) => {
                                text.push(c);
                                i += 1;
                            }
                        }
                    }
                }
                Some('"') => {
                    let quote_col = i + 1;
                    i += 1;
                    loop {
                        match at(i) {
                            None => {
                                return Err(Diagnostic::at_col(
                                    line_no,
                                    quote_col,
                                    "unterminated double quote",
                                ))
                            }
                            Some('"') => {
                                i += 1;
                                break;
                            }
                            Some('\\') => {
                                i += 1;
                                match at(i) {
                                    None => {
                                        return Err(Diagnostic::at_col(
                                            line_no,
                                            i,
                                            "trailing escape",
                                        ))
                                    }
                                    Some(c) => {
                                        text.push(unescape(c));
                                        i += 1;
                                    }
                                }
                            }
                            Some(c) => {
                                text.push(c);
                                i += 1;
                            }
                        }
                    }
                }
                Some('\\') => {
                    i += 1;
                    match at(i) {
                        None => {
                            return Err(Diagnostic::at_col(line_no, i, "trailing escape"))
                        }
                        Some(c) => {
                            text.push(c);
                            i += 1;
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    i += 1;
                }
            }
        }
        tokens.push(Token { text, col: start_col });
    }
}

fn is_separator(chars: &[(usize, char)], i: usize) -> bool {
    match chars.get(i + 1) {
        None => true,
        Some(&(_, c)) => c == ' ' || c == '\t',
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

/// Split leading `KEY=VALUE` assignments off the command side.
///
/// Keys must be uppercase-or-underscore-first identifiers; the first token
/// that is not such an assignment starts the command proper. Returns the
/// bindings and the byte offset of the command within `cmd`, so the command
/// keeps its original spacing. Malformed quoting on the command side is not
/// an error here; the scan just stops and leaves the rest to the shell.
pub fn extract_inline_env(cmd: &str) -> (Vec<(String, String)>, usize) {
    let chars: Vec<(usize, char)> = cmd.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let offset_of = |i: usize| chars.get(i).map(|&(b, _)| b).unwrap_or(cmd.len());

    let mut env = Vec::new();
    let mut i = 0;
    loop {
        let mut j = i;
        while matches!(at(j), Some(' ') | Some('\t')) {
            j += 1;
        }
        let token_start = j;
        if at(j).is_none() {
            i = j;
            break;
        }

        let mut text = String::new();
        let mut well_formed = true;
        'token: while let Some(c) = at(j) {
            match c {
                ' ' | '\t' => break,
                '\'' => {
                    j += 1;
                    loop {
                        match at(j) {
                            None => {
                                well_formed = false;
                                break 'token;
                            }
                            Some('\'') => {
                                j += 1;
                                break;
                            }
                            Some(c) => {
                                text.push(c);
                                j += 1;
                            }
                        }
                    }
                }
                '"' => {
                    j += 1;
                    loop {
                        match at(j) {
                            None => {
                                well_formed = false;
                                break 'token;
                            }
                            Some('"') => {
                                j += 1;
                                break;
                            }
                            Some('\\') => {
                                j += 1;
                                match at(j) {
                                    None => {
                                        well_formed = false;
                                        break 'token;
                                    }
                                    Some(c) => {
                                        text.push(unescape(c));
                                        j += 1;
                                    }
                                }
                            }
                            Some(c) => {
                                text.push(c);
                                j += 1;
                            }
                        }
                    }
                }
                c => {
                    text.push(c);
                    j += 1;
                }
            }
        }

        if !well_formed {
            i = token_start;
            break;
        }
        match split_inline_assignment(&text) {
            Some((key, value)) => {
                env.push((key.to_string(), value.to_string()));
                i = j;
            }
            None => {
                i = token_start;
                break;
            }
        }
    }

    (env, offset_of(i))
}

fn split_inline_assignment(text: &str) -> Option<(&str, &str)> {
    let eq = text.find('=')?;
    let key = &text[..eq];
    let mut cs = key.chars();
    let first = cs.next()?;
    if !(first.is_ascii_uppercase() || first == '_') {
        return None;
    }
    if !cs.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, &text[eq + 1..]))
}

/// Split a `KEY=VALUE` global binding (any-case identifier key).
pub fn split_global_assignment(text: &str) -> Option<(&str, &str)> {
    let eq = text.find('=')?;
    let key = &text[..eq];
    let mut cs = key.chars();
    let first = cs.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !cs.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, &text[eq + 1..]))
}

/// Number of leading space/tab characters.
pub fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

/// Does the line end in an unescaped backslash?
pub fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    trailing % 2 == 1
}

/// Join a physical line with its `\`-continuations.
///
/// Returns the logical line and how many physical lines it consumed. The
/// backslash is replaced with a single space joiner and the continuation
/// line's indent is stripped, so
/// `go run \` / `  ./cmd/api` becomes `go run ./cmd/api`.
pub fn join_continuations(lines: &[&str], start: usize) -> (String, usize) {
    let mut out = lines[start].to_string();
    let mut consumed = 1;
    while ends_with_continuation(&out) && start + consumed < lines.len() {
        out.pop();
        if !out.ends_with(' ') {
            out.push(' ');
        }
        out.push_str(lines[start + consumed].trim_start());
        consumed += 1;
    }
    (out, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn declaration_with_glob_and_option() {
        let (tokens, sep) =
            tokenize_declaration("api **/*.go after=db: go run ./cmd", 1).unwrap();
        assert_eq!(texts(&tokens), vec!["api", "**/*.go", "after=db"]);
        let sep = sep.unwrap();
        assert_eq!(&"api **/*.go after=db: go run ./cmd"[sep..], " go run ./cmd");
    }

    #[test]
    fn embedded_colon_stays_in_token() {
        let (tokens, sep) = tokenize_declaration("ready=http:8080/health: cmd", 1).unwrap();
        assert_eq!(texts(&tokens), vec!["ready=http:8080/health"]);
        assert!(sep.is_some());
    }

    #[test]
    fn trailing_colon_before_separator() {
        let (tokens, sep) = tokenize_declaration("ready=exec:: ./api", 1).unwrap();
        assert_eq!(texts(&tokens), vec!["ready=exec:"]);
        assert!(sep.is_some());
    }

    #[test]
    fn quoted_segment_concatenates() {
        let (tokens, _) =
            tokenize_declaration("ready=exec:'test -f /tmp/ready': ./api", 1).unwrap();
        assert_eq!(texts(&tokens), vec!["ready=exec:test -f /tmp/ready"]);
    }

    #[test]
    fn double_quote_escapes() {
        let (tokens, _) = tokenize_declaration(r#"name "a\nb\q": cmd"#, 1).unwrap();
        assert_eq!(texts(&tokens), vec!["name", "a\nbq"]);
    }

    #[test]
    fn unterminated_quote_reports_column() {
        let err = tokenize_declaration("api 'oops: cmd", 3).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.col, 5);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn trailing_escape_is_an_error() {
        let err = tokenize_declaration("api \\", 2).unwrap_err();
        assert!(err.message.contains("trailing escape"));
    }

    #[test]
    fn no_separator_line() {
        let (tokens, sep) = tokenize_declaration("FOO=bar", 1).unwrap();
        assert_eq!(texts(&tokens), vec!["FOO=bar"]);
        assert!(sep.is_none());
    }

    #[test]
    fn quoted_colon_is_not_a_separator() {
        let (tokens, sep) = tokenize_declaration("FOO='a: b'", 1).unwrap();
        assert_eq!(texts(&tokens), vec!["FOO=a: b"]);
        assert!(sep.is_none());
    }

    #[test]
    fn inline_env_extraction() {
        let (env, offset) = extract_inline_env("CGO_ENABLED=0 FOO=bar go run ./cmd");
        assert_eq!(
            env,
            vec![
                ("CGO_ENABLED".to_string(), "0".to_string()),
                ("FOO".to_string(), "bar".to_string()),
            ]
        );
        assert_eq!(&"CGO_ENABLED=0 FOO=bar go run ./cmd"[offset..], "go run ./cmd");
    }

    #[test]
    fn inline_env_requires_uppercase_first() {
        let (env, offset) = extract_inline_env("foo=bar cmd");
        assert!(env.is_empty());
        assert_eq!(offset, 0);
    }

    #[test]
    fn inline_env_quoted_value() {
        let (env, offset) = extract_inline_env("MSG='hello world' echo done");
        assert_eq!(env, vec![("MSG".to_string(), "hello world".to_string())]);
        assert_eq!(&"MSG='hello world' echo done"[offset..], "echo done");
    }

    #[test]
    fn continuation_joining() {
        let lines = vec!["api: go run \\", "  -tags dev \\", "  ./cmd/api"];
        let (joined, consumed) = join_continuations(&lines, 0);
        assert_eq!(joined, "api: go run -tags dev ./cmd/api");
        assert_eq!(consumed, 3);
    }

    #[test]
    fn escaped_backslash_is_not_a_continuation() {
        assert!(ends_with_continuation("foo \\"));
        assert!(!ends_with_continuation("foo \\\\"));
        assert!(ends_with_continuation("foo \\\\\\"));
    }
}
