// src/procfile/parser.rs

//! Procfile parsing: logical-line assembly, declaration classification,
//! option handling and whole-file validation.
//!
//! The parser never stops at the first problem; it accumulates diagnostics
//! across the whole file and fails with the complete list.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::errors::{Diagnostic, ProcfileError};
use crate::procfile::lexer::{
    extract_inline_env, indent_width, join_continuations, split_global_assignment,
    tokenize_declaration, Token,
};
use crate::procfile::model::{Procfile, ProcessKind, ProcessSpec, ReadySpec, ReloadSignal};

const OPTION_KEYS: [&str; 6] = ["after", "ready", "signal", "debounce", "dir", "shutdown"];

/// Parse Procfile source text.
pub fn parse(input: &str) -> Result<Procfile, ProcfileError> {
    let lines: Vec<&str> = input.lines().collect();
    let mut diagnostics = Vec::new();
    let mut procfile = Procfile::default();

    let mut i = 0;
    while i < lines.len() {
        let raw = lines[i];
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            i += 1;
            continue;
        }

        let line_no = i + 1;
        let decl_indent = indent_width(raw);
        let (logical, consumed) = join_continuations(&lines, i);
        i += consumed;

        let (tokens, separator) = match tokenize_declaration(&logical, line_no) {
            Ok(parts) => parts,
            Err(d) => {
                diagnostics.push(d);
                continue;
            }
        };

        match separator {
            None => match global_binding(&tokens) {
                Some((key, value)) => {
                    procfile.env.insert(key, value);
                }
                None => diagnostics.push(Diagnostic::at(
                    line_no,
                    "expected ':' after process declaration or a KEY=VALUE binding",
                )),
            },
            Some(offset) => {
                let after = &logical[offset..];
                let command = if after.trim().is_empty() {
                    let (block, block_lines) = collect_block(&lines, i, decl_indent);
                    i += block_lines;
                    block
                } else {
                    after.trim().to_string()
                };

                if let Some(spec) =
                    parse_declaration(&tokens, &command, line_no, &mut diagnostics)
                {
                    procfile.processes.push(spec);
                }
            }
        }
    }

    validate(&procfile, &mut diagnostics);

    if diagnostics.is_empty() {
        Ok(procfile)
    } else {
        Err(ProcfileError::new(diagnostics))
    }
}

/// A line with no separator colon is a global env binding iff it is exactly
/// one `KEY=VALUE` token with an identifier key.
fn global_binding(tokens: &[Token]) -> Option<(String, String)> {
    match tokens {
        [token] => {
            split_global_assignment(&token.text).map(|(k, v)| (k.to_string(), v.to_string()))
        }
        _ => None,
    }
}

/// Collect a block command: the run of lines indented strictly deeper than
/// the declaration. Interior blank lines are preserved, trailing ones
/// dropped, and the common indent stripped.
fn collect_block(lines: &[&str], start: usize, decl_indent: usize) -> (String, usize) {
    let mut collected: Vec<String> = Vec::new();
    let mut i = start;

    while i < lines.len() {
        let raw = lines[i];
        if raw.trim().is_empty() {
            collected.push(String::new());
            i += 1;
            continue;
        }
        if indent_width(raw) <= decl_indent {
            break;
        }
        let (joined, consumed) = join_continuations(lines, i);
        collected.push(joined);
        i += consumed;
    }

    while collected.last().is_some_and(|l| l.is_empty()) {
        collected.pop();
    }
    if collected.is_empty() {
        return (String::new(), i - start);
    }

    let min_indent = collected
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_width(l))
        .min()
        .unwrap_or(0);

    let block = collected
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                &l[byte_index_of_char(l, min_indent)..]
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    (block, i - start)
}

fn byte_index_of_char(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(b, _)| b).unwrap_or(s.len())
}

fn parse_declaration(
    tokens: &[Token],
    command: &str,
    line_no: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<ProcessSpec> {
    let Some(name_token) = tokens.first() else {
        diagnostics.push(Diagnostic::at(line_no, "missing process name before ':'"));
        return None;
    };
    let (name, kind) = match name_token.text.strip_suffix('!') {
        Some(stripped) => (stripped, ProcessKind::OneShot),
        None => (name_token.text.as_str(), ProcessKind::LongRunning),
    };

    if !is_valid_name(name) {
        diagnostics.push(Diagnostic::at_col(
            line_no,
            name_token.col,
            format!("invalid process name: '{}'", name),
        ));
        return None;
    }

    let mut spec = ProcessSpec::new(name, kind);
    let before = diagnostics.len();

    for token in &tokens[1..] {
        if !token.text.starts_with('!') {
            if let Some((key, value)) = token.text.split_once('=') {
                if OPTION_KEYS.contains(&key) {
                    apply_option(&mut spec, key, value, line_no, token.col, diagnostics);
                    continue;
                }
                // `key=value` with an identifier key is a typo'd option, not
                // a watch pattern.
                if is_valid_ident(key) {
                    diagnostics.push(Diagnostic::at_col(
                        line_no,
                        token.col,
                        format!("unknown option: '{}'", key),
                    ));
                    continue;
                }
            }
        }

        match token.text.strip_prefix('!') {
            Some(pattern) => spec.watch_excludes.push(pattern.to_string()),
            None => spec.watch_includes.push(token.text.clone()),
        }
    }

    if command.is_empty() {
        diagnostics.push(Diagnostic::at(
            line_no,
            format!("process '{}' has no command", spec.name),
        ));
    } else {
        let (inline_env, offset) = extract_inline_env(command);
        spec.inline_env = inline_env;
        spec.command = command[offset..].to_string();
        if spec.command.is_empty() {
            diagnostics.push(Diagnostic::at(
                line_no,
                format!(
                    "process '{}' has only environment assignments and no command",
                    spec.name
                ),
            ));
        }
    }

    if spec.kind.is_one_shot() && spec.ready.is_some() {
        diagnostics.push(Diagnostic::at(
            line_no,
            format!(
                "one-shot process '{}' cannot have a ready probe (it becomes ready on exit 0)",
                spec.name
            ),
        ));
    }

    if diagnostics.len() > before {
        return None;
    }
    Some(spec)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_ident(key: &str) -> bool {
    let mut cs = key.chars();
    match cs.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    cs.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn apply_option(
    spec: &mut ProcessSpec,
    key: &str,
    value: &str,
    line_no: usize,
    col: usize,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match key {
        "after" => {
            spec.dependencies = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if spec.dependencies.is_empty() {
                diagnostics.push(Diagnostic::at_col(line_no, col, "empty 'after' list"));
            }
        }
        "ready" => match parse_ready_spec(value) {
            Ok(ready) => spec.ready = Some(ready),
            Err(message) => diagnostics.push(Diagnostic::at_col(line_no, col, message)),
        },
        "signal" => match ReloadSignal::from_name(value) {
            Some(signal) => spec.signal = signal,
            None => diagnostics.push(Diagnostic::at_col(
                line_no,
                col,
                format!("unknown signal: '{}'", value),
            )),
        },
        "debounce" => match parse_duration(value) {
            Ok(d) => spec.debounce = d,
            Err(message) => diagnostics.push(Diagnostic::at_col(line_no, col, message)),
        },
        "dir" => spec.dir = Some(value.to_string()),
        "shutdown" => match parse_duration(value) {
            Ok(d) => spec.shutdown_grace = d,
            Err(message) => diagnostics.push(Diagnostic::at_col(line_no, col, message)),
        },
        _ => unreachable!("checked against OPTION_KEYS"),
    }
}

/// `ready=` value grammar: bare port, `http:<port>[/<path>][=<status>]`,
/// or `exec:<command>`.
pub fn parse_ready_spec(value: &str) -> Result<ReadySpec, String> {
    if let Some(rest) = value.strip_prefix("http:") {
        let (rest, status) = match rest.rfind('=') {
            Some(idx) => {
                let status = rest[idx + 1..]
                    .parse::<u16>()
                    .map_err(|_| format!("invalid status code in ready probe: '{}'", &rest[idx + 1..]))?;
                (&rest[..idx], Some(status))
            }
            None => (rest, None),
        };
        let (port_str, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };
        let port = port_str
            .parse::<u16>()
            .map_err(|_| format!("invalid port in ready probe: '{}'", port_str))?;
        Ok(ReadySpec::Http { port, path, status })
    } else if let Some(rest) = value.strip_prefix("exec:") {
        let command = rest.trim();
        if command.is_empty() {
            return Err("exec probe requires a command".to_string());
        }
        Ok(ReadySpec::Exec { command: command.to_string() })
    } else {
        let port = value
            .parse::<u16>()
            .map_err(|_| format!("invalid ready probe: '{}'", value))?;
        Ok(ReadySpec::Tcp { port })
    }
}

/// Duration grammar: `<n>ms`, `<n>s`, `<n>m`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let err = || format!("invalid duration: '{}'", value);
    if let Some(ms) = value.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.parse().map_err(|_| err())?))
    } else if let Some(s) = value.strip_suffix('s') {
        Ok(Duration::from_secs(s.parse().map_err(|_| err())?))
    } else if let Some(m) = value.strip_suffix('m') {
        Ok(Duration::from_secs(
            m.parse::<u64>().map_err(|_| err())?.saturating_mul(60),
        ))
    } else {
        Err(err())
    }
}

/// Whole-file invariants: unique names, known dependencies, no cycles,
/// compilable globs.
fn validate(procfile: &Procfile, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    for spec in &procfile.processes {
        if !seen.insert(spec.name.as_str()) {
            diagnostics.push(Diagnostic::file_scope(format!(
                "duplicate process name: '{}'",
                spec.name
            )));
        }
    }

    for spec in &procfile.processes {
        for pattern in spec.watch_includes.iter().chain(&spec.watch_excludes) {
            let normalized = crate::watch::normalize_pattern(pattern);
            if let Err(e) = globset::Glob::new(normalized) {
                diagnostics.push(Diagnostic::file_scope(format!(
                    "process '{}': invalid glob pattern '{}': {}",
                    spec.name, pattern, e
                )));
            }
        }
    }

    let names: HashMap<&str, usize> = procfile
        .processes
        .iter()
        .enumerate()
        .map(|(idx, spec)| (spec.name.as_str(), idx))
        .collect();

    let mut deps_ok = true;
    for spec in &procfile.processes {
        for dep in &spec.dependencies {
            if !names.contains_key(dep.as_str()) {
                deps_ok = false;
                diagnostics.push(Diagnostic::file_scope(format!(
                    "process '{}' depends on unknown process '{}'",
                    spec.name, dep
                )));
            }
        }
    }

    // Cycle detection is only meaningful once every edge endpoint resolves.
    if deps_ok && seen.len() == procfile.processes.len() {
        detect_cycles(procfile, &names, diagnostics);
    }
}

/// DFS colouring; reports the cycle path, e.g. `a -> b -> a`.
fn detect_cycles(
    procfile: &Procfile,
    names: &HashMap<&str, usize>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    #[derive(Clone, Copy, PartialEq)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    fn visit(
        idx: usize,
        procfile: &Procfile,
        names: &HashMap<&str, usize>,
        colour: &mut [Colour],
        path: &mut Vec<String>,
    ) -> Option<String> {
        match colour[idx] {
            Colour::Black => return None,
            Colour::Grey => {
                let name = &procfile.processes[idx].name;
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].iter().map(String::as_str).collect();
                cycle.push(name);
                return Some(cycle.join(" -> "));
            }
            Colour::White => {}
        }

        colour[idx] = Colour::Grey;
        path.push(procfile.processes[idx].name.clone());
        for dep in &procfile.processes[idx].dependencies {
            if let Some(&dep_idx) = names.get(dep.as_str()) {
                if let Some(cycle) = visit(dep_idx, procfile, names, colour, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        colour[idx] = Colour::Black;
        None
    }

    let mut colour = vec![Colour::White; procfile.processes.len()];
    for idx in 0..procfile.processes.len() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(idx, procfile, names, &mut colour, &mut path) {
            diagnostics.push(Diagnostic::file_scope(format!(
                "circular dependency: {}",
                cycle
            )));
            return;
        }
    }
}
