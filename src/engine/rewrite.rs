//! Identifier-aware rewriting of legacy script text.
//!
//! Scripts written for the positional calling convention refer to bare
//! names (`options.`, `onChange(`, `response`). The rewriter tokenizes the
//! script, leaves string literals, template text and comments alone, and only
//! replaces free references: property accesses (`x.options`), object keys
//! (`{ data: 1 }`) and names the script declares itself are skipped.

use std::collections::HashSet;

/// What must follow a legacy name for it to be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    Any,
    Dot,
    Call,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub from: &'static str,
    pub to: &'static str,
    pub follow: Follow,
}

const fn rule(from: &'static str, to: &'static str, follow: Follow) -> Rule {
    Rule { from, to, follow }
}

/// Legacy positional names and their namespaced replacements.
pub const LEGACY_CONTEXT_RULES: &[Rule] = &[
    rule("options", "context.panel.options", Follow::Dot),
    rule("data", "context.panel.data", Follow::Dot),
    rule("response", "context.panel.response", Follow::Any),
    rule("elements", "context.panel.elements", Follow::Dot),
    rule("onChange", "context.panel.onChangeElements", Follow::Call),
    rule("onOptionsChange", "context.panel.onOptionsChange", Follow::Call),
    rule("initialRequest", "context.panel.initialRequest", Follow::Call),
    rule("setInitial", "context.panel.setInitial", Follow::Call),
    rule("initial", "context.panel.initial", Follow::Dot),
    rule("locationService", "context.grafana.locationService", Follow::Any),
    rule("templateService", "context.grafana.templateService", Follow::Any),
    rule("notifyError", "context.grafana.notifyError", Follow::Call),
    rule("notifySuccess", "context.grafana.notifySuccess", Follow::Call),
    rule("notifyWarning", "context.grafana.notifyWarning", Follow::Call),
    rule("toDataQueryResponse", "context.utils.toDataQueryResponse", Follow::Call),
    rule("replaceVariables", "context.grafana.replaceVariables", Follow::Call),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Ident,
    Punct(char),
    Literal,
}

#[derive(Debug, Clone, Copy)]
struct Tok {
    kind: TokKind,
    start: usize,
    end: usize,
}

enum Mode {
    Code { depth: usize },
    Template,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(src: &[char]) -> Vec<Tok> {
    let mut toks = Vec::new();
    let mut modes = vec![Mode::Code { depth: 0 }];
    let mut i = 0;
    let n = src.len();
    while i < n {
        let in_template = matches!(modes.last(), Some(Mode::Template));
        if in_template {
            let start = i;
            loop {
                if i >= n {
                    toks.push(Tok { kind: TokKind::Literal, start, end: n });
                    break;
                }
                match src[i] {
                    '\\' => i += 2,
                    '`' => {
                        toks.push(Tok { kind: TokKind::Literal, start, end: i + 1 });
                        i += 1;
                        modes.pop();
                        break;
                    }
                    '$' if i + 1 < n && src[i + 1] == '{' => {
                        toks.push(Tok { kind: TokKind::Literal, start, end: i + 2 });
                        i += 2;
                        modes.push(Mode::Code { depth: 0 });
                        break;
                    }
                    _ => i += 1,
                }
            }
            continue;
        }

        let c = src[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '/' && i + 1 < n && src[i + 1] == '/' {
            while i < n && src[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && i + 1 < n && src[i + 1] == '*' {
            i += 2;
            while i < n && !(src[i] == '*' && i + 1 < n && src[i + 1] == '/') {
                i += 1;
            }
            i = (i + 2).min(n);
        } else if c == '\'' || c == '"' {
            let start = i;
            i += 1;
            while i < n && src[i] != c && src[i] != '\n' {
                if src[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(n);
            toks.push(Tok { kind: TokKind::Literal, start, end: i });
        } else if c == '`' {
            i += 1;
            modes.push(Mode::Template);
        } else if is_ident_start(c) {
            let start = i;
            while i < n && is_ident_char(src[i]) {
                i += 1;
            }
            toks.push(Tok { kind: TokKind::Ident, start, end: i });
        } else if c.is_ascii_digit() {
            let start = i;
            while i < n && (src[i].is_ascii_alphanumeric() || src[i] == '.' || src[i] == '_') {
                i += 1;
            }
            toks.push(Tok { kind: TokKind::Literal, start, end: i });
        } else if c == '}' {
            let closes_template = modes.len() > 1
                && matches!(modes.last(), Some(Mode::Code { depth: 0 }));
            if closes_template {
                modes.pop();
            } else {
                if let Some(Mode::Code { depth }) = modes.last_mut() {
                    *depth = depth.saturating_sub(1);
                }
                toks.push(Tok { kind: TokKind::Punct('}'), start: i, end: i + 1 });
            }
            i += 1;
        } else {
            if c == '{' {
                if let Some(Mode::Code { depth }) = modes.last_mut() {
                    *depth += 1;
                }
            }
            toks.push(Tok { kind: TokKind::Punct(c), start: i, end: i + 1 });
            i += 1;
        }
    }
    toks
}

fn text<'a>(src: &[char], t: &Tok, buf: &'a mut String) -> &'a str {
    buf.clear();
    buf.extend(&src[t.start..t.end]);
    buf.as_str()
}

fn is_punct(t: Option<&Tok>, c: char) -> bool {
    matches!(t, Some(Tok { kind: TokKind::Punct(p), .. }) if *p == c)
}

/// Names bound by the script itself: `const/let/var` declarations including
/// destructuring patterns, function names and parameters, arrow parameters
/// and catch bindings.
fn declared_names(src: &[char], toks: &[Tok]) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut buf = String::new();
    for (k, t) in toks.iter().enumerate() {
        match t.kind {
            TokKind::Ident => {
                let word = text(src, t, &mut buf).to_string();
                match word.as_str() {
                    "const" | "let" | "var" | "function" => {
                        match toks.get(k + 1) {
                            Some(next) if next.kind == TokKind::Ident => {
                                names.insert(text(src, next, &mut buf).to_string());
                            }
                            Some(Tok { kind: TokKind::Punct('{' | '['), .. }) if word != "function" => {
                                collect_pattern(src, toks, k + 1, &mut names);
                            }
                            _ => {}
                        }
                        if word == "function" {
                            collect_params(src, toks, k + 1, &mut names);
                        }
                    }
                    "catch" => collect_params(src, toks, k + 1, &mut names),
                    _ => {
                        if is_arrow(toks, k + 1) {
                            names.insert(word);
                        }
                    }
                }
            }
            TokKind::Punct(')') if is_arrow(toks, k + 1) => {
                if let Some(open) = matching_open(toks, k) {
                    collect_pattern(src, toks, open, &mut names);
                }
            }
            _ => {}
        }
    }
    names
}

fn is_arrow(toks: &[Tok], at: usize) -> bool {
    is_punct(toks.get(at), '=') && is_punct(toks.get(at + 1), '>') && toks[at].end == toks[at + 1].start
}

fn matching_open(toks: &[Tok], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for j in (0..=close).rev() {
        match toks[j].kind {
            TokKind::Punct(')') => depth += 1,
            TokKind::Punct('(') => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
    }
    None
}

/// Innermost bracket token enclosing token `k`.
fn enclosing_open(toks: &[Tok], k: usize) -> Option<usize> {
    let mut depth = 0usize;
    for j in (0..k).rev() {
        match toks[j].kind {
            TokKind::Punct(')' | ']' | '}') => depth += 1,
            TokKind::Punct('(' | '[' | '{') => {
                if depth == 0 {
                    return Some(j);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Whether the `{` at `open` starts an object literal rather than a block.
fn opens_object(src: &[char], toks: &[Tok], open: usize) -> bool {
    let Some(prev) = open.checked_sub(1).and_then(|j| toks.get(j)) else {
        return false;
    };
    match prev.kind {
        TokKind::Punct(c) => {
            let arrow = c == '>' && open >= 2 && is_arrow(toks, open - 2);
            !arrow && matches!(c, '=' | '(' | ',' | ':' | '[' | '?' | '|' | '&')
        }
        TokKind::Ident => {
            let mut buf = String::new();
            text(src, prev, &mut buf) == "return"
        }
        _ => false,
    }
}

/// Parameter list starting at or just after `from`.
fn collect_params(src: &[char], toks: &[Tok], from: usize, names: &mut HashSet<String>) {
    if let Some(open) = (from..toks.len().min(from + 2)).find(|&j| is_punct(toks.get(j), '(')) {
        collect_pattern(src, toks, open, names);
    }
}

/// Identifiers bound by the bracketed pattern at `open`: plain and shorthand
/// names, renamed targets (`key: name`) and rest elements. Keys and default
/// values are not bindings.
fn collect_pattern(src: &[char], toks: &[Tok], open: usize, names: &mut HashSet<String>) {
    let mut buf = String::new();
    let mut depth = 0usize;
    for j in open..toks.len() {
        match toks[j].kind {
            TokKind::Punct('(' | '[' | '{') => depth += 1,
            TokKind::Punct(')' | ']' | '}') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return;
                }
            }
            TokKind::Ident => {
                let prev = toks.get(j - 1);
                let rest = is_punct(prev, '.') && j >= 3 && is_punct(toks.get(j - 2), '.') && is_punct(toks.get(j - 3), '.');
                let binds = is_punct(prev, '(')
                    || is_punct(prev, ',')
                    || is_punct(prev, '{')
                    || is_punct(prev, '[')
                    || is_punct(prev, ':')
                    || rest;
                if binds && !is_punct(toks.get(j + 1), ':') {
                    names.insert(text(src, &toks[j], &mut buf).to_string());
                }
            }
            _ => {}
        }
    }
}

/// Rewrite free references matched by `rules`. Running it on its own output
/// is a no-op because rewritten names are always preceded by a `.`.
pub fn rewrite_identifiers(source: &str, rules: &[Rule]) -> String {
    let src: Vec<char> = source.chars().collect();
    let toks = tokenize(&src);
    let declared = declared_names(&src, &toks);
    let mut out = String::with_capacity(source.len() + 32);
    let mut cursor = 0usize;
    let mut buf = String::new();

    for (k, t) in toks.iter().enumerate() {
        if t.kind != TokKind::Ident {
            continue;
        }
        let name = text(&src, t, &mut buf);
        let Some(rule) = rules.iter().find(|r| r.from == name) else {
            continue;
        };
        if declared.contains(name) {
            continue;
        }
        let prev = if k > 0 { toks.get(k - 1) } else { None };
        let next = toks.get(k + 1);
        if is_punct(prev, '.') {
            continue;
        }
        if is_punct(next, ':') && (is_punct(prev, '{') || is_punct(prev, ',')) {
            continue;
        }
        let shorthand = (is_punct(prev, '{') || is_punct(prev, ','))
            && (is_punct(next, '}') || is_punct(next, ','))
            && enclosing_open(&toks, k)
                .is_some_and(|open| is_punct(toks.get(open), '{') && opens_object(&src, &toks, open));
        let follows = match rule.follow {
            Follow::Any => true,
            Follow::Dot => is_punct(next, '.'),
            Follow::Call => is_punct(next, '('),
        };
        if !follows {
            continue;
        }
        out.extend(&src[cursor..t.start]);
        if shorthand {
            out.extend(&src[t.start..t.end]);
            out.push_str(": ");
        }
        out.push_str(rule.to);
        cursor = t.end;
    }
    out.extend(&src[cursor..]);
    out
}

/// Rewrite legacy positional names into the `context.*` namespaces.
pub fn namespace_legacy_script(source: &str) -> String {
    if source.trim().is_empty() {
        return source.to_string();
    }
    rewrite_identifiers(source, LEGACY_CONTEXT_RULES)
}
