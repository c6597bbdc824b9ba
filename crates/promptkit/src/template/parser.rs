//! Template source → node tree.

use crate::Role;
use crate::error::TemplateError;
use serde_json::Value;

/// Directive helpers recognized inside `{{ }}`.
const HELPERS: &[&str] = &["role", "media", "json", "history"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Expression(Expr),
    Helper {
        name: String,
        params: Vec<Expr>,
        hash: Vec<(String, Expr)>,
    },
    Block {
        kind: BlockKind,
        param: Expr,
        body: Vec<Node>,
        inverse: Vec<Node>,
    },
    Partial {
        name: String,
        context: Option<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    If,
    Unless,
    Each,
    With,
}

impl BlockKind {
    fn parse(name: &str) -> Option<BlockKind> {
        match name {
            "if" => Some(BlockKind::If),
            "unless" => Some(BlockKind::Unless),
            "each" => Some(BlockKind::Each),
            "with" => Some(BlockKind::With),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
            BlockKind::Each => "each",
            BlockKind::With => "with",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Path(PathExpr),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathRoot {
    /// Current scope, or `depth` scopes up via `../`.
    Scope { depth: usize },
    /// `@name` data variable (`@root`, `@index`, caller data).
    Data(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathExpr {
    pub root: PathRoot,
    pub segments: Vec<String>,
}

// ── Tokenizer ──────────────────────────────────────────────────────

#[derive(Debug)]
enum Token<'a> {
    Text(String),
    Tag {
        body: &'a str,
        offset: usize,
        strip_before: bool,
        strip_after: bool,
    },
    Comment {
        strip_before: bool,
        strip_after: bool,
    },
}

fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before.len() - nl,
        None => before.len() + 1,
    };
    (line, column)
}

fn parse_error(source: &str, offset: usize, message: impl Into<String>) -> TemplateError {
    let (line, column) = position(source, offset);
    TemplateError::Parse {
        line,
        column,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token<'_>>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        let (text, tail) = rest.split_at(start);
        if !text.is_empty() {
            tokens.push(Token::Text(text.to_string()));
        }
        let tag_offset = offset + start;
        let mut inner = tail.split_at(2).1;
        let mut opener = 2;

        let strip_before = inner.starts_with('~');
        if strip_before {
            inner = inner.split_at(1).1;
            opener += 1;
        }

        let consumed;
        if let Some(comment) = inner.strip_prefix("!--") {
            let (end, strip_after) = match (comment.find("--}}"), comment.find("--~}}")) {
                (Some(plain), Some(stripped)) if stripped < plain => (stripped, true),
                (Some(plain), _) => (plain, false),
                (None, Some(stripped)) => (stripped, true),
                (None, None) => return Err(parse_error(source, tag_offset, "unclosed comment")),
            };
            let close = if strip_after { 5 } else { 4 };
            consumed = opener + 3 + end + close;
            tokens.push(Token::Comment {
                strip_before,
                strip_after,
            });
        } else if let Some(comment) = inner.strip_prefix('!') {
            let end = comment
                .find("}}")
                .ok_or_else(|| parse_error(source, tag_offset, "unclosed comment"))?;
            let strip_after = comment.split_at(end).0.ends_with('~');
            consumed = opener + 1 + end + 2;
            tokens.push(Token::Comment {
                strip_before,
                strip_after,
            });
        } else {
            let triple = inner.starts_with('{');
            let (body_src, close) = if triple {
                (inner.split_at(1).1, "}}}")
            } else {
                (inner, "}}")
            };
            let end = body_src
                .find(close)
                .ok_or_else(|| parse_error(source, tag_offset, "unclosed tag"))?;
            let mut body = body_src.split_at(end).0;
            let strip_after = body.ends_with('~');
            if strip_after {
                body = body.split_at(body.len() - 1).0;
            }
            consumed = opener + usize::from(triple) + end + close.len();
            tokens.push(Token::Tag {
                body: body.trim(),
                offset: tag_offset,
                strip_before,
                strip_after,
            });
        }

        rest = tail.split_at(consumed).1;
        offset = tag_offset + consumed;
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }

    apply_whitespace_control(&mut tokens);
    Ok(tokens)
}

fn apply_whitespace_control(tokens: &mut [Token<'_>]) {
    for i in 0..tokens.len() {
        let (before, after) = match tokens[i] {
            Token::Tag {
                strip_before,
                strip_after,
                ..
            }
            | Token::Comment {
                strip_before,
                strip_after,
            } => (strip_before, strip_after),
            Token::Text(_) => continue,
        };
        if before
            && i > 0
            && let Token::Text(t) = &mut tokens[i - 1]
        {
            let trimmed = t.trim_end().len();
            t.truncate(trimmed);
        }
        if after
            && i + 1 < tokens.len()
            && let Token::Text(t) = &mut tokens[i + 1]
        {
            *t = t.trim_start().to_string();
        }
    }
}

// ── Tag bodies ─────────────────────────────────────────────────────

/// One whitespace-separated argument inside a tag.
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Positional(Expr),
    Hash(String, Expr),
}

fn split_args(body: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            None if c == '(' || c == ')' => {
                return Err("subexpressions are not supported".into());
            }
            None => current.push(c),
        }
    }
    if quote.is_some() {
        return Err("unterminated string literal".into());
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

fn unquote(raw: &str) -> Option<String> {
    let mut chars = raw.chars();
    let q = chars.next()?;
    if (q != '"' && q != '\'') || raw.len() < 2 || !raw.ends_with(q) {
        return None;
    }
    let inner = raw.get(1..raw.len() - 1)?;
    let mut out = String::with_capacity(inner.len());
    let mut it = inner.chars();
    while let Some(c) = it.next() {
        if c == '\\' {
            match it.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn parse_expr(raw: &str) -> Result<Expr, String> {
    if let Some(s) = unquote(raw) {
        return Ok(Expr::Literal(Value::String(s)));
    }
    match raw {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "null" | "undefined" => return Ok(Expr::Literal(Value::Null)),
        _ => {}
    }
    if raw.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        && let Ok(n) = serde_json::from_str::<serde_json::Number>(raw)
    {
        return Ok(Expr::Literal(Value::Number(n)));
    }
    parse_path(raw).map(Expr::Path)
}

fn parse_path(raw: &str) -> Result<PathExpr, String> {
    let mut rest = raw;
    let mut depth = 0;
    while let Some(r) = rest.strip_prefix("../") {
        depth += 1;
        rest = r;
    }
    let root = if let Some(data) = rest.strip_prefix('@') {
        let (name, tail) = match data.find(['.', '/']) {
            Some(i) => {
                let (n, t) = data.split_at(i);
                (n, t.split_at(1).1)
            }
            None => (data, ""),
        };
        if name.is_empty() {
            return Err(format!("invalid data variable '{raw}'"));
        }
        rest = tail;
        PathRoot::Data(name.to_string())
    } else {
        PathRoot::Scope { depth }
    };

    if let Some(r) = rest.strip_prefix("./") {
        rest = r;
    }
    let mut segments = Vec::new();
    for (i, seg) in rest.split(['.', '/']).enumerate() {
        let seg = seg
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(seg);
        match seg {
            "" if rest.is_empty() || rest == "." => {}
            "" => return Err(format!("invalid path '{raw}'")),
            "this" if i == 0 => {}
            _ => segments.push(seg.to_string()),
        }
    }
    Ok(PathExpr { root, segments })
}

fn parse_args(raw_args: &[String]) -> Result<Vec<Arg>, String> {
    raw_args
        .iter()
        .map(|raw| {
            // `key=value`, but not inside a quoted literal.
            let starts_quoted = raw.starts_with(['"', '\'']);
            match raw.split_once('=') {
                Some((key, value)) if !starts_quoted && !key.is_empty() => {
                    Ok(Arg::Hash(key.to_string(), parse_expr(value)?))
                }
                _ => Ok(Arg::Positional(parse_expr(raw)?)),
            }
        })
        .collect()
}

fn split_positional(args: Vec<Arg>) -> (Vec<Expr>, Vec<(String, Expr)>) {
    let mut params = Vec::new();
    let mut hash = Vec::new();
    for arg in args {
        match arg {
            Arg::Positional(e) => params.push(e),
            Arg::Hash(k, v) => hash.push((k, v)),
        }
    }
    (params, hash)
}

// ── Tree building ──────────────────────────────────────────────────

struct Frame {
    kind: BlockKind,
    param: Expr,
    body: Vec<Node>,
    inverse: Vec<Node>,
    in_inverse: bool,
    /// Opened by `{{else if}}`; closes together with its parent.
    chained: bool,
    offset: usize,
}

impl Frame {
    fn push(&mut self, node: Node) {
        if self.in_inverse {
            self.inverse.push(node);
        } else {
            self.body.push(node);
        }
    }

    fn into_node(self) -> Node {
        Node::Block {
            kind: self.kind,
            param: self.param,
            body: self.body,
            inverse: self.inverse,
        }
    }
}

struct TreeBuilder<'s> {
    source: &'s str,
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl TreeBuilder<'_> {
    fn push(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(frame) => frame.push(node),
            None => self.root.push(node),
        }
    }

    fn err(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        parse_error(self.source, offset, message)
    }

    fn close_frame(&mut self) {
        if let Some(frame) = self.stack.pop() {
            let node = frame.into_node();
            self.push(node);
        }
    }

    fn tag(&mut self, body: &str, offset: usize) -> Result<(), TemplateError> {
        if body.is_empty() {
            return Err(self.err(offset, "empty tag"));
        }

        if let Some(open) = body.strip_prefix('#') {
            let args = split_args(open).map_err(|m| self.err(offset, m))?;
            let Some((name, rest)) = args.split_first() else {
                return Err(self.err(offset, "block tag without a helper name"));
            };
            let kind = BlockKind::parse(name)
                .ok_or_else(|| self.err(offset, format!("unknown block helper '{name}'")))?;
            let param = self.single_param(kind.name(), rest, offset)?;
            self.stack.push(Frame {
                kind,
                param,
                body: Vec::new(),
                inverse: Vec::new(),
                in_inverse: false,
                chained: false,
                offset,
            });
            return Ok(());
        }

        if let Some(close) = body.strip_prefix('/') {
            let name = close.trim();
            // Chained `else if` frames close with their parent.
            while self.stack.last().is_some_and(|f| f.chained) {
                self.close_frame();
            }
            let Some(frame) = self.stack.last() else {
                return Err(self.err(offset, format!("unexpected closing tag '{name}'")));
            };
            if frame.kind.name() != name {
                return Err(self.err(
                    offset,
                    format!("closing tag '{name}' does not match open block '{}'", frame.kind.name()),
                ));
            }
            self.close_frame();
            return Ok(());
        }

        if body == "else" || body.starts_with("else ") {
            let source = self.source;
            let Some(frame) = self.stack.last_mut() else {
                return Err(parse_error(source, offset, "'else' outside of a block"));
            };
            if frame.in_inverse {
                return Err(parse_error(source, offset, "duplicate 'else' in block"));
            }
            frame.in_inverse = true;
            let chained = body.strip_prefix("else").map(str::trim).unwrap_or_default();
            if !chained.is_empty() {
                let args = split_args(chained).map_err(|m| self.err(offset, m))?;
                let Some((name, rest)) = args.split_first() else {
                    return Err(self.err(offset, "malformed 'else'"));
                };
                let kind = BlockKind::parse(name)
                    .ok_or_else(|| self.err(offset, format!("unknown block helper '{name}'")))?;
                let param = self.single_param(kind.name(), rest, offset)?;
                self.stack.push(Frame {
                    kind,
                    param,
                    body: Vec::new(),
                    inverse: Vec::new(),
                    in_inverse: false,
                    chained: true,
                    offset,
                });
            }
            return Ok(());
        }

        if let Some(partial) = body.strip_prefix('>') {
            let args = split_args(partial).map_err(|m| self.err(offset, m))?;
            let Some((name, rest)) = args.split_first() else {
                return Err(self.err(offset, "partial tag without a name"));
            };
            let name = unquote(name).unwrap_or_else(|| name.clone());
            let context = match rest {
                [] => None,
                [one] => Some(parse_expr(one).map_err(|m| self.err(offset, m))?),
                _ => return Err(self.err(offset, "partials take at most one context argument")),
            };
            self.push(Node::Partial { name, context });
            return Ok(());
        }

        let args = split_args(body).map_err(|m| self.err(offset, m))?;
        let Some((head, rest)) = args.split_first() else {
            return Err(self.err(offset, "empty tag"));
        };

        if HELPERS.contains(&head.as_str()) {
            let parsed = parse_args(rest).map_err(|m| self.err(offset, m))?;
            let (params, hash) = split_positional(parsed);
            self.check_helper(head, &params, &hash, offset)?;
            self.push(Node::Helper {
                name: head.clone(),
                params,
                hash,
            });
            return Ok(());
        }

        if !rest.is_empty() {
            return Err(self.err(offset, format!("unknown helper '{head}'")));
        }
        let expr = parse_expr(head).map_err(|m| self.err(offset, m))?;
        self.push(Node::Expression(expr));
        Ok(())
    }

    fn single_param(&self, helper: &str, rest: &[String], offset: usize) -> Result<Expr, TemplateError> {
        match rest {
            [one] => parse_expr(one).map_err(|m| self.err(offset, m)),
            _ => Err(self.err(offset, format!("'{helper}' takes exactly one argument"))),
        }
    }

    fn check_helper(
        &self,
        name: &str,
        params: &[Expr],
        hash: &[(String, Expr)],
        offset: usize,
    ) -> Result<(), TemplateError> {
        let has_hash = |key: &str| hash.iter().any(|(k, _)| k == key);
        match name {
            "role" => match params {
                [Expr::Literal(Value::String(role))] => {
                    if Role::parse(role).is_none() {
                        return Err(self.err(offset, format!("unknown role '{role}'")));
                    }
                    Ok(())
                }
                [_] => Ok(()),
                _ => Err(self.err(offset, "'role' takes exactly one argument")),
            },
            "media" => {
                if params.len() > 1 || (params.is_empty() && !has_hash("url")) {
                    return Err(self.err(offset, "'media' requires a url"));
                }
                Ok(())
            }
            "json" => {
                if params.len() != 1 {
                    return Err(self.err(offset, "'json' takes exactly one value"));
                }
                Ok(())
            }
            "history" => {
                if !params.is_empty() || !hash.is_empty() {
                    return Err(self.err(offset, "'history' takes no arguments"));
                }
                Ok(())
            }
            _ => Err(self.err(offset, format!("unknown helper '{name}'"))),
        }
    }
}

/// Parse template source into a node tree.
pub(crate) fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let tokens = tokenize(source)?;
    let mut builder = TreeBuilder {
        source,
        root: Vec::new(),
        stack: Vec::new(),
    };
    for token in tokens {
        match token {
            Token::Text(t) => {
                if !t.is_empty() {
                    builder.push(Node::Text(t));
                }
            }
            Token::Comment { .. } => {}
            Token::Tag { body, offset, .. } => builder.tag(body, offset)?,
        }
    }
    if let Some(frame) = builder.stack.iter().rev().find(|f| !f.chained) {
        return Err(builder.err(
            frame.offset,
            format!("unclosed '{}' block", frame.kind.name()),
        ));
    }
    Ok(builder.root)
}
