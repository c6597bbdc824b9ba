use super::markers::{Marker, strip_reserved};
use super::parser::{BlockKind, Expr, Node, PathExpr, PathRoot};
use super::{Partials, RenderContext};
use crate::error::TemplateError;
use serde_json::Value;
use std::borrow::Cow;

/// Partials nested deeper than this fail the render.
pub const MAX_PARTIAL_DEPTH: usize = 16;

static NULL: Value = Value::Null;

/// Per-iteration data of the innermost `#each`.
#[derive(Clone, Copy, Default)]
struct Locals<'a> {
    index: Option<usize>,
    key: Option<&'a str>,
    first: bool,
    last: bool,
}

#[derive(Clone, Copy)]
struct Frame<'a> {
    value: &'a Value,
    locals: Option<Locals<'a>>,
}

pub(crate) struct Renderer<'a> {
    ctx: &'a RenderContext,
    partials: Option<&'a Partials>,
    stack: Vec<Frame<'a>>,
    partial_depth: usize,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(ctx: &'a RenderContext, partials: Option<&'a Partials>) -> Self {
        Self {
            ctx,
            partials,
            stack: vec![Frame {
                value: ctx.root(),
                locals: None,
            }],
            partial_depth: 0,
        }
    }

    pub(crate) fn render(&mut self, nodes: &'a [Node], out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            self.node(node, out)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &'a Node, out: &mut String) -> Result<(), TemplateError> {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Expression(expr) => {
                let value = self.eval(expr);
                out.push_str(&strip_reserved(&stringify(&value)));
            }
            Node::Helper { name, params, hash } => self.helper(name, params, hash, out),
            Node::Block {
                kind,
                param,
                body,
                inverse,
            } => self.block(*kind, param, body, inverse, out)?,
            Node::Partial { name, context } => self.partial(name, context.as_ref(), out)?,
        }
        Ok(())
    }

    fn helper(&self, name: &str, params: &'a [Expr], hash: &'a [(String, Expr)], out: &mut String) {
        let hash_value = |key: &str| hash.iter().find(|(k, _)| k == key).map(|(_, e)| e);
        match name {
            "role" => {
                let role = params.first().map(|e| stringify(&self.eval(e))).unwrap_or_default();
                out.push_str(&Marker::Role(role).encode());
            }
            "media" => {
                let url = params
                    .first()
                    .or_else(|| hash_value("url"))
                    .map(|e| stringify(&self.eval(e)))
                    .unwrap_or_default();
                let content_type = hash_value("contentType")
                    .map(|e| stringify(&self.eval(e)))
                    .filter(|ct| !ct.is_empty());
                out.push_str(&Marker::Media { url, content_type }.encode());
            }
            "json" => {
                let value = params.first().map(|e| self.eval(e)).unwrap_or(Cow::Borrowed(&NULL));
                let indent = hash_value("indent").and_then(|e| self.eval(e).as_u64());
                out.push_str(&to_json_text(&value, indent));
            }
            "history" => out.push_str(&Marker::History.encode()),
            _ => {}
        }
    }

    fn block(
        &mut self,
        kind: BlockKind,
        param: &'a Expr,
        body: &'a [Node],
        inverse: &'a [Node],
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let value = self.eval(param);
        match kind {
            BlockKind::If => {
                let branch = if is_truthy(&value) { body } else { inverse };
                self.render(branch, out)
            }
            BlockKind::Unless => {
                let branch = if is_truthy(&value) { inverse } else { body };
                self.render(branch, out)
            }
            BlockKind::With => {
                if !is_truthy(&value) {
                    return self.render(inverse, out);
                }
                match value {
                    Cow::Borrowed(v) => self.scoped(v, None, body, out),
                    // Computed values (`@index` and friends) cannot become a
                    // scope; render the body in the current one.
                    Cow::Owned(_) => self.render(body, out),
                }
            }
            BlockKind::Each => {
                let Cow::Borrowed(collection) = value else {
                    return self.render(inverse, out);
                };
                match collection {
                    Value::Array(items) if !items.is_empty() => {
                        let last = items.len() - 1;
                        for (i, item) in items.iter().enumerate() {
                            let locals = Locals {
                                index: Some(i),
                                key: None,
                                first: i == 0,
                                last: i == last,
                            };
                            self.scoped(item, Some(locals), body, out)?;
                        }
                        Ok(())
                    }
                    Value::Object(map) if !map.is_empty() => {
                        let last = map.len() - 1;
                        for (i, (key, item)) in map.iter().enumerate() {
                            let locals = Locals {
                                index: Some(i),
                                key: Some(key.as_str()),
                                first: i == 0,
                                last: i == last,
                            };
                            self.scoped(item, Some(locals), body, out)?;
                        }
                        Ok(())
                    }
                    _ => self.render(inverse, out),
                }
            }
        }
    }

    fn scoped(
        &mut self,
        value: &'a Value,
        locals: Option<Locals<'a>>,
        body: &'a [Node],
        out: &mut String,
    ) -> Result<(), TemplateError> {
        self.stack.push(Frame { value, locals });
        let result = self.render(body, out);
        self.stack.pop();
        result
    }

    fn partial(&mut self, name: &str, context: Option<&'a Expr>, out: &mut String) -> Result<(), TemplateError> {
        let template = self
            .partials
            .and_then(|p| p.get(name))
            .ok_or_else(|| TemplateError::MissingPartial(name.to_string()))?;
        if self.partial_depth >= MAX_PARTIAL_DEPTH {
            return Err(TemplateError::PartialDepth(MAX_PARTIAL_DEPTH));
        }
        self.partial_depth += 1;
        let scope = context.map(|e| self.eval(e));
        let result = match scope {
            Some(Cow::Borrowed(v)) => self.scoped(v, None, template.nodes(), out),
            _ => self.render(template.nodes(), out),
        };
        self.partial_depth -= 1;
        result
    }

    fn eval(&self, expr: &'a Expr) -> Cow<'a, Value> {
        match expr {
            Expr::Literal(v) => Cow::Borrowed(v),
            Expr::Path(path) => self.resolve(path),
        }
    }

    fn resolve(&self, path: &PathExpr) -> Cow<'a, Value> {
        let base: Cow<'a, Value> = match &path.root {
            PathRoot::Scope { depth } => {
                let idx = self.stack.len().saturating_sub(1 + depth);
                Cow::Borrowed(self.stack.get(idx).map_or(&NULL, |f| f.value))
            }
            PathRoot::Data(name) => self.data(name),
        };
        match base {
            Cow::Borrowed(v) => Cow::Borrowed(walk(v, &path.segments).unwrap_or(&NULL)),
            Cow::Owned(v) => Cow::Owned(walk(&v, &path.segments).cloned().unwrap_or(Value::Null)),
        }
    }

    fn data(&self, name: &str) -> Cow<'a, Value> {
        let locals = self.stack.iter().rev().find_map(|f| f.locals);
        match (name, locals) {
            ("root", _) => Cow::Borrowed(self.ctx.root()),
            ("index", Some(l)) => l.index.map_or(Cow::Borrowed(&NULL), |i| Cow::Owned(Value::from(i))),
            ("key", Some(l)) => l
                .key
                .map_or(Cow::Borrowed(&NULL), |k| Cow::Owned(Value::String(k.to_string()))),
            ("first", Some(l)) => Cow::Owned(Value::Bool(l.first)),
            ("last", Some(l)) => Cow::Owned(Value::Bool(l.last)),
            ("index" | "key" | "first" | "last", None) => Cow::Borrowed(&NULL),
            (other, _) => Cow::Borrowed(self.ctx.data_value(other).unwrap_or(&NULL)),
        }
    }
}

fn walk<'v>(mut value: &'v Value, segments: &[String]) -> Option<&'v Value> {
    for seg in segments {
        value = match value {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Falsy values: `false`, `null`, `""`, `0`, and `[]`.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Text form of an interpolated value.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Serialize to JSON text. A failure becomes the error message inline.
pub(crate) fn to_json_text(value: &Value, indent: Option<u64>) -> String {
    let Some(width) = indent.filter(|w| *w > 0) else {
        return serde_json::to_string(value).unwrap_or_else(|e| e.to_string());
    };
    let indent = " ".repeat(usize::try_from(width).unwrap_or(2).min(16));
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match serde::Serialize::serialize(value, &mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|e| e.to_string()),
        Err(e) => e.to_string(),
    }
}
