//! Error types.
//!
//! Compile-time problems (schemas, templates, prompt configuration) surface
//! synchronously from definition building. Recoverable tool problems never
//! appear here: the orchestrator folds them into error tool-responses.
//! Everything in [`GenerateError`] aborts the call.

use crate::Role;
use thiserror::Error;

/// A picoschema or JSON Schema input that cannot be compiled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("picoschema: unsupported type '{type_name}' at '{path}'")]
    UnsupportedType { path: String, type_name: String },
    #[error(
        "picoschema: parenthetical kind must be 'array', 'object' or 'enum', got '{kind}' at '{path}'"
    )]
    UnsupportedKind { path: String, kind: String },
    #[error("picoschema: enum kind requires a list of values at '{path}'")]
    EnumRequiresList { path: String },
    #[error("picoschema: unexpected {found} at '{path}'; expected a type string, list, or map")]
    UnexpectedShape { path: String, found: &'static str },
    #[error("picoschema: malformed key '{key}' at '{path}'")]
    MalformedKey { path: String, key: String },
}

/// Template compile or render failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    #[error("template parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("template render error: partial '{0}' is not registered")]
    MissingPartial(String),
    #[error("template render error: partials nested deeper than {0} levels")]
    PartialDepth(usize),
}

/// Invalid prompt configuration, or input that fails the prompt's schema.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("prompt '{prompt}': option '{option}' was set more than once")]
    DuplicateOption {
        prompt: String,
        option: &'static str,
    },
    #[error("prompt '{0}': set either a model reference or a model name, not both")]
    ConflictingModel(String),
    #[error("prompt '{0}': no model configured")]
    MissingModel(String),
    #[error("prompt '{0}': no template text")]
    MissingTemplate(String),
    #[error("prompt '{0}': structured output requires an output schema")]
    StructuredWithoutSchema(String),
    #[error("prompt '{prompt}': input does not match schema: {}", .errors.join("; "))]
    InvalidInput {
        prompt: String,
        errors: Vec<String>,
    },
    #[error("prompt '{prompt}': input must be an object, got {found}")]
    InputNotObject {
        prompt: String,
        found: &'static str,
    },
    #[error("prompt '{prompt}': unknown tool '{tool}'")]
    UnknownTool { prompt: String, tool: String },
    #[error("invalid frontmatter in '{source_name}': {message}")]
    Frontmatter {
        source_name: String,
        message: String,
    },
    #[error("failed to read prompt source '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by a model capability.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("model '{model}' failed: {message}")]
pub struct ModelError {
    pub model: String,
    pub message: String,
}

impl ModelError {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Fatal outcomes of a generation call.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("exceeded maximum tool call turns ({max_turns})")]
    TurnLimitExceeded { max_turns: u32 },
    #[error("tool '{tool}' interrupted again while restarting request {reference:?}")]
    ReinterruptOnRestart {
        tool: String,
        reference: Option<String>,
    },
    #[error("resume requires the last message to be a model message, found {found:?}")]
    ResumeRequiresModelMessage { found: Option<Role> },
    #[error(
        "interrupted tool request '{tool}' ({reference:?}) was not answered by any resume directive"
    )]
    UnresolvedInterrupt {
        tool: String,
        reference: Option<String>,
    },
    #[error("restart directive names unknown tool '{0}'")]
    UnknownRestartTool(String),
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("generation cancelled")]
    Cancelled,
    #[error("model output is not valid JSON: {0}")]
    OutputNotJson(String),
    #[error("model output does not match the output schema: {}", .0.join("; "))]
    OutputSchemaMismatch(Vec<String>),
}
