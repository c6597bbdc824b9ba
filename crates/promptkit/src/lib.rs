//! Prompt templates, compact schemas, and a resumable tool-calling
//! generation loop for LLM applications.
//!
//! `promptkit` turns a declarative prompt (template text, a terse
//! [picoschema](schema::picoschema) dialect, model and tool configuration)
//! into a fully-formed [`GenerationRequest`], then drives the multi-turn
//! loop that invokes the model, executes requested tool calls, stops on
//! tool-triggered interrupts, and resumes a previously interrupted run.
//!
//! # Getting started
//!
//! ```ignore
//! use promptkit::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry.register_model(my_model);
//! registry.register_tool(FnTool::new(weather_def(), |args: WeatherArgs| async move {
//!     Ok(serde_json::json!({ "forecast": "sunny", "city": args.city }))
//! }));
//!
//! let prompt = registry.define_prompt(
//!     PromptDefinition::builder("forecast")
//!         .model_name("demo-model")
//!         .input_schema(serde_json::json!({ "city": "string, the city to report on" }))
//!         .tools(["weather"])
//!         .template("{{role \"system\"}}You are terse.{{role \"user\"}}Weather in {{city}}?"),
//! )?;
//!
//! let response = generate_prompt(
//!     &registry,
//!     &prompt,
//!     serde_json::json!({ "city": "Lisbon" }),
//!     PromptCall::default(),
//! )
//! .await?;
//! println!("{}", response.text());
//! ```
//!
//! # Where to find things
//!
//! - **Compile schemas:** [`schema::picoschema::compile`] turns the compact
//!   dialect into a [`Schema`](schema::Schema); full JSON Schemas pass through.
//! - **Render templates:** [`template::CompiledTemplate`] compiles once and
//!   renders concurrently; [`messages::to_messages`] splits rendered text into
//!   role-tagged [`Message`]s.
//! - **Define prompts:** [`prompt::PromptDefinition::builder`] or
//!   [`prompt::source::PromptSource`] for `.prompt` files with TOML
//!   frontmatter; [`Registry`](registry::Registry) keeps them by name.
//! - **Run the loop:** [`generate::Orchestrator`] and
//!   [`generate::generate_prompt`]. Resume an interrupted run with
//!   [`generate::ResumeDirective`].
//! - **Define tools:** the [`tools::Tool`] trait, [`tools::FnTool`] for
//!   closures, [`tools::InterruptTool`] for human-in-the-loop pauses.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`schema`] | normalized [`Schema`](schema::Schema), picoschema compiler, inference, validation |
//! | [`template`] | template compiler/renderer, directive markers, template cache, partials |
//! | [`messages`] | rendered text → role-tagged messages, history insertion |
//! | [`prompt`] | immutable [`PromptDefinition`](prompt::PromptDefinition), builder, `.prompt` sources |
//! | [`generate`] | the turn-loop state machine, tool execution, interrupts, resume |
//! | [`tools`] | [`Tool`](tools::Tool) trait, [`ToolSet`](tools::ToolSet), `FnTool`, `InterruptTool` |
//! | [`model`] | [`Model`](model::Model) capability trait and `FnModel` |
//! | [`registry`] | name → model / tool / prompt / schema lookups |

pub mod error;
pub mod generate;
pub mod messages;
pub mod model;
pub mod prelude;
pub mod prompt;
pub mod registry;
pub mod schema;
pub mod template;
pub mod tools;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::{GenerateError, ModelError, PromptError, SchemaError, TemplateError};

// Re-export schemars for downstream tool argument types.
pub use schemars;

/// JSON object map used for variables, metadata, and custom config.
pub type Map = serde_json::Map<String, serde_json::Value>;

/// Generate a JSON Schema value from a type implementing
/// `schemars::JsonSchema`. Used for typed tool inputs.
///
/// ```
/// use promptkit::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     city: String,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: schemars::JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Model,
    Tool,
}

impl Role {
    /// Parse a role name. `"assistant"` is accepted as an alias for `model`.
    pub fn parse(name: &str) -> Option<Role> {
        match name.trim() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "model" | "assistant" => Some(Role::Model),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Model => "model",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inline or remote media referenced from a message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaPart {
    /// A remote URL or a `data:` URL carrying the bytes inline.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Annotation placed on a tool request whose tool paused the run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InterruptMarker {
    /// Metadata the tool attached to its interrupt (`true` when it gave none).
    pub metadata: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequestPart {
    pub name: String,
    /// Call reference used to pair the request with its response.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
    /// Set when the tool interrupted instead of producing output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptMarker>,
    /// Output of a call that completed while a sibling call interrupted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_output: Option<serde_json::Value>,
    /// Former interrupt annotation, once a resume directive answered it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_interrupt: Option<InterruptMarker>,
}

impl ToolRequestPart {
    pub fn new(
        name: impl Into<String>,
        reference: Option<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            reference,
            input,
            interrupt: None,
            pending_output: None,
            resolved_interrupt: None,
        }
    }

    /// Whether this request and `(name, reference)` denote the same call.
    pub fn matches(&self, name: &str, reference: Option<&str>) -> bool {
        self.name == name && self.reference.as_deref() == reference
    }
}

/// The output of a tool call, sent back to the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResponsePart {
    pub name: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub output: serde_json::Value,
}

impl ToolResponsePart {
    pub fn new(
        name: impl Into<String>,
        reference: Option<String>,
        output: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            reference,
            output,
        }
    }

    /// An error response the model can react to.
    pub fn error(name: impl Into<String>, reference: Option<String>, message: &str) -> Self {
        Self::new(name, reference, serde_json::json!({ "error": message }))
    }

    /// Whether the output is an error payload produced by [`ToolResponsePart::error`].
    pub fn is_error(&self) -> bool {
        self.output.get("error").is_some_and(|e| e.is_string())
            && self.output.as_object().is_some_and(|o| o.len() == 1)
    }
}

/// The smallest unit of message content. Exactly one variant is populated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    Media(MediaPart),
    ToolRequest(ToolRequestPart),
    ToolResponse(ToolResponsePart),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn media(url: impl Into<String>, content_type: Option<String>) -> Self {
        Part::Media(MediaPart {
            url: url.into(),
            content_type,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequestPart> {
        match self {
            Part::ToolRequest(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponsePart> {
        match self {
            Part::ToolResponse(r) => Some(r),
            _ => None,
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map>,
}

impl Message {
    pub fn new(role: Role, content: Vec<Part>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub fn tool(responses: Vec<ToolResponsePart>) -> Self {
        Self::new(
            Role::Tool,
            responses.into_iter().map(Part::ToolResponse).collect(),
        )
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(Part::as_text).collect()
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequestPart> {
        self.content.iter().filter_map(Part::as_tool_request)
    }

    pub fn has_tool_requests(&self) -> bool {
        self.tool_requests().next().is_some()
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Read a metadata entry.
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Sampling configuration passed to the model. Unset fields defer to the
/// model's own defaults.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Provider-specific options, passed through untouched.
    #[serde(default, flatten)]
    pub custom: Map,
}

impl GenerationConfig {
    /// Overlay `other` on top of `self`: every field `other` sets wins.
    pub fn merged(&self, other: &GenerationConfig) -> GenerationConfig {
        let mut custom = self.custom.clone();
        for (k, v) in &other.custom {
            custom.insert(k.clone(), v.clone());
        }
        GenerationConfig {
            temperature: other.temperature.or(self.temperature),
            max_output_tokens: other.max_output_tokens.or(self.max_output_tokens),
            top_k: other.top_k.or(self.top_k),
            top_p: other.top_p.or(self.top_p),
            stop_sequences: if other.stop_sequences.is_empty() {
                self.stop_sequences.clone()
            } else {
                other.stop_sequences.clone()
            },
            custom,
        }
    }
}

/// Tool definition advertised to the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
        }
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// How the model may use the advertised tools.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

/// Requested shape of the final model output.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    /// JSON constrained to the output schema. Requires a schema.
    Structured,
}

/// The value sent to a model capability.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub config: GenerationConfig,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_output(mut self, format: OutputFormat, schema: Option<serde_json::Value>) -> Self {
        self.output_format = format;
        self.output_schema = schema;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Why the model (or the loop) stopped producing output.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    Blocked,
    /// A tool call paused the run; see `GenerateResponse::interrupts`.
    Interrupted,
    Other,
    #[default]
    Unknown,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Blocked => "blocked",
            FinishReason::Interrupted => "interrupted",
            FinishReason::Other => "other",
            FinishReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Token usage statistics.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.text(), "hello");

        let model = Message::model("prefill");
        assert_eq!(model.role, Role::Model);

        let tool = Message::tool(vec![ToolResponsePart::new(
            "echo",
            Some("call-1".into()),
            json!("ok"),
        )]);
        assert_eq!(tool.role, Role::Tool);
        assert!(!tool.has_tool_requests());
    }

    #[test]
    fn role_parse_accepts_assistant_alias() {
        assert_eq!(Role::parse("assistant"), Some(Role::Model));
        assert_eq!(Role::parse(" system "), Some(Role::System));
        assert_eq!(Role::parse("narrator"), None);
    }

    #[test]
    fn part_serializes_as_single_key_object() {
        let part = Part::ToolRequest(ToolRequestPart::new(
            "weather",
            Some("r1".into()),
            json!({"city": "Oslo"}),
        ));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["toolRequest"]["name"], "weather");
        assert_eq!(value["toolRequest"]["ref"], "r1");
        assert!(value["toolRequest"].get("interrupt").is_none());
        assert_eq!(serde_json::to_value(Part::text("hi")).unwrap(), json!({"text": "hi"}));
    }

    #[test]
    fn error_response_is_detected() {
        let err = ToolResponsePart::error("x", None, "boom");
        assert!(err.is_error());
        let ok = ToolResponsePart::new("x", None, json!({"error": "boom", "code": 3}));
        assert!(!ok.is_error());
    }

    #[test]
    fn config_merge_prefers_overlay() {
        let base = GenerationConfig {
            temperature: Some(0.2),
            top_k: Some(10),
            stop_sequences: vec!["END".into()],
            ..Default::default()
        };
        let overlay = GenerationConfig {
            temperature: Some(0.9),
            ..Default::default()
        };
        let merged = base.merged(&overlay);
        assert_eq!(merged.temperature, Some(0.9));
        assert_eq!(merged.top_k, Some(10));
        assert_eq!(merged.stop_sequences, vec!["END".to_string()]);
    }

    #[test]
    fn request_skips_empty_fields() {
        let req = GenerationRequest::new(vec![Message::user("hi")]);
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("outputSchema").is_none());
        assert!(value.get("toolChoice").is_none());
    }
}
