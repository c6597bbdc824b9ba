//! The generation loop.
//!
//! [`Orchestrator`] alternates model calls and tool execution until the
//! model stops requesting tools, a tool interrupts, or the turn limit is
//! hit. An interrupted run is continued by calling again with the full
//! transcript and one [`ResumeDirective`] per [`Interrupt`].
//!
//! [`generate_prompt`] is the convenience entry point that renders a
//! [`PromptDefinition`] and runs it with a [`Registry`].

pub mod config;
pub mod events;
mod execution;
mod orchestrator;
mod resume;

pub use config::{DEFAULT_MAX_TURNS, GenerateOptions};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, GenerateEvent, LoggingHandler,
    NoopHandler,
};
pub use orchestrator::Orchestrator;

use crate::error::GenerateError;
use crate::prompt::{ModelSelector, PromptDefinition, RenderOptions};
use crate::registry::Registry;
use crate::schema::validate_json;
use crate::{FinishReason, GenerationConfig, GenerationRequest, Map, Message, ToolRequestPart, Usage};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// ── Interrupts and resume ──────────────────────────────────────────

/// A tool call that paused the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Interrupt {
    pub tool_name: String,
    pub reference: Option<String>,
    /// Input the model passed to the tool.
    pub input: Value,
    /// Metadata the tool attached to the interrupt.
    pub metadata: Value,
}

/// Caller instruction for one pending interrupt, consumed at the start of a
/// resumed call.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDirective {
    /// Supply the tool output without invoking the tool.
    Respond {
        name: String,
        reference: Option<String>,
        output: Value,
    },
    /// Invoke the tool again. `resumed` is handed to the tool through
    /// [`ToolContext::resumed`](crate::tools::ToolContext::resumed); `input`
    /// replaces the original request input when set.
    Restart {
        name: String,
        reference: Option<String>,
        input: Option<Value>,
        resumed: Option<Value>,
    },
}

impl ResumeDirective {
    pub fn respond(interrupt: &Interrupt, output: Value) -> Self {
        ResumeDirective::Respond {
            name: interrupt.tool_name.clone(),
            reference: interrupt.reference.clone(),
            output,
        }
    }

    pub fn restart(interrupt: &Interrupt) -> Self {
        ResumeDirective::Restart {
            name: interrupt.tool_name.clone(),
            reference: interrupt.reference.clone(),
            input: None,
            resumed: None,
        }
    }

    /// Attach resume metadata to a `Restart`. No effect on `Respond`.
    pub fn with_resumed(mut self, value: Value) -> Self {
        if let ResumeDirective::Restart { resumed, .. } = &mut self {
            *resumed = Some(value);
        }
        self
    }

    /// Replace the request input of a `Restart`. No effect on `Respond`.
    pub fn with_input(mut self, value: Value) -> Self {
        if let ResumeDirective::Restart { input, .. } = &mut self {
            *input = Some(value);
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            ResumeDirective::Respond { name, .. } | ResumeDirective::Restart { name, .. } => name,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            ResumeDirective::Respond { reference, .. }
            | ResumeDirective::Restart { reference, .. } => reference.as_deref(),
        }
    }
}

// ── Response ───────────────────────────────────────────────────────

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Done,
    Interrupted,
    /// The model asked for tools and the caller opted to run them itself.
    ToolRequests,
}

/// Result of a generation call.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The last model message. On interrupt its tool requests carry
    /// interrupt or pending-output annotations.
    pub message: Message,
    pub finish_reason: FinishReason,
    pub state: TerminalState,
    pub interrupts: Vec<Interrupt>,
    /// Full transcript including `message`. Pass it back as history to
    /// resume.
    pub messages: Vec<Message>,
    pub usage: Usage,
    /// Completed tool turns.
    pub turns: u32,
    /// The last request sent to the model.
    pub request: GenerationRequest,
}

impl GenerateResponse {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_requests(&self) -> Vec<&ToolRequestPart> {
        self.message.tool_requests().collect()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state == TerminalState::Interrupted
    }

    /// Parse the response text as JSON, validating it against the request's
    /// output schema when one was set.
    pub fn output_value(&self) -> Result<Value, GenerateError> {
        let text = self.text();
        let value = extract_json(&text)
            .ok_or_else(|| GenerateError::OutputNotJson(preview(&text)))?;
        if let Some(schema) = &self.request.output_schema {
            validate_json(schema, &value).map_err(GenerateError::OutputSchemaMismatch)?;
        }
        Ok(value)
    }

    /// Deserialize the response output into `T`.
    pub fn output<T: DeserializeOwned>(&self) -> Result<T, GenerateError> {
        let value = self.output_value()?;
        serde_json::from_value(value).map_err(|e| GenerateError::OutputNotJson(e.to_string()))
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        out.push_str("...");
    }
    out
}

/// Find a JSON value in model text: the whole text, the body of a fenced
/// code block, or the span from the first `{`/`[` to the last `}`/`]`.
fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    if let Some(body) = fenced_body(trimmed)
        && let Ok(v) = serde_json::from_str(body.trim())
    {
        return Some(v);
    }
    let start = trimmed.find(['{', '['])?;
    let end = trimmed.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    let (_, rest) = trimmed.split_at(start);
    let candidate = rest.get(..=end - start)?;
    serde_json::from_str(candidate).ok()
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let (_, after) = text.split_at(open + 3);
    let newline = after.find('\n')?;
    let (_, body) = after.split_at(newline + 1);
    let close = body.find("```")?;
    body.get(..close)
}

// ── Prompt entry point ─────────────────────────────────────────────

/// Per-call arguments for [`generate_prompt`].
#[derive(Default)]
pub struct PromptCall<'a> {
    /// Overrides the default options. The prompt's `max_turns` still wins.
    pub options: Option<GenerateOptions>,
    /// Prior conversation. When `resume` is non-empty this must be the full
    /// transcript returned by the interrupted call.
    pub history: Vec<Message>,
    pub resume: Vec<ResumeDirective>,
    pub events: Option<&'a dyn EventHandler>,
    pub cancellation: Option<CancellationToken>,
    /// Overlaid on the prompt's configuration.
    pub config: Option<GenerationConfig>,
    /// Template data variables (`@name`).
    pub data: Map,
}

impl<'a> PromptCall<'a> {
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_resume(mut self, directives: Vec<ResumeDirective>) -> Self {
        self.resume = directives;
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_events(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = Some(handler);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Render `prompt` with `input` and run the generation loop against the
/// registry's models and tools.
///
/// When `call.resume` is non-empty the prompt is still rendered (for tools,
/// config, and output settings) but the request messages are replaced by
/// `call.history`, which must end with the interrupted model message.
pub async fn generate_prompt(
    registry: &Registry,
    prompt: &PromptDefinition,
    input: Value,
    call: PromptCall<'_>,
) -> Result<GenerateResponse, GenerateError> {
    let model = match prompt.model() {
        ModelSelector::Reference(model) => model.as_ref(),
        ModelSelector::Name(name) => registry
            .model(name)
            .ok_or_else(|| GenerateError::UnknownModel(name.clone()))?,
    };

    let resuming = !call.resume.is_empty();
    let render_options = RenderOptions {
        history: if resuming { Vec::new() } else { call.history.clone() },
        partials: Some(registry.partials()),
        data: call.data,
    };
    let mut request = prompt.to_request(input, &render_options, registry)?;
    if resuming {
        request.messages = call.history;
    }
    if let Some(config) = &call.config {
        request.config = request.config.merged(config);
    }

    let mut options = call.options.unwrap_or_default();
    if let Some(max_turns) = prompt.max_turns() {
        options.max_turns = max_turns;
    }

    let mut orchestrator = Orchestrator::new(model, registry, options).with_resume(call.resume);
    if let Some(events) = call.events {
        orchestrator = orchestrator.with_event_handler(events);
    }
    if let Some(token) = call.cancellation {
        orchestrator = orchestrator.with_cancellation(token);
    }
    orchestrator.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_with_text(text: &str, schema: Option<Value>) -> GenerateResponse {
        GenerateResponse {
            message: Message::model(text),
            finish_reason: FinishReason::Stop,
            state: TerminalState::Done,
            interrupts: Vec::new(),
            messages: Vec::new(),
            usage: Usage::default(),
            turns: 0,
            request: GenerationRequest::default().with_output(crate::OutputFormat::Json, schema),
        }
    }

    #[test]
    fn extracts_plain_fenced_and_embedded_json() {
        assert_eq!(extract_json(r#" {"a": 1} "#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("```json\n{\"a\": [1, 2]}\n```"),
            Some(json!({"a": [1, 2]}))
        );
        assert_eq!(
            extract_json("Here you go: {\"ok\": true}. Anything else?"),
            Some(json!({"ok": true}))
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn output_validates_against_schema() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
        });
        let ok = response_with_text(r#"{"name": "Ada"}"#, Some(schema.clone()));
        assert_eq!(ok.output_value().unwrap(), json!({"name": "Ada"}));

        let bad = response_with_text(r#"{"age": 3}"#, Some(schema));
        assert!(matches!(
            bad.output_value(),
            Err(GenerateError::OutputSchemaMismatch(_))
        ));
    }

    #[test]
    fn typed_output() {
        #[derive(serde::Deserialize)]
        struct Person {
            name: String,
        }
        let response = response_with_text("```\n{\"name\": \"Grace\"}\n```", None);
        let person: Person = response.output().unwrap();
        assert_eq!(person.name, "Grace");
        assert!(matches!(
            response_with_text("nope", None).output::<Person>(),
            Err(GenerateError::OutputNotJson(_))
        ));
    }

    #[test]
    fn directive_builders() {
        let interrupt = Interrupt {
            tool_name: "confirm".into(),
            reference: Some("r1".into()),
            input: json!({}),
            metadata: json!(true),
        };
        let restart = ResumeDirective::restart(&interrupt)
            .with_resumed(json!({"approved": true}))
            .with_input(json!({"amount": 3}));
        assert_eq!(restart.name(), "confirm");
        assert_eq!(restart.reference(), Some("r1"));
        let ResumeDirective::Restart { input, resumed, .. } = restart else {
            panic!("expected restart");
        };
        assert_eq!(input, Some(json!({"amount": 3})));
        assert_eq!(resumed, Some(json!({"approved": true})));

        let respond = ResumeDirective::respond(&interrupt, json!("yes")).with_resumed(json!(1));
        assert!(matches!(respond, ResumeDirective::Respond { .. }));
    }
}
