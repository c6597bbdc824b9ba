//! Events and handlers for the generation loop.
//!
//! The [`Orchestrator`](super::Orchestrator) reports progress through
//! [`GenerateEvent`] variants covering model calls, tool execution,
//! interrupts, and resume. Implement [`EventHandler`] to observe them.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Several handlers in order |

use super::Interrupt;
use crate::model::ModelChunk;
use crate::{FinishReason, Message, Usage};
use serde_json::Value;
use tracing::{debug, info, trace};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum GenerateEvent<'a> {
    /// A model call is about to start.
    TurnStart {
        turn: u32,
        max_turns: u32,
        messages: usize,
    },
    /// Partial output from a streaming model.
    Chunk { turn: u32, chunk: &'a ModelChunk },
    /// The model returned a response message.
    ModelResponse {
        turn: u32,
        message: &'a Message,
        finish_reason: FinishReason,
    },
    TokenUsage(&'a Usage),
    /// The response requested tool calls.
    ToolCallsReceived { turn: u32, count: usize },
    ToolExecuting {
        name: &'a str,
        reference: Option<&'a str>,
        input: &'a Value,
    },
    ToolResult {
        name: &'a str,
        reference: Option<&'a str>,
        output: &'a Value,
    },
    /// One or more tools paused the run.
    Interrupted { interrupts: &'a [Interrupt] },
    /// Resume directives were applied before the first model call.
    Resumed { responses: usize },
    /// The loop finished without further tool calls.
    Finished { turns: u32 },
    TurnLimitReached { max_turns: u32 },
}

/// Observer for [`GenerateEvent`]s. The default implementation ignores
/// everything.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &GenerateEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let GenerateEvent::ToolResult { name, .. } = event {
///         println!("{name} done");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&GenerateEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&GenerateEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&GenerateEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &GenerateEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches each event to several handlers in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &GenerateEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &GenerateEvent<'_>) {
        match event {
            GenerateEvent::TurnStart {
                turn,
                max_turns,
                messages,
            } => {
                info!("[turn {turn}/{max_turns}] calling model with {messages} message(s)");
            }
            GenerateEvent::Chunk { chunk, .. } => {
                trace!("Stream chunk: {} part(s)", chunk.content.len());
            }
            GenerateEvent::ModelResponse {
                message,
                finish_reason,
                ..
            } => {
                let text = message.text();
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "Model text ({finish_reason}): {preview}{}",
                    if text.len() > 200 { "..." } else { "" }
                );
            }
            GenerateEvent::TokenUsage(usage) => {
                debug!(
                    "Tokens: input={}, output={}",
                    usage.input_tokens, usage.output_tokens
                );
            }
            GenerateEvent::ToolCallsReceived { turn, count } => {
                debug!("{count} tool call(s) in turn {turn}");
            }
            GenerateEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            GenerateEvent::ToolResult { name, output, .. } => {
                debug!("Tool {name} result: {} bytes", output.to_string().len());
            }
            GenerateEvent::Interrupted { interrupts } => {
                let names: Vec<&str> = interrupts.iter().map(|i| i.tool_name.as_str()).collect();
                info!("Generation interrupted by {}", names.join(", "));
            }
            GenerateEvent::Resumed { responses } => {
                info!("Resumed with {responses} tool response(s)");
            }
            GenerateEvent::Finished { turns } => {
                info!("Generation finished after {turns} tool turn(s)");
            }
            GenerateEvent::TurnLimitReached { max_turns } => {
                info!("Generation hit turn limit ({max_turns})");
            }
        }
    }
}
