//! Tool abstraction for model function-calling.
//!
//! The [`Tool`] trait defines the interface every tool implements: a static
//! [`ToolDefinition`] advertised to the model and an async `invoke` that
//! produces a [`ToolOutcome`]. Tools are collected into a [`ToolSet`] which
//! handles lookup and definition export. [`run_tool`] wraps one invocation
//! with input validation, timing, and an optional timeout.

use crate::ToolDefinition;
use crate::schema::validate_json;
use serde_json::Value;
use std::collections::HashMap;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Boxed future returned by [`Tool::invoke`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>>;

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Normal output, sent back to the model.
    Success(Value),
    /// Pause the run. The value is interrupt metadata for the caller.
    Interrupt(Value),
    /// The tool failed. The model receives the message as an error response.
    Failure(String),
}

impl From<Result<Value, String>> for ToolOutcome {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(v) => ToolOutcome::Success(v),
            Err(e) => ToolOutcome::Failure(e),
        }
    }
}

/// Per-call information handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Call reference from the model's tool request.
    pub reference: Option<String>,
    /// Resume metadata when the call is a restart of an interrupted request.
    pub resumed: Option<Value>,
    /// Cancelled when the surrounding generation is cancelled.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(reference: Option<String>) -> Self {
        Self {
            reference,
            ..Default::default()
        }
    }

    pub fn with_resumed(mut self, resumed: Option<Value>) -> Self {
        self.resumed = resumed;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke.
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new("clock", "Current UTC time", json!({"type": "object"}))
///     }
///
///     fn invoke(&self, _ctx: ToolContext, _input: Value) -> ToolFuture<'_> {
///         Box::pin(async move { ToolOutcome::Success(json!("12:00")) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Problems are reported as [`ToolOutcome::Failure`]
    /// rather than panics; the loop forwards them to the model.
    fn invoke(&self, ctx: ToolContext, input: Value) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().name
    }
}

/// Name → tool lookup.
pub trait ToolLookup: Send + Sync {
    fn find_tool(&self, name: &str) -> Option<&dyn Tool>;
}

/// A lookup that knows no tools.
pub struct NoTools;

impl ToolLookup for NoTools {
    fn find_tool(&self, _name: &str) -> Option<&dyn Tool> {
        None
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools addressed by name.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with(Clock)
///     .with_if(allow_pause, InterruptTool::new("confirm", "Ask the user to confirm"));
/// ```
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|n| self.get(n))
            .map(|t| t.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolLookup for ToolSet {
    fn find_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.get(name)
    }
}

// ── FnTool ────────────────────────────────────────────────────────

type ErasedToolHandler =
    Box<dyn Fn(ToolContext, Value) -> Pin<Box<dyn Future<Output = ToolOutcome> + Send>> + Send + Sync>;

/// A closure-based tool that deserializes its input and delegates to a
/// handler.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct WeatherArgs {
///     /// City to report on.
///     city: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDefinition::new("weather", "Current weather", json_schema_for::<WeatherArgs>()),
///     |args: WeatherArgs| async move { Ok(json!({"city": args.city, "sky": "clear"})) },
/// );
/// ```
pub struct FnTool {
    def: ToolDefinition,
    handler: ErasedToolHandler,
}

impl FnTool {
    /// Tool whose handler returns output or an error message.
    pub fn new<A, F, Fut>(def: ToolDefinition, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self::with_context(def, move |_ctx: ToolContext, args: A| {
            let fut = handler(args);
            async move { ToolOutcome::from(fut.await) }
        })
    }

    /// Tool whose handler sees the call context and may interrupt.
    pub fn with_context<A, F, Fut>(def: ToolDefinition, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(ToolContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutcome> + Send + 'static,
    {
        let erased = move |ctx: ToolContext,
                           input: Value|
              -> Pin<Box<dyn Future<Output = ToolOutcome> + Send>> {
            match serde_json::from_value::<A>(input) {
                Ok(args) => Box::pin(handler(ctx, args)),
                Err(e) => Box::pin(async move {
                    ToolOutcome::Failure(format!("invalid tool input: {e}"))
                }),
            }
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.def.clone()
    }

    fn invoke(&self, ctx: ToolContext, input: Value) -> ToolFuture<'_> {
        (self.handler)(ctx, input)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Checks applied by [`run_tool`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunToolOptions {
    pub validate_input: bool,
    pub timeout: Option<Duration>,
}

/// Validate tool input against the tool's declared input schema.
///
/// Returns `None` if valid, or a message the model can act on.
pub fn validate_tool_input(def: &ToolDefinition, input: &Value) -> Option<String> {
    let errors = validate_json(&def.input_schema, input).err()?;
    Some(format!(
        "input validation failed for tool '{}': {}",
        def.name,
        errors.join("; ")
    ))
}

/// Invoke `tool` with validation, logging, and an optional timeout.
pub async fn run_tool(
    tool: &dyn Tool,
    ctx: ToolContext,
    input: Value,
    options: RunToolOptions,
) -> ToolOutcome {
    let def = tool.definition();
    let name = def.name.as_str();

    if options.validate_input
        && let Some(error) = validate_tool_input(&def, &input)
    {
        debug!("Tool {name} rejected input: {error}");
        return ToolOutcome::Failure(error);
    }

    log_tool_call(name, &input);
    let start = std::time::Instant::now();

    // Panics surface as tool failures.
    let call = AssertUnwindSafe(async move { tool.invoke(ctx, input).await }).catch_unwind();
    let outcome = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result.unwrap_or_else(|payload| panic_failure(name, payload)),
            Err(_) => {
                info!(
                    "Tool {name} timed out after {:.1}s",
                    start.elapsed().as_secs_f64()
                );
                ToolOutcome::Failure(format!(
                    "tool '{name}' timed out after {:.0} seconds",
                    limit.as_secs_f64()
                ))
            }
        },
        None => call
            .await
            .unwrap_or_else(|payload| panic_failure(name, payload)),
    };

    let elapsed = start.elapsed();
    match &outcome {
        ToolOutcome::Success(v) => {
            debug!("Tool {name} completed in {:.0}ms", elapsed.as_secs_f64() * 1000.0);
            trace!("Tool {name} output: {v}");
        }
        ToolOutcome::Interrupt(meta) => info!("Tool {name} interrupted: {meta}"),
        ToolOutcome::Failure(e) => debug!("Tool {name} failed: {e}"),
    }
    outcome
}

fn panic_failure(name: &str, payload: Box<dyn Any + Send>) -> ToolOutcome {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!("Tool {name} panicked: {message}");
    ToolOutcome::Failure(format!("tool '{name}' panicked: {message}"))
}

/// Log a tool call at INFO level with a truncated preview of its input.
pub fn log_tool_call(name: &str, input: &Value) {
    let arguments = input.to_string();
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.len() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}
