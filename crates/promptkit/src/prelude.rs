//! Convenience re-exports for common `promptkit` types.
//!
//! ```ignore
//! use promptkit::prelude::*;
//! ```
//!
//! Covers defining prompts, registering models and tools, and running the
//! generation loop. Template internals, schema validation helpers, and
//! prompt file parsing live in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    FinishReason, GenerationConfig, GenerationRequest, Message, OutputFormat, Part, Role,
    ToolChoice, ToolDefinition, ToolRequestPart, ToolResponsePart, Usage, json_schema_for,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{GenerateError, ModelError, PromptError};

// ── Prompts ─────────────────────────────────────────────────────────
pub use crate::prompt::{PromptDefinition, RenderOptions};
pub use crate::registry::Registry;

// ── Generation ──────────────────────────────────────────────────────
pub use crate::generate::{
    CompositeEventHandler, EventHandler, FnEventHandler, GenerateEvent, GenerateOptions,
    GenerateResponse, Interrupt, LoggingHandler, NoopHandler, Orchestrator, PromptCall,
    ResumeDirective, TerminalState, generate_prompt,
};
pub use crate::model::{FnModel, Model, ModelChunk, ModelResponse};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, InterruptTool, Tool, ToolContext, ToolOutcome, ToolSet};
