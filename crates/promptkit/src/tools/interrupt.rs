//! Human-in-the-loop tool.
//!
//! [`InterruptTool`] never produces output on first call: it interrupts the
//! run with its input as metadata so the caller can gather an answer (a
//! confirmation, a choice, free text) and resume. When the caller resumes
//! with a restart directive carrying resume metadata, the tool returns that
//! metadata as its output.

use crate::ToolDefinition;
use crate::tools::core::{Tool, ToolContext, ToolFuture, ToolOutcome};
use serde_json::{Value, json};

pub struct InterruptTool {
    def: ToolDefinition,
}

impl InterruptTool {
    /// An interrupt tool accepting any object input.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            def: ToolDefinition::new(name, description, json!({"type": "object"})),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.def.input_schema = schema;
        self
    }

    /// Derive the input schema from a type.
    pub fn with_input_for<T: schemars::JsonSchema>(self) -> Self {
        self.with_input_schema(crate::json_schema_for::<T>())
    }

    /// Schema of the answer the caller supplies on resume.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.def.output_schema = Some(schema);
        self
    }
}

impl Tool for InterruptTool {
    fn definition(&self) -> ToolDefinition {
        self.def.clone()
    }

    fn invoke(&self, ctx: ToolContext, input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            match ctx.resumed {
                Some(answer) => ToolOutcome::Success(answer),
                None => ToolOutcome::Interrupt(input),
            }
        })
    }
}
