//! Tools the model can call.

pub mod core;
pub mod interrupt;

pub use self::core::{
    FnTool, NoTools, RunToolOptions, Tool, ToolContext, ToolFuture, ToolLookup, ToolOutcome,
    ToolSet, log_tool_call, run_tool, validate_tool_input,
};
pub use self::interrupt::InterruptTool;
