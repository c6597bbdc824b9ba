//! Configuration for the [`Orchestrator`](super::Orchestrator) loop.

use crate::tools::RunToolOptions;
use std::time::Duration;

/// Default maximum number of tool turns per generation.
pub const DEFAULT_MAX_TURNS: u32 = 5;

/// Options for one generation.
///
/// ```ignore
/// let options = GenerateOptions::default()
///     .with_max_turns(10)
///     .with_tool_timeout(Some(Duration::from_secs(30)))
///     .with_concurrent_tools(false);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Tool turns allowed before the run fails with
    /// [`TurnLimitExceeded`](crate::GenerateError::TurnLimitExceeded).
    pub max_turns: u32,
    /// Run the tool calls of one model response concurrently. Results keep
    /// request order either way.
    pub concurrent_tools: bool,
    /// Validate tool input against each tool's input schema.
    pub validate_tool_input: bool,
    /// Per-call tool timeout. `None` disables timeouts.
    pub tool_timeout: Option<Duration>,
    /// Stop after the first model call and hand tool requests back to the
    /// caller without executing them.
    pub return_tool_requests: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            concurrent_tools: true,
            validate_tool_input: true,
            tool_timeout: None,
            return_tool_requests: false,
        }
    }
}

impl GenerateOptions {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_concurrent_tools(mut self, enabled: bool) -> Self {
        self.concurrent_tools = enabled;
        self
    }

    pub fn with_tool_validation(mut self, enabled: bool) -> Self {
        self.validate_tool_input = enabled;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_return_tool_requests(mut self, enabled: bool) -> Self {
        self.return_tool_requests = enabled;
        self
    }

    pub(crate) fn run_tool_options(&self) -> RunToolOptions {
        RunToolOptions {
            validate_input: self.validate_tool_input,
            timeout: self.tool_timeout,
        }
    }
}
