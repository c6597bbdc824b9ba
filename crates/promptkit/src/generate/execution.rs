//! Tool batch execution.
//!
//! Called by [`super::Orchestrator::run()`] once per model response that
//! requests tools. Calls are looked up, run (concurrently or in order), and
//! folded back into request order.

use super::Interrupt;
use super::config::GenerateOptions;
use super::events::{EventHandler, GenerateEvent};
use crate::error::GenerateError;
use crate::tools::{RunToolOptions, Tool, ToolContext, ToolLookup, ToolOutcome, run_tool};
use crate::{InterruptMarker, Message, Part, ToolRequestPart, ToolResponsePart};
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Primary tools first, then the fallback lookup.
pub(crate) struct ChainedTools<'a> {
    pub primary: &'a dyn ToolLookup,
    pub fallback: Option<&'a dyn ToolLookup>,
}

impl ToolLookup for ChainedTools<'_> {
    fn find_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.primary
            .find_tool(name)
            .or_else(|| self.fallback.and_then(|f| f.find_tool(name)))
    }
}

/// What one batch produced.
pub(crate) struct ToolBatch {
    /// Responses in request order. Empty when any call interrupted.
    pub responses: Vec<ToolResponsePart>,
    pub interrupts: Vec<Interrupt>,
}

/// Per-request slot: a response, or interrupt metadata.
type Slot = Result<ToolResponsePart, Value>;

/// Execute every tool request in `message`.
///
/// On interrupt, the request parts of `message` are annotated in place:
/// interrupted calls get an [`InterruptMarker`], completed siblings get
/// `pending_output`.
pub(crate) async fn execute_tool_calls(
    message: &mut Message,
    tools: &dyn ToolLookup,
    options: &GenerateOptions,
    cancellation: &CancellationToken,
    events: &dyn EventHandler,
) -> Result<ToolBatch, GenerateError> {
    let requests: Vec<ToolRequestPart> = message.tool_requests().cloned().collect();
    let run_options = options.run_tool_options();

    let calls = requests
        .iter()
        .map(|req| execute_one(req, tools, run_options, cancellation, events));
    let batch = async {
        if options.concurrent_tools {
            join_all(calls).await
        } else {
            let mut outcomes = Vec::with_capacity(requests.len());
            for call in calls {
                outcomes.push(call.await);
            }
            outcomes
        }
    };
    let outcomes = tokio::select! {
        biased;
        _ = cancellation.cancelled() => return Err(GenerateError::Cancelled),
        outcomes = batch => outcomes,
    };

    let mut slots: Vec<Slot> = Vec::with_capacity(requests.len());
    let mut interrupts = Vec::new();
    for (req, outcome) in requests.iter().zip(outcomes) {
        match outcome {
            ToolOutcome::Success(output) => {
                events.on_event(&GenerateEvent::ToolResult {
                    name: &req.name,
                    reference: req.reference.as_deref(),
                    output: &output,
                });
                slots.push(Ok(ToolResponsePart::new(
                    req.name.clone(),
                    req.reference.clone(),
                    output,
                )));
            }
            ToolOutcome::Failure(error) => {
                let response = ToolResponsePart::error(req.name.clone(), req.reference.clone(), &error);
                events.on_event(&GenerateEvent::ToolResult {
                    name: &req.name,
                    reference: req.reference.as_deref(),
                    output: &response.output,
                });
                slots.push(Ok(response));
            }
            ToolOutcome::Interrupt(metadata) => {
                let metadata = if metadata.is_null() {
                    Value::Bool(true)
                } else {
                    metadata
                };
                interrupts.push(Interrupt {
                    tool_name: req.name.clone(),
                    reference: req.reference.clone(),
                    input: req.input.clone(),
                    metadata: metadata.clone(),
                });
                slots.push(Err(metadata));
            }
        }
    }

    if interrupts.is_empty() {
        let responses = slots.into_iter().filter_map(Result::ok).collect();
        return Ok(ToolBatch {
            responses,
            interrupts,
        });
    }

    debug!(
        "{} of {} tool call(s) interrupted",
        interrupts.len(),
        requests.len()
    );
    annotate_requests(message, slots);
    Ok(ToolBatch {
        responses: Vec::new(),
        interrupts,
    })
}

async fn execute_one(
    req: &ToolRequestPart,
    tools: &dyn ToolLookup,
    options: RunToolOptions,
    cancellation: &CancellationToken,
    events: &dyn EventHandler,
) -> ToolOutcome {
    events.on_event(&GenerateEvent::ToolExecuting {
        name: &req.name,
        reference: req.reference.as_deref(),
        input: &req.input,
    });
    let Some(tool) = tools.find_tool(&req.name) else {
        warn!("Model requested unknown tool '{}'", req.name);
        return ToolOutcome::Failure(format!("unknown tool '{}'", req.name));
    };
    let ctx = ToolContext::new(req.reference.clone()).with_cancellation(cancellation.child_token());
    run_tool(tool, ctx, req.input.clone(), options).await
}

fn annotate_requests(message: &mut Message, slots: Vec<Slot>) {
    let parts = message.content.iter_mut().filter_map(|part| match part {
        Part::ToolRequest(req) => Some(req),
        _ => None,
    });
    for (req, slot) in parts.zip(slots) {
        match slot {
            Ok(response) => req.pending_output = Some(response.output),
            Err(metadata) => req.interrupt = Some(InterruptMarker { metadata }),
        }
    }
}
