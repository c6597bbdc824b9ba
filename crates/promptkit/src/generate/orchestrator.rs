//! The turn loop.

use super::config::GenerateOptions;
use super::events::{EventHandler, GenerateEvent, NoopHandler};
use super::execution::{ChainedTools, execute_tool_calls};
use super::resume::apply_resume;
use super::{GenerateResponse, Interrupt, ResumeDirective, TerminalState};
use crate::error::GenerateError;
use crate::model::{ChunkCallback, Model, ModelChunk, ModelResponse};
use crate::tools::ToolLookup;
use crate::{FinishReason, GenerationRequest, Message, ToolResponsePart, Usage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop states. Each iteration of [`Orchestrator::run`] consumes one state
/// and produces the next.
enum LoopState {
    ModelCall,
    ExecutingTools(ModelResponse),
    AppendAndLoop {
        message: Message,
        responses: Vec<ToolResponsePart>,
    },
    Done(ModelResponse, TerminalState),
    Interrupted(ModelResponse, Vec<Interrupt>),
}

/// Drives one generation: model call, tool batch, repeat.
///
/// ```ignore
/// let response = Orchestrator::new(&model, &tools, GenerateOptions::default())
///     .with_event_handler(&LoggingHandler)
///     .run(GenerationRequest::new(vec![Message::user("What's the weather?")]))
///     .await?;
///
/// if response.is_interrupted() {
///     // Ask the user, then call again with `response.messages` and
///     // `.with_resume(directives)`.
/// }
/// ```
pub struct Orchestrator<'a> {
    model: &'a dyn Model,
    tools: &'a dyn ToolLookup,
    fallback: Option<&'a dyn ToolLookup>,
    options: GenerateOptions,
    events: &'a dyn EventHandler,
    cancellation: CancellationToken,
    resume: Vec<ResumeDirective>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(model: &'a dyn Model, tools: &'a dyn ToolLookup, options: GenerateOptions) -> Self {
        Self {
            model,
            tools,
            fallback: None,
            options,
            events: &NoopHandler,
            cancellation: CancellationToken::new(),
            resume: Vec::new(),
        }
    }

    /// Tools consulted when the primary lookup has no match.
    pub fn with_fallback_tools(mut self, tools: &'a dyn ToolLookup) -> Self {
        self.fallback = Some(tools);
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = handler;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Directives applied to the request transcript before the first model
    /// call. The transcript must end with the interrupted model message.
    pub fn with_resume(mut self, directives: Vec<ResumeDirective>) -> Self {
        self.resume = directives;
        self
    }

    pub async fn run(mut self, mut request: GenerationRequest) -> Result<GenerateResponse, GenerateError> {
        let tools = ChainedTools {
            primary: self.tools,
            fallback: self.fallback,
        };
        let max_turns = self.options.max_turns;

        let directives = std::mem::take(&mut self.resume);
        if !directives.is_empty() {
            let responses = apply_resume(
                &mut request.messages,
                directives,
                &tools,
                &self.options,
                &self.cancellation,
            )
            .await?;
            self.events.on_event(&GenerateEvent::Resumed { responses });
        }

        let mut turn: u32 = 0;
        let mut usage = Usage::default();
        let mut state = LoopState::ModelCall;

        loop {
            state = match state {
                LoopState::ModelCall => {
                    self.events.on_event(&GenerateEvent::TurnStart {
                        turn,
                        max_turns,
                        messages: request.messages.len(),
                    });
                    let response = self.call_model(&request, turn).await?;
                    if let Some(u) = &response.usage {
                        usage.add(u);
                        self.events.on_event(&GenerateEvent::TokenUsage(u));
                    }
                    self.events.on_event(&GenerateEvent::ModelResponse {
                        turn,
                        message: &response.message,
                        finish_reason: response.finish_reason,
                    });
                    if !response.message.has_tool_requests() {
                        LoopState::Done(response, TerminalState::Done)
                    } else if self.options.return_tool_requests {
                        debug!("Returning tool requests to the caller");
                        LoopState::Done(response, TerminalState::ToolRequests)
                    } else if turn >= max_turns {
                        // No batch runs once the turn budget is spent.
                        warn!("Turn limit ({max_turns}) exceeded");
                        self.events
                            .on_event(&GenerateEvent::TurnLimitReached { max_turns });
                        return Err(GenerateError::TurnLimitExceeded { max_turns });
                    } else {
                        LoopState::ExecutingTools(response)
                    }
                }

                LoopState::ExecutingTools(mut response) => {
                    let count = response.message.tool_requests().count();
                    self.events
                        .on_event(&GenerateEvent::ToolCallsReceived { turn, count });
                    let batch = execute_tool_calls(
                        &mut response.message,
                        &tools,
                        &self.options,
                        &self.cancellation,
                        self.events,
                    )
                    .await?;
                    if batch.interrupts.is_empty() {
                        LoopState::AppendAndLoop {
                            message: response.message,
                            responses: batch.responses,
                        }
                    } else {
                        LoopState::Interrupted(response, batch.interrupts)
                    }
                }

                LoopState::AppendAndLoop { message, responses } => {
                    request.messages.push(message);
                    request.messages.push(Message::tool(responses));
                    turn += 1;
                    LoopState::ModelCall
                }

                LoopState::Done(response, terminal) => {
                    self.events.on_event(&GenerateEvent::Finished { turns: turn });
                    return Ok(finish(
                        request,
                        response,
                        terminal,
                        Vec::new(),
                        usage,
                        turn,
                    ));
                }

                LoopState::Interrupted(mut response, interrupts) => {
                    info!("Generation paused by {} interrupt(s)", interrupts.len());
                    self.events.on_event(&GenerateEvent::Interrupted {
                        interrupts: &interrupts,
                    });
                    response.finish_reason = FinishReason::Interrupted;
                    return Ok(finish(
                        request,
                        response,
                        TerminalState::Interrupted,
                        interrupts,
                        usage,
                        turn,
                    ));
                }
            };
        }
    }

    async fn call_model(
        &self,
        request: &GenerationRequest,
        turn: u32,
    ) -> Result<ModelResponse, GenerateError> {
        debug!(
            "Sending request to {} ({} messages, {} tools)",
            self.model.name(),
            request.messages.len(),
            request.tools.len()
        );
        let events = self.events;
        let on_chunk = move |chunk: ModelChunk| {
            events.on_event(&GenerateEvent::Chunk {
                turn,
                chunk: &chunk,
            });
        };
        let callback: ChunkCallback<'_> = &on_chunk;
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(GenerateError::Cancelled),
            result = self.model.invoke(request, Some(callback)) => Ok(result?),
        }
    }
}

fn finish(
    request: GenerationRequest,
    response: ModelResponse,
    state: TerminalState,
    interrupts: Vec<Interrupt>,
    usage: Usage,
    turns: u32,
) -> GenerateResponse {
    let mut messages = request.messages.clone();
    messages.push(response.message.clone());
    GenerateResponse {
        message: response.message,
        finish_reason: response.finish_reason,
        state,
        interrupts,
        messages,
        usage,
        turns,
        request,
    }
}
