//! Applying resume directives to an interrupted transcript.

use super::ResumeDirective;
use super::config::GenerateOptions;
use crate::error::GenerateError;
use crate::tools::{ToolContext, ToolLookup, ToolOutcome, run_tool};
use crate::{Message, Part, Role, ToolRequestPart, ToolResponsePart};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Answer every tool request of the final model message and append one tool
/// message with the responses. Returns the number of responses.
///
/// Requests carrying `pending_output` are answered from it. Every other
/// request needs a matching directive.
pub(crate) async fn apply_resume(
    messages: &mut Vec<Message>,
    mut directives: Vec<ResumeDirective>,
    tools: &dyn ToolLookup,
    options: &GenerateOptions,
    cancellation: &CancellationToken,
) -> Result<usize, GenerateError> {
    let found = messages.last().map(|m| m.role);
    let Some(last) = messages.last_mut().filter(|m| m.role == Role::Model) else {
        return Err(GenerateError::ResumeRequiresModelMessage { found });
    };

    let mut responses = Vec::new();
    for part in &mut last.content {
        let Part::ToolRequest(req) = part else {
            continue;
        };
        if let Some(output) = req.pending_output.take() {
            debug!("Reusing pending output of {}", req.name);
            responses.push(ToolResponsePart::new(
                req.name.clone(),
                req.reference.clone(),
                output,
            ));
            continue;
        }

        let position = directives
            .iter()
            .position(|d| req.matches(d.name(), d.reference()));
        let Some(directive) = position.map(|i| directives.remove(i)) else {
            return Err(GenerateError::UnresolvedInterrupt {
                tool: req.name.clone(),
                reference: req.reference.clone(),
            });
        };
        let response = answer(req, directive, tools, options, cancellation).await?;
        if let Some(marker) = req.interrupt.take() {
            req.resolved_interrupt = Some(marker);
        }
        responses.push(response);
    }

    for directive in &directives {
        warn!(
            "Resume directive for {} ({:?}) matches no pending tool request",
            directive.name(),
            directive.reference()
        );
    }

    let count = responses.len();
    if count > 0 {
        messages.push(Message::tool(responses));
    }
    Ok(count)
}

async fn answer(
    req: &mut ToolRequestPart,
    directive: ResumeDirective,
    tools: &dyn ToolLookup,
    options: &GenerateOptions,
    cancellation: &CancellationToken,
) -> Result<ToolResponsePart, GenerateError> {
    match directive {
        ResumeDirective::Respond { output, .. } => {
            debug!("Responding to {} without invoking it", req.name);
            Ok(ToolResponsePart::new(
                req.name.clone(),
                req.reference.clone(),
                output,
            ))
        }
        ResumeDirective::Restart {
            name,
            input,
            resumed,
            ..
        } => {
            if let Some(input) = input {
                req.input = input;
            }
            let tool = tools
                .find_tool(&name)
                .ok_or_else(|| GenerateError::UnknownRestartTool(name.clone()))?;
            let ctx = ToolContext::new(req.reference.clone())
                .with_resumed(resumed)
                .with_cancellation(cancellation.child_token());
            debug!("Restarting {name}");
            let outcome = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(GenerateError::Cancelled),
                outcome = run_tool(tool, ctx, req.input.clone(), options.run_tool_options()) => outcome,
            };
            match outcome {
                ToolOutcome::Success(output) => Ok(ToolResponsePart::new(
                    req.name.clone(),
                    req.reference.clone(),
                    output,
                )),
                ToolOutcome::Failure(error) => Ok(ToolResponsePart::error(
                    req.name.clone(),
                    req.reference.clone(),
                    &error,
                )),
                ToolOutcome::Interrupt(_) => Err(GenerateError::ReinterruptOnRestart {
                    tool: req.name.clone(),
                    reference: req.reference.clone(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{InterruptTool, NoTools, ToolSet};
    use crate::InterruptMarker;
    use serde_json::{Value, json};

    fn interrupted_transcript() -> Vec<Message> {
        let mut confirm = ToolRequestPart::new("confirm", Some("c1".into()), json!({"q": "ok?"}));
        confirm.interrupt = Some(InterruptMarker {
            metadata: json!({"q": "ok?"}),
        });
        let mut lookup = ToolRequestPart::new("lookup", Some("l1".into()), json!({}));
        lookup.pending_output = Some(json!("found"));
        vec![
            Message::user("do it"),
            Message::new(
                Role::Model,
                vec![Part::ToolRequest(lookup), Part::ToolRequest(confirm)],
            ),
        ]
    }

    async fn resume(
        messages: &mut Vec<Message>,
        directives: Vec<ResumeDirective>,
        tools: &dyn ToolLookup,
    ) -> Result<usize, GenerateError> {
        apply_resume(
            messages,
            directives,
            tools,
            &GenerateOptions::default(),
            &CancellationToken::new(),
        )
        .await
    }

    fn respond(name: &str, reference: &str, output: Value) -> ResumeDirective {
        ResumeDirective::Respond {
            name: name.into(),
            reference: Some(reference.into()),
            output,
        }
    }

    #[tokio::test]
    async fn respond_and_pending_output_fill_tool_message() {
        let mut messages = interrupted_transcript();
        let count = resume(&mut messages, vec![respond("confirm", "c1", json!("yes"))], &NoTools)
            .await
            .unwrap();
        assert_eq!(count, 2);
        let tool_message = messages.last().unwrap();
        assert_eq!(tool_message.role, Role::Tool);
        let outputs: Vec<_> = tool_message
            .content
            .iter()
            .filter_map(Part::as_tool_response)
            .map(|r| (r.reference.as_deref(), r.output.clone()))
            .collect();
        assert_eq!(outputs, [(Some("l1"), json!("found")), (Some("c1"), json!("yes"))]);

        let model = &messages[1];
        let confirm = model.tool_requests().nth(1).unwrap();
        assert!(confirm.interrupt.is_none());
        assert!(confirm.resolved_interrupt.is_some());
        assert!(model.tool_requests().all(|r| r.pending_output.is_none()));
    }

    #[tokio::test]
    async fn restart_passes_resume_metadata() {
        let tools = ToolSet::new().with(InterruptTool::new("confirm", "Ask"));
        let mut messages = interrupted_transcript();
        let directive = ResumeDirective::Restart {
            name: "confirm".into(),
            reference: Some("c1".into()),
            input: Some(json!({"q": "really?"})),
            resumed: Some(json!({"approved": true})),
        };
        resume(&mut messages, vec![directive], &tools).await.unwrap();
        let response = messages.last().unwrap().content[1].as_tool_response().unwrap().clone();
        assert_eq!(response.output, json!({"approved": true}));
        assert_eq!(
            messages[1].tool_requests().nth(1).unwrap().input,
            json!({"q": "really?"})
        );
    }

    #[tokio::test]
    async fn restart_of_panicking_tool_yields_error_response() {
        let tools = ToolSet::new().with(crate::tools::FnTool::new(
            crate::ToolDefinition::new("confirm", "Panics", json!({"type": "object"})),
            |_: Value| async move {
                let empty: Vec<i64> = Vec::new();
                Ok(json!(empty[3]))
            },
        ));
        let mut messages = interrupted_transcript();
        let directive = ResumeDirective::Restart {
            name: "confirm".into(),
            reference: Some("c1".into()),
            input: None,
            resumed: None,
        };
        resume(&mut messages, vec![directive], &tools).await.unwrap();
        let response = messages.last().unwrap().content[1].as_tool_response().unwrap();
        assert!(response.is_error());
        assert!(response.output["error"].as_str().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn restart_that_interrupts_again_is_fatal() {
        let tools = ToolSet::new().with(InterruptTool::new("confirm", "Ask"));
        let mut messages = interrupted_transcript();
        let directive = ResumeDirective::Restart {
            name: "confirm".into(),
            reference: Some("c1".into()),
            input: None,
            resumed: None,
        };
        let err = resume(&mut messages, vec![directive], &tools).await.unwrap_err();
        assert!(matches!(err, GenerateError::ReinterruptOnRestart { .. }));
    }

    #[tokio::test]
    async fn missing_directive_and_wrong_role_are_fatal() {
        let mut messages = interrupted_transcript();
        let err = resume(&mut messages, vec![respond("other", "x", json!(1))], &NoTools)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::UnresolvedInterrupt { ref tool, .. } if tool == "confirm"));

        let mut messages = vec![Message::user("hi")];
        let err = resume(&mut messages, vec![respond("confirm", "c1", json!(1))], &NoTools)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::ResumeRequiresModelMessage {
                found: Some(Role::User)
            }
        ));
    }

    #[tokio::test]
    async fn restart_of_unknown_tool_is_fatal() {
        let mut messages = interrupted_transcript();
        let directive = ResumeDirective::Restart {
            name: "confirm".into(),
            reference: Some("c1".into()),
            input: None,
            resumed: None,
        };
        let err = resume(&mut messages, vec![directive], &NoTools).await.unwrap_err();
        assert!(matches!(err, GenerateError::UnknownRestartTool(ref n) if n == "confirm"));
    }
}
