use promptkit::prelude::*;
use promptkit::tools::NoTools;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Helpers ────────────────────────────────────────────────────────

/// A model that replays scripted responses and records every request.
struct Scripted {
    replies: Mutex<VecDeque<Message>>,
    seen: Arc<Mutex<Vec<GenerationRequest>>>,
}

fn scripted(replies: Vec<Message>) -> (FnModel, Arc<Mutex<Vec<GenerationRequest>>>) {
    let script = Arc::new(Scripted {
        replies: Mutex::new(replies.into()),
        seen: Arc::new(Mutex::new(Vec::new())),
    });
    let seen = Arc::clone(&script.seen);
    let model = FnModel::new("scripted", move |req: GenerationRequest| {
        let script = Arc::clone(&script);
        async move {
            script.seen.lock().unwrap().push(req);
            let reply = script
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Message::model("script exhausted"));
            Ok(ModelResponse::new(reply).with_usage(Usage {
                input_tokens: 10,
                output_tokens: 2,
                total_tokens: 12,
            }))
        }
    });
    (model, seen)
}

fn calls(requests: &[(&str, &str, Value)]) -> Message {
    Message::new(
        Role::Model,
        requests
            .iter()
            .map(|(name, reference, input)| {
                Part::ToolRequest(ToolRequestPart::new(
                    *name,
                    Some((*reference).to_string()),
                    input.clone(),
                ))
            })
            .collect(),
    )
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct WeatherArgs {
    city: String,
}

fn tools() -> ToolSet {
    ToolSet::new()
        .with(FnTool::new(
            ToolDefinition::new("weather", "Current weather", json_schema_for::<WeatherArgs>()),
            |args: WeatherArgs| async move { Ok(json!({"city": args.city, "sky": "clear"})) },
        ))
        .with(InterruptTool::new("confirm", "Ask the user to confirm"))
}

fn tool_responses(message: &Message) -> Vec<&ToolResponsePart> {
    message
        .content
        .iter()
        .filter_map(Part::as_tool_response)
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_results_feed_the_next_model_call() {
    let (model, seen) = scripted(vec![
        calls(&[("weather", "w1", json!({"city": "Oslo"}))]),
        Message::model("It is clear in Oslo."),
    ]);
    let tools = tools();
    let response = Orchestrator::new(&model, &tools, GenerateOptions::default())
        .run(GenerationRequest::new(vec![Message::user("Weather?")]))
        .await
        .unwrap();

    assert_eq!(response.text(), "It is clear in Oslo.");
    assert_eq!(response.state, TerminalState::Done);
    assert_eq!(response.turns, 1);
    assert_eq!(response.usage.total_tokens, 24);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let second = &seen[1].messages;
    let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Model, Role::Tool]);
    let responses = tool_responses(&second[2]);
    assert_eq!(responses[0].reference.as_deref(), Some("w1"));
    assert_eq!(responses[0].output["sky"], "clear");
}

#[tokio::test]
async fn invalid_tool_input_becomes_error_response() {
    let (model, seen) = scripted(vec![
        calls(&[("weather", "w1", json!({"town": "Oslo"}))]),
        Message::model("Sorry."),
    ]);
    let tools = tools();
    Orchestrator::new(&model, &tools, GenerateOptions::default())
        .run(GenerationRequest::new(vec![Message::user("Weather?")]))
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    let responses = tool_responses(&seen[1].messages[2]);
    assert!(responses[0].is_error());
    assert!(
        responses[0].output["error"]
            .as_str()
            .unwrap()
            .contains("input validation failed")
    );
}

#[tokio::test]
async fn panicking_tool_becomes_error_response() {
    let (model, seen) = scripted(vec![
        calls(&[("explode", "e1", json!({})), ("weather", "w1", json!({"city": "Oslo"}))]),
        Message::model("recovered"),
    ]);
    let tools = tools().with(FnTool::new(
        ToolDefinition::new("explode", "Always panics", json!({"type": "object"})),
        |_: Value| async move {
            let empty: Vec<i64> = Vec::new();
            Ok(json!(empty[3]))
        },
    ));
    let response = Orchestrator::new(&model, &tools, GenerateOptions::default())
        .run(GenerationRequest::new(vec![Message::user("Go")]))
        .await
        .unwrap();
    assert_eq!(response.text(), "recovered");
    let seen = seen.lock().unwrap();
    let responses = tool_responses(&seen[1].messages[2]);
    assert_eq!(responses.len(), 2);
    assert!(responses[0].is_error());
    assert!(
        responses[0].output["error"]
            .as_str()
            .unwrap()
            .contains("tool 'explode' panicked")
    );
    assert!(!responses[1].is_error());
}

#[tokio::test]
async fn interrupt_stops_after_one_model_call() {
    let (model, seen) = scripted(vec![calls(&[
        ("weather", "w1", json!({"city": "Oslo"})),
        ("confirm", "c1", json!({"question": "Book a flight?"})),
    ])]);
    let tools = tools();
    let response = Orchestrator::new(&model, &tools, GenerateOptions::default())
        .run(GenerationRequest::new(vec![Message::user("Plan a trip")]))
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(response.finish_reason, FinishReason::Interrupted);
    assert!(response.is_interrupted());
    assert_eq!(response.interrupts.len(), 1);
    let interrupt = &response.interrupts[0];
    assert_eq!(interrupt.tool_name, "confirm");
    assert_eq!(interrupt.metadata, json!({"question": "Book a flight?"}));

    let requests = response.tool_requests();
    assert_eq!(requests[0].pending_output.as_ref().unwrap()["city"], "Oslo");
    assert!(requests[1].interrupt.is_some());
    assert_eq!(response.messages.last(), Some(&response.message));
}

#[tokio::test]
async fn respond_directive_resumes_the_loop() {
    let (model, seen) = scripted(vec![
        calls(&[
            ("weather", "w1", json!({"city": "Oslo"})),
            ("confirm", "c1", json!({"question": "Book a flight?"})),
        ]),
        Message::model("Booked."),
    ]);
    let tools = tools();
    let first = Orchestrator::new(&model, &tools, GenerateOptions::default())
        .run(GenerationRequest::new(vec![Message::user("Plan a trip")]))
        .await
        .unwrap();

    let directive = ResumeDirective::respond(&first.interrupts[0], json!({"approved": true}));
    let resumed = Orchestrator::new(&model, &tools, GenerateOptions::default())
        .with_resume(vec![directive])
        .run(GenerationRequest::new(first.messages.clone()))
        .await
        .unwrap();

    assert_eq!(resumed.text(), "Booked.");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let tool_message = seen[1].messages.last().unwrap();
    assert_eq!(tool_message.role, Role::Tool);
    let refs: Vec<_> = tool_responses(tool_message)
        .iter()
        .map(|r| r.reference.clone())
        .collect();
    assert_eq!(refs, [Some("w1".to_string()), Some("c1".to_string())]);
    let model_message = &seen[1].messages[1];
    assert!(model_message.tool_requests().all(|r| r.interrupt.is_none()));
}

#[tokio::test]
async fn restart_directive_reinvokes_with_resume_metadata() {
    let (model, seen) = scripted(vec![
        calls(&[("confirm", "c1", json!({"question": "Proceed?"}))]),
        Message::model("Proceeding."),
    ]);
    let tools = tools();
    let first = Orchestrator::new(&model, &tools, GenerateOptions::default())
        .run(GenerationRequest::new(vec![Message::user("Go")]))
        .await
        .unwrap();

    let directive = ResumeDirective::restart(&first.interrupts[0]).with_resumed(json!("yes"));
    Orchestrator::new(&model, &tools, GenerateOptions::default())
        .with_resume(vec![directive])
        .run(GenerationRequest::new(first.messages))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let responses = tool_responses(seen[1].messages.last().unwrap());
    assert_eq!(responses[0].output, json!("yes"));
}

#[tokio::test]
async fn resume_on_user_message_is_rejected() {
    let (model, _seen) = scripted(Vec::new());
    let directive = ResumeDirective::Respond {
        name: "confirm".into(),
        reference: Some("c1".into()),
        output: json!(true),
    };
    let err = Orchestrator::new(&model, &NoTools, GenerateOptions::default())
        .with_resume(vec![directive])
        .run(GenerationRequest::new(vec![Message::user("hi")]))
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
async fn turn_limit_is_fatal() {
    let replies = (0..4)
        .map(|i| {
            let reference = format!("w{i}");
            calls(&[("weather", reference.as_str(), json!({"city": "Oslo"}))])
        })
        .collect();
    let (model, seen) = scripted(replies);
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let tools = ToolSet::new().with(FnTool::new(
        ToolDefinition::new("weather", "Current weather", json_schema_for::<WeatherArgs>()),
        move |args: WeatherArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({"city": args.city})) }
        },
    ));
    let err = Orchestrator::new(&model, &tools, GenerateOptions::default().with_max_turns(2))
        .run(GenerationRequest::new(vec![Message::user("loop")]))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerateError::TurnLimitExceeded { max_turns: 2 }));
    assert_eq!(seen.lock().unwrap().len(), 3);
    // The third batch is refused before any of its tools run.
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fallback_tools_are_consulted() {
    let (model, seen) = scripted(vec![
        calls(&[("weather", "w1", json!({"city": "Rome"}))]),
        Message::model("done"),
    ]);
    let fallback = tools();
    Orchestrator::new(&model, &NoTools, GenerateOptions::default())
        .with_fallback_tools(&fallback)
        .run(GenerationRequest::new(vec![Message::user("Weather?")]))
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    let responses = tool_responses(&seen[1].messages[2]);
    assert!(!responses[0].is_error());
}

#[tokio::test]
async fn events_report_the_loop() {
    let (model, _seen) = scripted(vec![
        calls(&[("weather", "w1", json!({"city": "Oslo"}))]),
        Message::model("ok"),
    ]);
    let tools = tools();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let handler = FnEventHandler::new(move |event: &GenerateEvent<'_>| {
        let label = match event {
            GenerateEvent::TurnStart { .. } => "turn",
            GenerateEvent::ToolExecuting { .. } => "executing",
            GenerateEvent::ToolResult { .. } => "result",
            GenerateEvent::Finished { .. } => "finished",
            _ => return,
        };
        sink.lock().unwrap().push(label);
    });
    Orchestrator::new(&model, &tools, GenerateOptions::default())
        .with_event_handler(&handler)
        .run(GenerationRequest::new(vec![Message::user("Weather?")]))
        .await
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["turn", "executing", "result", "turn", "finished"]
    );
}

#[tokio::test]
async fn generate_prompt_runs_through_the_registry() {
    let (model, seen) = scripted(vec![
        calls(&[("weather", "w1", json!({"city": "Lisbon"}))]),
        Message::model(r#"{"forecast": "sunny"}"#),
    ]);
    let mut registry = Registry::new();
    registry.register_model(model);
    registry.register_tool(FnTool::new(
        ToolDefinition::new("weather", "Current weather", json_schema_for::<WeatherArgs>()),
        |args: WeatherArgs| async move { Ok(json!({"city": args.city, "sky": "sunny"})) },
    ));
    let prompt = registry
        .define_prompt(
            PromptDefinition::builder("forecast")
                .model_name("scripted")
                .input_schema(json!({"city": "string, the city to report on"}))
                .output_schema(json!({"forecast": "string"}))
                .tools(["weather"])
                .max_turns(1)
                .template("{{role \"system\"}}You are terse.{{role \"user\"}}Weather in {{city}}?"),
        )
        .unwrap();

    let response = generate_prompt(&registry, &prompt, json!({"city": "Lisbon"}), PromptCall::default())
        .await
        .unwrap();

    #[derive(serde::Deserialize)]
    struct Forecast {
        forecast: String,
    }
    let forecast: Forecast = response.output().unwrap();
    assert_eq!(forecast.forecast, "sunny");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].tools[0].name, "weather");
    assert_eq!(seen[0].output_format, OutputFormat::Json);
    assert_eq!(seen[0].messages[1].text(), "Weather in Lisbon?");
}

#[tokio::test]
async fn generate_prompt_rejects_unknown_model() {
    let registry = Registry::new();
    let prompt = PromptDefinition::builder("p")
        .model_name("nowhere")
        .template("hi")
        .build()
        .unwrap();
    let err = generate_prompt(&registry, &prompt, Value::Null, PromptCall::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerateError::UnknownModel(ref n) if n == "nowhere"));
}
