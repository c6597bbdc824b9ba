//! The model capability.
//!
//! A [`Model`] takes a [`GenerationRequest`] and returns one response
//! message. Provider integrations implement the trait; [`FnModel`] wraps a
//! closure for tests and adapters.

use crate::error::ModelError;
use crate::{FinishReason, GenerationRequest, Message, Part, Usage};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Model::invoke`].
pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send + 'a>>;

/// Incremental output delivered while a model call is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChunk {
    pub content: Vec<Part>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Part::text(text)],
        }
    }
}

/// Callback receiving [`ModelChunk`]s during a streaming call.
pub type ChunkCallback<'a> = &'a (dyn Fn(ModelChunk) + Send + Sync);

/// One model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub message: Message,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = reason;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A generative model.
pub trait Model: Send + Sync {
    /// Name used for lookup and in errors.
    fn name(&self) -> &str;

    /// Produce a response to `request`. Streaming implementations report
    /// partial output through `on_chunk` before resolving.
    fn invoke<'a>(
        &'a self,
        request: &'a GenerationRequest,
        on_chunk: Option<ChunkCallback<'a>>,
    ) -> ModelFuture<'a>;
}

/// Name → model lookup.
pub trait ModelLookup: Send + Sync {
    fn find_model(&self, name: &str) -> Option<&dyn Model>;
}

type ErasedModelHandler = Box<
    dyn Fn(GenerationRequest) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based model. The handler receives an owned copy of each
/// request.
///
/// ```ignore
/// let echo = FnModel::new("echo", |req: GenerationRequest| async move {
///     let last = req.messages.last().map(Message::text).unwrap_or_default();
///     Ok(ModelResponse::new(Message::model(last)))
/// });
/// ```
pub struct FnModel {
    name: String,
    handler: ErasedModelHandler,
}

impl FnModel {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(GenerationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ModelResponse, ModelError>> + Send + 'static,
    {
        let erased = move |req: GenerationRequest| -> Pin<
            Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send>,
        > { Box::pin(handler(req)) };
        Self {
            name: name.into(),
            handler: Box::new(erased),
        }
    }
}

impl Model for FnModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(
        &'a self,
        request: &'a GenerationRequest,
        _on_chunk: Option<ChunkCallback<'a>>,
    ) -> ModelFuture<'a> {
        (self.handler)(request.clone())
    }
}

impl fmt::Debug for FnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModel").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_model_sees_request() {
        let model = FnModel::new("echo", |req: GenerationRequest| async move {
            let text = req.messages.last().map(Message::text).unwrap_or_default();
            Ok(ModelResponse::new(Message::model(format!("echo: {text}"))))
        });
        assert_eq!(model.name(), "echo");
        let req = GenerationRequest::new(vec![Message::user("hi")]);
        let response = model.invoke(&req, None).await.unwrap();
        assert_eq!(response.message.text(), "echo: hi");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn fn_model_propagates_errors() {
        let model = FnModel::new("broken", |_req: GenerationRequest| async move {
            Err(ModelError::new("broken", "quota exceeded"))
        });
        let req = GenerationRequest::default();
        let err = model.invoke(&req, None).await.unwrap_err();
        assert_eq!(err.message, "quota exceeded");
    }
}
