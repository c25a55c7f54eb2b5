//! `ChatModel` backed by an OpenAI-compatible chat completions endpoint.
//!
//! The default model name targets Gemini through its OpenAI-compatible
//! API; set `synthesis.api_base` accordingly.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
        ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use newsrag_core::config::SynthesisSettings;
use newsrag_core::traits::ChatModel;
use newsrag_core::types::ChatRequest;
use newsrag_core::{Error, Result};

pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(settings: &SynthesisSettings) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(base) = &settings.api_base { config = config.with_api_base(base); }
        if let Some(key) = &settings.api_key { config = config.with_api_key(key); }
        Self { client: Client::with_config(config), model: settings.model.clone(), temperature: settings.temperature }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_id(&self) -> &str { &self.model }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .temperature(self.temperature)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.system.clone()).into(),
                ChatCompletionRequestUserMessage::from(request.user.clone()).into(),
            ]);
        if let Some(schema) = &request.response_schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: Some("Answer with cited sources".into()),
                    name: "answer_with_sources".into(),
                    schema: Some(schema.clone()),
                    strict: Some(true),
                },
            });
        }
        let chat_request = builder.build().map_err(classify)?;

        let response = self.client.chat().create(chat_request).await.map_err(classify)?;
        if let Some(usage) = &response.usage {
            debug!(model = %self.model, prompt_tokens = usage.prompt_tokens, completion_tokens = usage.completion_tokens, "chat completion");
        }
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::synthesis_fatal("No content found in model response"))
    }
}

/// Rate limits, provider outages and transport failures are retryable;
/// malformed requests or responses are not.
fn classify(err: OpenAIError) -> Error {
    match err {
        OpenAIError::Reqwest(e) => Error::synthesis(format!("transport: {e}")),
        OpenAIError::ApiError(e) => Error::synthesis(format!("provider: {}", e.message)),
        other => Error::synthesis_fatal(other.to_string()),
    }
}
