//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the conversational agent LLM.
//! It implements the `ChatModelService` port from the `core` crate using
//! OpenAI-compatible chat completions with tool calling.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use refund_agent_core::{
    domain::{MessageRole, ThreadMessage, ToolCall},
    ports::{ChatModelService, ModelTurn, PortError, PortResult, ToolSpec},
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatModelService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// Request/Response Mapping
//=========================================================================================

fn to_request_message(message: &ThreadMessage) -> PortResult<ChatCompletionRequestMessage> {
    let mapped = match message.role {
        MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
        MessageRole::Assistant => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            builder.content(message.content.clone());
            if !message.tool_calls.is_empty() {
                builder.tool_calls(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            builder
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into()
        }
        MessageRole::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(message.content.clone())
            .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
    };
    Ok(mapped)
}

fn to_chat_tool(spec: &ToolSpec) -> PortResult<ChatCompletionTool> {
    ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(
            FunctionObjectArgs::default()
                .name(spec.name)
                .description(spec.description)
                .parameters(spec.parameters.clone())
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
        )
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// `ChatModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatModelService for OpenAiChatAdapter {
    /// Produces the next assistant turn for a conversation, including any
    /// tool invocations the model decided to request.
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ThreadMessage],
        tools: &[ToolSpec],
    ) -> PortResult<ModelTurn> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );
        for message in history {
            messages.push(to_request_message(message)?);
        }

        let chat_tools = tools
            .iter()
            .map(to_chat_tool)
            .collect::<PortResult<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .tools(chat_tools)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(PortError::Unexpected(
                "Chat model returned no choices in its response.".to_string(),
            ));
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ModelTurn {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}
