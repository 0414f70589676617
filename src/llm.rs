use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::emotion::EmotionMap;
use crate::error::ReplyError;

/// System prompt for an LLM that answers as a chat participant and labels its
/// own emotional state.
pub const REPLY_SYSTEM_PROMPT: &str = r#"You are a real person chatting in an instant messenger. Follow this protocol exactly.

Output format (STRICT)
- Output ONLY a JSON object. No markdown, no surrounding prose, no code fences.
- Shape: {"emotion": {"<emotion>": "<intensity>"}, "reply": "<message>"}

Emotion
- `emotion` describes how the character you play feels right now, judged from the conversation.
- It MUST contain at least one entry.
- Allowed keys (one or more): neutral, happy, excited, sad, angry, anxious, confused, shy, embarrassed, surprised, playful, affectionate, tired, bored, serious, caring
- Allowed values (exactly one per key): low, medium, high, extreme

Reply
- `reply` is the message sent to the other person.
- No inner monologue, stage directions, narration or formatting symbols.
- Keep it short and casual, the way people actually type in chat.
- Stay consistent with the persona given below and with the chat history.
"#;

/// JSON Schema for `REPLY_SYSTEM_PROMPT` output.
pub const REPLY_JSON_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["emotion", "reply"],
  "properties": {
    "emotion": {
      "type": "object",
      "additionalProperties": {
        "type": "string",
        "enum": ["low", "medium", "high", "extreme"]
      }
    },
    "reply": { "type": "string" }
  }
}"#;

const ALT_EMOTION_KEYS: [&str; 3] = ["emotion_map", "emotionMap", "emotions"];
const DEFAULT_INTENSITY: &str = "medium";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Who the model plays and who it talks to. Appended to the system prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub description: Option<String>,
    pub character_name: Option<String>,
    pub user_nickname: Option<String>,
}

pub fn build_system_prompt(persona: &Persona) -> String {
    let mut prompt = REPLY_SYSTEM_PROMPT.trim_end().to_string();
    let non_empty = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if let Some(description) = non_empty(&persona.description) {
        prompt.push_str(&format!("\n\nPersona: [{description}]"));
    }
    if let Some(name) = non_empty(&persona.character_name) {
        prompt.push_str(&format!("\nYour display name is: {name}"));
    }
    if let Some(nick) = non_empty(&persona.user_nickname) {
        prompt.push_str(&format!("\nThe other person's display name is: {nick}"));
    }
    prompt
}

/// A reply with its emotion labels already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredReply {
    pub reply: String,
    /// May be empty when the model labelled nothing usable.
    pub emotions: EmotionMap,
    pub raw_text: String,
}

/// Source of assistant replies for a conversation.
#[async_trait]
pub trait ReplySource: Send + Sync {
    async fn fetch_reply(&self, history: &[ChatTurn]) -> Result<StructuredReply>;
}

/// Parse model output into a reply. Accepts a bare JSON object or one
/// embedded in surrounding prose, and the common alternate shapes of the
/// emotion field.
pub fn parse_structured_reply(raw_text: &str) -> Result<StructuredReply, ReplyError> {
    let object = parse_json_object(raw_text)?;

    let reply = object
        .get("reply")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if reply.is_empty() {
        return Err(ReplyError::EmptyContent);
    }

    let emotion = object.get("emotion").or_else(|| {
        ALT_EMOTION_KEYS
            .iter()
            .find_map(|key| object.get(*key))
    });

    Ok(StructuredReply {
        reply: reply.to_string(),
        emotions: EmotionMap::normalize(raw_emotion_pairs(emotion)),
        raw_text: raw_text.to_string(),
    })
}

fn parse_json_object(raw_text: &str) -> Result<Map<String, Value>, ReplyError> {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() {
        return Err(ReplyError::EmptyContent);
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(direct) => {
            let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
                return Err(ReplyError::InvalidJson(direct.to_string()));
            };
            if end <= start {
                return Err(ReplyError::InvalidJson(direct.to_string()));
            }
            serde_json::from_str::<Value>(&trimmed[start..=end])
                .map_err(|err| ReplyError::InvalidJson(err.to_string()))?
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ReplyError::InvalidJson(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn raw_emotion_pairs(emotion: Option<&Value>) -> Vec<(String, String)> {
    let as_label = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match emotion {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), as_label(v)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => {
                    Some((s.trim().to_string(), DEFAULT_INTENSITY.to_string()))
                }
                Value::Object(entry) => {
                    let key = first_truthy(entry, &["key", "emotion", "name"])?;
                    let value = first_truthy(entry, &["value", "intensity", "level"])
                        .unwrap_or_else(|| DEFAULT_INTENSITY.to_string());
                    Some((key, value))
                }
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            vec![(s.trim().to_string(), DEFAULT_INTENSITY.to_string())]
        }
        _ => Vec::new(),
    }
}

fn first_truthy(entry: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match entry.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null | Value::Bool(false) | Value::String(_) => None,
        other => Some(other.to_string()),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(feature = "llm")]
pub mod openai {
    use super::*;

    use anyhow::{anyhow, Context, Result};
    use async_openai::{
        config::OpenAIConfig,
        types::chat::{
            ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
            ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
            CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
        },
        Client,
    };
    use std::time::Duration;
    use tokio::time::sleep;
    use tracing::{debug, warn};

    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    const API_KEY_ENV: &str = "OPENAI_API_KEY";
    const API_BASE_ENV: &str = "OPENAI_API_BASE";
    const MODEL_ENV: &str = "CHATPACE_MODEL";

    #[derive(Debug, Clone)]
    pub struct OpenAiReplyClient {
        client: Client<OpenAIConfig>,
        model: String,
        persona: Persona,
        temperature: f32,
        response_format: ResponseFormat,
    }

    impl OpenAiReplyClient {
        pub fn from_env() -> Result<Self> {
            dotenvy::dotenv().ok();
            let api_key =
                std::env::var(API_KEY_ENV).with_context(|| format!("{API_KEY_ENV} is not set"))?;
            let mut client = Self::new(api_key, std::env::var(API_BASE_ENV).ok())?;
            if let Ok(model) = std::env::var(MODEL_ENV) {
                client = client.with_model(model);
            }
            Ok(client)
        }

        pub fn new(api_key: impl Into<String>, api_base: Option<String>) -> Result<Self> {
            let schema: Value = serde_json::from_str(REPLY_JSON_SCHEMA)
                .context("REPLY_JSON_SCHEMA must be valid JSON")?;

            let mut config = OpenAIConfig::new().with_api_key(api_key.into());
            if let Some(base) = api_base.filter(|b| !b.trim().is_empty()) {
                config = config.with_api_base(base);
            }

            let response_format = ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    name: "chat_reply".to_string(),
                    description: None,
                    schema: Some(schema),
                    strict: Some(false),
                },
            };

            Ok(Self {
                client: Client::with_config(config),
                model: DEFAULT_MODEL.to_string(),
                persona: Persona::default(),
                temperature: 0.8,
                response_format,
            })
        }

        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }

        pub fn with_persona(mut self, persona: Persona) -> Self {
            self.persona = persona;
            self
        }

        pub fn with_temperature(mut self, temperature: f32) -> Self {
            self.temperature = temperature.clamp(0.0, 2.0);
            self
        }

        fn messages(&self, history: &[ChatTurn]) -> Result<Vec<ChatCompletionRequestMessage>> {
            let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 1);
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(build_system_prompt(&self.persona))
                    .build()?
                    .into(),
            );
            for turn in history {
                let message: ChatCompletionRequestMessage = match turn.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?
                        .into(),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?
                        .into(),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?
                        .into(),
                };
                messages.push(message);
            }
            Ok(messages)
        }

        async fn fetch_once(&self, history: &[ChatTurn]) -> Result<String> {
            let request = CreateChatCompletionRequestArgs::default()
                .model(self.model.as_str())
                .messages(self.messages(history)?)
                .response_format(self.response_format.clone())
                .temperature(self.temperature)
                .build()
                .context("failed to build chat completion request")?;

            let response = self
                .client
                .chat()
                .create(request)
                .await
                .context("chat completion request failed")?;

            response
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .ok_or_else(|| anyhow!("missing choices[0].message.content"))
        }
    }

    #[async_trait]
    impl ReplySource for OpenAiReplyClient {
        async fn fetch_reply(&self, history: &[ChatTurn]) -> Result<StructuredReply> {
            let retry_delays = [Duration::from_secs(2)];

            let mut attempt = 0usize;
            let raw = loop {
                match self.fetch_once(history).await {
                    Ok(raw) => break raw,
                    Err(err) => {
                        if attempt >= retry_delays.len() {
                            return Err(err).context("LLM request failed after retries");
                        }
                        warn!("LLM request failed, retrying: {err:#}");
                        sleep(retry_delays[attempt]).await;
                        attempt += 1;
                    }
                }
            };

            debug!(model = %self.model, raw = %raw, "LLM raw response");
            Ok(parse_structured_reply(&raw)?)
        }
    }
}

#[cfg(not(feature = "llm"))]
pub mod openai {
    use super::*;

    use anyhow::{anyhow, Result};

    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    #[derive(Debug, Clone)]
    pub struct OpenAiReplyClient;

    impl OpenAiReplyClient {
        pub fn from_env() -> Result<Self> {
            Err(anyhow!("LLM support is disabled (build with --features llm)"))
        }

        pub fn new(_api_key: impl Into<String>, _api_base: Option<String>) -> Result<Self> {
            Err(anyhow!("LLM support is disabled (build with --features llm)"))
        }

        pub fn with_model(self, _model: impl Into<String>) -> Self {
            self
        }

        pub fn with_persona(self, _persona: Persona) -> Self {
            self
        }

        pub fn with_temperature(self, _temperature: f32) -> Self {
            self
        }
    }

    #[async_trait]
    impl ReplySource for OpenAiReplyClient {
        async fn fetch_reply(&self, _history: &[ChatTurn]) -> Result<StructuredReply> {
            Err(anyhow!("LLM support is disabled (build with --features llm)"))
        }
    }
}
