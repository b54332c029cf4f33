//! LLM-backed agents and the registry handlers look them up in.
//!
//! The registry is assembled once in `main` and shared read-only through the
//! application state.

use crate::errors::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const FARM_AGENT: &str = "FarmAgent";
pub const WEATHER_AGENT: &str = "weatherAgent";

pub const FARM_INSTRUCTIONS: &str = "You are an agronomist advising a hobby grower who raises \
tomatoes on a balcony. You receive the latest temperature and relative humidity measured next \
to the plants. Compare them with the conditions tomatoes prefer at each growth stage, say \
plainly whether the current environment is fine, and give concrete, short actions for \
anything that is off (ventilation, shading, watering, disease risk). Answer in at most a few \
short paragraphs.";

pub const WEATHER_INSTRUCTIONS: &str = "You are a helpful weather assistant. When asked about \
a location, describe the current conditions and the short-term outlook: temperature, \
humidity, wind and precipitation. If the location is ambiguous, say which place you assumed. \
Keep answers concise.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Text produced by an agent for one prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<Generation>;
}

/// Agents by name. Immutable once built.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

/// Agent talking to an OpenAI-compatible chat completions endpoint
pub struct HttpAgent {
    name: String,
    instructions: String,
    settings: AgentSettings,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl HttpAgent {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        settings: AgentSettings,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(format!("farm-monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            name: name.into(),
            instructions: instructions.into(),
            settings,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Agent for HttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        debug!("Agent {} sending prompt of {} chars", self.name, prompt.len());

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!("Agent {} returned HTTP {}: {}", self.name, status.as_u16(), detail);
            return Err(Error::Agent(format!("HTTP status {}", status.as_u16())));
        }

        let parsed: ChatResponse = response.json().await?;
        into_generation(parsed)
    }
}

fn into_generation(response: ChatResponse) -> Result<Generation> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Agent("response contained no choices".to_string()))?;

    Ok(Generation {
        text: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        usage: response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}
