use std::fmt;
use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;

/// Sampling parameters for one invocation. Defaults are the values the
/// letter workflow has always used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 1024,
        }
    }
}

#[derive(Debug)]
pub enum GenerationError {
    EmptyResponse,
    Transport(String),
    Api { status: u16, message: String },
    Parse(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::EmptyResponse => {
                write!(f, "No response generated: the model returned no usable content")
            }
            GenerationError::Transport(msg) => write!(f, "Transport error: {}", msg),
            GenerationError::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            GenerationError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

// Wire shape of the generateContent REST endpoint.

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: WireGenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct WireGenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Seam for the batch runner: anything that can turn a prompt into text.
/// Lets tests drive the runner with a stub instead of a live endpoint.
pub trait Invoker {
    fn invoke(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// Client for the external generation service. Holds no per-request state;
/// safe to call concurrently for independent prompts.
#[derive(Clone)]
pub struct GenerationClient {
    http: Client,
    config: ApiConfig,
}

impl GenerationClient {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn request_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.endpoint, self.config.model, self.config.api_key
        )
    }

    /// Sends exactly one request. No retry, no backoff: a failure or an
    /// empty response is reported once, never swallowed.
    pub async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, GenerationError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: WireGenerationConfig {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
            },
        };

        let response = self.http.post(self.request_url()).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(parsed) => parsed.error.message,
                Err(_) => body,
            };
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .map(|part| part.text);

        match text {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(GenerationError::EmptyResponse),
        }
    }
}

impl Invoker for GenerationClient {
    async fn invoke(&self, prompt: &str, config: &GenerationConfig) -> Result<String, GenerationError> {
        self.generate(prompt, config).await
    }
}

/// The model version in use has no separate system channel, so the
/// instruction preamble is concatenated ahead of the rendered prompt.
pub fn compose_prompt(system_instruction: &str, rendered: &str) -> String {
    if system_instruction.is_empty() {
        rendered.to_string()
    } else {
        format!("{}\n\n{}", system_instruction, rendered)
    }
}
