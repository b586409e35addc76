//! HTTP generation client with retry logic

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::GenerationClient;
use crate::config::GenerationConfig;
use crate::error::{Result, SongforgeError};

/// Chat-completion client for an OpenAI-compatible provider endpoint,
/// with bounded retry and exponential backoff on transient failures.
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    image_model: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SongforgeError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            image_model: config.image_model.clone(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn with_retries<F, Fut, T>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut retry_count = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if retry_count >= self.max_retries || !is_retryable(&e) {
                        return Err(e);
                    }
                    retry_count += 1;
                    let delay = self.retry_delay_ms * 2u64.pow(retry_count - 1);
                    warn!(retry = retry_count, delay_ms = delay, "retrying provider call: {e}");
                    sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    async fn complete_once(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.7,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SongforgeError::Provider(format!("request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| SongforgeError::Provider(format!("malformed response: {e}")))?;
                let content = body
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .unwrap_or_default();
                debug!(chars = content.len(), "provider completion received");
                Ok(content)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                Err(SongforgeError::Provider("rate limit exceeded".to_string()))
            }
            StatusCode::UNAUTHORIZED => {
                Err(SongforgeError::Config("invalid API key".to_string()))
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(SongforgeError::Provider(format!(
                    "provider error {status}: {error_text}"
                )))
            }
        }
    }

    async fn generate_image_once(&self, prompt: &str) -> Result<String> {
        let request = ImageRequest {
            model: self.image_model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: "1024x1024".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SongforgeError::Provider(format!("image request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SongforgeError::Provider(format!(
                "image provider error {status}: {error_text}"
            )));
        }

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| SongforgeError::Provider(format!("malformed image response: {e}")))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or_else(|| SongforgeError::Provider("image response had no entries".to_string()))
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.with_retries(|| self.complete_once(prompt)).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String> {
        self.with_retries(|| self.generate_image_once(prompt)).await
    }
}

fn is_retryable(error: &SongforgeError) -> bool {
    match error {
        SongforgeError::Provider(msg) => {
            msg.contains("rate limit") || msg.contains("timed out") || msg.contains("request failed")
        }
        _ => false,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    model: String,
    prompt: String,
    n: u8,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: String,
}
