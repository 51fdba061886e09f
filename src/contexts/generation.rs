//! Generation adapter: the narrow seam to the external text-completion
//! service.
//!
//! The adapter owns transport concerns only (timeout, status mapping). It
//! never retries; retry policy lives in the transformation loop.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "llama3-8b-8192";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed failures of a generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The call exceeded its deadline or was cancelled
    Timeout,
    RateLimited,
    ServiceError(String),
    EmptyResponse,
}

impl GenerationError {
    /// Rate limiting is fatal so retries do not amplify load
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::RateLimited)
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GenerationError::Timeout => write!(f, "Generation timed out"),
            GenerationError::RateLimited => write!(f, "Generation service is rate limiting requests"),
            GenerationError::ServiceError(details) => {
                write!(f, "Generation service error: {}", details)
            }
            GenerationError::EmptyResponse => write!(f, "Generation service returned no text"),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Per-call options passed through to the service
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
}

/// An opaque text-completion capability.
///
/// Implementations must treat the reply as untrusted: any length, any
/// structure, possibly no code at all.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}

/// Runs one generation call under a deadline.
///
/// A cancellation signal (a `true` sent on the watch channel) is reported
/// the same way as a timeout. Dropping the in-flight future leaves no state
/// behind, so the caller can continue or stop cleanly.
pub async fn generate_bounded(
    generator: &dyn Generator,
    prompt: &str,
    model: &str,
    options: &GenerationOptions,
    timeout: Duration,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<String, GenerationError> {
    let call = tokio::time::timeout(timeout, generator.generate(prompt, model, options));
    let outcome = match cancel {
        Some(mut rx) => {
            if *rx.borrow() {
                return Err(GenerationError::Timeout);
            }
            tokio::select! {
                result = call => result,
                _ = wait_for_cancel(&mut rx) => {
                    debug!("generation cancelled");
                    return Err(GenerationError::Timeout);
                }
            }
        }
        None => call.await,
    };

    match outcome {
        Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyResponse),
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout),
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if rx.changed().await.is_err() {
            // sender gone: no cancellation can arrive any more
            std::future::pending::<()>().await;
        }
        if *rx.borrow() {
            return;
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (Groq by default)
#[derive(Clone)]
pub struct GroqGenerator {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GroqGenerator {
    /// Creates a client whose transport timeout matches `timeout`
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::ServiceError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl Generator for GroqGenerator {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            max_tokens: options.max_tokens,
        };

        debug!(model, prompt_chars = prompt.len(), "sending generation request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(GenerationError::ServiceError(format!("HTTP {}: {}", status, snippet)));
        }

        let parsed: ChatResponse = response.json().await.map_err(map_transport_error)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(content)
    }
}

fn map_transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::ServiceError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        async fn generate(
            &self,
            _prompt: &str,
            _model: &str,
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".to_string())
        }
    }

    struct Echo(&'static str);

    #[async_trait]
    impl Generator for Echo {
        async fn generate(
            &self,
            _prompt: &str,
            _model: &str,
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GenerationError::Timeout.is_retryable());
        assert!(GenerationError::EmptyResponse.is_retryable());
        assert!(GenerationError::ServiceError("boom".into()).is_retryable());
        assert!(!GenerationError::RateLimited.is_retryable());
    }

    #[tokio::test]
    async fn test_bounded_call_times_out() {
        let result = generate_bounded(
            &Slow,
            "p",
            DEFAULT_MODEL,
            &GenerationOptions::default(),
            Duration::from_millis(20),
            None,
        )
        .await;
        assert_eq!(result, Err(GenerationError::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_is_reported_as_timeout() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            generate_bounded(
                &Slow,
                "p",
                DEFAULT_MODEL,
                &GenerationOptions::default(),
                Duration::from_secs(10),
                Some(rx),
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), Err(GenerationError::Timeout));
    }

    #[tokio::test]
    async fn test_blank_reply_is_empty_response() {
        let result = generate_bounded(
            &Echo("   \n"),
            "p",
            DEFAULT_MODEL,
            &GenerationOptions::default(),
            Duration::from_secs(1),
            None,
        )
        .await;
        assert_eq!(result, Err(GenerationError::EmptyResponse));
    }
}
