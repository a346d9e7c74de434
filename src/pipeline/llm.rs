//! LLM interaction: one instruction + one context string in, text out.
//!
//! The pipeline only ever needs a single-turn completion, so the seam is the
//! small [`CompletionClient`] trait. [`LlmCompletionClient`] implements it on
//! top of any `edgequake-llm` provider; tests implement it with canned
//! answers.
//!
//! ## Retry Strategy
//!
//! Rate-limit, network and timeout failures are retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`). Authentication failures and
//! other API errors are returned immediately: a bad key stays bad.

use crate::config::{InsightConfig, DEFAULT_MODEL};
use crate::error::CompletionError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Single-turn completion against a hosted language model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `instruction` (system) and `context` (user) and return the reply.
    async fn complete(&self, instruction: &str, context: &str) -> Result<String, CompletionError>;
}

/// [`CompletionClient`] backed by an `edgequake-llm` provider.
pub struct LlmCompletionClient {
    provider: Arc<dyn LLMProvider>,
    /// Name used in error messages ("openai", "auto", …).
    label: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl LlmCompletionClient {
    /// Wrap an existing provider using the limits from `config`.
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &InsightConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` and the environment.
    ///
    /// Call this at startup: a missing API key is reported here instead of
    /// halfway through a run.
    pub fn from_config(config: &InsightConfig) -> Result<Self, CompletionError> {
        let (provider, label) = resolve_provider(config)?;
        Ok(Self::new(provider, label, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let options = self.options();
        let call = self.provider.chat(messages, Some(&options));
        match timeout(Duration::from_secs(self.timeout_secs), call).await {
            Err(_) => Err(CompletionError::Timeout {
                secs: self.timeout_secs,
            }),
            Ok(Err(e)) => Err(match e {
                LlmError::Timeout => CompletionError::Timeout {
                    secs: self.timeout_secs,
                },
                other => classify_llm_error(&self.label, &other),
            }),
            Ok(Ok(response)) => {
                debug!(
                    "LLM call: {} input tokens, {} output tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                if response.content.trim().is_empty() {
                    Err(CompletionError::EmptyResponse)
                } else {
                    Ok(response.content)
                }
            }
        }
    }
}

#[async_trait]
impl CompletionClient for LlmCompletionClient {
    async fn complete(&self, instruction: &str, context: &str) -> Result<String, CompletionError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::system(instruction), ChatMessage::user(context)];

        let mut attempt = 0u32;
        loop {
            match self.attempt(&messages).await {
                Ok(text) => {
                    debug!(
                        "LLM reply: {} chars in {:?} ({} retries)",
                        text.len(),
                        start.elapsed(),
                        attempt
                    );
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                    warn!(
                        "LLM call failed ({}); retry {}/{} after {}ms",
                        e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

static RE_AUTH_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(401|403)\b").unwrap());
static RE_RATE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b429\b").unwrap());
static RE_GATEWAY_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b50[234]\b").unwrap());

/// Map a provider error onto the completion error taxonomy.
///
/// Typed variants map directly. Only the catch-all variants fall back to
/// [`classify_error`] on the rendered message.
pub fn classify_llm_error(provider: &str, error: &LlmError) -> CompletionError {
    let provider = provider.to_string();
    match error {
        LlmError::AuthError(detail) => CompletionError::Auth {
            provider,
            detail: detail.clone(),
        },
        LlmError::RateLimited(detail) => CompletionError::RateLimited {
            provider,
            detail: detail.clone(),
        },
        LlmError::NetworkError(detail) => CompletionError::Network {
            provider,
            detail: detail.clone(),
        },
        LlmError::Timeout => CompletionError::Network {
            provider,
            detail: error.to_string(),
        },
        LlmError::ApiError(_) | LlmError::ProviderError(_) | LlmError::Unknown(_) => {
            classify_error(&provider, &error.to_string())
        }
        _ => CompletionError::Api {
            message: error.to_string(),
        },
    }
}

/// Classify an untyped provider error message.
///
/// HTTP status codes only match as whole numbers, so token counts such as
/// `Used 29401` are not mistaken for a 401.
pub fn classify_error(provider: &str, message: &str) -> CompletionError {
    let lower = message.to_lowercase();
    let provider = provider.to_string();
    let detail = message.to_string();

    if RE_AUTH_STATUS.is_match(&lower)
        || ["unauthorized", "forbidden", "authentication", "invalid api key", "incorrect api key"]
            .iter()
            .any(|m| lower.contains(m))
    {
        CompletionError::Auth { provider, detail }
    } else if RE_RATE_STATUS.is_match(&lower)
        || ["rate limit", "rate_limit", "too many requests", "quota"]
            .iter()
            .any(|m| lower.contains(m))
    {
        CompletionError::RateLimited { provider, detail }
    } else if RE_GATEWAY_STATUS.is_match(&lower)
        || ["timed out", "timeout", "connect", "connection", "network", "dns", "reset"]
            .iter()
            .any(|m| lower.contains(m))
    {
        CompletionError::Network { provider, detail }
    } else {
        CompletionError::Api { message: detail }
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_context(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((byte_idx, _)) => {
            debug!(
                "Truncating LLM context from {} bytes to {} chars",
                text.len(),
                max_chars
            );
            Cow::Owned(format!("{}\n[… truncated]", &text[..byte_idx]))
        }
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`): used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`].
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(
    config: &InsightConfig,
) -> Result<(Arc<dyn LLMProvider>, String), CompletionError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| CompletionError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}

fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<(Arc<dyn LLMProvider>, String), CompletionError> {
    ProviderFactory::create_llm_provider(provider_name, model)
        .map(|p| (p, provider_name.to_string()))
        .map_err(|e| CompletionError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgequake_llm::LLMResponse;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider that replays a fixed script of replies, one per call.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, LlmError>>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Self::slow(script, Duration::ZERO)
        }

        fn slow(script: Vec<Result<String, LlmError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        fn max_context_length(&self) -> usize {
            8192
        }

        async fn complete(&self, prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            self.chat(&[ChatMessage::user(prompt)], None).await
        }

        async fn complete_with_options(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.complete(prompt).await
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Unknown("script exhausted".into())));
            next.map(|text| LLMResponse::new(text, "scripted-model"))
        }
    }

    fn client(provider: Arc<ScriptedProvider>) -> LlmCompletionClient {
        let config = InsightConfig::builder()
            .smtp_credentials("reports@example.com", "pw")
            .recipient("team@example.com")
            .max_retries(2)
            .retry_backoff_ms(100)
            .api_timeout_secs(5)
            .build()
            .unwrap();
        LlmCompletionClient::new(provider, "scripted", &config)
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried_until_success() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::RateLimited("slow down".into())),
            Err(LlmError::NetworkError("connection reset".into())),
            Ok("third time lucky".into()),
        ]);
        let reply = client(provider.clone()).complete("sys", "ctx").await.unwrap();
        assert_eq!(reply, "third time lucky");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_max_retries() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::NetworkError("down".into())),
            Err(LlmError::NetworkError("down".into())),
            Err(LlmError::NetworkError("down".into())),
            Ok("never reached".into()),
        ]);
        let err = client(provider.clone()).complete("sys", "ctx").await.unwrap_err();
        assert!(matches!(err, CompletionError::Network { .. }));
        assert_eq!(provider.calls(), 3, "one call plus two retries");
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_are_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::AuthError("Incorrect API key provided".into())),
            Ok("unused".into()),
        ]);
        let err = client(provider.clone()).complete("sys", "ctx").await.unwrap_err();
        assert!(matches!(err, CompletionError::Auth { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_and_are_retried() {
        let provider = ScriptedProvider::slow(
            vec![Ok("late".into()), Ok("late".into()), Ok("late".into())],
            Duration::from_secs(60),
        );
        let err = client(provider.clone()).complete("sys", "ctx").await.unwrap_err();
        assert!(matches!(err, CompletionError::Timeout { secs: 5 }));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn blank_reply_is_an_empty_response() {
        let provider = ScriptedProvider::new(vec![Ok("   ".into())]);
        let err = client(provider.clone()).complete("sys", "ctx").await.unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn typed_rate_limit_with_token_counts_stays_a_rate_limit() {
        let err = LlmError::RateLimited(
            "Rate limit reached for gpt-4.1: Limit 30000, Used 29401, Requested 1200".into(),
        );
        let e = classify_llm_error("openai", &err);
        assert!(matches!(e, CompletionError::RateLimited { .. }));
        assert!(e.is_retryable());
    }

    #[test]
    fn typed_variants_map_directly() {
        assert!(matches!(
            classify_llm_error("openai", &LlmError::AuthError("bad key".into())),
            CompletionError::Auth { .. }
        ));
        assert!(matches!(
            classify_llm_error("openai", &LlmError::NetworkError("dns".into())),
            CompletionError::Network { .. }
        ));
        assert!(matches!(
            classify_llm_error("openai", &LlmError::ModelNotFound("gpt-9".into())),
            CompletionError::Api { .. }
        ));
        assert!(matches!(
            classify_llm_error("openai", &LlmError::ApiError("HTTP 401: invalid api key".into())),
            CompletionError::Auth { .. }
        ));
    }

    #[test]
    fn status_codes_match_whole_numbers_only() {
        let e = classify_error("openai", "request 29401 failed validation");
        assert!(matches!(e, CompletionError::Api { .. }));
        let e = classify_error("openai", "HTTP 503 Service Unavailable");
        assert!(matches!(e, CompletionError::Network { .. }));
    }

    #[test]
    fn classifies_auth() {
        let e = classify_error("openai", "HTTP 401 Unauthorized: Incorrect API key provided");
        assert!(matches!(e, CompletionError::Auth { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn classifies_rate_limit() {
        let e = classify_error("openai", "429 Too Many Requests");
        assert!(matches!(e, CompletionError::RateLimited { .. }));
        assert!(e.is_retryable());
    }

    #[test]
    fn classifies_network() {
        let e = classify_error("openai", "error sending request: connection refused");
        assert!(matches!(e, CompletionError::Network { .. }));
    }

    #[test]
    fn classifies_other_as_api() {
        let e = classify_error("openai", "model does not exist");
        assert!(matches!(e, CompletionError::Api { .. }));
    }

    #[test]
    fn truncate_short_text_is_borrowed() {
        let t = truncate_context("short", 10);
        assert!(matches!(t, Cow::Borrowed("short")));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let t = truncate_context("ééééé", 2);
        assert!(t.starts_with("éé\n"));
        assert!(t.ends_with("[… truncated]"));
    }
}
