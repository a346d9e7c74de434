//! Configuration for an analysis-and-report session.
//!
//! Every knob lives in [`InsightConfig`], built once at process start via
//! [`InsightConfigBuilder`] (or [`InsightConfig::from_env`]) and passed by
//! reference into each component. Nothing reads the environment after
//! startup, so missing credentials fail before any PDF is touched.

use crate::error::ConfigError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default web search endpoint (DuckDuckGo's script-free HTML results page).
pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Default LLM model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// SMTP connection settings.
#[derive(Clone)]
pub struct SmtpSettings {
    /// Relay host. Default: `smtp.gmail.com`.
    pub host: String,
    /// Submission port (STARTTLS). Default: 587.
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Connect + command timeout in seconds. Default: 30.
    pub timeout_secs: u64,
    /// Extra attempts after a connection-level failure. Default: 2.
    pub max_retries: u32,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Configuration for one analysis-and-report session.
///
/// # Example
/// ```rust
/// use edgequake_pdf_insight::InsightConfig;
///
/// let config = InsightConfig::builder()
///     .smtp_credentials("reports@example.com", "app-password")
///     .recipient("team@example.com")
///     .crawl_cap(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.crawl_cap, 3);
/// ```
#[derive(Clone)]
pub struct InsightConfig {
    // ── LLM ──────────────────────────────────────────────────────────────
    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 2048.
    pub max_tokens: usize,

    /// Retry attempts on a transient LLM failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Longest context (in chars) sent with one LLM call. Default: 48 000.
    ///
    /// Longer PDFs are truncated at a char boundary before the call.
    pub max_context_chars: usize,

    // ── Web research ─────────────────────────────────────────────────────
    /// Search endpoint queried with `?q=<query>`. Default: [`DEFAULT_SEARCH_URL`].
    pub search_url: String,

    /// Maximum result pages fetched per query (the crawl cap). Default: 5.
    pub crawl_cap: usize,

    /// Per-request timeout for search and page fetches, in seconds. Default: 10.
    pub fetch_timeout_secs: u64,

    /// Characters kept from each crawled page. Default: 4 000.
    pub max_page_chars: usize,

    /// Words in the derived search query. Default: 12.
    pub query_max_words: usize,

    // ── Report ───────────────────────────────────────────────────────────
    pub smtp: SmtpSettings,

    /// The single report recipient.
    pub recipient: String,

    /// Branding shown in the subject and report header. Default: "EdgeQuake".
    pub company_name: String,

    /// Optional logo embedded inline in the HTML report.
    pub logo_path: Option<PathBuf>,

    /// Attachment file name prefix: `<prefix>_<original>`. Default: "insight_analysis".
    pub attachment_prefix: String,

    /// Directory for the temporary attachment copy. Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    // ── Observability ────────────────────────────────────────────────────
    /// Optional progress callback for stage and delivery events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            max_context_chars: 48_000,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            crawl_cap: 5,
            fetch_timeout_secs: 10,
            max_page_chars: 4_000,
            query_max_words: 12,
            smtp: SmtpSettings::default(),
            recipient: String::new(),
            company_name: "EdgeQuake".to_string(),
            logo_path: None,
            attachment_prefix: "insight_analysis".to_string(),
            temp_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for InsightConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsightConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("search_url", &self.search_url)
            .field("crawl_cap", &self.crawl_cap)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("smtp", &self.smtp)
            .field("recipient", &self.recipient)
            .field("company_name", &self.company_name)
            .field("logo_path", &self.logo_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl InsightConfig {
    /// Create a new builder for `InsightConfig`.
    pub fn builder() -> InsightConfigBuilder {
        InsightConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from environment variables (and `.env` if present).
    ///
    /// | Variable | Required | Default |
    /// |----------|----------|---------|
    /// | `EMAIL_USER` | yes | |
    /// | `EMAIL_PASSWORD` | yes | |
    /// | `RECIPIENT_EMAIL` | yes | |
    /// | `EMAIL_HOST` | no | `smtp.gmail.com` |
    /// | `EMAIL_PORT` | no | `587` |
    /// | `COMPANY_NAME` | no | `EdgeQuake` |
    /// | `LOGO_PATH` | no | |
    /// | `EDGEQUAKE_LLM_PROVIDER` / `EDGEQUAKE_MODEL` | no | auto-detect |
    /// | `PDF_INSIGHT_SEARCH_URL` | no | DuckDuckGo HTML |
    /// | `PDF_INSIGHT_CRAWL_CAP` | no | `5` |
    /// | `PDF_INSIGHT_FETCH_TIMEOUT` | no | `10` |
    /// | `PDF_INSIGHT_API_TIMEOUT` | no | `120` |
    ///
    /// The LLM API key itself (`OPENAI_API_KEY`, …) is read by the provider
    /// factory; see [`crate::pipeline::llm::resolve_provider`].
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal in production.
        let _ = dotenvy::dotenv();

        let mut builder = Self::builder()
            .smtp_credentials(env_or_empty("EMAIL_USER"), env_or_empty("EMAIL_PASSWORD"))
            .recipient(env_or_empty("RECIPIENT_EMAIL"));

        if let Some(host) = env_opt("EMAIL_HOST") {
            builder = builder.smtp_host(host);
        }
        if let Some(port) = env_parse::<u16>("EMAIL_PORT")? {
            builder = builder.smtp_port(port);
        }
        if let Some(name) = env_opt("COMPANY_NAME") {
            builder = builder.company_name(name);
        }
        if let Some(logo) = env_opt("LOGO_PATH") {
            builder = builder.logo_path(logo);
        }
        if let Some(provider) = env_opt("EDGEQUAKE_LLM_PROVIDER") {
            builder = builder.provider_name(provider);
        }
        if let Some(model) = env_opt("EDGEQUAKE_MODEL") {
            builder = builder.model(model);
        }
        if let Some(url) = env_opt("PDF_INSIGHT_SEARCH_URL") {
            builder = builder.search_url(url);
        }
        if let Some(cap) = env_parse::<usize>("PDF_INSIGHT_CRAWL_CAP")? {
            builder = builder.crawl_cap(cap);
        }
        if let Some(secs) = env_parse::<u64>("PDF_INSIGHT_FETCH_TIMEOUT")? {
            builder = builder.fetch_timeout_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("PDF_INSIGHT_API_TIMEOUT")? {
            builder = builder.api_timeout_secs(secs);
        }

        builder.build()
    }

    /// The `From:` address; the SMTP login doubles as the sender.
    pub fn sender(&self) -> &str {
        &self.smtp.username
    }

    /// Subject line for the report about `filename`.
    pub fn report_subject(&self, filename: &str) -> String {
        format!("{} PDF Analysis Report: {}", self.company_name, filename)
    }

    /// Attachment name for `filename`: `<prefix>_<filename>`.
    pub fn attachment_name(&self, filename: &str) -> String {
        format!("{}_{}", self.attachment_prefix, filename)
    }
}

fn env_opt(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_empty(var: &str) -> String {
    env_opt(var).unwrap_or_default()
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env_opt(var) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{var}='{raw}' is not a valid value"))),
    }
}

/// Builder for [`InsightConfig`].
pub struct InsightConfigBuilder {
    config: InsightConfig,
}

impl fmt::Debug for InsightConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsightConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl InsightConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_context_chars(mut self, n: usize) -> Self {
        self.config.max_context_chars = n.max(1_000);
        self
    }

    pub fn search_url(mut self, url: impl Into<String>) -> Self {
        self.config.search_url = url.into();
        self
    }

    pub fn crawl_cap(mut self, n: usize) -> Self {
        self.config.crawl_cap = n.max(1);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn max_page_chars(mut self, n: usize) -> Self {
        self.config.max_page_chars = n.max(200);
        self
    }

    pub fn query_max_words(mut self, n: usize) -> Self {
        self.config.query_max_words = n.max(1);
        self
    }

    pub fn smtp_host(mut self, host: impl Into<String>) -> Self {
        self.config.smtp.host = host.into();
        self
    }

    pub fn smtp_port(mut self, port: u16) -> Self {
        self.config.smtp.port = port;
        self
    }

    pub fn smtp_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.smtp.username = username.into();
        self.config.smtp.password = password.into();
        self
    }

    pub fn smtp_timeout_secs(mut self, secs: u64) -> Self {
        self.config.smtp.timeout_secs = secs;
        self
    }

    pub fn smtp_max_retries(mut self, n: u32) -> Self {
        self.config.smtp.max_retries = n;
        self
    }

    pub fn recipient(mut self, address: impl Into<String>) -> Self {
        self.config.recipient = address.into();
        self
    }

    pub fn company_name(mut self, name: impl Into<String>) -> Self {
        self.config.company_name = name.into();
        self
    }

    pub fn logo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.logo_path = Some(path.into());
        self
    }

    pub fn attachment_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.attachment_prefix = prefix.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<InsightConfig, ConfigError> {
        let c = &self.config;
        if c.smtp.username.trim().is_empty() {
            return Err(ConfigError::Missing {
                var: "EMAIL_USER",
                hint: "Set EMAIL_USER to the SMTP login (it is also the sender address).",
            });
        }
        if c.smtp.password.is_empty() {
            return Err(ConfigError::Missing {
                var: "EMAIL_PASSWORD",
                hint: "Set EMAIL_PASSWORD to the SMTP password or app password.",
            });
        }
        if c.recipient.trim().is_empty() {
            return Err(ConfigError::Missing {
                var: "RECIPIENT_EMAIL",
                hint: "Set RECIPIENT_EMAIL to the address that receives every report.",
            });
        }
        if !c.recipient.contains('@') {
            return Err(ConfigError::Invalid(format!(
                "recipient '{}' is not an email address",
                c.recipient
            )));
        }
        if c.smtp.port == 0 {
            return Err(ConfigError::Invalid("SMTP port must be non-zero".into()));
        }
        if c.smtp.host.trim().is_empty() {
            return Err(ConfigError::Invalid("SMTP host must not be empty".into()));
        }
        if url::Url::parse(&c.search_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "search URL '{}' is not a valid URL",
                c.search_url
            )));
        }
        if c.api_timeout_secs == 0 || c.fetch_timeout_secs == 0 || c.smtp.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least 1 second".into()));
        }
        if c.attachment_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(
                "attachment prefix must not contain path separators".into(),
            ));
        }
        Ok(self.config)
    }
}
