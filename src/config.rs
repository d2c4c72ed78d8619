//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::RetryPolicy;

/// Default footer markers: privacy policy, unsubscribe and web-version links.
pub const DEFAULT_FOOTER_PATTERNS: &[&str] = &["(?i)privacybeleid|afmelden|webversie"];

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmEndpointConfig {
    /// Full chat-completions URL.
    pub url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for LlmEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1234/v1/chat/completions".to_string(),
            model: "local-model".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-stage LLM and job settings.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total wall-clock budget for one job of this stage.
    pub job_timeout: Duration,
    /// Timeout for a single LLM request. Every attempt plus backoff has to
    /// fit inside `job_timeout`.
    pub llm_request_timeout: Duration,
    /// Attempts for transient LLM failures within one job.
    pub llm_max_attempts: u32,
}

impl StageConfig {
    pub fn screening() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 500,
            job_timeout: Duration::from_secs(60),
            llm_request_timeout: Duration::from_secs(15),
            llm_max_attempts: 3,
        }
    }

    pub fn processing() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1500,
            job_timeout: Duration::from_secs(300),
            llm_request_timeout: Duration::from_secs(90),
            llm_max_attempts: 3,
        }
    }

    /// Worst case for the LLM call: every attempt times out, with full backoff.
    pub fn llm_budget(&self) -> Duration {
        self.llm_request_timeout
            .saturating_mul(self.llm_max_attempts)
            .saturating_add(RetryPolicy::with_max_attempts(self.llm_max_attempts).max_total_delay())
    }
}

/// Content sanitizer settings.
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Hard cap, counted in characters.
    pub max_chars: usize,
    /// Regexes; the body is cut at the first match of any of them.
    pub footer_patterns: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            footer_patterns: DEFAULT_FOOTER_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Mail and calendar provider endpoints.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub graph_api_url: String,
    pub graph_access_token: Option<SecretString>,
    pub calendar_api_url: String,
    pub calendar_access_token: Option<SecretString>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            graph_api_url: "https://graph.microsoft.com/v1.0".to_string(),
            graph_access_token: None,
            calendar_api_url: "https://www.googleapis.com/calendar/v3".to_string(),
            calendar_access_token: None,
        }
    }
}

/// Everything the pipeline needs at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub llm: LlmEndpointConfig,
    pub screening: StageConfig,
    pub processing: StageConfig,
    pub sanitizer: SanitizerConfig,
    pub providers: ProviderConfig,
    /// Attempts for transient job failures (pre-claim storage errors).
    pub job_max_attempts: u32,
    /// Maximum jobs running at once.
    pub worker_concurrency: usize,
    /// Record `failed` instead of `completed` when every executed action failed.
    pub fail_when_all_actions_fail: bool,
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Messages left in `screening`/`processing` longer than this are reported.
    pub stuck_threshold: Duration,
    /// Directory for the rolling log file; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmEndpointConfig::default(),
            screening: StageConfig::screening(),
            processing: StageConfig::processing(),
            sanitizer: SanitizerConfig::default(),
            providers: ProviderConfig::default(),
            job_max_attempts: 3,
            worker_concurrency: 4,
            fail_when_all_actions_fail: false,
            db_path: PathBuf::from("./data/mail-triage.db"),
            http_port: 8080,
            stuck_threshold: Duration::from_secs(900),
            log_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let llm = LlmEndpointConfig {
            url: std::env::var("LLM_URL").unwrap_or(defaults.llm.url),
            model: std::env::var("LLM_MODEL").unwrap_or(defaults.llm.model),
            api_key: secret_var("LLM_API_KEY"),
            request_timeout: Duration::from_secs(env_or(
                "LLM_TIMEOUT_SECS",
                defaults.llm.request_timeout.as_secs(),
            )),
        };
        let llm_max_attempts = env_or("LLM_MAX_ATTEMPTS", 3);

        let screening = StageConfig {
            temperature: env_or("SCREENING_TEMPERATURE", defaults.screening.temperature),
            max_tokens: env_or("SCREENING_MAX_TOKENS", defaults.screening.max_tokens),
            job_timeout: Duration::from_secs(env_or(
                "SCREENING_JOB_TIMEOUT_SECS",
                defaults.screening.job_timeout.as_secs(),
            )),
            llm_request_timeout: Duration::from_secs(env_or(
                "SCREENING_LLM_TIMEOUT_SECS",
                defaults.screening.llm_request_timeout.as_secs(),
            )),
            llm_max_attempts,
        };
        let processing = StageConfig {
            temperature: env_or("PROCESSING_TEMPERATURE", defaults.processing.temperature),
            max_tokens: env_or("PROCESSING_MAX_TOKENS", defaults.processing.max_tokens),
            job_timeout: Duration::from_secs(env_or(
                "PROCESSING_JOB_TIMEOUT_SECS",
                defaults.processing.job_timeout.as_secs(),
            )),
            llm_request_timeout: Duration::from_secs(env_or(
                "PROCESSING_LLM_TIMEOUT_SECS",
                defaults.processing.llm_request_timeout.as_secs(),
            )),
            llm_max_attempts,
        };

        let footer_patterns = std::env::var("SANITIZER_FOOTER_PATTERNS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|patterns| !patterns.is_empty())
            .unwrap_or(defaults.sanitizer.footer_patterns);
        let sanitizer = SanitizerConfig {
            max_chars: env_or("SANITIZER_MAX_CHARS", defaults.sanitizer.max_chars),
            footer_patterns,
        };

        let providers = ProviderConfig {
            graph_api_url: std::env::var("GRAPH_API_URL")
                .unwrap_or(defaults.providers.graph_api_url),
            graph_access_token: secret_var("GRAPH_ACCESS_TOKEN"),
            calendar_api_url: std::env::var("GOOGLE_CALENDAR_API_URL")
                .unwrap_or(defaults.providers.calendar_api_url),
            calendar_access_token: secret_var("GOOGLE_CALENDAR_ACCESS_TOKEN"),
        };

        Self {
            llm,
            screening,
            processing,
            sanitizer,
            providers,
            job_max_attempts: env_or("JOB_MAX_ATTEMPTS", defaults.job_max_attempts),
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency),
            fail_when_all_actions_fail: env_or(
                "FAIL_WHEN_ALL_ACTIONS_FAIL",
                defaults.fail_when_all_actions_fail,
            ),
            db_path: std::env::var("MAIL_TRIAGE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            http_port: env_or("MAIL_TRIAGE_HTTP_PORT", defaults.http_port),
            stuck_threshold: Duration::from_secs(env_or(
                "STUCK_THRESHOLD_SECS",
                defaults.stuck_threshold.as_secs(),
            )),
            log_dir: std::env::var("MAIL_TRIAGE_LOG_DIR").ok().map(PathBuf::from),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, stage) in [("screening", &self.screening), ("processing", &self.processing)] {
            if !(0.0..=2.0).contains(&stage.temperature) {
                return Err(invalid(
                    &format!("{key}.temperature"),
                    "must be between 0.0 and 2.0",
                ));
            }
            if stage.max_tokens == 0 {
                return Err(invalid(&format!("{key}.max_tokens"), "must be positive"));
            }
            if stage.job_timeout.is_zero() {
                return Err(invalid(&format!("{key}.job_timeout"), "must be positive"));
            }
            if stage.llm_max_attempts == 0 {
                return Err(invalid(&format!("{key}.llm_max_attempts"), "must be at least 1"));
            }
            if stage.llm_request_timeout.is_zero() {
                return Err(invalid(
                    &format!("{key}.llm_request_timeout"),
                    "must be positive",
                ));
            }
            if stage.llm_budget() >= stage.job_timeout {
                return Err(invalid(
                    &format!("{key}.llm_request_timeout"),
                    &format!(
                        "{} attempts of {:?} plus backoff take {:?}, which does not fit in job_timeout {:?}",
                        stage.llm_max_attempts,
                        stage.llm_request_timeout,
                        stage.llm_budget(),
                        stage.job_timeout
                    ),
                ));
            }
        }
        if self.llm.request_timeout.is_zero() {
            return Err(invalid("llm.request_timeout", "must be positive"));
        }
        if self.job_max_attempts == 0 {
            return Err(invalid("job_max_attempts", "must be at least 1"));
        }
        if self.worker_concurrency == 0 {
            return Err(invalid("worker_concurrency", "must be at least 1"));
        }
        if self.sanitizer.max_chars == 0 {
            return Err(invalid("sanitizer.max_chars", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Parse an env var, warning and falling back to `default` on bad input.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn secret_var(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(SecretString::from)
}
