//! Process configuration — loaded once at startup, immutable afterwards.
//!
//! Every knob is a CLI flag with an environment-variable fallback, so the
//! proxy can be launched bare under a service manager with only env set.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ── Credentials ─────────────────────────────────────────────────────

/// An upstream API credential. Redacted in `Debug`, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw secret. Only the HTTP layer should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ── Dispatch Config ─────────────────────────────────────────────────

/// One upstream endpoint/credential pair.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub credential: Credential,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: Credential::new(credential),
        }
    }
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// Everything the dispatcher needs to run a request.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub primary: EndpointConfig,
    pub secondary: Option<EndpointConfig>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Deadline for a single HTTP attempt.
    pub attempt_timeout: Duration,
    pub sampling: SamplingParams,
}

impl DispatchConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Config with defaults and only a primary endpoint.
    pub fn new(primary: EndpointConfig, model: impl Into<String>) -> Self {
        Self {
            primary,
            secondary: None,
            model: model.into(),
            system_prompt: None,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff_base: Self::DEFAULT_BACKOFF_BASE,
            attempt_timeout: Self::DEFAULT_ATTEMPT_TIMEOUT,
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_secondary(mut self, secondary: EndpointConfig) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.model.trim().is_empty() {
            bail!("model identifier must not be empty");
        }
        check_endpoint("primary", &self.primary)?;
        if let Some(secondary) = &self.secondary {
            check_endpoint("secondary", secondary)?;
        }
        Ok(())
    }
}

fn check_endpoint(label: &str, endpoint: &EndpointConfig) -> Result<()> {
    reqwest::Url::parse(&endpoint.url)
        .with_context(|| format!("{} endpoint URL is invalid: {}", label, endpoint.url))?;
    if endpoint.credential.expose().trim().is_empty() {
        bail!("{} endpoint credential is empty", label);
    }
    Ok(())
}

// ── Alert Policy ────────────────────────────────────────────────────

/// What to do when the alert state cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnreadableStorePolicy {
    /// Treat as "not yet alerted" and notify.
    #[default]
    FailOpen,
    /// Treat as "already alerted" and stay quiet.
    FailClosed,
}

// ── Proxy Args ──────────────────────────────────────────────────────

/// Command-line / environment configuration for the proxy binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ProxyArgs {
    #[arg(long, env = "PRIMARY_API_URL")]
    pub primary_url: String,
    #[arg(long, env = "PRIMARY_API_KEY", hide_env_values = true)]
    pub primary_key: String,
    #[arg(long, env = "SECONDARY_API_URL")]
    pub secondary_url: Option<String>,
    #[arg(long, env = "SECONDARY_API_KEY", hide_env_values = true)]
    pub secondary_key: Option<String>,

    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,
    #[arg(long, env = "SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,
    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 1000)]
    pub backoff_base_ms: u64,
    #[arg(long, env = "ATTEMPT_TIMEOUT_SECS", default_value_t = 60)]
    pub attempt_timeout_secs: u64,

    #[arg(long, env = "MAX_TOKENS", default_value_t = 1024)]
    pub max_tokens: u32,
    #[arg(long, env = "TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,
    #[arg(long, env = "TOP_P", default_value_t = 1.0)]
    pub top_p: f32,
    #[arg(long, env = "FREQUENCY_PENALTY", default_value_t = 0.0)]
    pub frequency_penalty: f32,
    #[arg(long, env = "PRESENCE_PENALTY", default_value_t = 0.0)]
    pub presence_penalty: f32,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1")]
    pub bind_addr: IpAddr,
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,
    #[arg(long, env = "ALERT_STORE_POLICY", value_enum, default_value_t = UnreadableStorePolicy::FailOpen)]
    pub alert_store_policy: UnreadableStorePolicy,

    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = 60)]
    pub rate_limit_per_minute: usize,
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// Settings for the process around the dispatcher.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub alert_webhook_url: Option<String>,
    pub alert_store_policy: UnreadableStorePolicy,
    pub rate_limit_per_minute: usize,
}

impl ProxyArgs {
    /// Split the flat argument set into dispatch and server config.
    pub fn into_configs(self) -> Result<(DispatchConfig, ServerConfig)> {
        let secondary = match (self.secondary_url, self.secondary_key) {
            (Some(url), Some(key)) => Some(EndpointConfig::new(url, key)),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("Secondary endpoint needs both URL and key — failover disabled");
                None
            }
            (None, None) => None,
        };

        let dispatch = DispatchConfig {
            primary: EndpointConfig::new(self.primary_url, self.primary_key),
            secondary,
            model: self.model,
            system_prompt: self.system_prompt.filter(|s| !s.trim().is_empty()),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            sampling: SamplingParams {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
                frequency_penalty: self.frequency_penalty,
                presence_penalty: self.presence_penalty,
            },
        };
        dispatch.validate()?;

        let data_dir = match self.data_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Cannot determine home directory — set DATA_DIR")?
                .join(".chat-relay"),
        };

        let server = ServerConfig {
            listen: SocketAddr::new(self.bind_addr, self.port),
            db_path: data_dir.join("chat-relay.db"),
            data_dir,
            alert_webhook_url: self.alert_webhook_url.filter(|s| !s.trim().is_empty()),
            alert_store_policy: self.alert_store_policy,
            rate_limit_per_minute: self.rate_limit_per_minute.max(1),
        };

        Ok((dispatch, server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ProxyArgs {
        let mut argv = vec![
            "chat-relay",
            "--primary-url", "https://primary.example/v1/chat/completions",
            "--primary-key", "sk-primary",
            "--data-dir", "/tmp/chat-relay-test",
        ];
        argv.extend_from_slice(extra);
        ProxyArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let (dispatch, server) = args(&[]).into_configs().unwrap();
        assert_eq!(dispatch.max_attempts, 3);
        assert_eq!(dispatch.backoff_base, Duration::from_millis(1000));
        assert!(dispatch.secondary.is_none());
        assert_eq!(server.listen.port(), 3001);
        assert_eq!(server.alert_store_policy, UnreadableStorePolicy::FailOpen);
        assert!(server.db_path.ends_with("chat-relay.db"));
    }

    #[test]
    fn test_secondary_requires_both_halves() {
        let (dispatch, _) = args(&["--secondary-url", "https://b.example/v1"])
            .into_configs()
            .unwrap();
        assert!(dispatch.secondary.is_none());

        let (dispatch, _) = args(&[
            "--secondary-url", "https://b.example/v1",
            "--secondary-key", "sk-b",
        ])
        .into_configs()
        .unwrap();
        assert_eq!(dispatch.secondary.unwrap().credential.expose(), "sk-b");
    }

    #[test]
    fn test_fail_closed_policy_parses() {
        let (_, server) = args(&["--alert-store-policy", "fail-closed"])
            .into_configs()
            .unwrap();
        assert_eq!(server.alert_store_policy, UnreadableStorePolicy::FailClosed);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(args(&["--max-attempts", "0"]).into_configs().is_err());
    }

    #[test]
    fn test_bad_url_rejected() {
        let cfg = DispatchConfig::new(EndpointConfig::new("not a url", "k"), "m");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let ep = EndpointConfig::new("https://x.example", "sk-very-secret");
        let dbg = format!("{:?}", ep);
        assert!(!dbg.contains("sk-very-secret"));
        assert!(dbg.contains("***"));
    }
}
