//! Process-wide configuration, read from environment variables at startup the
//! way the teacher's `HandlerConfig::new` reads `SMTP_EHLO_DOMAIN` etc.

use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Process-wide policy and defaults, assembled from the §6 environment
/// variables. Per-session overrides (`proxy_force`, `leak_prevention`) live on
/// `crate::model::TenantSession` and layer on top of these defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `PROXY_IP_LEAK_PREVENTION` — forbid direct egress when true.
    pub proxy_ip_leak_prevention: bool,
    /// `SMTP_PROXY_FORCE` — require a proxy for every SMTP send.
    pub smtp_proxy_force: bool,
    /// `IMAP_PROXY_FORCE` — require a proxy for every IMAP connection.
    pub imap_proxy_force: bool,
    /// `PROXY_FALLBACK_DISABLED` — refuse to run without at least one working proxy.
    pub proxy_fallback_disabled: bool,
    /// `SMTP_RATE_LIMIT_PER_HOUR` — derives the per-minute account rate limit.
    pub smtp_rate_limit_per_hour: u32,
    /// `SMTP_RATE_LIMIT_PER_DOMAIN_PER_HOUR` — derives the per-minute sender
    /// domain rate limit (spec §4.2's second governor instance).
    pub smtp_rate_limit_per_domain_per_hour: u32,
    /// `SMTP_MAX_RETRIES`
    pub smtp_max_retries: u32,
    /// `SMTP_DEFAULT_TIMEOUT` (seconds)
    pub smtp_default_timeout: Duration,
    /// `SMTP_CHECK_TIMEOUT` (seconds)
    pub smtp_check_timeout: Duration,
    /// `IMAP_PATH_PREFIX_DEFAULT`
    pub imap_path_prefix_default: String,
    /// `IMAP_CREATE_SYSTEM_FOLDERS`
    pub imap_create_system_folders: bool,
    /// `IMAP_RAW_TIMEOUT` (seconds)
    pub imap_raw_timeout: Duration,
    /// `IMAP_RAW_RETRIES`
    pub imap_raw_retries: u32,
    /// `REQUIRE_UNSUBSCRIBE_HEADER`
    pub require_unsubscribe_header: bool,
    /// `CUSTOM_MESSAGE_ID`
    pub custom_message_id: bool,
    /// `LOG_FORMAT` — "json" or "pretty", ambient concern carried from the teacher.
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let log_format = match env::var("LOG_FORMAT").ok().as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Self {
            proxy_ip_leak_prevention: env_bool("PROXY_IP_LEAK_PREVENTION", true),
            smtp_proxy_force: env_bool("SMTP_PROXY_FORCE", true),
            imap_proxy_force: env_bool("IMAP_PROXY_FORCE", true),
            proxy_fallback_disabled: env_bool("PROXY_FALLBACK_DISABLED", true),
            smtp_rate_limit_per_hour: env_u32("SMTP_RATE_LIMIT_PER_HOUR", 100),
            smtp_rate_limit_per_domain_per_hour: env_u32("SMTP_RATE_LIMIT_PER_DOMAIN_PER_HOUR", 100),
            smtp_max_retries: env_u32("SMTP_MAX_RETRIES", 3),
            smtp_default_timeout: Duration::from_secs(env_u64("SMTP_DEFAULT_TIMEOUT", 30)),
            smtp_check_timeout: Duration::from_secs(env_u64("SMTP_CHECK_TIMEOUT", 15)),
            imap_path_prefix_default: env::var("IMAP_PATH_PREFIX_DEFAULT").unwrap_or_default(),
            imap_create_system_folders: env_bool("IMAP_CREATE_SYSTEM_FOLDERS", false),
            imap_raw_timeout: Duration::from_secs(env_u64("IMAP_RAW_TIMEOUT", 30)),
            imap_raw_retries: env_u32("IMAP_RAW_RETRIES", 2),
            require_unsubscribe_header: env_bool("REQUIRE_UNSUBSCRIBE_HEADER", false),
            custom_message_id: env_bool("CUSTOM_MESSAGE_ID", true),
            log_format,
        }
    }

    /// `per_account_limit` derived from the hourly cap, per spec §6.
    pub fn per_account_limit_per_minute(&self) -> u32 {
        (self.smtp_rate_limit_per_hour / 60).max(1)
    }

    /// Sender-domain counterpart of [`Self::per_account_limit_per_minute`].
    pub fn per_domain_limit_per_minute(&self) -> u32 {
        (self.smtp_rate_limit_per_domain_per_hour / 60).max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proxy_ip_leak_prevention: true,
            smtp_proxy_force: true,
            imap_proxy_force: true,
            proxy_fallback_disabled: true,
            smtp_rate_limit_per_hour: 100,
            smtp_rate_limit_per_domain_per_hour: 100,
            smtp_max_retries: 3,
            smtp_default_timeout: Duration::from_secs(30),
            smtp_check_timeout: Duration::from_secs(15),
            imap_path_prefix_default: String::new(),
            imap_create_system_folders: false,
            imap_raw_timeout: Duration::from_secs(30),
            imap_raw_retries: 2,
            require_unsubscribe_header: false,
            custom_message_id: true,
            log_format: LogFormat::Json,
        }
    }
}

pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}=info,info", env!("CARGO_CRATE_NAME")).into());

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}
