//! Shared scaffolding for the `run-campaign`, `probe-imap`, and `check-smtp`
//! binaries (spec §6 "External interfaces"): collaborator assembly, the
//! process exit-code mapping, and the thin `TokenProvider` the bundled CLIs
//! use in place of a real OAuth2 refresh flow (that belongs to whatever
//! transport layer owns the tenant's stored refresh tokens in production).

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::proxy::{NullBlacklistOracle, ProxyPool};
use crate::rate::Governor;
use crate::selector::{AccountSelector, HealthWeights};
use crate::smtp::{host::HostResolver, SmtpDispatcher};
use crate::store::{OsRandomness, TokenProvider};
use crate::storefile::JsonFileStore;
use crate::warmup::WarmupController;
use async_trait::async_trait;
use chrono::NaiveTime;
use std::sync::Arc;
use std::time::Duration;

/// Reads a pre-obtained access token from `OAUTH_ACCESS_TOKEN` rather than
/// exchanging `refresh_token` with the provider. Sufficient for a one-shot CLI
/// run against a single already-authorized account; a deployment with many
/// tenants needs a real token-refresh client behind this trait instead.
pub struct EnvTokenProvider;

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn access_token(&self, _refresh_token: &str, _client_id: &str) -> anyhow::Result<String> {
        std::env::var("OAUTH_ACCESS_TOKEN")
            .map_err(|_| anyhow::anyhow!("OAUTH_ACCESS_TOKEN is not set; the bundled CLIs don't refresh OAuth tokens themselves"))
    }
}

/// Exit codes per spec §6: 0 success, 1 internal error, 2 bad config, 3 no
/// proxies (under `proxy_fallback_disabled`), 4 no accounts, 5 cancelled.
#[derive(Debug)]
pub enum CliOutcome {
    Success,
    BadConfig(String),
    NoProxies,
    NoAccounts,
    Cancelled,
    Internal(String),
}

impl CliOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliOutcome::Success => 0,
            CliOutcome::Internal(_) => 1,
            CliOutcome::BadConfig(_) => 2,
            CliOutcome::NoProxies => 3,
            CliOutcome::NoAccounts => 4,
            CliOutcome::Cancelled => 5,
        }
    }

    pub fn report(&self) {
        match self {
            CliOutcome::Success => {}
            CliOutcome::BadConfig(msg) => tracing::error!(error = %msg, "bad configuration"),
            CliOutcome::NoProxies => tracing::error!("no working proxy available and proxy_fallback_disabled is set"),
            CliOutcome::NoAccounts => tracing::error!("no eligible account for this session"),
            CliOutcome::Cancelled => tracing::warn!("cancelled"),
            CliOutcome::Internal(msg) => tracing::error!(error = %msg, "internal error"),
        }
    }
}

/// The collaborators every bin needs, assembled once from `EngineConfig` and a
/// shared `JsonFileStore` the way `main()` in each bin would otherwise have to
/// duplicate.
pub struct Engine {
    pub config: Arc<EngineConfig>,
    pub store: Arc<JsonFileStore>,
    pub dispatcher: Arc<SmtpDispatcher>,
    pub imap_prober: Arc<crate::imap::ImapProber>,
    pub selector: Arc<AccountSelector<SystemClock, OsRandomness>>,
    pub warmup: Arc<WarmupController<SystemClock>>,
    pub proxy_pool: Arc<ProxyPool<JsonFileStore, NullBlacklistOracle>>,
    pub randomness: Arc<OsRandomness>,
}

impl Engine {
    pub fn assemble(config: EngineConfig, store: Arc<JsonFileStore>) -> Self {
        let config = Arc::new(config);
        let clock = Arc::new(SystemClock);
        let tokens: Arc<dyn TokenProvider> = Arc::new(EnvTokenProvider);

        let account_governor = Arc::new(
            Governor::new(config.per_account_limit_per_minute(), Duration::from_secs(60), clock.clone())
                .expect("per_account_limit_per_minute is never zero window"),
        );
        let domain_governor = Arc::new(
            Governor::new(config.per_domain_limit_per_minute(), Duration::from_secs(60), clock.clone())
                .expect("per_domain_limit_per_minute is never zero window"),
        );
        let warmup = Arc::new(WarmupController::new(clock.clone(), NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        let selector = Arc::new(AccountSelector::new(
            account_governor,
            domain_governor,
            warmup.clone(),
            Arc::new(OsRandomness),
            true,
            HealthWeights::default(),
        ));

        let proxy_pool = Arc::new(ProxyPool::new(
            store.clone(),
            Arc::new(NullBlacklistOracle),
            "https://api.ipify.org?format=json",
            Duration::from_secs(10),
            Duration::from_secs(15),
            8,
        ));

        let dispatcher = Arc::new(SmtpDispatcher::new(proxy_pool.clone(), tokens.clone(), HostResolver::new()));
        let imap_prober = Arc::new(crate::imap::ImapProber::new(proxy_pool.clone(), tokens));

        Self {
            config,
            store,
            dispatcher,
            imap_prober,
            selector,
            warmup,
            proxy_pool,
            randomness: Arc::new(OsRandomness),
        }
    }
}
