//! Interface abstractions per capability (spec §9 "Design Notes" — replaces deep
//! inheritance of service classes with narrow traits components receive). Every
//! persistence or I/O boundary the core touches is named here; production
//! implementations live in a surrounding transport crate, tests use the
//! in-memory ones in `testutil`.

use crate::error::EngineResult;
use crate::ids::{CampaignId, ImapAccountId, ProxyId, SessionId, SmtpAccountId};
use crate::model::{Campaign, DeadLetterRecord, ImapAccount, Proxy, SendAttempt, SmtpAccount};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list_smtp_accounts(&self, session: SessionId) -> anyhow::Result<Vec<SmtpAccount>>;
    async fn get_smtp_account(&self, id: SmtpAccountId) -> anyhow::Result<Option<SmtpAccount>>;
    async fn update_smtp_account(&self, account: &SmtpAccount) -> anyhow::Result<()>;

    async fn list_imap_accounts(&self, session: SessionId) -> anyhow::Result<Vec<ImapAccount>>;
    async fn get_imap_account(&self, id: ImapAccountId) -> anyhow::Result<Option<ImapAccount>>;
    async fn update_imap_account(&self, account: &ImapAccount) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ProxyStore: Send + Sync {
    async fn list_proxies(&self, session: SessionId) -> anyhow::Result<Vec<Proxy>>;
    async fn get_proxy(&self, id: ProxyId) -> anyhow::Result<Option<Proxy>>;
    async fn update_proxy(&self, proxy: &Proxy) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_campaign(&self, id: CampaignId) -> anyhow::Result<Option<Campaign>>;
    async fn update_campaign(&self, campaign: &Campaign) -> anyhow::Result<()>;
    async fn append_send_attempt(&self, attempt: &SendAttempt) -> anyhow::Result<()>;
    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()>;
}

/// Recipient pagination boundary (spec §4.7 step 1: "semantic pagination, not
/// a storage detail") so the Orchestrator never assumes a particular backing
/// store for recipient lists.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn next_batch(&self, offset: usize, batch_size: usize) -> anyhow::Result<Vec<crate::model::RecipientTarget>>;
}

/// Randomness seam (spec §9) so campaign macro substitution and account
/// sampling are testable without depending on the global RNG.
pub trait Randomness: Send + Sync {
    fn random_u32(&self, range: std::ops::Range<u32>) -> u32;
    fn random_index(&self, len: usize) -> usize;
}

#[derive(Default, Clone, Copy)]
pub struct OsRandomness;

impl Randomness for OsRandomness {
    fn random_u32(&self, range: std::ops::Range<u32>) -> u32 {
        use rand::Rng;
        rand::rng().random_range(range)
    }

    fn random_index(&self, len: usize) -> usize {
        use rand::Rng;
        if len == 0 { 0 } else { rand::rng().random_range(0..len) }
    }
}

/// OAuth2 XOAUTH2 access-token provider, refreshing when needed (spec §4.5 step 4).
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> anyhow::Result<String>;
}

/// Any socket the Dispatcher/Prober can speak a wire protocol over, whether it
/// came from a proxy tunnel or (when leak-prevention is off) a direct connect.
pub trait EngineSocket: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> EngineSocket for T {}

/// Bridges the Dispatcher/Prober to a socket source without making either
/// generic over the Proxy Pool's store/oracle type parameters (spec §9:
/// narrow trait abstraction per capability). `proxy` is `None` only when the
/// caller's tenant session does not force proxying.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(
        &self,
        proxy: Option<&Proxy>,
        target_host: &str,
        target_port: u16,
        timeout: Duration,
    ) -> EngineResult<Box<dyn EngineSocket>>;
}

/// Connects straight to the target, bypassing any proxy. Only constructible
/// by callers outside leak-prevention mode; enforcing that is the caller's
/// responsibility (spec §4.1: bypassing is a programming error, not a runtime
/// one).
pub struct DirectSocketFactory;

#[async_trait]
impl SocketFactory for DirectSocketFactory {
    async fn connect(
        &self,
        _proxy: Option<&Proxy>,
        target_host: &str,
        target_port: u16,
        timeout: Duration,
    ) -> EngineResult<Box<dyn EngineSocket>> {
        let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect((target_host, target_port)))
            .await
            .map_err(|_| crate::error::EngineError::Network("direct connect timed out".into()))?
            .map_err(|e| crate::error::EngineError::Network(e.to_string()))?;
        Ok(Box::new(stream))
    }
}
