//! Proxy Pool (spec §4.1): produces a working proxy on demand and a fully
//! connected socket to an arbitrary target host:port, or refuses. Grounded in
//! the round-robin/fastest/random rotation strategy from the reference proxy
//! pool implementation in the pack, layered over the teacher's pattern of
//! framing raw protocol I/O by hand (see `tunnel.rs`).

pub mod probe;
pub mod tunnel;

use crate::error::{EngineError, EngineResult};
use crate::ids::{ProxyId, SessionId};
use crate::model::{Proxy, ProxyStatus};
use crate::store::{EngineSocket, ProxyStore, SocketFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub use probe::{probe, ProbeError, ProbeOutcome};
pub use tunnel::{open_tunnel, TunnelError};

/// Proxy-pick strategy (spec §4.1 `get_working`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStrategy {
    Random,
    Fastest,
    RoundRobin,
}

/// Default probe cache TTL (SPEC_FULL §4, sourced from the original
/// `proxy_service.py`'s `self.cache_ttl = 3600`).
pub const PROBE_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Consecutive `open_tunnel` failures before a proxy is escalated to `dead`
/// even though the probe itself still reports it healthy (DESIGN.md Open
/// Question: dead-escalation threshold).
pub const TUNNEL_FAILURE_ESCALATION_THRESHOLD: u32 = 3;

/// Oracle consulted after a successful probe to flag proxies whose egress IP
/// is known-bad (spam blacklists, datacenter ranges the tenant excludes, ...).
#[async_trait::async_trait]
pub trait BlacklistOracle: Send + Sync {
    async fn is_blacklisted(&self, ip: std::net::IpAddr) -> anyhow::Result<Option<String>>;
}

pub struct NullBlacklistOracle;

#[async_trait::async_trait]
impl BlacklistOracle for NullBlacklistOracle {
    async fn is_blacklisted(&self, _ip: std::net::IpAddr) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

pub struct RefreshSummary {
    pub probed: usize,
    pub valid: usize,
    pub dead: usize,
    pub blacklisted: usize,
}

/// Probes a single proxy and applies the blacklist cross-check and IP
/// consistency rules (spec §4.1), mutating `proxy` in place. Standalone so it
/// can run inside a spawned task during [`ProxyPool::refresh`] without
/// borrowing the pool.
async fn probe_and_classify<B: BlacklistOracle>(
    proxy: &mut Proxy,
    blacklist: &B,
    echo_url: &str,
    probe_timeout: Duration,
) {
    match probe::probe(proxy, echo_url, probe_timeout).await {
        Ok(outcome) => {
            proxy.response_time_ms = Some(outcome.response_time_ms);
            proxy.last_observed_ip = Some(outcome.observed_ip);
            proxy.error_text = None;

            if outcome.ip_mismatch_suspected {
                proxy.status = ProxyStatus::Blacklisted;
                proxy.is_blacklisted = true;
                proxy.blacklist_reason =
                    Some("observed egress IP is inconsistent with the proxy's declared address".into());
                proxy.last_checked = Some(chrono::Utc::now());
                return;
            }

            match blacklist.is_blacklisted(outcome.observed_ip).await {
                Ok(Some(reason)) => {
                    proxy.status = ProxyStatus::Blacklisted;
                    proxy.is_blacklisted = true;
                    proxy.blacklist_reason = Some(reason);
                }
                Ok(None) => {
                    proxy.status = ProxyStatus::Valid;
                    proxy.is_blacklisted = false;
                    proxy.blacklist_reason = None;
                }
                Err(e) => {
                    // Oracle failure should not mask a successful probe; keep
                    // the proxy usable but record the lookup error.
                    proxy.status = ProxyStatus::Valid;
                    proxy.error_text = Some(format!("blacklist oracle error: {e}"));
                }
            }
        }
        Err(e) => {
            proxy.status = ProxyStatus::Dead;
            proxy.error_text = Some(e.to_string());
        }
    }
    proxy.last_checked = Some(chrono::Utc::now());
}

pub struct ProxyPool<S: ProxyStore, B: BlacklistOracle> {
    store: Arc<S>,
    blacklist: Arc<B>,
    echo_url: String,
    probe_timeout: Duration,
    tunnel_timeout: Duration,
    refresh_concurrency: usize,
    round_robin_cursor: AtomicUsize,
}

impl<S: ProxyStore + 'static, B: BlacklistOracle + 'static> ProxyPool<S, B> {
    pub fn new(
        store: Arc<S>,
        blacklist: Arc<B>,
        echo_url: impl Into<String>,
        probe_timeout: Duration,
        tunnel_timeout: Duration,
        refresh_concurrency: usize,
    ) -> Self {
        Self {
            store,
            blacklist,
            echo_url: echo_url.into(),
            probe_timeout,
            tunnel_timeout,
            refresh_concurrency: refresh_concurrency.max(1),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// Proxies currently `valid`, excluding blacklisted/inactive, ascending by
    /// response time — cached entries are used as-is; staleness beyond
    /// [`PROBE_CACHE_TTL`] is the caller's cue to call [`Self::refresh`] first.
    pub async fn list_working(&self, session: SessionId) -> EngineResult<Vec<Proxy>> {
        let mut proxies = self
            .store
            .list_proxies(session)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        proxies.retain(|p| p.is_usable());
        proxies.sort_by_key(|p| p.response_time_ms.unwrap_or(u32::MAX));
        Ok(proxies)
    }

    pub async fn get_working(&self, session: SessionId, strategy: SelectStrategy) -> EngineResult<Proxy> {
        let working = self.list_working(session).await?;
        if working.is_empty() {
            return Err(EngineError::ProxyUnavailable);
        }
        let chosen = match strategy {
            SelectStrategy::Fastest => working.into_iter().next().unwrap(),
            SelectStrategy::Random => {
                use rand::Rng;
                let idx = rand::rng().random_range(0..working.len());
                working.into_iter().nth(idx).unwrap()
            }
            SelectStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % working.len();
                working.into_iter().nth(idx).unwrap()
            }
        };
        Ok(chosen)
    }

    /// Opens a tunneled socket through `proxy`. This is the only egress path
    /// the Dispatcher/Prober may use when `proxy_force` is set on the tenant
    /// session; callers outside this module constructing a bare `TcpStream`
    /// in that mode is a programming error, not a runtime one, so it is not
    /// represented here as a `Result` variant to "fall back" to.
    pub async fn open_tunnel(
        &self,
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> EngineResult<tokio::net::TcpStream> {
        tunnel::open_tunnel(proxy, target_host, target_port, self.tunnel_timeout)
            .await
            .map_err(|e| match e {
                TunnelError::Connect(_) | TunnelError::Io(_) => EngineError::Network(e.to_string()),
                TunnelError::Rejected(_) | TunnelError::Protocol | TunnelError::UnsupportedAddress(_) => {
                    EngineError::Network(e.to_string())
                }
            })
    }

    /// Records an `open_tunnel` outcome against the dead-escalation counter
    /// and persists the updated proxy (spec §4.1 "Failure semantics").
    pub async fn record_tunnel_outcome(&self, proxy: &mut Proxy, ok: bool) -> EngineResult<()> {
        if ok {
            proxy.consecutive_tunnel_failures = 0;
        } else {
            proxy.consecutive_tunnel_failures += 1;
            if proxy.consecutive_tunnel_failures >= TUNNEL_FAILURE_ESCALATION_THRESHOLD {
                proxy.status = ProxyStatus::Dead;
            }
        }
        self.store
            .update_proxy(proxy)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))
    }

    /// Probes every proxy for `session` concurrently, bounded by
    /// `refresh_concurrency`, and persists the updated status of each.
    pub async fn refresh(&self, session: SessionId) -> EngineResult<RefreshSummary> {
        let proxies = self
            .store
            .list_proxies(session)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let semaphore = Arc::new(Semaphore::new(self.refresh_concurrency));
        let mut handles = Vec::with_capacity(proxies.len());
        for mut proxy in proxies {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let blacklist = self.blacklist.clone();
            let echo_url = self.echo_url.clone();
            let probe_timeout = self.probe_timeout;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                probe_and_classify(&mut proxy, blacklist.as_ref(), &echo_url, probe_timeout).await;
                let _ = store.update_proxy(&proxy).await;
                proxy.status
            }));
        }

        let mut summary = RefreshSummary {
            probed: 0,
            valid: 0,
            dead: 0,
            blacklisted: 0,
        };
        for handle in handles {
            if let Ok(status) = handle.await {
                summary.probed += 1;
                match status {
                    ProxyStatus::Valid => summary.valid += 1,
                    ProxyStatus::Dead => summary.dead += 1,
                    ProxyStatus::Blacklisted => summary.blacklisted += 1,
                    ProxyStatus::Pending => {}
                }
            }
        }
        Ok(summary)
    }

    pub fn is_stale(last_checked: Option<chrono::DateTime<chrono::Utc>>) -> bool {
        match last_checked {
            None => true,
            Some(t) => chrono::Utc::now().signed_duration_since(t).to_std().unwrap_or(Duration::MAX) >= PROBE_CACHE_TTL,
        }
    }

    pub fn id_for(proxy: &Proxy) -> ProxyId {
        proxy.id
    }
}

#[async_trait::async_trait]
impl<S: ProxyStore + 'static, B: BlacklistOracle + 'static> SocketFactory for ProxyPool<S, B> {
    /// The leak-prevention enforcement point (spec §4.1, invariant 5): this
    /// factory refuses to produce a socket without a proxy, so any caller
    /// that reaches it without one has already violated the invariant — a
    /// programming error, surfaced here as a fast failure rather than a
    /// silent direct connect.
    async fn connect(
        &self,
        proxy: Option<&Proxy>,
        target_host: &str,
        target_port: u16,
        _timeout: Duration,
    ) -> EngineResult<Box<dyn EngineSocket>> {
        let proxy = proxy.expect("ProxyPool::connect called without a proxy (leak-prevention invariant violated)");
        let stream = self.open_tunnel(proxy, target_host, target_port).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::SessionId;
    use crate::model::ProxyKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MemProxyStore(Mutex<Vec<Proxy>>);

    #[async_trait]
    impl ProxyStore for MemProxyStore {
        async fn list_proxies(&self, _session: SessionId) -> anyhow::Result<Vec<Proxy>> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn get_proxy(&self, id: ProxyId) -> anyhow::Result<Option<Proxy>> {
            Ok(self.0.lock().unwrap().iter().find(|p| p.id == id).cloned())
        }
        async fn update_proxy(&self, proxy: &Proxy) -> anyhow::Result<()> {
            let mut guard = self.0.lock().unwrap();
            if let Some(existing) = guard.iter_mut().find(|p| p.id == proxy.id) {
                *existing = proxy.clone();
            }
            Ok(())
        }
    }

    fn valid_proxy(session: SessionId, response_time_ms: u32) -> Proxy {
        let mut p = Proxy::new(session, ProxyKind::Socks5, "127.0.0.1", 1080);
        p.status = ProxyStatus::Valid;
        p.response_time_ms = Some(response_time_ms);
        p
    }

    #[tokio::test]
    async fn get_working_returns_unavailable_when_empty() {
        let session = SessionId::new();
        let store = Arc::new(MemProxyStore(Mutex::new(vec![])));
        let pool = ProxyPool::new(store, Arc::new(NullBlacklistOracle), "http://echo", Duration::from_secs(1), Duration::from_secs(1), 4);
        let err = pool.get_working(session, SelectStrategy::Fastest).await.unwrap_err();
        assert!(matches!(err, EngineError::ProxyUnavailable));
    }

    #[tokio::test]
    async fn fastest_strategy_picks_lowest_latency() {
        let session = SessionId::new();
        let slow = valid_proxy(session, 500);
        let fast = valid_proxy(session, 10);
        let store = Arc::new(MemProxyStore(Mutex::new(vec![slow.clone(), fast.clone()])));
        let pool = ProxyPool::new(store, Arc::new(NullBlacklistOracle), "http://echo", Duration::from_secs(1), Duration::from_secs(1), 4);
        let chosen = pool.get_working(session, SelectStrategy::Fastest).await.unwrap();
        assert_eq!(chosen.id, fast.id);
    }

    #[tokio::test]
    async fn tunnel_failure_escalates_to_dead_after_threshold() {
        let session = SessionId::new();
        let mut proxy = valid_proxy(session, 10);
        let store = Arc::new(MemProxyStore(Mutex::new(vec![proxy.clone()])));
        let pool = ProxyPool::new(store, Arc::new(NullBlacklistOracle), "http://echo", Duration::from_secs(1), Duration::from_secs(1), 4);

        for _ in 0..(TUNNEL_FAILURE_ESCALATION_THRESHOLD - 1) {
            pool.record_tunnel_outcome(&mut proxy, false).await.unwrap();
            assert_eq!(proxy.status, ProxyStatus::Valid);
        }
        pool.record_tunnel_outcome(&mut proxy, false).await.unwrap();
        assert_eq!(proxy.status, ProxyStatus::Dead);
    }
}
