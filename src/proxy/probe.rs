//! Proxy health probing (spec §4.1): round-trips an HTTP echo endpoint through
//! the proxy, checks the reported egress IP against the proxy's known
//! identity, and scores latency. Uses `reqwest`'s SOCKS/HTTP proxy support
//! directly since the probe target is plain HTTP, unlike the raw SMTP/IMAP
//! tunnels in `tunnel.rs`.

use crate::model::{Proxy, ProxyKind};
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("could not build a proxied http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("echo probe request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("echo endpoint returned an unparseable body")]
    BadBody,
}

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub response_time_ms: u32,
    pub observed_ip: IpAddr,
    /// True when `observed_ip` differs from the proxy's own declared host and
    /// isn't a private/loopback address — signals the tunnel may be leaking
    /// through to the caller's real egress rather than the proxy's.
    pub ip_mismatch_suspected: bool,
}

fn proxy_url(proxy: &Proxy) -> String {
    let scheme = match proxy.kind {
        ProxyKind::Socks5 => "socks5h",
        ProxyKind::Socks4 => "socks4",
        ProxyKind::Http => "http",
    };
    match &proxy.auth {
        Some(auth) => format!(
            "{scheme}://{}:{}@{}:{}",
            auth.username, auth.password, proxy.host, proxy.port
        ),
        None => format!("{scheme}://{}:{}", proxy.host, proxy.port),
    }
}

/// Hits `echo_url` (expected to respond with the caller's IP as a bare string
/// or `{"ip": "..."}`) through `proxy` and records latency plus the observed
/// egress address.
pub async fn probe(proxy: &Proxy, echo_url: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(proxy_url(proxy)).map_err(ProbeError::ClientBuild)?)
        .timeout(timeout)
        .build()
        .map_err(ProbeError::ClientBuild)?;

    let started = Instant::now();
    let body = client
        .get(echo_url)
        .send()
        .await
        .map_err(ProbeError::Request)?
        .text()
        .await
        .map_err(ProbeError::Request)?;
    let response_time_ms = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;

    let observed_ip = parse_echo_body(&body).ok_or(ProbeError::BadBody)?;
    let ip_mismatch_suspected = is_ip_mismatch(proxy, observed_ip);

    Ok(ProbeOutcome {
        response_time_ms,
        observed_ip,
        ip_mismatch_suspected,
    })
}

fn parse_echo_body(body: &str) -> Option<IpAddr> {
    let trimmed = body.trim();
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Some(ip);
    }
    #[derive(serde::Deserialize)]
    struct EchoPayload {
        ip: String,
    }
    serde_json::from_str::<EchoPayload>(trimmed)
        .ok()
        .and_then(|p| p.ip.parse().ok())
}

fn is_ip_mismatch(proxy: &Proxy, observed: IpAddr) -> bool {
    if observed.is_loopback() {
        return false;
    }
    match proxy.host.parse::<IpAddr>() {
        Ok(configured) => configured != observed,
        // Proxy configured by hostname: we can't compare directly, so only the
        // cross-probe history (ProxyPool::refresh) flags drift over time.
        Err(_) => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_plain_and_json_echo_bodies() {
        assert_eq!(parse_echo_body(" 203.0.113.9 \n"), Some("203.0.113.9".parse().unwrap()));
        assert_eq!(
            parse_echo_body(r#"{"ip":"203.0.113.9"}"#),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(parse_echo_body("not an ip"), None);
    }

    #[test]
    fn flags_mismatch_only_against_numeric_host() {
        let mut proxy = Proxy::new(
            crate::ids::SessionId::new(),
            ProxyKind::Http,
            "203.0.113.9",
            8080,
        );
        assert!(!is_ip_mismatch(&proxy, "203.0.113.9".parse().unwrap()));
        assert!(is_ip_mismatch(&proxy, "198.51.100.1".parse().unwrap()));

        proxy.host = "proxy.example.com".into();
        assert!(!is_ip_mismatch(&proxy, "198.51.100.1".parse().unwrap()));
    }
}
