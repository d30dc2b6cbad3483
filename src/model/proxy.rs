use crate::ids::{ProxyId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyKind {
    Socks5,
    Socks4,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyStatus {
    Pending,
    Valid,
    Dead,
    Blacklisted,
}

/// Mirrors spec §3 `Proxy`, plus `consecutive_tunnel_failures` (SPEC_FULL §3
/// supplement, used to implement the dead-escalation threshold decided in
/// DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: ProxyId,
    pub session_id: SessionId,
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
    pub status: ProxyStatus,
    pub response_time_ms: Option<u32>,
    pub is_active: bool,
    pub is_blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_observed_ip: Option<IpAddr>,
    pub error_text: Option<String>,
    pub consecutive_tunnel_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl Proxy {
    pub fn new(session_id: SessionId, kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: ProxyId::new(),
            session_id,
            kind,
            host: host.into(),
            port,
            auth: None,
            status: ProxyStatus::Pending,
            response_time_ms: None,
            is_active: true,
            is_blacklisted: false,
            blacklist_reason: None,
            last_checked: None,
            last_observed_ip: None,
            error_text: None,
            consecutive_tunnel_failures: 0,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_blacklisted && matches!(self.status, ProxyStatus::Valid)
    }
}
