use crate::ids::{ImapAccountId, SessionId, SmtpAccountId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    Password(String),
    OAuth {
        refresh_token: String,
        client_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Pending,
    Valid,
    Invalid,
    Dead,
    Checked,
}

/// Mirrors spec §3 `SMTP Account`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpAccount {
    pub id: SmtpAccountId,
    pub session_id: SessionId,
    pub host: Option<String>,
    pub port: u16,
    pub email: String,
    pub credential: Credential,
    pub status: AccountStatus,
    pub is_active: bool,
    pub health_score: HealthScore,
    pub last_check: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u32>,
    pub warmup_day: u32,
    pub warmup_daily_cap: u32,
    pub daily_sent: u32,
    pub hourly_sent: u32,
    pub error_text: Option<String>,
}

impl SmtpAccount {
    pub fn new(session_id: SessionId, email: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: SmtpAccountId::new(),
            session_id,
            host: None,
            port: 587,
            email: email.into(),
            credential,
            status: AccountStatus::Pending,
            is_active: true,
            health_score: HealthScore::default(),
            last_check: None,
            response_time_ms: None,
            warmup_day: 1,
            warmup_daily_cap: 0,
            daily_sent: 0,
            hourly_sent: 0,
            error_text: None,
        }
    }

    pub fn domain(&self) -> &str {
        self.email.split('@').next_back().unwrap_or_default()
    }

    pub fn is_eligible(&self) -> bool {
        self.is_active && matches!(self.status, AccountStatus::Valid | AccountStatus::Checked)
    }
}

/// EWMA-based composite health score (spec §3 `Health Score`, §4.4 step 3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthScore {
    pub ewma_success: f64,
    pub ewma_latency_ms: f64,
    pub consecutive_failures: u32,
}

impl Default for HealthScore {
    fn default() -> Self {
        Self {
            ewma_success: 1.0,
            ewma_latency_ms: 0.0,
            consecutive_failures: 0,
        }
    }
}

impl HealthScore {
    const ALPHA: f64 = 0.3;

    pub fn observe(&mut self, success: bool, response_time_ms: u32) {
        let s = if success { 1.0 } else { 0.0 };
        self.ewma_success = Self::ALPHA * s + (1.0 - Self::ALPHA) * self.ewma_success;
        self.ewma_latency_ms =
            Self::ALPHA * response_time_ms as f64 + (1.0 - Self::ALPHA) * self.ewma_latency_ms;
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// Composite score `w1*ewma_success - w2*ewma_latency - w3*consecutive_failures`.
    pub fn composite(&self, w1: f64, w2: f64, w3: f64) -> f64 {
        w1 * self.ewma_success - w2 * (self.ewma_latency_ms / 1000.0)
            - w3 * self.consecutive_failures as f64
    }
}

/// Mirrors spec §3 `IMAP Account`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapAccount {
    pub id: ImapAccountId,
    pub session_id: SessionId,
    pub host: Option<String>,
    pub port: u16,
    pub email: String,
    pub credential: Credential,
    pub use_ssl: bool,
    pub status: AccountStatus,
    pub last_check: Option<DateTime<Utc>>,
}

impl ImapAccount {
    pub fn new(session_id: SessionId, email: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: ImapAccountId::new(),
            session_id,
            host: None,
            port: 993,
            email: email.into(),
            credential,
            use_ssl: true,
            status: AccountStatus::Pending,
            last_check: None,
        }
    }

    pub fn domain(&self) -> &str {
        self.email.split('@').next_back().unwrap_or_default()
    }
}
