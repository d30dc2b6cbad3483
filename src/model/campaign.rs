use crate::ids::{CampaignId, SessionId, SmtpAccountId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `Duration` as whole seconds, for the config types below — `serde` has no
/// built-in `Duration` impl and this crate has no reason to pull in a helper
/// crate for one field.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// Invariant 7: a campaign never leaves a terminal state back to running.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Stopped | CampaignStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Draft, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub sent: u64,
    pub success: u64,
    pub failed: u64,
    pub retries: u64,
    pub failovers: u64,
    pub rate_limited: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub oauth_errors: u64,
    pub proxy_errors: u64,
    pub smtp_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub subject_pool: Vec<String>,
    pub template_pool: Vec<MessageTemplate>,
    pub batch_size: usize,
    #[serde(with = "duration_secs")]
    pub delay_between_batches: Duration,
    pub thread_count: usize,
    pub retry_limit: u32,
    pub sender: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub explicit_proxy: Option<(String, u16)>,
    pub redirect_domains: Vec<String>,
    pub campaign_name: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            subject_pool: vec!["Hello %%FIRST_NAME%%".to_string()],
            template_pool: vec![MessageTemplate::default()],
            batch_size: 50,
            delay_between_batches: Duration::from_secs(0),
            thread_count: 4,
            retry_limit: 3,
            sender: String::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            explicit_proxy: None,
            redirect_domains: Vec::new(),
            campaign_name: "campaign".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub session_id: SessionId,
    pub status: CampaignStatus,
    pub config: CampaignConfig,
    pub counters: CampaignCounters,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub smtp_account_ids: Vec<SmtpAccountId>,
}

impl Campaign {
    pub fn new(session_id: SessionId, config: CampaignConfig, smtp_account_ids: Vec<SmtpAccountId>) -> Self {
        Self {
            id: CampaignId::new(),
            session_id,
            status: CampaignStatus::Draft,
            config,
            counters: CampaignCounters::default(),
            started_at: None,
            completed_at: None,
            smtp_account_ids,
        }
    }

    /// Invariant 2: `sent = success + failed` once the campaign terminates.
    pub fn counters_consistent(&self) -> bool {
        self.counters.sent == self.counters.success + self.counters.failed
    }
}

/// Snapshot consumed by an external transport layer (spec §4.7 step 6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub sent: u64,
    pub total: u64,
    pub rate_per_second: f64,
    pub estimated_completion_secs: Option<f64>,
    pub status: CampaignStatus,
}
