use crate::ids::{CampaignId, ProxyId, SmtpAccountId};
use crate::log::AttemptLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientTarget {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub custom_fields: HashMap<String, String>,
}

impl RecipientTarget {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: None,
            last_name: None,
            custom_fields: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Failed,
    RateLimited,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAttempt {
    pub campaign_id: CampaignId,
    pub recipient_email: String,
    pub account_id: SmtpAccountId,
    pub proxy_id: Option<ProxyId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: AttemptOutcome,
    pub error_text: Option<String>,
    pub log: AttemptLog,
}

impl SendAttempt {
    pub fn start(
        campaign_id: CampaignId,
        recipient_email: impl Into<String>,
        account_id: SmtpAccountId,
        proxy_id: Option<ProxyId>,
    ) -> Self {
        Self {
            campaign_id,
            recipient_email: recipient_email.into(),
            account_id,
            proxy_id,
            started_at: Utc::now(),
            ended_at: None,
            outcome: AttemptOutcome::Failed,
            error_text: None,
            log: AttemptLog::default(),
        }
    }

    pub fn finish(&mut self, outcome: AttemptOutcome, error_text: Option<String>) {
        self.ended_at = Some(Utc::now());
        self.outcome = outcome;
        self.error_text = error_text;
    }
}

/// Persistent record of a recipient whose retries were exhausted (spec §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub campaign_id: CampaignId,
    pub recipient_email: String,
    pub attempts: Vec<SendAttempt>,
    pub final_error: String,
    pub created_at: DateTime<Utc>,
}
