pub mod account;
pub mod campaign;
pub mod proxy;
pub mod recipient;

pub use account::{AccountStatus, Credential, HealthScore, ImapAccount, SmtpAccount};
pub use campaign::{Campaign, CampaignConfig, CampaignCounters, CampaignStatus, MessageTemplate, ProgressSnapshot};
pub use proxy::{Proxy, ProxyAuth, ProxyKind, ProxyStatus};
pub use recipient::{AttemptOutcome, DeadLetterRecord, RecipientTarget, SendAttempt};

use crate::ids::SessionId;

/// Mirrors spec §3 `Tenant Session`. Policy flags layer on top of `EngineConfig`
/// defaults (a session may tighten but never loosen `proxy_force`).
#[derive(Debug, Clone)]
pub struct TenantSession {
    pub id: SessionId,
    pub proxy_force: bool,
    pub leak_prevention: bool,
}

impl TenantSession {
    pub fn new(proxy_force: bool, leak_prevention: bool) -> Self {
        Self {
            id: SessionId::new(),
            proxy_force,
            leak_prevention,
        }
    }
}
