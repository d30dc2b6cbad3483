//! Job Control & Mock Pre-flight (spec §4.9, and the "Start preconditions"
//! list in §4.7): campaign state transitions and the validate-without-sending
//! pre-flight walk.

use crate::config::EngineConfig;
use crate::model::{Campaign, CampaignConfig, CampaignStatus, RecipientTarget, SmtpAccount, TenantSession};
use crate::smtp::{message, SmtpDispatcher};
use crate::store::{ProxyStore, Randomness};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightStep {
    CampaignSettings,
    Template,
    Smtp,
    Proxy,
    RedirectDomains,
    RandomHtml,
}

impl PreflightStep {
    pub fn key(self) -> &'static str {
        match self {
            PreflightStep::CampaignSettings => "campaign_settings",
            PreflightStep::Template => "template",
            PreflightStep::Smtp => "smtp",
            PreflightStep::Proxy => "proxy",
            PreflightStep::RedirectDomains => "redirect_domains",
            PreflightStep::RandomHtml => "random_html",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreflightError {
    pub step: PreflightStep,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot transition campaign from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
}

/// Enforces invariant 7 ("a campaign never leaves a terminal state back to
/// running") and stamps `started_at`/`completed_at`.
pub fn transition(campaign: &mut Campaign, next: CampaignStatus) -> Result<(), TransitionError> {
    if !campaign.status.can_transition_to(next) {
        return Err(TransitionError { from: campaign.status, to: next });
    }
    campaign.status = next;
    match next {
        CampaignStatus::Running if campaign.started_at.is_none() => campaign.started_at = Some(chrono::Utc::now()),
        CampaignStatus::Completed | CampaignStatus::Stopped | CampaignStatus::Failed => {
            campaign.completed_at = Some(chrono::Utc::now());
        }
        _ => {}
    }
    Ok(())
}

/// Runs the §4.7 "Start preconditions" checks without sending anything
/// (shared by both the real pre-flight gate and the mock test run).
pub async fn run_preflight(
    campaign_config: &CampaignConfig,
    accounts: &[SmtpAccount],
    proxy_store: &dyn ProxyStore,
    session: &TenantSession,
    randomness: &dyn Randomness,
) -> Vec<PreflightError> {
    let mut errors = Vec::new();

    if !accounts.iter().any(|a| a.is_eligible()) {
        errors.push(PreflightError {
            step: PreflightStep::CampaignSettings,
            message: "no checked SMTP account exists for this session".into(),
        });
    }

    if session.proxy_force {
        match proxy_store.list_proxies(session.id).await {
            Ok(proxies) if proxies.iter().any(|p| p.is_usable()) => {}
            Ok(_) => errors.push(PreflightError {
                step: PreflightStep::Proxy,
                message: "proxy_force is set but no valid proxy exists".into(),
            }),
            Err(e) => errors.push(PreflightError { step: PreflightStep::Proxy, message: e.to_string() }),
        }
    }

    let dummy_recipient = RecipientTarget::new("preflight@example.com");
    for subject in &campaign_config.subject_pool {
        check_macros(PreflightStep::Template, subject, &dummy_recipient, campaign_config, randomness, &mut errors);
    }
    for template in &campaign_config.template_pool {
        if let Some(html) = &template.html {
            check_macros(PreflightStep::Template, html, &dummy_recipient, campaign_config, randomness, &mut errors);
        }
        if let Some(text) = &template.text {
            check_macros(PreflightStep::Template, text, &dummy_recipient, campaign_config, randomness, &mut errors);
        }
    }

    if let Some((host, port)) = &campaign_config.explicit_proxy {
        let reach = tokio::time::timeout(Duration::from_secs(5), tokio::net::TcpStream::connect((host.as_str(), *port))).await;
        if !matches!(reach, Ok(Ok(_))) {
            errors.push(PreflightError {
                step: PreflightStep::Proxy,
                message: format!("configured proxy {host}:{port} unreachable within 5s"),
            });
        }
    }

    for domain in &campaign_config.redirect_domains {
        let resolves = tokio::net::lookup_host((domain.as_str(), 0)).await.map(|mut it| it.next().is_some()).unwrap_or(false);
        if !resolves {
            errors.push(PreflightError {
                step: PreflightStep::RedirectDomains,
                message: format!("redirect domain {domain} does not resolve"),
            });
        }
    }

    errors
}

fn check_macros(
    step: PreflightStep,
    template: &str,
    recipient: &RecipientTarget,
    campaign_config: &CampaignConfig,
    randomness: &dyn Randomness,
    errors: &mut Vec<PreflightError>,
) {
    let rendered = message::substitute_macros(template, recipient, &campaign_config.campaign_name, randomness);
    let unresolved = message::unresolved_macros(&rendered);
    if !unresolved.is_empty() {
        errors.push(PreflightError { step, message: format!("unresolved macros: {}", unresolved.join(", ")) });
    }
}

/// Mock test run (spec §4.9): pre-flight plus a direct SMTP connectivity
/// check against the first account, no message sent.
pub async fn run_mock_test(
    config: &EngineConfig,
    campaign_config: &CampaignConfig,
    accounts: &[SmtpAccount],
    proxy_store: &dyn ProxyStore,
    session: &TenantSession,
    randomness: &dyn Randomness,
    dispatcher: &SmtpDispatcher,
) -> Vec<PreflightError> {
    let mut errors = run_preflight(campaign_config, accounts, proxy_store, session, randomness).await;

    if let Some(account) = accounts.iter().find(|a| a.is_eligible()) {
        if let Err(e) = dispatcher.check_connection(account, config.smtp_check_timeout).await {
            errors.push(PreflightError { step: PreflightStep::Smtp, message: e.to_string() });
        }
    }

    errors
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::SessionId;

    #[test]
    fn transition_rejects_terminal_to_running() {
        let mut campaign = Campaign::new(SessionId::new(), CampaignConfig::default(), vec![]);
        campaign.status = CampaignStatus::Completed;
        assert!(transition(&mut campaign, CampaignStatus::Running).is_err());
    }

    #[test]
    fn transition_stamps_started_at_on_first_run() {
        let mut campaign = Campaign::new(SessionId::new(), CampaignConfig::default(), vec![]);
        assert!(campaign.started_at.is_none());
        transition(&mut campaign, CampaignStatus::Running).unwrap();
        assert!(campaign.started_at.is_some());
    }
}
