//! Account Selector (spec §4.4): chooses the next eligible SMTP account
//! honoring rate, warm-up, and an optional closed-loop health score.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::SmtpAccount;
use crate::rate::Governor;
use crate::store::Randomness;
use crate::warmup::WarmupController;
use std::sync::Arc;

/// Composite score weights (spec §4.4 step 3: `w1*ewma_success - w2*ewma_latency
/// - w3*consecutive_failures`).
#[derive(Debug, Clone, Copy)]
pub struct HealthWeights {
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            w1: 1.0,
            w2: 0.5,
            w3: 0.25,
        }
    }
}

pub struct AccountSelector<C: Clock, R: Randomness> {
    account_governor: Arc<Governor<C>>,
    domain_governor: Arc<Governor<C>>,
    warmup: Arc<WarmupController<C>>,
    randomness: Arc<R>,
    health_selection_enabled: bool,
    weights: HealthWeights,
}

impl<C: Clock, R: Randomness> AccountSelector<C, R> {
    pub fn new(
        account_governor: Arc<Governor<C>>,
        domain_governor: Arc<Governor<C>>,
        warmup: Arc<WarmupController<C>>,
        randomness: Arc<R>,
        health_selection_enabled: bool,
        weights: HealthWeights,
    ) -> Self {
        Self {
            account_governor,
            domain_governor,
            warmup,
            randomness,
            health_selection_enabled,
            weights,
        }
    }

    /// Filters `accounts` (spec §4.4 steps 1-2) and picks one (steps 3-4).
    /// Returns `None` when the eligible set is empty; the Orchestrator then
    /// increments `rate_limited` and retries later (step 5).
    pub async fn select<'a>(&self, accounts: &'a [SmtpAccount]) -> Option<&'a SmtpAccount> {
        let mut eligible = Vec::new();
        for account in accounts {
            if !account.is_eligible() {
                continue;
            }
            if !self.warmup.can_send(account.id).await {
                continue;
            }
            if !self.account_governor.has_capacity(&account.id.to_string()).await {
                continue;
            }
            if !self.domain_governor.has_capacity(account.domain()).await {
                continue;
            }
            eligible.push(account);
        }

        if eligible.is_empty() {
            return None;
        }

        if self.health_selection_enabled {
            eligible.sort_by(|a, b| {
                let sa = a.health_score.composite(self.weights.w1, self.weights.w2, self.weights.w3);
                let sb = b.health_score.composite(self.weights.w1, self.weights.w2, self.weights.w3);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            });
            eligible.into_iter().next()
        } else {
            let idx = self.randomness.random_index(eligible.len());
            Some(eligible[idx])
        }
    }

    /// Reserves a slot in both the per-account and per-sender-domain windows
    /// (spec §4.7 step 3 "acquire rate slots"). Blocks until both are free.
    pub async fn acquire(&self, account: &SmtpAccount) {
        self.account_governor.acquire(&account.id.to_string()).await;
        self.domain_governor.acquire(account.domain()).await;
    }

    /// Feedback hook (spec §4.4): updates the account's EWMAs after a send.
    pub fn adjust_score(account: &mut SmtpAccount, success: bool, response_time_ms: u32) {
        account.health_score.observe(success, response_time_ms);
    }

    pub fn per_account_limit_for(config: &EngineConfig) -> u32 {
        config.per_account_limit_per_minute()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;
    use crate::ids::SessionId;
    use crate::model::{AccountStatus, Credential, SmtpAccount};
    use crate::store::OsRandomness;
    use std::time::Duration;

    fn account(email: &str) -> SmtpAccount {
        let mut a = SmtpAccount::new(SessionId::new(), email, Credential::Password("x".into()));
        a.status = AccountStatus::Valid;
        a
    }

    #[tokio::test]
    async fn drops_ineligible_accounts_and_returns_none_when_empty() {
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let governor = Arc::new(Governor::new(100, Duration::from_secs(60), clock.clone()).unwrap());
        let domain_governor = Arc::new(Governor::new(100, Duration::from_secs(60), clock.clone()).unwrap());
        let warmup = Arc::new(WarmupController::new(clock.clone(), chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        let selector = AccountSelector::new(
            governor,
            domain_governor,
            warmup,
            Arc::new(OsRandomness),
            false,
            HealthWeights::default(),
        );

        let mut inactive = account("inactive@example.com");
        inactive.is_active = false;
        let accounts = vec![inactive];

        assert!(selector.select(&accounts).await.is_none());
    }

    #[tokio::test]
    async fn health_selection_prefers_best_score() {
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let governor = Arc::new(Governor::new(100, Duration::from_secs(60), clock.clone()).unwrap());
        let domain_governor = Arc::new(Governor::new(100, Duration::from_secs(60), clock.clone()).unwrap());
        let warmup = Arc::new(WarmupController::new(clock.clone(), chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        let selector = AccountSelector::new(
            governor,
            domain_governor,
            warmup,
            Arc::new(OsRandomness),
            true,
            HealthWeights::default(),
        );

        let mut good = account("good@example.com");
        good.health_score.observe(true, 10);
        let mut bad = account("bad@example.com");
        bad.health_score.observe(false, 5000);

        let accounts = vec![bad, good];
        let chosen = selector.select(&accounts).await.unwrap();
        assert_eq!(chosen.email, "good@example.com");
    }
}
