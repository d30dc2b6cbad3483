//! Retry & Dead-Letter (spec §4.8): bounded-attempt failover rotation,
//! exponential backoff with jitter, and dead-letter persistence. Shared by the
//! Campaign Orchestrator's worker loop so both paths see the same pair
//! rotation and backoff schedule.

use crate::ids::{CampaignId, ProxyId, SmtpAccountId};
use crate::model::{DeadLetterRecord, SendAttempt};
use crate::store::Randomness;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_limit: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// All (account, proxy) combinations in a stable order, `proxies` containing a
/// single `None` when leak-prevention is off and no proxy applies.
pub fn candidate_pairs(accounts: &[SmtpAccountId], proxies: &[Option<ProxyId>]) -> Vec<(SmtpAccountId, Option<ProxyId>)> {
    accounts.iter().flat_map(|a| proxies.iter().map(move |p| (*a, *p))).collect()
}

/// Next pair not already in `tried` (spec: "Cartesian product excluding combos
/// already tried"), in Cartesian order so repeated calls are deterministic.
pub fn next_pair(
    accounts: &[SmtpAccountId],
    proxies: &[Option<ProxyId>],
    tried: &HashSet<(SmtpAccountId, Option<ProxyId>)>,
) -> Option<(SmtpAccountId, Option<ProxyId>)> {
    candidate_pairs(accounts, proxies).into_iter().find(|pair| !tried.contains(pair))
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)`, capped, plus up to
/// 25% jitter to avoid synchronized retries across workers.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy, randomness: &dyn Randomness) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let scaled = policy.backoff_base.as_millis().saturating_mul(1u128 << exponent);
    let capped = scaled.min(policy.backoff_cap.as_millis()) as u64;
    let jitter_bound = (capped / 4).max(1) as u32;
    let jitter = u64::from(randomness.random_u32(0..jitter_bound));
    Duration::from_millis(capped.saturating_add(jitter))
}

/// Builds the persisted record once `attempts` exhausts `retry_limit` (spec:
/// "append a Dead-Letter Record containing all attempt errors, timestamps,
/// and chosen pairs").
pub fn build_dead_letter(campaign_id: CampaignId, recipient_email: impl Into<String>, attempts: Vec<SendAttempt>) -> DeadLetterRecord {
    let final_error = attempts
        .last()
        .and_then(|a| a.error_text.clone())
        .unwrap_or_else(|| "retries exhausted".to_string());
    DeadLetterRecord {
        campaign_id,
        recipient_email: recipient_email.into(),
        attempts,
        final_error,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::OsRandomness;

    #[test]
    fn next_pair_skips_tried_combinations() {
        let accounts = vec![SmtpAccountId::new(), SmtpAccountId::new()];
        let proxies = vec![Some(ProxyId::new()), None];
        let all = candidate_pairs(&accounts, &proxies);

        let mut tried = HashSet::new();
        tried.insert(all[0]);

        let next = next_pair(&accounts, &proxies, &tried).unwrap();
        assert_eq!(next, all[1]);
    }

    #[test]
    fn next_pair_none_when_all_tried() {
        let accounts = vec![SmtpAccountId::new()];
        let proxies = vec![None];
        let all = candidate_pairs(&accounts, &proxies);
        let tried: HashSet<_> = all.into_iter().collect();
        assert!(next_pair(&accounts, &proxies, &tried).is_none());
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let policy = RetryPolicy {
            retry_limit: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(4),
        };
        let d1 = backoff_delay(1, &policy, &OsRandomness);
        let d3 = backoff_delay(3, &policy, &OsRandomness);
        assert!(d1 >= Duration::from_millis(1000));
        assert!(d3 <= Duration::from_millis(4 * 1000 + 1000));
    }
}
