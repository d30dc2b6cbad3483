//! Campaign Orchestrator (spec §4.7): pages recipients through a
//! `RecipientSource`, fans work out across `thread_count` workers bounded by
//! a semaphore, and drives each recipient through Selector -> Rate/Warmup ->
//! Dispatcher -> Retry, the way the teacher's `handler::session` loop drives
//! one inbound connection through its own state machine, just inverted to an
//! outbound fan-out.

pub mod jobcontrol;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ids::{ProxyId, SmtpAccountId};
use crate::model::{
    AttemptOutcome, Campaign, CampaignCounters, CampaignStatus, ProgressSnapshot, Proxy, RecipientTarget, SendAttempt,
    SmtpAccount, TenantSession,
};
use crate::proxy::{BlacklistOracle, ProxyPool, SelectStrategy};
use crate::retry::{self, RetryPolicy};
use crate::selector::AccountSelector;
use crate::smtp::{message, SmtpDispatcher};
use crate::store::{AccountStore, CampaignStore, ProxyStore, Randomness, RecipientSource};
use crate::warmup::WarmupController;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

/// Shared pause/stop switch the caller flips from outside the worker pool
/// (spec §4.7: pause suspends new sends in flight, stop drains and exits).
#[derive(Clone)]
pub struct CampaignControl {
    tx: Arc<watch::Sender<ControlSignal>>,
}

pub struct CampaignControlHandle {
    rx: watch::Receiver<ControlSignal>,
}

impl CampaignControl {
    pub fn new() -> (Self, CampaignControlHandle) {
        let (tx, rx) = watch::channel(ControlSignal::Run);
        (Self { tx: Arc::new(tx) }, CampaignControlHandle { rx })
    }

    pub fn pause(&self) {
        let _ = self.tx.send(ControlSignal::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(ControlSignal::Run);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(ControlSignal::Stop);
    }
}

impl CampaignControlHandle {
    fn signal(&self) -> ControlSignal {
        *self.rx.borrow()
    }

    async fn wait_while_paused(&mut self) {
        while self.signal() == ControlSignal::Pause {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Clone for CampaignControlHandle {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

#[derive(Default)]
struct AtomicCounters {
    sent: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    failovers: AtomicU64,
    oauth_errors: AtomicU64,
    proxy_errors: AtomicU64,
    smtp_errors: AtomicU64,
}

impl AtomicCounters {
    fn snapshot(&self) -> CampaignCounters {
        CampaignCounters {
            sent: self.sent.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            rate_limited: 0,
            opened: 0,
            clicked: 0,
            bounced: 0,
            oauth_errors: self.oauth_errors.load(Ordering::Relaxed),
            proxy_errors: self.proxy_errors.load(Ordering::Relaxed),
            smtp_errors: self.smtp_errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-recipient working set, cloned into each spawned task.
struct RunContext<C: Clock, R: Randomness, PS: ProxyStore + 'static, B: BlacklistOracle + 'static> {
    config: Arc<EngineConfig>,
    dispatcher: Arc<SmtpDispatcher>,
    selector: Arc<AccountSelector<C, R>>,
    warmup: Arc<WarmupController<C>>,
    proxy_pool: Arc<ProxyPool<PS, B>>,
    account_store: Arc<dyn AccountStore>,
    campaign_store: Arc<dyn CampaignStore>,
    randomness: Arc<R>,
    retry_policy: RetryPolicy,
    session: TenantSession,
    campaign_id: crate::ids::CampaignId,
    campaign_name: String,
    cc: Vec<String>,
    bcc: Vec<String>,
    sender: String,
    subject_pool: Vec<String>,
    template_pool: Vec<crate::model::MessageTemplate>,
    accounts: Arc<Mutex<Vec<SmtpAccount>>>,
    counters: Arc<AtomicCounters>,
}

/// Drives a campaign's recipient batches to completion (spec §4.7 steps 1-6).
pub struct Orchestrator<C: Clock, R: Randomness, PS: ProxyStore + 'static, B: BlacklistOracle + 'static> {
    pub config: Arc<EngineConfig>,
    pub dispatcher: Arc<SmtpDispatcher>,
    pub selector: Arc<AccountSelector<C, R>>,
    pub warmup: Arc<WarmupController<C>>,
    pub proxy_pool: Arc<ProxyPool<PS, B>>,
    pub account_store: Arc<dyn AccountStore>,
    pub campaign_store: Arc<dyn CampaignStore>,
    pub recipients: Arc<dyn RecipientSource>,
    pub randomness: Arc<R>,
    pub retry_policy: RetryPolicy,
}

impl<C: Clock, R: Randomness + 'static, PS: ProxyStore + 'static, B: BlacklistOracle + 'static> Orchestrator<C, R, PS, B> {
    /// Runs `campaign` to completion (or until `control` signals stop),
    /// persisting progress and returning the final snapshot.
    pub async fn run(
        &self,
        campaign: &mut Campaign,
        accounts: Vec<SmtpAccount>,
        session: TenantSession,
        mut control: CampaignControlHandle,
    ) -> Result<ProgressSnapshot, EngineError> {
        jobcontrol::transition(campaign, CampaignStatus::Running)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let ctx = Arc::new(RunContext {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
            selector: self.selector.clone(),
            warmup: self.warmup.clone(),
            proxy_pool: self.proxy_pool.clone(),
            account_store: self.account_store.clone(),
            campaign_store: self.campaign_store.clone(),
            randomness: self.randomness.clone(),
            retry_policy: self.retry_policy,
            session,
            campaign_id: campaign.id,
            campaign_name: campaign.config.campaign_name.clone(),
            cc: campaign.config.cc.clone(),
            bcc: campaign.config.bcc.clone(),
            sender: campaign.config.sender.clone(),
            subject_pool: campaign.config.subject_pool.clone(),
            template_pool: campaign.config.template_pool.clone(),
            accounts: Arc::new(Mutex::new(accounts)),
            counters: Arc::new(AtomicCounters::default()),
        });

        let semaphore = Arc::new(Semaphore::new(campaign.config.thread_count.max(1)));
        let batch_size = campaign.config.batch_size.max(1);
        let delay_between_batches = campaign.config.delay_between_batches;
        let retry_limit = campaign.config.retry_limit;

        let mut offset = 0usize;
        let mut handles = Vec::new();
        let mut total: u64 = 0;
        let mut stopped = false;

        loop {
            control.wait_while_paused().await;
            if control.signal() == ControlSignal::Stop {
                stopped = true;
                break;
            }

            let batch = self
                .recipients
                .next_batch(offset, batch_size)
                .await
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            total += batch.len() as u64;

            for recipient in batch {
                if control.signal() == ControlSignal::Stop {
                    stopped = true;
                    break;
                }
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let ctx = ctx.clone();
                let retry_limit = retry_limit;
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    send_with_retry(&ctx, recipient, retry_limit).await;
                });
                handles.push(handle);
            }
            if stopped {
                break;
            }

            if !delay_between_batches.is_zero() {
                tokio::time::sleep(delay_between_batches).await;
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        campaign.counters = ctx.counters.snapshot();
        let final_status = if stopped { CampaignStatus::Stopped } else { CampaignStatus::Completed };
        jobcontrol::transition(campaign, final_status).map_err(|e| EngineError::Internal(e.to_string()))?;
        self.campaign_store
            .update_campaign(campaign)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let sent = ctx.counters.sent.load(Ordering::Relaxed);
        let elapsed_secs = campaign
            .started_at
            .map(|s| (chrono::Utc::now() - s).num_milliseconds().max(1) as f64 / 1000.0)
            .unwrap_or(1.0);
        let rate_per_second = sent as f64 / elapsed_secs;
        let remaining = total.saturating_sub(sent);
        let estimated_completion_secs = if rate_per_second > 0.0 {
            Some(remaining as f64 / rate_per_second)
        } else {
            None
        };

        Ok(ProgressSnapshot {
            sent,
            total,
            rate_per_second,
            estimated_completion_secs,
            status: campaign.status,
        })
    }
}

/// One recipient's full failover walk (spec §4.8): selects an account/proxy
/// pair, sends, and on a retryable failure rotates to the next untried pair
/// with exponential backoff, until `retry_limit` is exhausted.
async fn send_with_retry<C: Clock, R: Randomness, PS: ProxyStore + 'static, B: BlacklistOracle + 'static>(
    ctx: &RunContext<C, R, PS, B>,
    recipient: RecipientTarget,
    retry_limit: u32,
) {
    let mut tried: HashSet<(SmtpAccountId, Option<ProxyId>)> = HashSet::new();
    let mut attempts = Vec::new();

    for attempt_number in 1..=retry_limit.max(1) {
        let account = {
            let accounts = ctx.accounts.lock().await;
            match ctx.selector.select(&accounts).await {
                Some(a) => a.clone(),
                None => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            }
        };

        if tried.iter().any(|(acct, _)| *acct == account.id) && attempt_number > 1 {
            ctx.counters.failovers.fetch_add(1, Ordering::Relaxed);
        }

        let proxy: Option<Proxy> = if ctx.session.leak_prevention || ctx.session.proxy_force {
            match ctx.proxy_pool.get_working(ctx.session.id, SelectStrategy::Fastest).await {
                Ok(p) => Some(p),
                Err(_) => {
                    ctx.counters.proxy_errors.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(retry::backoff_delay(attempt_number, &ctx.retry_policy, ctx.randomness.as_ref())).await;
                    continue;
                }
            }
        } else {
            None
        };

        let pair = (account.id, proxy.as_ref().map(|p| p.id));
        if tried.contains(&pair) {
            continue;
        }
        tried.insert(pair);

        ctx.selector.acquire(&account).await;

        let mut send_attempt = SendAttempt::start(ctx.campaign_id, recipient.email.clone(), account.id, proxy.as_ref().map(|p| p.id));

        let subject_idx = ctx.randomness.random_index(ctx.subject_pool.len().max(1));
        let subject = ctx.subject_pool.get(subject_idx).cloned().unwrap_or_default();
        let template_idx = ctx.randomness.random_index(ctx.template_pool.len().max(1));
        let template = ctx.template_pool.get(template_idx).cloned().unwrap_or_default();

        let campaign_config = crate::model::CampaignConfig {
            subject_pool: vec![subject.clone()],
            template_pool: vec![template.clone()],
            batch_size: 1,
            delay_between_batches: Duration::ZERO,
            thread_count: 1,
            retry_limit,
            sender: ctx.sender.clone(),
            cc: ctx.cc.clone(),
            bcc: ctx.bcc.clone(),
            explicit_proxy: None,
            redirect_domains: Vec::new(),
            campaign_name: ctx.campaign_name.clone(),
        };

        let prepared = match message::prepare(
            &ctx.config,
            &campaign_config,
            &template,
            &subject,
            &recipient,
            None,
            None,
            ctx.randomness.as_ref(),
        ) {
            Ok(p) => p,
            Err(e) => {
                send_attempt.finish(AttemptOutcome::Failed, Some(e.to_string()));
                attempts.push(send_attempt);
                break;
            }
        };

        let send_result = ctx.dispatcher.send(&account, proxy.as_ref(), &recipient.email, &prepared, &ctx.config).await;

        match send_result {
            Ok(outcome) => {
                send_attempt.finish(AttemptOutcome::Success, None);
                attempts.push(send_attempt);
                ctx.counters.sent.fetch_add(1, Ordering::Relaxed);
                ctx.counters.success.fetch_add(1, Ordering::Relaxed);
                update_account(ctx, account.id, true, outcome.response_time_ms).await;
                let _ = ctx.campaign_store.append_send_attempt(attempts.last().unwrap()).await;
                return;
            }
            Err(e) => {
                let retryable = e.is_retryable();
                if matches!(e, EngineError::Auth { .. }) {
                    ctx.counters.oauth_errors.fetch_add(1, Ordering::Relaxed);
                }
                if matches!(e, EngineError::Network(_)) {
                    ctx.counters.smtp_errors.fetch_add(1, Ordering::Relaxed);
                }
                send_attempt.finish(AttemptOutcome::Failed, Some(e.to_string()));
                let _ = ctx.campaign_store.append_send_attempt(&send_attempt).await;
                attempts.push(send_attempt);
                update_account(ctx, account.id, false, 0).await;

                if !retryable || attempt_number == retry_limit.max(1) {
                    break;
                }
                ctx.counters.retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(retry::backoff_delay(attempt_number, &ctx.retry_policy, ctx.randomness.as_ref())).await;
            }
        }
    }

    ctx.counters.sent.fetch_add(1, Ordering::Relaxed);
    ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
    let dead_letter = retry::build_dead_letter(ctx.campaign_id, recipient.email.clone(), attempts);
    let _ = ctx.campaign_store.append_dead_letter(&dead_letter).await;
}

async fn update_account<C: Clock, R: Randomness, PS: ProxyStore + 'static, B: BlacklistOracle + 'static>(
    ctx: &RunContext<C, R, PS, B>,
    account_id: SmtpAccountId,
    success: bool,
    response_time_ms: u32,
) {
    ctx.warmup.on_send(account_id).await;
    let mut accounts = ctx.accounts.lock().await;
    if let Some(account) = accounts.iter_mut().find(|a| a.id == account_id) {
        AccountSelector::<C, R>::adjust_score(account, success, response_time_ms);
        let _ = ctx.account_store.update_smtp_account(account).await;
    }
}
