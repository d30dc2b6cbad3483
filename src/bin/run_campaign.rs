//! `run-campaign` (spec §6): drives one campaign to completion against
//! accounts and proxies already seeded into a `JsonFileStore`, printing JSON
//! progress to stdout.

use clap::Parser;
use sendforge::campaign::{jobcontrol, CampaignControl, Orchestrator};
use sendforge::cli::{CliOutcome, Engine};
use sendforge::clock::SystemClock;
use sendforge::config::EngineConfig;
use sendforge::ids::SessionId;
use sendforge::model::{Campaign, CampaignConfig, CampaignStatus, RecipientTarget, TenantSession};
use sendforge::proxy::NullBlacklistOracle;
use sendforge::retry::RetryPolicy;
use sendforge::store::{AccountStore, ProxyStore};
use sendforge::storefile::JsonFileStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "run-campaign")]
#[command(about = "Dispatch one email campaign to completion", version)]
struct Args {
    /// Tenant session whose accounts and proxies this campaign uses.
    #[arg(long)]
    session: String,

    /// JSON document backing accounts, proxies, and campaign/attempt records.
    #[arg(long, default_value = "sendforge-store.json")]
    store: PathBuf,

    /// Campaign settings, in the shape of `CampaignConfig`.
    #[arg(long)]
    campaign: PathBuf,

    /// Recipient list, a JSON array of `RecipientTarget`.
    #[arg(long)]
    recipients: PathBuf,

    /// Require a proxy for every send regardless of the session default.
    #[arg(long)]
    proxy_force: bool,

    /// Validate the campaign (and connect to the first eligible account)
    /// without sending anything (spec §4.9 "Mock test run").
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let engine_config = EngineConfig::from_env();
    sendforge::config::init_tracing(engine_config.log_format);

    let outcome = run(args, engine_config).await.unwrap_or_else(|e| CliOutcome::Internal(e.to_string()));
    outcome.report();
    ExitCode::from(outcome.exit_code() as u8)
}

async fn run(args: Args, engine_config: EngineConfig) -> anyhow::Result<CliOutcome> {
    let session_id = match SessionId::from_str(&args.session) {
        Ok(id) => id,
        Err(e) => return Ok(CliOutcome::BadConfig(format!("invalid --session: {e}"))),
    };

    let campaign_config: CampaignConfig = serde_json::from_str(&tokio::fs::read_to_string(&args.campaign).await?)?;
    let recipients: Vec<RecipientTarget> = serde_json::from_str(&tokio::fs::read_to_string(&args.recipients).await?)?;

    let store = Arc::new(JsonFileStore::open(&args.store).await?);
    store.seed_recipients(recipients).await?;

    let session = TenantSession {
        id: session_id,
        proxy_force: engine_config.smtp_proxy_force || args.proxy_force,
        leak_prevention: engine_config.proxy_ip_leak_prevention,
    };

    let accounts = store.list_smtp_accounts(session.id).await?;
    if !accounts.iter().any(|a| a.is_eligible()) {
        return Ok(CliOutcome::NoAccounts);
    }

    if session.proxy_force {
        let proxies = store.list_proxies(session.id).await?;
        if !proxies.iter().any(|p| p.is_usable()) && engine_config.proxy_fallback_disabled {
            return Ok(CliOutcome::NoProxies);
        }
    }

    let engine = Engine::assemble(engine_config, store.clone());

    if args.mock {
        let errors = jobcontrol::run_mock_test(
            &engine.config,
            &campaign_config,
            &accounts,
            store.as_ref(),
            &session,
            engine.randomness.as_ref(),
            &engine.dispatcher,
        )
        .await;
        return Ok(if errors.is_empty() {
            println!("{}", serde_json::json!({ "mock_test": "passed" }));
            CliOutcome::Success
        } else {
            let joined = errors.into_iter().map(|e| format!("{}: {}", e.step.key(), e.message)).collect::<Vec<_>>().join("; ");
            CliOutcome::BadConfig(joined)
        });
    }

    let preflight_errors = jobcontrol::run_preflight(&campaign_config, &accounts, store.as_ref(), &session, engine.randomness.as_ref()).await;
    if !preflight_errors.is_empty() {
        let joined = preflight_errors.into_iter().map(|e| format!("{}: {}", e.step.key(), e.message)).collect::<Vec<_>>().join("; ");
        return Ok(CliOutcome::BadConfig(joined));
    }

    let account_ids = accounts.iter().map(|a| a.id).collect();
    let mut campaign = Campaign::new(session.id, campaign_config, account_ids);

    let (control, handle) = CampaignControl::new();
    let sigint_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            sigint_control.stop();
        }
    });

    let orchestrator: Orchestrator<SystemClock, _, JsonFileStore, NullBlacklistOracle> = Orchestrator {
        config: engine.config.clone(),
        dispatcher: engine.dispatcher.clone(),
        selector: engine.selector.clone(),
        warmup: engine.warmup.clone(),
        proxy_pool: engine.proxy_pool.clone(),
        account_store: store.clone(),
        campaign_store: store.clone(),
        recipients: store.clone(),
        randomness: engine.randomness.clone(),
        retry_policy: RetryPolicy::default(),
    };

    let snapshot = orchestrator.run(&mut campaign, accounts, session, handle).await?;
    println!("{}", serde_json::to_string(&snapshot)?);

    Ok(match snapshot.status {
        CampaignStatus::Stopped => CliOutcome::Cancelled,
        _ => CliOutcome::Success,
    })
}
