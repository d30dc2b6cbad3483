//! `check-smtp` (spec §6, §4.9): a direct (non-proxied) connectivity and auth
//! check against one SMTP account, the same walk the mock pre-flight test
//! runs, printing JSON to stdout.

use clap::Parser;
use sendforge::cli::{CliOutcome, Engine};
use sendforge::config::EngineConfig;
use sendforge::error::EngineError;
use sendforge::ids::{SessionId, SmtpAccountId};
use sendforge::store::AccountStore;
use sendforge::storefile::JsonFileStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "check-smtp")]
#[command(about = "Check connectivity and authentication for one SMTP account", version)]
struct Args {
    #[arg(long)]
    session: String,

    #[arg(long)]
    account: String,

    #[arg(long, default_value = "sendforge-store.json")]
    store: PathBuf,

    #[arg(long)]
    timeout_secs: Option<u64>,
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
    let account_id = match SmtpAccountId::from_str(&args.account) {
        Ok(id) => id,
        Err(e) => return Ok(CliOutcome::BadConfig(format!("invalid --account: {e}"))),
    };

    let store = Arc::new(JsonFileStore::open(&args.store).await?);
    let account = match store.get_smtp_account(account_id).await? {
        Some(a) if a.session_id == session_id => a,
        _ => return Ok(CliOutcome::BadConfig(format!("no SMTP account {account_id} in session {session_id}"))),
    };

    let timeout = Duration::from_secs(args.timeout_secs.unwrap_or(engine_config.smtp_check_timeout.as_secs()));
    let engine = Engine::assemble(engine_config, store);

    match engine.dispatcher.check_connection(&account, timeout).await {
        Ok(()) => {
            println!("{}", serde_json::json!({ "account": account.email, "status": "ok" }));
            Ok(CliOutcome::Success)
        }
        Err(e) => {
            println!("{}", serde_json::json!({ "account": account.email, "status": "failed", "error": e.to_string() }));
            Ok(match e {
                EngineError::ProxyUnavailable => CliOutcome::NoProxies,
                EngineError::Auth { .. } | EngineError::Configuration(_) | EngineError::Policy(_) => {
                    CliOutcome::BadConfig(e.to_string())
                }
                _ => CliOutcome::Internal(e.to_string()),
            })
        }
    }
}
