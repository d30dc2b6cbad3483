//! `probe-imap` (spec §6, §4.6): folder discovery, folder summary fetch, and
//! bulk raw dump against one IMAP account, printing JSON to stdout.

use clap::{Parser, Subcommand};
use sendforge::cli::{CliOutcome, Engine};
use sendforge::config::EngineConfig;
use sendforge::ids::{ImapAccountId, SessionId};
use sendforge::proxy::SelectStrategy;
use sendforge::store::AccountStore;
use sendforge::storefile::JsonFileStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "probe-imap")]
#[command(about = "Discover folders or fetch message summaries from an IMAP mailbox", version)]
struct Args {
    #[arg(long)]
    session: String,

    #[arg(long)]
    account: String,

    #[arg(long, default_value = "sendforge-store.json")]
    store: PathBuf,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the folder map, creating required system folders if requested.
    Discover {
        #[arg(long)]
        create_missing: bool,
    },
    /// Fetch up to `limit` most recent message summaries for one folder.
    Fetch {
        folder: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Dump up to `per_folder_limit` raw messages from every selectable folder.
    Dump {
        #[arg(long, default_value_t = 20)]
        per_folder_limit: usize,
    },
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
    let account_id = match ImapAccountId::from_str(&args.account) {
        Ok(id) => id,
        Err(e) => return Ok(CliOutcome::BadConfig(format!("invalid --account: {e}"))),
    };

    let store = Arc::new(JsonFileStore::open(&args.store).await?);
    let account = match store.get_imap_account(account_id).await? {
        Some(a) if a.session_id == session_id => a,
        _ => return Ok(CliOutcome::BadConfig(format!("no IMAP account {account_id} in session {session_id}"))),
    };

    let imap_proxy_force = engine_config.imap_proxy_force;
    let engine = Engine::assemble(engine_config, store);
    let timeout = Duration::from_secs(args.timeout_secs);

    let proxy = if imap_proxy_force {
        match engine.proxy_pool.get_working(session_id, SelectStrategy::Fastest).await {
            Ok(p) => Some(p),
            Err(_) => return Ok(CliOutcome::NoProxies),
        }
    } else {
        None
    };

    let json = match args.command {
        Command::Discover { create_missing } => {
            let report = engine.imap_prober.discover_folders(&account, proxy.as_ref(), create_missing, timeout).await?;
            serde_json::json!({
                "folders": report.folder_map.entries.iter().map(|e| &e.raw_name).collect::<Vec<_>>(),
                "created_folders": report.created_folders,
            })
        }
        Command::Fetch { folder, limit } => {
            let summaries = engine.imap_prober.fetch_folder_summaries(&account, proxy.as_ref(), &folder, limit, timeout).await?;
            serde_json::json!({ "folder": folder, "summaries": summaries })
        }
        Command::Dump { per_folder_limit } => {
            let dumped = engine.imap_prober.dump_all_folders(&account, proxy.as_ref(), per_folder_limit, timeout).await?;
            let entries: Vec<_> = dumped
                .into_iter()
                .map(|(folder, uid, raw)| serde_json::json!({ "folder": folder, "uid": uid, "bytes": raw.raw.len() }))
                .collect();
            serde_json::json!({ "messages": entries })
        }
    };

    println!("{}", serde_json::to_string(&json)?);
    Ok(CliOutcome::Success)
}
