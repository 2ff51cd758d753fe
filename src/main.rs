//! Bank Ledger operator CLI
//!
//! ```text
//! bank_ledger [-e <env>] migrate
//! bank_ledger [-e <env>] create-account <owner> <balance> <currency>
//! bank_ledger [-e <env>] account <id>
//! bank_ledger [-e <env>] transfer <from> <to> <amount>
//! bank_ledger [-e <env>] entries <account-id>
//! ```
//!
//! Results are printed to stdout as JSON.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::models::{CreateAccountParams, TransferRequest};
use bank_ledger::store::Store;
use bank_ledger::transfer::TransferExecutor;

const USAGE: &str = "usage: bank_ledger [-e <env>] \
    <migrate | create-account <owner> <balance> <currency> | account <id> \
    | transfer <from> <to> <amount> | entries <account-id>>";

/// Split `--env`/`-e` off the argument list; default env is `dev`
fn parse_args(args: &[String]) -> (String, Vec<String>) {
    let mut env = "dev".to_string();
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            env = args[i + 1].clone();
            i += 2;
        } else {
            rest.push(args[i].clone());
            i += 1;
        }
    }
    (env, rest)
}

fn arg<T: std::str::FromStr>(rest: &[String], idx: usize, name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = rest
        .get(idx)
        .with_context(|| format!("missing <{name}>\n{USAGE}"))?;
    raw.parse()
        .with_context(|| format!("invalid <{name}>: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (env, rest) = parse_args(&args);

    let app_config = AppConfig::load(&env)?;
    let _log_guard = bank_ledger::logging::init_logging(&app_config);
    tracing::info!("Starting bank_ledger in {} mode", env);

    let Some(command) = rest.first() else {
        bail!("{USAGE}");
    };

    let db = Database::connect(&app_config.database_url()?, &app_config.pool).await?;
    let store = Arc::new(db.store());

    match command.as_str() {
        "migrate" => {
            db.migrate().await?;
        }
        "create-account" => {
            let params = CreateAccountParams {
                owner: arg(&rest, 1, "owner")?,
                balance: arg(&rest, 2, "balance")?,
                currency: arg(&rest, 3, "currency")?,
            };
            print_json(&store.create_account(params).await?)?;
        }
        "account" => {
            let id = arg(&rest, 1, "id")?;
            print_json(&store.get_account(id).await?)?;
        }
        "transfer" => {
            let req = TransferRequest::new(
                arg(&rest, 1, "from")?,
                arg(&rest, 2, "to")?,
                arg(&rest, 3, "amount")?,
            );
            let executor = TransferExecutor::new(store, app_config.transfer.clone());
            match executor.transfer_tx(req).await {
                Ok(result) => print_json(&result)?,
                Err(e) => {
                    tracing::warn!(code = e.code(), retryable = e.is_retryable(), "Transfer failed");
                    bail!("{} ({})", e, e.code());
                }
            }
        }
        "entries" => {
            let id = arg(&rest, 1, "account-id")?;
            print_json(&store.list_entries(id, 100, 0).await?)?;
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }

    Ok(())
}
