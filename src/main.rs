use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sqlwarden::{guard, AppConfig, Domain};

/// Read-only SQL execution and question answering over finance and
/// healthcare backends
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to <config dir>/sqlwarden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one read-only statement
    Exec {
        #[arg(long)]
        domain: Domain,
        /// pg, postgres, mysql, mongodb, ...
        #[arg(long)]
        dialect: Option<String>,
        /// Row cap; 0 disables it
        #[arg(long)]
        max_rows: Option<u64>,
        sql: String,
    },
    /// Answer a question with the configured generator
    Ask {
        /// Classified from the question when omitted
        #[arg(long)]
        domain: Option<Domain>,
        question: String,
    },
    /// Run the statement guard and intent check without a backend
    Check { question: String, sql: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let output = match cli.command {
        Command::Exec {
            domain,
            dialect,
            max_rows,
            sql,
        } => {
            let orchestrator = config.build(None)?;
            let dialect = dialect.unwrap_or_else(|| config.query.default_dialect.clone());
            let max_rows = max_rows.unwrap_or(config.query.max_rows);
            let result = orchestrator
                .execute_read_only(domain, &dialect, &sql, max_rows)
                .await;
            serde_json::to_value(&result)?
        }
        Command::Ask { domain, question } => {
            let orchestrator = config.build(None)?;
            let answer = match domain {
                Some(domain) => orchestrator.answer(domain, &question).await?,
                None => orchestrator.answer_auto(&question).await?,
            };
            serde_json::to_value(&answer)?
        }
        Command::Check { question, sql } => {
            let checker = config.intent_checker()?;
            let guard = guard::validate(&sql);
            let intent = checker.check(&question, &sql);
            json!({
                "safe": guard.is_ok(),
                "guard_error": guard.err().map(|e| e.to_string()),
                "intent": intent,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
