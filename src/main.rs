use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use pgtyped::db::{self, ConnectionConfig, WireSession};
use pgtyped::infer::{infer_all, InferError, QueryTypes};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Infer parameter and result types of SQL queries from a live PostgreSQL server
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Describe queries and print their types as JSON
    Describe(DescribeArgs),
}

#[derive(Args)]
struct DescribeArgs {
    /// Use a saved connection by name
    #[arg(long = "connect", conflicts_with = "url")]
    connect: Option<String>,

    /// Connection URL or key=value connection string
    #[arg(long)]
    url: Option<String>,

    /// SQL file to run before describing (schema, types, comments)
    #[arg(long)]
    migrations: Option<PathBuf>,

    /// Save the connection under this name once connected
    #[arg(long = "save-as")]
    save_as: Option<String>,

    /// Fail instead of prompting when no password is known
    #[arg(long = "no-password")]
    no_password: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Queries to describe; `-` reads one query from stdin
    #[arg(required = true)]
    queries: Vec<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Described {
    Types { query: String, types: QueryTypes<()> },
    Error { query: String, error: serde_json::Value },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Describe(args) => {
            if !describe(args).await? {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Returns whether every query was inferred.
async fn describe(args: DescribeArgs) -> Result<bool> {
    let queries = read_queries(&args.queries)?;
    let config = resolve_config(&args)?;

    let mut session = WireSession::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.display_string()))?;

    if let Some(name) = &args.save_as {
        let saved = ConnectionConfig {
            name: name.clone(),
            ..config.clone()
        };
        db::save_connection(&saved).context("Failed to save connection")?;
    }

    if let Some(path) = &args.migrations {
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        session
            .execute(&sql)
            .await
            .with_context(|| format!("Failed to apply {}", path.display()))?;
    }

    let batch = queries.iter().map(|q| (q.clone(), ())).collect();
    let results = infer_all(batch, &mut session)
        .await
        .context("Connection lost during inference")?;

    if let Err(err) = session.close().await {
        warn!("closing session: {}", err);
    }

    let mut all_ok = true;
    let described: Vec<Described> = queries
        .into_iter()
        .zip(results)
        .map(|(query, result)| match result {
            Ok(types) => Described::Types { query, types },
            Err(err) => {
                all_ok = false;
                Described::Error {
                    query,
                    error: error_json(&err),
                }
            }
        })
        .collect();

    let output = if args.pretty {
        serde_json::to_string_pretty(&described)?
    } else {
        serde_json::to_string(&described)?
    };
    println!("{}", output);
    Ok(all_ok)
}

fn error_json(err: &InferError) -> serde_json::Value {
    match err {
        InferError::Parse(parse) => serde_json::to_value(parse)
            .unwrap_or_else(|_| serde_json::json!({ "message": parse.message })),
        other => serde_json::json!({ "message": other.to_string() }),
    }
}

fn read_queries(args: &[String]) -> Result<Vec<String>> {
    args.iter()
        .map(|query| {
            if query == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read query from stdin")?;
                Ok(buf.trim().to_string())
            } else {
                Ok(query.clone())
            }
        })
        .collect()
}

fn resolve_config(args: &DescribeArgs) -> Result<ConnectionConfig> {
    let mut config = if let Some(url) = &args.url {
        ConnectionConfig::from_url(url)?
    } else if let Some(name) = &args.connect {
        match db::find_saved_connection(name)? {
            Some(config) => config,
            None => {
                let saved: Vec<String> = db::load_saved_connections()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| format!("  - {}", c.name))
                    .collect();
                return Err(anyhow!(
                    "no saved connection named {:?}\nSaved connections:\n{}",
                    name,
                    saved.join("\n")
                ));
            }
        }
    } else {
        ConnectionConfig::default()
    };

    // Resolve password: PGPASSWORD env var, then interactive prompt
    if config.password.is_empty() {
        if let Ok(pw) = std::env::var("PGPASSWORD") {
            config.password = pw;
        } else if !args.no_password {
            let prompt = format!("Password for {}: ", config.display_string());
            config.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    Ok(config)
}
