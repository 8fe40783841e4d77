//! qail-etl: compile and run declarative transforms
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL for a request (no database needed)
//! qail-etl compile request.json --dialect mysql
//!
//! # Run one page against a configured connection
//! qail-etl run request.json --user u1
//!
//! # Preview through the in-process pipeline
//! qail-etl preview request.json --user u1
//!
//! # Export every row to CSV (Ctrl-C cancels)
//! qail-etl export request.json --user u1 -o sales.csv
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use qail_etl::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qail-etl")]
#[command(version)]
#[command(about = "Declarative ETL compiler and streaming executor", long_about = None)]
#[command(after_help = "EXAMPLES:
    qail-etl compile request.json --dialect mysql
    qail-etl run request.json --user u1 --format json
    qail-etl export request.json --user u1 -o sales.csv")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
struct RequestArgs {
    /// Request JSON file, `-` for stdin
    spec: String,

    /// Configuration file (limits and connections)
    #[arg(long, env = "QAIL_ETL_CONFIG")]
    config: Option<PathBuf>,

    /// Caller user id
    #[arg(long, env = "QAIL_ETL_USER")]
    user: Option<String>,

    /// Caller role
    #[arg(long, env = "QAIL_ETL_ROLE", default_value = "analyst")]
    role: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated SQL and parameters
    Compile {
        /// Request JSON file, `-` for stdin
        spec: String,

        #[arg(short, long, default_value = "postgres")]
        dialect: Dialect,
    },
    /// Run one page of the transform
    Run {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Run the preview pipeline over fetched rows
    Preview {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Export every matching row as CSV
    Export {
        #[command(flatten)]
        request: RequestArgs,

        /// Output file (defaults to `<table>_export.csv`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Compile { spec, dialect } => compile(&spec, dialect),
        Commands::Run { request, format } => {
            let (service, principal, spec) = prepare(&request)?;
            let response = service.execute(principal.as_ref(), &spec).await;
            print_response(&response, &format)
        }
        Commands::Preview { request, format } => {
            let (service, principal, spec) = prepare(&request)?;
            let response = service.preview(principal.as_ref(), &spec).await;
            print_response(&response, &format)
        }
        Commands::Export { request, output } => {
            let (service, principal, spec) = prepare(&request)?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("{}", "Cancelling export...".yellow());
                    on_interrupt.cancel();
                }
            });

            let payload = service.export(principal.as_ref(), &spec, cancel).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&payload.filename));
            std::fs::write(&path, &payload.bytes).with_context(|| format!("writing {}", path.display()))?;
            println!(
                "{} Wrote {} bytes to {}",
                "✓".green(),
                payload.bytes.len(),
                path.display().to_string().cyan()
            );
            Ok(())
        }
    }
}

fn read_spec(path: &str) -> Result<TransformSpec> {
    let content = if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?
    };
    serde_json::from_str(&content).context("invalid request JSON")
}

fn compile(path: &str, dialect: Dialect) -> Result<()> {
    let plan = read_spec(path)?.to_plan_with_dialect(dialect)?;

    println!("{}", "Generated SQL:".green().bold());
    println!("{}", plan.sql.white());
    print_params(&plan.params, dialect);

    if let Some(count_sql) = &plan.count_sql {
        println!();
        println!("{}", "Count SQL:".green().bold());
        println!("{}", count_sql.white());
        print_params(&plan.count_params, dialect);
    }
    Ok(())
}

fn print_params(params: &[Value], dialect: Dialect) {
    if params.is_empty() {
        return;
    }
    println!();
    println!("{}", "Bindings:".cyan());
    for (placeholder, value) in bindings(params, dialect) {
        println!("  {} = {}", placeholder, value.yellow());
    }
}

/// `(placeholder, value)` pairs in the dialect's placeholder style.
fn bindings(params: &[Value], dialect: Dialect) -> Vec<(String, String)> {
    let generator = dialect.generator();
    params
        .iter()
        .enumerate()
        .map(|(i, value)| (generator.placeholder(i + 1), value.to_string()))
        .collect()
}

fn prepare(request: &RequestArgs) -> Result<(EtlService<ConfigResolver, SqlxConnector>, Option<Principal>, TransformSpec)> {
    let config = match &request.config {
        Some(path) => EtlConfig::load(path)?,
        None => EtlConfig::discover()?,
    };
    let connector = SqlxConnector::new(config.limits.timeouts());
    let service = EtlService::new(config.resolver(), connector).with_limits(config.limits.clone());
    let principal = request
        .user
        .as_ref()
        .map(|user| Principal::new(user.clone(), request.role.clone()));
    Ok((service, principal, read_spec(&request.spec)?))
}

fn print_response(response: &TransformResponse, format: &OutputFormat) -> Result<()> {
    if !response.ok {
        anyhow::bail!(
            "{} ({})",
            response.error.as_deref().unwrap_or("request failed"),
            response.status
        );
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Table => {
            print_table(&response.rows);
            if let Some(total) = response.total {
                println!("{} {}", "Total:".dimmed(), total.to_string().cyan());
            }
            if !response.log.is_empty() {
                println!();
                println!("{}", "Transformations:".green().bold());
                for line in &response.log {
                    println!("  • {}", line);
                }
            }
        }
    }
    Ok(())
}

fn print_table(rows: &[Row]) {
    let Some(first) = rows.first() else {
        println!("{}", "(no results)".dimmed());
        return;
    };
    let columns: Vec<&String> = first.keys().collect();

    let mut widths: HashMap<&String, usize> = columns.iter().map(|c| (*c, c.len())).collect();
    for row in rows {
        for (col, val) in row {
            let len = cell(val).chars().count();
            if let Some(w) = widths.get_mut(col) {
                *w = (*w).max(len);
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .map(|c| format!("{:width$}", c, width = widths[*c]))
        .collect();
    println!("{}", header.join(" │ ").white().bold());

    let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| {
                let val = row.get(*c).map(cell).unwrap_or_default();
                format!("{:width$}", val, width = widths[*c])
            })
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", rows.len().to_string().cyan());
}

fn cell(val: &serde_json::Value) -> String {
    qail_etl::ast::values::json_to_text(val).unwrap_or_else(|| "NULL".to_string())
}
