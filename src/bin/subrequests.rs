//! Subrequests Command Line Interface
//!
//! Plans or sends a JSON command tree against a JSON:API subrequests endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Show the batches a command tree compiles to
//! subrequests plan --file command.json
//!
//! # Send it (host from SUBREQUESTS_HOST or --config)
//! subrequests send --file command.json --schemata schemata.json
//!
//! # Read the command from stdin, print JSON
//! cat command.json | subrequests --format json send --schemata schemata.json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use jsonapi_subrequests::{
    load_schemata, Schemata, SubrequestClient, SubrequestConfig, SubrequestOutcome,
    SubrequestPlan,
};

#[derive(Parser)]
#[command(name = "subrequests")]
#[command(version = "0.1.0")]
#[command(about = "Compile nested JSON:API commands into batched subrequests")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: json or pretty (default)
    #[arg(long, short = 'o', global = true, default_value = "pretty", value_enum)]
    format: OutputFormat,

    /// YAML config file (SUBREQUESTS_* env vars are used otherwise)
    #[arg(long, short, global = true, env = "SUBREQUESTS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a command tree and print its batches (nothing is sent)
    Plan {
        /// Input file (reads stdin if not provided)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Schemata file keyed by entity--bundle
        #[arg(short, long)]
        schemata: Option<PathBuf>,
    },

    /// Compile and send a command tree
    Send {
        /// Input file (reads stdin if not provided)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Schemata file keyed by entity--bundle
        #[arg(short, long)]
        schemata: PathBuf,
    },
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan { file, schemata } => cmd_plan(file, schemata, cli.config, cli.format),
        Commands::Send { file, schemata } => {
            cmd_send(file, schemata, cli.config, cli.format).await
        }
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": e }));
            } else {
                eprintln!("{}: {}", "error".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn cmd_plan(
    file: Option<PathBuf>,
    schemata: Option<PathBuf>,
    config: Option<PathBuf>,
    format: OutputFormat,
) -> Result<(), String> {
    let command = read_command(file)?;
    let schemata = match schemata {
        Some(path) => load_schemata(path).map_err(|e| format!("{:#}", e))?,
        None => Schemata::new(),
    };
    let client = connect(config, schemata)?;
    let plan = client.plan(&command).map_err(|e| e.to_string())?;

    match format {
        OutputFormat::Json => print_json(&plan_json(&plan)),
        OutputFormat::Pretty => {
            println!(
                "{} {} node(s) in {} batch(es)",
                "OK".green(),
                plan.graph.len(),
                plan.batches.len()
            );
            for (duplicate, survivor) in &plan.replacements {
                println!("  {} {} -> {}", "collapsed".yellow(), duplicate, survivor);
            }
            println!();
            print!("{}", plan.describe());
            Ok(())
        }
    }
}

async fn cmd_send(
    file: Option<PathBuf>,
    schemata: PathBuf,
    config: Option<PathBuf>,
    format: OutputFormat,
) -> Result<(), String> {
    let command = read_command(file)?;
    let schemata = load_schemata(schemata).map_err(|e| format!("{:#}", e))?;
    let client = connect(config, schemata)?;
    let outcome = client.send(&command).await.map_err(|e| e.to_string())?;

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Pretty => {
            print_outcome(&outcome);
            Ok(())
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn connect(
    config: Option<PathBuf>,
    schemata: Schemata,
) -> Result<SubrequestClient<jsonapi_subrequests::HttpTransport>, String> {
    let config = match config {
        Some(path) => SubrequestConfig::from_file(path).map_err(|e| format!("{:#}", e))?,
        None => SubrequestConfig::from_env(),
    };
    SubrequestClient::connect(config, schemata).map_err(|e| format!("{:#}", e))
}

fn plan_json(plan: &SubrequestPlan) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "node_count": plan.graph.len(),
        "batches": plan.batches.batches.iter().map(|b| serde_json::json!({
            "priority": b.priority,
            "subrequests": b.order,
        })).collect::<Vec<_>>(),
        "collapsed": plan.replacements,
    })
}

fn print_outcome(outcome: &SubrequestOutcome) {
    println!(
        "{} {} batch(es) sent, {} response(s)",
        "OK".green(),
        outcome.batches_sent,
        outcome.responses.len()
    );
    for response in outcome.responses.iter() {
        let status = if response.is_success() {
            response.status.to_string().green()
        } else {
            response.status.to_string().red()
        };
        println!(
            "  [{}] {} {} {}",
            response.priority,
            status,
            response.action.as_str(),
            response.content_id
        );
    }
    for warning in &outcome.warnings {
        println!("  {} {}", "warning".yellow(), warning);
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    println!(
        "{}",
        serde_json::to_string_pretty(value)
            .map_err(|e| format!("JSON serialization failed: {}", e))?
    );
    Ok(())
}

fn read_command(file: Option<PathBuf>) -> Result<serde_json::Value, String> {
    let source = match file {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?,
        None => {
            if io::stdin().is_terminal() {
                return Err("No input provided. Use --file or pipe input via stdin.".to_string());
            }
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| format!("Failed to read stdin: {}", e))?;
            buffer
        }
    };
    serde_json::from_str(&source).map_err(|e| format!("Invalid command JSON: {}", e))
}
