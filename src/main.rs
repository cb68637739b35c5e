// Magick Agent - Main Entry Point
//
// CLI for the LLM-driven ImageMagick assistant:
// - one-shot and interactive request processing
// - image inspection
// - audit log views

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use magick_agent::agent::{Agent, ProcessOutcome};
use magick_agent::audit::{
    AuditEvent, AuditLogReader, AuditRecorder, EventFilter, JsonlAuditRecorder, NullAuditRecorder,
};
use magick_agent::config::Config;
use magick_agent::engine::{self, Engine, ExecutorConfig, RuleSet};
use magick_agent::llm::create_generator;
use magick_agent::metrics;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Magick Agent: an LLM-powered assistant for ImageMagick
#[derive(Parser, Debug)]
#[command(name = "magick-agent")]
#[command(author = "Magick Agent Contributors")]
#[command(version = "0.1.0")]
#[command(about = "LLM-powered ImageMagick assistant with guarded command execution", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a configuration file (default: XDG config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process a single natural-language request
    Run {
        /// The request, e.g. "resize photo.jpg to 800x600"
        request: String,

        /// Execute without asking for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Start interactive chat mode
    Chat,
    /// Print information about an image file
    Info {
        /// Path to the image
        file: String,
    },
    /// Inspect the audit log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

#[derive(Subcommand, Debug)]
enum LogsAction {
    /// Show recent audit events
    Recent {
        /// Maximum number of events to show
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only show failed validations and executions
        #[arg(long)]
        failed: bool,
    },
    /// Show aggregate statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if config.metrics.enabled {
        if let Err(e) = metrics::init() {
            warn!(error = %e, "metrics registration failed, continuing without");
        }
    }

    match args.command {
        Some(Commands::Run { request, yes }) => {
            let mut agent = build_agent(&config).await?;
            if !process_once(&mut agent, &request, yes).await? {
                std::process::exit(1);
            }
        }
        Some(Commands::Chat) => {
            let mut agent = build_agent(&config).await?;
            chat_mode(&mut agent).await?;
        }
        Some(Commands::Info { file }) => {
            let agent = build_agent(&config).await?;
            match agent.image_info(&file).await {
                Some(info) => println!("{info}"),
                None => {
                    eprintln!("Could not get image information for {file}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Logs { action }) => {
            let reader = AuditLogReader::new(config.logging.audit_log_path());
            match action {
                LogsAction::Recent { limit, failed } => print_recent(&reader, limit, failed)?,
                LogsAction::Stats => print_stats(&reader)?,
            }
        }
        None => {
            info!("No command specified. Use \"magick-agent --help\" for usage.");
        }
    }

    Ok(())
}

/// Resolve the toolchain and assemble the agent.
async fn build_agent(config: &Config) -> Result<Agent> {
    let variant = engine::resolve()
        .await
        .context("Failed to resolve the installed ImageMagick toolchain")?;
    info!(%variant, "resolved ImageMagick");

    let recorder: Arc<dyn AuditRecorder> = if config.logging.audit {
        Arc::new(JsonlAuditRecorder::open(config.logging.audit_log_path())?)
    } else {
        Arc::new(NullAuditRecorder)
    };

    let engine = Engine::new(
        variant,
        RuleSet::imagemagick(),
        ExecutorConfig {
            timeout: config.execution.timeout(),
            capture_limit: config.execution.capture_limit,
        },
        recorder,
    );

    let generator = create_generator(&config.llm, variant)
        .context("Failed to create the LLM command generator")?;

    Ok(Agent::new(config, engine, generator))
}

/// Process a single request, optionally gated on confirmation. Returns
/// whether the request ran to a successful (or benign) end, so one-shot mode
/// can map failures to the exit code while chat mode keeps looping.
async fn process_once(agent: &mut Agent, request: &str, skip_confirmation: bool) -> Result<bool> {
    match agent.process_request(request).await {
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(false)
        }
        Ok(ProcessOutcome::Clarification(question)) => {
            println!("{question}");
            Ok(true)
        }
        Ok(ProcessOutcome::Rejected {
            candidate, verdict, ..
        }) => {
            eprintln!("Generated command was rejected: {candidate}");
            if let Some(reason) = &verdict.failure_reason {
                eprintln!("Failing check: {reason}");
            }
            Ok(false)
        }
        Ok(ProcessOutcome::Command {
            correlation_id,
            command,
            needs_confirmation,
        }) => {
            println!("Generated command:\n  {command}");

            if needs_confirmation && !skip_confirmation && !confirm("Execute this command?")? {
                println!("Command cancelled.");
                return Ok(true);
            }

            let outcome = agent.execute(correlation_id, &command).await;
            if outcome.success {
                println!("Command executed successfully ({}ms)", outcome.duration_ms);
                if let Some(path) = &outcome.output_path {
                    println!("Output saved to: {path}");
                }
                if !outcome.stdout.is_empty() {
                    println!("{}", outcome.stdout);
                }
                Ok(true)
            } else {
                eprintln!("Execution failed ({})", outcome.status_label());
                if !outcome.stderr.is_empty() {
                    eprintln!("{}", outcome.stderr);
                }
                Ok(false)
            }
        }
    }
}

/// Interactive chat mode - allows multiple exchanges with the agent
async fn chat_mode(agent: &mut Agent) -> Result<()> {
    println!("\n==========================================");
    println!("Magick Agent Interactive Chat");
    println!("==========================================");
    println!("Describe what you want to do with your images.");
    println!("Type 'info <file>' for image details.");
    println!("Type 'reset' to clear conversation history.");
    println!("Type 'quit' or 'exit' to end the session.");
    println!("==========================================\n");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            println!("\nGoodbye!");
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            "reset" => {
                agent.reset();
                println!("Conversation history cleared.");
                continue;
            }
            _ => {}
        }

        if let Some(file) = input.strip_prefix("info ") {
            match agent.image_info(file.trim()).await {
                Some(info) => println!("{info}"),
                None => println!("Could not get image information for {file}"),
            }
            continue;
        }

        // Failures are reported inline; the session keeps going either way.
        if let Err(e) = process_once(agent, input, false).await {
            eprintln!("Error: {e}");
        }
    }

    Ok(())
}

/// Ask a yes/no question on stdin, defaulting to no.
fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_recent(reader: &AuditLogReader, limit: usize, failed_only: bool) -> Result<()> {
    let filter = EventFilter {
        limit: Some(limit),
        success: if failed_only { Some(false) } else { None },
        ..Default::default()
    };
    let events = reader.events(&filter)?;

    if events.is_empty() {
        println!("No audit events recorded yet.");
        return Ok(());
    }

    for event in events {
        match event {
            AuditEvent::CommandValidation(v) => {
                let status = if v.passed { "PASS" } else { "REJECT" };
                let reason = v
                    .failure_reason
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default();
                println!(
                    "{} [{}] validation {status}{reason}: {}",
                    v.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    short_id(&v.correlation_id.to_string()),
                    v.raw_command
                );
            }
            AuditEvent::CommandExecution(e) => {
                let status = if e.success {
                    "OK".to_string()
                } else {
                    e.error_kind
                        .map(|k| format!("{k:?}"))
                        .unwrap_or_else(|| "FAILED".to_string())
                };
                println!(
                    "{} [{}] execution {status} {}ms: {}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    short_id(&e.correlation_id.to_string()),
                    e.duration_ms,
                    e.command
                );
            }
        }
    }
    Ok(())
}

fn print_stats(reader: &AuditLogReader) -> Result<()> {
    let stats = reader.stats()?;
    println!("Validations: {} total, {} passed, {} rejected",
        stats.validations.total, stats.validations.passed, stats.validations.rejected);
    println!(
        "Executions:  {} total, {} succeeded, {} failed (avg {:.0}ms)",
        stats.executions.total,
        stats.executions.succeeded,
        stats.executions.failed,
        stats.executions.avg_duration_ms
    );
    Ok(())
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}
