//! text-ai-gateway CLI
//!
//! Main entry point for the text-ai-gateway command-line tool.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gateway::config::{ConfigLoader, LoggingConfig};
use gateway::{version_info, AskOverrides, AskRequest, HistoryQuery, InstanceRegistry, SortOrder};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "text-ai-gateway")]
#[command(about = "Rate-limited, history-keeping gateway to remote LLM providers", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "TEXT_AI_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask an instance a question
    Ask {
        /// Instance name or sensor.ha_text_ai_<name> entity id
        instance: String,
        /// The question
        question: String,
        /// Model override
        #[arg(short, long)]
        model: Option<String>,
        /// Temperature override (0.0-2.0)
        #[arg(short, long)]
        temperature: Option<f32>,
        /// Max response tokens override
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Number of prior exchanges to include (1-20)
        #[arg(long)]
        context_messages: Option<usize>,
        /// System prompt for this question only
        #[arg(short, long)]
        system_prompt: Option<String>,
    },

    /// Interactive session with one instance
    Chat {
        /// Instance name
        instance: String,
    },

    /// Show conversation history
    History {
        /// Instance name
        instance: String,
        /// Number of entries (1-100)
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Only entries answered by this model
        #[arg(long)]
        model: Option<String>,
        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<chrono::DateTime<chrono::Utc>>,
        /// Include model, token and latency metadata
        #[arg(long)]
        metadata: bool,
        /// newest (default) or oldest
        #[arg(long, default_value = "newest")]
        order: SortOrder,
    },

    /// Show instance status
    Status {
        /// Instance name; all instances when omitted
        instance: Option<String>,
    },

    /// Clear the active history of an instance
    ClearHistory {
        /// Instance name
        instance: String,
    },

    /// Set or clear the system prompt stored in the configuration file
    SetPrompt {
        /// Instance name
        instance: String,
        /// New prompt; omit to clear
        prompt: Option<String>,
    },

    /// Check provider connectivity for every instance
    Check,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(ref path) = cli.config {
        loader = loader.with_path(path);
    }

    let command = match cli.command {
        Some(Commands::Version) | None => {
            println!("{}", version_info());
            return Ok(());
        }
        Some(Commands::SetPrompt { instance, prompt }) => {
            return set_prompt(&loader, &instance, prompt).await;
        }
        Some(command) => command,
    };

    let config = loader.load().await?;
    init_logging(&config.logging);
    let registry = InstanceRegistry::from_config(&config)?;

    let outcome = run(&registry, command, cli.json).await;
    registry.shutdown().await;
    outcome
}

async fn run(registry: &InstanceRegistry, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            instance,
            question,
            model,
            temperature,
            max_tokens,
            context_messages,
            system_prompt,
        } => {
            let request = AskRequest::new(instance, question).with_overrides(AskOverrides {
                model,
                temperature,
                max_tokens,
                context_messages,
                system_prompt,
            });
            let result = registry.ask(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                println!("{}", result.response_text);
                eprintln!("[{} | {} tokens]", result.model_used, result.tokens_used);
            } else {
                eprintln!("Error: {}", result.error.as_deref().unwrap_or("unknown error"));
            }
            if let Some(warning) = result.warning {
                eprintln!("Warning: {}", warning);
            }
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Chat { instance } => chat(registry, &instance).await?,

        Commands::History {
            instance,
            limit,
            model,
            since,
            metadata,
            order,
        } => {
            let query = HistoryQuery {
                instance,
                limit,
                filter_model: model,
                start_date: since,
                include_metadata: metadata,
                sort_order: order,
            };
            let entries = registry.get_history(&query).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No history");
            } else {
                for entry in entries {
                    println!("[{}]", entry.timestamp);
                    println!("  Q: {}", entry.question);
                    println!("  A: {}", entry.response);
                    if let Some(meta) = entry.metadata {
                        println!(
                            "  {} | {} tokens{} | {} ms",
                            meta.model,
                            meta.total_tokens,
                            if meta.tokens_estimated { " (estimated)" } else { "" },
                            meta.latency_ms
                        );
                    }
                }
            }
        }

        Commands::Status { instance } => {
            let statuses = match instance {
                Some(id) => vec![registry.status(&id)?],
                None => registry.statuses(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                for s in statuses {
                    println!("{} ({} / {})", s.instance, s.provider, s.model);
                    println!("  State:    {}", s.state);
                    println!("  Endpoint: {}", s.endpoint);
                    println!("  History:  {} entries", s.history_size);
                    println!(
                        "  Requests: {} ok, {} failed, {} errors",
                        s.metrics.successful_requests, s.metrics.failed_requests, s.metrics.total_errors
                    );
                    if let Some(prompt) = s.system_prompt {
                        println!("  Prompt:   {}", prompt);
                    }
                }
            }
        }

        Commands::ClearHistory { instance } => {
            registry.clear_history(&instance).await?;
            println!("✓ History cleared for {}", instance);
        }

        Commands::Check => {
            let report = registry.check_connections().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Gateway health: {}", report.status);
                for check in &report.checks {
                    let icon = match check.status {
                        gateway::HealthStatus::Healthy => "✓",
                        gateway::HealthStatus::Degraded => "⚠",
                        gateway::HealthStatus::Unhealthy => "✗",
                    };
                    println!(
                        "  {} {} ({} ms) {}",
                        icon,
                        check.name,
                        check.response_time_ms,
                        check.message.as_deref().unwrap_or("")
                    );
                }
            }
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }

        Commands::SetPrompt { .. } | Commands::Version => {}
    }

    Ok(())
}

/// Read questions from stdin until EOF. Lines starting with `/` are commands.
async fn chat(registry: &InstanceRegistry, instance: &str) -> anyhow::Result<()> {
    let engine = registry.get(instance)?;
    eprintln!("Chatting with {} (/prompt <text>, /clear, /status, /quit)", engine.name());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/clear", _) => {
                engine.clear_history().await?;
                eprintln!("History cleared");
            }
            ("/status", _) => {
                let s = engine.status();
                eprintln!("{} | {} ok, {} failed", s.state, s.metrics.successful_requests, s.metrics.failed_requests);
            }
            ("/prompt", rest) => {
                let prompt = Some(rest.trim().to_string()).filter(|p| !p.is_empty());
                engine.set_system_prompt(prompt)?;
                eprintln!("System prompt updated");
            }
            _ => {
                let result = engine.ask(line, AskOverrides::default()).await;
                match (result.success, result.error) {
                    (true, _) => println!("{}", result.response_text),
                    (false, error) => eprintln!("Error: {}", error.unwrap_or_default()),
                }
            }
        }
    }

    Ok(())
}

/// Persist a new system prompt for `instance` in the config file.
async fn set_prompt(loader: &ConfigLoader, instance: &str, prompt: Option<String>) -> anyhow::Result<()> {
    let Some(path) = loader.resolved_path().map(PathBuf::from) else {
        bail!("No configuration file found");
    };

    // Raw load, so ${VAR} references are written back unexpanded.
    let mut config = ConfigLoader::load_from_path(&path).await?;
    let key = gateway::registry::lookup_key(instance);
    let Some(entry) = config
        .instances
        .iter_mut()
        .find(|i| gateway::config::normalize_name(&i.name) == key)
    else {
        bail!("Instance {} not found in {}", instance, path.display());
    };

    entry.system_prompt = prompt.filter(|p| !p.trim().is_empty());
    entry.resolve()?;

    let content = toml::to_string_pretty(&config)?;
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✓ System prompt updated in {}", path.display());
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.format.as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}
