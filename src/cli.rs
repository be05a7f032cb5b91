//! CLI interface for commandkit

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::learning::{CommandEnhancer, ExecutionOptions, LearningStore, PatternRecognizer};
use crate::paths::PathResolver;

#[derive(Parser)]
#[command(name = "commandkit")]
#[command(about = "Repository-aware path resolution and execution learning for slash commands", long_about = None)]
#[command(version)]
struct Cli {
    /// Starting directory for path resolution (default: current directory)
    #[arg(short, long, global = true)]
    start_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved repository root and how it was found
    Root,
    /// Resolve a logical path name (prds, prd_workspace, docs, tests, lib, commands, hooks, system)
    Resolve {
        /// Logical path name
        name: String,
        /// Optional filename to append
        #[arg(short, long)]
        filename: Option<String>,
        /// Create the directory if missing
        #[arg(short, long)]
        ensure: bool,
    },
    /// Record a command execution
    Record {
        /// Command name (e.g. "/fix")
        command: String,
        /// Parameters as a JSON value
        #[arg(short, long)]
        params: Option<String>,
        /// Outcome: success, failure, partial, or started
        #[arg(short, long, default_value = "started")]
        outcome: String,
        #[arg(long)]
        duration_ms: Option<i64>,
        #[arg(long)]
        error: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Report the outcome of an earlier execution
    Outcome {
        /// Execution id returned by `record` or `enhance`
        id: i64,
        /// Outcome: success, failure, partial, or started
        outcome: String,
        #[arg(long)]
        duration_ms: Option<i64>,
        #[arg(long)]
        error: Option<String>,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// List recent executions
    Recent {
        /// Filter to one command
        #[arg(short, long)]
        command: Option<String>,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Find executions matching any keyword (substring match)
    Similar {
        /// Whitespace-separated keywords
        keywords: String,
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// List executions within a time window ("24h", "7d", "2w")
    Window {
        window: String,
    },
    /// Manage the knowledge base
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommands,
    },
    /// Manage command sequence patterns
    Patterns {
        #[command(subcommand)]
        command: PatternCommands,
    },
    /// Inject learned context into command text (reads text from a file or stdin)
    Enhance {
        /// Command name (e.g. "/fix")
        command: String,
        /// Parameters as a JSON value
        #[arg(short, long)]
        params: Option<String>,
        /// File containing the command text (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Suggest the next command for a run of recent commands
    Suggest {
        /// Recent commands in chronological order
        commands: Vec<String>,
        /// Minimum pattern frequency to consider
        #[arg(short, long, default_value = "3")]
        threshold: u32,
    },
    /// Show per-command execution statistics
    Stats {
        /// Limit to one command
        #[arg(short, long)]
        command: Option<String>,
    },
    /// Delete executions and patterns older than the retention window
    Cleanup {
        /// Override the configured retention in days
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand)]
enum KnowledgeCommands {
    /// Add or update an entry (duplicate keys are overwritten)
    Add {
        key: String,
        value: String,
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Look up one entry by key
    Get {
        key: String,
    },
    /// Substring search across keys, values, and categories
    Search {
        query: String,
    },
}

#[derive(Subcommand)]
enum PatternCommands {
    /// Record one observation of a command sequence
    Record {
        /// Comma-joined command names, e.g. "/fix,/test,/commit"
        sequence: String,
    },
    /// List patterns seen at least `threshold` times
    Frequent {
        #[arg(short, long, default_value = "3")]
        threshold: u32,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let start = cli.start_dir.as_deref();

    match cli.command {
        Commands::Root => {
            let resolver = resolver(&config);
            let root = resolver.resolve_root_with_override(start);
            println!("{} ({})", root.path.display(), root.source);
        }
        Commands::Resolve { name, filename, ensure } => {
            let resolver = resolver(&config);
            let path = if ensure {
                resolver.ensure_directory(&name, start)?
            } else {
                resolver.resolve_logical_path(&name, start)?
            };
            let path = match filename {
                Some(filename) => path.join(filename),
                None => path,
            };
            println!("{}", path.display());
        }
        Commands::Record { command, params, outcome, duration_ms, error, project } => {
            let store = open_store(&config).await?;
            let params = parse_params(params.as_deref())?;
            let options = ExecutionOptions {
                duration_ms,
                error_message: error,
                project_context: project,
                ..Default::default()
            };
            let id = store
                .record_execution(&command, params.as_ref(), &outcome, &options)
                .await?;
            println!("{id}");
            store.close().await;
        }
        Commands::Outcome { id, outcome, duration_ms, error, feedback } => {
            let store = open_store(&config).await?;
            let options = ExecutionOptions {
                duration_ms,
                error_message: error,
                user_feedback: feedback,
                ..Default::default()
            };
            store.record_outcome(id, &outcome, &options).await?;
            store.close().await;
        }
        Commands::Recent { command, limit } => {
            let store = open_store(&config).await?;
            let records = store.get_recent_executions(command.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            store.close().await;
        }
        Commands::Similar { keywords, limit } => {
            let store = open_store(&config).await?;
            let records = store.get_similar_issues(&keywords, limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            store.close().await;
        }
        Commands::Window { window } => {
            let store = open_store(&config).await?;
            let records = store.get_executions_in_window(&window).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            store.close().await;
        }
        Commands::Knowledge { command } => {
            let store = open_store(&config).await?;
            match command {
                KnowledgeCommands::Add { key, value, category } => {
                    store.add_knowledge(&key, &value, category.as_deref()).await?;
                }
                KnowledgeCommands::Get { key } => match store.get_knowledge(&key).await? {
                    Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                    None => println!("null"),
                },
                KnowledgeCommands::Search { query } => {
                    let entries = store.search_knowledge(&query).await?;
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                }
            }
            store.close().await;
        }
        Commands::Patterns { command } => {
            let store = open_store(&config).await?;
            match command {
                PatternCommands::Record { sequence } => {
                    let id = store.record_pattern(&sequence).await?;
                    println!("{id}");
                }
                PatternCommands::Frequent { threshold } => {
                    let patterns = store.get_frequent_patterns(threshold).await?;
                    println!("{}", serde_json::to_string_pretty(&patterns)?);
                }
            }
            store.close().await;
        }
        Commands::Enhance { command, params, file } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("Failed to read command text from stdin")?;
                    buffer
                }
            };
            let params = parse_params(params.as_deref())?;

            let store = Arc::new(LearningStore::open(&config.store.database_path).await?);
            let enhancer = CommandEnhancer::new(Arc::clone(&store), &config.enhancer);
            let result = enhancer.enhance_command(&command, params.as_ref(), &text).await?;

            print!("{}", result.text);
            eprintln!("execution id: {}", result.execution_id);
            store.close().await;
        }
        Commands::Suggest { commands, threshold } => {
            let store = open_store(&config).await?;
            let recognizer = PatternRecognizer::new().with_min_frequency(threshold);
            match recognizer.suggest_next(&store, &commands).await? {
                Some(suggestion) => println!("{}", serde_json::to_string_pretty(&suggestion)?),
                None => println!("null"),
            }
            store.close().await;
        }
        Commands::Stats { command } => {
            let store = open_store(&config).await?;
            let stats = store.command_stats(command.as_deref()).await?;
            for entry in &stats {
                println!(
                    "{}: {} runs, {:.0}% success, avg {}",
                    entry.command,
                    entry.total,
                    entry.success_rate() * 100.0,
                    entry
                        .avg_duration_ms
                        .map(|ms| format!("{ms:.0}ms"))
                        .unwrap_or_else(|| "n/a".to_string()),
                );
            }
            store.close().await;
        }
        Commands::Cleanup { days } => {
            let store = open_store(&config).await?;
            let days = days.unwrap_or(config.store.retention_days);
            let removed = store.cleanup_older_than(days).await?;
            println!("Removed {removed} rows older than {days} days");
            store.close().await;
        }
    }

    Ok(())
}

fn resolver(config: &Config) -> PathResolver {
    PathResolver::new().with_cache_ttl(Duration::from_secs(config.resolver.cache_ttl_secs))
}

async fn open_store(config: &Config) -> Result<LearningStore> {
    Ok(LearningStore::open(&config.store.database_path).await?)
}

fn parse_params(params: Option<&str>) -> Result<Option<serde_json::Value>> {
    params
        .map(|raw| serde_json::from_str(raw).context("Parameters must be valid JSON"))
        .transpose()
}
