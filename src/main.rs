//! # askdocs CLI
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml ingest
//! askdocs query "What does the warranty cover?"
//! askdocs chat
//! askdocs stats
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs ingest` | Rebuild the store from `docs_dir`, replacing the old one |
//! | `askdocs query "<question>"` | Answer one question (builds the store if empty) |
//! | `askdocs chat` | Interactive session with conversation memory |
//! | `askdocs stats` | Store size, record count, embedding model |
//! | `askdocs completions <shell>` | Print shell completions |

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use askdocs::config::{self, Config};
use askdocs::harness::Harness;
use askdocs::ingest::IngestReport;
use askdocs::progress::ProgressMode;
use askdocs::stats;
use askdocs_core::models::{QueryOutcome, QueryResult};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Ask questions about a folder of documents.
#[derive(Parser)]
#[command(
    name = "askdocs",
    version,
    about = "askdocs: conversational question answering over local documents"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Ingest progress on stderr.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the store from the documents directory, replacing the old one.
    Ingest,

    /// Answer a single question.
    Query {
        question: String,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive session. `/clear` forgets the conversation; `exit`, `quit`
    /// or `退出` ends it.
    Chat,

    /// Show what the store holds.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) if !env.is_empty() => EnvFilter::new(env),
        _ => EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "askdocs", &mut std::io::stdout());
        return Ok(());
    }

    let cfg: Config = config::load_config(&cli.config)?;
    let progress = cli.progress.reporter();
    let harness = Harness::open(cfg).await?;

    match cli.command {
        Commands::Ingest => {
            let report = harness.rebuild(progress.as_ref()).await?;
            print_report(&report);
            println!("ok");
        }
        Commands::Query { question, json } => {
            harness.ensure_built(progress.as_ref()).await?;
            let result = harness.query(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if result.outcome == QueryOutcome::Failed {
                harness.close().await;
                std::process::exit(1);
            }
        }
        Commands::Chat => {
            if let Some(report) = harness.ensure_built(progress.as_ref()).await? {
                print_report(&report);
            }
            run_chat(&harness).await?;
        }
        Commands::Stats { json } => {
            let s = harness.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&s)?);
            } else {
                stats::print(&s);
            }
        }
        Commands::Completions { .. } => {}
    }

    harness.close().await;
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("ingest");
    println!("  files seen: {}", report.files_seen);
    println!("  documents: {}", report.documents);
    println!("  failed files: {}", report.failed_files.len());
    for (path, reason) in &report.failed_files {
        println!("    {}: {}", path.display(), reason);
    }
    println!("  chunks: {}", report.chunks);
    println!("  records: {}", report.records);
    println!("  model: {} ({} dims)", report.model, report.dims);
    if report.empty_corpus {
        println!("  empty corpus: no documents found, store is empty");
    }
}

fn print_result(result: &QueryResult) {
    println!("{}", result.answer);
    if result.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, src) in result.sources.iter().enumerate() {
        let page = src.page.map(|p| format!(" (page {})", p)).unwrap_or_default();
        println!("  [{}] {}{}  distance {:.3}", i + 1, src.source, page, src.distance);
        println!("      {}", src.snippet.replace('\n', " "));
    }
}

async fn run_chat(harness: &Harness) -> Result<()> {
    println!("Ask a question. `/clear` resets the conversation, `exit` quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" | "退出" => break,
            "/clear" => {
                harness.clear_memory();
                println!("(conversation cleared)");
                continue;
            }
            _ => {}
        }

        let started = Instant::now();
        let result = harness.query(question).await;
        print_result(&result);
        println!("({:.1}s)", started.elapsed().as_secs_f64());
        println!();
    }
    Ok(())
}
