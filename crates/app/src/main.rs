use chrono::Utc;
use clap::{Parser, Subcommand};
use llm_searcher_core::{
    ConfigError, LoggingConfig, Searcher, SearcherConfig, DEFAULT_CONFIG_PATH,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info";

const HELP_MESSAGE: &str = "Supported commands:\n\
    \thelp - view this message\n\
    \tadd <path> - add a PDF or text document to the corpus\n\
    \tchange_config <name> - switch to another searcher profile\n\
    \texit - quit\n\
    Anything else is asked as a question.";

#[derive(Parser)]
#[command(name = "llm-searcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the JSON file with searcher profiles
    #[arg(long, env = "LLM_SEARCHER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Which searcher profile to use
    #[arg(long, env = "LLM_SEARCHER_PROFILE")]
    searcher: String,
}

#[derive(Subcommand)]
enum Command {
    /// Answer canned questions from the profile, then read questions from stdin.
    Chat,
    /// Ingest new documents and write the corpus file.
    Ingest {
        /// Folder to ingest instead of the profile's `pdfs_location`.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Ask a single question.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Print the chunks retrieved for a query without calling the chat model.
    Search {
        #[arg(long)]
        query: String,
        /// Number of chunks to return; defaults to the profile's setting.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Add one document to the corpus.
    Add {
        #[arg(long)]
        path: PathBuf,
    },
}

fn init_logging(logging: Option<&LoggingConfig>) {
    let configured = logging.and_then(|logging| logging.filter.as_deref());
    let mut rejected = None;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match configured.map(EnvFilter::try_new) {
            Some(Ok(filter)) => filter,
            Some(Err(parse_error)) => {
                rejected = Some(parse_error.to_string());
                EnvFilter::new(DEFAULT_LOG_FILTER)
            }
            None => EnvFilter::new(DEFAULT_LOG_FILTER),
        },
    };

    let ansi = logging.and_then(|logging| logging.ansi).unwrap_or(true);
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(ansi))
        .try_init();
    if installed.is_err() {
        return;
    }

    match rejected {
        Some(reason) => error!(%reason, "error applying logger config, using default filter"),
        None => info!("applied logger config"),
    }
}

/// Loads the profiles file. On failure the default logger is installed first
/// so the error is logged where it happened.
fn load_config(path: &Path) -> Result<SearcherConfig, ConfigError> {
    SearcherConfig::load(path).map_err(|failure| {
        init_logging(None);
        error!(path = %path.display(), error = %failure, "failed to load searcher config");
        failure
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(config.logging.as_ref());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        searcher = %cli.searcher,
        "llm-searcher boot"
    );

    let profile = config.profile(&cli.searcher)?;
    let mut searcher = Searcher::from_profile(profile).await.map_err(|failure| {
        error!(error = %failure, "failed to create searcher");
        failure
    })?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            if let Some(path) = &profile.questions {
                let mut stdout = std::io::stdout();
                searcher.answer_questions_from_file(path, &mut stdout).await?;
            }
            interactive_loop(&mut searcher, &config).await?;
        }
        Command::Ingest { folder } => {
            if let Some(folder) = folder {
                let report = searcher.ingest_folder(&folder).await?;
                println!(
                    "{} documents, {} chunks ingested from {}",
                    report.documents.len(),
                    report.chunk_count,
                    folder.display()
                );
            }
            println!(
                "{} chunks in corpus at {}",
                searcher.retriever().corpus().len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask { question } => {
            println!("{}", searcher.ask_question(&question).await?);
        }
        Command::Search { query, top_k } => {
            let retriever = searcher.retriever();
            let top_k = top_k.unwrap_or_else(|| retriever.num_of_relevant_chunks());
            for (rank, text) in retriever.rank(&query, top_k).await?.iter().enumerate() {
                println!("[{}]\n{text}", rank + 1);
            }
        }
        Command::Add { path } => {
            let added = searcher.add_document(&path).await?;
            println!("{added} chunks added from {}", path.display());
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LoopCommand<'a> {
    Skip,
    Exit,
    Help,
    Add(&'a str),
    ChangeConfig(&'a str),
    Ask(&'a str),
}

fn parse_command(line: &str) -> LoopCommand<'_> {
    let input = line.trim();
    if input.is_empty() {
        return LoopCommand::Skip;
    }
    if input.eq_ignore_ascii_case("exit") {
        return LoopCommand::Exit;
    }
    if input.eq_ignore_ascii_case("help") {
        return LoopCommand::Help;
    }
    if let Some(path) = input.strip_prefix("add ") {
        return LoopCommand::Add(path.trim());
    }
    if let Some(name) = input.strip_prefix("change_config ") {
        return LoopCommand::ChangeConfig(name.trim());
    }
    LoopCommand::Ask(input)
}

async fn interactive_loop(searcher: &mut Searcher, config: &SearcherConfig) -> anyhow::Result<()> {
    println!("Your questions:");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            LoopCommand::Skip => {}
            LoopCommand::Exit => break,
            LoopCommand::Help => println!("{HELP_MESSAGE}"),
            LoopCommand::Add(path) => match searcher.add_document(Path::new(path)).await {
                Ok(added) => println!("{added} chunks added"),
                Err(failure) => {
                    error!(error = %failure, "adding document failed");
                    println!("Failed to add document: {failure}");
                }
            },
            LoopCommand::ChangeConfig(name) => {
                let switched = match config.profile(name) {
                    Ok(profile) => Searcher::from_profile(profile).await,
                    Err(failure) => Err(failure.into()),
                };
                match switched {
                    Ok(next) => {
                        *searcher = next;
                        info!(searcher = name, "changed searcher");
                        println!("Switched to {name}");
                    }
                    Err(failure) => {
                        error!(searcher = name, error = %failure, "changing searcher failed");
                        println!("Failed to change config: {failure}");
                    }
                }
            }
            LoopCommand::Ask(question) => match searcher.ask_question(question).await {
                Ok(answer) => println!("{answer}"),
                Err(failure) => {
                    error!(error = %failure, "asking question failed");
                    println!("Failed to answer question: {failure}");
                }
            },
        }
    }

    Ok(())
}
