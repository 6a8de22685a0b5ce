//! adaptive-rag: answer questions through the self-correcting RAG workflow.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;

use adaptive_rag::config::{self, BusyPolicy, OllamaConfig, SearchConfig, WorkflowConfig};
use adaptive_rag::db::{self, DatabaseError};
use adaptive_rag::pipeline::collaborators::Passage;
use adaptive_rag::pipeline::ollama::{missing_models, LlmClient, OllamaClient, OllamaError};
use adaptive_rag::pipeline::retrieval::{load_corpus, RetrievalError};
use adaptive_rag::pipeline::store::{SqliteRunStore, StoreError};
use adaptive_rag::pipeline::workflow::{RunState, Workflow, WorkflowError};
use adaptive_rag::pipeline::{build_collaborators, PipelineError};

#[derive(Parser)]
#[command(name = config::APP_NAME)]
#[command(about = "Self-correcting retrieval-augmented question answering", long_about = None)]
#[command(version = config::APP_VERSION)]
struct Cli {
    /// Run state database (defaults to ~/.adaptive-rag/runs.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question
    Ask {
        question: String,

        /// Conversation key; a fresh one is generated when omitted
        #[arg(long)]
        run_key: Option<String>,

        /// Knowledge base passages, one JSON object per line
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Fail instead of waiting when the run key is busy
        #[arg(long)]
        no_wait: bool,

        /// Print the final run state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the persisted state of a run
    Show {
        #[arg(long)]
        run_key: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete a run and its history
    Clear {
        #[arg(long)]
        run_key: String,
    },

    /// List persisted runs
    List,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Ollama(#[from] OllamaError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Corpus(#[from] RetrievalError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No run stored under key {0}")]
    NotFound(String),
}

fn main() -> ExitCode {
    adaptive_rag::init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Workflow(e)) => {
            eprintln!("error [{}]: {e}", e.kind().as_str());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let db_path = cli.db.unwrap_or_else(config::default_runs_db);
    let ollama = OllamaConfig::from_env();
    let client: Arc<dyn LlmClient> = Arc::new(OllamaClient::from_config(&ollama)?);

    match cli.command {
        Commands::Ask {
            question,
            run_key,
            corpus,
            no_wait,
            json,
        } => {
            preflight(client.as_ref(), &ollama)?;
            let corpus = match corpus {
                Some(path) => load_corpus(&path)?,
                None => Vec::new(),
            };
            if corpus.is_empty() {
                tracing::warn!("Knowledge base is empty; retrieval will escalate to live search");
            }
            let policy = if no_wait { BusyPolicy::Reject } else { BusyPolicy::Wait };
            let cache = db::open_database(&db_path)?;
            let workflow = open_workflow(&db_path, client, &ollama, corpus, Some(cache), policy)?;

            let run_key = run_key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let state = workflow.invoke(&question, &run_key)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                println!("run key: {run_key}");
                print_state(&state);
            }
        }
        Commands::Show { run_key, json } => {
            let workflow =
                open_workflow(&db_path, client, &ollama, Vec::new(), None, BusyPolicy::Wait)?;
            let state = workflow
                .state(&run_key)?
                .ok_or_else(|| CliError::NotFound(run_key.clone()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_state(&state);
            }
        }
        Commands::Clear { run_key } => {
            let workflow =
                open_workflow(&db_path, client, &ollama, Vec::new(), None, BusyPolicy::Wait)?;
            if workflow.clear(&run_key)? {
                println!("cleared {run_key}");
            } else {
                return Err(CliError::NotFound(run_key));
            }
        }
        Commands::List => {
            let workflow =
                open_workflow(&db_path, client, &ollama, Vec::new(), None, BusyPolicy::Wait)?;
            for summary in workflow.runs()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    summary.run_key, summary.status, summary.updated_at, summary.question
                );
            }
        }
    }
    Ok(())
}

fn open_workflow(
    db_path: &Path,
    client: Arc<dyn LlmClient>,
    ollama: &OllamaConfig,
    corpus: Vec<Passage>,
    embedding_cache: Option<rusqlite::Connection>,
    busy_policy: BusyPolicy,
) -> Result<Workflow, CliError> {
    let store = SqliteRunStore::open(db_path)?;
    let collaborators =
        build_collaborators(client, ollama, &SearchConfig::from_env(), corpus, embedding_cache)?;
    let config = WorkflowConfig {
        busy_policy,
        ..WorkflowConfig::default()
    };
    Ok(Workflow::new(collaborators, Box::new(store), config))
}

/// Fail fast when Ollama is down; warn about models that are not pulled.
fn preflight(client: &dyn LlmClient, ollama: &OllamaConfig) -> Result<(), CliError> {
    for model in missing_models(client, ollama)? {
        tracing::warn!(model = %model, "Configured model is not installed");
        eprintln!("warning: model {model} is not installed (ollama pull {model})");
    }
    Ok(())
}

fn print_state(state: &RunState) {
    println!("question: {}", state.question);
    println!("status: {}", state.status.label());
    if state.is_finished() && !state.is_verified() {
        println!("verified: no (iteration budget exhausted)");
    }
    if let Some(score) = state.confidence_score {
        println!("confidence: {score}");
    }
    println!("iterations: {}", state.iterations);
    println!("documents: {}", state.documents.len());
    for (i, doc) in state.documents.iter().enumerate() {
        let preview: String = doc.content.chars().take(120).collect();
        println!("  [{}] {}", i + 1, preview.replace('\n', " "));
    }
    if !state.history.is_empty() {
        println!("earlier turns: {}", state.history.len());
    }
    match &state.generation {
        Some(answer) => println!("\n{answer}"),
        None => println!("\n(no answer yet)"),
    }
}
