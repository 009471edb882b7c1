use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use querypilot::benchmark::{load_cases, BenchmarkEngine};
use querypilot::config::PipelineConfig;
use querypilot::context::ContextClipper;
use querypilot::db::{ConversationStore, MemoryStore, SqliteStore};
use querypilot::execution::SqliteExecutor;
use querypilot::intent::{FuzzyScorer, IntentExtractor};
use querypilot::knowledge::{KnowledgeIndex, KnowledgeStore};
use querypilot::llm::OpenAiProvider;
use querypilot::pipeline::{LlmQueryStages, Pipeline, QueryStages};
use querypilot::semantic::load_from_file;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Chatbot identity used for the CLI's single-schema session
const CLI_CHATBOT: &str = "cli";

#[derive(Parser)]
#[command(name = "querypilot")]
#[command(about = "Natural-language questions to SQL over a semantic schema")]
#[command(version)]
struct Cli {
    /// Pipeline config file (JSON); QUERYPILOT_* env vars override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use fuzzy (Jaro-Winkler) token matching instead of exact overlap
    #[arg(long, global = true)]
    fuzzy: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the knowledge index for a schema and print a summary
    Index {
        #[arg(short, long)]
        schema: PathBuf,
    },
    /// Print the structured intent extracted from a question
    Extract {
        #[arg(short, long)]
        schema: PathBuf,
        question: String,
    },
    /// Print the clipped schema context for a question
    Clip {
        #[arg(short, long)]
        schema: PathBuf,
        question: String,
    },
    /// Answer a question end to end against a SQLite database
    Ask {
        /// Semantic schema; extracted from the database when omitted
        #[arg(short, long)]
        schema: Option<PathBuf>,
        #[arg(short, long)]
        database: PathBuf,
        /// Continue an existing conversation (requires a persistent store)
        #[arg(long)]
        conversation: Option<String>,
        question: String,
    },
    /// Score the chatbot against (question, expected SQL) cases
    Benchmark {
        #[arg(short, long)]
        schema: Option<PathBuf>,
        #[arg(short, long)]
        database: PathBuf,
        /// Test cases (.json or .csv)
        #[arg(long)]
        cases: PathBuf,
    },
    /// Resume turns interrupted by a previous run
    Resume {
        #[arg(short, long)]
        schema: Option<PathBuf>,
        #[arg(short, long)]
        database: PathBuf,
    },
}

fn extractor(config: &PipelineConfig, fuzzy: bool) -> IntentExtractor {
    let extractor = IntentExtractor::new(config.extraction.clone()).with_reference_date(config.reference_date);
    if fuzzy {
        extractor.with_scorer(Arc::new(FuzzyScorer::default()))
    } else {
        extractor
    }
}

fn build_index(schema: &Path) -> Result<KnowledgeIndex> {
    let schema = load_from_file(schema).with_context(|| format!("loading schema {}", schema.display()))?;
    Ok(KnowledgeIndex::build(schema)?)
}

async fn configure_chatbot(
    knowledge: &KnowledgeStore,
    schema: Option<&Path>,
    executor: &SqliteExecutor,
) -> Result<Arc<KnowledgeIndex>> {
    match schema {
        Some(path) => {
            let schema = load_from_file(path).with_context(|| format!("loading schema {}", path.display()))?;
            Ok(knowledge.configure(CLI_CHATBOT, schema)?)
        }
        None => {
            info!("No schema given, extracting from {}", executor.path().display());
            Ok(knowledge.refresh(CLI_CHATBOT, executor).await?)
        }
    }
}

fn open_store(config: &PipelineConfig) -> Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match &config.database_path {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

fn stages(config: &PipelineConfig, database: &Path) -> Result<Arc<dyn QueryStages>> {
    let provider = OpenAiProvider::from_env(config.provider_timeout())?;
    let executor = SqliteExecutor::new(database, config.max_result_rows);
    Ok(Arc::new(LlmQueryStages::new(Arc::new(provider), Arc::new(executor))))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { schema } => {
            let index = build_index(&schema)?;
            println!("fingerprint: {:016x}", index.fingerprint());
            for table in index.tables() {
                println!("{} ({} columns): {}", table.name, table.columns.len(), table.tokens.iter().join(" "));
            }
            for alias in index.date_aliases() {
                println!("date alias: {}", alias.name);
            }
        }
        Commands::Extract { schema, question } => {
            let index = build_index(&schema)?;
            let extraction = extractor(&config, cli.fuzzy).extract(&question, &index)?;
            println!("{}", serde_json::to_string_pretty(&extraction)?);
        }
        Commands::Clip { schema, question } => {
            let index = build_index(&schema)?;
            let extraction = extractor(&config, cli.fuzzy).extract(&question, &index)?;
            let context = ContextClipper::new(config.max_relationships).clip(&extraction.intent, &index)?;
            println!("{}", serde_json::to_string_pretty(&context)?);
        }
        Commands::Ask {
            schema,
            database,
            conversation,
            question,
        } => {
            let knowledge = Arc::new(KnowledgeStore::new());
            let executor = SqliteExecutor::new(&database, config.max_result_rows);
            configure_chatbot(&knowledge, schema.as_deref(), &executor).await?;

            let pipeline = Pipeline::new(config.clone(), knowledge, open_store(&config)?, stages(&config, &database)?)
                .with_extractor(extractor(&config, cli.fuzzy));
            let conversation_id = match conversation {
                Some(id) => id,
                None => pipeline.start_conversation(CLI_CHATBOT)?.conversation_id,
            };
            let outcome = pipeline.submit(&conversation_id, &question).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Benchmark {
            schema,
            database,
            cases,
        } => {
            let cases = load_cases(&cases)?;
            let knowledge = KnowledgeStore::new();
            let executor = SqliteExecutor::new(&database, config.max_result_rows);
            configure_chatbot(&knowledge, schema.as_deref(), &executor).await?;

            let store = open_store(&config)?;
            let engine =
                BenchmarkEngine::new(&config, stages(&config, &database)?).with_extractor(extractor(&config, cli.fuzzy));
            let run = engine.run_and_record(CLI_CHATBOT, &knowledge, store.as_ref(), &cases).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::Resume { schema, database } => {
            if config.database_path.is_none() {
                bail!("resume needs a persistent store; set database_path or QUERYPILOT_DATABASE_PATH");
            }
            let knowledge = Arc::new(KnowledgeStore::new());
            let executor = SqliteExecutor::new(&database, config.max_result_rows);
            configure_chatbot(&knowledge, schema.as_deref(), &executor).await?;

            let pipeline = Pipeline::new(config.clone(), knowledge, open_store(&config)?, stages(&config, &database)?)
                .with_extractor(extractor(&config, cli.fuzzy));
            for (id, result) in pipeline.resume_all().await? {
                match result {
                    Ok(outcome) => println!("{}: done\n{}", id, serde_json::to_string_pretty(&outcome)?),
                    Err(e) => println!("{}: failed: {}", id, e),
                }
            }
        }
    }

    Ok(())
}
