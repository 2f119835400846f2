use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use t2sql::config::Config;
use t2sql::models::{KbCatalog, MSchema};
use t2sql::services::llm::LlmClient;
use t2sql::services::pipeline::{AskOptions, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "t2sql")]
#[command(version, about = "Constrained two-stage NL-to-SQL pipeline")]
struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate SQL for a natural-language question
    Ask {
        /// The question (Chinese or mixed-script)
        #[arg(long, short = 'q')]
        question: String,

        /// Write JSON-lines records to this file
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,

        /// How many SQL records to emit
        #[arg(long, default_value_t = 1)]
        sql_topk: usize,

        /// Refine table candidates through the semantic index
        #[arg(long)]
        use_semantic: bool,

        /// Enable all refinements (semantic retrieval, top-3 candidates)
        #[arg(long)]
        best: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    init_tracing(&config);
    tracing::debug!("configuration loaded");

    match cli.command {
        Command::Ask { question, output, sql_topk, use_semantic, best } => {
            let options = AskOptions {
                sql_topk: if best { sql_topk.max(3) } else { sql_topk },
                use_semantic: use_semantic || best,
            };
            run_ask(&config, &question, output.as_deref(), options).await
        }
    }
}

async fn run_ask(
    config: &Config,
    question: &str,
    output: Option<&std::path::Path>,
    options: AskOptions,
) -> anyhow::Result<()> {
    let schema = Arc::new(MSchema::load(&config.data.schema_path)?);
    let kb = Arc::new(KbCatalog::load(&config.data.kb_catalog_path)?);
    let chat = Arc::new(LlmClient::new(config.llm.clone())?);

    if options.use_semantic {
        // The dense index is an external collaborator; without one wired
        // in, recall stays lexical-only.
        tracing::warn!(
            "semantic retrieval requested but no retriever is wired for {}; using lexical recall",
            config.data.semantic_index_dir
        );
    }

    let pipeline = Pipeline::new(schema, kb, chat, config.clone());

    let records = match pipeline.ask(question, &options).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("generation failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(first) = records.first() {
        println!("{}", first.sql);
    }

    if let Some(path) = output {
        let mut file = std::fs::File::create(path)?;
        for record in &records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        tracing::info!("results written to {}", path.display());
    }

    if records.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(config.log_directive());
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("t2sql.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the appender guard alive for the process lifetime.
        Box::leak(Box::new(guard));
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
