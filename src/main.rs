use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trellis_core::config::AppConfig;
use trellis_core::traits::LlmClient;
use trellis_core::types::ConnectionId;
use trellis_graph::{RetryPolicy, RunReport};
use trellis_pipelines::{BaselineEngine, CausalPipeline, CausalQuery, SqlPipeline};
use trellis_store::executor::SqliteExecutor;
use trellis_store::metadata::SchemaCache;

#[derive(Parser)]
#[command(name = "trellis", version, about = "Graph-based agent workflows over relational data")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "trellis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a question through a workflow
    Ask {
        /// The question to answer
        #[arg(trailing_var_arg = true)]
        question: Vec<String>,

        /// Which workflow to run
        #[arg(long, value_enum, default_value_t = PipelineKind::Text2sql)]
        pipeline: PipelineKind,

        /// Precomputed SQL for the causal workflow (skips parse/generate)
        #[arg(long)]
        sql: Option<String>,

        /// Causal variable selection as JSON, required with --sql
        /// (e.g. '{"treatment": "discount", "outcome": "spend"}')
        #[arg(long)]
        vars: Option<String>,

        /// Override the database path from config
        #[arg(long)]
        db: Option<PathBuf>,

        /// Extra hints appended to the SQL draft prompt
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show current configuration
    Config,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum PipelineKind {
    Text2sql,
    Causal,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trellis=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Ask {
            question,
            pipeline,
            sql,
            vars,
            db,
            notes,
        } => {
            let question = question.join(" ");
            if question.is_empty() {
                anyhow::bail!("no question given");
            }
            run_ask(&config, pipeline, &question, sql, vars, db, notes).await
        }
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // No config file: derive a minimal one from the environment.
    let (provider, model_id, key) = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        ("anthropic", "claude-sonnet-4-20250514", key)
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        ("openai", "gpt-4o", key)
    } else {
        anyhow::bail!(
            "no config file at {} and no ANTHROPIC_API_KEY/OPENAI_API_KEY set",
            path.display()
        );
    };
    info!(provider, "No config file, using environment settings");

    let toml_str = format!(
        "[model]\nprovider = \"{provider}\"\nmodel_id = \"{model_id}\"\napi_key = \"{key}\"\n"
    );
    Ok(toml::from_str(&toml_str)?)
}

async fn run_ask(
    config: &AppConfig,
    pipeline: PipelineKind,
    question: &str,
    sql: Option<String>,
    vars: Option<String>,
    db: Option<PathBuf>,
    notes: Option<String>,
) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(trellis_llm::RetryingClient::new(
        trellis_llm::create_client(&config.model),
        config.model.transport_retry.clone().unwrap_or_default(),
    ));

    let db_path = db.unwrap_or_else(|| config.database_path());
    let connection = ConnectionId::new(&config.database.connection);
    let executor = Arc::new(SqliteExecutor::open(connection.clone(), &db_path)?);
    let schemas = Arc::new(SchemaCache::open(&db_path)?);

    let policy = RetryPolicy {
        max_attempts: config.retry.max_attempts,
        max_review_restarts: config.retry.max_review_restarts,
    };

    match pipeline {
        PipelineKind::Text2sql => {
            let workflow = SqlPipeline::new(llm, executor, schemas, policy);
            let report = workflow.run(question, connection, notes).await?;
            print_sql_report(&report)
        }
        PipelineKind::Causal => {
            let precomputed = match (sql, vars) {
                (Some(sql), Some(vars)) => {
                    let parsed: CausalQuery = serde_json::from_str(&vars)?;
                    Some((sql, parsed))
                }
                (Some(_), None) => {
                    anyhow::bail!("--sql requires --vars with the causal variable selection")
                }
                _ => None,
            };
            let workflow =
                CausalPipeline::new(llm, executor, schemas, Arc::new(BaselineEngine), policy);
            let report = workflow.run(question, connection, precomputed).await?;
            print_causal_report(&report)
        }
    }
}

fn print_sql_report(report: &RunReport<trellis_pipelines::SqlTaskState>) -> anyhow::Result<()> {
    if let Some(e) = report.error() {
        eprintln!("Run failed: {e}");
        eprintln!(
            "  last SQL: {}",
            report.state.candidate_sql.as_deref().unwrap_or("(none)")
        );
        eprintln!("  attempts: {}", report.state.retry.attempts);
        anyhow::bail!("workflow ended fatally");
    }

    let output = report
        .state
        .output
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("run succeeded but produced no output"))?;

    if let Some(sql) = &output.sql {
        println!("SQL: {sql}");
    }
    println!("{}", output.columns.join("\t"));
    for row in &output.rows {
        let cells: Vec<String> = row.iter().map(render_value).collect();
        println!("{}", cells.join("\t"));
    }
    if let Some(note) = &output.review_note {
        println!("\nNote: {note}");
    }
    Ok(())
}

fn print_causal_report(
    report: &RunReport<trellis_pipelines::CausalTaskState>,
) -> anyhow::Result<()> {
    if let Some(e) = report.error() {
        eprintln!("Run failed: {e}");
        eprintln!(
            "  last SQL: {}",
            report.state.sql_query.as_deref().unwrap_or("(none)")
        );
        eprintln!("  attempts: {}", report.state.retry.attempts);
        anyhow::bail!("workflow ended fatally");
    }

    if let Some(estimate) = &report.state.estimate {
        println!(
            "Effect estimate: {:.4} ({}, n={})",
            estimate.value, estimate.estimator, estimate.sample_size
        );
        if let Some(refutation) = &estimate.refutation {
            println!("Refutation: {refutation}");
        }
    }
    if let Some(answer) = &report.state.answer {
        println!("\n{answer}");
    }
    Ok(())
}

fn render_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
