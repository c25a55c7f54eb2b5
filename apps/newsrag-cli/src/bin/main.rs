use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsrag_core::config::Config;
use newsrag_core::traits::DocumentSource;
use newsrag_pipeline::{EmbedProgress, IngestOutcome, Pipeline, PipelineError};
use newsrag_source::{DirectorySource, WebSource};

#[derive(Parser, Debug)]
#[command(name = "newsrag", about = "Research a topic on the web, then ask questions answered from the collected sources")]
struct Cli {
    /// Overrides `index.dir` from the configuration.
    #[arg(long, global = true, env = "NEWSRAG_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the web for a topic and index the top pages.
    Research {
        topic: String,
        /// Results page to query instead of DuckDuckGo.
        #[arg(long)]
        search_url: Option<String>,
    },
    /// Index every `.txt` file under a directory.
    Ingest { dir: PathBuf },
    /// Answer a question from the indexed sources.
    Ask { question: String },
    /// Show the published index.
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).try_init();
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

fn build_pipeline(index_dir: Option<PathBuf>, pb: Option<ProgressBar>) -> anyhow::Result<Pipeline> {
    let config = Config::load()?;
    let mut settings = config.settings()?;
    if let Some(dir) = index_dir {
        settings.index.dir = dir.to_string_lossy().to_string();
    }
    let mut pipeline = Pipeline::from_settings(settings)?;
    if let Some(pb) = pb {
        pipeline = pipeline.with_progress(Arc::new(move |p: EmbedProgress| {
            pb.set_length(p.total as u64);
            pb.set_position(p.embedded as u64);
        }));
    }
    Ok(pipeline)
}

fn report_ingest(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Indexed { handle, documents, chunks } => {
            println!("✅ Indexed {} documents ({} chunks) as {}", documents, chunks, handle.generation());
            for url in handle.index().sources() {
                println!("   - {}", url);
            }
        }
        IngestOutcome::NoDocuments => println!("No documents found; the existing knowledge base was left unchanged."),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Research { topic, search_url } => {
            let pb = progress_bar();
            let pipeline = build_pipeline(cli.index_dir, Some(pb.clone()))?;
            let mut source = WebSource::new(pipeline.settings().source.clone())?;
            if let Some(url) = search_url {
                source = source.with_search_url(&url)?;
            }
            println!("Researching \"{}\"", topic);
            let outcome = pipeline.research(&source, &topic).await;
            pb.finish_and_clear();
            report_ingest(&outcome?);
        }
        Command::Ingest { dir } => {
            let pb = progress_bar();
            let pipeline = build_pipeline(cli.index_dir, Some(pb.clone()))?;
            println!("Ingesting from {}", dir.display());
            let source = DirectorySource::new(&dir);
            let paths = source.search("").await.with_context(|| format!("listing {}", dir.display()))?;
            let documents = source.fetch(&paths).await?;
            let outcome = pipeline.ingest(documents).await;
            pb.finish_and_clear();
            report_ingest(&outcome?);
        }
        Command::Ask { question } => {
            let pipeline = build_pipeline(cli.index_dir, None)?;
            let record = pipeline.answer(&question).await?;
            println!("{}", record.answer_text);
            if !record.cited_source_urls.is_empty() {
                println!("\nSources:");
                for (i, url) in record.cited_source_urls.iter().enumerate() {
                    println!("  [{}] {}", i + 1, url);
                }
            }
        }
        Command::Status => {
            let pipeline = build_pipeline(cli.index_dir, None)?;
            match pipeline.status()? {
                None => println!("No knowledge base at {}", pipeline.store().root().display()),
                Some(status) => {
                    let m = &status.manifest;
                    println!("Index:      {}", pipeline.store().root().display());
                    println!("Generation: {}", status.generation);
                    println!("Built:      {}", m.built_at.to_rfc3339());
                    println!("Embedder:   {} (d{})", m.embedder_id, m.dimension);
                    println!("Entries:    {}", m.entries);
                    if !status.compatible {
                        println!("⚠️  Built with a different embedder than configured; re-run ingestion.");
                    }
                    println!("Sources:");
                    for url in &m.sources {
                        println!("   - {}", url);
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(failure) => {
                    debug!(stage = %failure.stage, error = %failure, "command failed");
                    eprintln!("Error: {}", failure.user_message());
                    eprintln!("  ({})", failure);
                }
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
