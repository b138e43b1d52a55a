//! Shared wiring for the chunkctx binaries.
use chunkctx_context::{ContextPipeline, TurnOutcome, TurnStatus};
use chunkctx_core::config::{Config, Settings};
use chunkctx_embed::counter_from_settings;
use chunkctx_vector::{open_index, IndexSource, LanceCorpus, VectorIndex};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub type Pipeline = ContextPipeline<VectorIndex, LanceCorpus>;

/// `RUST_LOG` wins; `info` otherwise.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    config.settings()
}

/// Opens the corpus table and the vector index (rebuilding it if stale) and
/// wires them into a pipeline.
pub fn open_pipeline(settings: &Settings) -> anyhow::Result<Pipeline> {
    let corpus = LanceCorpus::from_settings(settings)?;
    let (index, source) = open_index(settings, &corpus)?;
    match &source {
        IndexSource::Loaded => info!(vectors = index.len(), nlist = index.nlist(), "index loaded"),
        IndexSource::Rebuilt(reason) => info!(vectors = index.len(), nlist = index.nlist(), ?reason, "index rebuilt"),
    }
    let counter = counter_from_settings(&settings.embedding)?;
    Ok(ContextPipeline::new(index, corpus, counter, settings))
}

pub fn print_outcome(outcome: &TurnOutcome) {
    match &outcome.status {
        TurnStatus::Reset => {
            println!("🔄 Session reset");
            return;
        }
        TurnStatus::NoRelevantInformation => println!("No relevant information found."),
        TurnStatus::BudgetExceeded { chunk_id, tokens, budget } => {
            println!("⚠️  Top chunk {} needs {} tokens, budget is {}", chunk_id, tokens, budget)
        }
        TurnStatus::Answered => {}
    }
    if let Some(origin) = outcome.origin {
        println!("📚 {} chunk(s) from {:?} (k = {})", outcome.used_chunks.len(), origin, outcome.requested_k);
    }
    for c in &outcome.used_chunks {
        println!("  - {} #{} (row {}, distance {:.4})", c.source_name, c.chunk_index, c.id, c.distance);
    }
    if !outcome.context_text.is_empty() {
        println!("\n{}\n", outcome.context_text);
    }
    println!("🧮 Prompt tokens: {}", outcome.input_tokens);
}
