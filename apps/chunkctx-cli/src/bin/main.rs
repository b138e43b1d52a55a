use std::env;
use std::path::PathBuf;

use chunkctx_cli::{init_tracing, load_settings, open_pipeline, print_outcome};
use chunkctx_context::SessionState;
use chunkctx_core::config::expand_path;
use chunkctx_core::data_processor::{ChunkingConfig, DataProcessor};
use chunkctx_core::traits::Embedder;
use chunkctx_embed::{counter_from_settings, get_default_embedder};
use chunkctx_vector::{build_from_store, IvfParams, LanceCorpus};

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {} <ingest [dir] [--limit N] [--no-embed] | backfill [--limit N] | index [--rebuild] | query \"<text>\" [--budget N] | stats>", prog);
    std::process::exit(1);
}

fn parse_args() -> (String, String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        usage(&prog);
    }
    let cmd = args.remove(0);
    (prog, cmd, args)
}

/// Value following `flag`, parsed as a number.
fn numeric_flag(prog: &str, args: &[String], flag: &str) -> Option<usize> {
    let pos = args.iter().position(|a| a == flag)?;
    match args.get(pos + 1).and_then(|v| v.parse::<usize>().ok()) {
        Some(n) => Some(n),
        None => {
            eprintln!("Error: {} requires a number", flag);
            usage(prog)
        }
    }
}

fn positional(args: &[String]) -> Option<&String> {
    let mut skip_next = false;
    for a in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if a == "--limit" || a == "--budget" {
            skip_next = true;
            continue;
        }
        if !a.starts_with("--") {
            return Some(a);
        }
    }
    None
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = load_settings()?;
    let (prog, cmd, args) = parse_args();
    match cmd.as_str() {
        "ingest" => {
            let data_dir = positional(&args).map(PathBuf::from).unwrap_or_else(|| expand_path(&settings.corpus.data_dir));
            let limit = numeric_flag(&prog, &args, "--limit");
            println!("Ingesting from {}", data_dir.display());

            let counter = counter_from_settings(&settings.embedding)?;
            let chunking = ChunkingConfig {
                max_tokens: settings.corpus.max_chunk_tokens,
                overlap_tokens: settings.corpus.overlap_tokens,
                section_labels: settings.corpus.section_labels.clone(),
            };
            let processor = DataProcessor::new(chunking, counter.as_ref());
            let chunks = match limit {
                Some(n) => processor.process_directory_limited(&data_dir, n)?,
                None => processor.process_directory(&data_dir)?,
            };

            let corpus = LanceCorpus::from_settings(&settings)?;
            let embedder = get_default_embedder(&settings.embedding)?;
            let embedder: Option<&dyn Embedder> = if args.iter().any(|a| a == "--no-embed") { None } else { Some(&embedder) };
            let report = corpus.insert_chunks(&chunks, embedder, settings.embedding.batch_size)?;
            println!("✅ Ingest complete: {} new, {} duplicate", report.inserted, report.duplicates);
            if report.pending_embedding > 0 {
                println!("⚠️  {} chunk(s) stored without vectors; run `{} backfill`", report.pending_embedding, prog);
            }
        }
        "backfill" => {
            let corpus = LanceCorpus::from_settings(&settings)?;
            let embedder = get_default_embedder(&settings.embedding)?;
            let report = corpus.backfill_embeddings(&embedder, settings.embedding.batch_size, numeric_flag(&prog, &args, "--limit"))?;
            println!("✅ Backfill: {} embedded, {} failed", report.embedded, report.failed);
        }
        "index" => {
            if args.iter().any(|a| a == "--rebuild") {
                let corpus = LanceCorpus::from_settings(&settings)?;
                let index = build_from_store(&corpus, &IvfParams::from_settings(&settings.index))?;
                let path = expand_path(&settings.index.path);
                index.save(&path)?;
                println!("✅ Rebuilt index: {} vectors in {} lists -> {}", index.len(), index.nlist(), path.display());
            } else {
                let pipeline = open_pipeline(&settings)?;
                let index = pipeline.retrieval().index();
                println!("✅ Index ready: {} vectors, dim {}, {} lists", index.len(), index.dim(), index.nlist());
            }
        }
        "query" => {
            let Some(query) = positional(&args).cloned() else { usage(&prog) };
            let pipeline = open_pipeline(&settings)?;
            let budget = numeric_flag(&prog, &args, "--budget").unwrap_or_else(|| pipeline.default_token_budget());
            let embedder = get_default_embedder(&settings.embedding)?;
            let outcome = pipeline.answer(&query, &embedder, budget, SessionState::new())?;
            print_outcome(&outcome);
        }
        "stats" => {
            let corpus = LanceCorpus::from_settings(&settings)?;
            println!("📊 Table '{}': {} live chunks, {} embedded, {} pending", corpus.table_name(), corpus.count_live()?, corpus.count_embedded()?, corpus.pending_ids()?.len());
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            usage(&prog);
        }
    }
    Ok(())
}
