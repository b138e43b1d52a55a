use std::sync::Arc;

use chunkctx_context::{ContextOrigin, ContextPipeline, SessionState, TurnStatus};
use chunkctx_core::config::Settings;
use chunkctx_core::memory::MemoryCorpus;
use chunkctx_core::traits::{CorpusStore, Embedder};
use chunkctx_core::types::NewChunk;
use chunkctx_embed::{HashEmbedder, HeuristicTokenCounter};
use chunkctx_vector::{build_from_store, IvfParams, VectorIndex};

const DIM: usize = 64;

fn recipes() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("lentil_soup.txt", vec!["TITLE: Lentil soup", "INGREDIENTS: red lentils onion carrot cumin stock", "DIRECTIONS: simmer lentils until soft"]),
        ("flatbread.txt", vec!["TITLE: Skillet flatbread", "INGREDIENTS: flour water salt oil", "DIRECTIONS: knead flour dough and fry"]),
        ("pickles.txt", vec!["TITLE: Quick pickles", "INGREDIENTS: cucumbers vinegar dill garlic", "DIRECTIONS: pack cucumbers in brine"]),
    ]
}

fn setup() -> anyhow::Result<(ContextPipeline<Arc<VectorIndex>, Arc<MemoryCorpus>>, HashEmbedder)> {
    let embedder = HashEmbedder::new(DIM)?;
    let corpus = Arc::new(MemoryCorpus::new());
    for (source, parts) in recipes() {
        for (i, text) in parts.into_iter().enumerate() {
            let chunk = NewChunk { source_name: source.to_string(), chunk_index: i, text: text.to_string(), token_count: 0 };
            let vector = embedder.embed(text)?;
            corpus.push(chunk, Some(vector))?;
        }
    }
    let index = Arc::new(build_from_store(corpus.as_ref(), &IvfParams::exact())?);
    assert_eq!(index.len(), 9);

    let mut settings = Settings::default();
    settings.embedding.dimension = DIM;
    let pipeline = ContextPipeline::new(index, corpus, Box::new(HeuristicTokenCounter), &settings);
    Ok((pipeline, embedder))
}

#[test]
fn conversation_over_a_small_corpus() -> anyhow::Result<()> {
    let (pipeline, embedder) = setup()?;
    let budget = pipeline.default_token_budget();

    let query = "red lentils cumin soup";
    let first = pipeline.retrieve_and_assemble(query, Some(&embedder.embed(query)?), budget, SessionState::new())?;
    assert_eq!(first.status, TurnStatus::Answered);
    assert_eq!(first.origin, Some(ContextOrigin::FreshRetrieval));
    assert_eq!(first.used_chunks.len(), 3);
    assert_eq!(first.used_chunks[0].source_name, "lentil_soup.txt");
    assert!(first.context_text.contains("red lentils onion carrot cumin stock"));
    let session = pipeline.record_completion(first.session, "Simmer the lentils with cumin.");

    let follow = pipeline.retrieve_and_assemble("which one is quickest", None, budget, session)?;
    assert_eq!(follow.origin, Some(ContextOrigin::SessionFallback));
    assert!(!follow.used_chunks.is_empty());
    let indices: Vec<usize> = follow.used_chunks.iter().map(|c| c.chunk_index).collect();
    let mut sorted = indices.clone();
    sorted.sort();
    assert_eq!(indices, sorted);
    // the earlier exchange is part of the prompt
    assert!(follow.prompt.messages().iter().any(|m| m.content == "Simmer the lentils with cumin."));

    let report = pipeline.usage_report(&follow.session);
    assert!(report.input_tokens > 0 && report.output_tokens > 0);
    assert!(report.estimated_cost > 0.0);

    let reset = pipeline.retrieve_and_assemble("__reset_chat__", None, budget, follow.session)?;
    assert_eq!(reset.status, TurnStatus::Reset);
    assert!(pipeline.usage_report(&reset.session).estimated_cost == 0.0);
    Ok(())
}

#[test]
fn store_ids_line_up_with_index() -> anyhow::Result<()> {
    let (pipeline, embedder) = setup()?;
    let store = pipeline.retrieval().store();
    for id in store.list_embedded_ids()? {
        let chunk = store.get_chunk(id)?.expect("listed id resolves");
        let hit = pipeline.retrieval().retrieve(&embedder.embed(&chunk.text)?, 1)?;
        assert_eq!(hit[0].chunk.id, id);
        assert!(hit[0].distance < 1e-6);
    }
    Ok(())
}
