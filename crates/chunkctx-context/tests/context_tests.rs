use std::sync::Mutex;

use chunkctx_context::assembler::format_chunk;
use chunkctx_context::{
    flatten, group_by_document, relevance_order, ContextAssembler, ContextOrigin, ContextPipeline, PromptWindow,
    QueryCategory, RetrievalEngine, SessionPhase, SessionState, TurnStatus,
};
use chunkctx_core::config::{AssemblerSettings, RetrievalSettings, Settings};
use chunkctx_core::error::{Error, Result};
use chunkctx_core::memory::MemoryCorpus;
use chunkctx_core::traits::{Embedder, TokenCounter, VectorSearch};
use chunkctx_embed::{RetryPolicy, RetryingEmbedder};
use chunkctx_core::types::{ChatTurn, Chunk, ChunkId, Neighbor, Role, ScoredChunk};

struct WordCounter;
impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize { text.split_whitespace().count() }
}

/// Returns a fixed neighbor list and records every `k` it was asked for.
struct FixedIndex {
    hits: Vec<Neighbor>,
    asked: Mutex<Vec<usize>>,
}

impl FixedIndex {
    fn new(hits: &[(ChunkId, f32)]) -> Self {
        Self { hits: hits.iter().map(|&(id, distance)| Neighbor { id, distance }).collect(), asked: Mutex::new(Vec::new()) }
    }
}

impl VectorSearch for FixedIndex {
    fn dim(&self) -> usize { 2 }
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != 2 {
            return Err(Error::DimensionMismatch { expected: 2, actual: query.len(), chunk_id: None });
        }
        self.asked.lock().unwrap().push(k);
        Ok(self.hits.iter().take(k).copied().collect())
    }
}

/// Embedding provider that is always rate limited.
struct Unavailable;

impl Embedder for Unavailable {
    fn dim(&self) -> usize { 2 }
    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::TransientProvider("rate limited".into()))
    }
}

/// Always returns the origin, whatever the text.
struct Origin;

impl Embedder for Origin {
    fn dim(&self) -> usize { 2 }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
    }
}

fn chunk(id: ChunkId, source: &str, index: usize, text: &str) -> Chunk {
    Chunk { id, source_name: source.to_string(), chunk_index: index, text: text.to_string(), embedding: None, token_count: 0 }
}

fn scored(id: ChunkId, source: &str, index: usize, distance: f32) -> ScoredChunk {
    ScoredChunk { chunk: chunk(id, source, index, &format!("{source} part {index} text")), distance }
}

fn corpus() -> MemoryCorpus {
    MemoryCorpus::from_chunks(vec![
        chunk(1, "soup.txt", 0, "TITLE: Lentil soup"),
        chunk(2, "soup.txt", 1, "INGREDIENTS: lentils onion carrot stock"),
        chunk(3, "soup.txt", 2, "DIRECTIONS: simmer everything for forty minutes"),
        chunk(4, "bread.txt", 0, "TITLE: Quick bread"),
        chunk(5, "bread.txt", 1, "DIRECTIONS: mix flour water salt and bake"),
    ])
}

fn pipeline(index: FixedIndex) -> ContextPipeline<FixedIndex, MemoryCorpus> {
    ContextPipeline::new(index, corpus(), Box::new(WordCounter), &Settings::default())
}

const Q: &[f32] = &[0.0, 0.0];

fn scenario() -> Vec<ScoredChunk> {
    vec![
        scored(1, "A", 0, 0.1),
        scored(2, "A", 1, 0.5),
        scored(4, "B", 0, 0.05),
        scored(5, "B", 1, 0.9),
        scored(3, "A", 2, 0.3),
    ]
}

#[test]
fn groups_by_best_score_and_orders_chunks_by_distance() {
    let groups = group_by_document(&scenario());
    let names: Vec<&str> = groups.iter().map(|g| g.source_name.as_str()).collect();
    assert_eq!(names, vec!["B", "A"]);
    assert_eq!(groups[0].best_score, 0.05);
    assert_eq!(groups[1].best_score, 0.1);

    let a: Vec<(ChunkId, f32)> = groups[1].chunks.iter().map(|sc| (sc.chunk.id, sc.distance)).collect();
    assert_eq!(a, vec![(1, 0.1), (3, 0.3), (2, 0.5)]);

    let flat: Vec<ChunkId> = flatten(&groups).iter().map(|sc| sc.chunk.id).collect();
    assert_eq!(flat, vec![4, 5, 1, 3, 2]);
    let ranked: Vec<ChunkId> = relevance_order(&groups).iter().map(|sc| sc.chunk.id).collect();
    assert_eq!(ranked, vec![4, 1, 3, 2, 5]);
}

#[test]
fn tight_budget_keeps_the_closest_chunks_across_documents() {
    let groups = group_by_document(&scenario());
    let settings = AssemblerSettings::default();
    let assembler = ContextAssembler::new(&WordCounter, &settings);
    let ranked = relevance_order(&groups);
    let two = WordCounter.count(&format_chunk(&ranked[0])) + WordCounter.count(&format_chunk(&ranked[1]));

    let (origin, ctx) = assembler.assemble_with_fallback(&groups, two, &[]);
    let ctx = ctx.unwrap();
    assert_eq!(origin, ContextOrigin::FreshRetrieval);
    let used: Vec<(ChunkId, f32)> = ctx.used.iter().map(|sc| (sc.chunk.id, sc.distance)).collect();
    assert_eq!(used, vec![(4, 0.05), (1, 0.1)], "0.1 is kept and 0.9 is left out");
}

#[test]
fn grouping_is_deterministic_under_input_permutation() {
    let input = vec![scored(1, "A", 0, 0.2), scored(2, "B", 0, 0.2), scored(3, "C", 3, 0.7), scored(4, "C", 1, 0.01)];
    let mut reversed = input.clone();
    reversed.reverse();
    let first = group_by_document(&input);
    assert_eq!(first, group_by_document(&input));
    assert_eq!(first, group_by_document(&reversed));
    assert!(first.windows(2).all(|w| w[0].best_score <= w[1].best_score));
    assert!(group_by_document(&[]).is_empty());
}

#[test]
fn assembly_never_exceeds_budget() {
    let candidates: Vec<ScoredChunk> = (0..12).map(|i| scored(i, "doc", i as usize, i as f32 * 0.1)).collect();
    let settings = AssemblerSettings::default();
    let assembler = ContextAssembler::new(&WordCounter, &settings);
    for budget in 0..150 {
        match assembler.assemble(&candidates, budget) {
            Ok(ctx) => {
                let sum: usize = ctx.used.iter().map(|sc| WordCounter.count(&format_chunk(sc))).sum();
                assert_eq!(sum, ctx.tokens_used);
                assert!(sum <= budget);
                let ids: Vec<ChunkId> = ctx.used.iter().map(|sc| sc.chunk.id).collect();
                assert_eq!(ids, (0..ids.len() as ChunkId).collect::<Vec<_>>(), "prefix of the ranked list");
            }
            Err(Error::BudgetExceededImmediately { chunk_id, tokens, budget: b }) => {
                assert_eq!((chunk_id, b), (0, budget));
                assert!(tokens > budget);
            }
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn short_artifact_fragments_are_dropped_long_ones_kept() {
    let settings = AssemblerSettings::default();
    let assembler = ContextAssembler::new(&WordCounter, &settings);
    let long_text = format!("{} (cid:12) {}", "real words ".repeat(20), "more real words ".repeat(10));
    let candidates = vec![
        ScoredChunk { chunk: chunk(1, "a", 0, "(cid:3)(cid:4) garbage"), distance: 0.1 },
        ScoredChunk { chunk: chunk(2, "a", 1, "   "), distance: 0.2 },
        ScoredChunk { chunk: chunk(3, "a", 2, &long_text), distance: 0.3 },
        ScoredChunk { chunk: chunk(4, "a", 3, "short clean text"), distance: 0.4 },
    ];
    let ctx = assembler.assemble(&candidates, 10_000).unwrap();
    let ids: Vec<ChunkId> = ctx.used.iter().map(|sc| sc.chunk.id).collect();
    assert_eq!(ids, vec![3, 4]);
    assert_eq!(ctx.filtered_out, 2);
    assert!(ctx.text.starts_with("[Source: a | Row ID: 3 | Chunk: 2 | Score: 0.3000]\n"));
}

#[test]
fn retrieval_over_fetches_and_skips_unresolved_ids() {
    // 90 and 91 are not in the corpus; -1 is index padding.
    let index = FixedIndex::new(&[(90, 0.01), (2, 0.1), (-1, 0.15), (91, 0.2), (5, 0.3), (1, 0.4), (4, 0.5)]);
    let settings = RetrievalSettings { over_fetch_margin: 5, ..RetrievalSettings::default() };
    let engine = RetrievalEngine::new(index, corpus(), settings);

    let found = engine.retrieve(Q, 3).unwrap();
    let ids: Vec<ChunkId> = found.iter().map(|sc| sc.chunk.id).collect();
    assert_eq!(ids, vec![2, 5, 1]);
    assert_eq!(found[0].distance, 0.1);
    assert_eq!(*engine.index().asked.lock().unwrap(), vec![8]);

    assert!(matches!(engine.retrieve(Q, 0), Err(Error::InvalidArgument(_))));
    assert!(matches!(engine.retrieve(&[0.0; 3], 3), Err(Error::DimensionMismatch { .. })));
}

#[test]
fn explicit_count_in_query_widens_retrieval() {
    let index = FixedIndex::new(&[(1, 0.1), (2, 0.2), (3, 0.3), (4, 0.4), (5, 0.5)]);
    let p = pipeline(index);
    let outcome = p.retrieve_and_assemble("show me the top 5 recipes", Some(Q), 7000, SessionState::new()).unwrap();
    assert_eq!(outcome.requested_k, 5);
    assert_eq!(outcome.used_chunks.len(), 5);

    let outcome = p.retrieve_and_assemble("recipes please", Some(Q), 7000, SessionState::new()).unwrap();
    assert_eq!(outcome.requested_k, 3);
    assert_eq!(outcome.used_chunks.len(), 3);
}

#[test]
fn follow_up_with_empty_retrieval_reuses_session_chunks_by_position() {
    let p = pipeline(FixedIndex::new(&[(3, 0.1), (2, 0.4)]));
    let first = p.retrieve_and_assemble("lentil soup", Some(Q), 7000, SessionState::new()).unwrap();
    assert_eq!(first.origin, Some(ContextOrigin::FreshRetrieval));
    assert_eq!(first.session.accumulated_chunks().len(), 2);

    let follow = p.retrieve_and_assemble("what about that one", None, 7000, first.session).unwrap();
    assert_eq!(follow.origin, Some(ContextOrigin::SessionFallback));
    assert_eq!(follow.status, TurnStatus::Answered);
    let order: Vec<(ChunkId, usize)> = follow.used_chunks.iter().map(|c| (c.id, c.chunk_index)).collect();
    assert_eq!(order, vec![(2, 1), (3, 2)], "chunk_index order, not stale score order");
    assert_eq!(follow.session.accumulated_chunks().len(), 2);
}

#[test]
fn follow_up_cue_does_not_override_fresh_results() {
    let p = pipeline(FixedIndex::new(&[(1, 0.3)]));
    let session = p.retrieve_and_assemble("lentil soup", Some(Q), 7000, SessionState::new()).unwrap().session;

    let p = pipeline(FixedIndex::new(&[(4, 0.1), (5, 0.2)]));
    let outcome = p.retrieve_and_assemble("compare these soups", Some(Q), 7000, session).unwrap();
    assert_eq!(outcome.classification.category, QueryCategory::FollowUp);
    assert_eq!(outcome.origin, Some(ContextOrigin::FreshRetrieval));
    let ids: Vec<ChunkId> = outcome.used_chunks.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![4, 5]);
}

#[test]
fn unresolvable_results_count_as_empty_retrieval() {
    let warm = pipeline(FixedIndex::new(&[(4, 0.2)]));
    let session = warm.retrieve_and_assemble("bread", Some(Q), 7000, SessionState::new()).unwrap().session;

    let stale = pipeline(FixedIndex::new(&[(77, 0.1), (78, 0.2)]));
    let outcome = stale.retrieve_and_assemble("and the other", Some(Q), 7000, session).unwrap();
    assert_eq!(outcome.origin, Some(ContextOrigin::SessionFallback));
    assert_eq!(outcome.used_chunks.iter().map(|c| c.id).collect::<Vec<_>>(), vec![4]);
}

#[test]
fn no_relevant_information_is_signalled() {
    let p = pipeline(FixedIndex::new(&[]));
    let outcome = p.retrieve_and_assemble("anything?", Some(Q), 7000, SessionState::new()).unwrap();
    assert_eq!(outcome.status, TurnStatus::NoRelevantInformation);
    assert!(outcome.context_text.is_empty());
    let user = outcome.prompt.messages().last().unwrap();
    assert!(user.content.ends_with("### Relevant Data:\nNo relevant information found."));
    assert_eq!(outcome.session.phase(), SessionPhase::Active);
}

#[test]
fn oversized_top_chunk_returns_empty_context_with_signal() {
    let p = pipeline(FixedIndex::new(&[(2, 0.1)]));
    let outcome = p.retrieve_and_assemble("ingredients", Some(Q), 3, SessionState::new()).unwrap();
    match outcome.status {
        TurnStatus::BudgetExceeded { chunk_id, budget, tokens } => {
            assert_eq!((chunk_id, budget), (2, 3));
            assert!(tokens > 3);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
    assert!(outcome.context_text.is_empty());
    assert!(outcome.used_chunks.is_empty());
}

#[test]
fn accumulated_chunks_stay_unique_and_keep_first_score() {
    let p1 = pipeline(FixedIndex::new(&[(1, 0.3), (2, 0.4)]));
    let p2 = pipeline(FixedIndex::new(&[(2, 0.05), (3, 0.2), (1, 0.9)]));
    let mut session = SessionState::new();
    for round in 0..3 {
        let p = if round % 2 == 0 { &p1 } else { &p2 };
        session = p.retrieve_and_assemble("soup", Some(Q), 7000, session).unwrap().session;
    }
    let ids: Vec<ChunkId> = session.accumulated_chunks().iter().map(|sc| sc.chunk.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let two = session.accumulated_chunks().iter().find(|sc| sc.chunk.id == 2).unwrap();
    assert_eq!(two.distance, 0.4);
    assert_eq!(session.turns(), 3);
}

#[test]
fn reset_clears_chunks_history_and_usage() {
    let p = pipeline(FixedIndex::new(&[(1, 0.1), (4, 0.2)]));
    let turn = p.retrieve_and_assemble("soup and bread", Some(Q), 7000, SessionState::new()).unwrap();
    let session = p.record_completion(turn.session, "Here are two recipes.");
    assert!(!session.usage().is_zero());
    assert!(!session.accumulated_chunks().is_empty());

    let reset = p.retrieve_and_assemble("__RESET_CHAT__", Some(Q), 7000, session).unwrap();
    assert_eq!(reset.status, TurnStatus::Reset);
    assert_eq!(reset.session.phase(), SessionPhase::Reset);
    assert!(reset.session.accumulated_chunks().is_empty());
    assert!(reset.session.history().is_empty());
    assert!(reset.session.usage().is_zero());

    let again = p.retrieve_and_assemble("bread", Some(Q), 7000, reset.session).unwrap();
    assert_eq!(again.session.phase(), SessionPhase::Active);
    assert_eq!(again.session.turns(), 1);

    let cleared = p.reset_session(again.session);
    assert_eq!(cleared.accumulated_chunks().len(), 0);
    assert!(cleared.usage().is_zero());
}

#[test]
fn failed_turn_hands_back_the_untouched_session() {
    let p = pipeline(FixedIndex::new(&[(1, 0.1)]));
    let session = p.retrieve_and_assemble("soup", Some(Q), 7000, SessionState::new()).unwrap().session;
    let before = session.clone();

    let err = p.retrieve_and_assemble("soup again", Some(&[1.0, 2.0, 3.0]), 7000, session).unwrap_err();
    assert!(matches!(err.source, Error::DimensionMismatch { expected: 2, actual: 3, .. }));
    assert_eq!(err.session, before);

    let err = p.retrieve_and_assemble("   ", Some(Q), 7000, err.session).unwrap_err();
    assert!(matches!(err.source, Error::InvalidArgument(_)));
    assert_eq!(err.session, before);
}

#[test]
fn exhausted_embedding_retries_fail_the_turn_without_context() {
    let p = pipeline(FixedIndex::new(&[(1, 0.1), (2, 0.2)]));
    let session = p.answer("lentil soup", &Origin, 7000, SessionState::new()).unwrap().session;
    assert_eq!(session.accumulated_chunks().len(), 2);
    let before = session.clone();

    let flaky = RetryingEmbedder::new(Unavailable, RetryPolicy::immediate(3));
    let err = p.answer("which one is quicker", &flaky, 7000, session).unwrap_err();
    match &err.source {
        Error::ProviderFailed { attempts, message } => {
            assert_eq!(*attempts, 3);
            assert!(message.contains("rate limited"));
        }
        other => panic!("expected ProviderFailed, got {other:?}"),
    }
    assert_eq!(err.session, before);

    // reset never needs the embedder
    let reset = p.answer("__RESET_CHAT__", &flaky, 7000, err.session).unwrap();
    assert_eq!(reset.status, TurnStatus::Reset);
}

#[test]
fn usage_accumulates_and_is_priced() {
    let p = pipeline(FixedIndex::new(&[(1, 0.1)]));
    let turn = p.retrieve_and_assemble("soup", Some(Q), 7000, SessionState::new()).unwrap();
    assert_eq!(turn.input_tokens, turn.prompt.token_count(&WordCounter));
    let session = p.record_completion(turn.session, "one two three four");

    let report = p.usage_report(&session);
    assert_eq!(report.input_tokens, turn.input_tokens as u64);
    assert_eq!(report.output_tokens, 4);
    let expected = turn.input_tokens as f64 / 1000.0 * 0.03 + 4.0 / 1000.0 * 0.06;
    assert!((report.estimated_cost - expected).abs() < 1e-12);
    assert_eq!(session.history().last().map(|t| t.role), Some(Role::Assistant));
}

#[test]
fn prompt_window_keeps_last_turns_and_skips_placeholders() {
    let history = vec![
        ChatTurn::user("q1"),
        ChatTurn::assistant("a1"),
        ChatTurn::user("q2"),
        ChatTurn::assistant("Generating response..."),
        ChatTurn::user("q3"),
        ChatTurn::assistant("a3"),
    ];
    let window = PromptWindow::build("system rules", &history, 4, "q4", "ctx");
    let contents: Vec<&str> = window.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["system rules", "q2", "q3", "a3", "q4\n\n### Relevant Data:\nctx"]);
}

#[test]
fn stored_history_is_capped_to_newest_turns() {
    let mut settings = Settings::default();
    settings.session.history_window = 2;
    settings.session.max_stored_turns = 4;
    let p = ContextPipeline::new(FixedIndex::new(&[(1, 0.1)]), corpus(), Box::new(WordCounter), &settings);

    let mut session = SessionState::new();
    for i in 0..6 {
        let turn = p.retrieve_and_assemble(&format!("question {i}"), Some(Q), 7000, session).unwrap();
        session = p.record_completion(turn.session, &format!("answer {i}"));
    }
    let contents: Vec<&str> = session.history().iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["question 4", "answer 4", "question 5", "answer 5"]);
    assert_eq!(session.turns(), 6);
}

#[test]
fn session_survives_json_round_trip() {
    let p = pipeline(FixedIndex::new(&[(1, 0.1), (5, 0.2)]));
    let session = p.retrieve_and_assemble("soup", Some(Q), 7000, SessionState::new()).unwrap().session;
    let restored = SessionState::from_json(&session.to_json().unwrap()).unwrap();
    assert_eq!(restored, session);
}
