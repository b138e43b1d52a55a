use std::path::Path;

use chunkctx_core::config::EmbeddingSettings;
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::TokenCounter;
use tokenizers::Tokenizer;
use tracing::info;

/// Counts tokens with a `tokenizer.json` loaded through `tokenizers`.
pub struct TokenizerCounter {
    tokenizer: Tokenizer,
}

impl TokenizerCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| Error::InvalidConfig(format!("Failed to load tokenizer from {}: {}", path.display(), e)))?;
        Ok(Self { tokenizer })
    }
}

impl TokenCounter for TokenizerCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(enc) => enc.get_ids().len(),
            Err(_) => HeuristicTokenCounter.count(text),
        }
    }
}

/// Roughly 0.75 words per token, the usual ratio for English prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f32 / 0.75).ceil() as usize
    }
}

/// Tokenizer-backed counter when `tokenizer_path` is set, heuristic otherwise.
pub fn counter_from_settings(settings: &EmbeddingSettings) -> Result<Box<dyn TokenCounter>> {
    match settings.tokenizer_path.as_deref() {
        Some(path) => {
            let path = chunkctx_core::config::expand_path(path);
            info!(path = %path.display(), "loading tokenizer");
            Ok(Box::new(TokenizerCounter::from_file(&path)?))
        }
        None => Ok(Box::new(HeuristicTokenCounter)),
    }
}
