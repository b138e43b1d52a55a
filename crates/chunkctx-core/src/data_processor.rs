//! Splits extracted text files into chunks ready for embedding.
//!
//! Files that use section labels (`TITLE:`, `INGREDIENTS:`, ...) are cut at
//! each label line; files without any label fall back to paragraphs. Pieces
//! larger than `max_tokens` are split again into overlapping word windows.
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::traits::TokenCounter;
use crate::types::NewChunk;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub section_labels: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let settings = crate::config::CorpusSettings::default();
        Self { max_tokens: settings.max_chunk_tokens, overlap_tokens: settings.overlap_tokens, section_labels: settings.section_labels }
    }
}

pub struct DataProcessor<'a> {
    chunking_config: ChunkingConfig,
    counter: &'a dyn TokenCounter,
}

impl<'a> DataProcessor<'a> {
    pub fn new(chunking_config: ChunkingConfig, counter: &'a dyn TokenCounter) -> Self {
        Self { chunking_config, counter }
    }

    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<NewChunk>> {
        self.process_files(data_dir, self.list_txt_files(data_dir))
    }

    pub fn process_directory_limited(&self, data_dir: &Path, limit: usize) -> Result<Vec<NewChunk>> {
        let mut files = self.list_txt_files(data_dir);
        if files.len() > limit {
            files.truncate(limit);
            info!(limit, "limited to first files");
        }
        self.process_files(data_dir, files)
    }

    fn process_files(&self, data_dir: &Path, files: Vec<PathBuf>) -> Result<Vec<NewChunk>> {
        if files.is_empty() {
            info!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(file = %file_path.display(), n = file_index + 1, total = files.len(), "processing file");
            let content = self.read_file_content(file_path)?;
            let source_name = source_name_of(file_path);
            all_chunks.extend(self.chunk_text(&source_name, &content));
        }
        info!(files = files.len(), chunks = all_chunks.len(), "processed directory");
        Ok(all_chunks)
    }

    /// Chunks one document. `chunk_index` restarts at zero for every source.
    pub fn chunk_text(&self, source_name: &str, content: &str) -> Vec<NewChunk> {
        let mut pieces = extract_labeled_sections(content, &self.chunking_config.section_labels);
        if pieces.is_empty() {
            pieces = content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect();
        }

        let mut chunks = Vec::new();
        for piece in pieces {
            let tokens = self.counter.count(&piece);
            if tokens <= self.chunking_config.max_tokens {
                chunks.push((piece, tokens));
            } else {
                for window in self.split_with_overlap(&piece, tokens) {
                    let tokens = self.counter.count(&window);
                    chunks.push((window, tokens));
                }
            }
        }
        chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (text, token_count))| NewChunk { source_name: source_name.to_string(), chunk_index, text, token_count })
            .collect()
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn split_with_overlap(&self, text: &str, tokens: usize) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return vec![];
        }
        let tokens_per_word = (tokens as f64 / words.len() as f64).max(f64::EPSILON);
        let words_per_chunk = ((self.chunking_config.max_tokens as f64 / tokens_per_word) as usize).max(1);
        let overlap_words = ((self.chunking_config.overlap_tokens as f64 / tokens_per_word) as usize).min(words_per_chunk - 1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end >= words.len() {
                break;
            }
            start = end - overlap_words;
        }
        chunks
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("txt") {
                txt_files.push(path.to_path_buf());
            }
        }
        txt_files.sort();
        txt_files
    }
}

fn source_name_of(file_path: &Path) -> String {
    file_path.file_name().map_or_else(|| file_path.to_string_lossy().to_string(), |n| n.to_string_lossy().to_string())
}

/// Cuts `text` at every line that starts with one of `labels`.
///
/// Each section keeps its label line as a heading. A label with no body and
/// any text before the first label are dropped.
pub fn extract_labeled_sections(text: &str, labels: &[String]) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current_label: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let mut flush = |label: &Option<String>, buffer: &mut Vec<&str>| {
        if let Some(label) = label {
            let body = buffer.join("\n");
            if !buffer.is_empty() {
                sections.push(format!("{label}\n{}", body.trim()));
            }
        }
        buffer.clear();
    };

    for line in text.lines() {
        if labels.iter().any(|label| line.starts_with(label.as_str())) {
            flush(&current_label, &mut buffer);
            current_label = Some(line.trim().to_string());
        } else {
            buffer.push(line);
        }
    }
    flush(&current_label, &mut buffer);
    sections
}
