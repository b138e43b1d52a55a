//! Lightweight configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! `Settings` is the typed view every binary works from; each section falls
//! back to its defaults when absent.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from an inline TOML document; used by tests and tools.
    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        let config = Self { figment: Figment::new().merge(Toml::string(toml)) };
        config.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        self.figment
            .extract::<Settings>()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))
    }

    fn validate(&self) -> anyhow::Result<()> {
        let settings = self.settings()?;
        if settings.retrieval.default_k == 0 {
            anyhow::bail!("retrieval.default_k must be at least 1");
        }
        if settings.assembler.token_budget == 0 {
            anyhow::bail!("assembler.token_budget must be at least 1");
        }
        if settings.embedding.max_attempts == 0 {
            anyhow::bail!("embedding.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub corpus: CorpusSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub assembler: AssemblerSettings,
    pub session: SessionSettings,
    pub embedding: EmbeddingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub lancedb_dir: String,
    pub table: String,
    pub data_dir: String,
    pub section_labels: Vec<String>,
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            lancedb_dir: "dev_data/lancedb".to_string(),
            table: "chunks".to_string(),
            data_dir: "dev_data/txt".to_string(),
            section_labels: [
                "TITLE:", "SERVINGS:", "COST:", "INGREDIENTS:", "DIRECTIONS:", "NUTRITION:", "FOOD GROUPS:", "SOURCE:",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_chunk_tokens: 2000,
            overlap_tokens: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Fail the whole build.
    Abort,
    /// Leave the offending vector out and keep building.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub path: String,
    pub nprobe: usize,
    pub max_train_points: usize,
    pub kmeans_iterations: usize,
    /// Corpora smaller than `min_points_per_list * 2` get a single exhaustive list.
    pub min_points_per_list: usize,
    pub seed: u64,
    pub on_dimension_mismatch: MismatchPolicy,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            path: "dev_data/index/chunks.ckvx".to_string(),
            nprobe: 8,
            max_train_points: 20_000,
            kmeans_iterations: 20,
            min_points_per_list: 39,
            seed: 42,
            on_dimension_mismatch: MismatchPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_k: usize,
    pub max_explicit_k: usize,
    pub over_fetch_margin: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { default_k: 3, max_explicit_k: 50, over_fetch_margin: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerSettings {
    pub token_budget: usize,
    pub min_fragment_chars: usize,
    pub artifact_marker: String,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self { token_budget: 7000, min_fragment_chars: 200, artifact_marker: "cid:".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub history_window: usize,
    /// Oldest turns beyond this are dropped from the stored session; never below `history_window`.
    pub max_stored_turns: usize,
    pub reset_commands: Vec<String>,
    pub reset_phrases: Vec<String>,
    pub follow_up_cues: Vec<String>,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub system_prompt: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            history_window: 6,
            max_stored_turns: 48,
            reset_commands: owned(&["__reset_chat__"]),
            reset_phrases: owned(&["clear everything", "reset from scratch", "reset conversation"]),
            follow_up_cues: owned(&[
                "compare", "which one", "these", "those", "the second", "that one", "how about", "what about",
            ]),
            input_cost_per_1k: 0.03,
            output_cost_per_1k: 0.06,
            system_prompt: "You are a clear, structured, and helpful assistant. Use the context sections provided \
                            to answer the user's question. If the information is not available, say so clearly."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub dimension: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub batch_size: usize,
    pub tokenizer_path: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { dimension: 384, max_attempts: 4, base_delay_ms: 500, max_delay_ms: 8_000, batch_size: 64, tokenizer_path: None }
    }
}

/// `$VAR`/`${VAR}` and a leading `~` expanded; the result is not canonicalized.
/// Unknown variables leave the input as written.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let raw = input.as_ref();
    let with_env = shellexpand::env(raw).unwrap_or(std::borrow::Cow::Borrowed(raw));
    PathBuf::from(shellexpand::tilde(&with_env).as_ref())
}
