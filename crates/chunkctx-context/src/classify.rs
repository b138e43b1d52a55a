//! Lexical query classifier.
//!
//! Reset detection is authoritative. Follow-up detection is only a hint: the
//! pipeline reuses session context when fresh retrieval comes back empty,
//! whatever this classifier says.

use chunkctx_core::config::SessionSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Reset,
    FollowUp,
    NewTopic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: QueryCategory,
    /// 0.0..=1.0
    pub confidence: f32,
    /// The command, phrase or cue that decided the category.
    pub matched: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryClassifier {
    reset_commands: Vec<String>,
    reset_phrases: Vec<String>,
    follow_up_cues: Vec<String>,
}

impl QueryClassifier {
    pub fn new(settings: &SessionSettings) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect()
        };
        Self {
            reset_commands: lower(&settings.reset_commands),
            reset_phrases: lower(&settings.reset_phrases),
            follow_up_cues: lower(&settings.follow_up_cues),
        }
    }

    pub fn classify(&self, query: &str) -> Classification {
        let lowered = query.trim().to_lowercase();
        if let Some(cmd) = self.reset_commands.iter().find(|c| lowered.contains(c.as_str())) {
            return Classification { category: QueryCategory::Reset, confidence: 1.0, matched: Some(cmd.clone()) };
        }
        let words = normalize_words(&lowered);
        if let Some(p) = self.reset_phrases.iter().find(|p| contains_phrase(&words, p)) {
            return Classification { category: QueryCategory::Reset, confidence: 0.9, matched: Some(p.clone()) };
        }
        if let Some(cue) = self.follow_up_cues.iter().find(|c| contains_phrase(&words, c)) {
            return Classification { category: QueryCategory::FollowUp, confidence: 0.6, matched: Some(cue.clone()) };
        }
        Classification { category: QueryCategory::NewTopic, confidence: 0.5, matched: None }
    }
}

/// Lowercase words joined by single spaces and padded, for whole-word matching.
fn normalize_words(lowered: &str) -> String {
    let joined = lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
    format!(" {joined} ")
}

fn contains_phrase(padded_words: &str, phrase: &str) -> bool {
    let needle = normalize_words(phrase);
    !needle.trim().is_empty() && padded_words.contains(&needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> QueryClassifier { QueryClassifier::new(&SessionSettings::default()) }

    #[test]
    fn reset_command_and_phrases() {
        let c = classifier();
        let cmd = c.classify("__RESET_CHAT__");
        assert_eq!((cmd.category, cmd.confidence), (QueryCategory::Reset, 1.0));
        assert_eq!(c.classify("ok, reset conversation please").category, QueryCategory::Reset);
        assert_eq!(c.classify("Clear everything!").confidence, 0.9);
    }

    #[test]
    fn follow_up_cues_match_whole_words() {
        let c = classifier();
        assert_eq!(c.classify("Which one has fewer calories?").category, QueryCategory::FollowUp);
        assert_eq!(c.classify("compare them").matched.as_deref(), Some("compare"));
        // "these" inside "theses" is not a cue
        assert_eq!(c.classify("graduate theses on soup").category, QueryCategory::NewTopic);
        assert_eq!(c.classify("lentil soup recipe").category, QueryCategory::NewTopic);
    }
}
