use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in course knowledge base, embedded at compile time.
const BUILTIN_ENTRIES: &str = include_str!("../data/knowledge_base.json");

/// Minimum score a message must reach before an entry counts as a match.
pub const MATCH_THRESHOLD: u32 = 2;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KnowledgeEntry {
    pub keywords: Vec<String>,
    pub question: String,
    pub answer: String,
}

/// A scored hit against the knowledge base.
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub entry: &'a KnowledgeEntry,
    pub score: u32,
}

pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    /// Load the embedded entries. The built-in file is validated like any
    /// other input so a bad edit fails at startup, not mid-conversation.
    pub fn builtin() -> Result<Self> {
        let entries: Vec<KnowledgeEntry> = serde_json::from_str(BUILTIN_ENTRIES)?;
        Self::from_entries(entries)
    }

    /// Load entries from a user-provided JSON file (config override).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<KnowledgeEntry> = serde_json::from_str(&content)?;
        Self::from_entries(entries)
    }

    pub fn from_entries(mut entries: Vec<KnowledgeEntry>) -> Result<Self> {
        for entry in &mut entries {
            entry.keywords.retain(|k| !k.trim().is_empty());
            if entry.keywords.is_empty() {
                bail!("knowledge entry {:?} has no keywords", entry.question);
            }
            // Keywords are matched against lowercased input, so store them
            // lowercased once instead of lowering per query.
            for keyword in &mut entry.keywords {
                *keyword = keyword.trim().to_lowercase();
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Score a free-text message against every entry and return the best
    /// hit at or above [`MATCH_THRESHOLD`], if any.
    ///
    /// Scoring: each keyword contained in the lowercased message adds
    /// 2 points per word in that keyword, and the first word of the
    /// entry's question label adds 1 more when present. Substring matching
    /// is deliberate, so "pythonic" still hits "python" - broad recall
    /// suits a teaching aid better than precision. Ties keep the
    /// first-seen entry, which makes matching deterministic.
    pub fn best_match(&self, message: &str) -> Option<Match<'_>> {
        let message = message.to_lowercase();
        let mut best: Option<Match<'_>> = None;

        for entry in &self.entries {
            let mut score = 0u32;
            for keyword in &entry.keywords {
                if message.contains(keyword.as_str()) {
                    score += 2 * keyword.split_whitespace().count() as u32;
                }
            }
            if let Some(first_word) = entry.question.split_whitespace().next() {
                if message.contains(&first_word.to_lowercase()) {
                    score += 1;
                }
            }
            if score > best.map_or(0, |m| m.score) {
                best = Some(Match { entry, score });
            }
        }

        best.filter(|m| m.score >= MATCH_THRESHOLD)
    }
}
