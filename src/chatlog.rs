use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dispatcher::ReplySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub role: Role,
    pub message: String,
    pub timestamp: String,
    #[serde(rename = "userQuery", default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ReplySource>,
}

impl LogEntry {
    pub fn user(message: &str) -> Self {
        Self {
            role: Role::User,
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            user_query: None,
            source: None,
        }
    }

    pub fn assistant(message: &str, user_query: &str, source: ReplySource) -> Self {
        Self {
            role: Role::Assistant,
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            user_query: Some(user_query.to_string()),
            source: Some(source),
        }
    }
}

/// Bounded exchange log. Recording is best-effort telemetry: storage
/// failures are debug-logged and swallowed, never surfaced to the chat
/// flow. Oldest entries are evicted first once the cap is reached.
pub struct ChatLog {
    entries: VecDeque<LogEntry>,
    cap: usize,
    path: Option<PathBuf>,
}

impl ChatLog {
    /// Open the log backed by a file, loading whatever is already there.
    /// A missing or corrupt file yields an empty log.
    pub fn open(path: PathBuf, cap: usize) -> Self {
        let mut entries: VecDeque<LogEntry> = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<LogEntry>>(&content) {
                Ok(list) => list.into(),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "unreadable chat log, starting empty");
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };
        while entries.len() > cap {
            entries.pop_front();
        }
        Self {
            entries,
            cap,
            path: Some(path),
        }
    }

    pub fn in_memory(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
            path: None,
        }
    }

    /// Default location under the platform data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("coursebot").join("chat_logs.json"))
    }

    pub fn record(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        self.save();
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Write the full log as a dated, pretty-printed JSON file and return
    /// its path.
    pub fn export(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let name = format!("chat_logs_{}.json", Utc::now().format("%Y-%m-%d"));
        let target = dir.join(name);
        let list: Vec<&LogEntry> = self.entries.iter().collect();
        fs::write(&target, serde_json::to_string_pretty(&list)?)?;
        Ok(target)
    }

    /// Drop every entry. Confirmation is the caller's job.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let list: Vec<&LogEntry> = self.entries.iter().collect();
            fs::write(path, serde_json::to_string_pretty(&list)?)?;
            Ok(())
        })();
        if let Err(err) = result {
            tracing::debug!(path = %path.display(), error = %err, "failed to persist chat log");
        }
    }
}
