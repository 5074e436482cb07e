//! Assistant memory: todos, notes, reminders, vocabulary and conversation history
//!
//! The controller reads context from a [`Memory`] before each reply and
//! appends both sides of the conversation after it. [`JsonMemory`] keeps
//! everything in a single JSON document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Conversation entries kept on disk
const MAX_HISTORY: usize = 200;

/// A todo item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub done: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A free-form note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A reminder, optionally due at a specific time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Store collaborator consulted by the controller and the tools
#[async_trait]
pub trait Memory: Send + Sync {
    /// Name of the project the user is focused on
    async fn active_project(&self) -> Result<Option<String>>;

    /// Open todos
    async fn todos(&self) -> Result<Vec<Todo>>;

    async fn notes(&self) -> Result<Vec<Note>>;

    /// Reminders not yet done
    async fn active_reminders(&self) -> Result<Vec<Reminder>>;

    /// Custom words the recognizer should know
    async fn vocabulary(&self) -> Result<Vec<String>>;

    /// Repositories the user works in
    async fn repositories(&self) -> Result<Vec<String>>;

    /// Last `n` conversation entries, oldest first
    async fn recent_history(&self, n: usize) -> Result<Vec<HistoryEntry>>;

    async fn append_history(&self, role: Role, text: &str) -> Result<()>;

    async fn add_todo(&self, text: &str) -> Result<Todo>;

    /// Mark a todo done by id or by case-insensitive text match
    async fn complete_todo(&self, id_or_text: &str) -> Result<Option<Todo>>;

    async fn add_note(&self, text: &str) -> Result<Note>;

    async fn add_reminder(&self, text: &str, due: Option<DateTime<Utc>>) -> Result<Reminder>;

    /// Returns `false` if the word was already known
    async fn add_vocabulary_word(&self, word: &str) -> Result<bool>;
}

/// On-disk layout of [`JsonMemory`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDocument {
    pub active_project: Option<String>,
    pub todos: Vec<Todo>,
    pub notes: Vec<Note>,
    pub reminders: Vec<Reminder>,
    pub vocabulary: Vec<String>,
    pub repositories: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

/// Memory persisted as one JSON file
pub struct JsonMemory {
    path: PathBuf,
    doc: Mutex<MemoryDocument>,
}

impl JsonMemory {
    /// Open the store at `path`, starting empty if the file doesn't exist
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Memory(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no memory file yet, starting empty");
                MemoryDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            todos = doc.todos.len(),
            history = doc.history.len(),
            "memory loaded"
        );

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Open `memory.json` inside `data_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub async fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(data_dir.join("memory.json")).await
    }

    /// Copy of the current document
    pub async fn snapshot(&self) -> MemoryDocument {
        self.doc.lock().await.clone()
    }

    /// Write via a temp file and rename so a crash never leaves half a file
    async fn save(&self, doc: &MemoryDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Memory for JsonMemory {
    async fn active_project(&self) -> Result<Option<String>> {
        Ok(self.doc.lock().await.active_project.clone())
    }

    async fn todos(&self) -> Result<Vec<Todo>> {
        let doc = self.doc.lock().await;
        Ok(doc.todos.iter().filter(|t| !t.done).cloned().collect())
    }

    async fn notes(&self) -> Result<Vec<Note>> {
        Ok(self.doc.lock().await.notes.clone())
    }

    async fn active_reminders(&self) -> Result<Vec<Reminder>> {
        let doc = self.doc.lock().await;
        Ok(doc.reminders.iter().filter(|r| !r.done).cloned().collect())
    }

    async fn vocabulary(&self) -> Result<Vec<String>> {
        Ok(self.doc.lock().await.vocabulary.clone())
    }

    async fn repositories(&self) -> Result<Vec<String>> {
        Ok(self.doc.lock().await.repositories.clone())
    }

    async fn recent_history(&self, n: usize) -> Result<Vec<HistoryEntry>> {
        let doc = self.doc.lock().await;
        let skip = doc.history.len().saturating_sub(n);
        Ok(doc.history[skip..].to_vec())
    }

    async fn append_history(&self, role: Role, text: &str) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.history.push(HistoryEntry {
            role,
            text: text.to_string(),
            at: Utc::now(),
        });
        let excess = doc.history.len().saturating_sub(MAX_HISTORY);
        doc.history.drain(..excess);
        self.save(&doc).await
    }

    async fn add_todo(&self, text: &str) -> Result<Todo> {
        let todo = Todo {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.trim().to_string(),
            done: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut doc = self.doc.lock().await;
        doc.todos.push(todo.clone());
        self.save(&doc).await?;
        Ok(todo)
    }

    async fn complete_todo(&self, id_or_text: &str) -> Result<Option<Todo>> {
        let needle = id_or_text.trim().to_lowercase();
        let mut doc = self.doc.lock().await;

        let Some(todo) = doc
            .todos
            .iter_mut()
            .filter(|t| !t.done)
            .find(|t| t.id == id_or_text || t.text.to_lowercase().contains(&needle))
        else {
            return Ok(None);
        };
        todo.done = true;
        todo.completed_at = Some(Utc::now());
        let todo = todo.clone();

        self.save(&doc).await?;
        Ok(Some(todo))
    }

    async fn add_note(&self, text: &str) -> Result<Note> {
        let note = Note {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.trim().to_string(),
            created_at: Utc::now(),
        };
        let mut doc = self.doc.lock().await;
        doc.notes.push(note.clone());
        self.save(&doc).await?;
        Ok(note)
    }

    async fn add_reminder(&self, text: &str, due: Option<DateTime<Utc>>) -> Result<Reminder> {
        let reminder = Reminder {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.trim().to_string(),
            due,
            done: false,
            created_at: Utc::now(),
        };
        let mut doc = self.doc.lock().await;
        doc.reminders.push(reminder.clone());
        self.save(&doc).await?;
        Ok(reminder)
    }

    async fn add_vocabulary_word(&self, word: &str) -> Result<bool> {
        let word = word.trim();
        if word.is_empty() {
            return Err(Error::Memory("empty vocabulary word".to_string()));
        }

        let mut doc = self.doc.lock().await;
        if doc.vocabulary.iter().any(|w| w.eq_ignore_ascii_case(word)) {
            return Ok(false);
        }
        doc.vocabulary.push(word.to_string());
        self.save(&doc).await?;
        Ok(true)
    }
}
