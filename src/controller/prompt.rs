//! System prompt assembly
//!
//! Context comes from the memory store piece by piece. A piece that fails to
//! load is left out with a warning; the reply is never blocked on it.

use std::future::Future;

use chrono::{DateTime, Local};

use crate::memory::{Memory, Note, Reminder, Todo};

/// Open todos listed in the prompt
const MAX_TODOS: usize = 10;

/// Most recent notes listed in the prompt
const MAX_NOTES: usize = 5;

/// Everything the model is told about the user's world
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub now: DateTime<Local>,
    pub project: Option<String>,
    pub todos: Vec<Todo>,
    pub notes: Vec<Note>,
    pub reminders: Vec<Reminder>,
    pub vocabulary: Vec<String>,
    pub repositories: Vec<String>,
    pub microphone: Option<u32>,
}

async fn degrade<T: Default>(
    piece: &'static str,
    load: impl Future<Output = crate::Result<T>>,
) -> T {
    load.await.unwrap_or_else(|e| {
        tracing::warn!(piece, error = %e, "context unavailable");
        T::default()
    })
}

impl PromptContext {
    /// Load context from memory
    pub async fn gather(memory: &dyn Memory, microphone: Option<u32>) -> Self {
        Self {
            now: Local::now(),
            project: degrade("project", memory.active_project()).await,
            todos: degrade("todos", memory.todos()).await,
            notes: degrade("notes", memory.notes()).await,
            reminders: degrade("reminders", memory.active_reminders()).await,
            vocabulary: degrade("vocabulary", memory.vocabulary()).await,
            repositories: degrade("repositories", memory.repositories()).await,
            microphone,
        }
    }
}

const REPLY_FORMAT: &str = r#"Reply with a single JSON object and nothing else:
{"displayText": "...", "speechText": "...", "expectFollowUp": false}
- displayText: the full answer as it should appear on screen; markdown is fine.
- speechText: what to say aloud. Short, natural sentences without markdown, code, links or lists.
- expectFollowUp: true only when you asked the user a question and are waiting for the answer."#;

/// Build the system prompt for one reply
#[must_use]
pub fn system_prompt(assistant_name: &str, ctx: &PromptContext) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "You are {assistant_name}, a voice assistant. You are heard rather than read, so keep \
         spoken answers brief and conversational. Use the tools to change todos, notes, \
         reminders and settings instead of only claiming you did."
    ));

    sections.push(format!(
        "Current time: {}",
        ctx.now.format("%A, %B %-d %Y, %H:%M (%Z)")
    ));

    if let Some(project) = ctx.project.as_deref().filter(|p| !p.is_empty()) {
        sections.push(format!("Active project: {project}"));
    }

    if !ctx.todos.is_empty() {
        let items: Vec<String> = ctx
            .todos
            .iter()
            .take(MAX_TODOS)
            .map(|t| format!("- {} (id {})", t.text, t.id))
            .collect();
        sections.push(format!("Open todos:\n{}", items.join("\n")));
    }

    if !ctx.reminders.is_empty() {
        let items: Vec<String> = ctx
            .reminders
            .iter()
            .map(|r| match r.due {
                Some(due) => format!(
                    "- {} (due {})",
                    r.text,
                    due.with_timezone(&Local).format("%a %H:%M")
                ),
                None => format!("- {}", r.text),
            })
            .collect();
        sections.push(format!("Reminders:\n{}", items.join("\n")));
    }

    if !ctx.notes.is_empty() {
        let skip = ctx.notes.len().saturating_sub(MAX_NOTES);
        let items: Vec<String> = ctx
            .notes
            .iter()
            .skip(skip)
            .map(|n| format!("- {}", n.text))
            .collect();
        sections.push(format!("Recent notes:\n{}", items.join("\n")));
    }

    if !ctx.repositories.is_empty() {
        sections.push(format!("Known repositories: {}", ctx.repositories.join(", ")));
    }

    if !ctx.vocabulary.is_empty() {
        sections.push(format!(
            "Words the user often says (transcripts may misspell them): {}",
            ctx.vocabulary.join(", ")
        ));
    }

    match ctx.microphone {
        Some(index) => sections.push(format!("Microphone: device {index}")),
        None => sections.push("Microphone: system default".to_string()),
    }

    sections.push(REPLY_FORMAT.to_string());
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn empty_context() -> PromptContext {
        PromptContext {
            now: Local::now(),
            project: None,
            todos: Vec::new(),
            notes: Vec::new(),
            reminders: Vec::new(),
            vocabulary: Vec::new(),
            repositories: Vec::new(),
            microphone: None,
        }
    }

    #[test]
    fn test_minimal_prompt() {
        let prompt = system_prompt("Jarvis", &empty_context());
        assert!(prompt.starts_with("You are Jarvis"));
        assert!(prompt.contains("Current time:"));
        assert!(prompt.contains("system default"));
        assert!(prompt.contains("expectFollowUp"));
        assert!(!prompt.contains("Open todos"));
    }

    #[test]
    fn test_context_sections() {
        let mut ctx = empty_context();
        ctx.project = Some("garden irrigation".to_string());
        ctx.todos.push(Todo {
            id: "t1".to_string(),
            text: "buy milk".to_string(),
            done: false,
            created_at: Utc::now(),
            completed_at: None,
        });
        ctx.vocabulary.push("Kubernetes".to_string());
        ctx.microphone = Some(3);

        let prompt = system_prompt("Jarvis", &ctx);
        assert!(prompt.contains("Active project: garden irrigation"));
        assert!(prompt.contains("- buy milk (id t1)"));
        assert!(prompt.contains("Kubernetes"));
        assert!(prompt.contains("device 3"));
    }

    #[test]
    fn test_only_latest_notes() {
        let mut ctx = empty_context();
        for i in 0..8 {
            ctx.notes.push(Note {
                id: format!("n{i}"),
                text: format!("note {i}"),
                created_at: Utc::now(),
            });
        }
        let prompt = system_prompt("Jarvis", &ctx);
        assert!(!prompt.contains("note 2"));
        assert!(prompt.contains("note 3"));
        assert!(prompt.contains("note 7"));
    }
}
