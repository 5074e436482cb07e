//! Built-in tools

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, parse_args};
use crate::{Error, Result};

/// Current local date and time
pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &'static str {
        "get_current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current local date and time."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: &str, _ctx: &ToolContext) -> Result<Value> {
        let now = Local::now();
        Ok(json!({
            "iso": now.to_rfc3339(),
            "display": now.format("%-I:%M %p, %A %B %-d %Y").to_string(),
        }))
    }
}

#[derive(Deserialize)]
struct TextArgs {
    text: String,
}

fn text_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "description": description }
        },
        "required": ["text"]
    })
}

/// Add an item to the todo list
pub struct AddTodo;

#[async_trait]
impl Tool for AddTodo {
    fn name(&self) -> &'static str {
        "add_todo"
    }

    fn description(&self) -> &'static str {
        "Add an item to the user's todo list."
    }

    fn parameters(&self) -> Value {
        text_schema("What needs to be done")
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: TextArgs = parse_args(self.name(), arguments)?;
        let todo = ctx.memory.add_todo(&args.text).await?;
        Ok(json!({ "status": "added", "id": todo.id, "text": todo.text }))
    }
}

/// Mark a todo as done
pub struct CompleteTodo;

#[async_trait]
impl Tool for CompleteTodo {
    fn name(&self) -> &'static str {
        "complete_todo"
    }

    fn description(&self) -> &'static str {
        "Mark a todo as done, by id or by part of its text."
    }

    fn parameters(&self) -> Value {
        text_schema("Todo id or words from the todo")
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: TextArgs = parse_args(self.name(), arguments)?;
        Ok(match ctx.memory.complete_todo(&args.text).await? {
            Some(todo) => json!({ "status": "completed", "id": todo.id, "text": todo.text }),
            None => json!({ "status": "not_found", "query": args.text }),
        })
    }
}

/// Save a note
pub struct AddNote;

#[async_trait]
impl Tool for AddNote {
    fn name(&self) -> &'static str {
        "add_note"
    }

    fn description(&self) -> &'static str {
        "Save a note for later."
    }

    fn parameters(&self) -> Value {
        text_schema("The note")
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: TextArgs = parse_args(self.name(), arguments)?;
        let note = ctx.memory.add_note(&args.text).await?;
        Ok(json!({ "status": "saved", "id": note.id }))
    }
}

/// Schedule a reminder
pub struct AddReminder;

#[derive(Deserialize)]
struct ReminderArgs {
    text: String,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    in_minutes: Option<i64>,
}

#[async_trait]
impl Tool for AddReminder {
    fn name(&self) -> &'static str {
        "add_reminder"
    }

    fn description(&self) -> &'static str {
        "Create a reminder, optionally due at a time (RFC 3339) or in some minutes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "What to be reminded about" },
                "due": { "type": "string", "description": "Due time, RFC 3339" },
                "in_minutes": { "type": "integer", "description": "Due this many minutes from now" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: ReminderArgs = parse_args(self.name(), arguments)?;

        let due = match (args.due.as_deref(), args.in_minutes) {
            (Some(due), _) => Some(
                DateTime::parse_from_rfc3339(due)
                    .map_err(|e| Error::Tool(format!("add_reminder: invalid due time: {e}")))?
                    .with_timezone(&Utc),
            ),
            (None, Some(minutes)) => {
                let delta = Duration::try_minutes(minutes)
                    .ok_or_else(|| Error::Tool("add_reminder: in_minutes out of range".to_string()))?;
                Some(Utc::now() + delta)
            }
            (None, None) => None,
        };

        let reminder = ctx.memory.add_reminder(&args.text, due).await?;
        Ok(json!({
            "status": "scheduled",
            "id": reminder.id,
            "due": reminder.due.map(|d| d.to_rfc3339()),
        }))
    }
}

/// Teach the recognizer a word
pub struct AddVocabularyWord;

#[derive(Deserialize)]
struct WordArgs {
    word: String,
}

#[async_trait]
impl Tool for AddVocabularyWord {
    fn name(&self) -> &'static str {
        "add_vocabulary_word"
    }

    fn description(&self) -> &'static str {
        "Add a word or name the speech recognizer keeps getting wrong."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "word": { "type": "string", "description": "Correct spelling" }
            },
            "required": ["word"]
        })
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: WordArgs = parse_args(self.name(), arguments)?;
        let status = if ctx.memory.add_vocabulary_word(&args.word).await? {
            "added"
        } else {
            "already_known"
        };
        Ok(json!({
            "status": status,
            "word": args.word,
        }))
    }
}

/// Switch the capture microphone
pub struct SetMicrophone;

#[derive(Deserialize)]
struct MicrophoneArgs {
    index: u32,
}

#[async_trait]
impl Tool for SetMicrophone {
    fn name(&self) -> &'static str {
        "set_microphone"
    }

    fn description(&self) -> &'static str {
        "Switch to another microphone by device index. Restarts listening."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer", "minimum": 0, "description": "Device index" }
            },
            "required": ["index"]
        })
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: MicrophoneArgs = parse_args(self.name(), arguments)?;
        ctx.control()?.update_microphone(args.index).await?;
        Ok(json!({ "status": "switched", "index": args.index }))
    }
}

/// Mute or unmute wake word handling
pub struct SetMuted;

#[derive(Deserialize)]
struct MutedArgs {
    muted: bool,
}

#[async_trait]
impl Tool for SetMuted {
    fn name(&self) -> &'static str {
        "set_muted"
    }

    fn description(&self) -> &'static str {
        "Stop or resume reacting to the wake word."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "muted": { "type": "boolean" }
            },
            "required": ["muted"]
        })
    }

    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<Value> {
        let args: MutedArgs = parse_args(self.name(), arguments)?;
        ctx.control()?.set_muted(args.muted);
        Ok(json!({ "status": "ok", "muted": args.muted }))
    }
}
