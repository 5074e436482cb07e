//! Structured assistant replies

use serde::Deserialize;

/// What the assistant says back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    /// Text for the screen (may contain markdown)
    pub display_text: String,
    /// Text for the voice
    pub speech_text: String,
    /// Reopen the microphone after speaking
    pub expect_follow_up: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReply {
    display_text: String,
    #[serde(default)]
    speech_text: Option<String>,
    #[serde(default, alias = "expectsFollowUp")]
    expect_follow_up: bool,
}

impl AssistantReply {
    /// Plain text shown and spoken as-is, no follow-up
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            display_text: text.clone(),
            speech_text: text,
            expect_follow_up: false,
        }
    }

    /// Parse a model's answer
    ///
    /// Accepts bare JSON, a fenced ```json block, or JSON embedded in prose.
    /// Anything else becomes a plain reply of the whole text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        candidates(raw)
            .into_iter()
            .find_map(|candidate| serde_json::from_str::<RawReply>(candidate).ok())
            .map_or_else(
                || {
                    tracing::debug!("reply is not structured, using raw text");
                    Self::plain(raw)
                },
                |reply| {
                    let speech_text = reply
                        .speech_text
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or_else(|| reply.display_text.clone());
                    Self {
                        display_text: reply.display_text,
                        speech_text,
                        expect_follow_up: reply.expect_follow_up,
                    }
                },
            )
    }
}

fn candidates(raw: &str) -> Vec<&str> {
    let mut out = vec![raw];

    if let Some(start) = raw.find("```") {
        let body = &raw[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            out.push(body[..end].trim());
        }
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}'))
        && start < end
    {
        out.push(&raw[start..=end]);
    }

    out
}
