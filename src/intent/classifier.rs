//! Semantic classifiers: does this transcript read as directed at the assistant?

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::Generator;

/// Scores how likely a transcript is a command or question for the assistant
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Probability in [0, 1]; never fails, degrades to a low score instead
    async fn classify(&self, transcript: &str) -> f32;
}

/// Phrases speech recognizers produce from silence or background noise
const HALLUCINATIONS: &[&str] = &[
    "thank you",
    "thanks for watching",
    "thank you for watching",
    "please subscribe",
    "subtitles by the amara org community",
    "you",
    "bye",
    "music",
    "applause",
];

const INTERROGATIVES: &[&str] = &[
    "what", "what's", "whats", "when", "where", "who", "why", "how", "is", "are", "can", "could",
    "would", "will", "do", "does", "did", "should", "which",
];

const IMPERATIVES: &[&str] = &[
    "add", "remind", "set", "tell", "show", "open", "create", "turn", "play", "stop", "read",
    "check", "find", "start", "mark", "note", "schedule", "switch", "mute", "unmute", "call",
    "send", "make", "give", "list", "delete", "remove", "complete", "cancel", "write",
];

/// Keyword and sentence-shape heuristics; free and instant
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    assistant_name: String,
}

impl HeuristicClassifier {
    #[must_use]
    pub fn new(assistant_name: &str) -> Self {
        Self {
            assistant_name: assistant_name.to_lowercase(),
        }
    }

    /// Synchronous scoring
    #[must_use]
    pub fn score(&self, transcript: &str) -> f32 {
        let lower = transcript.trim().to_lowercase();
        let is_question = lower.ends_with('?');

        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return 0.0;
        }

        let normalized = words.join(" ");
        if HALLUCINATIONS.contains(&normalized.as_str()) {
            return 0.0;
        }

        if !self.assistant_name.is_empty() && words.contains(&self.assistant_name.as_str()) {
            return 1.0;
        }

        // Skip politeness and call-outs before looking at sentence shape
        let mut rest = words.as_slice();
        while let [first, tail @ ..] = rest {
            if matches!(*first, "hey" | "ok" | "okay" | "please" | "so" | "um" | "uh") {
                rest = tail;
            } else {
                break;
            }
        }
        let Some(first) = rest.first() else {
            return 0.05;
        };

        if is_question || INTERROGATIVES.contains(first) {
            return 0.75;
        }
        if IMPERATIVES.contains(first) {
            return 0.75;
        }
        if normalized.contains("remind me") || normalized.contains("tell me") {
            return 0.7;
        }
        if words.len() < 3 {
            return 0.05;
        }
        0.15
    }
}

#[async_trait]
impl IntentClassifier for HeuristicClassifier {
    async fn classify(&self, transcript: &str) -> f32 {
        self.score(transcript)
    }
}

const CLASSIFIER_PROMPT: &str = "You decide whether an overheard utterance is addressed to a voice \
assistant named {name}. Commands, questions and follow-ups to the assistant count as addressed. \
Conversation with other people, TV audio and thinking aloud do not. Reply with only a number \
between 0 and 1: the probability that the utterance is addressed to the assistant.";

/// Asks the language model, falling back to heuristics on any failure
pub struct LlmClassifier {
    generator: Arc<dyn Generator>,
    fallback: HeuristicClassifier,
    timeout: Duration,
    system: String,
}

impl LlmClassifier {
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>, assistant_name: &str, timeout: Duration) -> Self {
        Self {
            generator,
            fallback: HeuristicClassifier::new(assistant_name),
            timeout,
            system: CLASSIFIER_PROMPT.replace("{name}", assistant_name),
        }
    }
}

/// First number in a model reply, clamped to [0, 1]
fn parse_probability(reply: &str) -> Option<f32> {
    reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .find_map(|t| t.parse::<f32>().ok())
        .map(|p| p.clamp(0.0, 1.0))
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, transcript: &str) -> f32 {
        let heuristic = self.fallback.score(transcript);
        // Noise is not worth a model call
        if heuristic <= 0.0 {
            return 0.0;
        }

        let call = self.generator.complete(&self.system, transcript);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => parse_probability(&reply).unwrap_or_else(|| {
                tracing::debug!(reply = %reply, "unparseable classifier reply");
                heuristic
            }),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "intent classification failed");
                heuristic
            }
            Err(_) => {
                tracing::warn!(after = ?self.timeout, "intent classification timed out");
                heuristic
            }
        }
    }
}
