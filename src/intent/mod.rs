//! Intent gate for always-listening mode
//!
//! Decides whether an unprompted speech segment was addressed to the
//! assistant. Signal priority:
//!
//! 1. A wake-word score of at least [`DECISIVE_WAKE_WORD`] responds outright.
//! 2. Otherwise a moderate wake-word score, a fresh wake word, a recent
//!    assistant turn and the transcript's semantic score are blended.
//! 3. The blend is clamped to [0, 1] and compared with the threshold.

mod classifier;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use classifier::{HeuristicClassifier, IntentClassifier, LlmClassifier};

/// Wake-word confidence that settles the decision on its own
pub const DECISIVE_WAKE_WORD: f32 = 0.85;

/// Lower bound of a "moderate" wake-word score
pub const MODERATE_WAKE_WORD: f32 = 0.60;

/// Tunable contributions to the blended confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentWeights {
    /// Added when the segment's wake-word score is moderate
    pub moderate_wake_word: f32,
    /// Added when a wake word fired since the last decision
    pub recent_wake_word: f32,
    /// Added when the assistant spoke within `recency_window`
    pub recent_conversation: f32,
    /// Multiplier on the classifier's probability
    pub semantic: f32,
    pub recency_window: Duration,
}

impl Default for IntentWeights {
    fn default() -> Self {
        Self {
            moderate_wake_word: 0.35,
            recent_wake_word: 0.2,
            recent_conversation: 0.3,
            semantic: 0.9,
            recency_window: Duration::from_secs(120),
        }
    }
}

/// Evidence about one speech segment
#[derive(Debug, Clone)]
pub struct IntentSignals<'a> {
    pub transcript: &'a str,
    /// A wake word fired since the previous decision
    pub wake_word_recent: bool,
    /// Wake-word score measured during the segment
    pub wake_word_confidence: f32,
    /// When the assistant last replied
    pub last_assistant_turn: Option<Instant>,
}

/// Outcome of a decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentDecision {
    pub should_respond: bool,
    pub confidence: f32,
}

/// Blends acoustic, temporal and semantic evidence into respond-or-ignore
pub struct IntentGate {
    threshold: f32,
    weights: IntentWeights,
    classifier: Arc<dyn IntentClassifier>,
}

impl IntentGate {
    #[must_use]
    pub fn new(threshold: f32, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            weights: IntentWeights::default(),
            classifier,
        }
    }

    #[must_use]
    pub const fn with_weights(mut self, weights: IntentWeights) -> Self {
        self.weights = weights;
        self
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Decide whether to respond to a segment
    pub async fn decide(&self, signals: &IntentSignals<'_>) -> IntentDecision {
        let wake = signals.wake_word_confidence;
        if wake >= DECISIVE_WAKE_WORD {
            tracing::debug!(wake, "wake word is decisive");
            return IntentDecision {
                should_respond: true,
                confidence: wake,
            };
        }

        let w = &self.weights;
        let mut confidence = 0.0;

        if wake >= MODERATE_WAKE_WORD {
            confidence += w.moderate_wake_word;
        }
        if signals.wake_word_recent {
            confidence += w.recent_wake_word;
        }
        let conversing = signals
            .last_assistant_turn
            .is_some_and(|at| at.elapsed() <= w.recency_window);
        if conversing {
            confidence += w.recent_conversation;
        }

        let semantic = self.classifier.classify(signals.transcript).await;
        confidence += semantic * w.semantic;

        let confidence = confidence.clamp(0.0, 1.0);
        let should_respond = confidence >= self.threshold;

        tracing::debug!(
            wake,
            recent_wake = signals.wake_word_recent,
            conversing,
            semantic,
            confidence,
            should_respond,
            "intent decided"
        );

        IntentDecision {
            should_respond,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// Classifier with a fixed answer
    struct Fixed(f32);

    #[async_trait]
    impl IntentClassifier for Fixed {
        async fn classify(&self, _transcript: &str) -> f32 {
            self.0
        }
    }

    fn gate(semantic: f32) -> IntentGate {
        IntentGate::new(0.7, Arc::new(Fixed(semantic)))
    }

    fn signals(wake: f32, recent_wake: bool, last: Option<Instant>) -> IntentSignals<'static> {
        IntentSignals {
            transcript: "anything",
            wake_word_recent: recent_wake,
            wake_word_confidence: wake,
            last_assistant_turn: last,
        }
    }

    #[tokio::test]
    async fn test_decisive_wake_word_always_responds() {
        let decision = gate(0.0).decide(&signals(0.90, false, None)).await;
        assert!(decision.should_respond);
    }

    #[tokio::test]
    async fn test_undirected_speech_ignored() {
        let decision = gate(0.1).decide(&signals(0.0, false, None)).await;
        assert!(!decision.should_respond);
        assert!(decision.confidence < 0.7);
    }

    #[tokio::test]
    async fn test_follow_up_question_responds() {
        let decision = gate(0.7)
            .decide(&signals(0.0, false, Some(Instant::now())))
            .await;
        assert!(decision.should_respond);
    }

    #[tokio::test]
    async fn test_stale_conversation_gives_no_boost() {
        let gate = gate(0.7).with_weights(IntentWeights {
            recency_window: Duration::ZERO,
            ..IntentWeights::default()
        });
        let long_ago = Instant::now().checked_sub(Duration::from_secs(1));
        let decision = gate.decide(&signals(0.0, false, long_ago)).await;
        assert!(!decision.should_respond);
    }

    #[tokio::test]
    async fn test_moderate_wake_word_with_command() {
        let decision = gate(0.75).decide(&signals(0.7, false, None)).await;
        assert!(decision.should_respond);

        let decision = gate(0.1).decide(&signals(0.7, false, None)).await;
        assert!(!decision.should_respond);
    }

    #[tokio::test]
    async fn test_addressed_by_name_without_wake_word() {
        let gate = IntentGate::new(0.7, Arc::new(HeuristicClassifier::new("Jarvis")));
        let named = IntentSignals {
            transcript: "Jarvis, what's on my todo list?",
            ..signals(0.0, false, None)
        };
        let decision = gate.decide(&named).await;
        assert!(decision.should_respond, "{decision:?}");

        // A bare question needs another signal
        let question = IntentSignals {
            transcript: "what time is it?",
            ..signals(0.0, false, None)
        };
        assert!(!gate.decide(&question).await.should_respond);
        let follow_up = IntentSignals {
            last_assistant_turn: Some(Instant::now()),
            ..question
        };
        assert!(gate.decide(&follow_up).await.should_respond);
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let decision = gate(1.0)
            .decide(&signals(0.8, true, Some(Instant::now())))
            .await;
        assert!((decision.confidence - 1.0).abs() < f32::EPSILON);
    }
}
