//! Line protocol spoken by the capture and keyboard listener processes
//!
//! Raw pipe reads are first reassembled into whole lines by [`LineBuffer`],
//! then matched into tagged variants. The two steps are independent: the
//! parsers never see a partial line.

/// Reassembles complete lines from arbitrarily split byte chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line it completes
    ///
    /// Carriage returns before the newline are dropped, blank lines are
    /// skipped, and invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush the trailing partial line at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        decode(&rest)
    }

    /// Bytes held back waiting for a newline
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw).trim().to_string();
    (!line.is_empty()).then_some(line)
}

/// A line printed by the capture process
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureLine {
    /// Models loaded, microphone open
    Ready,
    /// Wake word observed with the given confidence
    Detected(f32),
    /// One utterance was written to the capture file
    RecordingComplete,
    /// Always-listening segment captured; carries the wake-word score seen during it
    SpeechSegment(f32),
    /// Diagnostic text
    Debug(String),
    /// Anything else
    Unknown(String),
}

impl CaptureLine {
    /// Parse one complete line
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        match line {
            "READY" => return Self::Ready,
            "RECORDING_COMPLETE" => return Self::RecordingComplete,
            "SPEECH_SEGMENT" => return Self::SpeechSegment(0.0),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("DETECTED:") {
            return parse_score(rest).map_or_else(|| Self::Unknown(line.to_string()), Self::Detected);
        }

        if let Some(rest) = line.strip_prefix("SPEECH_SEGMENT:") {
            return Self::SpeechSegment(parse_score(rest).unwrap_or(0.0));
        }

        if let Some(rest) = line.strip_prefix("DEBUG:") {
            return Self::Debug(rest.trim().to_string());
        }

        Self::Unknown(line.to_string())
    }
}

/// Read the first whitespace-delimited token as a score clamped to [0, 1]
///
/// The capture process annotates scores, e.g. `0.923 (high confidence)`.
fn parse_score(rest: &str) -> Option<f32> {
    let value: f32 = rest.split_whitespace().next()?.parse().ok()?;
    (!value.is_nan()).then(|| value.clamp(0.0, 1.0))
}

/// A command written to the capture process's stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    /// Start recording immediately, without a wake word
    RecordNow,
    /// End the current recording early
    StopRecording,
}

impl CaptureCommand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecordNow => "RECORD_NOW",
            Self::StopRecording => "STOP_RECORDING",
        }
    }
}

/// A line printed by the global hotkey listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboardSignal {
    Ready,
    /// Push-to-talk key went down
    PressStart,
    /// Push-to-talk key released
    PressEnd,
    ToggleOn,
    ToggleOff,
    /// Abandon whatever is in progress
    Cancel,
    Unknown(String),
}

impl KeyboardSignal {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "READY" => Self::Ready,
            "PRESS_START" => Self::PressStart,
            "PRESS_END" => Self::PressEnd,
            "TOGGLE_ON" => Self::ToggleOn,
            "TOGGLE_OFF" => Self::ToggleOff,
            "CANCEL" => Self::Cancel,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Markers of benign library chatter on stderr
const NOISE_MARKERS: &[&str] = &[
    "ALSA lib",
    "jack server",
    "JackShmReadWritePtr",
    "Cannot connect to server socket",
    "tensorflow",
    "oneDNN",
    "absl::",
    "UserWarning",
    "DeprecationWarning",
    "FutureWarning",
    "warnings.warn",
    "pkg_resources",
    "Could not load dynamic library 'libcud",
    "GPU will not be used",
    "onnxruntime",
];

/// Whether a stderr line is known library noise
#[must_use]
pub fn is_noise(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    NOISE_MARKERS
        .iter()
        .any(|marker| lower.contains(&marker.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_lines_join_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"DETEC").is_empty());
        assert!(buf.push(b"TED:0.9").is_empty());
        assert_eq!(buf.push(b"2\nREADY\r\nRECORD"), vec!["DETECTED:0.92", "READY"]);
        assert_eq!(buf.pending_len(), 6);
        assert_eq!(buf.finish().as_deref(), Some("RECORD"));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "DEBUG:café\n".as_bytes();
        let (a, b) = bytes.split_at(10);
        let mut buf = LineBuffer::new();
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["DEBUG:café"]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"\n\r\nREADY\n\n"), vec!["READY"]);
    }

    #[test]
    fn test_parse_capture_lines() {
        assert_eq!(CaptureLine::parse("READY"), CaptureLine::Ready);
        assert_eq!(CaptureLine::parse("RECORDING_COMPLETE"), CaptureLine::RecordingComplete);
        assert_eq!(
            CaptureLine::parse("DETECTED:0.923 (high confidence)"),
            CaptureLine::Detected(0.923)
        );
        assert_eq!(CaptureLine::parse("SPEECH_SEGMENT"), CaptureLine::SpeechSegment(0.0));
        assert_eq!(CaptureLine::parse("SPEECH_SEGMENT:0.7"), CaptureLine::SpeechSegment(0.7));
        assert_eq!(
            CaptureLine::parse("DEBUG: mic level 0.02"),
            CaptureLine::Debug("mic level 0.02".to_string())
        );
    }

    #[test]
    fn test_detected_scores_are_clamped_or_rejected() {
        assert_eq!(CaptureLine::parse("DETECTED:1.4"), CaptureLine::Detected(1.0));
        assert_eq!(CaptureLine::parse("DETECTED:-0.2"), CaptureLine::Detected(0.0));
        assert!(matches!(CaptureLine::parse("DETECTED:abc"), CaptureLine::Unknown(_)));
        assert!(matches!(CaptureLine::parse("DETECTED:NaN"), CaptureLine::Unknown(_)));
        assert!(matches!(CaptureLine::parse("DETECTED:"), CaptureLine::Unknown(_)));
    }

    #[test]
    fn test_unrecognized_line_is_unknown() {
        assert_eq!(
            CaptureLine::parse("Loading model..."),
            CaptureLine::Unknown("Loading model...".to_string())
        );
    }

    #[test]
    fn test_keyboard_signals() {
        assert_eq!(KeyboardSignal::parse("PRESS_START"), KeyboardSignal::PressStart);
        assert_eq!(KeyboardSignal::parse("TOGGLE_OFF\r"), KeyboardSignal::ToggleOff);
        assert_eq!(KeyboardSignal::parse("CANCEL"), KeyboardSignal::Cancel);
        assert!(matches!(KeyboardSignal::parse("F13"), KeyboardSignal::Unknown(_)));
    }

    #[test]
    fn test_noise_filter() {
        assert!(is_noise("ALSA lib pcm.c:2664:(snd_pcm_open_noupdate) Unknown PCM"));
        assert!(is_noise("/site-packages/foo.py:12: UserWarning: something"));
        assert!(!is_noise("Traceback (most recent call last):"));
        assert!(is_noise(
            "Could not find cuda drivers on your machine, GPU will not be used."
        ));
        assert!(!is_noise("RuntimeError: CUDA out of memory. Tried to allocate 2.00 GiB"));
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(CaptureCommand::RecordNow.as_str(), "RECORD_NOW");
        assert_eq!(CaptureCommand::StopRecording.as_str(), "STOP_RECORDING");
    }
}
