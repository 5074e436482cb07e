//! Capture artifact validation

use std::path::Path;
use std::time::Duration;

/// Shortest utterance worth transcribing
const MIN_DURATION: Duration = Duration::from_millis(300);

/// Result of inspecting a capture file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Usable audio
    Ready(Vec<u8>),
    /// Missing, truncated, corrupt or too short to bother transcribing
    TooShort { bytes: u64 },
}

/// Read the capture file if it holds a usable recording
///
/// Validation never fails: anything unusable is [`Capture::TooShort`], so a
/// bad capture is a quiet no-op rather than an error. Non-WAV audio passes on
/// size alone.
pub async fn inspect_capture(path: &Path, min_bytes: u64) -> Capture {
    let bytes = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "capture file missing");
            return Capture::TooShort { bytes: 0 };
        }
    };
    if bytes < min_bytes {
        tracing::info!(bytes, min_bytes, "recording too short");
        return Capture::TooShort { bytes };
    }

    let audio = match tokio::fs::read(path).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read capture file");
            return Capture::TooShort { bytes };
        }
    };

    if audio.starts_with(b"RIFF") {
        match wav_duration(&audio) {
            Ok(duration) if duration < MIN_DURATION => {
                tracing::info!(ms = duration.as_millis(), "recording too short");
                return Capture::TooShort { bytes };
            }
            Ok(duration) => tracing::debug!(ms = duration.as_millis(), bytes, "capture ready"),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt capture file");
                return Capture::TooShort { bytes };
            }
        }
    }

    Capture::Ready(audio)
}

fn wav_duration(audio: &[u8]) -> crate::Result<Duration> {
    let reader = hound::WavReader::new(std::io::Cursor::new(audio))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(crate::Error::Audio("zero sample rate".to_string()));
    }
    let frames = u64::from(reader.duration());
    Ok(Duration::from_millis(frames * 1000 / u64::from(spec.sample_rate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..samples {
            writer.write_sample(i16::try_from(i % 100).unwrap()).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_too_short() {
        let capture = inspect_capture(Path::new("/nonexistent/command.wav"), 1000).await;
        assert_eq!(capture, Capture::TooShort { bytes: 0 });
    }

    #[tokio::test]
    async fn test_small_file_is_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command.wav");
        std::fs::write(&path, vec![0u8; 200]).unwrap();

        assert_eq!(inspect_capture(&path, 1000).await, Capture::TooShort { bytes: 200 });
    }

    #[tokio::test]
    async fn test_valid_wav_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command.wav");
        write_wav(&path, 16_000);

        assert!(matches!(inspect_capture(&path, 1000).await, Capture::Ready(_)));
    }

    #[tokio::test]
    async fn test_brief_wav_is_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command.wav");
        // 0.1 s at 16 kHz, still over 1000 bytes
        write_wav(&path, 1600);

        assert!(matches!(inspect_capture(&path, 1000).await, Capture::TooShort { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_wav_is_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command.wav");
        let mut bytes = b"RIFF".to_vec();
        bytes.extend(vec![0xFFu8; 2000]);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(inspect_capture(&path, 1000).await, Capture::TooShort { .. }));
    }
}
