//! Sample payloads shared by test suites.

use callstream_core::{IngestRequest, ObjectMetadata, RecognitionConfig, Transcript, Utterance};

/// Recognizer path used by [`ingest_request`].
pub const RECOGNIZER_PATH: &str = "projects/test-project/locations/us-central1/recognizers/_";

/// Two-channel telephony recognition settings.
#[must_use]
pub fn recognition_config() -> RecognitionConfig {
    RecognitionConfig {
        language_code: "en-US".into(),
        model: "telephony".into(),
        enable_diarization: true,
        min_speakers: 2,
        max_speakers: 2,
        audio_channel_count: 2,
    }
}

/// A short agent/customer exchange; the customer reads out a phone number.
#[must_use]
pub fn sample_transcript(source_uri: &str) -> Transcript {
    let utterance = |channel: u32, text: &str, start_secs: f64, end_secs: f64| Utterance {
        channel,
        speaker_tag: channel + 1,
        text: text.into(),
        start_secs,
        end_secs,
        confidence: 0.9,
        word_count: text.split_whitespace().count(),
    };
    Transcript {
        source_uri: source_uri.to_string(),
        utterances: vec![
            utterance(1, "thank you for calling how can I help", 0.0, 2.5),
            utterance(0, "my number is 555 0100", 2.8, 4.6),
            utterance(1, "thanks I have found your account", 5.0, 7.2),
        ],
    }
}

/// Metadata for a small WAV object.
#[must_use]
pub fn sample_metadata(key: &str) -> ObjectMetadata {
    ObjectMetadata {
        key: key.to_string(),
        size_bytes: 44,
        content_type: "audio/wav".into(),
        created: None,
        updated: None,
        checksum: None,
    }
}

/// Bulk request covering `files` synthetic audio objects.
#[must_use]
pub fn ingest_request(files: usize) -> IngestRequest {
    IngestRequest {
        object_uris: (0..files)
            .map(|i| format!("mem://calls/merged_{i}.wav"))
            .collect(),
        recognizer: RECOGNIZER_PATH.to_string(),
        language_code: "en-US".into(),
        agent_id: "agent-001".into(),
        customer_id: "customer-001".into(),
        agent_channel: 1,
        customer_channel: 0,
        ttl_days: 365,
    }
}
