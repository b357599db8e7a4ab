//! Default conversation record builder.

use std::collections::BTreeMap;

use callstream_config::PipelineConfig;
use callstream_core::{
    BackendError, BackendErrorKind, BackendResult, CallMetadata, ConversationFormatter,
    ConversationRecord, ObjectMetadata, ParticipantRole, QualityMetrics, RecordSegment,
    RedactedTranscript, WorkItem,
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Values stamped onto every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterSettings {
    /// BCP-47 language code.
    pub language_code: String,
    /// Days before the backend may delete the record.
    pub ttl_days: u32,
    /// Channel carrying the agent.
    pub agent_channel: u32,
    /// Channel carrying the customer.
    pub customer_channel: u32,
    /// Agent identifier.
    pub agent_id: String,
    /// Customer identifier.
    pub customer_id: String,
}

impl FormatterSettings {
    /// Settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            language_code: config.recognizer.language_code.clone(),
            ttl_days: config.ingest.ttl_days,
            agent_channel: config.ingest.agent_channel,
            customer_channel: config.ingest.customer_channel,
            agent_id: config.ingest.agent_id.clone(),
            customer_id: config.ingest.customer_id.clone(),
        }
    }
}

impl Default for FormatterSettings {
    fn default() -> Self {
        Self {
            language_code: "en-US".into(),
            ttl_days: 365,
            agent_channel: 1,
            customer_channel: 0,
            agent_id: "agent-001".into(),
            customer_id: "customer-001".into(),
        }
    }
}

/// Builds one segment per utterance, ordered by start offset.
pub struct DefaultConversationFormatter {
    settings: FormatterSettings,
}

impl DefaultConversationFormatter {
    /// Formatter stamping records with `settings`.
    #[must_use]
    pub const fn new(settings: FormatterSettings) -> Self {
        Self { settings }
    }

    fn role(&self, channel: u32) -> ParticipantRole {
        if channel == self.settings.agent_channel {
            ParticipantRole::Agent
        } else {
            ParticipantRole::Customer
        }
    }
}

impl ConversationFormatter for DefaultConversationFormatter {
    fn format(
        &self,
        item: &WorkItem,
        redacted: &RedactedTranscript,
        metadata: &ObjectMetadata,
        now: DateTime<Utc>,
    ) -> BackendResult<ConversationRecord> {
        let transcript = &redacted.transcript;
        let mut segments: Vec<RecordSegment> = transcript
            .utterances
            .iter()
            .filter(|utterance| !utterance.text.trim().is_empty())
            .map(|utterance| RecordSegment {
                text: utterance.text.clone(),
                confidence: utterance.confidence,
                start_secs: utterance.start_secs,
                end_secs: utterance.end_secs,
                role: self.role(utterance.channel),
                channel: utterance.channel,
            })
            .collect();
        if segments.is_empty() {
            return Err(BackendError::new(
                BackendErrorKind::InvalidRequest,
                "formatter.format",
                format!("transcript for {} has no speech", item.key),
            ));
        }
        segments.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

        let mut labels = BTreeMap::new();
        labels.insert("source_file".to_string(), item.key.clone());
        labels.insert("processed_at".to_string(), now.to_rfc3339());
        if !redacted.summary.info_types.is_empty() {
            let info_types: Vec<&str> = redacted
                .summary
                .info_types
                .iter()
                .map(String::as_str)
                .collect();
            labels.insert("redacted_info_types".to_string(), info_types.join(","));
        }

        let duration = transcript.duration_secs();
        Ok(ConversationRecord {
            conversation_id: conversation_id(item, now),
            source_uri: transcript.source_uri.clone(),
            language_code: self.settings.language_code.clone(),
            expire_time: now + Duration::days(i64::from(self.settings.ttl_days)),
            call_metadata: CallMetadata {
                customer_channel: self.settings.customer_channel,
                agent_channel: self.settings.agent_channel,
                agent_id: self.settings.agent_id.clone(),
                customer_id: self.settings.customer_id.clone(),
                call_duration_secs: duration,
            },
            segments,
            labels,
            quality: QualityMetrics {
                average_confidence: transcript.average_confidence(),
                total_duration_secs: duration,
                word_count: transcript.word_count(),
            },
            redaction: redacted.summary.clone(),
            source_size_bytes: metadata.size_bytes,
            source_checksum: metadata.checksum.clone(),
        })
    }
}

/// Lower-cased stem with non-alphanumerics mapped to `-`, plus a UTC stamp.
fn conversation_id(item: &WorkItem, now: DateTime<Utc>) -> String {
    let cleaned: String = item
        .stem()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        return Uuid::new_v4().to_string();
    }
    format!("{cleaned}-{}", now.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_core::{RedactionSummary, Transcript, Utterance};
    use callstream_test_support::fixtures::{sample_metadata, sample_transcript};
    use chrono::TimeZone;

    fn redacted(transcript: Transcript) -> RedactedTranscript {
        let mut summary = RedactionSummary::default();
        summary.info_types.insert("PHONE_NUMBER".into());
        summary.info_types.insert("EMAIL_ADDRESS".into());
        RedactedTranscript {
            transcript,
            findings: Vec::new(),
            summary,
        }
    }

    fn at() -> anyhow::Result<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .single()
            .ok_or_else(|| anyhow::anyhow!("ambiguous timestamp"))
    }

    #[test]
    fn builds_record_with_roles_labels_and_expiry() -> anyhow::Result<()> {
        let now = at()?;
        let item = WorkItem::new("calls/Merged Call_01.wav");
        let mut transcript = sample_transcript("mem://calls/Merged Call_01.wav");
        transcript.utterances.reverse();
        let mut metadata = sample_metadata(&item.key);
        metadata.checksum = Some("abc".into());

        let formatter = DefaultConversationFormatter::new(FormatterSettings::default());
        let record = formatter.format(&item, &redacted(transcript), &metadata, now)?;

        assert_eq!(record.conversation_id, "merged-call-01-20240305-140709");
        assert_eq!(record.expire_time, now + Duration::days(365));
        assert_eq!(record.language_code, "en-US");
        assert_eq!(record.segments.len(), 3);
        assert!(record.segments.windows(2).all(|w| w[0].start_secs <= w[1].start_secs));
        assert_eq!(record.segments[0].role, ParticipantRole::Agent);
        assert_eq!(record.segments[1].role, ParticipantRole::Customer);
        assert_eq!(
            record.labels.get("redacted_info_types").map(String::as_str),
            Some("EMAIL_ADDRESS,PHONE_NUMBER")
        );
        assert_eq!(
            record.labels.get("source_file").map(String::as_str),
            Some("calls/Merged Call_01.wav")
        );
        assert!((record.call_metadata.call_duration_secs - 7.2).abs() < 1e-9);
        assert_eq!(record.source_checksum.as_deref(), Some("abc"));
        Ok(())
    }

    #[test]
    fn symbol_only_stem_falls_back_to_uuid() -> anyhow::Result<()> {
        let id = conversation_id(&WorkItem::new("calls/___.wav"), at()?);
        assert!(Uuid::parse_str(&id).is_ok());
        Ok(())
    }

    #[test]
    fn silent_transcript_is_rejected() -> anyhow::Result<()> {
        let item = WorkItem::new("calls/merged_empty.wav");
        let transcript = Transcript {
            source_uri: "mem://calls/merged_empty.wav".into(),
            utterances: vec![Utterance {
                channel: 0,
                speaker_tag: 0,
                text: "   ".into(),
                start_secs: 0.0,
                end_secs: 0.5,
                confidence: 0.0,
                word_count: 0,
            }],
        };
        let formatter = DefaultConversationFormatter::new(FormatterSettings::default());
        let err = formatter
            .format(&item, &redacted(transcript), &sample_metadata(&item.key), at()?)
            .err();
        assert_eq!(err.map(|err| err.kind()), Some(BackendErrorKind::InvalidRequest));
        Ok(())
    }
}
