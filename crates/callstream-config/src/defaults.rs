//! Default values for optional configuration fields.
//!
//! # Design
//! - Defaults live in one place so the model, docs, and tests agree.
//! - Durations are stored as integer seconds/milliseconds in the document.

pub(crate) const DEFAULT_FILE_PREFIX_FILTER: &str = "merged";
pub(crate) const DEFAULT_AUDIO_EXTENSIONS: [&str; 8] = [
    ".wav", ".mp3", ".flac", ".m4a", ".aac", ".ogg", ".au", ".raw",
];
pub(crate) const DEFAULT_OUTPUT_PREFIX: &str = "processed";

pub(crate) const DEFAULT_LANGUAGE_CODE: &str = "en-US";
pub(crate) const DEFAULT_RECOGNIZER_MODEL: &str = "telephony";
pub(crate) const DEFAULT_RECOGNIZER_ID: &str = "_";
pub(crate) const DEFAULT_RECOGNIZER_LOCATION: &str = "global";
pub(crate) const DEFAULT_SPEAKER_COUNT: u32 = 2;
pub(crate) const DEFAULT_AUDIO_CHANNELS: u32 = 2;

pub(crate) const DEFAULT_INGEST_LOCATION: &str = "us-central1";
pub(crate) const DEFAULT_TTL_DAYS: u32 = 365;
pub(crate) const DEFAULT_AGENT_ID: &str = "agent-001";
pub(crate) const DEFAULT_CUSTOMER_ID: &str = "customer-001";
pub(crate) const DEFAULT_AGENT_CHANNEL: u32 = 1;
pub(crate) const DEFAULT_CUSTOMER_CHANNEL: u32 = 0;
pub(crate) const DEFAULT_LRO_TIMEOUT_SECS: u64 = 900;
pub(crate) const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub(crate) const DEFAULT_QUOTA_INITIAL_DELAY_SECS: u64 = 60;
pub(crate) const DEFAULT_QUOTA_MAX_DELAY_SECS: u64 = 600;
pub(crate) const DEFAULT_QUOTA_MAX_ATTEMPTS: u32 = 5;

pub(crate) const DEFAULT_MAX_CONCURRENT_FILES: usize = 5;
pub(crate) const DEFAULT_CHUNK_CONCURRENCY: usize = 2;
pub(crate) const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;
pub(crate) const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
pub(crate) const DEFAULT_CALL_TIMEOUT_SECS: u64 = 600;

pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";

pub(crate) fn file_prefix_filter() -> String {
    DEFAULT_FILE_PREFIX_FILTER.to_string()
}

pub(crate) fn audio_extensions() -> Vec<String> {
    DEFAULT_AUDIO_EXTENSIONS
        .iter()
        .map(|ext| (*ext).to_string())
        .collect()
}

pub(crate) fn output_prefix() -> String {
    DEFAULT_OUTPUT_PREFIX.to_string()
}

pub(crate) fn language_code() -> String {
    DEFAULT_LANGUAGE_CODE.to_string()
}

pub(crate) fn recognizer_model() -> String {
    DEFAULT_RECOGNIZER_MODEL.to_string()
}

pub(crate) fn recognizer_id() -> String {
    DEFAULT_RECOGNIZER_ID.to_string()
}

pub(crate) fn recognizer_location() -> String {
    DEFAULT_RECOGNIZER_LOCATION.to_string()
}

pub(crate) const fn speaker_count() -> u32 {
    DEFAULT_SPEAKER_COUNT
}

pub(crate) const fn audio_channels() -> u32 {
    DEFAULT_AUDIO_CHANNELS
}

pub(crate) const fn enabled() -> bool {
    true
}

pub(crate) fn ingest_location() -> String {
    DEFAULT_INGEST_LOCATION.to_string()
}

pub(crate) const fn ttl_days() -> u32 {
    DEFAULT_TTL_DAYS
}

pub(crate) fn agent_id() -> String {
    DEFAULT_AGENT_ID.to_string()
}

pub(crate) fn customer_id() -> String {
    DEFAULT_CUSTOMER_ID.to_string()
}

pub(crate) const fn agent_channel() -> u32 {
    DEFAULT_AGENT_CHANNEL
}

pub(crate) const fn customer_channel() -> u32 {
    DEFAULT_CUSTOMER_CHANNEL
}

pub(crate) const fn lro_timeout_secs() -> u64 {
    DEFAULT_LRO_TIMEOUT_SECS
}

pub(crate) const fn poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

pub(crate) const fn quota_initial_delay_secs() -> u64 {
    DEFAULT_QUOTA_INITIAL_DELAY_SECS
}

pub(crate) const fn quota_max_delay_secs() -> u64 {
    DEFAULT_QUOTA_MAX_DELAY_SECS
}

pub(crate) const fn quota_max_attempts() -> u32 {
    DEFAULT_QUOTA_MAX_ATTEMPTS
}

pub(crate) const fn max_concurrent_files() -> usize {
    DEFAULT_MAX_CONCURRENT_FILES
}

pub(crate) const fn chunk_concurrency() -> usize {
    DEFAULT_CHUNK_CONCURRENCY
}

pub(crate) const fn retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

pub(crate) const fn retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

pub(crate) const fn retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

pub(crate) const fn call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}

pub(crate) fn log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
