//! Collaborator implementations backed by the local filesystem and HTTP services.

pub mod formatter;
pub mod fs_store;
pub mod http;

pub use formatter::{DefaultConversationFormatter, FormatterSettings};
pub use fs_store::FsObjectStore;
pub use http::{
    HttpIngestionBackend, HttpRedactionService, HttpSpeechRecognizer, HttpTransport,
    classify_status,
};
