#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]

//! File-backed configuration for the callstream pipeline.
//!
//! Layout: `model.rs` (typed settings sections), `defaults.rs` (default
//! values), `loader.rs` (YAML loading with `${VAR}` substitution),
//! `validate.rs` (field validation).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{PROJECT_ID_ENV, load_config, load_config_with, parse_config, substitute_env};
pub use model::{
    IngestSettings, LoggingSettings, PipelineConfig, ProcessingMode, ProcessingSettings,
    RecognizerSettings, RedactionSettings, StoreSettings,
};
