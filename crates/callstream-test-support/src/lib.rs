#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Shared test helpers used across callstream test suites.
//! Layout: probe.rs (in-flight counting), mocks.rs (scripted collaborators),
//! fixtures.rs (sample payloads).

pub mod fixtures;
pub mod mocks;
pub mod probe;

pub use mocks::{EchoRedactor, MemoryObjectStore, ScriptedBackend, ScriptedRecognizer};
pub use probe::{InFlightProbe, ProbeGuard};
