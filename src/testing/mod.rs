//! Testing utilities
//!
//! Mock implementations of the external seams (generation provider,
//! progress sink) used by unit tests and the integration suite.

pub mod mocks;

pub use mocks::{MockGenerationClient, MockGenerationClientBuilder, RecordingReporter};
