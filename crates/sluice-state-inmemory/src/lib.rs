//!
//! Sluice State In-Memory - in-memory repository implementations
//!
//! Backs the Sluice engine with process-local storage. Intended for
//! tests, demos and single-node hosts; nothing here survives a restart.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Repository implementations
pub mod repositories;

pub use repositories::{
    InMemoryDefinitionRepository, InMemoryInstanceRepository, InMemoryLogRepository,
};
