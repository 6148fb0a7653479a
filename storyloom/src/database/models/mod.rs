//! Database models.

pub mod artifact;
pub mod generation_log;

pub use artifact::{ArtifactDbModel, ArtifactKind};
pub use generation_log::{GenerationLogDbModel, GenerationStep, LogLevel};
