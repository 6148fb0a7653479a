//! Repository layer.

pub mod artifact;
pub mod generation_log;

pub use artifact::{ArtifactRepository, SqlxArtifactRepository};
pub use generation_log::{GenerationLogRepository, SqlxGenerationLogRepository};
