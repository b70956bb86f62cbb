//! Artifact store implementations.
//!
//! - `InMemoryArtifactStore`: whole-value swap under a lock; tests and dev.
//! - `FsArtifactStore`: generation directories behind an atomically renamed
//!   `CURRENT` pointer.

mod fs;
mod in_memory;

pub use fs::FsArtifactStore;
pub use in_memory::InMemoryArtifactStore;
