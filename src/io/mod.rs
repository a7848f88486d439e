//! File formats shared by adapter checkpoints and delta patterns

pub mod archive;

pub use archive::ArchiveMetadata;
