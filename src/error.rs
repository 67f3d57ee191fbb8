//! Error types for the update agent.

use thiserror::Error;

/// Everything that can abort an update run.
///
/// Nothing is retried: the orchestrator hands the first error straight back
/// to its caller.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The build server answered with a bad status, an unreadable body, or
    /// could not be reached at all.
    #[error("build server query failed: {0}")]
    RemoteQuery(String),

    /// The build exists but carries no artifact with the expected name.
    #[error("artifact '{artifact}' not found for build {build}")]
    ArtifactNotFound { artifact: String, build: u64 },

    /// Transport or disk failure while saving the artifact.
    #[error("artifact download failed: {0}")]
    Download(String),

    /// The downloaded file is not a readable archive.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The version record could not be read or written.
    #[error("version record error: {0}")]
    State(String),

    /// Enumerating, killing or launching the managed application failed.
    #[error("process control error: {0}")]
    Process(String),

    /// The installation directory could not be cleared.
    #[error("installation error: {0}")]
    Installation(String),
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::CorruptArchive(err.to_string())
    }
}

/// Result type alias for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;
