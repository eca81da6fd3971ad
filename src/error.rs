//! Error types for the snapshot service

use thiserror::Error;

/// Result type alias for snapshot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or rendering a snapshot session.
///
/// Every failure crosses the actor boundary as data, so the type is `Clone`
/// and carries only owned strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The render surface or session could not be created; the session is
    /// unusable and every later snapshot fails with this cause.
    #[error("Session construction failed: {0}")]
    ConstructionFailure(String),

    /// A degenerate or unrepresentable bounding region was applied
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// The style locator was unreachable or its content malformed
    #[error("Failed to load style: {0}")]
    StyleLoadFailure(String),

    /// The render surface failed to produce a frame
    #[error("Rendering failed: {0}")]
    RenderFailure(String),

    /// The session was torn down before the snapshot could be delivered
    #[error("Snapshot cancelled: session was shut down")]
    CancelledDelivery,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::StyleLoadFailure(format!("Malformed style JSON: {}", err))
    }
}
