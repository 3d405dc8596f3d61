use thiserror::Error;

/// Errors raised while checking for or staging an update.
///
/// All of them mean "skip the update this time"; none is fatal to the node.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update server error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error("failed to stage image: {0}")]
    Io(#[from] std::io::Error),
}
