//! Over-the-air update boundary.
//!
//! The node asks an [`UpdateSource`] once per network session whether a newer
//! image is available. Staging the image is the source's business; the node
//! only learns whether it must stop so the runtime can restart into it.

pub mod error;
pub mod http;

pub use error::UpdateError;
pub use http::HttpUpdateSource;

use semver::Version;

use crate::config::OtaConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    UpToDate,
    /// A new image has been staged and takes effect on restart.
    Applied { version: Version },
}

#[allow(async_fn_in_trait)]
pub trait UpdateSource {
    async fn check(&mut self) -> Result<UpdateCheck, UpdateError>;
}

/// Used when no manifest is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl UpdateSource for Disabled {
    async fn check(&mut self) -> Result<UpdateCheck, UpdateError> {
        Ok(UpdateCheck::UpToDate)
    }
}

/// Either a configured HTTP source or [`Disabled`].
pub enum Updates {
    Http(HttpUpdateSource),
    Disabled(Disabled),
}

impl Updates {
    /// HTTP source when a manifest URL is configured, otherwise disabled.
    pub fn from_config(config: &OtaConfig) -> Result<Self, UpdateError> {
        match &config.manifest_url {
            Some(url) => {
                let current = Version::parse(env!("CARGO_PKG_VERSION"))?;
                let source = HttpUpdateSource::new(url, config.staging_path.clone(), current)?;
                Ok(Updates::Http(source))
            }
            None => Ok(Updates::Disabled(Disabled)),
        }
    }
}

impl UpdateSource for Updates {
    async fn check(&mut self) -> Result<UpdateCheck, UpdateError> {
        match self {
            Updates::Http(source) => source.check().await,
            Updates::Disabled(source) => source.check().await,
        }
    }
}
