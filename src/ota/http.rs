use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Url};
use semver::Version;
use serde::{Deserialize, Serialize};

use super::{UpdateCheck, UpdateError, UpdateSource};

/// Update manifest served next to the firmware images.
///
/// `url` may be absolute or relative to the manifest location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub url: String,
}

/// Polls a JSON manifest and stages newer images on disk.
pub struct HttpUpdateSource {
    client: Client,
    manifest_url: Url,
    staging_path: PathBuf,
    current: Version,
}

impl HttpUpdateSource {
    pub fn new(
        manifest_url: &str,
        staging_path: impl Into<PathBuf>,
        current: Version,
    ) -> Result<Self, UpdateError> {
        let manifest_url = Url::parse(manifest_url)
            .map_err(|e| UpdateError::Manifest(format!("{manifest_url}: {e}")))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            manifest_url,
            staging_path: staging_path.into(),
            current,
        })
    }

    async fn fetch_manifest(&self) -> Result<Manifest, UpdateError> {
        let manifest = self
            .client
            .get(self.manifest_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<Manifest>()
            .await?;
        Ok(manifest)
    }
}

/// Sibling the image is written to before it is renamed into place, so an
/// interrupted download never leaves a truncated image at the staging path.
fn partial_path(staging_path: &Path) -> PathBuf {
    let mut name = OsString::from(staging_path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

impl UpdateSource for HttpUpdateSource {
    async fn check(&mut self) -> Result<UpdateCheck, UpdateError> {
        let manifest = self.fetch_manifest().await?;
        let offered = Version::parse(manifest.version.trim())?;
        if offered <= self.current {
            log::debug!("ota: offered {offered}, running {}", self.current);
            return Ok(UpdateCheck::UpToDate);
        }

        let image_url = self
            .manifest_url
            .join(&manifest.url)
            .map_err(|e| UpdateError::Manifest(format!("image url {}: {e}", manifest.url)))?;
        log::info!("ota: downloading {offered} from {image_url}");

        let image = self
            .client
            .get(image_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if image.is_empty() {
            return Err(UpdateError::Manifest("empty image".into()));
        }
        let partial = partial_path(&self.staging_path);
        tokio::fs::write(&partial, &image).await?;
        tokio::fs::rename(&partial, &self.staging_path).await?;
        log::info!(
            "ota: staged {} bytes at {}",
            image.len(),
            self.staging_path.display()
        );

        Ok(UpdateCheck::Applied { version: offered })
    }
}
