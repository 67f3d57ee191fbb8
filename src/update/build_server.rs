use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use super::version::BuildId;
use crate::error::{Result, UpdateError};

const USER_AGENT: &str = concat!("build-updater/", env!("CARGO_PKG_VERSION"));

/// Time-limited download URL for one build's artifact. Used once, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub build: BuildId,
    pub url: String,
}

/// Read side of the build server.
pub trait BuildSource {
    /// Id of the most recent build.
    fn latest_build_id(&self) -> Result<BuildId>;

    /// Download location of the configured artifact for `build`.
    fn artifact_location(&self, build: BuildId) -> Result<ArtifactLocation>;

    /// Stream the artifact at `location` into `dest`.
    fn download(&self, location: &ArtifactLocation, dest: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct BuildList {
    #[serde(default)]
    value: Vec<BuildEntry>,
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    name: Option<String>,
    resource: Option<ArtifactResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactResource {
    download_url: Option<String>,
}

/// Blocking client for an Azure DevOps style build API.
pub struct BuildClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_version: String,
    artifact_name: String,
    show_progress: bool,
}

impl BuildClient {
    /// `timeout` of `None` means requests may block forever.
    pub fn new(
        base_url: &str,
        api_version: &str,
        artifact_name: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::RemoteQuery(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            artifact_name: artifact_name.to_string(),
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn builds_url(&self) -> String {
        format!("{}/builds", self.base_url)
    }

    fn artifacts_url(&self, build: BuildId) -> String {
        format!("{}/builds/{}/artifacts", self.base_url, build)
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        match total {
            Some(len) => {
                let pb = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                {
                    pb.set_style(style.progress_chars("#>-"));
                }
                pb
            }
            None => ProgressBar::new_spinner(),
        }
    }
}

impl BuildSource for BuildClient {
    fn latest_build_id(&self) -> Result<BuildId> {
        let url = self.builds_url();
        tracing::debug!(%url, "querying build list");

        let response = self
            .client
            .get(&url)
            .query(&[("api-version", self.api_version.as_str())])
            .send()
            .map_err(|e| UpdateError::RemoteQuery(format!("build list request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(UpdateError::RemoteQuery(format!(
                "build list returned {}",
                response.status()
            )));
        }

        let list: BuildList = response
            .json()
            .map_err(|e| UpdateError::RemoteQuery(format!("malformed build list: {}", e)))?;

        list.value
            .first()
            .map(|b| BuildId(b.id))
            .ok_or_else(|| UpdateError::RemoteQuery("build list is empty".to_string()))
    }

    fn artifact_location(&self, build: BuildId) -> Result<ArtifactLocation> {
        let url = self.artifacts_url(build);
        tracing::debug!(%url, artifact = %self.artifact_name, "querying artifact");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("artifactName", self.artifact_name.as_str()),
                ("api-version", self.api_version.as_str()),
            ])
            .send()
            .map_err(|e| UpdateError::RemoteQuery(format!("artifact request failed: {}", e)))?;

        let not_found = || UpdateError::ArtifactNotFound {
            artifact: self.artifact_name.clone(),
            build: build.0,
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(not_found());
        }

        if !response.status().is_success() {
            return Err(UpdateError::RemoteQuery(format!(
                "artifact query returned {}",
                response.status()
            )));
        }

        let artifact: ArtifactResponse = response
            .json()
            .map_err(|e| UpdateError::RemoteQuery(format!("malformed artifact response: {}", e)))?;

        if let Some(name) = &artifact.name {
            if name != &self.artifact_name {
                return Err(not_found());
            }
        }

        let url = artifact
            .resource
            .and_then(|r| r.download_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                UpdateError::RemoteQuery(
                    "artifact response has no resource.downloadUrl".to_string(),
                )
            })?;

        Ok(ArtifactLocation { build, url })
    }

    fn download(&self, location: &ArtifactLocation, dest: &Path) -> Result<()> {
        tracing::debug!(url = %location.url, dest = %dest.display(), "downloading artifact");

        let mut response = self
            .client
            .get(&location.url)
            .send()
            .map_err(|e| UpdateError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpdateError::Download(format!(
                "server returned {}",
                response.status()
            )));
        }

        let pb = self.progress_bar(response.content_length());

        let mut file = File::create(dest).map_err(|e| {
            UpdateError::Download(format!("failed to create {}: {}", dest.display(), e))
        })?;
        let mut downloaded: u64 = 0;
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| UpdateError::Download(e.to_string()))?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])
                .map_err(|e| UpdateError::Download(e.to_string()))?;
            downloaded += bytes_read as u64;
            pb.set_position(downloaded);
        }
        file.flush().map_err(|e| UpdateError::Download(e.to_string()))?;

        pb.finish_and_clear();
        tracing::debug!(bytes = downloaded, "download complete");
        Ok(())
    }
}
