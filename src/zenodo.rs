use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::datapackage::DataPackage;
use crate::domain::Doi;
use crate::error::DatastoreError;
use crate::registry::ArchiveRegistry;
use crate::store::DESCRIPTOR_FILENAME;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Archive access seam. The datastore talks to Zenodo through this trait so
/// tests can substitute a local double.
pub trait ArchiveClient: Send + Sync {
    /// Fetch and parse the `datapackage.json` stored in the deposition
    /// backing `doi`.
    fn fetch_descriptor(&self, doi: &Doi) -> Result<DataPackage, DatastoreError>;

    /// Download one remote file to `destination`.
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), DatastoreError>;
}

#[derive(Clone)]
pub struct ZenodoHttpClient {
    client: Client,
    api_root: String,
    token: String,
}

impl ZenodoHttpClient {
    pub fn new(registry: &ArchiveRegistry) -> Result<Self, DatastoreError> {
        Self::with_timeout(registry, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        registry: &ArchiveRegistry,
        timeout: Duration,
    ) -> Result<Self, DatastoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("pudl-dpkg/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| DatastoreError::RemoteHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_root: registry.api_root().to_string(),
            token: registry.token().to_string(),
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, DatastoreError> {
        let response = self
            .client
            .get(url)
            .query(&[("access_token", self.token.as_str())])
            .send()
            .map_err(|err| DatastoreError::RemoteHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DatastoreError::RemoteFetch {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl ArchiveClient for ZenodoHttpClient {
    fn fetch_descriptor(&self, doi: &Doi) -> Result<DataPackage, DatastoreError> {
        let deposition_url = doi.deposition_url(&self.api_root)?;
        let deposition: DepositionResponse = self
            .get(&deposition_url)?
            .json()
            .map_err(|err| DatastoreError::RemoteHttp(err.to_string()))?;

        let descriptor_file = deposition
            .files
            .iter()
            .find(|file| file.filename == DESCRIPTOR_FILENAME)
            .ok_or_else(|| DatastoreError::RemoteFetch {
                url: deposition_url.clone(),
                status: 404,
            })?;

        let body = self
            .get(&descriptor_file.links.download)?
            .text()
            .map_err(|err| DatastoreError::RemoteHttp(err.to_string()))?;
        serde_json::from_str(&body)
            .map_err(|err| DatastoreError::DescriptorParse(format!("{doi}: {err}")))
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), DatastoreError> {
        let mut response = self.get(url)?;
        let mut file = File::create(destination)
            .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DepositionResponse {
    files: Vec<DepositionFile>,
}

#[derive(Debug, Deserialize)]
struct DepositionFile {
    filename: String,
    links: FileLinks,
}

#[derive(Debug, Deserialize)]
struct FileLinks {
    download: String,
}
