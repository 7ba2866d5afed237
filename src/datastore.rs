use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::datapackage::DataPackage;
use crate::domain::Doi;
use crate::error::DatastoreError;
use crate::registry::ArchiveRegistry;
use crate::store::Store;
use crate::zenodo::ArchiveClient;

/// Outcome of one `download_resources` run. Failed downloads are skipped,
/// not fatal, so the summary is how callers learn about them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadSummary {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Pulls files from Zenodo archives as needed and caches them under the
/// local input root.
pub struct Datastore<C: ArchiveClient> {
    store: Store,
    registry: ArchiveRegistry,
    client: C,
}

impl<C: ArchiveClient> Datastore<C> {
    pub fn new(store: Store, registry: ArchiveRegistry, client: C) -> Self {
        Self {
            store,
            registry,
            client,
        }
    }

    pub fn doi(&self, dataset: &str) -> Result<&Doi, DatastoreError> {
        self.registry.doi(dataset)
    }

    /// The dataset's descriptor, from the local cache when present. A cache
    /// miss (or `force_download`) fetches from the archive and persists the
    /// result before returning it.
    pub fn descriptor(
        &self,
        dataset: &str,
        force_download: bool,
    ) -> Result<DataPackage, DatastoreError> {
        let doi = self.registry.doi(dataset)?;
        let path = self.store.descriptor_path(dataset, doi);

        if force_download || !path.as_std_path().exists() {
            let descriptor = self.client.fetch_descriptor(doi)?;
            self.store.write_descriptor(dataset, doi, &descriptor)?;
            return Ok(descriptor);
        }

        debug!(path = %path, "descriptor cache hit");
        self.store.read_descriptor(dataset, doi)
    }

    /// Download every remote resource passing `filters` into the dataset's
    /// cache directory, rewriting each downloaded resource's `path` to the
    /// local file. The descriptor is re-persisted once iff anything landed.
    ///
    /// A failed download is logged and skipped; the resource keeps its
    /// remote path so a later run can retry it.
    pub fn download_resources(
        &self,
        dataset: &str,
        filters: &BTreeMap<String, Value>,
    ) -> Result<DownloadSummary, DatastoreError> {
        let doi = self.registry.doi(dataset)?.clone();
        let mut descriptor = self.descriptor(dataset, false)?;
        debug!(
            dataset = %dataset,
            resources = descriptor.resources.len(),
            "datapackage lists resources"
        );

        let dir = self.store.dataset_dir(dataset, &doi);
        std::fs::create_dir_all(dir.as_std_path())
            .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;

        let mut summary = DownloadSummary::default();
        for resource in &mut descriptor.resources {
            if !resource.is_remote() || !resource.passes_filters(filters) {
                summary.skipped.push(resource.name.clone());
                continue;
            }

            let local = self.store.resource_path(dataset, &doi, &resource.name);
            match self.client.download_file(&resource.path, local.as_std_path()) {
                Ok(()) => {
                    debug!(path = %local, "cached");
                    resource.path = local.to_string();
                    summary.downloaded.push(resource.name.clone());
                }
                Err(err) => {
                    warn!(
                        resource = %resource.name,
                        url = %resource.path,
                        "download failed, leaving path remote: {err}"
                    );
                    summary.failed.push(resource.name.clone());
                }
            }
        }

        if !summary.downloaded.is_empty() {
            self.store.write_descriptor(dataset, &doi, &descriptor)?;
        }
        Ok(summary)
    }
}
