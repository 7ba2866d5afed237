use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::datapackage::DataPackage;
use crate::domain::Doi;
use crate::error::DatastoreError;

pub const DESCRIPTOR_FILENAME: &str = "datapackage.json";

/// Local cache layout: `{pudl_in}/data/{dataset}/{doi-with-dashes}/`.
///
/// All path construction for the cache lives here so the datastore never
/// assembles paths by hand.
#[derive(Debug, Clone)]
pub struct Store {
    pudl_in: Utf8PathBuf,
}

impl Store {
    pub fn new(pudl_in: Utf8PathBuf) -> Self {
        Self { pudl_in }
    }

    pub fn pudl_in(&self) -> &Utf8Path {
        &self.pudl_in
    }

    pub fn dataset_dir(&self, dataset: &str, doi: &Doi) -> Utf8PathBuf {
        self.pudl_in.join("data").join(dataset).join(doi.dirname())
    }

    pub fn resource_path(&self, dataset: &str, doi: &Doi, filename: &str) -> Utf8PathBuf {
        self.dataset_dir(dataset, doi).join(filename)
    }

    pub fn descriptor_path(&self, dataset: &str, doi: &Doi) -> Utf8PathBuf {
        self.dataset_dir(dataset, doi).join(DESCRIPTOR_FILENAME)
    }

    pub fn read_descriptor(&self, dataset: &str, doi: &Doi) -> Result<DataPackage, DatastoreError> {
        DataPackage::from_path(self.descriptor_path(dataset, doi).as_std_path())
    }

    /// Persist a descriptor, replacing any previous version. The write goes
    /// through a temp file and rename so a crash never leaves a truncated
    /// descriptor behind.
    pub fn write_descriptor(
        &self,
        dataset: &str,
        doi: &Doi,
        descriptor: &DataPackage,
    ) -> Result<Utf8PathBuf, DatastoreError> {
        let path = self.descriptor_path(dataset, doi);
        write_bytes_atomic(&path, &descriptor_to_sorted_json(descriptor)?)?;
        debug!(path = %path, "descriptor saved");
        Ok(path)
    }
}

/// Serialize a descriptor with all object keys sorted, so persisted
/// descriptors are byte-stable regardless of field declaration order.
/// Routing through `serde_json::Value` does the sorting, since its map is
/// ordered by key.
pub fn descriptor_to_sorted_json(descriptor: &DataPackage) -> Result<Vec<u8>, DatastoreError> {
    let value = serde_json::to_value(descriptor)
        .map_err(|err| DatastoreError::DescriptorParse(err.to_string()))?;
    serde_json::to_vec_pretty(&value)
        .map_err(|err| DatastoreError::DescriptorParse(err.to_string()))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DatastoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| DatastoreError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("pudl-dpkg")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    if path.as_std_path().exists() {
        fs::remove_file(path.as_std_path())
            .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    Ok(())
}
