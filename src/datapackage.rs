use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::DatastoreError;

/// Frictionless-style data package descriptor, `datapackage.json`.
///
/// Fields this crate never touches are carried in `extra` so a cached or
/// combined descriptor round-trips without dropping anything the upstream
/// ETL wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    pub created: String,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DataPackage {
    pub fn from_path(path: &Path) -> Result<Self, DatastoreError> {
        let content = fs::read_to_string(path).map_err(|err| {
            DatastoreError::Filesystem(format!("read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|err| DatastoreError::DescriptorParse(format!("{}: {err}", path.display())))
    }

    /// Creation timestamp, parsed so the combiner can take a chronological
    /// minimum rather than a lexical one.
    pub fn created_at(&self) -> Result<DateTime<FixedOffset>, DatastoreError> {
        DateTime::parse_from_rfc3339(&self.created).map_err(|err| {
            DatastoreError::DescriptorParse(format!("created `{}`: {err}", self.created))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Provenance record for one upstream dataset, keyed by `title`. The extra
/// parameters are the ETL knobs the consistency check compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    #[serde(flatten)]
    pub parameters: BTreeMap<String, Value>,
}

/// Flat contributor record. The `BTreeMap` backing makes equality
/// structural and independent of JSON field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contributor(pub BTreeMap<String, Value>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub parts: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Resource {
    /// Whether the resource still points at a remote server rather than a
    /// file in the local cache.
    pub fn is_remote(&self) -> bool {
        self.path.starts_with("https://") || self.path.starts_with("http://")
    }

    /// A resource passes iff every filter key is present in `parts` with an
    /// exactly equal value. A missing key is a non-match, not an error.
    pub fn passes_filters(&self, filters: &BTreeMap<String, Value>) -> bool {
        for (key, wanted) in filters {
            let part_val = self.parts.get(key);
            if part_val != Some(wanted) {
                debug!(
                    resource = %self.name,
                    key = %key,
                    "filtered: {part_val:?} != {wanted}"
                );
                return false;
            }
        }
        true
    }
}
