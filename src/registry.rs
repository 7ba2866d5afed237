use std::collections::BTreeMap;

use crate::domain::{Doi, ZenodoEnv};
use crate::error::DatastoreError;

const SANDBOX_API_ROOT: &str = "https://sandbox.zenodo.org/api";
const PRODUCTION_API_ROOT: &str = "https://zenodo.org/api";

// Read-only access token for our sandbox archives. Shipping it keeps the
// tool usable without setup; it cannot modify or create depositions.
const SANDBOX_TOKEN: &str = "WX1FW2JOrkcCvoGutoZaGS69W5P9A73wybsToLeo4nt6NP3moeIg7sPBw8nI";

/// Immutable lookup table mapping dataset names to archive DOIs, scoped to
/// one Zenodo deployment. Constructed once and injected wherever archive
/// access is needed.
#[derive(Debug, Clone)]
pub struct ArchiveRegistry {
    env: ZenodoEnv,
    dois: BTreeMap<String, Doi>,
    token: String,
    api_root: String,
}

impl ArchiveRegistry {
    pub fn for_env(env: ZenodoEnv) -> Self {
        match env {
            ZenodoEnv::Sandbox => Self {
                env,
                dois: sandbox_dois(),
                token: SANDBOX_TOKEN.to_string(),
                api_root: SANDBOX_API_ROOT.to_string(),
            },
            ZenodoEnv::Production => Self {
                env,
                dois: BTreeMap::new(),
                token: std::env::var("ZENODO_TOKEN").unwrap_or_default(),
                api_root: PRODUCTION_API_ROOT.to_string(),
            },
        }
    }

    /// Registry with an explicit DOI table, for tests and local mirrors.
    pub fn with_dois(env: ZenodoEnv, dois: BTreeMap<String, Doi>, token: &str) -> Self {
        let api_root = match env {
            ZenodoEnv::Sandbox => SANDBOX_API_ROOT,
            ZenodoEnv::Production => PRODUCTION_API_ROOT,
        };
        Self {
            env,
            dois,
            token: token.to_string(),
            api_root: api_root.to_string(),
        }
    }

    pub fn env(&self) -> ZenodoEnv {
        self.env
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub fn doi(&self, dataset: &str) -> Result<&Doi, DatastoreError> {
        self.dois
            .get(dataset)
            .ok_or_else(|| DatastoreError::UnknownDataset(dataset.to_string()))
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.dois.keys().map(String::as_str)
    }
}

fn sandbox_dois() -> BTreeMap<String, Doi> {
    let entries = [
        ("eia860", "10.5072/zenodo.504556"),
        ("eia861", "10.5072/zenodo.504558"),
        ("eia923", "10.5072/zenodo.504558"),
        ("epaipm", "10.5072/zenodo.504564"),
        ("ferc1", "10.5072/zenodo.504562"),
    ];
    entries
        .into_iter()
        .map(|(dataset, doi)| {
            let doi = doi.parse().expect("static sandbox DOI");
            (dataset.to_string(), doi)
        })
        .collect()
}
