use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::DatastoreError;

/// On-disk settings file, `.pudl.json` in the home directory.
#[derive(Debug, Deserialize, Serialize)]
pub struct SettingsFile {
    pub pudl_in: String,
    #[serde(default)]
    pub datapackage_dir: Option<String>,
}

/// Resolved workspace settings. `PUDL_IN` in the environment wins over the
/// settings file; a blank value falls through to the file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pudl_in: Utf8PathBuf,
    pub datapackage_dir: Option<Utf8PathBuf>,
}

impl Settings {
    pub fn resolve() -> Result<Self, DatastoreError> {
        let env_value = std::env::var("PUDL_IN").ok();
        Self::resolve_from(env_value.as_deref(), settings_path())
    }

    /// Resolution with the environment value and settings-file location
    /// passed in, so the precedence rules are testable without touching
    /// process state.
    pub fn resolve_from(
        pudl_in: Option<&str>,
        settings_file: Option<PathBuf>,
    ) -> Result<Self, DatastoreError> {
        if let Some(value) = pudl_in {
            if !value.trim().is_empty() {
                return Ok(Self {
                    pudl_in: Utf8PathBuf::from(value.trim()),
                    datapackage_dir: None,
                });
            }
        }

        let path = settings_file.ok_or(DatastoreError::MissingSettings)?;
        if !path.exists() {
            return Err(DatastoreError::MissingSettings);
        }
        Self::from_file(path)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, DatastoreError> {
        let content =
            fs::read_to_string(&path).map_err(|_| DatastoreError::SettingsRead(path.clone()))?;
        let file: SettingsFile = serde_json::from_str(&content)
            .map_err(|err| DatastoreError::SettingsParse(err.to_string()))?;
        Ok(Self {
            pudl_in: Utf8PathBuf::from(file.pudl_in),
            datapackage_dir: file.datapackage_dir.map(Utf8PathBuf::from),
        })
    }
}

fn settings_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".pudl.json"))
}
