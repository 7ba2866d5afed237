use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DatastoreError;

/// Zenodo deployment a registry is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZenodoEnv {
    Sandbox,
    Production,
}

impl fmt::Display for ZenodoEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZenodoEnv::Sandbox => write!(f, "sandbox"),
            ZenodoEnv::Production => write!(f, "production"),
        }
    }
}

/// Concept DOI for an archived dataset, e.g. `10.5072/zenodo.504556`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory-safe form of the DOI, slashes replaced by dashes.
    pub fn dirname(&self) -> String {
        self.0.replace('/', "-")
    }

    /// Numeric Zenodo deposition id embedded in the DOI suffix.
    pub fn deposition_id(&self) -> Result<u64, DatastoreError> {
        let pattern = Regex::new(r"zenodo\.(\d+)").unwrap();
        let captures = pattern
            .captures(&self.0)
            .ok_or_else(|| DatastoreError::MalformedDoi(self.0.clone()))?;
        captures[1]
            .parse::<u64>()
            .map_err(|_| DatastoreError::MalformedDoi(self.0.clone()))
    }

    /// API url for the deposition backing this DOI.
    pub fn deposition_url(&self, api_root: &str) -> Result<String, DatastoreError> {
        let id = self.deposition_id()?;
        Ok(format!("{api_root}/deposit/depositions/{id}"))
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = DatastoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = normalized.starts_with("10.") && normalized.contains('/');
        if !is_valid {
            return Err(DatastoreError::MalformedDoi(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_doi_valid() {
        let doi: Doi = "10.5072/zenodo.504556".parse().unwrap();
        assert_eq!(doi.as_str(), "10.5072/zenodo.504556");
        assert_eq!(doi.dirname(), "10.5072-zenodo.504556");
    }

    #[test]
    fn parse_doi_invalid() {
        let err = "zenodo.504556".parse::<Doi>().unwrap_err();
        assert_matches!(err, DatastoreError::MalformedDoi(_));
    }

    #[test]
    fn deposition_id_extracted() {
        let doi: Doi = "10.5072/zenodo.504556".parse().unwrap();
        assert_eq!(doi.deposition_id().unwrap(), 504556);
        assert_eq!(
            doi.deposition_url("https://sandbox.zenodo.org/api").unwrap(),
            "https://sandbox.zenodo.org/api/deposit/depositions/504556"
        );
    }

    #[test]
    fn deposition_id_missing_suffix() {
        let doi: Doi = "10.5072/figshare.504556".parse().unwrap();
        assert_matches!(
            doi.deposition_id().unwrap_err(),
            DatastoreError::MalformedDoi(_)
        );
    }
}
