use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DatastoreError {
    #[error("no DOI registered for dataset: {0}")]
    UnknownDataset(String),

    #[error("invalid DOI: {0}")]
    MalformedDoi(String),

    #[error("archive request failed: {0}")]
    RemoteHttp(String),

    #[error("archive returned status {status} for {url}")]
    RemoteFetch { url: String, status: u16 },

    #[error("datapackage bundle directory does not exist: {0}")]
    MissingBundle(PathBuf),

    #[error("ETL parameters do not match across data packages for source: {title}")]
    InconsistentParameters { title: String },

    #[error("expected exactly one package id across the bundle, found {0}")]
    AmbiguousId(usize),

    #[error("failed to parse datapackage descriptor: {0}")]
    DescriptorParse(String),

    #[error("missing settings file .pudl.json and PUDL_IN is not set")]
    MissingSettings,

    #[error("failed to read settings file at {0}")]
    SettingsRead(PathBuf),

    #[error("failed to parse settings file: {0}")]
    SettingsParse(String),

    #[error("invalid filter, expected key=value: {0}")]
    InvalidFilter(String),

    #[error("data package validation failed: {0}")]
    Validation(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
