pub mod datapackage;
pub mod datastore;
pub mod domain;
pub mod error;
pub mod flatten;
pub mod output;
pub mod registry;
pub mod settings;
pub mod store;
pub mod zenodo;
