use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::datapackage::{Contributor, DataPackage, Resource, Source};
use crate::error::DatastoreError;
use crate::store::{DESCRIPTOR_FILENAME, descriptor_to_sorted_json, write_bytes_atomic};

/// Package that bundles both EPA CEMS and EIA 860 tables. Only its hourly
/// emissions tables go into the combined package, everything else in it is
/// duplicated from the dedicated EIA packages.
pub const CEMS_EIA_PACKAGE: &str = "epacems_eia860";
const HOURLY_EMISSIONS_PATTERN: &str = "hourly_emissions_epacems";

pub const DEFAULT_OUTPUT_NAME: &str = "pudl-all";
const COMBINED_TITLE: &str = "flattened bundle of pudl data packages";

/// One input package: its directory name, location and parsed descriptor.
#[derive(Debug, Clone)]
pub struct InputPackage {
    pub name: String,
    pub dir: Utf8PathBuf,
    pub descriptor: DataPackage,
}

/// Report handed back by the external validator/persister.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub resources: usize,
    pub errors: Vec<String>,
}

/// Seam for the schema validation library. It receives the combined
/// descriptor and the output package directory, persists the descriptor,
/// and reports; a schema violation surfaces as an error which the
/// orchestrator passes through unchanged.
pub trait PackageValidator {
    fn validate_save(
        &self,
        descriptor: &DataPackage,
        pkg_dir: &Utf8Path,
    ) -> Result<ValidationReport, DatastoreError>;
}

/// Stand-in validator used by the CLI: persists the descriptor without
/// schema checks. Real table-schema validation lives in a separate library.
pub struct PersistingValidator;

impl PackageValidator for PersistingValidator {
    fn validate_save(
        &self,
        descriptor: &DataPackage,
        pkg_dir: &Utf8Path,
    ) -> Result<ValidationReport, DatastoreError> {
        let content = descriptor_to_sorted_json(descriptor)?;
        write_bytes_atomic(&pkg_dir.join(DESCRIPTOR_FILENAME), &content)?;
        Ok(ValidationReport {
            valid: true,
            resources: descriptor.resources.len(),
            errors: Vec::new(),
        })
    }
}

/// Load every package in the bundle except the output package itself,
/// sorted lexicographically by directory name. The sort pins iteration
/// order, so first-wins deduplication and resource concatenation do not
/// depend on filesystem traversal order.
pub fn load_bundle(
    bundle_dir: &Utf8Path,
    output_name: &str,
) -> Result<Vec<InputPackage>, DatastoreError> {
    if !bundle_dir.as_std_path().exists() {
        return Err(DatastoreError::MissingBundle(
            bundle_dir.as_std_path().to_path_buf(),
        ));
    }

    let mut packages = Vec::new();
    let entries = fs::read_dir(bundle_dir.as_std_path())
        .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == output_name {
            continue;
        }
        let dir = bundle_dir.join(&name);
        let descriptor = DataPackage::from_path(dir.join(DESCRIPTOR_FILENAME).as_std_path())?;
        packages.push(InputPackage {
            name,
            dir,
            descriptor,
        });
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
}

/// Whether a resource (or file) from `package` belongs in the combined
/// package. The CEMS+EIA package contributes only its hourly emissions
/// tables; every other package contributes everything.
fn contributes(package: &str, resource_name: &str) -> bool {
    package != CEMS_EIA_PACKAGE || resource_name.contains(HOURLY_EMISSIONS_PATTERN)
}

/// Verify that packages describing the same upstream source agree on their
/// ETL parameters. Must run before anything destructive.
pub fn check_consistency(packages: &[InputPackage]) -> Result<(), DatastoreError> {
    info!("checking for matching ETL parameters across data packages");
    let mut by_title: BTreeMap<&str, Vec<&Source>> = BTreeMap::new();
    for package in packages {
        for source in &package.descriptor.sources {
            by_title.entry(&source.title).or_default().push(source);
        }
    }

    for (title, sources) in by_title {
        if sources.iter().any(|source| *source != sources[0]) {
            return Err(DatastoreError::InconsistentParameters {
                title: title.to_string(),
            });
        }
    }
    Ok(())
}

/// Build the combined descriptor per the aggregation rules: identity
/// fields from the first package, earliest creation timestamp, structural
/// deduplication of contributors, first-wins deduplication of sources by
/// title, and resource concatenation in package order.
pub fn combine_metadata(
    packages: &[InputPackage],
    output_name: &str,
) -> Result<DataPackage, DatastoreError> {
    let ids: BTreeSet<&str> = packages
        .iter()
        .map(|package| package.descriptor.id.as_str())
        .collect();
    if ids.len() != 1 {
        return Err(DatastoreError::AmbiguousId(ids.len()));
    }

    let first = &packages[0].descriptor;

    let mut created = first.created.clone();
    let mut created_at = first.created_at()?;
    for package in &packages[1..] {
        let candidate = package.descriptor.created_at()?;
        if candidate < created_at {
            created_at = candidate;
            created = package.descriptor.created.clone();
        }
    }

    let mut contributors: Vec<Contributor> = Vec::new();
    let mut sources: Vec<Source> = Vec::new();
    let mut seen_titles: BTreeSet<String> = BTreeSet::new();
    let mut resources: Vec<Resource> = Vec::new();

    for package in packages {
        for contributor in &package.descriptor.contributors {
            if !contributors.contains(contributor) {
                contributors.push(contributor.clone());
            }
        }
        for source in &package.descriptor.sources {
            if seen_titles.insert(source.title.clone()) {
                sources.push(source.clone());
            }
        }
        for resource in &package.descriptor.resources {
            if contributes(&package.name, &resource.name) {
                resources.push(resource.clone());
            }
        }
    }

    Ok(DataPackage {
        name: Some(output_name.to_string()),
        title: Some(COMBINED_TITLE.to_string()),
        id: first.id.clone(),
        profile: first.profile.clone(),
        homepage: first.homepage.clone(),
        created,
        licenses: first.licenses.clone(),
        sources,
        contributors,
        resources,
        extra: BTreeMap::new(),
    })
}

/// Copy the data files of every input package into a fresh output
/// directory. The output directory is deleted and recreated wholesale, so
/// re-running from scratch is the crash-recovery path.
pub fn flatten_files(
    bundle_dir: &Utf8Path,
    packages: &[InputPackage],
    output_name: &str,
) -> Result<(), DatastoreError> {
    let output_dir = bundle_dir.join(output_name);
    if output_dir.as_std_path().exists() {
        fs::remove_dir_all(output_dir.as_std_path())
            .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
    }
    let output_data_dir = output_dir.join("data");
    fs::create_dir_all(output_data_dir.as_std_path())
        .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;

    for package in packages {
        let data_dir = package.dir.join("data");
        if !data_dir.as_std_path().exists() {
            continue;
        }
        let entries = fs::read_dir(data_dir.as_std_path())
            .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if !entry.path().is_file() || !contributes(&package.name, &filename) {
                continue;
            }
            let target = output_data_dir.join(&filename);
            // Same-named files across packages carry identical data once the
            // consistency check has passed, so overwriting is safe.
            if target.as_std_path().exists() {
                debug!(file = %filename, package = %package.name, "overwriting earlier copy");
            }
            fs::copy(entry.path(), target.as_std_path())
                .map_err(|err| DatastoreError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

/// Combine a bundle of data packages into one.
///
/// Consistency checking runs first so a parameter conflict aborts before
/// the output directory is touched. The validator's report (or error) is
/// passed through unchanged.
pub fn flatten<V: PackageValidator>(
    bundle_dir: &Utf8Path,
    output_name: &str,
    validator: &V,
) -> Result<ValidationReport, DatastoreError> {
    let packages = load_bundle(bundle_dir, output_name)?;
    check_consistency(&packages)?;

    info!(output = %output_name, "copying data files into the combined package");
    flatten_files(bundle_dir, &packages, output_name)?;

    info!("combining data package metadata");
    let descriptor = combine_metadata(&packages, output_name)?;

    validator.validate_save(&descriptor, &bundle_dir.join(output_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cems_eia_package_contributes_only_hourly_emissions() {
        assert!(contributes("eia860", "generators_eia860.csv"));
        assert!(contributes(
            CEMS_EIA_PACKAGE,
            "hourly_emissions_epacems_2018_co.csv"
        ));
        assert!(!contributes(CEMS_EIA_PACKAGE, "generators_eia860.csv"));
    }
}
