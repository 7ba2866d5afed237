use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};

use pudl_datapkg::datapackage::DataPackage;
use pudl_datapkg::error::DatastoreError;
use pudl_datapkg::flatten::{
    self, CEMS_EIA_PACKAGE, PackageValidator, PersistingValidator, ValidationReport,
    check_consistency, combine_metadata, load_bundle,
};

fn write_package(bundle_dir: &Path, name: &str, descriptor: Value, files: &[(&str, &str)]) {
    let pkg_dir = bundle_dir.join(name);
    let data_dir = pkg_dir.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        pkg_dir.join("datapackage.json"),
        serde_json::to_vec_pretty(&descriptor).unwrap(),
    )
    .unwrap();
    for (filename, content) in files {
        fs::write(data_dir.join(filename), content).unwrap();
    }
}

fn descriptor(created: &str, sources: Value, resources: Value) -> Value {
    json!({
        "id": "u-u-i-d",
        "profile": "tabular-data-package",
        "homepage": "https://catalyst.coop/pudl/",
        "created": created,
        "licenses": [{"name": "CC-BY-4.0"}],
        "sources": sources,
        "contributors": [{"title": "Catalyst Cooperative", "role": "author"}],
        "resources": resources,
    })
}

fn resource(name: &str) -> Value {
    json!({"name": name, "path": format!("data/{name}"), "parts": {}})
}

fn bundle_utf8(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn output_files(output_dir: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(output_dir.join("data").as_std_path()).unwrap() {
        let entry = entry.unwrap();
        files.insert(
            entry.file_name().to_string_lossy().to_string(),
            fs::read(entry.path()).unwrap(),
        );
    }
    files
}

#[test]
fn flatten_merges_two_packages() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    write_package(
        temp.path(),
        "a",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "X", "param": 1}]),
            json!([resource("r1.csv")]),
        ),
        &[("r1.csv", "id,value\n1,a\n")],
    );
    write_package(
        temp.path(),
        "b",
        descriptor(
            "2020-02-01T09:00:00+00:00",
            json!([{"title": "X", "param": 1}]),
            json!([resource("r2.csv")]),
        ),
        &[("r2.csv", "id,value\n2,b\n")],
    );

    let report = flatten::flatten(&bundle, "pudl-all", &PersistingValidator).unwrap();
    assert!(report.valid);
    assert_eq!(report.resources, 2);

    let combined =
        DataPackage::from_path(bundle.join("pudl-all/datapackage.json").as_std_path()).unwrap();
    assert_eq!(combined.name.as_deref(), Some("pudl-all"));
    assert_eq!(combined.sources.len(), 1);
    assert_eq!(combined.sources[0].title, "X");
    assert_eq!(combined.contributors.len(), 1);
    // earliest timestamp across the bundle wins
    assert_eq!(combined.created, "2020-02-01T09:00:00+00:00");
    let names: Vec<&str> = combined
        .resources
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["r1.csv", "r2.csv"]);

    let files = output_files(&bundle.join("pudl-all"));
    assert_eq!(files["r1.csv"], b"id,value\n1,a\n");
    assert_eq!(files["r2.csv"], b"id,value\n2,b\n");
}

#[test]
fn conflicting_parameters_abort_before_any_copy() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    write_package(
        temp.path(),
        "a",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "X", "param": 1}]),
            json!([resource("r1.csv")]),
        ),
        &[("r1.csv", "1")],
    );
    write_package(
        temp.path(),
        "b",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "X", "param": 2}]),
            json!([resource("r2.csv")]),
        ),
        &[("r2.csv", "2")],
    );

    let err = flatten::flatten(&bundle, "pudl-all", &PersistingValidator).unwrap_err();
    assert_matches!(err, DatastoreError::InconsistentParameters { title } if title == "X");
    assert!(!bundle.join("pudl-all").as_std_path().exists());
}

#[test]
fn consistency_check_accepts_structurally_equal_sources() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    // same parameters, different JSON field order
    write_package(
        temp.path(),
        "a",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "X", "years": [2017, 2018], "states": ["co"]}]),
            json!([]),
        ),
        &[],
    );
    write_package(
        temp.path(),
        "b",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"states": ["co"], "years": [2017, 2018], "title": "X"}]),
            json!([]),
        ),
        &[],
    );

    let packages = load_bundle(&bundle, "pudl-all").unwrap();
    check_consistency(&packages).unwrap();
}

#[test]
fn ambiguous_package_id_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    let mut a = descriptor("2020-02-01T10:00:00+00:00", json!([]), json!([]));
    let mut b = a.clone();
    a["id"] = json!("id-one");
    b["id"] = json!("id-two");
    write_package(temp.path(), "a", a, &[]);
    write_package(temp.path(), "b", b, &[]);

    let packages = load_bundle(&bundle, "pudl-all").unwrap();
    let err = combine_metadata(&packages, "pudl-all").unwrap_err();
    assert_matches!(err, DatastoreError::AmbiguousId(2));
}

#[test]
fn cems_eia_package_contributes_only_hourly_emissions() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    write_package(
        temp.path(),
        "eia860",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "EIA 860"}]),
            json!([resource("generators_eia860.csv")]),
        ),
        &[("generators_eia860.csv", "gens")],
    );
    write_package(
        temp.path(),
        CEMS_EIA_PACKAGE,
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "EPA CEMS"}, {"title": "EIA 860"}]),
            json!([
                resource("hourly_emissions_epacems_2018_co.csv"),
                resource("generators_eia860.csv"),
            ]),
        ),
        &[
            ("hourly_emissions_epacems_2018_co.csv", "cems"),
            ("generators_eia860.csv", "gens"),
        ],
    );

    let report = flatten::flatten(&bundle, "pudl-all", &PersistingValidator).unwrap();
    assert_eq!(report.resources, 2);

    let combined =
        DataPackage::from_path(bundle.join("pudl-all/datapackage.json").as_std_path()).unwrap();
    let names: Vec<&str> = combined
        .resources
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "generators_eia860.csv",
            "hourly_emissions_epacems_2018_co.csv"
        ]
    );

    let files = output_files(&bundle.join("pudl-all"));
    assert_eq!(files.len(), 2);
    assert!(files.contains_key("hourly_emissions_epacems_2018_co.csv"));
}

#[test]
fn flatten_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    write_package(
        temp.path(),
        "a",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "X", "param": 1}]),
            json!([resource("r1.csv")]),
        ),
        &[("r1.csv", "id,value\n1,a\n")],
    );

    flatten::flatten(&bundle, "pudl-all", &PersistingValidator).unwrap();
    let output_dir = bundle.join("pudl-all");
    let first_files = output_files(&output_dir);
    let first_descriptor = fs::read(output_dir.join("datapackage.json").as_std_path()).unwrap();

    flatten::flatten(&bundle, "pudl-all", &PersistingValidator).unwrap();
    assert_eq!(output_files(&output_dir), first_files);
    assert_eq!(
        fs::read(output_dir.join("datapackage.json").as_std_path()).unwrap(),
        first_descriptor
    );
}

#[test]
fn package_order_is_lexicographic_not_creation_order() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    // created in reverse lexicographic order on purpose
    write_package(
        temp.path(),
        "zeta",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "Z"}]),
            json!([resource("z.csv")]),
        ),
        &[("z.csv", "z")],
    );
    write_package(
        temp.path(),
        "alpha",
        descriptor(
            "2020-02-01T10:00:00+00:00",
            json!([{"title": "A"}]),
            json!([resource("a.csv")]),
        ),
        &[("a.csv", "a")],
    );

    let packages = load_bundle(&bundle, "pudl-all").unwrap();
    let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);

    let combined = combine_metadata(&packages, "pudl-all").unwrap();
    let resources: Vec<&str> = combined
        .resources
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(resources, vec!["a.csv", "z.csv"]);
}

#[test]
fn dedup_is_order_independent_across_packages() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    let mut a = descriptor(
        "2020-02-01T10:00:00+00:00",
        json!([{"title": "X", "param": 1}, {"title": "Y"}]),
        json!([]),
    );
    a["contributors"] = json!([
        {"title": "Catalyst Cooperative", "role": "author"},
        {"title": "Climate Policy Initiative"},
    ]);
    let b = descriptor(
        "2020-02-01T10:00:00+00:00",
        json!([{"title": "Y"}, {"title": "X", "param": 1}]),
        json!([]),
    );
    write_package(temp.path(), "a", a, &[]);
    write_package(temp.path(), "b", b, &[]);

    let packages = load_bundle(&bundle, "pudl-all").unwrap();
    let mut reversed = packages.clone();
    reversed.reverse();

    let forward = combine_metadata(&packages, "pudl-all").unwrap();
    let backward = combine_metadata(&reversed, "pudl-all").unwrap();

    let titles = |pkg: &DataPackage| {
        let mut t: Vec<String> = pkg.sources.iter().map(|s| s.title.clone()).collect();
        t.sort();
        t
    };
    assert_eq!(titles(&forward), titles(&backward));
    assert_eq!(forward.contributors.len(), backward.contributors.len());
    for contributor in &forward.contributors {
        assert!(backward.contributors.contains(contributor));
    }
}

#[test]
fn missing_bundle_directory_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let missing = Utf8PathBuf::from_path_buf(temp.path().join("no-such-bundle")).unwrap();
    let err = flatten::flatten(&missing, "pudl-all", &PersistingValidator).unwrap_err();
    assert_matches!(err, DatastoreError::MissingBundle(_));
}

struct RejectingValidator;

impl PackageValidator for RejectingValidator {
    fn validate_save(
        &self,
        _descriptor: &DataPackage,
        _pkg_dir: &Utf8Path,
    ) -> Result<ValidationReport, DatastoreError> {
        Err(DatastoreError::Validation("schema violation".to_string()))
    }
}

#[test]
fn validator_errors_pass_through_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    let bundle = bundle_utf8(&temp);
    write_package(
        temp.path(),
        "a",
        descriptor("2020-02-01T10:00:00+00:00", json!([]), json!([])),
        &[],
    );

    let err = flatten::flatten(&bundle, "pudl-all", &RejectingValidator).unwrap_err();
    assert_matches!(err, DatastoreError::Validation(_));
}
