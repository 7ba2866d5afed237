use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use pudl_datapkg::datastore::Datastore;
use pudl_datapkg::domain::ZenodoEnv;
use pudl_datapkg::error::DatastoreError;
use pudl_datapkg::flatten::{self, DEFAULT_OUTPUT_NAME, PersistingValidator};
use pudl_datapkg::output::JsonOutput;
use pudl_datapkg::registry::ArchiveRegistry;
use pudl_datapkg::settings::Settings;
use pudl_datapkg::store::Store;
use pudl_datapkg::zenodo::ZenodoHttpClient;

#[derive(Parser)]
#[command(name = "pudl-dpkg")]
#[command(about = "Fetch PUDL dataset archives and flatten data package bundles")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download a dataset's files into the local cache")]
    Fetch(FetchArgs),
    #[command(about = "Combine a bundle of data packages into one")]
    Flatten(FlattenArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Dataset name, e.g. eia860
    dataset: String,

    /// Restrict downloads to resources whose parts match, e.g. --filter year=2018
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    filters: Vec<String>,

    /// Re-download the descriptor even if cached
    #[arg(long)]
    force: bool,

    /// Use the Zenodo sandbox instead of production
    #[arg(long)]
    sandbox: bool,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Args)]
struct FlattenArgs {
    /// Directory holding the bundle of data packages; defaults to
    /// `datapackage_dir` from the settings file
    bundle_dir: Option<Utf8PathBuf>,

    /// Name of the combined output package
    #[arg(long, default_value = DEFAULT_OUTPUT_NAME)]
    name: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<DatastoreError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DatastoreError) -> u8 {
    match error {
        DatastoreError::UnknownDataset(_)
        | DatastoreError::MalformedDoi(_)
        | DatastoreError::MissingSettings
        | DatastoreError::SettingsRead(_)
        | DatastoreError::SettingsParse(_)
        | DatastoreError::InvalidFilter(_) => 2,
        DatastoreError::RemoteHttp(_) | DatastoreError::RemoteFetch { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch(args) => run_fetch(args),
        Commands::Flatten(args) => run_flatten(args),
    }
}

fn run_fetch(args: FetchArgs) -> miette::Result<()> {
    let env = if args.sandbox {
        ZenodoEnv::Sandbox
    } else {
        ZenodoEnv::Production
    };
    let settings = Settings::resolve().into_diagnostic()?;
    let registry = ArchiveRegistry::for_env(env);
    let client =
        ZenodoHttpClient::with_timeout(&registry, Duration::from_secs(args.timeout_secs))
            .into_diagnostic()?;
    let store = Store::new(settings.pudl_in);
    let datastore = Datastore::new(store, registry, client);

    if args.force {
        datastore.descriptor(&args.dataset, true).into_diagnostic()?;
    }
    let filters = parse_filters(&args.filters).into_diagnostic()?;
    let summary = datastore
        .download_resources(&args.dataset, &filters)
        .into_diagnostic()?;
    JsonOutput::print_download(&summary).into_diagnostic()?;
    Ok(())
}

fn run_flatten(args: FlattenArgs) -> miette::Result<()> {
    let bundle_dir = match args.bundle_dir {
        Some(dir) => dir,
        None => Settings::resolve()
            .into_diagnostic()?
            .datapackage_dir
            .ok_or_else(|| {
                miette::Report::msg(
                    "bundle directory required (pass it, or set datapackage_dir in .pudl.json)",
                )
            })?,
    };
    let report =
        flatten::flatten(&bundle_dir, &args.name, &PersistingValidator).into_diagnostic()?;
    JsonOutput::print_report(&report).into_diagnostic()?;
    Ok(())
}

/// `key=value` pairs; values parse as JSON scalars when they can (so
/// `year=2018` matches a numeric part) and fall back to strings.
fn parse_filters(pairs: &[String]) -> Result<BTreeMap<String, Value>, DatastoreError> {
    let mut filters = BTreeMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| DatastoreError::InvalidFilter(pair.clone()))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        filters.insert(key.to_string(), value);
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filters_parse_scalars_and_strings() {
        let filters =
            parse_filters(&["year=2018".to_string(), "state=co".to_string()]).unwrap();
        assert_eq!(filters["year"], json!(2018));
        assert_eq!(filters["state"], json!("co"));
    }

    #[test]
    fn filters_reject_bare_keys() {
        assert!(parse_filters(&["year".to_string()]).is_err());
    }
}
