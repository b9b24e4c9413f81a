use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use kira_seqdb::app::{App, Command, CommandOutput, QueryOptions, USAGE};
use kira_seqdb::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use kira_seqdb::error::{report_exit_code, KiraError};
use kira_seqdb::output::{JsonOutput, OutputMode, TextOutput};
use kira_seqdb::retriever::{AssetRetriever, HttpAssetRetriever};
use kira_seqdb::store::Store;

#[derive(Parser)]
#[command(name = "kira-seqdb")]
#[command(about = "Query a flat-file store of GEO sequencing dataset metadata")]
#[command(version, author, after_help = USAGE)]
struct Cli {
    #[arg(long, help = "Store root directory")]
    root: Option<String>,

    #[arg(long, help = "Path to kira-seqdb.json")]
    config: Option<String>,

    #[arg(short = 's', long, help = "Only consider series records")]
    series_only: bool,

    #[arg(
        short = 'p',
        long = "protocol",
        help = "Restrict to protocols (repeat or comma-separate)"
    )]
    protocols: Vec<String>,

    #[arg(short = 'l', long, help = "Append the previous result set to the arguments")]
    last: bool,

    #[arg(long, help = "Location of the saved result set")]
    last_query: Option<String>,

    #[arg(long, help = "Do not save this result set")]
    no_save: bool,

    #[arg(long)]
    json: bool,

    command: Option<String>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(report_exit_code(&report));
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref())?.apply(ConfigOverrides {
        store_root: cli.root.map(Utf8PathBuf::from),
        series_only: cli.series_only,
        protocols: cli.protocols,
        last_query: cli.last_query.map(Utf8PathBuf::from),
    })?;

    let Some(name) = cli.command else {
        println!("{USAGE}");
        return Ok(());
    };

    let mut args = cli.args;
    if cli.last {
        let session = resolved.last_query()?;
        let spliced = session.splice_into(&mut args)?;
        debug!(tokens = spliced, path = %session.path(), "spliced previous result set");
    }

    let command = match Command::parse(&name, &args) {
        Ok(command) => command,
        Err(err @ (KiraError::UnknownCommand(_) | KiraError::MissingArgument(_))) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let store = Store::new(resolved.require_store_root()?.clone());
    let options = QueryOptions {
        series_only: resolved.series_only,
        protocols: resolved.protocols.clone(),
    };

    let result = if needs_network(&command) {
        let retriever = HttpAssetRetriever::new()?;
        App::new(store, retriever).execute(command, &options)
    } else {
        App::new(store, OfflineRetriever).execute(command, &options)
    };
    let output = result?;

    match output_mode {
        OutputMode::Json => JsonOutput::print(&output).into_diagnostic()?,
        OutputMode::Text => TextOutput::print(&output).into_diagnostic()?,
    }

    if !cli.no_save {
        save_result_set(&resolved, &output);
    }
    Ok(())
}

fn needs_network(command: &Command) -> bool {
    matches!(
        command,
        Command::FetchMatrices { .. } | Command::GetSraList { .. }
    )
}

fn save_result_set(resolved: &ResolvedConfig, output: &CommandOutput) {
    let Some(tokens) = output.tokens() else {
        return;
    };
    let saved = resolved
        .last_query()
        .and_then(|session| session.write(&tokens));
    if let Err(err) = saved {
        warn!(error = %err, "result set not saved");
    }
}

#[derive(Clone, Copy)]
struct OfflineRetriever;

impl AssetRetriever for OfflineRetriever {
    fn fetch_manifest(
        &self,
        _manifest_url: &str,
        _destination: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, KiraError> {
        Err(KiraError::RetrieverHttp(
            "asset retriever not configured".to_string(),
        ))
    }

    fn fetch_listings(&self, urls: &[String]) -> Vec<(String, Result<String, KiraError>)> {
        urls.iter()
            .map(|url| {
                (
                    url.clone(),
                    Err(KiraError::RetrieverHttp(
                        "asset retriever not configured".to_string(),
                    )),
                )
            })
            .collect()
    }
}
