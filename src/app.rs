use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{AssetState, ContributorKey, Field, Protocol, RecordKey};
use crate::error::KiraError;
use crate::importer::{self, ImportReport};
use crate::index::{Selection, SpeciesCount};
use crate::miniml;
use crate::query::{self, DistinctCount, ProtocolOverlap, QueryEngine, RecordHit, RecordStatus};
use crate::retriever::AssetRetriever;
use crate::store::Store;

pub const USAGE: &str = "\
Commands:
  listspecies                    species by number of datasets
  findspecies <species name>     datasets naming a species
  findprotocol <protocol>        datasets under one protocol
  findcontributor <surname>      datasets by first contributor
  findyear <year>                datasets by latest publication year
  listyears                      publication years by frequency
  listcontributors               first contributors by frequency
  readyforfetch                  datasets with a matrix URL and no fetched matrices
  readyforsra                    datasets with matrices and no SRA list
  readyfordownload               datasets with a resolved SRA list
  overlap                        ids shared between protocols
  protocols                      protocols and dataset counts
  getsummary <ids...>            summary and status of datasets
  fetchmatrices <ids...>         download MINiML matrices for datasets
  getsralist <ids...>            resolve SRA run lists for datasets
  init <protocol> <idfile>       create empty records from an id list
  import <protocol> <json file>  write record metadata into the store";

/// One parsed invocation of the command surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ListSpecies,
    FindSpecies { name: String },
    FindProtocol { protocol: Protocol },
    FindContributor { surname: String },
    FindYear { year: String },
    ListYears,
    ListContributors,
    ReadyForFetch,
    ReadyForSra,
    ReadyForDownload,
    Overlap,
    Protocols,
    GetSummary { targets: Vec<String> },
    FetchMatrices { targets: Vec<String> },
    GetSraList { targets: Vec<String> },
    Init { protocol: Protocol, id_file: Utf8PathBuf },
    Import { protocol: Protocol, metadata_file: Utf8PathBuf },
}

impl Command {
    pub fn parse(name: &str, args: &[String]) -> Result<Self, KiraError> {
        let joined = || {
            let value = args.join(" ");
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let targets = |what: &str| {
            if args.is_empty() {
                Err(KiraError::MissingArgument(format!("{name} needs {what}")))
            } else {
                Ok(args.to_vec())
            }
        };
        let first = |what: &str| {
            args.first()
                .cloned()
                .ok_or_else(|| KiraError::MissingArgument(format!("{name} needs {what}")))
        };

        match name {
            "listspecies" => Ok(Command::ListSpecies),
            "findspecies" => Ok(Command::FindSpecies {
                name: joined().ok_or_else(|| {
                    KiraError::MissingArgument("findspecies needs a species name".to_string())
                })?,
            }),
            "findprotocol" => Ok(Command::FindProtocol {
                protocol: first("a protocol")?.parse()?,
            }),
            "findcontributor" => Ok(Command::FindContributor {
                surname: joined().ok_or_else(|| {
                    KiraError::MissingArgument("findcontributor needs a surname".to_string())
                })?,
            }),
            "findyear" => Ok(Command::FindYear {
                year: first("a year")?,
            }),
            "listyears" => Ok(Command::ListYears),
            "listcontributors" => Ok(Command::ListContributors),
            "readyforfetch" => Ok(Command::ReadyForFetch),
            "readyforsra" => Ok(Command::ReadyForSra),
            "readyfordownload" => Ok(Command::ReadyForDownload),
            "overlap" => Ok(Command::Overlap),
            "protocols" => Ok(Command::Protocols),
            "getsummary" => Ok(Command::GetSummary {
                targets: targets("at least one id")?,
            }),
            "fetchmatrices" => Ok(Command::FetchMatrices {
                targets: targets("at least one id")?,
            }),
            "getsralist" => Ok(Command::GetSraList {
                targets: targets("at least one id")?,
            }),
            "init" => {
                let protocol = first("a protocol and an id file")?.parse()?;
                let id_file = args.get(1).ok_or_else(|| {
                    KiraError::MissingArgument("init needs a protocol and an id file".to_string())
                })?;
                Ok(Command::Init {
                    protocol,
                    id_file: Utf8PathBuf::from(id_file),
                })
            }
            "import" => {
                let protocol = first("a protocol and a metadata file")?.parse()?;
                let metadata_file = args.get(1).ok_or_else(|| {
                    KiraError::MissingArgument(
                        "import needs a protocol and a metadata file".to_string(),
                    )
                })?;
                Ok(Command::Import {
                    protocol,
                    metadata_file: Utf8PathBuf::from(metadata_file),
                })
            }
            _ => Err(KiraError::UnknownCommand(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub series_only: bool,
    pub protocols: BTreeSet<Protocol>,
}

impl QueryOptions {
    fn selection(&self) -> Selection {
        Selection::all()
            .series_only(self.series_only)
            .with_protocols(self.protocols.iter().cloned())
    }
}

/// Per-target result of a multi-target command.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome<T> {
    pub target: String,
    pub key: Option<RecordKey>,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> ItemOutcome<T> {
    fn ok(target: &str, key: RecordKey, result: T) -> Self {
        Self {
            target: target.to_string(),
            key: Some(key),
            result: Some(result),
            error: None,
        }
    }

    fn failed(target: &str, key: Option<RecordKey>, error: &KiraError) -> Self {
        warn!(target = %target, error = %error, "command failed for target");
        Self {
            target: target.to_string(),
            key,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub action: String,
    pub files: Vec<Utf8PathBuf>,
    pub contributor: Option<ContributorKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SraReport {
    pub action: String,
    pub entries: Vec<String>,
    pub failed_listings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolCount {
    pub protocol: Protocol,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutput {
    Species {
        series_only: bool,
        species: Vec<SpeciesCount>,
        total: usize,
        skipped: usize,
    },
    Records {
        heading: String,
        records: Vec<RecordHit>,
        skipped: usize,
    },
    Distinct {
        heading: String,
        entries: Vec<DistinctCount>,
    },
    Overlap {
        overlaps: Vec<ProtocolOverlap>,
    },
    Protocols {
        protocols: Vec<ProtocolCount>,
    },
    Summaries {
        items: Vec<ItemOutcome<RecordStatus>>,
    },
    Fetch {
        items: Vec<ItemOutcome<FetchReport>>,
    },
    SraLists {
        items: Vec<ItemOutcome<SraReport>>,
    },
    Import {
        report: ImportReport,
    },
}

impl CommandOutput {
    /// Tokens to save as the next invocation's last query. `None` leaves the saved set alone.
    pub fn tokens(&self) -> Option<Vec<String>> {
        match self {
            CommandOutput::Records { records, .. } => {
                Some(records.iter().map(|hit| hit.path.to_string()).collect())
            }
            CommandOutput::Overlap { overlaps } => {
                let mut seen = BTreeSet::new();
                Some(
                    overlaps
                        .iter()
                        .flat_map(|overlap| {
                            overlap.ids.iter().flat_map(move |id| {
                                [
                                    RecordKey::new(overlap.left.clone(), id.clone()),
                                    RecordKey::new(overlap.right.clone(), id.clone()),
                                ]
                            })
                        })
                        .filter(|key| seen.insert(key.clone()))
                        .map(|key| key.to_string())
                        .collect(),
                )
            }
            CommandOutput::Summaries { items } => Some(succeeded(items)),
            CommandOutput::Fetch { items } => Some(succeeded(items)),
            CommandOutput::SraLists { items } => Some(succeeded(items)),
            CommandOutput::Import { report } => Some(
                report
                    .imported
                    .iter()
                    .map(|id| format!("{}/{id}", report.protocol))
                    .collect(),
            ),
            CommandOutput::Species { .. }
            | CommandOutput::Distinct { .. }
            | CommandOutput::Protocols { .. } => None,
        }
    }
}

fn succeeded<T>(items: &[ItemOutcome<T>]) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.result.is_some())
        .filter_map(|item| item.key.as_ref().map(RecordKey::to_string))
        .collect()
}

#[derive(Clone)]
pub struct App<R: AssetRetriever> {
    store: Store,
    retriever: R,
}

impl<R: AssetRetriever> App<R> {
    pub fn new(store: Store, retriever: R) -> Self {
        Self { store, retriever }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn retriever(&self) -> &R {
        &self.retriever
    }

    pub fn execute(
        &self,
        command: Command,
        options: &QueryOptions,
    ) -> Result<CommandOutput, KiraError> {
        match command {
            Command::ListSpecies => {
                let engine = self.engine(options)?;
                let species = engine.list_species();
                Ok(CommandOutput::Species {
                    series_only: options.series_only,
                    total: species.iter().map(|entry| entry.count).sum(),
                    species,
                    skipped: engine.report().skipped.len(),
                })
            }
            Command::FindSpecies { name } => {
                let engine = self.engine(options)?;
                let records = engine.find_by_species(&name, &options.protocols);
                Ok(records_output(&engine, format!("datasets matching \"{name}\""), records))
            }
            Command::FindProtocol { protocol } => {
                let engine = self.engine(options)?;
                let records = engine.find_by_protocol(&protocol);
                Ok(records_output(&engine, format!("datasets under {protocol}"), records))
            }
            Command::FindContributor { surname } => {
                let engine = self.engine(options)?;
                let records = engine.find_by_contributor(&surname);
                Ok(records_output(&engine, format!("datasets by {surname}"), records))
            }
            Command::FindYear { year } => {
                let engine = self.engine(options)?;
                let records = engine.find_by_year(&year);
                Ok(records_output(&engine, format!("datasets from {year}"), records))
            }
            Command::ListYears => Ok(CommandOutput::Distinct {
                heading: "publication years".to_string(),
                entries: self.engine(options)?.list_years(),
            }),
            Command::ListContributors => Ok(CommandOutput::Distinct {
                heading: "contributors".to_string(),
                entries: self.engine(options)?.list_contributors(),
            }),
            Command::ReadyForFetch => {
                let engine = self.engine(options)?;
                let records = engine.find_ready_for_asset_fetch();
                Ok(records_output(&engine, "ready for fetchmatrices".to_string(), records))
            }
            Command::ReadyForSra => {
                let engine = self.engine(options)?;
                let records = engine.find_ready_for_sra_resolution();
                Ok(records_output(&engine, "ready for getsralist".to_string(), records))
            }
            Command::ReadyForDownload => {
                let engine = self.engine(options)?;
                let records = engine.find_ready_for_download();
                Ok(records_output(&engine, "ready for download".to_string(), records))
            }
            Command::Overlap => Ok(CommandOutput::Overlap {
                overlaps: self.engine(options)?.protocol_overlap(&options.protocols),
            }),
            Command::Protocols => {
                let engine = self.engine(options)?;
                let protocols = engine.indexes().protocols.protocols().cloned().collect::<Vec<_>>();
                Ok(CommandOutput::Protocols {
                    protocols: protocols
                        .into_iter()
                        .map(|protocol| ProtocolCount {
                            records: engine.indexes().protocols.ids(&protocol).len(),
                            protocol,
                        })
                        .collect(),
                })
            }
            Command::GetSummary { targets } => Ok(CommandOutput::Summaries {
                items: self.for_each_target(&targets, |key| query::record_status(&self.store, key)),
            }),
            Command::FetchMatrices { targets } => Ok(CommandOutput::Fetch {
                items: self.for_each_target(&targets, |key| self.fetch_matrices(key)),
            }),
            Command::GetSraList { targets } => Ok(CommandOutput::SraLists {
                items: self.for_each_target(&targets, |key| self.resolve_sra_list(key)),
            }),
            Command::Init { protocol, id_file } => {
                let ids = importer::read_id_file(&id_file)?;
                let created = self.store.initialize(&protocol, &ids)?;
                info!(protocol = %protocol, created = created.len(), requested = ids.len(), "store initialized");
                Ok(CommandOutput::Import {
                    report: ImportReport {
                        protocol: protocol.to_string(),
                        created,
                        imported: ids.into_iter().collect(),
                        failed: Vec::new(),
                    },
                })
            }
            Command::Import {
                protocol,
                metadata_file,
            } => {
                let records = importer::read_metadata_file(&metadata_file)?;
                Ok(CommandOutput::Import {
                    report: importer::import_records(&self.store, &protocol, &records)?,
                })
            }
        }
    }

    /// Resolves a last-query token or user argument to a record: a record path, a
    /// `protocol/id` pair, or a bare id that exactly one protocol holds.
    pub fn resolve_target(&self, token: &str) -> Result<RecordKey, KiraError> {
        let token = token.trim().trim_end_matches('/');
        if !token.contains('/') {
            return self.store.locate(&token.parse()?);
        }
        let path = Utf8Path::new(token);
        let mut components = path.components().rev();
        let id = components
            .next()
            .ok_or_else(|| KiraError::InvalidRecordId(token.to_string()))?;
        let protocol = components
            .next()
            .ok_or_else(|| KiraError::InvalidRecordId(token.to_string()))?;
        let key = RecordKey::new(protocol.as_str().parse()?, id.as_str().parse()?);
        if !self.store.exists(&key) {
            return Err(key.not_found());
        }
        Ok(key)
    }

    /// Downloads a record's MINiML files into `matrices/` and derives its contributor cache.
    /// Records that already have matrices are left untouched.
    pub fn fetch_matrices(&self, key: &RecordKey) -> Result<FetchReport, KiraError> {
        let state = self.store.asset_state(key)?;
        if state >= AssetState::AssetsFetched {
            return Ok(FetchReport {
                action: "present".to_string(),
                files: self.store.matrix_files(key)?,
                contributor: self.cached_contributor(key)?,
            });
        }
        let manifest_url = self
            .store
            .read_manifest_url(key)?
            .ok_or_else(|| key.unavailable(Field::MatrixPath))?;

        let record_dir = self.store.record_dir(key);
        let staging = tempfile::Builder::new()
            .prefix(".kira-seqdb-matrices")
            .tempdir_in(record_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let staging_path = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
            .map_err(|_| KiraError::Filesystem("non-utf8 staging path".to_string()))?;
        self.retriever.fetch_manifest(&manifest_url, &staging_path)?;
        fs::rename(staging.path(), self.store.matrices_dir(key).as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let files = self.store.matrix_files(key)?;
        let contributor = match self.store.read_contributor(key) {
            Ok(Some(cached)) => Some(cached),
            Err(err) if err.is_soft() => {
                warn!(record = %key, error = %err, "keeping unreadable name cache");
                None
            }
            Err(err) => return Err(err),
            Ok(None) => match miniml::contributor_from_files(key, &files) {
                Ok(contributor) => {
                    self.store.write_contributor(key, &contributor)?;
                    Some(contributor)
                }
                Err(err) if err.is_soft() => {
                    warn!(record = %key, error = %err, "no contributor in fetched matrices");
                    None
                }
                Err(err) => return Err(err),
            },
        };
        Ok(FetchReport {
            action: "fetched".to_string(),
            files,
            contributor,
        })
    }

    /// Resolves the SRA runs behind a record's MINiML relations into `<id>.sralist`. An existing
    /// list is returned as is.
    pub fn resolve_sra_list(&self, key: &RecordKey) -> Result<SraReport, KiraError> {
        if let Some(entries) = self.store.read_sra_list(key)? {
            return Ok(SraReport {
                action: "present".to_string(),
                entries,
                failed_listings: Vec::new(),
            });
        }
        let files = self.store.matrix_files(key)?;
        let targets = miniml::sra_targets_from_files(key, &files)?;
        if targets.is_empty() {
            return Err(KiraError::MalformedAsset {
                id: key.to_string(),
                reason: "no SRA relations in matrices".to_string(),
            });
        }

        let mut fetched = Vec::new();
        let mut failed_listings = Vec::new();
        for (url, result) in self.retriever.fetch_listings(&targets) {
            match result {
                Ok(content) => fetched.push((url, content)),
                Err(err) => {
                    warn!(record = %key, url = %url, error = %err, "listing fetch failed");
                    failed_listings.push(url);
                }
            }
        }
        let entries = miniml::flatten_listings(&targets, fetched);
        if entries.is_empty() {
            return Err(KiraError::RetrieverHttp(format!(
                "no SRA runs resolved for {key}"
            )));
        }
        let mut content = entries.join("\n");
        content.push('\n');
        self.store.write_field(key, Field::SraList, &content)?;
        Ok(SraReport {
            action: "resolved".to_string(),
            entries,
            failed_listings,
        })
    }

    fn cached_contributor(&self, key: &RecordKey) -> Result<Option<ContributorKey>, KiraError> {
        match self.store.read_contributor(key) {
            Err(err) if err.is_soft() => {
                warn!(record = %key, error = %err, "keeping unreadable name cache");
                Ok(None)
            }
            other => other,
        }
    }

    fn engine(&self, options: &QueryOptions) -> Result<QueryEngine, KiraError> {
        QueryEngine::build(&self.store, options.selection())
    }

    fn for_each_target<T>(
        &self,
        targets: &[String],
        operation: impl Fn(&RecordKey) -> Result<T, KiraError>,
    ) -> Vec<ItemOutcome<T>> {
        targets
            .iter()
            .map(|target| match self.resolve_target(target) {
                Ok(key) => match operation(&key) {
                    Ok(result) => ItemOutcome::ok(target, key, result),
                    Err(err) => ItemOutcome::failed(target, Some(key), &err),
                },
                Err(err) => ItemOutcome::failed(target, None, &err),
            })
            .collect()
    }
}

fn records_output(engine: &QueryEngine, heading: String, records: Vec<RecordHit>) -> CommandOutput {
    CommandOutput::Records {
        heading,
        records,
        skipped: engine.report().skipped.len(),
    }
}
