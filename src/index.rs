use std::collections::{BTreeMap, BTreeSet, HashMap};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{AssetState, ContributorKey, Protocol, RecordId, RecordKey};
use crate::error::KiraError;
use crate::miniml;
use crate::store::Store;

/// Which part of the store an index covers. Protocol restriction and the series filter compose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub series_only: bool,
    pub protocols: Option<BTreeSet<Protocol>>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn series_only(mut self, series_only: bool) -> Self {
        self.series_only = series_only;
        self
    }

    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = Protocol>) -> Self {
        let protocols = protocols.into_iter().collect::<BTreeSet<_>>();
        self.protocols = (!protocols.is_empty()).then_some(protocols);
        self
    }

    fn includes_protocol(&self, protocol: &Protocol) -> bool {
        self.protocols
            .as_ref()
            .map(|protocols| protocols.contains(protocol))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedRecord {
    pub key: RecordKey,
    pub path: Utf8PathBuf,
    pub title: Option<String>,
    pub taxa: Vec<String>,
    pub is_series: bool,
    pub asset_state: AssetState,
    pub contributor: Option<ContributorKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesCount {
    pub name: String,
    pub count: usize,
}

/// Species mention counts in first-seen order, plus the paths of every scanned record.
#[derive(Debug, Clone, Default)]
pub struct SpeciesIndex {
    counts: Vec<SpeciesCount>,
    positions: HashMap<String, usize>,
    records: Vec<Utf8PathBuf>,
}

impl SpeciesIndex {
    fn add(&mut self, record: &IndexedRecord) {
        self.records.push(record.path.clone());
        for name in &record.taxa {
            match self.positions.get(name) {
                Some(&position) => self.counts[position].count += 1,
                None => {
                    self.positions.insert(name.clone(), self.counts.len());
                    self.counts.push(SpeciesCount {
                        name: name.clone(),
                        count: 1,
                    });
                }
            }
        }
    }

    pub fn counts(&self) -> &[SpeciesCount] {
        &self.counts
    }

    pub fn records(&self) -> &[Utf8PathBuf] {
        &self.records
    }

    pub fn mentions(&self) -> usize {
        self.counts.iter().map(|entry| entry.count).sum()
    }
}

/// Protocol to ids, each list in store order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProtocolIndex {
    members: BTreeMap<Protocol, Vec<RecordId>>,
}

impl ProtocolIndex {
    pub fn protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.members.keys()
    }

    pub fn ids(&self, protocol: &Protocol) -> &[RecordId] {
        self.members
            .get(protocol)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub key: RecordKey,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateId {
    pub id: RecordId,
    pub protocols: Vec<Protocol>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub skipped: Vec<SkippedRecord>,
    pub malformed_assets: Vec<SkippedRecord>,
    pub contributors_cached: usize,
    pub duplicates: Vec<DuplicateId>,
}

#[derive(Debug, Clone)]
pub struct Indexes {
    pub selection: Selection,
    pub records: Vec<IndexedRecord>,
    pub species: SpeciesIndex,
    pub protocols: ProtocolIndex,
    pub contributors: Vec<(RecordKey, ContributorKey)>,
    pub report: ScanReport,
}

pub struct IndexBuilder<'a> {
    store: &'a Store,
    selection: Selection,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(store: &'a Store, selection: Selection) -> Self {
        Self { store, selection }
    }

    /// Scans every selected record. Unreadable records are skipped and listed in the report.
    pub fn build(self) -> Result<Indexes, KiraError> {
        let mut report = ScanReport::default();
        let mut records = Vec::new();
        let mut species = SpeciesIndex::default();
        let mut members = BTreeMap::<Protocol, Vec<RecordId>>::new();
        let mut contributors = Vec::new();
        let mut owners = BTreeMap::<RecordId, Vec<Protocol>>::new();

        for protocol in self.store.list_protocols()? {
            if !self.selection.includes_protocol(&protocol) {
                continue;
            }
            let ids = members.entry(protocol.clone()).or_default();
            for key in self.store.list_keys(&protocol)? {
                report.scanned += 1;
                owners
                    .entry(key.id.clone())
                    .or_default()
                    .push(protocol.clone());
                let record = match self.scan_record(&key, &mut report) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(record = %key, error = %err, "skipping unreadable record");
                        report.skipped.push(SkippedRecord {
                            key,
                            reason: err.to_string(),
                        });
                        continue;
                    }
                };
                if self.selection.series_only && !record.is_series {
                    continue;
                }
                ids.push(key.id.clone());
                species.add(&record);
                if let Some(contributor) = &record.contributor {
                    contributors.push((key.clone(), contributor.clone()));
                }
                records.push(record);
            }
        }

        report.duplicates = owners
            .into_iter()
            .filter(|(_, protocols)| protocols.len() > 1)
            .map(|(id, protocols)| DuplicateId { id, protocols })
            .collect();
        for duplicate in &report.duplicates {
            warn!(id = %duplicate.id, count = duplicate.protocols.len(), "id present under several protocols");
        }
        debug!(
            scanned = report.scanned,
            indexed = records.len(),
            skipped = report.skipped.len(),
            "index built"
        );

        Ok(Indexes {
            selection: self.selection,
            records,
            species,
            protocols: ProtocolIndex { members },
            contributors,
            report,
        })
    }

    fn scan_record(
        &self,
        key: &RecordKey,
        report: &mut ScanReport,
    ) -> Result<IndexedRecord, KiraError> {
        let is_series = self.store.is_series(key)?;
        let taxa = self.store.read_taxa(key)?;
        let title = self
            .store
            .read_summary(key)?
            .map(|summary| summary.title)
            .filter(|title| !title.is_empty());
        let asset_state = self.store.asset_state(key)?;
        let contributor = self.contributor(key, asset_state, report)?;
        Ok(IndexedRecord {
            key: key.clone(),
            path: self.store.record_dir(key),
            title,
            taxa,
            is_series,
            asset_state,
            contributor,
        })
    }

    /// Cached value first; otherwise derived from the MINiML files once and persisted. An
    /// unreadable cache is reported and never overwritten.
    fn contributor(
        &self,
        key: &RecordKey,
        asset_state: AssetState,
        report: &mut ScanReport,
    ) -> Result<Option<ContributorKey>, KiraError> {
        match self.store.read_contributor(key) {
            Ok(Some(cached)) => return Ok(Some(cached)),
            Ok(None) => {}
            Err(err) if err.is_soft() => {
                warn!(record = %key, error = %err, "keeping unreadable name cache");
                report.malformed_assets.push(SkippedRecord {
                    key: key.clone(),
                    reason: err.to_string(),
                });
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
        if asset_state < AssetState::AssetsFetched {
            return Ok(None);
        }
        let files = self.store.matrix_files(key)?;
        match miniml::contributor_from_files(key, &files) {
            Ok(contributor) => {
                if let Err(err) = self.store.write_contributor(key, &contributor) {
                    warn!(record = %key, error = %err, "could not persist name cache");
                } else {
                    report.contributors_cached += 1;
                }
                Ok(Some(contributor))
            }
            Err(err) if err.is_soft() => {
                debug!(record = %key, error = %err, "contributor not derivable");
                report.malformed_assets.push(SkippedRecord {
                    key: key.clone(),
                    reason: err.to_string(),
                });
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
