use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::{AssetState, ContributorKey, Field, Protocol, RecordId, RecordKey};
use crate::error::KiraError;
use crate::index::{IndexBuilder, IndexedRecord, Indexes, ScanReport, Selection, SpeciesCount};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct RecordHit {
    pub key: RecordKey,
    pub path: Utf8PathBuf,
    pub title: Option<String>,
    pub contributor: Option<ContributorKey>,
    pub asset_state: AssetState,
}

impl RecordHit {
    /// `[protocol] Contributor2015 id: title`
    pub fn title_line(&self) -> String {
        let title = self.title.as_deref().unwrap_or("(untitled)");
        match &self.contributor {
            Some(contributor) => format!(
                "[{}] {} {}: {}",
                self.key.protocol, contributor, self.key.id, title
            ),
            None => format!("[{}] {}: {}", self.key.protocol, self.key.id, title),
        }
    }
}

impl From<&IndexedRecord> for RecordHit {
    fn from(record: &IndexedRecord) -> Self {
        Self {
            key: record.key.clone(),
            path: record.path.clone(),
            title: record.title.clone(),
            contributor: record.contributor.clone(),
            asset_state: record.asset_state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolOverlap {
    pub left: Protocol,
    pub right: Protocol,
    pub ids: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistinctCount {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordStatus {
    pub key: RecordKey,
    pub summary: String,
    pub manifest_url: Option<String>,
    pub asset_state: AssetState,
    pub data_path: Option<Utf8PathBuf>,
}

/// Read-only queries over the indexes of one selection of the store.
pub struct QueryEngine {
    indexes: Indexes,
}

impl QueryEngine {
    pub fn build(store: &Store, selection: Selection) -> Result<Self, KiraError> {
        let indexes = IndexBuilder::new(store, selection).build()?;
        Ok(Self { indexes })
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    pub fn report(&self) -> &ScanReport {
        &self.indexes.report
    }

    /// Species by descending mention count; ties keep scan order.
    pub fn list_species(&self) -> Vec<SpeciesCount> {
        let mut counts = self.indexes.species.counts().to_vec();
        counts.sort_by(|left, right| right.count.cmp(&left.count));
        counts
    }

    /// Records naming `name` as one of their species. Matching is case-insensitive on whole
    /// tokens. `protocols` narrows the selection further when non-empty.
    pub fn find_by_species(&self, name: &str, protocols: &BTreeSet<Protocol>) -> Vec<RecordHit> {
        let wanted = name.trim().to_lowercase();
        self.hits(|record| {
            (protocols.is_empty() || protocols.contains(&record.key.protocol))
                && record
                    .taxa
                    .iter()
                    .any(|taxon| taxon.to_lowercase() == wanted)
        })
    }

    pub fn find_by_protocol(&self, protocol: &Protocol) -> Vec<RecordHit> {
        self.hits(|record| &record.key.protocol == protocol)
    }

    pub fn find_by_contributor(&self, surname: &str) -> Vec<RecordHit> {
        self.hits(|record| {
            record
                .contributor
                .as_ref()
                .map(|contributor| contributor.matches_surname(surname))
                .unwrap_or(false)
        })
    }

    pub fn find_by_year(&self, year: &str) -> Vec<RecordHit> {
        let year = year.trim();
        self.hits(|record| {
            record
                .contributor
                .as_ref()
                .map(|contributor| contributor.year == year)
                .unwrap_or(false)
        })
    }

    /// Manifest URL known, MINiML files not fetched yet.
    pub fn find_ready_for_asset_fetch(&self) -> Vec<RecordHit> {
        self.hits(|record| record.asset_state == AssetState::ManifestKnown)
    }

    /// MINiML files present, SRA links not resolved yet.
    pub fn find_ready_for_sra_resolution(&self) -> Vec<RecordHit> {
        self.hits(|record| record.asset_state == AssetState::AssetsFetched)
    }

    /// SRA link list resolved, raw data not downloaded yet.
    pub fn find_ready_for_download(&self) -> Vec<RecordHit> {
        self.hits(|record| record.asset_state == AssetState::SraResolved)
    }

    /// Ids shared by each unordered pair of protocols. An empty `protocols` set means every
    /// protocol in the selection.
    pub fn protocol_overlap(&self, protocols: &BTreeSet<Protocol>) -> Vec<ProtocolOverlap> {
        let chosen = if protocols.is_empty() {
            self.indexes.protocols.protocols().cloned().collect::<Vec<_>>()
        } else {
            protocols.iter().cloned().collect()
        };

        let mut overlaps = Vec::new();
        for (position, left) in chosen.iter().enumerate() {
            for right in &chosen[position + 1..] {
                overlaps.push(ProtocolOverlap {
                    left: left.clone(),
                    right: right.clone(),
                    ids: intersect_sorted(
                        self.indexes.protocols.ids(left),
                        self.indexes.protocols.ids(right),
                    ),
                });
            }
        }
        overlaps
    }

    /// Groups contributor caches by `extractor` and counts them, most frequent first. Empty keys
    /// are dropped.
    pub fn list_distinct<F>(&self, extractor: F) -> Vec<DistinctCount>
    where
        F: Fn(&ContributorKey) -> String,
    {
        let mut positions = HashMap::<String, usize>::new();
        let mut counts: Vec<DistinctCount> = Vec::new();
        for (_, contributor) in &self.indexes.contributors {
            let key = extractor(contributor);
            if key.trim().is_empty() {
                continue;
            }
            match positions.get(&key) {
                Some(&position) => counts[position].count += 1,
                None => {
                    positions.insert(key.clone(), counts.len());
                    counts.push(DistinctCount { key, count: 1 });
                }
            }
        }
        counts.sort_by(|left, right| right.count.cmp(&left.count));
        counts
    }

    pub fn list_years(&self) -> Vec<DistinctCount> {
        self.list_distinct(|contributor| contributor.year.clone())
    }

    pub fn list_contributors(&self) -> Vec<DistinctCount> {
        self.list_distinct(|contributor| contributor.surname.clone())
    }

    fn hits(&self, predicate: impl Fn(&IndexedRecord) -> bool) -> Vec<RecordHit> {
        self.indexes
            .records
            .iter()
            .filter(|record| predicate(record))
            .map(RecordHit::from)
            .collect()
    }
}

/// Summary and pipeline status of one record. Fails for that record if it or its summary is
/// missing.
pub fn record_status(store: &Store, key: &RecordKey) -> Result<RecordStatus, KiraError> {
    let summary = store
        .read_field(key, Field::Summary)?
        .ok_or_else(|| key.unavailable(Field::Summary))?;
    let asset_state = store.asset_state(key)?;
    Ok(RecordStatus {
        key: key.clone(),
        summary,
        manifest_url: store.read_manifest_url(key)?,
        asset_state,
        data_path: (asset_state == AssetState::DataDownloaded).then(|| store.data_dir(key)),
    })
}

/// Sort-merge intersection of two id lists sorted by `RecordId` order.
pub fn intersect_sorted(left: &[RecordId], right: &[RecordId]) -> Vec<RecordId> {
    let mut shared = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                shared.push(left[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = values.iter().map(|id| id.parse().unwrap()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn intersect_sorted_ids() {
        assert_eq!(
            intersect_sorted(&ids(&["10", "20", "100"]), &ids(&["20", "30", "100"])),
            ids(&["20", "100"])
        );
        assert!(intersect_sorted(&ids(&["1"]), &[]).is_empty());
    }

    #[test]
    fn title_line_includes_contributor() {
        let hit = RecordHit {
            key: "gro-seq/200013518".parse().unwrap(),
            path: Utf8PathBuf::from("/db/gro-seq/200013518"),
            title: Some("Nascent transcription in IMR90".to_string()),
            contributor: Some(ContributorKey::new("Core", "2008").unwrap()),
            asset_state: AssetState::AssetsFetched,
        };
        assert_eq!(
            hit.title_line(),
            "[gro-seq] Core2008 200013518: Nascent transcription in IMR90"
        );
    }
}
