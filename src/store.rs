use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::debug;

use crate::domain::{
    AssetState, ContributorKey, EntryType, Field, Protocol, RecordId, RecordKey, Relation, Sample,
};
use crate::error::KiraError;

const MATRICES_DIR: &str = "matrices";
const DATA_DIR: &str = "data";

/// Directory-backed record store: `<root>/<protocol>/<id>/<field file>`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn protocol_dir(&self, protocol: &Protocol) -> Utf8PathBuf {
        self.root.join(protocol.as_str())
    }

    pub fn record_dir(&self, key: &RecordKey) -> Utf8PathBuf {
        self.protocol_dir(&key.protocol).join(key.id.as_str())
    }

    pub fn field_path(&self, key: &RecordKey, field: Field) -> Utf8PathBuf {
        self.record_dir(key).join(field.file_name(&key.id))
    }

    pub fn matrices_dir(&self, key: &RecordKey) -> Utf8PathBuf {
        self.record_dir(key).join(MATRICES_DIR)
    }

    pub fn data_dir(&self, key: &RecordKey) -> Utf8PathBuf {
        self.record_dir(key).join(DATA_DIR)
    }

    pub fn exists(&self, key: &RecordKey) -> bool {
        self.record_dir(key).as_std_path().is_dir()
    }

    /// Creates one empty record directory per id. Existing directories are left alone; an id
    /// already present under another protocol is rejected before anything is created.
    pub fn initialize(
        &self,
        protocol: &Protocol,
        ids: &BTreeSet<RecordId>,
    ) -> Result<Vec<RecordId>, KiraError> {
        let owners = self.id_owners()?;
        for id in ids {
            if let Some(existing) = owners
                .get(id)
                .and_then(|protocols| protocols.iter().find(|owner| *owner != protocol))
            {
                return Err(KiraError::DuplicateRecord {
                    id: id.to_string(),
                    existing: existing.to_string(),
                });
            }
        }

        let mut created = Vec::new();
        for id in ids {
            let dir = self.record_dir(&RecordKey::new(protocol.clone(), id.clone()));
            if dir.as_std_path().is_dir() {
                continue;
            }
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            created.push(id.clone());
        }
        debug!(protocol = %protocol, created = created.len(), "initialized records");
        Ok(created)
    }

    /// Returns `None` when the record exists but the field has not been written yet.
    pub fn read_field(&self, key: &RecordKey, field: Field) -> Result<Option<String>, KiraError> {
        if !self.exists(key) {
            return Err(key.not_found());
        }
        let path = self.field_path(key, field);
        if !path.as_std_path().is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        Ok(Some(content))
    }

    pub fn write_field(&self, key: &RecordKey, field: Field, value: &str) -> Result<(), KiraError> {
        if !self.exists(key) {
            return Err(key.not_found());
        }
        Self::write_bytes_atomic(&self.field_path(key, field), value.as_bytes())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem(format!("invalid field path: {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".kira-seqdb-field")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn is_series(&self, key: &RecordKey) -> Result<bool, KiraError> {
        Ok(self
            .read_field(key, Field::EntryType)?
            .map(|raw| EntryType::parse(&raw).is_series())
            .unwrap_or(false))
    }

    pub fn list_protocols(&self) -> Result<BTreeSet<Protocol>, KiraError> {
        if !self.root.as_std_path().is_dir() {
            return Ok(BTreeSet::new());
        }
        let mut protocols = BTreeSet::new();
        for name in list_subdirs(&self.root)? {
            match name.parse::<Protocol>() {
                Ok(protocol) => {
                    protocols.insert(protocol);
                }
                Err(_) => debug!(entry = %name, "skipping non-protocol directory"),
            }
        }
        Ok(protocols)
    }

    pub fn list_ids(&self, protocol: &Protocol) -> Result<Vec<RecordId>, KiraError> {
        let dir = self.protocol_dir(protocol);
        if !dir.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = list_subdirs(&dir)?
            .into_iter()
            .filter_map(|name| name.parse::<RecordId>().ok())
            .collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    pub fn list_keys(&self, protocol: &Protocol) -> Result<Vec<RecordKey>, KiraError> {
        Ok(self
            .list_ids(protocol)?
            .into_iter()
            .map(|id| RecordKey::new(protocol.clone(), id))
            .collect())
    }

    /// Resolves a bare id to the single protocol holding it.
    pub fn locate(&self, id: &RecordId) -> Result<RecordKey, KiraError> {
        let mut found = Vec::new();
        for protocol in self.list_protocols()? {
            let key = RecordKey::new(protocol, id.clone());
            if self.exists(&key) {
                found.push(key);
            }
        }
        match found.len() {
            0 => Err(KiraError::not_found("*", id.as_str())),
            1 => Ok(found.remove(0)),
            matches => Err(KiraError::AmbiguousLookup {
                query: id.to_string(),
                matches,
            }),
        }
    }

    /// Maps every id to the protocols it appears under.
    pub fn id_owners(&self) -> Result<BTreeMap<RecordId, Vec<Protocol>>, KiraError> {
        let mut owners = BTreeMap::<RecordId, Vec<Protocol>>::new();
        for protocol in self.list_protocols()? {
            for id in self.list_ids(&protocol)? {
                owners.entry(id).or_default().push(protocol.clone());
            }
        }
        Ok(owners)
    }

    pub fn asset_state(&self, key: &RecordKey) -> Result<AssetState, KiraError> {
        if !self.exists(key) {
            return Err(key.not_found());
        }
        let state = if self.data_dir(key).as_std_path().is_dir() {
            AssetState::DataDownloaded
        } else if self.field_path(key, Field::SraList).as_std_path().is_file() {
            AssetState::SraResolved
        } else if self.matrices_dir(key).as_std_path().is_dir() {
            AssetState::AssetsFetched
        } else if self.field_path(key, Field::MatrixPath).as_std_path().is_file() {
            AssetState::ManifestKnown
        } else {
            AssetState::Unfetched
        };
        Ok(state)
    }

    pub fn ensure_matrices_dir(&self, key: &RecordKey) -> Result<Utf8PathBuf, KiraError> {
        if !self.exists(key) {
            return Err(key.not_found());
        }
        let dir = self.matrices_dir(key);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(dir)
    }

    /// Files under `matrices/`, sorted by name.
    pub fn matrix_files(&self, key: &RecordKey) -> Result<Vec<Utf8PathBuf>, KiraError> {
        let dir = self.matrices_dir(key);
        if !dir.as_std_path().is_dir() {
            return Err(key.unavailable_dir(MATRICES_DIR));
        }
        let mut files = Vec::new();
        for entry in
            fs::read_dir(dir.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?
        {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|_| KiraError::Filesystem("non-utf8 file path in matrices".to_string()))?;
            if path.as_std_path().is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn read_taxa(&self, key: &RecordKey) -> Result<Vec<String>, KiraError> {
        Ok(self
            .read_field(key, Field::Taxon)?
            .map(|raw| split_taxa(&raw))
            .unwrap_or_default())
    }

    pub fn read_samples(&self, key: &RecordKey) -> Result<Vec<Sample>, KiraError> {
        Ok(self
            .read_field(key, Field::DataList)?
            .map(|raw| raw.lines().filter_map(Sample::parse_line).collect())
            .unwrap_or_default())
    }

    pub fn read_relations(&self, key: &RecordKey) -> Result<Vec<Relation>, KiraError> {
        Ok(self
            .read_field(key, Field::Relations)?
            .map(|raw| raw.lines().filter_map(Relation::parse_line).collect())
            .unwrap_or_default())
    }

    pub fn read_manifest_url(&self, key: &RecordKey) -> Result<Option<String>, KiraError> {
        Ok(self
            .read_field(key, Field::MatrixPath)?
            .map(|raw| raw.trim().to_string())
            .filter(|url| !url.is_empty()))
    }

    /// `None` only when no cache file exists. A cache file that does not unpack is a
    /// `MalformedAsset`; it is left on disk for the caller to report.
    pub fn read_contributor(&self, key: &RecordKey) -> Result<Option<ContributorKey>, KiraError> {
        let Some(raw) = self.read_field(key, Field::NameCache)? else {
            return Ok(None);
        };
        ContributorKey::unpack(&raw)
            .map(Some)
            .map_err(|err| KiraError::MalformedAsset {
                id: key.to_string(),
                reason: format!("unreadable name cache: {err}"),
            })
    }

    pub fn write_contributor(
        &self,
        key: &RecordKey,
        contributor: &ContributorKey,
    ) -> Result<(), KiraError> {
        self.write_field(key, Field::NameCache, &contributor.pack())
    }

    pub fn read_sra_list(&self, key: &RecordKey) -> Result<Option<Vec<String>>, KiraError> {
        Ok(self.read_field(key, Field::SraList)?.map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        }))
    }

    pub fn read_summary(&self, key: &RecordKey) -> Result<Option<RecordSummary>, KiraError> {
        Ok(self
            .read_field(key, Field::Summary)?
            .map(|raw| RecordSummary::parse(&raw)))
    }
}

impl RecordKey {
    fn unavailable_dir(&self, name: &str) -> KiraError {
        KiraError::FieldUnavailable {
            protocol: self.protocol.to_string(),
            id: self.id.to_string(),
            field: format!("{name}/"),
        }
    }
}

/// Splits a `taxon.txt` value into trimmed, non-empty species names, keeping repeats.
pub fn split_taxa(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// The fields kept together in `summary.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub title: String,
    pub posted_date: String,
    pub accession: String,
    pub taxon: String,
    pub manifest_url: String,
    pub summary: String,
}

const TITLE_PREFIX: &str = "Title: ";
const POSTED_PREFIX: &str = "Posted: ";
const ACCESSION_PREFIX: &str = "Accession nr: ";
const SPECIES_PREFIX: &str = "Species: ";
const MANIFEST_PREFIX: &str = "Matrix URL/FTP Link: ";
const SUMMARY_MARKER: &str = "Summary (begins on next line):";

impl RecordSummary {
    pub fn render(&self) -> String {
        format!(
            "{TITLE_PREFIX}{}\n{POSTED_PREFIX}{}\n{ACCESSION_PREFIX}{}\n{SPECIES_PREFIX}{}\n{MANIFEST_PREFIX}{}\n{SUMMARY_MARKER}\n{}",
            self.title, self.posted_date, self.accession, self.taxon, self.manifest_url, self.summary
        )
    }

    /// Lenient: missing header lines leave the matching fields empty.
    pub fn parse(raw: &str) -> Self {
        let mut summary = RecordSummary::default();
        let mut lines = raw.lines();
        for line in lines.by_ref() {
            if line.trim_end() == SUMMARY_MARKER {
                break;
            }
            if let Some(value) = strip(line, TITLE_PREFIX) {
                summary.title = value;
            } else if let Some(value) = strip(line, POSTED_PREFIX) {
                summary.posted_date = value;
            } else if let Some(value) = strip(line, ACCESSION_PREFIX) {
                summary.accession = value;
            } else if let Some(value) = strip(line, SPECIES_PREFIX) {
                summary.taxon = value;
            } else if let Some(value) = strip(line, MANIFEST_PREFIX) {
                summary.manifest_url = value;
            }
        }
        summary.summary = lines.collect::<Vec<_>>().join("\n");
        summary
    }
}

fn strip(line: &str, prefix: &str) -> Option<String> {
    line.strip_prefix(prefix.trim_end())
        .map(|value| value.trim().to_string())
}

fn list_subdirs(dir: &Utf8Path) -> Result<Vec<String>, KiraError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("db")).unwrap();
        (temp, Store::new(root))
    }

    fn key(protocol: &str, id: &str) -> RecordKey {
        RecordKey::new(protocol.parse().unwrap(), id.parse().unwrap())
    }

    #[test]
    fn layout_paths() {
        let store = Store::new("/data/db");
        let key = key("gro-seq", "200012345");
        assert!(
            store
                .field_path(&key, Field::Taxon)
                .ends_with("gro-seq/200012345/taxon.txt")
        );
        assert!(
            store
                .field_path(&key, Field::SraList)
                .ends_with("gro-seq/200012345/200012345.sralist")
        );
    }

    #[test]
    fn missing_record_is_not_found() {
        let (_temp, store) = temp_store();
        let err = store.read_field(&key("gro-seq", "1"), Field::Taxon).unwrap_err();
        assert_matches!(err, KiraError::RecordNotFound { .. });
    }

    #[test]
    fn optional_field_reads_as_none() {
        let (_temp, store) = temp_store();
        let protocol: Protocol = "gro-seq".parse().unwrap();
        store
            .initialize(&protocol, &BTreeSet::from(["1".parse().unwrap()]))
            .unwrap();
        let key = key("gro-seq", "1");
        assert_eq!(store.read_field(&key, Field::MatrixPath).unwrap(), None);
        assert_eq!(store.read_manifest_url(&key).unwrap(), None);
        assert!(!store.is_series(&key).unwrap());
    }

    #[test]
    fn summary_render_parse() {
        let summary = RecordSummary {
            title: "GRO-seq in HeLa".to_string(),
            posted_date: "2014/05/01".to_string(),
            accession: "GSE12345".to_string(),
            taxon: "Homo sapiens".to_string(),
            manifest_url: String::new(),
            summary: "Line one\nLine two".to_string(),
        };
        assert_eq!(RecordSummary::parse(&summary.render()), summary);
    }

    #[test]
    fn split_taxa_keeps_repeats() {
        assert_eq!(
            split_taxa(" Homo sapiens ;Mus musculus; Homo sapiens;"),
            vec!["Homo sapiens", "Mus musculus", "Homo sapiens"]
        );
    }
}
