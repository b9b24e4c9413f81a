use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{EntryType, Field, Protocol, RecordId, RecordKey, Relation, Sample, SERIES_TAG};
use crate::error::KiraError;
use crate::store::{RecordSummary, Store};

/// Per-record metadata as extracted from an eSummary response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub id: String,
    #[serde(default)]
    pub accession: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub posted_date: String,
    #[serde(default)]
    pub taxon: String,
    #[serde(default)]
    pub entry_type: String,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub manifest_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub protocol: String,
    pub created: Vec<RecordId>,
    pub imported: Vec<RecordId>,
    pub failed: Vec<ImportFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportFailure {
    pub id: String,
    pub reason: String,
}

/// Reads a newline-delimited id file, as written by an eSearch run.
pub fn read_id_file(path: &Utf8Path) -> Result<BTreeSet<RecordId>, KiraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<RecordId>())
        .collect()
}

pub fn read_metadata_file(path: &Utf8Path) -> Result<Vec<RecordMetadata>, KiraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content).map_err(|err| KiraError::MetadataParse {
        path: path.to_string(),
        reason: err.to_string(),
    })
}

/// Creates the record directories and writes every field. Running it again with the same input
/// rewrites identical files. A record that fails to write is reported and the batch continues.
pub fn import_records(
    store: &Store,
    protocol: &Protocol,
    records: &[RecordMetadata],
) -> Result<ImportReport, KiraError> {
    let mut report = ImportReport {
        protocol: protocol.to_string(),
        ..ImportReport::default()
    };

    let mut ids = BTreeSet::new();
    let mut parsed = Vec::new();
    for record in records {
        match record.id.parse::<RecordId>() {
            Ok(id) => {
                ids.insert(id.clone());
                parsed.push((id, record));
            }
            Err(err) => report.failed.push(ImportFailure {
                id: record.id.clone(),
                reason: err.to_string(),
            }),
        }
    }
    report.created = store.initialize(protocol, &ids)?;

    for (id, record) in parsed {
        let key = RecordKey::new(protocol.clone(), id.clone());
        match write_record(store, &key, record) {
            Ok(()) => report.imported.push(id),
            Err(err) => {
                warn!(record = %key, error = %err, "import failed");
                report.failed.push(ImportFailure {
                    id: id.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
    info!(
        protocol = %protocol,
        imported = report.imported.len(),
        failed = report.failed.len(),
        "import finished"
    );
    Ok(report)
}

fn write_record(store: &Store, key: &RecordKey, record: &RecordMetadata) -> Result<(), KiraError> {
    let manifest_url = record
        .manifest_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    let summary = RecordSummary {
        title: record.title.clone(),
        posted_date: record.posted_date.clone(),
        accession: record.accession.clone(),
        taxon: record.taxon.clone(),
        manifest_url: manifest_url.unwrap_or_default().to_string(),
        summary: record.summary.clone(),
    };
    store.write_field(key, Field::Summary, &summary.render())?;
    store.write_field(key, Field::Taxon, &record.taxon)?;
    store.write_field(key, Field::EntryType, entry_type_tag(&record.entry_type))?;
    store.write_field(key, Field::DataList, &lines(record.samples.iter().map(Sample::to_line)))?;
    store.write_field(
        key,
        Field::Relations,
        &lines(record.relations.iter().map(Relation::to_line)),
    )?;
    if let Some(url) = manifest_url {
        store.write_field(key, Field::MatrixPath, &format!("{url}\n"))?;
    }
    Ok(())
}

/// Series entries are stored as the canonical tag; other values are kept as given.
fn entry_type_tag(raw: &str) -> &str {
    if EntryType::parse(raw).is_series() {
        SERIES_TAG
    } else {
        raw.trim()
    }
}

fn lines(items: impl Iterator<Item = String>) -> String {
    items.map(|line| line + "\n").collect()
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn manifest_file_only_written_when_known() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().join("db")).unwrap());
        let protocol: Protocol = "gro-seq".parse().unwrap();
        let records = vec![
            RecordMetadata {
                id: "1".to_string(),
                accession: "GSE1".to_string(),
                title: "with manifest".to_string(),
                summary: String::new(),
                posted_date: "2012/01/01".to_string(),
                taxon: "Homo sapiens".to_string(),
                entry_type: "GSE".to_string(),
                samples: vec![],
                relations: vec![],
                manifest_url: Some("ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSEnnn/GSE1/".to_string()),
            },
            RecordMetadata {
                id: "2".to_string(),
                accession: "GDS2".to_string(),
                title: "without".to_string(),
                summary: String::new(),
                posted_date: String::new(),
                taxon: "Mus musculus".to_string(),
                entry_type: "GDS".to_string(),
                samples: vec![],
                relations: vec![],
                manifest_url: None,
            },
        ];
        let report = import_records(&store, &protocol, &records).unwrap();
        assert_eq!(report.imported.len(), 2);

        let with = RecordKey::new(protocol.clone(), "1".parse().unwrap());
        let without = RecordKey::new(protocol, "2".parse().unwrap());
        assert!(store.read_manifest_url(&with).unwrap().is_some());
        assert_eq!(store.read_field(&without, Field::MatrixPath).unwrap(), None);
    }

    #[test]
    fn series_entry_type_is_stored_as_tag() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().join("db")).unwrap());
        let protocol: Protocol = "gro-seq".parse().unwrap();
        let series: RecordMetadata =
            serde_json::from_str(r#"{"id": "1", "entry_type": "series"}"#).unwrap();
        let dataset: RecordMetadata =
            serde_json::from_str(r#"{"id": "2", "entry_type": " GDS "}"#).unwrap();
        import_records(&store, &protocol, &[series, dataset]).unwrap();

        let series = RecordKey::new(protocol.clone(), "1".parse().unwrap());
        let dataset = RecordKey::new(protocol, "2".parse().unwrap());
        assert_eq!(
            store.read_field(&series, Field::EntryType).unwrap().as_deref(),
            Some("GSE")
        );
        assert!(store.is_series(&series).unwrap());
        assert_eq!(
            store.read_field(&dataset, Field::EntryType).unwrap().as_deref(),
            Some("GDS")
        );
        assert!(!store.is_series(&dataset).unwrap());
    }

    #[test]
    fn invalid_ids_are_reported() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().join("db")).unwrap());
        let protocol: Protocol = "gro-seq".parse().unwrap();
        let record: RecordMetadata =
            serde_json::from_str(r#"{"id": "../escape", "taxon": "Homo sapiens"}"#).unwrap();
        let report = import_records(&store, &protocol, &[record]).unwrap();
        assert!(report.imported.is_empty());
        assert_eq!(report.failed.len(), 1);
    }
}
