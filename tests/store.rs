use std::collections::BTreeSet;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_seqdb::domain::{AssetState, ContributorKey, Field, Protocol, RecordId, RecordKey};
use kira_seqdb::error::KiraError;
use kira_seqdb::store::Store;

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("db")).unwrap();
    (temp, Store::new(root))
}

fn ids(values: &[&str]) -> BTreeSet<RecordId> {
    values.iter().map(|id| id.parse().unwrap()).collect()
}

fn key(protocol: &str, id: &str) -> RecordKey {
    RecordKey::new(protocol.parse().unwrap(), id.parse().unwrap())
}

#[test]
fn layout_paths() {
    let store = Store::new("/data/geo");
    let record = key("gro-seq", "200013518");

    assert_eq!(store.record_dir(&record).as_str(), "/data/geo/gro-seq/200013518");
    assert!(store.field_path(&record, Field::Taxon).ends_with("200013518/taxon.txt"));
    assert!(store.field_path(&record, Field::EntryType).ends_with("type.txt"));
    assert!(
        store
            .field_path(&record, Field::SraList)
            .ends_with("200013518/200013518.sralist")
    );
    assert!(store.matrices_dir(&record).ends_with("200013518/matrices"));
    assert!(store.data_dir(&record).ends_with("200013518/data"));
}

#[test]
fn initialize_is_idempotent() {
    let (_temp, store) = temp_store();
    let protocol: Protocol = "gro-seq".parse().unwrap();

    let created = store.initialize(&protocol, &ids(&["2", "1"])).unwrap();
    assert_eq!(created.len(), 2);
    let created = store.initialize(&protocol, &ids(&["1", "2", "3"])).unwrap();
    assert_eq!(created, vec!["3".parse::<RecordId>().unwrap()]);

    let listed: Vec<String> = store
        .list_ids(&protocol)
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(listed, vec!["1", "2", "3"]);
}

#[test]
fn initialize_rejects_id_owned_by_other_protocol() {
    let (_temp, store) = temp_store();
    store
        .initialize(&"gro-seq".parse().unwrap(), &ids(&["7"]))
        .unwrap();

    let result = store.initialize(&"pro-seq".parse().unwrap(), &ids(&["8", "7"]));
    assert_matches!(result, Err(KiraError::DuplicateRecord { ref id, ref existing })
        if id == "7" && existing == "gro-seq");
    assert!(!store.exists(&key("pro-seq", "8")));
}

#[test]
fn fields_round_trip_and_missing_record_fails() {
    let (_temp, store) = temp_store();
    let record = key("gro-seq", "1");
    store
        .initialize(&record.protocol, &ids(&["1"]))
        .unwrap();

    assert_eq!(store.read_field(&record, Field::Taxon).unwrap(), None);
    store
        .write_field(&record, Field::Taxon, "Homo sapiens; Mus musculus")
        .unwrap();
    assert_eq!(
        store.read_taxa(&record).unwrap(),
        vec!["Homo sapiens", "Mus musculus"]
    );

    let missing = key("gro-seq", "404");
    assert_matches!(
        store.read_field(&missing, Field::Taxon),
        Err(KiraError::RecordNotFound { .. })
    );
    assert_matches!(
        store.write_field(&missing, Field::Taxon, "x"),
        Err(KiraError::RecordNotFound { .. })
    );
}

#[test]
fn series_flag_reads_type_file() {
    let (_temp, store) = temp_store();
    let protocol: Protocol = "chip-seq".parse().unwrap();
    store.initialize(&protocol, &ids(&["1", "2", "3"])).unwrap();
    store
        .write_field(&key("chip-seq", "1"), Field::EntryType, "GSE\n")
        .unwrap();
    store
        .write_field(&key("chip-seq", "2"), Field::EntryType, "GDS\n")
        .unwrap();

    assert!(store.is_series(&key("chip-seq", "1")).unwrap());
    assert!(!store.is_series(&key("chip-seq", "2")).unwrap());
    assert!(!store.is_series(&key("chip-seq", "3")).unwrap());
}

#[test]
fn asset_state_follows_files() {
    let (_temp, store) = temp_store();
    let record = key("gro-seq", "5");
    store.initialize(&record.protocol, &ids(&["5"])).unwrap();
    assert_eq!(store.asset_state(&record).unwrap(), AssetState::Unfetched);

    store
        .write_field(&record, Field::MatrixPath, "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE5/\n")
        .unwrap();
    assert_eq!(store.asset_state(&record).unwrap(), AssetState::ManifestKnown);
    assert_eq!(
        store.read_manifest_url(&record).unwrap().as_deref(),
        Some("ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE5/")
    );

    assert_matches!(
        store.matrix_files(&record),
        Err(KiraError::FieldUnavailable { .. })
    );
    store.ensure_matrices_dir(&record).unwrap();
    assert_eq!(store.asset_state(&record).unwrap(), AssetState::AssetsFetched);
    assert!(store.matrix_files(&record).unwrap().is_empty());

    store
        .write_field(&record, Field::SraList, "SRR000001\n")
        .unwrap();
    assert_eq!(store.asset_state(&record).unwrap(), AssetState::SraResolved);
    assert_eq!(
        store.read_sra_list(&record).unwrap(),
        Some(vec!["SRR000001".to_string()])
    );

    fs::create_dir_all(store.data_dir(&record).as_std_path()).unwrap();
    assert_eq!(store.asset_state(&record).unwrap(), AssetState::DataDownloaded);
}

#[test]
fn locate_resolves_bare_ids() {
    let (_temp, store) = temp_store();
    store
        .initialize(&"gro-seq".parse().unwrap(), &ids(&["10"]))
        .unwrap();
    store
        .initialize(&"pro-seq".parse().unwrap(), &ids(&["20"]))
        .unwrap();
    fs::create_dir_all(store.record_dir(&key("pro-seq", "10")).as_std_path()).unwrap();

    assert_eq!(
        store.locate(&"20".parse().unwrap()).unwrap(),
        key("pro-seq", "20")
    );
    assert_matches!(
        store.locate(&"10".parse().unwrap()),
        Err(KiraError::AmbiguousLookup { matches: 2, .. })
    );
    assert_matches!(
        store.locate(&"30".parse().unwrap()),
        Err(KiraError::RecordNotFound { .. })
    );
}

#[test]
fn contributor_cache_round_trip() {
    let (_temp, store) = temp_store();
    let record = key("gro-seq", "1");
    store.initialize(&record.protocol, &ids(&["1"])).unwrap();
    assert_eq!(store.read_contributor(&record).unwrap(), None);

    let contributor = ContributorKey::new("Core", "2008").unwrap();
    store.write_contributor(&record, &contributor).unwrap();
    assert_eq!(
        store.read_field(&record, Field::NameCache).unwrap().as_deref().map(str::trim),
        Some("Core2008")
    );
    assert_eq!(store.read_contributor(&record).unwrap(), Some(contributor));

    store.write_field(&record, Field::NameCache, "2008").unwrap();
    assert_matches!(
        store.read_contributor(&record),
        Err(KiraError::MalformedAsset { .. })
    );
}
