use std::fs;

use assert_matches::assert_matches;

use kira_seqdb::config::{Config, ConfigLoader};
use kira_seqdb::error::KiraError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-seqdb.json");
    fs::write(
        &path,
        r#"{
  "store_root": "/data/geo",
  "series_only": true,
  "protocols": ["gro-seq", "pro-seq,chip-seq"],
  "last_query": "/tmp/kira-last.txt"
}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.require_store_root().unwrap().as_str(), "/data/geo");
    assert!(resolved.series_only);
    assert_eq!(resolved.protocols.len(), 3);
    assert_eq!(
        resolved.last_query().unwrap().path().as_str(),
        "/tmp/kira-last.txt"
    );
}

#[test]
fn explicit_missing_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-seqdb.json");
    fs::write(&path, "{ store_root: ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn missing_store_root_is_reported() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_matches!(
        resolved.require_store_root(),
        Err(KiraError::MissingStoreRoot)
    );
}

#[test]
fn invalid_protocol_in_config() {
    let config: Config = serde_json::from_str(r#"{"protocols": ["../x"]}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidProtocol(_))
    );
}
