//! Field extraction from fetched MINiML files (`matrices/`) and SRA listing pages.
//!
//! Only the handful of fields the index needs are pulled out; the documents are not validated
//! against the GEO schema.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::LazyLock;

use camino::Utf8Path;
use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::domain::{ContributorKey, RecordKey};
use crate::error::KiraError;

static CONTRIBUTOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Contributor\b[^>]*>(.*?)</Contributor>").unwrap());
static LAST_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Last>\s*(.*?)\s*</Last>").unwrap());
static RELEASE_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Release-Date>\s*([^<]+?)\s*</Release-Date>").unwrap());
static SRA_RELATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<Relation\b[^>]*\btype="SRA"[^>]*\btarget="([^"]+)""#).unwrap()
});
static SRA_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[SED]RR\d+\b").unwrap());

/// Surname of the first person contributor in the document.
pub fn first_contributor_surname(xml: &str) -> Option<String> {
    CONTRIBUTOR_RE
        .captures_iter(xml)
        .filter_map(|block| {
            LAST_NAME_RE
                .captures(&block[1])
                .map(|last| unescape(last[1].trim()))
        })
        .find(|surname| !surname.is_empty())
}

/// Latest `Release-Date` year in the document.
pub fn latest_release_year(xml: &str) -> Option<i32> {
    RELEASE_DATE_RE
        .captures_iter(xml)
        .filter_map(|date| NaiveDate::parse_from_str(&date[1], "%Y-%m-%d").ok())
        .map(|date| date.year())
        .max()
}

/// `target` URLs of `<Relation type="SRA">` elements, in document order.
pub fn sra_relation_targets(xml: &str) -> Vec<String> {
    SRA_RELATION_RE
        .captures_iter(xml)
        .map(|target| unescape(&target[1]))
        .collect()
}

/// Builds the contributor key from every MINiML file of a record: the surname comes from the
/// first file naming a person contributor, the year is the latest release year across files.
pub fn contributor_from_files(
    key: &RecordKey,
    files: &[impl AsRef<Utf8Path>],
) -> Result<ContributorKey, KiraError> {
    let mut surname = None;
    let mut year: Option<i32> = None;
    for path in files.iter().map(AsRef::<Utf8Path>::as_ref).filter(|path| is_xml(path)) {
        let xml = read_document(key, path)?;
        if surname.is_none() {
            surname = first_contributor_surname(&xml);
        }
        if let Some(found) = latest_release_year(&xml) {
            year = Some(year.map_or(found, |current| current.max(found)));
        }
    }

    let surname = surname.ok_or_else(|| malformed(key, "no contributor block"))?;
    let year = year.ok_or_else(|| malformed(key, "no release date"))?;
    ContributorKey::new(surname, year.to_string())
        .map_err(|err| malformed(key, &err.to_string()))
}

/// SRA relation targets across all MINiML files of a record, in file order.
pub fn sra_targets_from_files(
    key: &RecordKey,
    files: &[impl AsRef<Utf8Path>],
) -> Result<Vec<String>, KiraError> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for path in files.iter().map(AsRef::<Utf8Path>::as_ref).filter(|path| is_xml(path)) {
        let xml = read_document(key, path)?;
        for target in sra_relation_targets(&xml) {
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }
    }
    Ok(targets)
}

/// Run accessions mentioned in a listing page, first mention wins.
pub fn listing_entries(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    SRA_RUN_RE
        .find_iter(content)
        .map(|run| run.as_str().to_string())
        .filter(|run| seen.insert(run.clone()))
        .collect()
}

/// Orders listing results by the URL list they were requested with, whatever order they arrived
/// in, and concatenates their entries. URLs with no result contribute nothing; repeated entries
/// keep their first position.
pub fn flatten_listings(urls: &[String], results: Vec<(String, String)>) -> Vec<String> {
    let mut by_url = results.into_iter().collect::<HashMap<_, _>>();
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for url in urls {
        let Some(content) = by_url.remove(url) else {
            continue;
        };
        for entry in listing_entries(&content) {
            if seen.insert(entry.clone()) {
                entries.push(entry);
            }
        }
    }
    entries
}

fn is_xml(path: &Utf8Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

fn read_document(key: &RecordKey, path: &Utf8Path) -> Result<String, KiraError> {
    let bytes =
        fs::read(path.as_std_path()).map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    String::from_utf8(bytes).map_err(|_| malformed(key, &format!("{path} is not UTF-8")))
}

fn malformed(key: &RecordKey, reason: &str) -> KiraError {
    KiraError::MalformedAsset {
        id: key.to_string(),
        reason: reason.to_string(),
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MINiML>
  <Contributor iid="contrib1">
    <Organization>Some Institute</Organization>
  </Contributor>
  <Contributor iid="contrib2">
    <Person><First>Leighton</First><Last>Core</Last></Person>
  </Contributor>
  <Contributor iid="contrib3">
    <Person><First>John</First><Last>Lis</Last></Person>
  </Contributor>
  <Sample iid="GSM1">
    <Status database="GEO">
      <Release-Date>2008-12-04</Release-Date>
    </Status>
    <Relation type="SRA" target="https://www.ncbi.nlm.nih.gov/sra?term=SRX003869" />
  </Sample>
  <Series iid="GSE13518">
    <Status database="GEO">
      <Release-Date>2009-01-20</Release-Date>
    </Status>
  </Series>
</MINiML>
"#;

    #[test]
    fn surname_skips_organizations() {
        assert_eq!(first_contributor_surname(SERIES_XML).as_deref(), Some("Core"));
    }

    #[test]
    fn latest_year_wins() {
        assert_eq!(latest_release_year(SERIES_XML), Some(2009));
    }

    #[test]
    fn sra_targets_in_order() {
        assert_eq!(
            sra_relation_targets(SERIES_XML),
            vec!["https://www.ncbi.nlm.nih.gov/sra?term=SRX003869"]
        );
    }

    #[test]
    fn listing_entries_deduplicate() {
        let page = r#"<a href="SRR014966/">SRR014966</a> <a href="SRR014967/">SRR014967</a>"#;
        assert_eq!(listing_entries(page), vec!["SRR014966", "SRR014967"]);
    }

    #[test]
    fn flatten_follows_request_order() {
        let urls = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = vec![
            ("c".to_string(), "SRR3".to_string()),
            ("a".to_string(), "SRR1 SRR2".to_string()),
            ("b".to_string(), "SRR2 SRR4".to_string()),
        ];
        assert_eq!(
            flatten_listings(&urls, results),
            vec!["SRR1", "SRR2", "SRR4", "SRR3"]
        );
    }
}
