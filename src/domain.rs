use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Stored `type.txt` value for a series record.
pub const SERIES_TAG: &str = "GSE";

/// Acquisition method a record was produced with; top-level grouping of the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Protocol(String);

impl Protocol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Protocol {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_path_component(normalized) {
            return Err(KiraError::InvalidProtocol(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Source repository id of a record (the GEO DataSets UID).
///
/// Ordering puts numeric ids first, by value, then everything else lexically, so directory
/// scans come out in the order the ids were issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(left), Some(right)) => left.cmp(&right).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_path_component(normalized) {
            return Err(KiraError::InvalidRecordId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

fn is_path_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub protocol: Protocol,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(protocol: Protocol, id: RecordId) -> Self {
        Self { protocol, id }
    }

    pub fn not_found(&self) -> KiraError {
        KiraError::not_found(self.protocol.as_str(), self.id.as_str())
    }

    pub fn unavailable(&self, field: Field) -> KiraError {
        KiraError::FieldUnavailable {
            protocol: self.protocol.to_string(),
            id: self.id.to_string(),
            field: field.file_name(&self.id),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.id)
    }
}

impl FromStr for RecordKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (protocol, id) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| KiraError::InvalidRecordId(value.to_string()))?;
        Ok(Self::new(protocol.parse()?, id.parse()?))
    }
}

/// One persisted field of a record. Each field lives in its own file inside the record directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Summary,
    Taxon,
    EntryType,
    DataList,
    Relations,
    MatrixPath,
    NameCache,
    SraList,
}

impl Field {
    pub fn file_name(self, id: &RecordId) -> String {
        match self {
            Field::Summary => "summary.txt".to_string(),
            Field::Taxon => "taxon.txt".to_string(),
            Field::EntryType => "type.txt".to_string(),
            Field::DataList => "datalist.txt".to_string(),
            Field::Relations => "relations.txt".to_string(),
            Field::MatrixPath => "matrixpath.txt".to_string(),
            Field::NameCache => "namecache.txt".to_string(),
            Field::SraList => format!("{id}.sralist"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Series,
    NotSeries,
}

impl EntryType {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if value == SERIES_TAG || value.eq_ignore_ascii_case("series") {
            EntryType::Series
        } else {
            EntryType::NotSeries
        }
    }

    pub fn is_series(self) -> bool {
        matches!(self, EntryType::Series)
    }
}

/// Progress of a record through the fetch pipeline. Variants are ordered; a record only moves
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetState {
    Unfetched,
    ManifestKnown,
    AssetsFetched,
    SraResolved,
    DataDownloaded,
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssetState::Unfetched => "unfetched",
            AssetState::ManifestKnown => "manifest-known",
            AssetState::AssetsFetched => "assets-fetched",
            AssetState::SraResolved => "sra-resolved",
            AssetState::DataDownloaded => "data-downloaded",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub title: String,
    pub accession: String,
}

impl Sample {
    pub fn to_line(&self) -> String {
        format!("{} {}", self.title, self.accession)
    }

    /// The accession is always the last token; titles may contain spaces.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.rsplit_once(char::is_whitespace) {
            Some((title, accession)) => Some(Self {
                title: title.trim().to_string(),
                accession: accession.to_string(),
            }),
            None => Some(Self {
                title: String::new(),
                accession: line.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub external_id: String,
    pub url: String,
}

impl Relation {
    pub fn to_line(&self) -> String {
        format!("{} {}", self.external_id, self.url)
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let (external_id, url) = line.trim().split_once(char::is_whitespace)?;
        Some(Self {
            external_id: external_id.to_string(),
            url: url.trim().to_string(),
        })
    }
}

/// First contributor surname and latest publication year of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContributorKey {
    pub surname: String,
    pub year: String,
}

impl ContributorKey {
    pub fn new(surname: impl Into<String>, year: impl Into<String>) -> Result<Self, KiraError> {
        let surname = surname.into().trim().to_string();
        let year = year.into().trim().to_string();
        if surname.is_empty()
            || surname.chars().any(|ch| ch.is_ascii_digit())
            || year.is_empty()
            || !year.chars().all(|ch| ch.is_ascii_digit())
        {
            return Err(KiraError::InvalidContributorKey(format!("{surname}{year}")));
        }
        Ok(Self { surname, year })
    }

    /// Packs into the `namecache.txt` form, e.g. `Smith2015`.
    pub fn pack(&self) -> String {
        format!("{}{}", self.surname, self.year)
    }

    /// Reads the `namecache.txt` form: leading non-digit run is the surname, trailing digit run
    /// is the year.
    pub fn unpack(packed: &str) -> Result<Self, KiraError> {
        let packed = packed.trim();
        let split = packed
            .find(|ch: char| ch.is_ascii_digit())
            .ok_or_else(|| KiraError::InvalidContributorKey(packed.to_string()))?;
        let (surname, year) = packed.split_at(split);
        Self::new(surname, year)
    }

    pub fn matches_surname(&self, name: &str) -> bool {
        self.surname.to_lowercase() == name.trim().to_lowercase()
    }
}

impl fmt::Display for ContributorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pack())
    }
}

impl FromStr for ContributorKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::unpack(value)
    }
}
