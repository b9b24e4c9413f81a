use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("record not found: {protocol}/{id}")]
    RecordNotFound { protocol: String, id: String },

    #[error("field {field} not available for {protocol}/{id}")]
    FieldUnavailable {
        protocol: String,
        id: String,
        field: String,
    },

    #[error("ambiguous lookup for {query}: {matches} matches")]
    #[diagnostic(help("qualify the id with its protocol, e.g. gro-seq/200012345"))]
    AmbiguousLookup { query: String, matches: usize },

    #[error("malformed asset metadata for {id}: {reason}")]
    MalformedAsset { id: String, reason: String },

    #[error("record {id} already exists under protocol {existing}")]
    DuplicateRecord { id: String, existing: String },

    #[error("invalid protocol name: {0}")]
    InvalidProtocol(String),

    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("invalid contributor key: {0}")]
    InvalidContributorKey(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse record metadata at {path}: {reason}")]
    #[diagnostic(help("the metadata file must be a JSON array of record objects"))]
    MetadataParse { path: String, reason: String },

    #[error("no store root configured")]
    #[diagnostic(help("pass --root <dir> or set store_root in kira-seqdb.json"))]
    MissingStoreRoot,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("asset request failed: {0}")]
    RetrieverHttp(String),

    #[error("asset server returned status {status}: {message}")]
    RetrieverStatus { status: u16, message: String },
}

impl KiraError {
    pub fn not_found(protocol: impl Into<String>, id: impl Into<String>) -> Self {
        KiraError::RecordNotFound {
            protocol: protocol.into(),
            id: id.into(),
        }
    }

    /// Errors that describe a missing piece of data rather than a broken store.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            KiraError::FieldUnavailable { .. } | KiraError::MalformedAsset { .. }
        )
    }

    /// Process exit status for the command line tool.
    pub fn exit_code(&self) -> u8 {
        match self {
            KiraError::RecordNotFound { .. } | KiraError::AmbiguousLookup { .. } => 2,
            KiraError::MissingStoreRoot
            | KiraError::ConfigRead(_)
            | KiraError::ConfigParse(_)
            | KiraError::MetadataParse { .. }
            | KiraError::InvalidProtocol(_)
            | KiraError::InvalidRecordId(_) => 2,
            KiraError::RetrieverHttp(_) | KiraError::RetrieverStatus { .. } => 3,
            _ => 1,
        }
    }
}

/// Exit status for a report, using the crate error when one is inside it.
pub fn report_exit_code(report: &miette::Report) -> u8 {
    report
        .downcast_ref::<KiraError>()
        .map_or(1, KiraError::exit_code)
}
