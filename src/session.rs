use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::store::Store;

/// Result set of the previous invocation, stored as one token per line.
#[derive(Debug, Clone)]
pub struct LastQuery {
    path: Utf8PathBuf,
}

impl LastQuery {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<cache dir>/kira-seqdb/last_query.txt`
    pub fn default_path() -> Result<Utf8PathBuf, KiraError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.cache_dir().join("kira-seqdb").join("last_query.txt"))
                    .ok()
            })
            .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn write(&self, tokens: &[String]) -> Result<(), KiraError> {
        let mut content = tokens.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        Store::write_bytes_atomic(&self.path, content.as_bytes())?;
        debug!(path = %self.path, tokens = tokens.len(), "saved last query");
        Ok(())
    }

    /// `None` when no previous result set exists.
    pub fn read(&self) -> Result<Option<Vec<String>>, KiraError> {
        match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => Ok(Some(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KiraError::Filesystem(format!("read {}: {err}", self.path))),
        }
    }

    /// Appends the saved tokens to `args`. A missing result set only warns.
    pub fn splice_into(&self, args: &mut Vec<String>) -> Result<usize, KiraError> {
        match self.read()? {
            Some(tokens) => {
                let count = tokens.len();
                args.extend(tokens);
                Ok(count)
            }
            None => {
                warn!(path = %self.path, "no saved query to read; continuing without it");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_missing_artifact_is_soft() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("none.txt")).unwrap();
        let session = LastQuery::new(path);
        let mut args = vec!["42".to_string()];
        assert_eq!(session.splice_into(&mut args).unwrap(), 0);
        assert_eq!(args, vec!["42"]);
    }

    #[test]
    fn write_then_splice_keeps_order() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("q").join("last.txt")).unwrap();
        let session = LastQuery::new(path);
        session
            .write(&["/db/gro-seq/2".to_string(), "/db/gro-seq/1".to_string()])
            .unwrap();
        let mut args = Vec::new();
        session.splice_into(&mut args).unwrap();
        assert_eq!(args, vec!["/db/gro-seq/2", "/db/gro-seq/1"]);
    }
}
