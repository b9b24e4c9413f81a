use std::io::Read;
use std::sync::LazyLock;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::error::KiraError;
use crate::store::Store;

const LISTING_WORKERS: usize = 8;

static LISTING_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href="([^"?/\\]+\.(?:tgz|xml\.gz|gz|xml))""#).unwrap()
});

/// Remote side of the asset pipeline. The core only hands it URLs and reads what it leaves on
/// disk.
pub trait AssetRetriever: Send + Sync {
    /// Downloads the MINiML files behind a manifest URL into `destination`, unpacked. Returns the
    /// written files.
    fn fetch_manifest(
        &self,
        manifest_url: &str,
        destination: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, KiraError>;

    /// Fetches every listing page. Results may come back in any order.
    fn fetch_listings(&self, urls: &[String]) -> Vec<(String, Result<String, KiraError>)>;
}

#[derive(Clone)]
pub struct HttpAssetRetriever {
    client: Client,
}

impl HttpAssetRetriever {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-seqdb/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::RetrieverHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::RetrieverHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn normalize_url(url: &str) -> String {
        if let Some(rest) = url.trim().strip_prefix("ftp://ftp.ncbi.nlm.nih.gov/") {
            return format!("https://ftp.ncbi.nlm.nih.gov/{}", rest);
        }
        url.trim().to_string()
    }

    fn miniml_listing_url(manifest_url: &str) -> String {
        format!("{}/miniml/", Self::normalize_url(manifest_url).trim_end_matches('/'))
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::RetrieverHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "asset request failed".to_string());
            return Err(KiraError::RetrieverStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| KiraError::RetrieverHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn get_text(&self, url: &str) -> Result<String, KiraError> {
        let bytes = self.get_bytes(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl AssetRetriever for HttpAssetRetriever {
    fn fetch_manifest(
        &self,
        manifest_url: &str,
        destination: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, KiraError> {
        let listing_url = Self::miniml_listing_url(manifest_url);
        debug!(url = %listing_url, "listing MINiML files");
        let listing = self.get_text(&listing_url)?;

        let mut written = Vec::new();
        for name in listed_files(&listing) {
            let bytes = self.get_bytes(&format!("{listing_url}{name}"))?;
            let (target, content) = unpack(&name, bytes)?;
            let path = destination.join(target);
            Store::write_bytes_atomic(&path, &content)?;
            written.push(path);
        }
        info!(url = %manifest_url, files = written.len(), "fetched MINiML files");
        Ok(written)
    }

    fn fetch_listings(&self, urls: &[String]) -> Vec<(String, Result<String, KiraError>)> {
        let (sender, receiver) = mpsc::channel();
        thread::scope(|scope| {
            for chunk in urls.chunks(urls.len().div_ceil(LISTING_WORKERS).max(1)) {
                let sender = sender.clone();
                scope.spawn(move || {
                    for url in chunk {
                        let result = self.get_text(&Self::normalize_url(url));
                        if sender.send((url.clone(), result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(sender);
        receiver.into_iter().collect()
    }
}

/// File names linked from a directory listing page, in page order, without duplicates.
pub fn listed_files(listing: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for capture in LISTING_HREF_RE.captures_iter(listing) {
        let name = capture[1].to_string();
        if name.starts_with('.') {
            continue;
        }
        if !files.contains(&name) {
            files.push(name);
        }
    }
    files
}

/// GEO serves the MINiML archives gzip-compressed, whatever the extension says. Returns the
/// unpacked file name and content.
pub fn unpack(name: &str, bytes: Vec<u8>) -> Result<(String, Vec<u8>), KiraError> {
    let lower = name.to_ascii_lowercase();
    let stem = ["_family.xml.tgz", ".xml.tgz", ".tgz", ".xml.gz", ".gz"]
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| &name[..name.len() - suffix.len()]);
    let Some(stem) = stem else {
        return Ok((name.to_string(), bytes));
    };
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut content = Vec::new();
    decoder
        .read_to_end(&mut content)
        .map_err(|err| KiraError::Filesystem(format!("gunzip {name}: {err}")))?;
    let suffix = if lower.contains("_family") { "_family.xml" } else { ".xml" };
    Ok((format!("{stem}{suffix}"), content))
}
