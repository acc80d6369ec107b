use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::assets::extract::normalize_rel_path;
use crate::foundation::cancel::CancelToken;
use crate::foundation::config::LoaderOpts;
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::foundation::fingerprint::{Fingerprint, StableHasher, fingerprint_bytes};

const READ_CHUNK: usize = 64 * 1024;
const ASSET_URL_PREFIXES: [&str; 2] = ["file:///android_asset/", "file:///assets/"];

const TAG_URL: u8 = 1;
const TAG_ASSET: u8 = 2;
const TAG_FILE: u8 = 3;
const TAG_RAW: u8 = 4;

/// Where a movie comes from, classified once at the API boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MovieSource {
    /// `http://` or `https://` resource.
    Url(String),
    /// Path relative to the configured asset root.
    AssetPath(String),
    FilePath(PathBuf),
    /// In-memory payload; `alias` names it in diagnostics.
    RawBytes { alias: String, bytes: Arc<Vec<u8>> },
}

impl MovieSource {
    /// Classify a user-supplied location string.
    pub fn parse(location: &str) -> Self {
        let s = location.trim();
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::Url(s.to_string());
        }
        for prefix in ASSET_URL_PREFIXES {
            if lower.starts_with(prefix) {
                return Self::AssetPath(s[prefix.len()..].to_string());
            }
        }
        if lower.starts_with("file://") {
            return Self::FilePath(PathBuf::from(&s["file://".len()..]));
        }
        if Path::new(s).is_absolute() {
            return Self::FilePath(PathBuf::from(s));
        }
        Self::AssetPath(s.to_string())
    }

    pub fn raw(alias: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::RawBytes {
            alias: alias.into(),
            bytes: Arc::new(bytes),
        }
    }

    /// Human-readable name carried into load failures.
    pub fn alias(&self) -> String {
        match self {
            Self::Url(u) => u.clone(),
            Self::AssetPath(p) => p.clone(),
            Self::FilePath(p) => p.display().to_string(),
            Self::RawBytes { alias, .. } => alias.clone(),
        }
    }
}

impl From<&str> for MovieSource {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Normalised identity of a [`MovieSource`].
///
/// Logically identical sources (e.g. URLs differing only in host case) produce the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentKey {
    id: Fingerprint,
    dir_name: String,
}

impl ContentKey {
    pub fn for_source(source: &MovieSource) -> SvgaResult<Self> {
        let id = match source {
            MovieSource::Url(url) => tagged(TAG_URL, &normalize_url(url)),
            MovieSource::AssetPath(p) => tagged(TAG_ASSET, &normalize_rel_path(p)?),
            MovieSource::FilePath(p) => {
                let abs = absolute_path(p)?;
                tagged(TAG_FILE, &abs.to_string_lossy())
            }
            MovieSource::RawBytes { bytes, .. } => fingerprint_bytes(TAG_RAW, bytes),
        };
        Ok(Self {
            id,
            dir_name: id.to_hex(),
        })
    }

    pub fn id(&self) -> Fingerprint {
        self.id
    }

    /// Entity cache key and on-disk cache directory name.
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// 64-bit namespace for rendered frames.
    pub fn content_id(&self) -> u64 {
        self.id.fold64()
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dir_name)
    }
}

fn tagged(tag: u8, s: &str) -> Fingerprint {
    let mut h = StableHasher::new();
    h.write_u8(tag);
    h.write_str(s);
    h.finish()
}

/// Lower-case scheme and host; path and query are case-sensitive and kept.
fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (authority, tail) = match rest.find(['/', '?', '#']) {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let tail = if tail.is_empty() { "/" } else { tail };
    format!(
        "{}://{}{}",
        scheme.to_ascii_lowercase(),
        authority.to_ascii_lowercase(),
        tail
    )
}

fn absolute_path(p: &Path) -> SvgaResult<PathBuf> {
    if let Ok(canonical) = p.canonicalize() {
        return Ok(canonical);
    }
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| SvgaError::io(format!("resolve '{}': {e}", p.display())))?;
    Ok(cwd.join(p))
}

/// Produces the raw payload bytes of a [`MovieSource`].
pub trait ByteFetcher: Send + Sync {
    fn fetch(&self, source: &MovieSource, cancel: &CancelToken) -> SvgaResult<Vec<u8>>;
}

/// HTTP(S), file, asset and in-memory fetching.
pub struct DefaultFetcher {
    agent: ureq::Agent,
    asset_root: PathBuf,
}

impl std::fmt::Debug for DefaultFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultFetcher")
            .field("asset_root", &self.asset_root)
            .finish_non_exhaustive()
    }
}

impl DefaultFetcher {
    pub fn new(opts: &LoaderOpts) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(opts.connect_timeout_ms))
            .timeout_read(Duration::from_millis(opts.read_timeout_ms))
            .user_agent(&opts.user_agent)
            .build();
        let asset_root = opts
            .asset_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self { agent, asset_root }
    }

    fn fetch_url(&self, url: &str, cancel: &CancelToken) -> SvgaResult<Vec<u8>> {
        tracing::debug!(%url, "fetching movie");
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| SvgaError::io(format!("GET {url}: {e}")))?;
        read_chunked(resp.into_reader(), cancel)
            .map_err(|e| match e {
                SvgaError::Io(msg) => SvgaError::io(format!("GET {url}: {msg}")),
                other => other,
            })
    }

    fn fetch_file(&self, path: &Path, cancel: &CancelToken) -> SvgaResult<Vec<u8>> {
        let file = std::fs::File::open(path)
            .map_err(|e| SvgaError::io(format!("open '{}': {e}", path.display())))?;
        read_chunked(file, cancel)
    }
}

impl ByteFetcher for DefaultFetcher {
    fn fetch(&self, source: &MovieSource, cancel: &CancelToken) -> SvgaResult<Vec<u8>> {
        cancel.check()?;
        let bytes = match source {
            MovieSource::Url(url) => self.fetch_url(url, cancel)?,
            MovieSource::AssetPath(p) => {
                let rel = normalize_rel_path(p)?;
                self.fetch_file(&self.asset_root.join(rel), cancel)?
            }
            MovieSource::FilePath(p) => self.fetch_file(p, cancel)?,
            MovieSource::RawBytes { bytes, .. } => bytes.as_ref().clone(),
        };
        if bytes.is_empty() {
            return Err(SvgaError::resource(format!(
                "'{}' produced an empty payload",
                source.alias()
            )));
        }
        Ok(bytes)
    }
}

fn read_chunked(mut src: impl Read, cancel: &CancelToken) -> SvgaResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        cancel.check()?;
        let n = src
            .read(&mut buf)
            .map_err(|e| SvgaError::io(format!("read: {e}")))?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/load/source.rs"]
mod tests;
