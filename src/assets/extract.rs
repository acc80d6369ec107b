use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::foundation::cancel::CancelToken;
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::foundation::sync::lock;

const COPY_CHUNK: usize = 64 * 1024;

/// Normalise a relative archive/asset path to `a/b/c` form.
///
/// Absolute paths, drive prefixes and `..` segments are security errors: they would resolve
/// outside the directory the path is joined to.
pub(crate) fn normalize_rel_path(source: &str) -> SvgaResult<String> {
    let s = source.replace('\\', "/");
    if s.is_empty() {
        return Err(SvgaError::validation("path must be non-empty"));
    }
    if s.starts_with('/') || Path::new(&s).has_root() {
        return Err(SvgaError::security(format!("absolute path '{source}'")));
    }

    let mut out = Vec::<&str>::new();
    for part in s.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(SvgaError::security(format!(
                "path '{source}' escapes its root"
            )));
        }
        if out.is_empty() && part.len() >= 2 && part.ends_with(':') {
            return Err(SvgaError::security(format!("drive prefix in '{source}'")));
        }
        out.push(part);
    }

    if out.is_empty() {
        return Err(SvgaError::validation(format!(
            "path '{source}' has no file name"
        )));
    }
    Ok(out.join("/"))
}

/// Return `true` when `dir` exists and holds at least one entry.
pub fn is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}

/// Outcome of an extraction request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extraction {
    /// Files were written.
    Extracted,
    /// The destination was already populated; nothing was touched.
    AlreadyPresent,
}

/// Unpacks archives into per-content directories.
///
/// Requests for the same destination are serialised by a per-destination lock. Writes go to a
/// sibling staging directory that is renamed into place, so a destination is either absent,
/// empty or complete.
#[derive(Debug, Default)]
pub struct ResourceExtractor {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ResourceExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract `archive` into `dest` unless `dest` is already populated.
    #[tracing::instrument(level = "debug", skip(self, archive, cancel), fields(len = archive.len()))]
    pub fn extract(
        &self,
        archive: &[u8],
        dest: &Path,
        cancel: &CancelToken,
    ) -> SvgaResult<Extraction> {
        self.with_dest_lock(dest, || {
            if is_populated(dest) {
                tracing::debug!(dest = %dest.display(), "archive already extracted");
                return Ok(Extraction::AlreadyPresent);
            }

            let mut zip = zip::ZipArchive::new(Cursor::new(archive))
                .map_err(|e| SvgaError::decode(format!("corrupt archive: {e}")))?;
            // Reject the whole archive before anything touches the disk.
            for name in zip.file_names() {
                normalize_rel_path(name)?;
            }

            stage_and_commit(dest, |staging| {
                let root = staging.canonicalize().map_err(|e| {
                    SvgaError::io(format!("canonicalize '{}': {e}", staging.display()))
                })?;
                for i in 0..zip.len() {
                    cancel.check()?;
                    let mut entry = zip
                        .by_index(i)
                        .map_err(|e| SvgaError::decode(format!("corrupt archive entry {i}: {e}")))?;
                    let rel = normalize_rel_path(entry.name())?;
                    let out = staging.join(&rel);

                    if entry.is_dir() {
                        create_dir_within(&root, &out)?;
                        continue;
                    }
                    let parent = out.parent().unwrap_or(staging);
                    create_dir_within(&root, parent)?;
                    copy_chunked(&mut entry, &out, cancel)?;
                }
                Ok(())
            })?;
            Ok(Extraction::Extracted)
        })
    }

    /// Store a single metadata file (e.g. an inflated `movie.binary`) as the content of `dest`.
    pub fn store_file(&self, dest: &Path, name: &str, bytes: &[u8]) -> SvgaResult<Extraction> {
        let name = normalize_rel_path(name)?;
        self.with_dest_lock(dest, || {
            if is_populated(dest) {
                return Ok(Extraction::AlreadyPresent);
            }
            stage_and_commit(dest, |staging| {
                let out = staging.join(&name);
                std::fs::write(&out, bytes)
                    .map_err(|e| SvgaError::io(format!("write '{}': {e}", out.display())))
            })?;
            Ok(Extraction::Extracted)
        })
    }

    fn with_dest_lock<T>(&self, dest: &Path, f: impl FnOnce() -> SvgaResult<T>) -> SvgaResult<T> {
        let key_lock = {
            let mut locks = lock(&self.locks);
            locks
                .entry(dest.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let out = {
            let _guard = lock(&key_lock);
            f()
        };

        let mut locks = lock(&self.locks);
        // Map + this call hold the only references: nobody else is waiting on this destination.
        if Arc::strong_count(&key_lock) == 2 {
            locks.remove(dest);
        }
        out
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        lock(&self.locks).len()
    }
}

fn stage_and_commit(
    dest: &Path,
    fill: impl FnOnce(&Path) -> SvgaResult<()>,
) -> SvgaResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| SvgaError::validation(format!("'{}' has no parent", dest.display())))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| SvgaError::io(format!("create '{}': {e}", parent.display())))?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let staging = parent.join(format!(
        ".{file_name}.staging_{}_{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&staging)
        .map_err(|e| SvgaError::io(format!("create '{}': {e}", staging.display())))?;

    let committed = fill(&staging).and_then(|()| {
        // An empty destination left behind by an earlier failure is replaced.
        if dest.is_dir() {
            std::fs::remove_dir(dest)
                .map_err(|e| SvgaError::io(format!("remove '{}': {e}", dest.display())))?;
        }
        std::fs::rename(&staging, dest).map_err(|e| {
            SvgaError::io(format!(
                "rename '{}' -> '{}': {e}",
                staging.display(),
                dest.display()
            ))
        })
    });

    if committed.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    committed
}

fn create_dir_within(root: &Path, dir: &Path) -> SvgaResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SvgaError::io(format!("create '{}': {e}", dir.display())))?;
    let canonical = dir
        .canonicalize()
        .map_err(|e| SvgaError::io(format!("canonicalize '{}': {e}", dir.display())))?;
    if !canonical.starts_with(root) {
        return Err(SvgaError::security(format!(
            "'{}' resolves outside the extraction root",
            dir.display()
        )));
    }
    Ok(())
}

fn copy_chunked(src: &mut impl Read, out: &Path, cancel: &CancelToken) -> SvgaResult<()> {
    if out.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(SvgaError::security(format!("'{}' escapes its root", out.display())));
    }
    let mut file = std::fs::File::create(out)
        .map_err(|e| SvgaError::io(format!("create '{}': {e}", out.display())))?;
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        cancel.check()?;
        let n = src
            .read(&mut buf)
            .map_err(|e| SvgaError::decode(format!("read archive entry: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| SvgaError::io(format!("write '{}': {e}", out.display())))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/assets/extract.rs"]
mod tests;
