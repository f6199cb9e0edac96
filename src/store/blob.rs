//! Blob encoding and atomic file publication shared by every store.
//!
//! Blobs are gzip-compressed JSON. Writers stage the bytes in the store's
//! `tmp/` directory, fsync, then rename into place, so a reader either sees
//! the previous file or the complete new one.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub(crate) const BLOB_SUFFIX: &str = ".json.gz";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4 + 64), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::Corruption {
            path: PathBuf::from("<memory>"),
            reason: format!("gzip encode failed: {e}"),
        })
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> Result<T> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| Error::Corruption {
            path: path.to_path_buf(),
            reason: format!("gzip: {e}"),
        })?;
    serde_json::from_slice(&json).map_err(|e| Error::Corruption {
        path: path.to_path_buf(),
        reason: format!("json: {e}"),
    })
}

/// Read and decode a blob. A missing file is `Ok(None)`.
pub(crate) fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    decode(&bytes, path).map(Some)
}

/// Publish `bytes` at `dest` via a staged temp file and rename.
pub(crate) fn write_atomic(tmp_dir: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::create_dir_all(tmp_dir).map_err(|e| Error::io(tmp_dir, e))?;

    let tmp = tmp_dir.join(tmp_name());
    let staged = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, dest));

    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(dest, e));
    }
    Ok(())
}

/// Remove a file, reporting whether it existed.
pub(crate) fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Move a blob that failed to decode out of the way so it can be rebuilt.
pub(crate) fn quarantine(path: &Path) {
    let target = path.with_extension("corrupt");
    match fs::rename(path, &target) {
        Ok(()) => warn!(path = %path.display(), target = %target.display(), "quarantined corrupt blob"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to quarantine corrupt blob"),
    }
}

/// File stems of all blobs in `dir`, sorted. A missing directory is empty.
pub(crate) fn list_stems(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };
    let mut stems = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name();
        if let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(BLOB_SUFFIX)) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

/// Delete staged files older than `max_age` left behind by crashed writers.
pub(crate) fn sweep_partials(tmp_dir: &Path, max_age: Duration) -> Result<usize> {
    let entries = match fs::read_dir(tmp_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::io(tmp_dir, e)),
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| now.duration_since(modified).unwrap_or_default() >= max_age)
            .unwrap_or(false);
        if stale && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(removed, dir = %tmp_dir.display(), "swept partial writes");
    }
    Ok(removed)
}

fn tmp_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{seq}.partial", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn encode_decode_roundtrip() {
        let value = json!({"terms": ["mask"], "count": 3});
        let bytes = encode(&value).unwrap();
        let back: Value = decode(&bytes, Path::new("x")).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn decode_garbage_is_corruption() {
        let err = decode::<Value>(b"not gzip", Path::new("bad.json.gz")).unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn write_atomic_publishes_and_cleans_staging() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        let dest = dir.path().join("a/b/c.json.gz");
        write_atomic(&tmp, &dest, &encode(&json!(1)).unwrap()).unwrap();

        let back: Option<Value> = read(&dest).unwrap();
        assert_eq!(back, Some(json!(1)));
        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let got: Option<Value> = read(&dir.path().join("missing.json.gz")).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn list_stems_filters_suffix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json.gz"), b"").unwrap();
        fs::write(dir.path().join("a.json.gz"), b"").unwrap();
        fs::write(dir.path().join("c.corrupt"), b"").unwrap();
        assert_eq!(list_stems(dir.path()).unwrap(), vec!["a", "b"]);
        assert!(list_stems(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn quarantine_renames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json.gz");
        fs::write(&path, b"junk").unwrap();
        quarantine(&path);
        assert!(!path.exists());
        assert!(dir.path().join("x.json.corrupt").exists());
    }

    #[test]
    fn sweep_partials_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1-2-3.partial"), b"").unwrap();
        assert_eq!(sweep_partials(dir.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(sweep_partials(dir.path(), Duration::ZERO).unwrap(), 1);
    }
}
