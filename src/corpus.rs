//! Read access to the post corpus.
//!
//! ```text
//! <posts_root>/<group>/<handle>.tsv   tab-separated, header with `date` and `tweet`
//! <accounts_path>                     JSON array of {handle, institution_type, state}
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::algo::timespan::{self, Timespan};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::params::{RevisionSource, Trajectory};

const POST_EXTENSIONS: [&str; 2] = ["tsv", "csv"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub handle: String,
    pub institution_type: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Posts of a trajectory, one list of raw texts per timespan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segments {
    pub spans: Vec<Timespan>,
    pub documents: Vec<Vec<String>>,
}

impl Segments {
    pub fn post_count(&self) -> usize {
        self.documents.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Corpus {
    posts_root: PathBuf,
    accounts_path: PathBuf,
}

impl Corpus {
    pub fn new(posts_root: impl Into<PathBuf>, accounts_path: impl Into<PathBuf>) -> Self {
        Self {
            posts_root: posts_root.into(),
            accounts_path: accounts_path.into(),
        }
    }

    pub fn posts_root(&self) -> &Path {
        &self.posts_root
    }

    pub fn accounts(&self) -> Result<Vec<Account>> {
        let text = fs::read_to_string(&self.accounts_path).map_err(|e| Error::io(&self.accounts_path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::Corruption {
            path: self.accounts_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Lowercased handles of accounts whose institution type is selected.
    pub fn handles_for(&self, institutions: &[String]) -> Result<BTreeSet<String>> {
        let wanted: BTreeSet<String> = institutions.iter().map(|i| i.trim().to_lowercase()).collect();
        Ok(self
            .accounts()?
            .into_iter()
            .filter(|a| wanted.contains(&a.institution_type.trim().to_lowercase()))
            .map(|a| a.handle.trim().trim_start_matches('@').to_lowercase())
            .collect())
    }

    /// Every post file under the root, sorted.
    pub fn post_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let groups = fs::read_dir(&self.posts_root).map_err(|e| Error::io(&self.posts_root, e))?;
        for group in groups {
            let group = group.map_err(|e| Error::io(&self.posts_root, e))?.path();
            if !group.is_dir() {
                continue;
            }
            let entries = fs::read_dir(&group).map_err(|e| Error::io(&group, e))?;
            for entry in entries.flatten() {
                let path = entry.path();
                let is_posts = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| POST_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
                if is_posts && path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Partition the posts of the trajectory's accounts into its timespans.
    pub fn load_segments(&self, trajectory: &Trajectory) -> Result<Segments> {
        let spans = timespan::partition(trajectory.start, trajectory.end, trajectory.step_days);
        let handles = self.handles_for(&trajectory.institutions)?;
        let files: Vec<PathBuf> = self
            .post_files()?
            .into_iter()
            .filter(|p| handle_of(p).is_some_and(|h| handles.contains(&h)))
            .collect();

        let per_file: Vec<Vec<(usize, String)>> = files
            .par_iter()
            .map(|path| read_posts(path, &spans))
            .collect::<Result<_>>()?;

        let mut documents = vec![Vec::new(); spans.len()];
        for (idx, text) in per_file.into_iter().flatten() {
            documents[idx].push(text);
        }
        let segments = Segments { spans, documents };
        debug!(
            files = files.len(),
            posts = segments.post_count(),
            spans = segments.spans.len(),
            "loaded trajectory"
        );
        Ok(segments)
    }
}

impl RevisionSource for Corpus {
    /// Fingerprint of the sorted file listing with sizes, accounts included.
    fn revision(&self) -> Result<String> {
        let mut listing = Vec::new();
        for path in self.post_files()? {
            let meta = fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
            let rel = path.strip_prefix(&self.posts_root).unwrap_or(&path);
            listing.push(json!([rel.to_string_lossy(), meta.len()]));
        }
        let accounts_len = match fs::metadata(&self.accounts_path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(Error::io(&self.accounts_path, e)),
        };
        Ok(fingerprint(&json!({"posts": listing, "accounts": accounts_len})).to_string())
    }
}

fn handle_of(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// `(span index, text)` for every well-formed row inside the spans.
fn read_posts(path: &Path, spans: &[Timespan]) -> Result<Vec<(usize, String)>> {
    let content = fs::read(path).map_err(|e| Error::io(path, e))?;
    let content = String::from_utf8_lossy(&content);
    let mut lines = content.lines();

    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let date_col = columns.iter().position(|c| *c == "date");
    let text_col = columns.iter().position(|c| *c == "tweet" || *c == "text");
    let (Some(date_col), Some(text_col)) = (date_col, text_col) else {
        warn!(path = %path.display(), "post file lacks date/tweet columns, skipping");
        return Ok(Vec::new());
    };

    let mut posts = Vec::new();
    let mut skipped = 0usize;
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let (Some(date), Some(text)) = (fields.get(date_col), fields.get(text_col)) else {
            skipped += 1;
            continue;
        };
        let Some(date) = timespan::parse_post_date(date) else {
            skipped += 1;
            continue;
        };
        if let Some(idx) = timespan::locate(spans, date) {
            posts.push((idx, text.to_string()));
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed rows");
    }
    Ok(posts)
}
