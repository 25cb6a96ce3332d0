//! Persistence of generated outlines and notes.
//!
//! Outputs are plain text files named after their source transcript, the
//! kind of output and a timestamp:
//!
//! ```text
//! output/
//!   lecture01_outline_20250301-101500.txt
//!   lecture01_notes_20250301-103012.md
//!   lecture01_notes_20250301-103012-2.md
//! ```
//!
//! Saving never replaces an existing output: a name that is already taken
//! gets a `-2`, `-3`, ... suffix before its extension.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Where pipeline outputs are kept.
pub trait DocumentStore: Send + Sync {
    /// Write `text` under `name`, or under the first free suffixed variant
    /// of it if `name` is taken. Returns the path actually written.
    fn save(&self, name: &str, text: &str) -> PipelineResult<PathBuf>;

    /// Read a stored document. `Ok(None)` if it does not exist.
    fn load(&self, name: &str) -> PipelineResult<Option<String>>;

    /// Names of all stored documents, sorted.
    fn list(&self) -> PipelineResult<Vec<String>>;
}

/// Output file name: `{stem}_{kind}_{%Y%m%d-%H%M%S}.{ext}`, where `stem` is
/// `source` without directories or extension.
pub fn output_file_name(source: &str, kind: &str, ext: &str, now: NaiveDateTime) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("transcript");
    format!("{stem}_{kind}_{}.{ext}", now.format("%Y%m%d-%H%M%S"))
}

/// [`output_file_name`] stamped with the local time.
pub fn output_file_name_now(source: &str, kind: &str, ext: &str) -> String {
    output_file_name(source, kind, ext, Local::now().naive_local())
}

/// `name` for the first attempt, then `stem-N.ext`.
fn numbered_name(name: &str, attempt: usize) -> String {
    if attempt <= 1 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{attempt}.{ext}"),
        _ => format!("{name}-{attempt}"),
    }
}

/// Give up finding a free name after this many suffixes.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Reject names that could escape the store directory.
pub fn validate_name(name: &str) -> PipelineResult<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
    {
        return Err(PipelineError::InvalidInput(format!(
            "invalid document name: {name:?}"
        )));
    }
    Ok(())
}

// ── FsStore ────────────────────────────────────────────────────────

/// A [`DocumentStore`] backed by one flat directory.
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Create a store, ensuring the directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DocumentStore for FsStore {
    /// Atomic write: a uniquely named temp file in the store directory,
    /// linked into place only if the target name is free. The temp file is
    /// removed on every failure path.
    fn save(&self, name: &str, text: &str) -> PipelineResult<PathBuf> {
        validate_name(name)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let path = self.dir.join(numbered_name(name, attempt));
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    debug!("Saved {} ({} bytes)", path.display(), text.len());
                    return Ok(path);
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => tmp = e.file,
                Err(e) => return Err(e.error.into()),
            }
        }
        Err(PipelineError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name for {name} after {MAX_NAME_ATTEMPTS} attempts"),
        )))
    }

    fn load(&self, name: &str) -> PipelineResult<Option<String>> {
        validate_name(name)?;
        let path = self.dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> PipelineResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type().is_ok_and(|ft| ft.is_file()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}
