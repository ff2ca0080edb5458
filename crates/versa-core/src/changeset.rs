//! Pending version intents stored as markdown files.
//!
//! Each changeset lives at `<dir>/<key>.md` with a YAML frontmatter mapping
//! package names to bump levels, followed by a free-text body:
//!
//! ```text
//! ---
//! 'ui': minor
//! ---
//!
//! Added the x widget.
//!
//! PROD-123
//! ```
//!
//! An empty frontmatter is a valid internal-only record.

use std::collections::BTreeMap;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::version::BumpLevel;

/// Errors from changeset storage.
#[derive(Error, Debug)]
pub enum ChangesetError {
    /// No changeset with this key.
    #[error("changeset {0:?} not found")]
    NotFound(String),

    /// Key cannot be used as a file name.
    #[error("invalid changeset key {0:?}")]
    InvalidKey(String),

    /// Filesystem failure.
    #[error("changeset I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result alias for changeset operations.
pub type ChangesetResult<T> = Result<T, ChangesetError>;

/// A single pending version intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Changeset {
    /// File stem.
    pub key: String,
    /// Bump per package. Empty means internal-only.
    pub bumps: BTreeMap<String, BumpLevel>,
    /// Markdown body.
    pub body: String,
}

impl Changeset {
    /// Whether the changeset releases nothing.
    pub fn is_internal(&self) -> bool {
        self.bumps.values().all(|b| *b == BumpLevel::None)
    }

    /// Render the on-disk form.
    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        for (package, bump) in &self.bumps {
            let quoted = package.replace('\'', "''");
            out.push_str(&format!("'{quoted}': {bump}\n"));
        }
        out.push_str("---\n");
        let body = self.body.trim();
        if !body.is_empty() {
            out.push('\n');
            out.push_str(body);
            out.push('\n');
        }
        out
    }

    /// Parse the on-disk form. A malformed header yields empty bumps.
    pub fn parse(key: &str, raw: &str) -> Self {
        let (header, body) = split_frontmatter(raw);
        let bumps = header.map(|h| parse_header(key, h)).unwrap_or_default();
        Self {
            key: key.to_string(),
            bumps,
            body: body.trim().to_string(),
        }
    }
}

/// What [`ChangesetStore::write`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New file.
    Created,
    /// Existing file replaced with different content.
    Updated,
    /// Existing file already had this content.
    Unchanged,
}

fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    else {
        return (None, raw);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    // Unterminated header: treat the whole file as body.
    (None, raw)
}

fn parse_header(key: &str, header: &str) -> BTreeMap<String, BumpLevel> {
    if header.trim().is_empty() {
        return BTreeMap::new();
    }
    let pairs: BTreeMap<String, String> = match serde_saphyr::from_str(header) {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!(changeset = key, error = %e, "malformed changeset header; treating as empty");
            return BTreeMap::new();
        }
    };
    let mut bumps = BTreeMap::new();
    for (package, level) in pairs {
        match level.parse::<BumpLevel>() {
            Ok(level) => {
                bumps.insert(package, level);
            }
            Err(e) => {
                warn!(changeset = key, error = %e, "malformed changeset header; treating as empty");
                return BTreeMap::new();
            }
        }
    }
    bumps
}

/// Directory-backed changeset collection.
#[derive(Debug, Clone)]
pub struct ChangesetStore {
    dir: Utf8PathBuf,
}

impl ChangesetStore {
    /// Store rooted at `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Changeset directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> ChangesetResult<Utf8PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.eq_ignore_ascii_case("readme")
        {
            return Err(ChangesetError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.md")))
    }

    fn io_err(path: &Utf8Path, source: std::io::Error) -> ChangesetError {
        ChangesetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Keys of all pending changesets, sorted.
    pub fn list(&self) -> ChangesetResult<Vec<String>> {
        let entries = match self.dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&self.dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.dir, error = %e, "skipping unreadable changeset entry");
                    continue;
                }
            };
            let name = entry.file_name();
            if name.starts_with('.') || name.eq_ignore_ascii_case("readme.md") {
                continue;
            }
            if let Some(key) = name.strip_suffix(".md")
                && entry.file_type().is_ok_and(|t| t.is_file())
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Read one changeset. Invalid UTF-8 is decoded lossily.
    pub fn read(&self, key: &str) -> ChangesetResult<Changeset> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                let raw = match String::from_utf8(bytes) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(changeset = key, %path, "changeset is not valid UTF-8; decoding lossily");
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                Ok(Changeset::parse(key, &raw))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ChangesetError::NotFound(key.to_string()))
            }
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    /// Read every pending changeset in key order.
    ///
    /// A file that cannot be read is logged and skipped; only a failure to
    /// list the directory itself is an error.
    pub fn read_all(&self) -> ChangesetResult<Vec<Changeset>> {
        let mut changesets = Vec::new();
        for key in self.list()? {
            match self.read(&key) {
                Ok(changeset) => changesets.push(changeset),
                Err(e) => warn!(changeset = %key, error = %e, "skipping unreadable changeset"),
            }
        }
        Ok(changesets)
    }

    /// Write a changeset, replacing any existing file with the same key.
    #[instrument(skip_all, fields(key = %changeset.key))]
    pub fn write(&self, changeset: &Changeset) -> ChangesetResult<WriteOutcome> {
        let path = self.path_for(&changeset.key)?;
        let rendered = changeset.render();

        let outcome = match std::fs::read_to_string(&path) {
            Ok(existing) if existing == rendered => {
                debug!("changeset unchanged");
                return Ok(WriteOutcome::Unchanged);
            }
            Ok(_) => WriteOutcome::Updated,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WriteOutcome::Created,
            Err(e) => return Err(Self::io_err(&path, e)),
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        tmp.write_all(rendered.as_bytes())
            .map_err(|e| Self::io_err(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| Self::io_err(&path, e.error))?;

        debug!(?outcome, %path, "changeset written");
        Ok(outcome)
    }

    /// Delete a consumed changeset.
    pub fn remove(&self, key: &str) -> ChangesetResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ChangesetError::NotFound(key.to_string()))
            }
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ChangesetStore) {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().join(".changeset")).unwrap();
        (tmp, ChangesetStore::new(dir))
    }

    fn changeset(key: &str, bumps: &[(&str, BumpLevel)], body: &str) -> Changeset {
        Changeset {
            key: key.to_string(),
            bumps: bumps.iter().map(|(p, b)| ((*p).to_string(), *b)).collect(),
            body: body.to_string(),
        }
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let (_tmp, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn write_then_read() {
        let (_tmp, store) = store();
        let cs = changeset("prod-123", &[("ui", BumpLevel::Minor)], "Added x.\n\nPROD-123");
        assert_eq!(store.write(&cs).unwrap(), WriteOutcome::Created);
        assert_eq!(store.read("prod-123").unwrap(), cs);

        let raw = std::fs::read_to_string(store.dir().join("prod-123.md")).unwrap();
        assert!(raw.starts_with("---\n'ui': minor\n---\n"));
    }

    #[test]
    fn repeated_write_is_idempotent() {
        let (_tmp, store) = store();
        let cs = changeset("prod-1", &[("ui", BumpLevel::Patch)], "fix");
        store.write(&cs).unwrap();
        assert_eq!(store.write(&cs).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.list().unwrap(), vec!["prod-1".to_string()]);

        let updated = changeset("prod-1", &[("ui", BumpLevel::Minor)], "feat");
        assert_eq!(store.write(&updated).unwrap(), WriteOutcome::Updated);
        let raw = std::fs::read_to_string(store.dir().join("prod-1.md")).unwrap();
        assert_eq!(raw.matches("---").count(), 2);
        assert_eq!(store.read("prod-1").unwrap(), updated);
    }

    #[test]
    fn empty_header_is_an_internal_changeset() {
        let (_tmp, store) = store();
        let cs = changeset("internal", &[], "tidy up");
        store.write(&cs).unwrap();
        let read = store.read("internal").unwrap();
        assert!(read.bumps.is_empty());
        assert!(read.is_internal());
        assert_eq!(store.list().unwrap(), vec!["internal".to_string()]);
    }

    #[test]
    fn list_skips_readme_dotfiles_and_other_extensions() {
        let (_tmp, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        for name in ["README.md", ".draft.md", "config.json", "b.md", "a.md"] {
            std::fs::write(store.dir().join(name), "---\n---\n").unwrap();
        }
        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn missing_header_reads_as_empty() {
        let cs = Changeset::parse("x", "just a body\n");
        assert!(cs.bumps.is_empty());
        assert_eq!(cs.body, "just a body");
    }

    #[test]
    fn malformed_header_reads_as_empty() {
        let cs = Changeset::parse("x", "---\n'ui': [minor\n---\nbody\n");
        assert!(cs.bumps.is_empty());
        assert_eq!(cs.body, "body");

        let cs = Changeset::parse("x", "---\n'ui': huge\n---\nbody\n");
        assert!(cs.bumps.is_empty());
    }

    #[test]
    fn header_accepts_unquoted_keys_and_mixed_case() {
        let cs = Changeset::parse("x", "---\nui: Minor\n'@scope/api': patch\n---\n");
        assert_eq!(cs.bumps.get("ui"), Some(&BumpLevel::Minor));
        assert_eq!(cs.bumps.get("@scope/api"), Some(&BumpLevel::Patch));
    }

    #[test]
    fn remove_deletes_and_reports_missing() {
        let (_tmp, store) = store();
        store.write(&changeset("a", &[], "")).unwrap();
        store.remove("a").unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.remove("a"), Err(ChangesetError::NotFound(_))));
    }

    #[test]
    fn invalid_utf8_file_does_not_block_the_others() {
        let (_tmp, store) = store();
        store
            .write(&changeset("good", &[("ui", BumpLevel::Minor)], "feat"))
            .unwrap();
        std::fs::write(store.dir().join("bad.md"), b"\xff\xfe garbage\n").unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "bad");
        assert!(all[0].is_internal());
        assert_eq!(all[1].bumps.get("ui"), Some(&BumpLevel::Minor));
    }

    #[test]
    fn invalid_utf8_body_keeps_a_valid_header() {
        let (_tmp, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("mixed.md"), b"---\n'api': patch\n---\n\xffbody\n").unwrap();
        let cs = store.read("mixed").unwrap();
        assert_eq!(cs.bumps.get("api"), Some(&BumpLevel::Patch));
        assert!(cs.body.ends_with("body"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_file_name_is_skipped() {
        use std::os::unix::ffi::OsStrExt;

        let (_tmp, store) = store();
        store.write(&changeset("a", &[], "")).unwrap();
        let odd = std::ffi::OsStr::from_bytes(b"\xff.md");
        std::fs::write(store.dir().as_std_path().join(odd), "---\n---\n").unwrap();
        assert_eq!(store.list().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn path_like_keys_are_rejected() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.read("../escape"),
            Err(ChangesetError::InvalidKey(_))
        ));
    }
}
