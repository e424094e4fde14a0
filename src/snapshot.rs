//! Snapshot differencer
//!
//! The imaging instrument names its shot folders itself and attaches no
//! wavelength to them. To find out which folders a run produced, the watch
//! directory is listed before and after the run; the new folders are the set
//! difference, ordered by modification time (oldest first, ties by name).
//!
//! That order is taken to be shot order. Nothing synchronizes with the
//! instrument: the run's completion is the only barrier, so a slow writer
//! can still be caught mid-write.

use crate::error::{AppResult, SnapError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Immutable listing of the sub-directories of one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSnapshot {
    root: PathBuf,
    folders: HashMap<String, SystemTime>,
}

/// A folder produced by one shot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFolder {
    /// Folder name as written by the instrument
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Last modification time
    pub modified: SystemTime,
}

impl FolderSnapshot {
    /// List the immediate sub-directories of `dir`.
    ///
    /// A missing directory is an empty snapshot: the instrument creates it on
    /// its first capture.
    pub fn take(dir: &Path) -> AppResult<Self> {
        let mut folders = HashMap::new();
        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                if !meta.is_dir() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    debug!(path = %entry.path().display(), "Skipping non UTF-8 folder name");
                    continue;
                };
                folders.insert(name, meta.modified()?);
            }
        }
        debug!(dir = %dir.display(), folders = folders.len(), "Snapshot taken");
        Ok(Self {
            root: dir.to_path_buf(),
            folders,
        })
    }

    /// Snapshot from an explicit listing.
    pub fn from_entries<I, S>(root: impl Into<PathBuf>, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, SystemTime)>,
        S: Into<String>,
    {
        Self {
            root: root.into(),
            folders: entries.into_iter().map(|(n, t)| (n.into(), t)).collect(),
        }
    }

    /// Directory this snapshot lists.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of folders.
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    /// Whether no folders were listed.
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Whether `name` was listed.
    pub fn contains(&self, name: &str) -> bool {
        self.folders.contains_key(name)
    }
}

/// Folders in `after` but not in `before`, oldest first.
pub fn diff(before: &FolderSnapshot, after: &FolderSnapshot) -> Vec<OutputFolder> {
    let mut new: Vec<OutputFolder> = after
        .folders
        .iter()
        .filter(|(name, _)| !before.contains(name))
        .map(|(name, modified)| OutputFolder {
            name: name.clone(),
            path: after.root.join(name),
            modified: *modified,
        })
        .collect();
    new.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    new
}

/// Fail with `CountMismatch` unless exactly `expected` folders are new.
pub fn verify_count(folders: &[OutputFolder], expected: usize) -> AppResult<()> {
    if folders.len() != expected {
        return Err(SnapError::CountMismatch {
            expected,
            found: folders.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn names(folders: &[OutputFolder]) -> Vec<&str> {
        folders.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn new_folders_in_time_order() {
        let before = FolderSnapshot::from_entries("/w", [("A", at(1)), ("B", at(2))]);
        let after = FolderSnapshot::from_entries(
            "/w",
            [("A", at(1)), ("B", at(2)), ("D", at(20)), ("C", at(10))],
        );
        let new = diff(&before, &after);
        assert_eq!(names(&new), ["C", "D"]);
        assert_eq!(new[0].path, PathBuf::from("/w/C"));
    }

    #[test]
    fn listing_order_does_not_matter() {
        let before = FolderSnapshot::from_entries("/w", [("A", at(1))]);
        let listing = [("B", at(5)), ("C", at(3)), ("D", at(3)), ("A", at(1)), ("E", at(9))];

        let expected = ["C", "D", "B", "E"];
        for rotation in 0..listing.len() {
            let mut entries = listing.to_vec();
            entries.rotate_left(rotation);
            let after = FolderSnapshot::from_entries("/w", entries.clone());
            assert_eq!(names(&diff(&before, &after)), expected);
            entries.reverse();
            let after = FolderSnapshot::from_entries("/w", entries);
            assert_eq!(names(&diff(&before, &after)), expected);
        }
    }

    #[test]
    fn count_mismatch_reports_both_sides() {
        let after = FolderSnapshot::from_entries("/w", [("C", at(1)), ("D", at(2))]);
        let new = diff(&FolderSnapshot::from_entries("/w", Vec::<(String, _)>::new()), &after);
        let err = verify_count(&new, 3).unwrap_err();
        assert!(matches!(
            err,
            SnapError::CountMismatch {
                expected: 3,
                found: 2
            }
        ));
        assert!(verify_count(&new, 2).is_ok());
    }

    #[test]
    fn takes_snapshot_of_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("0001")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a folder").unwrap();
        let before = FolderSnapshot::take(dir.path()).unwrap();
        assert_eq!(before.len(), 1);

        std::fs::create_dir(dir.path().join("0002")).unwrap();
        let after = FolderSnapshot::take(dir.path()).unwrap();
        let new = diff(&before, &after);
        assert_eq!(names(&new), ["0002"]);
        assert_eq!(new[0].path, dir.path().join("0002"));
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snap = FolderSnapshot::take(&dir.path().join("absent")).unwrap();
        assert!(snap.is_empty());
    }
}
