//! Folder naming and the manifest sidecar.
//!
//! Renamed shot folders follow `{project}_{MM-DD}_{wavelength}_{shot}` with a
//! 1-based shot index. Because the wavelength is the third
//! underscore-delimited field, neither the project name nor the wavelength
//! token may contain an underscore.
//!
//! Every copy is also recorded in `manifest.json` next to the folders, so
//! later passes read wavelength and shot index from structured data instead
//! of re-parsing names.

use crate::error::{AppResult, SnapError};
use chrono::{DateTime, Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the manifest sidecar.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Operator-supplied project identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Name used as the first field of every output name
    pub name: String,
    /// Directory receiving renamed folders and combined outputs
    pub output_dir: PathBuf,
}

impl Project {
    /// Create a project, rejecting names that would break the naming scheme.
    pub fn new(name: impl Into<String>, output_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('_') || name.contains(std::path::is_separator) {
            return Err(SnapError::FolderName(name));
        }
        Ok(Self {
            name,
            output_dir: output_dir.into(),
        })
    }
}

/// `MM-DD` stamp for `date`.
pub fn date_stamp(date: NaiveDate) -> String {
    format!("{:02}-{:02}", date.month(), date.day())
}

/// `MM-DD` stamp for today in local time.
pub fn today_stamp() -> String {
    let now: DateTime<Local> = Local::now();
    date_stamp(now.date_naive())
}

/// A parsed `{project}_{date}_{wavelength}_{shot}` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShotName {
    /// Project name
    pub project: String,
    /// `MM-DD`
    pub date: String,
    /// Wavelength token, verbatim from the recipe
    pub wavelength: String,
    /// 1-based shot index within its recipe step
    pub shot_index: u32,
}

impl fmt::Display for ShotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.project, self.date, self.wavelength, self.shot_index
        )
    }
}

impl FromStr for ShotName {
    type Err = SnapError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = name.split('_').collect();
        let [project, date, wavelength, shot] = fields.as_slice() else {
            return Err(SnapError::FolderName(name.to_string()));
        };
        if project.is_empty() || wavelength.is_empty() {
            return Err(SnapError::FolderName(name.to_string()));
        }
        let shot_index = shot
            .parse::<u32>()
            .map_err(|_| SnapError::FolderName(name.to_string()))?;
        Ok(Self {
            project: project.to_string(),
            date: date.to_string(),
            wavelength: wavelength.to_string(),
            shot_index,
        })
    }
}

/// Third underscore-delimited field of a folder name.
pub fn wavelength_token(name: &str) -> AppResult<&str> {
    name.split('_')
        .nth(2)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SnapError::FolderName(name.to_string()))
}

/// `{project}_{date}_{wavelength}_combined.png`
pub fn combined_image_name(project: &str, date: &str, wavelength: &str) -> String {
    format!("{project}_{date}_{wavelength}_combined.png")
}

/// `{project}_{date}_{wavelength}_union`; the cube pair adds `.hdr`/`.dat`.
pub fn union_stem(project: &str, date: &str, wavelength: &str) -> String {
    format!("{project}_{date}_{wavelength}_union")
}

/// One copied shot folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Folder the instrument wrote
    pub source: PathBuf,
    /// Folder name under the project output directory
    pub target: String,
    /// Wavelength token of the recipe step
    pub wavelength: String,
    /// 1-based shot index within the step
    pub shot_index: u32,
    /// Project name
    pub project: String,
    /// `MM-DD`
    pub date: String,
}

impl ManifestEntry {
    /// Structured name of the target folder.
    pub fn shot_name(&self) -> ShotName {
        ShotName {
            project: self.project.clone(),
            date: self.date.clone(),
            wavelength: self.wavelength.clone(),
            shot_index: self.shot_index,
        }
    }
}

/// All copies made by one aggregation pass, in shot order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Copied folders
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Path of the manifest inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Load the manifest from `dir`, or `None` if there is none.
    pub fn load(dir: &Path) -> AppResult<Option<Self>> {
        let path = Self::path_in(dir);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let manifest = serde_json::from_str(&text)
            .map_err(|e| SnapError::Configuration(format!("{}: {e}", path.display())))?;
        Ok(Some(manifest))
    }

    /// Write the manifest into `dir`, replacing any previous one.
    pub fn save(&self, dir: &Path) -> AppResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| SnapError::Configuration(format!("manifest serialization: {e}")))?;
        std::fs::write(Self::path_in(dir), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_shot_names() {
        let name = ShotName {
            project: "leaf".into(),
            date: "03-07".into(),
            wavelength: "550".into(),
            shot_index: 2,
        };
        assert_eq!(name.to_string(), "leaf_03-07_550_2");
        assert_eq!("leaf_03-07_550_2".parse::<ShotName>().unwrap(), name);
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["leaf_03-07_550", "leaf_03-07_550_x", "a_b_c_1_2", "_03-07_550_1"] {
            assert!(bad.parse::<ShotName>().is_err(), "{bad}");
        }
    }

    #[test]
    fn wavelength_is_third_field() {
        assert_eq!(wavelength_token("leaf_03-07_612.5_1").unwrap(), "612.5");
        assert!(wavelength_token("leaf_03-07").is_err());
    }

    #[test]
    fn date_stamp_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(date_stamp(date), "03-07");
        assert_eq!(today_stamp().len(), 5);
    }

    #[test]
    fn project_names_cannot_hold_separators() {
        assert!(Project::new("leaf", "out").is_ok());
        assert!(Project::new("leaf_a", "out").is_err());
        assert!(Project::new("", "out").is_err());
    }

    #[test]
    fn output_names() {
        assert_eq!(combined_image_name("p", "01-02", "500"), "p_01-02_500_combined.png");
        assert_eq!(union_stem("p", "01-02", "500"), "p_01-02_500_union");
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());

        let manifest = Manifest {
            entries: vec![ManifestEntry {
                source: PathBuf::from("/capture/0001"),
                target: "leaf_03-07_500_1".into(),
                wavelength: "500".into(),
                shot_index: 1,
                project: "leaf".into(),
                date: "03-07".into(),
            }],
        };
        manifest.save(dir.path()).unwrap();
        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(
            loaded.entries[0].shot_name().to_string(),
            loaded.entries[0].target
        );
    }
}
