//! Cube aggregation
//!
//! After a run, the new shot folders are
//!
//! 1. matched to recipe steps: steps are walked in order and each consumes
//!    `shots` folders from the front of the time-ordered list;
//! 2. copied under `{project}_{date}_{wavelength}_{shot}` into the project
//!    output directory, each copy recorded in the manifest;
//! 3. grouped by wavelength;
//! 4. summed per group and written out as a false-color PNG plus a combined
//!    cube pair.
//!
//! A group whose cubes do not share one shape fails on its own; the other
//! groups are still written. The pass only fails as a whole when no group
//! could be written.

use super::{envi, render, HyperspectralCube};
use crate::config::CubeConfig;
use crate::error::{AppResult, SnapError};
use crate::naming::{
    combined_image_name, today_stamp, union_stem, wavelength_token, Manifest, ManifestEntry,
    Project, ShotName,
};
use crate::recipe::Recipe;
use crate::snapshot::{verify_count, OutputFolder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

/// Elementwise sum of `cubes`, keeping the first cube's metadata.
///
/// `group` only labels a `DimensionMismatch`. A single cube is returned
/// unchanged; no cubes at all is `EmptySelection`.
pub fn sum_cubes<I>(group: &str, cubes: I) -> AppResult<HyperspectralCube>
where
    I: IntoIterator<Item = HyperspectralCube>,
{
    try_sum(group, cubes.into_iter().map(Ok))
}

/// Like [`sum_cubes`], for cubes that are loaded one at a time.
pub fn try_sum<I>(group: &str, cubes: I) -> AppResult<HyperspectralCube>
where
    I: IntoIterator<Item = AppResult<HyperspectralCube>>,
{
    let mut cubes = cubes.into_iter();
    let first = cubes.next().ok_or(SnapError::EmptySelection)??;
    let expected = first.shape();
    let (mut total, metadata) = first.into_parts();

    for cube in cubes {
        let cube = cube?;
        if cube.shape() != expected {
            return Err(SnapError::DimensionMismatch {
                group: group.to_string(),
                expected,
                found: cube.shape(),
            });
        }
        total += cube.data();
    }
    Ok(HyperspectralCube::new(total, metadata))
}

/// A new shot folder and the name it is copied under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Folder the instrument wrote
    pub folder: OutputFolder,
    /// Target name
    pub name: ShotName,
}

/// Attach recipe steps to time-ordered shot folders.
///
/// Fails with `CountMismatch` unless there is exactly one folder per shot.
pub fn assign_targets(
    recipe: &Recipe,
    folders: &[OutputFolder],
    project: &str,
    date: &str,
) -> AppResult<Vec<Assignment>> {
    verify_count(folders, recipe.total_shots())?;

    let mut remaining = folders.iter();
    let mut assignments = Vec::with_capacity(folders.len());
    for step in recipe.steps() {
        for shot_index in 1..=step.shots {
            let folder = remaining.next().ok_or(SnapError::CountMismatch {
                expected: recipe.total_shots(),
                found: folders.len(),
            })?;
            assignments.push(Assignment {
                folder: folder.clone(),
                name: ShotName {
                    project: project.to_string(),
                    date: date.to_string(),
                    wavelength: step.wavelength.clone(),
                    shot_index,
                },
            });
        }
    }
    Ok(assignments)
}

/// Recursively copy `src` to a new directory `dst`. The source is kept.
pub fn copy_folder(src: &Path, dst: &Path) -> AppResult<()> {
    if dst.exists() {
        return Err(SnapError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dst.display()),
        )));
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            SnapError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SnapError::Configuration(format!("walk left {}: {e}", src.display())))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// A folder and the wavelength it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    /// Wavelength token
    pub wavelength: String,
    /// Shot folder
    pub folder: PathBuf,
}

/// Members recorded in `manifest`, resolved against `output_dir`.
pub fn members_from_manifest(manifest: &Manifest, output_dir: &Path) -> Vec<GroupMember> {
    manifest
        .entries
        .iter()
        .map(|e| GroupMember {
            wavelength: e.wavelength.clone(),
            folder: output_dir.join(&e.target),
        })
        .collect()
}

/// Members found by reading the wavelength field (third `_`-separated
/// field) of the sub-directory names of `dir`.
///
/// Folders without a third field are skipped.
pub fn members_from_names(dir: &Path) -> AppResult<Vec<GroupMember>> {
    let mut members = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match wavelength_token(&name) {
            Ok(wavelength) => members.push(GroupMember {
                wavelength: wavelength.to_string(),
                folder: entry.path(),
            }),
            Err(_) => debug!(folder = %name, "Not a shot folder"),
        }
    }
    members.sort_by(|a, b| a.folder.cmp(&b.folder));
    Ok(members)
}

/// Partition members by exact wavelength token, keeping their order.
pub fn group_by_wavelength(members: Vec<GroupMember>) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for member in members {
        groups.entry(member.wavelength).or_default().push(member.folder);
    }
    groups
}

/// Files written for one wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOutput {
    /// Wavelength token
    pub wavelength: String,
    /// Number of cubes summed
    pub members: usize,
    /// The combined cube
    pub cube: HyperspectralCube,
    /// False-color PNG
    pub image: PathBuf,
    /// Combined cube header
    pub header: PathBuf,
    /// Combined cube raw data
    pub raw: PathBuf,
}

/// A wavelength group that could not be written.
#[derive(Debug)]
pub struct GroupFailure {
    /// Wavelength token
    pub wavelength: String,
    /// Why
    pub error: SnapError,
}

/// Outcome of one aggregation pass.
#[derive(Debug, Default)]
pub struct AggregationReport {
    /// Groups written, by wavelength
    pub written: Vec<GroupOutput>,
    /// Groups that failed
    pub failed: Vec<GroupFailure>,
}

impl AggregationReport {
    /// Combined cube per wavelength.
    pub fn combined(&self) -> BTreeMap<&str, &HyperspectralCube> {
        self.written
            .iter()
            .map(|g| (g.wavelength.as_str(), &g.cube))
            .collect()
    }

    /// Whether every group was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Copies, groups, sums and writes the shots of one project.
#[derive(Debug, Clone)]
pub struct Aggregator {
    project: Project,
    date: String,
    cube: CubeConfig,
    rgb: [usize; 3],
}

impl Aggregator {
    /// Aggregator for `project`, dated today.
    pub fn new(project: Project, cube: CubeConfig) -> AppResult<Self> {
        let rgb = cube.rgb()?;
        Ok(Self {
            project,
            date: today_stamp(),
            cube,
            rgb,
        })
    }

    /// Use `date` (`MM-DD`) in every name instead of today.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    /// Project being aggregated.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Date stamp used in names.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Copy the run's folders under their target names and record them.
    ///
    /// Nothing is copied if any target name is already taken. Entries are
    /// appended to any manifest already in the output directory, including
    /// the copies that finished before a failed one. The returned manifest
    /// holds only this pass.
    pub fn copy_and_tag(&self, recipe: &Recipe, folders: &[OutputFolder]) -> AppResult<Manifest> {
        let assignments = assign_targets(recipe, folders, &self.project.name, &self.date)?;
        let out = &self.project.output_dir;

        let taken: Vec<String> = assignments
            .iter()
            .map(|a| a.name.to_string())
            .filter(|target| out.join(target).exists())
            .collect();
        if let Some(first) = taken.first() {
            return Err(SnapError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "{} of {} target folders already exist in {}, first {first}",
                    taken.len(),
                    assignments.len(),
                    out.display()
                ),
            )));
        }
        std::fs::create_dir_all(out)?;

        let mut manifest = Manifest::default();
        let mut copied = Ok(());
        for Assignment { folder, name } in assignments {
            let target = name.to_string();
            let dst = out.join(&target);
            if let Err(e) = copy_folder(&folder.path, &dst) {
                if let Err(cleanup) = std::fs::remove_dir_all(&dst) {
                    debug!(folder = %target, error = %cleanup, "Nothing to clean up");
                }
                warn!(from = %folder.name, to = %target, error = %e, "Copy failed");
                copied = Err(e);
                break;
            }
            debug!(from = %folder.name, to = %target, "Copied shot folder");
            manifest.entries.push(ManifestEntry {
                source: folder.path,
                target,
                wavelength: name.wavelength,
                shot_index: name.shot_index,
                project: name.project,
                date: name.date,
            });
        }

        if !manifest.entries.is_empty() {
            let mut on_disk = Manifest::load(out)?.unwrap_or_default();
            on_disk.entries.extend(manifest.entries.iter().cloned());
            on_disk.save(out)?;
        }
        copied?;
        info!(copied = manifest.entries.len(), output = %out.display(), "Shot folders copied");
        Ok(manifest)
    }

    /// Copy the run's folders, then sum and write every wavelength group.
    pub fn aggregate(&self, recipe: &Recipe, folders: &[OutputFolder]) -> AppResult<AggregationReport> {
        let manifest = self.copy_and_tag(recipe, folders)?;
        let members = members_from_manifest(&manifest, &self.project.output_dir);
        self.aggregate_groups(group_by_wavelength(members))
    }

    /// Re-aggregate everything already copied into the output directory.
    ///
    /// Uses the manifest when present, folder names otherwise.
    pub fn aggregate_output_dir(&self) -> AppResult<AggregationReport> {
        let out = &self.project.output_dir;
        let members = match Manifest::load(out)? {
            Some(manifest) => members_from_manifest(&manifest, out),
            None => members_from_names(out)?,
        };
        if members.is_empty() {
            return Err(SnapError::NotReady(format!(
                "no shot folders in {}",
                out.display()
            )));
        }
        self.aggregate_groups(group_by_wavelength(members))
    }

    /// Sum and write each group; a failing group does not stop the others.
    pub fn aggregate_groups(
        &self,
        groups: BTreeMap<String, Vec<PathBuf>>,
    ) -> AppResult<AggregationReport> {
        let mut report = AggregationReport::default();
        for (wavelength, folders) in groups {
            let _span = info_span!("group", wavelength = %wavelength, members = folders.len()).entered();
            match self.write_group(&wavelength, &folders) {
                Ok(output) => {
                    info!(image = %output.image.display(), "Group written");
                    report.written.push(output);
                }
                Err(error) => {
                    warn!(error = %error, "Group failed");
                    report.failed.push(GroupFailure { wavelength, error });
                }
            }
        }

        if report.written.is_empty() && !report.failed.is_empty() {
            return Err(report.failed.swap_remove(0).error);
        }
        Ok(report)
    }

    fn write_group(&self, wavelength: &str, folders: &[PathBuf]) -> AppResult<GroupOutput> {
        let cube = try_sum(
            wavelength,
            folders
                .iter()
                .map(|f| super::load_from_folder(f, &self.cube)),
        )?;

        let out = &self.project.output_dir;
        let image = out.join(combined_image_name(&self.project.name, &self.date, wavelength));
        let stem = union_stem(&self.project.name, &self.date, wavelength);
        let header = out.join(format!("{stem}.hdr"));
        let raw = out.join(format!("{stem}.dat"));

        render::save_false_color(&cube, self.rgb, &image)?;
        envi::write_cube(&header, &raw, &cube)?;

        Ok(GroupOutput {
            wavelength: wavelength.to_string(),
            members: folders.len(),
            cube,
            image,
            header,
            raw,
        })
    }
}
