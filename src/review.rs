//! Manual review and selection
//!
//! Loads every shot folder directly under a directory, renders a false-color
//! preview for each, and lets the operator sum any subset using the same
//! summation as the aggregator.
//!
//! Unlike aggregation, loading is lenient: a folder whose cube cannot be read
//! or rendered is logged and left out of the collection.

use crate::config::CubeConfig;
use crate::cube::{self, aggregate::sum_cubes, HyperspectralCube};
use crate::error::{AppResult, SnapError};
use crate::naming::{Manifest, ShotName};
use image::RgbImage;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Stable reference to an entry of a [`Collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CubeHandle(usize);

impl CubeHandle {
    /// Position of the entry in the collection.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A loaded shot folder.
#[derive(Debug, Clone)]
pub struct ReviewEntry {
    /// Handle used for selection
    pub handle: CubeHandle,
    /// Folder the cube was read from
    pub folder: PathBuf,
    /// Wavelength token
    pub wavelength: String,
    /// 1-based shot index
    pub shot_index: u32,
    /// The cube
    pub cube: HyperspectralCube,
    /// False-color preview
    pub preview: RgbImage,
}

/// Cubes loaded for review, plus the operator's selection.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    root: PathBuf,
    entries: Vec<ReviewEntry>,
    selected: BTreeSet<CubeHandle>,
}

/// Load the shot folders directly under `dir`.
///
/// Wavelength and shot index come from the manifest when `dir` has one and
/// lists the folder, otherwise from the folder name.
pub fn load_collection(dir: &Path, config: &CubeConfig) -> AppResult<Collection> {
    let rgb = config.rgb()?;
    let recorded: HashMap<String, ShotName> = Manifest::load(dir)?
        .map(|m| {
            m.entries
                .into_iter()
                .map(|e| (e.target.clone(), e.shot_name()))
                .collect()
        })
        .unwrap_or_default();

    let mut folders: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            folders.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    folders.sort();

    let mut entries = Vec::new();
    for (name, folder) in folders {
        let shot = match recorded.get(&name) {
            Some(shot) => shot.clone(),
            None => match name.parse::<ShotName>() {
                Ok(shot) => shot,
                Err(e) => {
                    warn!(folder = %name, error = %e, "Skipping folder");
                    continue;
                }
            },
        };

        let loaded = cube::load_from_folder(&folder, config)
            .and_then(|cube| crate::cube::render::false_color(&cube, rgb).map(|p| (cube, p)));
        match loaded {
            Ok((cube, preview)) => entries.push(ReviewEntry {
                handle: CubeHandle(entries.len()),
                folder,
                wavelength: shot.wavelength,
                shot_index: shot.shot_index,
                cube,
                preview,
            }),
            Err(e) => warn!(folder = %name, error = %e, "Could not load cube, skipping"),
        }
    }

    info!(dir = %dir.display(), loaded = entries.len(), "Collection loaded");
    Ok(Collection {
        root: dir.to_path_buf(),
        entries,
        selected: BTreeSet::new(),
    })
}

impl Collection {
    /// Directory the collection was loaded from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entries in folder-name order.
    pub fn entries(&self) -> &[ReviewEntry] {
        &self.entries
    }

    /// Entry for `handle`.
    pub fn get(&self, handle: CubeHandle) -> Option<&ReviewEntry> {
        self.entries.get(handle.0)
    }

    /// Handle of the `index`-th entry.
    pub fn handle(&self, index: usize) -> Option<CubeHandle> {
        self.entries.get(index).map(|e| e.handle)
    }

    /// Flip selection of `handle`; returns whether it is now selected.
    pub fn toggle(&mut self, handle: CubeHandle) -> AppResult<bool> {
        self.check(handle)?;
        if self.selected.remove(&handle) {
            Ok(false)
        } else {
            self.selected.insert(handle);
            Ok(true)
        }
    }

    /// Replace the selection with `handles`.
    pub fn select<I: IntoIterator<Item = CubeHandle>>(&mut self, handles: I) -> AppResult<()> {
        let handles: BTreeSet<CubeHandle> = handles.into_iter().collect();
        for handle in &handles {
            self.check(*handle)?;
        }
        self.selected = handles;
        Ok(())
    }

    /// Drop the selection.
    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Selected handles in collection order.
    pub fn selected(&self) -> Vec<CubeHandle> {
        self.selected.iter().copied().collect()
    }

    /// Whether `handle` is selected.
    pub fn is_selected(&self, handle: CubeHandle) -> bool {
        self.selected.contains(&handle)
    }

    /// Sum the selected cubes; metadata of the first selected entry wins.
    pub fn sum_selected(&self) -> AppResult<HyperspectralCube> {
        self.sum(self.selected.iter().copied())
    }

    /// Sum an arbitrary subset.
    pub fn sum<I: IntoIterator<Item = CubeHandle>>(&self, handles: I) -> AppResult<HyperspectralCube> {
        let mut cubes = Vec::new();
        for handle in handles {
            cubes.push(self.check(handle)?.cube.clone());
        }
        if cubes.is_empty() {
            return Err(SnapError::EmptySelection);
        }
        sum_cubes("selection", cubes)
    }

    fn check(&self, handle: CubeHandle) -> AppResult<&ReviewEntry> {
        self.get(handle).ok_or(SnapError::UnknownEntry {
            index: handle.0,
            len: self.entries.len(),
        })
    }
}
