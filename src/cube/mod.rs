//! Hyperspectral cubes
//!
//! A cube is a `rows × cols × bands` array of intensities plus the free-form
//! header metadata that came with it. Cubes are read from and written to
//! ENVI-style header/raw file pairs ([`envi`]), rendered to false-color PNGs
//! ([`render`]) and summed per wavelength ([`aggregate`]).

pub mod aggregate;
pub mod envi;
pub mod render;

use crate::config::CubeConfig;
use crate::error::{AppResult, SnapError};
use ndarray::Array3;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Free-form header fields (lowercase keys, raw value text).
pub type Metadata = BTreeMap<String, String>;

/// Pixel data indexed `[row, col, band]` plus header metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperspectralCube {
    data: Array3<f64>,
    metadata: Metadata,
}

impl HyperspectralCube {
    /// Create a cube from pixel data and metadata.
    pub fn new(data: Array3<f64>, metadata: Metadata) -> Self {
        Self { data, metadata }
    }

    /// Cube of the given shape with every sample set to `value`.
    pub fn filled(rows: usize, cols: usize, bands: usize, value: f64) -> Self {
        Self::new(Array3::from_elem((rows, cols, bands), value), Metadata::new())
    }

    /// Pixel data, `[row, col, band]`.
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Header metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable header metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// `(rows, cols, bands)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of spectral bands.
    pub fn bands(&self) -> usize {
        self.data.dim().2
    }

    /// Two cubes can be summed iff their shapes match exactly.
    pub fn is_compatible(&self, other: &HyperspectralCube) -> bool {
        self.shape() == other.shape()
    }

    /// Split into data and metadata.
    pub fn into_parts(self) -> (Array3<f64>, Metadata) {
        (self.data, self.metadata)
    }
}

/// Header and raw file of one cube on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeFiles {
    /// ENVI header
    pub header: PathBuf,
    /// Raw sample data
    pub raw: PathBuf,
}

impl CubeFiles {
    /// Read the cube these files describe.
    pub fn load(&self) -> AppResult<HyperspectralCube> {
        envi::read_cube(&self.header, &self.raw)
    }
}

/// Locate the cube pair inside a shot folder.
///
/// The header is the first file (by name) under `{folder}/{subdir}` matching
/// the configured pattern; the raw file is its sibling with the same stem.
pub fn locate(folder: &Path, config: &CubeConfig) -> AppResult<CubeFiles> {
    let dir = folder.join(&config.subdir);
    let pattern = dir.join(&config.header_pattern);
    let pattern = pattern
        .to_str()
        .ok_or_else(|| SnapError::cube_format(&dir, "path is not valid UTF-8"))?;

    let mut headers: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| SnapError::cube_format(&dir, format!("bad header pattern: {e}")))?
        .flatten()
        .collect();
    headers.sort();

    let header = headers
        .into_iter()
        .next()
        .ok_or_else(|| SnapError::cube_format(&dir, "no cube header found"))?;
    let raw = envi::raw_path_for(&header)
        .ok_or_else(|| SnapError::cube_format(&header, "no raw data file next to header"))?;
    Ok(CubeFiles { header, raw })
}

/// Locate and read the cube inside a shot folder.
pub fn load_from_folder(folder: &Path, config: &CubeConfig) -> AppResult<HyperspectralCube> {
    locate(folder, config)?.load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_is_exact_shape_equality() {
        let a = HyperspectralCube::filled(10, 10, 5, 0.0);
        let b = HyperspectralCube::filled(10, 12, 5, 0.0);
        assert!(a.is_compatible(&a.clone()));
        assert!(!a.is_compatible(&b));
        assert_eq!(b.shape(), (10, 12, 5));
        assert_eq!(b.bands(), 5);
    }

    #[test]
    fn locate_finds_header_and_raw() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("0001");
        let config = CubeConfig::default();
        let results = folder.join(&config.subdir);
        std::fs::create_dir_all(&results).unwrap();
        let files = CubeFiles {
            header: results.join("REFLECTANCE_0001.hdr"),
            raw: results.join("REFLECTANCE_0001.dat"),
        };
        envi::write_cube(&files.header, &files.raw, &HyperspectralCube::filled(2, 3, 4, 1.5))
            .unwrap();

        assert_eq!(locate(&folder, &config).unwrap(), files);
        let cube = load_from_folder(&folder, &config).unwrap();
        assert_eq!(cube.shape(), (2, 3, 4));
    }

    #[test]
    fn locate_without_header_is_cube_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = locate(dir.path(), &CubeConfig::default()).unwrap_err();
        assert!(matches!(err, SnapError::CubeFormat { .. }));
    }
}
