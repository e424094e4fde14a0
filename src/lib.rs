//! # LaseSnap
//!
//! Wavelength-stepped hyperspectral acquisition. A tunable light source and a
//! camera trigger are driven through an operator recipe of
//! `(wavelength, shots)` steps; the shot folders the imaging instrument writes
//! are found by snapshot differencing, renamed by wavelength, and summed into
//! one combined cube and false-color image per wavelength.
//!
//! ## Crate Structure
//!
//! - **`recipe`**: the ordered `(wavelength, shots)` table and its TOML form.
//! - **`hardware`**: capability traits for the light source and the trigger,
//!   their VISA/serial drivers, device discovery and mocks.
//! - **`sequencer`**: executes a recipe with the fixed settle and shot delays.
//! - **`snapshot`**: before/after folder listings and their time-ordered diff.
//! - **`cube`**: ENVI cube I/O, false-color rendering and per-wavelength
//!   aggregation.
//! - **`naming`**: output folder names and the `manifest.json` sidecar.
//! - **`review`**: load a collection of shots, select some, sum them.
//! - **`session`**: the `Idle → … → Done | Aborted` state machine that owns a
//!   run's resources.
//! - **`config`**, **`error`**, **`tracing_setup`**: station settings,
//!   `SnapError`, logging.

pub mod config;
pub mod cube;
pub mod error;
pub mod hardware;
pub mod naming;
pub mod recipe;
pub mod review;
pub mod sequencer;
pub mod session;
pub mod snapshot;
pub mod tracing_setup;

pub use error::{AppResult, SnapError};
