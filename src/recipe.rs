//! Recipe table
//!
//! The operator's ordered list of `(wavelength, shots)` steps. Insertion
//! order is run order; every editing operation preserves the relative order
//! of untouched steps.
//!
//! Recipes can be kept as TOML:
//!
//! ```toml
//! [[steps]]
//! wavelength = "500"
//! shots = 2
//!
//! [[steps]]
//! wavelength = "550"
//! shots = 1
//! ```

use crate::error::{AppResult, SnapError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One wavelength and how many shots to take at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStep {
    /// Wavelength token, sent verbatim to the light source
    pub wavelength: String,
    /// Number of trigger pulses at this wavelength
    pub shots: u32,
}

impl RecipeStep {
    /// Create a step.
    pub fn new(wavelength: impl Into<String>, shots: u32) -> Self {
        Self {
            wavelength: wavelength.into(),
            shots,
        }
    }
}

/// Ordered recipe table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    steps: Vec<RecipeStep>,
}

impl Recipe {
    /// Empty recipe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recipe from steps in run order.
    pub fn from_steps(steps: Vec<RecipeStep>) -> Self {
        Self { steps }
    }

    /// Steps in run order.
    pub fn steps(&self) -> &[RecipeStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the recipe has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step at the end.
    pub fn push(&mut self, step: RecipeStep) {
        self.steps.push(step);
    }

    /// Insert a step before `index`.
    pub fn insert(&mut self, index: usize, step: RecipeStep) -> AppResult<()> {
        if index > self.steps.len() {
            return Err(SnapError::InvalidRecipe(format!(
                "cannot insert at {index}, recipe has {} steps",
                self.steps.len()
            )));
        }
        self.steps.insert(index, step);
        Ok(())
    }

    /// Remove and return the step at `index`.
    pub fn remove(&mut self, index: usize) -> AppResult<RecipeStep> {
        self.check_index(index)?;
        Ok(self.steps.remove(index))
    }

    /// Swap the step at `index` with its predecessor. No-op for the first step.
    pub fn move_up(&mut self, index: usize) -> AppResult<()> {
        self.check_index(index)?;
        if index > 0 {
            self.steps.swap(index - 1, index);
        }
        Ok(())
    }

    /// Swap the step at `index` with its successor. No-op for the last step.
    pub fn move_down(&mut self, index: usize) -> AppResult<()> {
        self.check_index(index)?;
        if index + 1 < self.steps.len() {
            self.steps.swap(index, index + 1);
        }
        Ok(())
    }

    /// Remove every step.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Total trigger pulses the recipe fires.
    pub fn total_shots(&self) -> usize {
        self.steps.iter().map(|s| s.shots as usize).sum()
    }

    /// Check that the recipe can be run and its output named.
    pub fn validate(&self) -> AppResult<()> {
        if self.steps.is_empty() {
            return Err(SnapError::InvalidRecipe("recipe has no steps".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            let wl = step.wavelength.trim();
            if wl.is_empty() {
                return Err(SnapError::InvalidRecipe(format!(
                    "step {} has an empty wavelength",
                    i + 1
                )));
            }
            if wl != step.wavelength || wl.contains('_') || wl.contains(char::is_whitespace) {
                return Err(SnapError::InvalidRecipe(format!(
                    "step {} wavelength '{}' may not contain underscores or spaces",
                    i + 1,
                    step.wavelength
                )));
            }
            if step.shots == 0 {
                return Err(SnapError::InvalidRecipe(format!(
                    "step {} ({}) has zero shots",
                    i + 1,
                    step.wavelength
                )));
            }
        }
        Ok(())
    }

    /// Load a recipe from a TOML file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| SnapError::InvalidRecipe(format!("{}: {e}", path.display())))
    }

    /// Save the recipe as TOML.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| SnapError::InvalidRecipe(format!("serialization failed: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn check_index(&self, index: usize) -> AppResult<()> {
        if index >= self.steps.len() {
            return Err(SnapError::InvalidRecipe(format!(
                "no step {index}, recipe has {} steps",
                self.steps.len()
            )));
        }
        Ok(())
    }
}

impl FromIterator<RecipeStep> for Recipe {
    fn from_iter<I: IntoIterator<Item = RecipeStep>>(iter: I) -> Self {
        Self::from_steps(iter.into_iter().collect())
    }
}
