//! Time-intensity curves.
//!
//! A [`Tic`] keeps the per-frame ROI mean (`raw`) untouched and derives
//! `value` from it: the intensity change relative to the first included
//! frame. Excluding frames only changes the mask, so any sequence of
//! toggles can be undone exactly.

use ceuslab_common::{CeusError, CeusResult};
use serde::{Deserialize, Serialize};

/// One ROI's time-intensity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tic {
    pub label: String,
    /// Frame times in seconds.
    time: Vec<f64>,
    /// Per-frame mean intensity inside the ROI.
    raw: Vec<f64>,
    /// `raw - raw[first included]`. NaN everywhere when nothing is included.
    value: Vec<f64>,
    included: Vec<bool>,
}

impl Tic {
    /// Build a curve with every frame included.
    pub fn new(label: impl Into<String>, time: Vec<f64>, raw: Vec<f64>) -> CeusResult<Self> {
        let label = label.into();
        if time.len() != raw.len() {
            return Err(CeusError::input_shape(format!(
                "TIC '{label}': {} times for {} samples",
                time.len(),
                raw.len()
            )));
        }
        if raw.is_empty() {
            return Err(CeusError::insufficient_data(
                format!("TIC '{label}'"),
                1,
                0,
            ));
        }
        let included = vec![true; raw.len()];
        let mut tic = Self {
            label,
            time,
            value: Vec::new(),
            raw,
            included,
        };
        tic.recompute();
        Ok(tic)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    pub fn value(&self) -> &[f64] {
        &self.value
    }

    pub fn included(&self) -> &[bool] {
        &self.included
    }

    pub fn is_included(&self, index: usize) -> bool {
        self.included.get(index).copied().unwrap_or(false)
    }

    /// Include or exclude frame `index`. Out-of-range indices are ignored.
    pub fn set_included(&mut self, index: usize, included: bool) {
        let Some(slot) = self.included.get_mut(index) else {
            tracing::warn!(label = %self.label, index, "TIC index out of range");
            return;
        };
        if *slot != included {
            *slot = included;
            self.recompute();
        }
    }

    pub fn toggle(&mut self, index: usize) {
        let current = self.is_included(index);
        self.set_included(index, !current);
    }

    pub fn included_count(&self) -> usize {
        self.included.iter().filter(|&&b| b).count()
    }

    /// `(time, value)` of the included frames.
    pub fn included_points(&self) -> (Vec<f64>, Vec<f64>) {
        self.included
            .iter()
            .zip(self.time.iter().zip(&self.value))
            .filter(|(inc, _)| **inc)
            .map(|(_, (&t, &v))| (t, v))
            .unzip()
    }

    /// Time of the first included frame.
    pub fn first_included_time(&self) -> Option<f64> {
        self.included
            .iter()
            .position(|&b| b)
            .map(|i| self.time[i])
    }

    fn recompute(&mut self) {
        let baseline = self
            .included
            .iter()
            .position(|&b| b)
            .map(|i| self.raw[i])
            .unwrap_or(f64::NAN);
        self.value = self.raw.iter().map(|&r| r - baseline).collect();
    }
}
