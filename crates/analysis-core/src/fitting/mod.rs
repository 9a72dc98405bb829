//! Multi-start kinetic model fitting.
//!
//! Every model is fitted from one data-driven seed plus `starts − 1`
//! jittered copies of it. Starts are drawn sequentially from one seeded
//! generator, solved in parallel, and reduced to the lowest RSS with ties
//! going to the earliest start.

pub mod lm;
pub mod models;

use std::collections::BTreeMap;

use ceuslab_common::{CeusError, CeusResult};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use lm::{CurveModel, LmConfig, LmOutcome};
pub use models::{Bounds, DerivedParams, KineticModel, SeedHints};

/// Fewest starts a fit may run with.
pub const MIN_STARTS: usize = 25;

/// What to fit and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRequest {
    pub models: Vec<KineticModel>,
    /// Starts per model, raised to [`MIN_STARTS`].
    pub starts: usize,
    /// Generator seed. `None` draws one and logs it.
    pub seed: Option<u64>,
    /// Wash-in fits use samples with `t ≤ washin_t_max` only.
    pub washin_t_max: f64,
    pub hints: SeedHints,
    /// Replaces the default box for the named models.
    #[serde(default)]
    pub bounds: BTreeMap<KineticModel, Bounds>,
    pub lm: LmConfig,
}

impl Default for FitRequest {
    fn default() -> Self {
        Self {
            models: KineticModel::ALL.to_vec(),
            starts: 50,
            seed: None,
            washin_t_max: 5.0,
            hints: SeedHints::default(),
            bounds: BTreeMap::new(),
            lm: LmConfig::default(),
        }
    }
}

/// Best fit of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: KineticModel,
    pub params: Vec<f64>,
    pub param_names: Vec<String>,
    /// Model at every input time, anchored to zero at the first time.
    pub fitted: Vec<f64>,
    /// Residual sum of squares of the un-anchored model on the fitted samples.
    pub rss: f64,
    pub derived: DerivedParams,
    /// Index of the winning start; 0 is the data seed.
    pub start_index: usize,
}

impl FitResult {
    /// Parameter by name.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.params[i])
    }

    /// Un-anchored model value at `t`.
    pub fn predict(&self, t: f64) -> f64 {
        self.model.value(t, &self.params)
    }
}

/// Per-model outcome. One model failing never hides another.
pub type ModelFits = BTreeMap<KineticModel, CeusResult<FitResult>>;

/// Fit every requested model to `y(t)`.
pub fn fit_models(t: &[f64], y: &[f64], request: &FitRequest) -> ModelFits {
    let seed = request.seed.unwrap_or_else(|| {
        let seed: u64 = rand::rng().random();
        tracing::info!(seed, "No fit seed given, drew one");
        seed
    });

    request
        .models
        .iter()
        .map(|&model| {
            // Keyed on the model, not its position in the request.
            let model_seed = seed.wrapping_add(model.ordinal());
            let result = fit_model(model, t, y, request, model_seed);
            if let Err(e) = &result {
                tracing::warn!(model = model.name(), error = %e, "Model fit failed");
            }
            (model, result)
        })
        .collect()
}

/// Fit one model with starts drawn from `StdRng::seed_from_u64(seed)`.
pub fn fit_model(
    model: KineticModel,
    t: &[f64],
    y: &[f64],
    request: &FitRequest,
    seed: u64,
) -> CeusResult<FitResult> {
    if t.len() != y.len() {
        return Err(CeusError::input_shape(format!(
            "{} times for {} values",
            t.len(),
            y.len()
        )));
    }

    let (fit_t, fit_y): (Vec<f64>, Vec<f64>) = t
        .iter()
        .zip(y)
        .filter(|(ti, yi)| {
            ti.is_finite()
                && yi.is_finite()
                && (model.is_bolus() || (**ti >= 0.0 && **ti <= request.washin_t_max))
        })
        .map(|(&ti, &yi)| (ti, yi))
        .unzip();
    if fit_t.len() < model.min_points() {
        return Err(CeusError::insufficient_data(
            format!("{model} fit"),
            model.min_points(),
            fit_t.len(),
        ));
    }

    let bounds = request
        .bounds
        .get(&model)
        .filter(|b| b.lower.len() == model.param_count() && b.upper.len() == model.param_count())
        .cloned()
        .unwrap_or_else(|| model.default_bounds(&fit_t, &fit_y));

    let seed_params = model.seed(&fit_t, &fit_y, &request.hints);
    let starts = jittered_starts(&seed_params, &bounds, request.starts.max(MIN_STARTS), seed);

    let best = starts
        .par_iter()
        .enumerate()
        .filter_map(|(index, start)| {
            let outcome = lm::minimize(
                &model,
                &fit_t,
                &fit_y,
                start,
                &bounds.lower,
                &bounds.upper,
                &request.lm,
            )?;
            let finite = outcome.rss.is_finite() && outcome.params.iter().all(|p| p.is_finite());
            tracing::debug!(
                model = model.name(),
                start = index,
                rss = outcome.rss,
                iterations = outcome.iterations,
                converged = outcome.converged,
                "Fit start finished"
            );
            finite.then_some((index, outcome))
        })
        .reduce_with(|a, b| {
            if b.1.rss < a.1.rss || (b.1.rss == a.1.rss && b.0 < a.0) {
                b
            } else {
                a
            }
        });

    let Some((start_index, outcome)) = best else {
        return Err(CeusError::fit_diverged(model.name(), starts.len()));
    };

    let first = t.first().copied().unwrap_or(0.0);
    let origin = model.value(first, &outcome.params);
    let fitted = t
        .iter()
        .map(|&ti| (model.value(ti, &outcome.params) - origin).max(0.0))
        .collect();

    tracing::info!(
        model = model.name(),
        rss = outcome.rss,
        start = start_index,
        params = ?outcome.params,
        "Model fitted"
    );

    Ok(FitResult {
        model,
        derived: model.derived(&outcome.params),
        param_names: model.param_names().iter().map(|s| s.to_string()).collect(),
        params: outcome.params,
        fitted,
        rss: outcome.rss,
        start_index,
    })
}

/// Start 0 is `seed_params`; the rest scale each component by `U(0.5, 1.5)`
/// and clamp it into the box.
fn jittered_starts(seed_params: &[f64], bounds: &Bounds, count: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut starts = Vec::with_capacity(count);
    let mut first = seed_params.to_vec();
    lm::project(&mut first, &bounds.lower, &bounds.upper);
    starts.push(first);
    for _ in 1..count {
        let mut start: Vec<f64> = seed_params
            .iter()
            .map(|p| p * rng.random_range(0.5..1.5))
            .collect();
        lm::project(&mut start, &bounds.lower, &bounds.upper);
        starts.push(start);
    }
    starts
}
