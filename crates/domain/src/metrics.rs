//! Pluggable KPI metric models.
//!
//! A metric model is a closed set of estimators, not a trait-object class
//! hierarchy: every KPI in a configuration names one of these variants and
//! its `fit` is the only capability the evaluator needs from it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

const PERCENTILE_COUNT: usize = 101;
const BOOTSTRAP_RESAMPLES: usize = 10_000;

/// A described posterior distribution over a branch's KPI value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posterior {
    pub mean: f64,
    pub std: f64,
    pub skewness: f64,
    /// `percentiles[i]` is the value at the i-th percentile, i in 0..=100.
    pub percentiles: Vec<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricFitError {
    #[error("no observations to fit")]
    NoSamples,
    #[error("invalid beta posterior parameters alpha={alpha}, beta={beta}")]
    InvalidBetaParameters { alpha: f64, beta: f64 },
}

/// The model a KPI is evaluated under, and its prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MetricModel {
    /// Conjugate Beta-Bernoulli model for {0,1}-valued samples (conversion
    /// rates, click-through, etc).
    Bernoulli {
        #[serde(default = "default_bernoulli_prior")]
        prior_alpha: f64,
        #[serde(default = "default_bernoulli_prior")]
        prior_beta: f64,
    },
    /// Distribution-free model for real-valued samples: resamples the
    /// observation pool (seeded with `prior`) to approximate the sampling
    /// distribution of the median.
    MedianBootstrap {
        #[serde(default)]
        prior: Vec<f64>,
    },
}

fn default_bernoulli_prior() -> f64 {
    1.0
}

/// The number of raw observations a fit was computed from, alongside the
/// posterior itself.
pub struct FitResult {
    pub posterior: Posterior,
    pub sample_size: usize,
}

impl MetricModel {
    pub fn fit(&self, samples: &[f64]) -> Result<FitResult, MetricFitError> {
        match self {
            MetricModel::Bernoulli {
                prior_alpha,
                prior_beta,
            } => fit_bernoulli(*prior_alpha, *prior_beta, samples),
            MetricModel::MedianBootstrap { prior } => fit_median_bootstrap(prior, samples),
        }
    }
}

fn fit_bernoulli(
    prior_alpha: f64,
    prior_beta: f64,
    samples: &[f64],
) -> Result<FitResult, MetricFitError> {
    if samples.is_empty() {
        return Err(MetricFitError::NoSamples);
    }

    let successes: f64 = samples.iter().filter(|&&s| s > 0.5).count() as f64;
    let trials = samples.len() as f64;

    let alpha = prior_alpha + successes;
    let beta = prior_beta + (trials - successes);

    if alpha <= 0.0 || beta <= 0.0 {
        return Err(MetricFitError::InvalidBetaParameters { alpha, beta });
    }

    // Closed-form Beta(alpha, beta) moments.
    let mean = alpha / (alpha + beta);
    let variance = (alpha * beta) / ((alpha + beta).powi(2) * (alpha + beta + 1.0));
    let skewness = 2.0 * (beta - alpha) * (alpha + beta + 1.0).sqrt()
        / ((alpha + beta + 2.0) * (alpha * beta).sqrt());

    let dist = Beta::new(alpha, beta)
        .map_err(|_| MetricFitError::InvalidBetaParameters { alpha, beta })?;

    let percentiles = (0..PERCENTILE_COUNT)
        .map(|i| {
            let p = i as f64 / (PERCENTILE_COUNT - 1) as f64;
            // inverse_cdf is undefined exactly at 0 and 1 for Beta; clamp the
            // query into the open interval and snap the resulting endpoints.
            let q = p.clamp(1e-9, 1.0 - 1e-9);
            dist.inverse_cdf(q)
        })
        .collect();

    Ok(FitResult {
        posterior: Posterior {
            mean,
            std: variance.sqrt(),
            skewness,
            percentiles,
        },
        sample_size: samples.len(),
    })
}

fn fit_median_bootstrap(prior: &[f64], samples: &[f64]) -> Result<FitResult, MetricFitError> {
    if samples.is_empty() {
        return Err(MetricFitError::NoSamples);
    }

    let mut pool: Vec<f64> = Vec::with_capacity(prior.len() + samples.len());
    pool.extend_from_slice(prior);
    pool.extend_from_slice(samples);

    if pool.is_empty() {
        return Err(MetricFitError::NoSamples);
    }

    let mut rng = rand::thread_rng();
    let mut medians = Vec::with_capacity(BOOTSTRAP_RESAMPLES);
    let mut scratch = vec![0.0_f64; pool.len()];

    for _ in 0..BOOTSTRAP_RESAMPLES {
        for slot in scratch.iter_mut() {
            let idx = rng.gen_range(0..pool.len());
            *slot = pool[idx];
        }
        scratch.sort_by(|a, b| a.partial_cmp(b).expect("samples must not be NaN"));
        medians.push(median_of_sorted(&scratch));
    }

    medians.sort_by(|a, b| a.partial_cmp(b).expect("medians must not be NaN"));

    let n = medians.len() as f64;
    let mean = medians.iter().sum::<f64>() / n;
    let variance = medians.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let skewness = if std > 0.0 {
        medians.iter().map(|m| ((m - mean) / std).powi(3)).sum::<f64>() / n
    } else {
        0.0
    };

    let percentiles = (0..PERCENTILE_COUNT)
        .map(|i| percentile_of_sorted(&medians, i as f64 / (PERCENTILE_COUNT - 1) as f64))
        .collect();

    Ok(FitResult {
        posterior: Posterior {
            mean,
            std,
            skewness,
            percentiles,
        },
        sample_size: samples.len(),
    })
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Linear-interpolated order statistic, matching `numpy.percentile`'s default
/// ("linear") method.
fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}
