//! Report types produced by the evaluator and served by the report API.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::metrics::Posterior;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    Continue,
    Conclude,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub posterior: Posterior,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KpiReport {
    pub kpi: String,
    pub branches: BTreeMap<String, BranchReport>,
    /// Non-control branch name -> (p_positive, p_negative) against control.
    pub improvements: BTreeMap<String, (f64, f64)>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub experiment: String,
    pub site_area: String,
    pub evaluated_at: NaiveDate,
    pub kpis: Vec<KpiReport>,
}

/// The full set of the most recently evaluated experiments, published
/// atomically by the report runner and read by the report API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSnapshot {
    pub experiments: BTreeMap<String, ExperimentReport>,
}

impl ReportSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}
