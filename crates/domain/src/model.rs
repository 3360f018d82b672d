//! Core experiment/configuration types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who is eligible to participate in an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserClass {
    /// Signed up before the experiment's start date.
    Existing,
    /// Signed up on or after the experiment's start date.
    New,
    /// No signup-date restriction.
    Both,
}

impl Default for UserClass {
    fn default() -> Self {
        UserClass::Both
    }
}

/// Which direction(s) of a KPI change count as an improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tail {
    Less,
    Greater,
    Both,
}

impl Default for Tail {
    fn default() -> Self {
        Tail::Both
    }
}

/// One arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub fraction: f64,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Recorded outcome of a concluded experiment's primary KPI, if the
/// experiment declaration carries a `results` stanza.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub concluded_at: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A declared A/B test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "site-area")]
    pub site_area: String,
    #[serde(rename = "user-class", default)]
    pub user_class: UserClass,
    #[serde(rename = "start-date")]
    pub start_date: NaiveDate,
    pub branches: Vec<Branch>,
    #[serde(rename = "primary-kpi")]
    pub primary_kpi: String,
    #[serde(rename = "secondary-kpis", default)]
    pub secondary_kpis: Vec<String>,
    #[serde(rename = "minimum-change")]
    pub minimum_change: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tail: Tail,
    #[serde(default)]
    pub results: Option<ExperimentResults>,
}

fn default_confidence() -> f64 {
    0.95
}

/// Where an experiment stands relative to `today`, derived rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentStatus {
    Upcoming,
    InProgress,
    Concluded,
}

impl Experiment {
    pub fn status(&self, today: NaiveDate) -> ExperimentStatus {
        if self.results.is_some() {
            ExperimentStatus::Concluded
        } else if self.start_date <= today {
            ExperimentStatus::InProgress
        } else {
            ExperimentStatus::Upcoming
        }
    }

    pub fn control_branch(&self) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == "control")
    }

    pub fn all_kpis(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_kpi.as_str())
            .chain(self.secondary_kpis.iter().map(|s| s.as_str()))
    }
}

/// A named business metric: its statistical model, prior, and data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kpi {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub model: crate::metrics::MetricModel,
    pub query: String,
}

/// The fully validated, immutable configuration driving assignment and evaluation.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub defaults: BTreeMap<String, serde_json::Value>,
    pub experiments: Vec<Experiment>,
    pub kpis: BTreeMap<String, Kpi>,
    pub connection_string: String,
    pub users_query: String,
}

impl Configuration {
    /// Site areas referenced by at least one experiment, in sorted order.
    ///
    /// The sort order is the deterministic tie-break this implementation uses
    /// wherever parameter merges must iterate site-areas (see the assignment
    /// API's merge logic).
    pub fn site_areas(&self) -> Vec<&str> {
        let mut areas: Vec<&str> = self
            .experiments
            .iter()
            .map(|e| e.site_area.as_str())
            .collect();
        areas.sort_unstable();
        areas.dedup();
        areas
    }

    pub fn experiment(&self, name: &str) -> Option<&Experiment> {
        self.experiments.iter().find(|e| e.name == name)
    }
}
