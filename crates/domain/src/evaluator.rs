//! Evaluates a single experiment against the analytics store: enumerates
//! eligible users, buckets them by branch, fits each KPI's metric model, and
//! derives improvement probabilities against the control branch.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::NaiveDate;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::assigner;
use crate::errors::ReportError;
use crate::metrics::Posterior;
use crate::model::{Configuration, Experiment, Tail};
use crate::report::{BranchReport, ExperimentReport, KpiReport, Recommendation};

/// Abstraction over the external analytics database. Kept deliberately
/// narrow (two read operations) so the evaluator's logic never depends on
/// the concrete SQL dialect or connection pooling strategy; the Postgres
/// implementation lives in the storage crate.
pub trait AnalyticsStore: Send + Sync {
    /// Runs `configuration.users_query`, returning `(user_id, signup_date)`
    /// pairs for every user eligible to be considered at all.
    fn fetch_users(
        &self,
        users_query: &str,
    ) -> impl Future<Output = Result<Vec<(i64, NaiveDate)>, ReportError>> + Send;

    /// Runs a KPI's query restricted to the given user-id set, returning raw
    /// sample values for that branch.
    fn fetch_kpi_samples(
        &self,
        kpi_query: &str,
        user_ids: &[i64],
    ) -> impl Future<Output = Result<Vec<f64>, ReportError>> + Send;
}

/// Runs the full evaluation pipeline for one experiment.
pub async fn evaluate<S: AnalyticsStore>(
    experiment: &Experiment,
    configuration: &Configuration,
    store: &S,
    today: NaiveDate,
) -> Result<ExperimentReport, ReportError> {
    let users = store.fetch_users(&configuration.users_query).await?;

    let mut users_by_branch: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for branch in &experiment.branches {
        users_by_branch.insert(branch.name.clone(), Vec::new());
    }

    for (user_id, signup_date) in users {
        let assignment =
            assigner::assignment_for_site_area(configuration, &experiment.site_area, user_id, signup_date, today)?;
        if let Some(assignment) = assignment {
            if assignment.experiment.name == experiment.name {
                users_by_branch
                    .entry(assignment.branch.name.clone())
                    .or_default()
                    .push(user_id);
            }
        }
    }

    let mut kpi_reports = Vec::new();
    for kpi_name in experiment.all_kpis() {
        let kpi = configuration.kpis.get(kpi_name).ok_or_else(|| {
            ReportError::MetricFit {
                kpi: kpi_name.to_string(),
                reason: "kpi not present in configuration".to_string(),
            }
        })?;

        let mut branch_reports = BTreeMap::new();
        for (branch_name, user_ids) in &users_by_branch {
            let samples = store.fetch_kpi_samples(&kpi.query, user_ids).await?;
            let fit = kpi.model.fit(&samples).map_err(|e| ReportError::MetricFit {
                kpi: kpi_name.to_string(),
                reason: e.to_string(),
            })?;
            branch_reports.insert(
                branch_name.clone(),
                BranchReport {
                    posterior: fit.posterior,
                    sample_size: fit.sample_size,
                },
            );
        }

        let control = branch_reports
            .get("control")
            .ok_or_else(|| ReportError::MetricFit {
                kpi: kpi_name.to_string(),
                reason: "control branch produced no fit".to_string(),
            })?
            .posterior
            .clone();

        let mut improvements = BTreeMap::new();
        for (branch_name, report) in &branch_reports {
            if branch_name == "control" {
                continue;
            }
            improvements.insert(
                branch_name.clone(),
                difference_probabilities(&control, &report.posterior, experiment.minimum_change),
            );
        }

        let recommendation = if kpi_name == experiment.primary_kpi {
            recommend(&improvements, experiment.tail, experiment.confidence)
        } else {
            Recommendation::Continue
        };

        kpi_reports.push(KpiReport {
            kpi: kpi_name.to_string(),
            branches: branch_reports,
            improvements,
            recommendation,
        });
    }

    Ok(ExperimentReport {
        experiment: experiment.name.clone(),
        site_area: experiment.site_area.clone(),
        evaluated_at: today,
        kpis: kpi_reports,
    })
}

/// `(p_positive, p_negative)`: the probability a branch beats control by at
/// least `minimum_change`, and the probability it trails control by at
/// least `minimum_change`, under a Normal approximation to the difference of
/// the two posterior means.
pub fn difference_probabilities(
    control: &Posterior,
    test: &Posterior,
    minimum_change: f64,
) -> (f64, f64) {
    let variance = control.std.powi(2) + test.std.powi(2);
    let sigma = variance.sqrt();

    if sigma <= 0.0 {
        let diff = test.mean - control.mean;
        let p_positive = if diff >= minimum_change { 1.0 } else { 0.0 };
        let p_negative = if -diff >= minimum_change { 1.0 } else { 0.0 };
        return (p_positive, p_negative);
    }

    let standard_normal = Normal::new(0.0, 1.0).expect("standard normal is always valid");

    let z_positive = (control.mean + minimum_change - test.mean) / sigma;
    let p_positive = 1.0 - standard_normal.cdf(z_positive);

    let z_negative = (test.mean + minimum_change - control.mean) / sigma;
    let p_negative = 1.0 - standard_normal.cdf(z_negative);

    (p_positive, p_negative)
}

fn recommend(
    improvements: &BTreeMap<String, (f64, f64)>,
    tail: Tail,
    confidence: f64,
) -> Recommendation {
    let success_probability = |p_positive: f64, p_negative: f64| -> f64 {
        match tail {
            Tail::Less => p_negative,
            Tail::Greater => p_positive,
            Tail::Both => p_positive.max(p_negative),
        }
    };

    let any_branch_conclusive = improvements
        .values()
        .any(|&(p_positive, p_negative)| success_probability(p_positive, p_negative) > confidence);

    let all_branches_futile = !improvements.is_empty()
        && improvements
            .values()
            .all(|&(_, p_negative)| p_negative < 1.0 - confidence);

    if any_branch_conclusive || all_branches_futile {
        Recommendation::Conclude
    } else {
        Recommendation::Continue
    }
}
