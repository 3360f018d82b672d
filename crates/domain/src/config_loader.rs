//! Parses and validates a configuration directory (`defaults.yaml`,
//! `experiments.yaml`, `kpis.yaml`) into an immutable [`Configuration`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigurationError;
use crate::metrics::MetricModel;
use crate::model::{Configuration, Experiment, Kpi};

#[derive(Debug, Deserialize)]
struct ExperimentsDocument {
    experiments: Vec<Experiment>,
}

#[derive(Debug, Deserialize)]
struct KpiDocument {
    kpis: BTreeMap<String, KpiEntry>,
    connection: String,
    #[serde(rename = "get-users")]
    get_users: String,
}

#[derive(Debug, Deserialize)]
struct KpiEntry {
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    model: MetricModel,
    sql: String,
}

/// Loads and validates a configuration directory, failing on the first
/// violation encountered (see the ordered validation steps this enforces).
pub fn load(dir: &Path) -> Result<Configuration, ConfigurationError> {
    let defaults = load_yaml::<BTreeMap<String, serde_json::Value>>(dir, "defaults.yaml")?;
    let experiments_doc = load_yaml::<ExperimentsDocument>(dir, "experiments.yaml")?;
    let kpi_doc = load_yaml::<KpiDocument>(dir, "kpis.yaml")?;

    let kpis: BTreeMap<String, Kpi> = kpi_doc
        .kpis
        .into_iter()
        .map(|(name, entry)| {
            (
                name.clone(),
                Kpi {
                    name,
                    description: entry.description,
                    model: entry.model,
                    query: entry.sql,
                },
            )
        })
        .collect();

    validate_experiments(&experiments_doc.experiments, &kpis)?;

    Ok(Configuration {
        defaults,
        experiments: experiments_doc.experiments,
        kpis,
        connection_string: kpi_doc.connection,
        users_query: kpi_doc.get_users,
    })
}

fn validate_experiments(
    experiments: &[Experiment],
    kpis: &BTreeMap<String, Kpi>,
) -> Result<(), ConfigurationError> {
    let mut seen_names: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();

    for experiment in experiments {
        if !seen_names.insert(experiment.name.as_str()) {
            return Err(ConfigurationError::DuplicateExperimentName {
                name: experiment.name.clone(),
            });
        }

        if experiment.branches.is_empty() {
            return Err(ConfigurationError::NoBranches {
                experiment: experiment.name.clone(),
            });
        }

        let mut seen_branch_names = std::collections::BTreeSet::new();
        let mut control_count = 0;
        let mut fraction_sum = 0.0;

        for branch in &experiment.branches {
            if !seen_branch_names.insert(branch.name.as_str()) {
                return Err(ConfigurationError::DuplicateBranchName {
                    experiment: experiment.name.clone(),
                    branch: branch.name.clone(),
                });
            }

            if branch.fraction <= 0.0 || branch.fraction > 1.0 {
                return Err(ConfigurationError::InvalidBranchFraction {
                    experiment: experiment.name.clone(),
                    branch: branch.name.clone(),
                    fraction: branch.fraction,
                });
            }

            if branch.name == "control" {
                control_count += 1;
            }

            fraction_sum += branch.fraction;
        }

        if control_count == 0 {
            return Err(ConfigurationError::MissingControlBranch {
                experiment: experiment.name.clone(),
            });
        }
        if control_count > 1 {
            return Err(ConfigurationError::DuplicateControlBranch {
                experiment: experiment.name.clone(),
                count: control_count,
            });
        }

        if fraction_sum > 1.0 + 1e-9 {
            return Err(ConfigurationError::BranchFractionsExceedUnity {
                experiment: experiment.name.clone(),
                sum: fraction_sum,
            });
        }

        for kpi_name in experiment.all_kpis() {
            if !kpis.contains_key(kpi_name) {
                return Err(ConfigurationError::UnknownKpi {
                    experiment: experiment.name.clone(),
                    kpi: kpi_name.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn load_yaml<T: for<'de> Deserialize<'de>>(
    dir: &Path,
    filename: &str,
) -> Result<T, ConfigurationError> {
    let path = dir.join(filename);
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigurationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigurationError::Yaml {
        document: filename.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn valid_fixture(dir: &Path) {
        write_file(dir, "defaults.yaml", "btn-color: blue\n");
        write_file(
            dir,
            "experiments.yaml",
            r#"
experiments:
  - name: btn-color
    site-area: checkout
    start-date: 2020-01-01
    primary-kpi: conversion
    minimum-change: 0.01
    branches:
      - name: control
        fraction: 0.5
        parameters: {}
      - name: green
        fraction: 0.5
        parameters:
          btn-color: green
"#,
        );
        write_file(
            dir,
            "kpis.yaml",
            r#"
connection: "postgres://localhost/analytics"
get-users: "select id, signup_date from users"
kpis:
  conversion:
    description: "checkout conversion"
    type: bernoulli
    prior_alpha: 1
    prior_beta: 1
    sql: "select converted from checkouts where user_id = any(:users)"
"#,
        );
    }

    #[test]
    fn loads_valid_configuration() {
        let dir = tempfile::tempdir().unwrap();
        valid_fixture(dir.path());

        let config = load(dir.path()).unwrap();
        assert_eq!(config.experiments.len(), 1);
        assert_eq!(config.kpis.len(), 1);
        assert_eq!(config.connection_string, "postgres://localhost/analytics");
    }

    #[test]
    fn rejects_missing_control_branch() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "defaults.yaml", "{}\n");
        write_file(
            dir.path(),
            "experiments.yaml",
            r#"
experiments:
  - name: no-control
    site-area: checkout
    start-date: 2020-01-01
    primary-kpi: conversion
    minimum-change: 0.01
    branches:
      - name: a
        fraction: 0.5
        parameters: {}
"#,
        );
        write_file(
            dir.path(),
            "kpis.yaml",
            r#"
connection: "postgres://localhost/analytics"
get-users: "select id, signup_date from users"
kpis:
  conversion:
    type: bernoulli
    prior_alpha: 1
    prior_beta: 1
    sql: "select 1"
"#,
        );

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingControlBranch { .. }
        ));
    }

    #[test]
    fn rejects_superunity_branch_fractions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "defaults.yaml", "{}\n");
        write_file(
            dir.path(),
            "experiments.yaml",
            r#"
experiments:
  - name: too-much
    site-area: checkout
    start-date: 2020-01-01
    primary-kpi: conversion
    minimum-change: 0.01
    branches:
      - name: control
        fraction: 0.6
        parameters: {}
      - name: b
        fraction: 0.6
        parameters: {}
"#,
        );
        write_file(
            dir.path(),
            "kpis.yaml",
            r#"
connection: "postgres://localhost/analytics"
get-users: "select id, signup_date from users"
kpis:
  conversion:
    type: bernoulli
    prior_alpha: 1
    prior_beta: 1
    sql: "select 1"
"#,
        );

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::BranchFractionsExceedUnity { .. }
        ));
    }

    #[test]
    fn rejects_unknown_kpi_reference() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "defaults.yaml", "{}\n");
        write_file(
            dir.path(),
            "experiments.yaml",
            r#"
experiments:
  - name: bad-kpi
    site-area: checkout
    start-date: 2020-01-01
    primary-kpi: does-not-exist
    minimum-change: 0.01
    branches:
      - name: control
        fraction: 1.0
        parameters: {}
"#,
        );
        write_file(
            dir.path(),
            "kpis.yaml",
            r#"
connection: "postgres://localhost/analytics"
get-users: "select id, signup_date from users"
kpis:
  conversion:
    type: bernoulli
    prior_alpha: 1
    prior_beta: 1
    sql: "select 1"
"#,
        );

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownKpi { .. }));
    }
}
