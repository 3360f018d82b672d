//! Background driver that periodically reloads the configuration and
//! evaluates every in-progress experiment, publishing the results as a
//! single atomic snapshot.
//!
//! Re-arms 30 seconds after the *previous cycle completed*, not 30 seconds
//! after it started, so a slow analytics database never causes overlapping
//! runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use needle_domain::evaluator;
use needle_domain::model::ExperimentStatus;
use needle_domain::report::ReportSnapshot;
use needle_storage::PgAnalyticsStore;

use crate::AppState;

const CYCLE_DELAY: Duration = Duration::from_secs(30);

/// Runs forever as a spawned task. A failure mid-cycle is logged and the
/// loop continues; it never exits except with the process.
pub async fn run(state: Arc<AppState>, config_dir: PathBuf) {
    loop {
        if let Err(err) = run_cycle(&state, &config_dir).await {
            tracing::error!("report cycle failed: {}", err);
        }
        tokio::time::sleep(CYCLE_DELAY).await;
    }
}

async fn run_cycle(state: &Arc<AppState>, config_dir: &PathBuf) -> anyhow::Result<()> {
    let configuration = match needle_domain::config_loader::load(config_dir) {
        Ok(configuration) => {
            let configuration = Arc::new(configuration);
            *state.configuration.write().await = configuration.clone();
            configuration
        }
        Err(err) => {
            tracing::error!("configuration reload failed, keeping previous configuration: {}", err);
            state.configuration.read().await.clone()
        }
    };

    let pool = needle_storage::create_pool(&configuration.connection_string).await?;
    let store = PgAnalyticsStore::new(pool);
    let today = Utc::now().date_naive();

    let mut snapshot = ReportSnapshot::empty();

    for experiment in &configuration.experiments {
        if experiment.status(today) != ExperimentStatus::InProgress {
            continue;
        }

        match evaluator::evaluate(experiment, &configuration, &store, today).await {
            Ok(report) => {
                snapshot.experiments.insert(experiment.name.clone(), report);
            }
            Err(err) => {
                tracing::error!(
                    experiment = %experiment.name,
                    "evaluation failed, excluding from this cycle's snapshot: {}",
                    err
                );
            }
        }
    }

    *state.report_snapshot.write().await = Arc::new(snapshot);
    Ok(())
}
