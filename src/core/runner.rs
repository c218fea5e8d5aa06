use std::time::Instant;

use tracing::{info, warn};

use super::engine::project_timeline;
use super::error::{RequestSummary, RunError, ValidationReport};
use super::metrics::analyze;
use super::monte_carlo::{CancelToken, simulate};
use super::types::{
    AssetSeries, ChartSeries, IncomeSeries, RunMetadata, RunRequest, RunResult, YearRow,
};
use super::validation::validate;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chart-ready columns, one entry per timeline year.
pub fn build_series(rows: &[YearRow]) -> ChartSeries {
    let column = |f: fn(&YearRow) -> f64| rows.iter().map(f).collect::<Vec<_>>();

    ChartSeries {
        years: rows.iter().map(|r| r.year).collect(),
        assets: AssetSeries {
            retirement: column(|r| r.retirement_balance_total),
            non_retirement: column(|r| r.non_retirement_balance),
            net_worth: column(|r| r.net_worth),
        },
        income: IncomeSeries {
            salary: column(|r| r.salary_income),
            withdrawals: column(|r| r.withdrawals),
            bridge: column(|r| r.bridge_income),
            pension: column(|r| r.pension_income),
            tax: column(|r| r.total_tax),
            expenses: column(|r| r.expenses),
            surplus: column(|r| r.surplus),
        },
        feasible: rows.iter().map(|r| r.is_feasible).collect(),
    }
}

pub fn validate_only(request: &RunRequest) -> ValidationReport {
    let report = validate(request);
    info!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validated request"
    );
    report
}

pub fn run(request: &RunRequest) -> Result<RunResult, RunError> {
    run_with_cancel(request, &CancelToken::new())
}

/// Validates, projects, analyses and optionally stress-tests `request`.
/// Either the whole result is produced or an error is returned.
pub fn run_with_cancel(request: &RunRequest, cancel: &CancelToken) -> Result<RunResult, RunError> {
    let started = Instant::now();
    let summary = RequestSummary::from(request);
    info!(
        structure = ?summary.structure,
        people = summary.person_count,
        monte_carlo = summary.monte_carlo,
        "run started"
    );

    let report = validate(request);
    if !report.is_valid() {
        warn!(errors = report.errors.len(), "request failed validation");
        return Err(RunError::Validation(report));
    }
    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    let timeline = project_timeline(request).map_err(|err| {
        warn!(error = %err, "projection failed");
        RunError::computation(err, request)
    })?;
    let metrics = analyze(&timeline.rows, request);
    let series = build_series(&timeline.rows);

    let monte_carlo = if request.options.monte_carlo.enabled {
        Some(simulate(request, cancel)?)
    } else {
        None
    };

    let years_projected = timeline.rows.len();
    let rows = if request.options.include_timeline {
        timeline.rows
    } else {
        Vec::new()
    };
    let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

    info!(
        years = years_projected,
        feasible = metrics.is_feasible,
        score = metrics.feasibility_score,
        duration_ms,
        "run finished"
    );

    Ok(RunResult {
        timeline: rows,
        series,
        metrics,
        monte_carlo,
        warnings: report.warnings,
        metadata: RunMetadata {
            engine_version: ENGINE_VERSION.to_string(),
            assumptions_version: request.assumptions.version.clone(),
            duration_ms,
            years_projected,
            terminated_early: timeline.terminated_early,
        },
    })
}
