use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    Assumptions, RequestSummary, RunError, RunRequest, RunResult, ValidationReport, run,
    validate_only,
};

#[derive(Debug, Parser)]
#[command(
    name = "fire-projection",
    about = "Household FIRE projection and Monte Carlo stress testing"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one projection from a request file and print the result.
    Run {
        #[arg(long)]
        request: PathBuf,
        #[arg(long, help = "Replace the request's assumptions with this bundle")]
        assumptions: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
    },
    /// Validate a request file without projecting it.
    Validate {
        #[arg(long)]
        request: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("request has {0} validation error(s)")]
    Invalid(usize),
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputationErrorResponse {
    error: String,
    summary: RequestSummary,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn encode<T: Serialize>(value: &T, pretty: bool) -> Result<String, CliError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

pub async fn execute(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await?,
        Command::Run {
            request,
            assumptions,
            pretty,
        } => {
            let mut run_request: RunRequest = read_json(&request)?;
            if let Some(path) = assumptions {
                run_request.assumptions = read_json::<Assumptions>(&path)?;
            }
            let result = tokio::task::spawn_blocking(move || run(&run_request)).await?;
            match result {
                Ok(result) => println!("{}", encode(&result, pretty)?),
                Err(RunError::Validation(report)) => {
                    println!("{}", encode(&report, true)?);
                    return Err(CliError::Invalid(report.errors.len()));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Validate { request } => {
            let run_request: RunRequest = read_json(&request)?;
            let report = validate_only(&run_request);
            println!("{}", encode(&report, true)?);
            if !report.is_valid() {
                return Err(CliError::Invalid(report.errors.len()));
            }
        }
    }
    Ok(())
}

pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/run", post(run_handler))
        .route("/api/validate", post(validate_handler))
        .route("/api/assumptions/default", get(default_assumptions_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "FIRE projection API listening");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: crate::core::ENGINE_VERSION,
        },
    )
}

async fn default_assumptions_handler() -> Response {
    json_response(StatusCode::OK, Assumptions::default())
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn validate_handler(Json(request): Json<RunRequest>) -> Response {
    json_response(StatusCode::OK, validate_only(&request))
}

async fn run_handler(Json(request): Json<RunRequest>) -> Response {
    match tokio::task::spawn_blocking(move || run(&request)).await {
        Ok(result) => run_response(result),
        Err(err) => {
            error!(error = %err, "projection worker failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "projection worker failed")
        }
    }
}

fn run_response(result: Result<RunResult, RunError>) -> Response {
    match result {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(RunError::Validation(report)) => validation_response(report),
        Err(RunError::Computation { message, summary }) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ComputationErrorResponse {
                error: message,
                summary,
            },
        ),
        Err(RunError::Cancelled) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "run cancelled")
        }
    }
}

fn validation_response(report: ValidationReport) -> Response {
    json_response(StatusCode::UNPROCESSABLE_ENTITY, report)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HouseholdStructure;

    const REQUEST_JSON: &str = r#"{
        "household": {
            "structure": "couple",
            "people": [
                {"id": "sam", "birthYear": 1986, "retirementBalance": 250000, "salary": 110000, "fireAge": 50},
                {"id": "kit", "birthYear": 1988, "retirementBalance": 180000, "salary": 85000,
                 "voluntaryRate": 0.05, "fireAge": 52, "lifeExpectancy": 93}
            ],
            "expenses": {"single": 50000, "couple": 72000, "current": 85000},
            "expenseMode": {"mode": "dynamic"},
            "assets": {"nonRetirementInvestments": 150000, "homeValue": 900000}
        },
        "strategy": {
            "sequencing": "staggered",
            "bridge": {
                "partTime": {"annualAmount": 30000, "declineRate": 0.1, "durationYears": 5},
                "lumpSums": [{"year": 2037, "amount": 100000, "probability": 0.5, "taxTreatment": "capital-gains"}]
            },
            "spenddown": {"method": "spend-to-zero"}
        },
        "horizon": {"startYear": 2025},
        "options": {"monteCarlo": {"enabled": true, "trials": 600, "seed": 5}}
    }"#;

    fn parse_request() -> RunRequest {
        serde_json::from_str(REQUEST_JSON).expect("request should parse")
    }

    #[test]
    fn request_json_uses_camel_case_and_defaults() {
        let request = parse_request();
        assert_eq!(request.household.structure, HouseholdStructure::Couple);
        assert_eq!(request.household.people[0].life_expectancy, 90);
        assert_eq!(request.household.people[1].voluntary_rate, Some(0.05));
        assert!(request.household.assets.is_homeowner);
        assert_eq!(request.horizon.end_age, 95);
        assert_eq!(request.assumptions.version, "au-2024-25");
        assert!(request.options.include_timeline);
        assert_eq!(request.options.monte_carlo.max_trials, 10_000);
        assert_eq!(request.strategy.bridge.lump_sums[0].probability, 0.5);
    }

    #[test]
    fn successful_run_serializes_camel_case_fields() {
        let result = run(&parse_request());
        let response = run_response(result);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );

        let result = run(&parse_request()).expect("run");
        let json = serde_json::to_string(&result).expect("serialize");
        for key in [
            "\"timeline\"",
            "\"retirementBalanceTotal\"",
            "\"isFeasible\"",
            "\"feasibilityScore\"",
            "\"monteCarlo\"",
            "\"successRate\"",
            "\"confidenceIntervals\"",
            "\"engineVersion\"",
            "\"durationMs\"",
        ] {
            assert!(json.contains(key), "missing {key}");
        }
    }

    #[test]
    fn validation_failure_maps_to_422() {
        let mut request = parse_request();
        request.household.people.pop();
        let response = run_response(run(&request));
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn computation_failure_maps_to_500_with_summary() {
        let summary = RequestSummary::from(&parse_request());
        let response = run_response(Err(RunError::Computation {
            message: "non-finite pension in 2060".to_string(),
            summary,
        }));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::to_value(ComputationErrorResponse {
            error: "boom".to_string(),
            summary,
        })
        .expect("serialize");
        assert_eq!(body["summary"]["personCount"], 2);
        assert_eq!(body["summary"]["monteCarlo"], true);
        assert_eq!(body["summary"]["structure"], "couple");
    }

    #[test]
    fn cancelled_run_maps_to_503() {
        let response = run_response(Err(RunError::Cancelled));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["fire-projection", "serve", "--port", "9000"])
            .expect("serve parses");
        assert!(matches!(cli.command, Command::Serve { port: 9000 }));

        let cli = Cli::try_parse_from([
            "fire-projection",
            "run",
            "--request",
            "req.json",
            "--pretty",
        ])
        .expect("run parses");
        match cli.command {
            Command::Run {
                request,
                assumptions,
                pretty,
            } => {
                assert_eq!(request, PathBuf::from("req.json"));
                assert!(assumptions.is_none());
                assert!(pretty);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn missing_request_file_is_a_read_error() {
        let err = read_json::<RunRequest>(Path::new("/definitely/not/here.json"))
            .expect_err("missing file");
        assert!(matches!(err, CliError::Read { .. }));
    }
}
