pub mod accumulation;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod monte_carlo;
pub mod pension;
pub mod runner;
pub mod spenddown;
pub mod stats;
pub mod tax;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use engine::{Timeline, project_timeline};
pub use error::{CalcError, RequestSummary, RunError, ValidationReport};
pub use monte_carlo::CancelToken;
pub use runner::{ENGINE_VERSION, run, run_with_cancel, validate_only};
pub use types::*;
