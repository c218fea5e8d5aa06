use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use super::engine::{ProjectionPlan, project_full_horizon};
use super::error::{CalcError, RunError, ensure_finite};
use super::stats::{geometric_mean_return, mean, percentile, percentile_band};
use super::types::{
    ConfidenceInterval, MarketAssumptions, MonteCarloStrategy, MonteCarloSummary, RunRequest,
    SimulationRun, StressTest, TrialYear,
};

const RETURN_FLOOR: f64 = -0.95;
const RETURN_CEILING: f64 = 2.5;
const INFLATION_FLOOR: f64 = -0.03;
const INFLATION_CEILING: f64 = 0.20;
const SAFE_TARGET: f64 = 0.90;
const CONSERVATIVE_TARGET: f64 = 0.95;
const DYNAMIC_RAISE: f64 = 1.1;
const DYNAMIC_CUT: f64 = 0.9;
const CONFIDENCE_MARKS: [u32; 3] = [10, 20, 30];
/// Rounding slack when comparing an averaged return against its threshold.
const COHORT_TOLERANCE: f64 = 1e-12;

/// Cooperative cancellation shared between a caller and running trials.
/// Checked before each trial starts, never mid-trial.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Portfolio return and inflation distribution for one allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketModel {
    pub return_mean: f64,
    pub return_volatility: f64,
    pub inflation_mean: f64,
    pub inflation_volatility: f64,
    pub correlation: f64,
}

impl MarketModel {
    /// Blends per-class means and volatilities linearly by allocation weight.
    pub fn blended(market: &MarketAssumptions) -> Self {
        let total = market.allocation.total();
        let weight = |pct: f64| if total > 0.0 { pct / total } else { 0.0 };
        let (ws, wb, wc) = (
            weight(market.allocation.stocks),
            weight(market.allocation.bonds),
            weight(market.allocation.cash),
        );

        Self {
            return_mean: ws * market.stocks.mean + wb * market.bonds.mean + wc * market.cash.mean,
            return_volatility: ws * market.stocks.volatility
                + wb * market.bonds.volatility
                + wc * market.cash.volatility,
            inflation_mean: market.inflation_mean,
            inflation_volatility: market.inflation_volatility,
            correlation: market.correlation.clamp(-1.0, 1.0),
        }
    }

    fn without_volatility(self) -> Self {
        Self {
            return_volatility: 0.0,
            inflation_volatility: 0.0,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSample {
    pub market_return: f64,
    pub inflation: f64,
}

/// Box-Muller normals over any seedable generator; the second value of each
/// pair is cached for the next call.
pub struct NormalSampler<R> {
    rng: R,
    cached_normal: Option<f64>,
}

impl<R: RngCore> NormalSampler<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            cached_normal: None,
        }
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.rng.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

/// One year's correlated (return, inflation) draw.
pub fn sample_market<R: RngCore>(
    model: &MarketModel,
    sampler: &mut NormalSampler<R>,
) -> MarketSample {
    let z1 = sampler.standard_normal();
    let z2 = sampler.standard_normal();
    let rho = model.correlation;
    let orth = (1.0 - rho * rho).max(0.0).sqrt();

    MarketSample {
        market_return: (model.return_mean + model.return_volatility * z1)
            .clamp(RETURN_FLOOR, RETURN_CEILING),
        inflation: (model.inflation_mean + model.inflation_volatility * (rho * z1 + orth * z2))
            .clamp(INFLATION_FLOOR, INFLATION_CEILING),
    }
}

pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

pub fn trial_seed(base_seed: u64, trial: u32) -> u64 {
    splitmix64(base_seed ^ ((trial as u64) << 32) ^ trial as u64)
}

/// Seed used when the caller does not pin one: a mix of the request's
/// household and horizon, so identical requests draw identical paths.
pub fn request_seed(request: &RunRequest) -> u64 {
    let household = &request.household;
    let mut parts = vec![
        request.horizon.start_year as u64,
        request.horizon.end_age as u64,
        household.expenses.current.to_bits(),
        household.expenses.single.to_bits(),
        household.expenses.couple.to_bits(),
        household.assets.non_retirement_investments.to_bits(),
        request.options.monte_carlo.trials as u64,
    ];
    for person in &household.people {
        parts.push(person.birth_year as u64);
        parts.push(person.retirement_balance.to_bits());
        parts.push(person.salary.to_bits());
        parts.push(person.fire_age.unwrap_or(0) as u64);
    }
    parts
        .into_iter()
        .fold(0x5EED_F12E_0000_0001, |acc, part| splitmix64(acc ^ part))
}

/// One projected year's cash flows in start-year dollars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashFlowYear {
    /// Guarantee and voluntary contributions into retirement accounts.
    pub contributions: f64,
    /// Take-home salary, bridge income and pension, net of tax.
    pub income: f64,
    pub spending: f64,
    /// Share of the grown retirement balance drawn down this year.
    pub drawdown_rate: f64,
}

/// The consolidated view of a request every trial replays: a retirement
/// bucket that is only drawn at the projected drawdown rate, and a liquid
/// bucket that absorbs each year's surplus or deficit.
#[derive(Debug, Clone)]
pub struct TrialPlan {
    pub schedule: Vec<CashFlowYear>,
    /// Years before the strategy starts setting spending.
    pub retirement_offset: u32,
    pub initial_retirement: f64,
    pub initial_liquid: f64,
    pub withdrawal_rate: Option<f64>,
    pub strategy: MonteCarloStrategy,
    pub guardrail_floor: f64,
    pub guardrail_ceiling: f64,
    pub model: MarketModel,
}

impl TrialPlan {
    /// Builds the cash-flow schedule from the deterministic projection,
    /// deflated to start-year dollars so each trial can re-inflate it along
    /// its own inflation path.
    pub fn from_request(request: &RunRequest) -> Result<Self, CalcError> {
        let plan = ProjectionPlan::new(request);
        let household = &request.household;
        let options = &request.options.monte_carlo;
        let start_year = plan.start_year();
        let inflation = request.assumptions.inflation_rate;

        let timeline = project_full_horizon(request)?;
        let schedule = timeline
            .rows
            .iter()
            .map(|row| -> Result<CashFlowYear, CalcError> {
                let index = (1.0 + inflation).powi((row.year - start_year).max(0));
                let contributions = row
                    .people
                    .iter()
                    .map(|p| p.mandatory_contribution + p.voluntary_contribution)
                    .sum::<f64>();
                let income =
                    row.salary_income + row.bridge_income + row.pension_income - row.total_tax;
                let available = row.retirement_balance_total + row.withdrawals;
                let drawdown_rate = if available > 0.0 {
                    (row.withdrawals / available).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let deflate = |value: f64, what: &'static str| {
                    ensure_finite(value / index, what, row.year)
                };
                Ok(CashFlowYear {
                    contributions: deflate(contributions, "trial contributions")?,
                    income: deflate(income, "trial income")?,
                    spending: deflate(row.expenses, "trial spending")?,
                    drawdown_rate,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            schedule,
            retirement_offset: (plan.bridge_start_year() - start_year).max(0) as u32,
            initial_retirement: household
                .people
                .iter()
                .map(|p| p.retirement_balance.max(0.0))
                .sum(),
            initial_liquid: household.assets.non_retirement_investments.max(0.0),
            withdrawal_rate: options.withdrawal_rate,
            strategy: options.strategy,
            guardrail_floor: options.guardrail_floor,
            guardrail_ceiling: options.guardrail_ceiling,
            model: MarketModel::blended(&options.market),
        })
    }

    pub fn years(&self) -> u32 {
        self.schedule.len() as u32
    }

    pub fn initial_portfolio(&self) -> f64 {
        self.initial_retirement.max(0.0) + self.initial_liquid.max(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct RetirementStart {
    /// Real spending fixed by a withdrawal rate; the schedule applies otherwise.
    pinned_real: Option<f64>,
    price_index: f64,
    initial_rate: f64,
}

#[derive(Debug)]
struct SpendingState {
    start: Option<RetirementStart>,
    dynamic_factor: f64,
}

impl Default for SpendingState {
    fn default() -> Self {
        Self {
            start: None,
            dynamic_factor: 1.0,
        }
    }
}

impl SpendingState {
    /// Household spending for a retirement year under the plan's strategy.
    /// `scheduled_real` is the projected spending in start-year dollars.
    fn spending(
        &mut self,
        plan: &TrialPlan,
        scheduled_real: f64,
        portfolio: f64,
        price_index: f64,
        last_return: Option<f64>,
    ) -> f64 {
        let first_year = self.start.is_none();
        let start = *self.start.get_or_insert_with(|| {
            let pinned_real = plan
                .withdrawal_rate
                .map(|rate| rate * portfolio / price_index);
            let base_nominal = pinned_real.unwrap_or(scheduled_real) * price_index;
            RetirementStart {
                pinned_real,
                price_index,
                initial_rate: if portfolio > 0.0 {
                    base_nominal / portfolio
                } else {
                    0.0
                },
            }
        });
        let base_real = start.pinned_real.unwrap_or(scheduled_real);
        let indexed_base = base_real * price_index;

        let amount = match plan.strategy {
            MonteCarloStrategy::FixedReal => indexed_base,
            MonteCarloStrategy::FixedNominal => base_real * start.price_index,
            MonteCarloStrategy::Dynamic => {
                if let (false, Some(last)) = (first_year, last_return) {
                    if last > plan.model.return_mean {
                        self.dynamic_factor *= DYNAMIC_RAISE;
                    } else if last < 0.0 {
                        self.dynamic_factor *= DYNAMIC_CUT;
                    }
                }
                self.dynamic_factor * indexed_base
            }
            MonteCarloStrategy::Guardrails => (start.initial_rate * portfolio)
                .max(plan.guardrail_floor * indexed_base)
                .min(plan.guardrail_ceiling * indexed_base),
        };
        amount.max(0.0)
    }
}

/// Replays `plan` once along the path drawn from `seed`.
///
/// The trial is ruined in the first year the liquid bucket cannot cover
/// spending after income and retirement drawdowns.
pub fn run_trial(plan: &TrialPlan, trial: u32, seed: u64) -> SimulationRun {
    let mut sampler = NormalSampler::new(ChaCha8Rng::seed_from_u64(seed));
    let mut spending = SpendingState::default();
    let mut retirement = plan.initial_retirement.max(0.0);
    let mut liquid = plan.initial_liquid.max(0.0);
    let mut price_index = 1.0;
    let mut last_return = None;
    let mut ruin_year = None;
    let mut years = Vec::with_capacity(plan.schedule.len());

    for (t, flow) in (0u32..).zip(&plan.schedule) {
        let sample = sample_market(&plan.model, &mut sampler);
        let growth = sample.market_return;
        let mut withdrawal = 0.0;

        if ruin_year.is_none() {
            let spend = if t < plan.retirement_offset {
                flow.spending * price_index
            } else {
                spending.spending(
                    plan,
                    flow.spending,
                    retirement + liquid,
                    price_index,
                    last_return,
                )
            };

            let available = retirement * (1.0 + growth)
                + flow.contributions * price_index * (1.0 + growth * 0.5);
            let drawn = available.max(0.0) * flow.drawdown_rate;
            retirement = (available - drawn).max(0.0);

            let income = flow.income * price_index;
            withdrawal = (spend - income).max(0.0);
            let funded = liquid * (1.0 + growth) + income + drawn - spend;
            if funded < 0.0 {
                ruin_year = Some(t);
                liquid = 0.0;
            } else {
                liquid = funded;
            }
        }

        years.push(TrialYear {
            market_return: sample.market_return,
            inflation: sample.inflation,
            withdrawal,
            balance: retirement + liquid,
        });
        price_index *= 1.0 + sample.inflation;
        last_return = Some(sample.market_return);
    }

    SimulationRun {
        trial,
        seed,
        years,
        success: ruin_year.is_none(),
        ruin_year,
        final_value: retirement + liquid,
    }
}

/// Runs every trial on the rayon pool. Returns `RunError::Cancelled` if the
/// token fires before all trials have started.
pub fn simulate_trials(
    plan: &TrialPlan,
    base_seed: u64,
    trials: u32,
    cancel: &CancelToken,
) -> Result<Vec<SimulationRun>, RunError> {
    collect_trials(trials, cancel, |trial| {
        run_trial(plan, trial, trial_seed(base_seed, trial))
    })
}

fn collect_trials<F>(
    trials: u32,
    cancel: &CancelToken,
    run: F,
) -> Result<Vec<SimulationRun>, RunError>
where
    F: Fn(u32) -> SimulationRun + Sync + Send,
{
    let runs: Option<Vec<SimulationRun>> = (0..trials)
        .into_par_iter()
        .map(|trial| {
            if cancel.is_cancelled() {
                return None;
            }
            Some(run(trial))
        })
        .collect();

    match runs {
        Some(runs) if !cancel.is_cancelled() => Ok(runs),
        _ => {
            warn!(trials, "monte carlo cancelled");
            Err(RunError::Cancelled)
        }
    }
}

/// Withdrawal rate the plan implies at retirement under mean returns.
pub fn reference_withdrawal_rate(plan: &TrialPlan) -> f64 {
    let flat = TrialPlan {
        model: plan.model.without_volatility(),
        ..plan.clone()
    };
    let run = run_trial(&flat, 0, 0);
    let offset = plan.retirement_offset as usize;
    let portfolio_at_retirement = match offset {
        0 => plan.initial_portfolio(),
        n => run
            .years
            .get(n - 1)
            .map(|y| y.balance)
            .unwrap_or_else(|| plan.initial_portfolio()),
    };
    let first_withdrawal = run.years.get(offset).map(|y| y.withdrawal).unwrap_or(0.0);

    match plan.withdrawal_rate {
        Some(rate) => rate,
        None if portfolio_at_retirement > 0.0 => first_withdrawal / portfolio_at_retirement,
        None => 0.0,
    }
}

fn stress_test(runs: &[SimulationRun], model: &MarketModel) -> StressTest {
    let threshold = model.return_mean - model.return_volatility;
    let cohort = runs
        .iter()
        .filter(|run| {
            let early = run.years.len().div_ceil(3).max(1).min(run.years.len());
            if early == 0 {
                return false;
            }
            let returns = run.years[..early]
                .iter()
                .map(|y| y.market_return)
                .collect::<Vec<_>>();
            mean(&returns) < threshold - COHORT_TOLERANCE
        })
        .collect::<Vec<_>>();

    let early_sequence_risk = if runs.is_empty() {
        0.0
    } else {
        cohort.len() as f64 / runs.len() as f64
    };
    let early_sequence_success_rate = if cohort.is_empty() {
        0.0
    } else {
        cohort.iter().filter(|run| run.success).count() as f64 / cohort.len() as f64
    };

    let all_returns = runs
        .iter()
        .flat_map(|run| run.years.iter().map(|y| y.market_return))
        .collect::<Vec<_>>();
    let arithmetic_mean_return = mean(&all_returns);
    let geometric = geometric_mean_return(&all_returns);

    StressTest {
        early_sequence_risk,
        early_sequence_success_rate,
        arithmetic_mean_return,
        geometric_mean_return: geometric,
        volatility_drag: arithmetic_mean_return - geometric,
    }
}

fn confidence_intervals(runs: &[SimulationRun]) -> Vec<ConfidenceInterval> {
    CONFIDENCE_MARKS
        .iter()
        .filter_map(|&mark| {
            let mut values = runs
                .iter()
                .filter_map(|run| run.years.get(mark as usize - 1).map(|y| y.balance))
                .collect::<Vec<_>>();
            if values.len() != runs.len() || values.is_empty() {
                return None;
            }
            Some(ConfidenceInterval {
                year_offset: mark,
                band: percentile_band(&mut values),
            })
        })
        .collect()
}

pub fn summarize(
    runs: &[SimulationRun],
    plan: &TrialPlan,
    base_seed: u64,
) -> MonteCarloSummary {
    let trials = runs.len() as u32;
    let successes = runs.iter().filter(|run| run.success).count();
    let success_rate = if runs.is_empty() {
        0.0
    } else {
        successes as f64 / runs.len() as f64
    };

    let mut finals = runs.iter().map(|run| run.final_value).collect::<Vec<_>>();
    let final_value = percentile_band(&mut finals);

    let mut ruin_years = runs
        .iter()
        .filter_map(|run| run.ruin_year.map(|y| y as f64))
        .collect::<Vec<_>>();
    let median_ruin_year = if ruin_years.is_empty() {
        None
    } else {
        Some(percentile(&mut ruin_years, 50.0))
    };

    let initial_withdrawal_rate = reference_withdrawal_rate(plan);

    MonteCarloSummary {
        trials,
        seed: base_seed,
        success_rate,
        probability_of_ruin: 1.0 - success_rate,
        final_value,
        initial_withdrawal_rate,
        safe_withdrawal_rate: initial_withdrawal_rate * (success_rate / SAFE_TARGET).min(1.0),
        conservative_withdrawal_rate: initial_withdrawal_rate
            * (success_rate / CONSERVATIVE_TARGET).min(1.0),
        median_ruin_year,
        stress_test: stress_test(runs, &plan.model),
        confidence_intervals: confidence_intervals(runs),
    }
}

/// Full Monte Carlo pass for a validated request.
pub fn simulate(request: &RunRequest, cancel: &CancelToken) -> Result<MonteCarloSummary, RunError> {
    let options = &request.options.monte_carlo;
    let plan =
        TrialPlan::from_request(request).map_err(|err| RunError::computation(err, request))?;
    let base_seed = options.seed.unwrap_or_else(|| request_seed(request));
    let trials = options.trials.min(options.max_trials).max(1);

    info!(trials, seed = base_seed, years = plan.years(), "monte carlo started");
    let runs = simulate_trials(&plan, base_seed, trials, cancel)?;
    let summary = summarize(&runs, &plan, base_seed);
    info!(
        success_rate = summary.success_rate,
        "monte carlo finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::project_timeline;
    use crate::core::metrics::analyze;
    use crate::core::test_support::single_request;
    use crate::core::types::{AssetAllocation, AssetClass};
    use proptest::prelude::{prop_assert, proptest};
    use std::sync::atomic::AtomicUsize;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn flat_market() -> MarketAssumptions {
        let flat = |mean| AssetClass {
            mean,
            volatility: 0.0,
        };
        MarketAssumptions {
            stocks: flat(0.06),
            bonds: flat(0.06),
            cash: flat(0.06),
            inflation_volatility: 0.0,
            correlation: 0.0,
            ..MarketAssumptions::default()
        }
    }

    fn mc_request(trials: u32) -> RunRequest {
        let mut request = single_request();
        request.options.monte_carlo.enabled = true;
        request.options.monte_carlo.trials = trials;
        request.options.monte_carlo.seed = Some(42);
        request
    }

    #[test]
    fn blended_model_weights_asset_classes() {
        let model = MarketModel::blended(&MarketAssumptions::default());
        assert_approx(model.return_mean, 0.7 * 0.085 + 0.25 * 0.045 + 0.05 * 0.03);
        assert_approx(model.return_volatility, 0.7 * 0.16 + 0.25 * 0.06 + 0.05 * 0.01);
    }

    #[test]
    fn zero_volatility_sample_returns_means() {
        let model = MarketModel::blended(&flat_market());
        let mut sampler = NormalSampler::new(ChaCha8Rng::seed_from_u64(123));
        let s = sample_market(&model, &mut sampler);
        assert_approx(s.market_return, 0.06);
        assert_approx(s.inflation, 0.025);
    }

    #[test]
    fn samples_are_clamped() {
        let model = MarketModel {
            return_mean: -2.0,
            return_volatility: 0.0,
            inflation_mean: 0.5,
            inflation_volatility: 0.0,
            correlation: 0.0,
        };
        let mut sampler = NormalSampler::new(ChaCha8Rng::seed_from_u64(1));
        let s = sample_market(&model, &mut sampler);
        assert_approx(s.market_return, RETURN_FLOOR);
        assert_approx(s.inflation, INFLATION_CEILING);
    }

    #[test]
    fn perfect_correlation_moves_inflation_with_returns() {
        let model = MarketModel {
            return_mean: 0.05,
            return_volatility: 0.02,
            inflation_mean: 0.03,
            inflation_volatility: 0.01,
            correlation: 1.0,
        };
        let mut sampler = NormalSampler::new(ChaCha8Rng::seed_from_u64(9));
        for _ in 0..50 {
            let s = sample_market(&model, &mut sampler);
            let z_return = (s.market_return - model.return_mean) / model.return_volatility;
            let z_inflation = (s.inflation - model.inflation_mean) / model.inflation_volatility;
            if s.inflation > INFLATION_FLOOR && s.inflation < INFLATION_CEILING {
                assert!((z_return - z_inflation).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn trial_seeds_differ_per_trial() {
        assert_ne!(trial_seed(42, 0), trial_seed(42, 1));
        assert_ne!(trial_seed(42, 0), trial_seed(43, 0));
    }

    #[test]
    fn request_seed_is_stable_and_input_sensitive() {
        let a = single_request();
        let mut b = single_request();
        assert_eq!(request_seed(&a), request_seed(&b));
        b.household.people[0].salary += 1.0;
        assert_ne!(request_seed(&a), request_seed(&b));
    }

    #[test]
    fn fixed_seed_reproduces_summary() {
        let request = mc_request(200);
        let first = simulate(&request, &CancelToken::new()).expect("simulate");
        let second = simulate(&request, &CancelToken::new()).expect("simulate");
        assert_eq!(first, second);
        assert_eq!(first.seed, 42);
        assert_eq!(first.trials, 200);
    }

    #[test]
    fn zero_volatility_trials_all_match_the_flat_path() {
        let mut request = mc_request(50);
        request.options.monte_carlo.market = flat_market();
        let plan = TrialPlan::from_request(&request).expect("plan");
        let runs = simulate_trials(&plan, 7, 50, &CancelToken::new()).expect("runs");
        let reference = run_trial(&plan, 0, 0);

        for run in &runs {
            assert_eq!(run.success, reference.success);
            assert_approx(run.final_value, reference.final_value);
        }
        let summary = summarize(&runs, &plan, 7);
        assert!(summary.success_rate == 0.0 || summary.success_rate == 1.0);
        assert_approx(summary.final_value.p5, summary.final_value.p95);
        assert_approx(summary.stress_test.early_sequence_risk, 0.0);
        assert!(summary.stress_test.volatility_drag.abs() < 1e-9);
    }

    /// Flat market earning exactly the projection's return and inflation.
    fn matched_flat_market(request: &mut RunRequest) {
        let flat = AssetClass {
            mean: request.assumptions.return_rate,
            volatility: 0.0,
        };
        request.options.monte_carlo.market = MarketAssumptions {
            allocation: AssetAllocation {
                stocks: 100.0,
                bonds: 0.0,
                cash: 0.0,
            },
            stocks: flat,
            bonds: flat,
            cash: flat,
            inflation_mean: request.assumptions.inflation_rate,
            inflation_volatility: 0.0,
            correlation: 0.0,
        };
    }

    /// Asserts every flat trial lands on the projection's verdict and
    /// returns that verdict.
    fn assert_flat_trials_match_projection(request: &RunRequest) -> bool {
        let timeline = project_timeline(request).expect("projection");
        let feasible = analyze(&timeline.rows, request).is_feasible;
        let summary = simulate(request, &CancelToken::new()).expect("simulate");
        assert_approx(summary.success_rate, if feasible { 1.0 } else { 0.0 });
        feasible
    }

    #[test]
    fn flat_markets_reproduce_projection_for_salaried_household() {
        let mut request = mc_request(20);
        matched_flat_market(&mut request);
        assert_flat_trials_match_projection(&request);

        request.household.expenses.current = 400_000.0;
        assert!(!assert_flat_trials_match_projection(&request));
    }

    #[test]
    fn flat_markets_reproduce_projection_for_pension_dependent_retiree() {
        let cases = [(30_000.0, true), (35_000.0, true), (90_000.0, false)];
        for (spending, expect_feasible) in cases {
            let mut request = mc_request(20);
            let person = &mut request.household.people[0];
            person.birth_year = 1955;
            person.retirement_balance = 150_000.0;
            person.salary = 0.0;
            person.fire_age = None;
            request.household.assets.non_retirement_investments = 0.0;
            request.household.expenses.current = spending;
            matched_flat_market(&mut request);

            let feasible = assert_flat_trials_match_projection(&request);
            assert_eq!(feasible, expect_feasible, "spending {spending}");
        }
    }

    #[test]
    fn trial_plan_schedule_carries_pension_income() {
        let mut request = mc_request(1);
        request.household.people[0].birth_year = 1955;
        request.household.people[0].salary = 0.0;
        request.household.people[0].fire_age = None;
        request.household.assets.non_retirement_investments = 0.0;
        let plan = TrialPlan::from_request(&request).expect("plan");
        let timeline = project_timeline(&request).expect("projection");

        let first = plan.schedule[0];
        let row = &timeline.rows[0];
        assert!(row.pension_income > 0.0);
        assert_approx(first.income, row.pension_income - row.total_tax);
        assert_approx(first.spending, row.expenses);
        assert!(first.drawdown_rate > 0.0);
        assert_eq!(plan.years() as usize, timeline.rows.len());
    }

    #[test]
    fn overwhelming_spending_ruins_every_trial() {
        let mut request = mc_request(100);
        request.household.expenses.single = 5_000_000.0;
        request.household.expenses.current = 5_000_000.0;
        let summary = simulate(&request, &CancelToken::new()).expect("simulate");
        assert_approx(summary.success_rate, 0.0);
        assert_approx(summary.probability_of_ruin, 1.0);
        assert!(summary.median_ruin_year.is_some());
        assert_approx(summary.safe_withdrawal_rate, 0.0);
    }

    #[test]
    fn cancelled_token_stops_the_run() {
        let request = mc_request(500);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = simulate(&request, &cancel).expect_err("cancelled");
        assert!(matches!(err, RunError::Cancelled));
    }

    #[test]
    fn cancelling_between_trials_discards_finished_runs() {
        let plan = TrialPlan::from_request(&mc_request(1)).expect("plan");
        let cancel = CancelToken::new();
        let started = AtomicUsize::new(0);
        let result = collect_trials(10_000, &cancel, |trial| {
            started.fetch_add(1, Ordering::Relaxed);
            if trial == 3 {
                cancel.cancel();
            }
            run_trial(&plan, trial, trial_seed(1, trial))
        });

        assert!(matches!(result, Err(RunError::Cancelled)));
        assert!(started.load(Ordering::Relaxed) < 10_000);
    }

    #[test]
    fn confidence_intervals_cover_reachable_marks() {
        let request = mc_request(100);
        let summary = simulate(&request, &CancelToken::new()).expect("simulate");
        // 51 projected years to age 90: every mark is reachable
        let marks = summary
            .confidence_intervals
            .iter()
            .map(|c| c.year_offset)
            .collect::<Vec<_>>();
        assert_eq!(marks, vec![10, 20, 30]);
        for ci in &summary.confidence_intervals {
            assert!(ci.band.p5 <= ci.band.p50 && ci.band.p50 <= ci.band.p95);
        }
    }

    #[test]
    fn guardrails_stay_between_floor_and_ceiling() {
        let mut plan = TrialPlan::from_request(&mc_request(1)).expect("plan");
        plan.strategy = MonteCarloStrategy::Guardrails;
        plan.withdrawal_rate = Some(0.04);
        let mut state = SpendingState::default();
        // base 40k on 1m
        assert_approx(state.spending(&plan, 60_000.0, 1_000_000.0, 1.0, None), 40_000.0);
        assert_approx(state.spending(&plan, 60_000.0, 3_000_000.0, 1.0, Some(0.3)), 48_000.0);
        assert_approx(state.spending(&plan, 60_000.0, 200_000.0, 1.0, Some(-0.3)), 36_000.0);
    }

    #[test]
    fn dynamic_raises_after_good_years_and_cuts_after_losses() {
        let mut plan = TrialPlan::from_request(&mc_request(1)).expect("plan");
        plan.strategy = MonteCarloStrategy::Dynamic;
        plan.withdrawal_rate = Some(0.04);
        let mut state = SpendingState::default();
        assert_approx(state.spending(&plan, 60_000.0, 1_000_000.0, 1.0, None), 40_000.0);
        assert_approx(state.spending(&plan, 60_000.0, 1_000_000.0, 1.0, Some(0.5)), 44_000.0);
        assert_approx(state.spending(&plan, 60_000.0, 1_000_000.0, 1.0, Some(-0.1)), 39_600.0);
        let flat = plan.model.return_mean / 2.0;
        assert_approx(state.spending(&plan, 60_000.0, 1_000_000.0, 1.1, Some(flat)), 43_560.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_summary_rates_are_probabilities_and_bands_ordered(
            seed in 0u64..u64::MAX,
            spending in 10_000.0f64..200_000.0
        ) {
            let mut request = mc_request(64);
            request.options.monte_carlo.seed = Some(seed);
            request.household.expenses.single = spending;
            let summary = simulate(&request, &CancelToken::new()).expect("simulate");
            prop_assert!((0.0..=1.0).contains(&summary.success_rate));
            prop_assert!((summary.success_rate + summary.probability_of_ruin - 1.0).abs() < 1e-12);
            let band = summary.final_value;
            prop_assert!(band.p5 <= band.p25 && band.p25 <= band.p50);
            prop_assert!(band.p50 <= band.p75 && band.p75 <= band.p95);
            prop_assert!(summary.safe_withdrawal_rate <= summary.initial_withdrawal_rate + 1e-12);
            prop_assert!(summary.conservative_withdrawal_rate <= summary.safe_withdrawal_rate + 1e-12);
        }
    }
}
