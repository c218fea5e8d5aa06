use std::collections::HashSet;

use super::error::ValidationReport;
use super::types::{
    Assumptions, BridgeConfig, ExpenseMode, Household, MonteCarloOptions, RunRequest,
};

const MAX_RETURN_RATE: f64 = 0.20;
const MAX_AGE: u32 = 120;
const ALLOCATION_TOLERANCE: f64 = 0.01;
const LOW_BALANCE_MULTIPLE: f64 = 5.0;
const NOISY_TRIAL_COUNT: u32 = 500;

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn check_household(household: &Household, start_year: i32, report: &mut ValidationReport) {
    let expected = household.structure.expected_people();
    if household.people.len() != expected {
        report.error(format!(
            "household structure {:?} needs {expected} person(s), got {}",
            household.structure,
            household.people.len()
        ));
    }

    let mut ids = HashSet::new();
    for person in &household.people {
        let label = if person.id.is_empty() {
            "<unnamed>"
        } else {
            person.id.as_str()
        };
        if person.id.trim().is_empty() {
            report.error("every person needs a non-empty id");
        } else if !ids.insert(person.id.as_str()) {
            report.error(format!("duplicate person id {label}"));
        }

        if person.birth_year > start_year || person.birth_year < start_year - MAX_AGE as i32 {
            report.error(format!("{label}: birth year {} is out of range", person.birth_year));
        }
        let age = person.age_in(start_year);

        if !non_negative(person.retirement_balance) {
            report.error(format!("{label}: retirement balance must be zero or more"));
        }
        if !non_negative(person.salary) {
            report.error(format!("{label}: salary must be zero or more"));
        }
        if let Some(rate) = person.voluntary_rate {
            if !in_unit_range(rate) {
                report.error(format!("{label}: voluntary contribution rate must be in [0, 1]"));
            }
        }
        if let Some(fire_age) = person.fire_age {
            if fire_age <= age {
                report.error(format!(
                    "{label}: FIRE age {fire_age} must be in the future (current age {age})"
                ));
            }
        }
        if person.life_expectancy <= age || person.life_expectancy > MAX_AGE {
            report.error(format!(
                "{label}: life expectancy {} must be above current age {age} and at most {MAX_AGE}",
                person.life_expectancy
            ));
        }
    }

    let expenses = &household.expenses;
    for (name, value) in [
        ("single", expenses.single),
        ("couple", expenses.couple),
        ("current", expenses.current),
    ] {
        if !(value.is_finite() && value > 0.0) {
            report.error(format!("{name} expenses must be positive"));
        }
    }
    if let ExpenseMode::SingleThenCouple { couple_from_year } = household.expense_mode {
        if couple_from_year < start_year {
            report.warn(format!(
                "couple expenses start in {couple_from_year}, before the projection starts"
            ));
        }
    }

    let assets = &household.assets;
    for (name, value) in [
        ("non-retirement investments", assets.non_retirement_investments),
        ("home value", assets.home_value),
        ("other assets", assets.other_assets),
        ("debt", assets.debt),
    ] {
        if !non_negative(value) {
            report.error(format!("{name} must be zero or more"));
        }
    }
}

fn check_assumptions(assumptions: &Assumptions, report: &mut ValidationReport) {
    if !(assumptions.return_rate.is_finite()
        && (0.0..=MAX_RETURN_RATE).contains(&assumptions.return_rate))
    {
        report.error(format!(
            "return rate {} must be between 0% and 20%",
            assumptions.return_rate
        ));
    }
    let inflation = assumptions.inflation_rate;
    if !(inflation.is_finite() && (-0.05..=0.20).contains(&inflation)) {
        report.error("inflation rate must be between -5% and 20%");
    }

    let tax = &assumptions.tax;
    if tax.brackets.is_empty() {
        report.error("tax brackets must not be empty");
    }
    if tax
        .brackets
        .windows(2)
        .any(|pair| pair[1].threshold <= pair[0].threshold)
    {
        report.error("tax bracket thresholds must be strictly ascending");
    }
    if tax.brackets.iter().any(|b| !in_unit_range(b.rate)) {
        report.error("tax bracket rates must be in [0, 1]");
    }
    if tax.levy.lower_threshold > tax.levy.upper_threshold || !in_unit_range(tax.levy.rate) {
        report.error("levy thresholds must be ordered and its rate in [0, 1]");
    }
    if tax.offset.taper_start > tax.offset.taper_end || !non_negative(tax.offset.max_offset) {
        report.error("offset taper must be ordered and the offset non-negative");
    }

    let account = &assumptions.retirement_account;
    if !in_unit_range(account.guarantee_rate) {
        report.error("guarantee contribution rate must be in [0, 1]");
    }
    if !non_negative(account.concessional_cap) {
        report.error("concessional cap must be zero or more");
    }
    if account.minimum_drawdown.is_empty() {
        report.error("minimum drawdown table must not be empty");
    }
    if account
        .minimum_drawdown
        .windows(2)
        .any(|pair| pair[1].min_age <= pair[0].min_age)
    {
        report.error("minimum drawdown bands must be in ascending age order");
    }
    if account.minimum_drawdown.iter().any(|b| !in_unit_range(b.rate)) {
        report.error("minimum drawdown rates must be in [0, 1]");
    }

    let means = &assumptions.means_test;
    for (name, rate) in [
        ("asset taper", means.asset_taper),
        ("income taper", means.income_taper),
        ("lower deeming rate", means.deeming_lower_rate),
        ("upper deeming rate", means.deeming_upper_rate),
    ] {
        if !in_unit_range(rate) {
            report.error(format!("{name} must be in [0, 1]"));
        }
    }
}

fn check_bridge(bridge: &BridgeConfig, household: &Household, report: &mut ValidationReport) {
    if let Some(declining) = &bridge.declining_salary {
        if !household.people.iter().any(|p| p.id == declining.person_id) {
            report.error(format!(
                "declining salary refers to unknown person {}",
                declining.person_id
            ));
        }
        if !non_negative(declining.annual_amount) || !in_unit_range(declining.decline_rate) {
            report.error("declining salary needs a non-negative amount and a rate in [0, 1]");
        }
    }
    if let Some(part_time) = &bridge.part_time {
        if !non_negative(part_time.annual_amount) || !in_unit_range(part_time.decline_rate) {
            report.error("part-time income needs a non-negative amount and a rate in [0, 1]");
        }
        if part_time.duration_years == 0 {
            report.warn("part-time income has a zero-year duration and never pays");
        }
    }
    for (idx, property) in bridge.rental_properties.iter().enumerate() {
        if !non_negative(property.weekly_rent) || !non_negative(property.annual_expenses) {
            report.error(format!("rental property {idx}: rent and expenses must be zero or more"));
        }
        if !in_unit_range(property.vacancy_rate) {
            report.error(format!("rental property {idx}: vacancy rate must be in [0, 1]"));
        }
    }
    for event in &bridge.lump_sums {
        if !in_unit_range(event.probability) {
            report.error(format!(
                "lump sum in {}: probability must be in [0, 1]",
                event.year
            ));
        }
        if !non_negative(event.amount) {
            report.error(format!("lump sum in {}: amount must be zero or more", event.year));
        }
    }
}

fn check_monte_carlo(options: &MonteCarloOptions, report: &mut ValidationReport) {
    if !options.enabled {
        return;
    }

    if options.trials == 0 || options.trials > options.max_trials {
        report.error(format!(
            "trial count {} must be between 1 and {}",
            options.trials, options.max_trials
        ));
    } else if options.trials < NOISY_TRIAL_COUNT {
        report.warn(format!(
            "{} trials will give noisy percentiles; 500 or more is recommended",
            options.trials
        ));
    }

    let market = &options.market;
    let allocation = market.allocation;
    if [allocation.stocks, allocation.bonds, allocation.cash]
        .iter()
        .any(|pct| !non_negative(*pct))
    {
        report.error("asset allocation percentages must be zero or more");
    }
    if (allocation.total() - 100.0).abs() > ALLOCATION_TOLERANCE {
        report.error(format!(
            "asset allocation must sum to 100%, got {}%",
            allocation.total()
        ));
    }
    if [
        market.stocks.volatility,
        market.bonds.volatility,
        market.cash.volatility,
        market.inflation_volatility,
    ]
    .iter()
    .any(|v| !non_negative(*v))
    {
        report.error("volatilities must be zero or more");
    }
    if !(market.correlation.is_finite() && (-1.0..=1.0).contains(&market.correlation)) {
        report.error("return/inflation correlation must be in [-1, 1]");
    }
    if !(options.guardrail_floor > 0.0 && options.guardrail_floor <= options.guardrail_ceiling) {
        report.error("guardrail floor must be positive and no higher than the ceiling");
    }
    if let Some(rate) = options.withdrawal_rate {
        if !(rate > 0.0 && rate <= 1.0) {
            report.error("withdrawal rate must be in (0, 1]");
        }
    }
}

/// Checks a request before any projection runs. Every violation is
/// collected; nothing short-circuits.
pub fn validate(request: &RunRequest) -> ValidationReport {
    let mut report = ValidationReport::default();
    let household = &request.household;
    let start_year = request.horizon.start_year;

    check_household(household, start_year, &mut report);
    check_assumptions(&request.assumptions, &mut report);
    check_bridge(&request.strategy.bridge, household, &mut report);
    check_monte_carlo(&request.options.monte_carlo, &mut report);

    let youngest = household.youngest_age_in(start_year);
    if request.horizon.end_age <= youngest || request.horizon.end_age > MAX_AGE {
        report.error(format!(
            "end age {} must be above the youngest current age {youngest} and at most {MAX_AGE}",
            request.horizon.end_age
        ));
    }
    let access_age = request.assumptions.retirement_account.access_age;
    if request.strategy.spenddown.longevity_planning_age <= access_age {
        report.error("longevity planning age must be above the access age");
    }

    let retirement_total = household
        .people
        .iter()
        .map(|p| p.retirement_balance.max(0.0))
        .sum::<f64>();
    if household.expenses.current > 0.0
        && retirement_total < LOW_BALANCE_MULTIPLE * household.expenses.current
    {
        report.warn("retirement balance is under 5x annual expenses");
    }

    let early_exit = household
        .people
        .iter()
        .any(|p| p.fire_age.is_some_and(|age| age < access_age));
    let bridge = &request.strategy.bridge;
    let no_bridge = bridge.declining_salary.is_none()
        && bridge.part_time.is_none()
        && bridge.rental_properties.is_empty()
        && bridge.lump_sums.is_empty();
    if early_exit && no_bridge && household.assets.non_retirement_investments <= 0.0 {
        report.warn("stopping work before access age with no bridge income or investments");
    }

    report
}
