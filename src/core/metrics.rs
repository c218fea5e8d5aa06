use super::engine::DEPLETED_BALANCE;
use super::stats::{mean, population_std_dev};
use super::types::{Metrics, PersonLongevity, RunRequest, YearRow};

const SURPLUS_WEIGHT: f64 = 75.0;
const NET_WORTH_BONUS: f64 = 15.0;
const PENSION_BONUS: f64 = 10.0;
const VOLATILITY_PENALTY_CAP: f64 = 15.0;
/// Terminal net worth counts as strong at this many years of final expenses.
const STRONG_NET_WORTH_MULTIPLE: f64 = 10.0;

/// Sum of deficits in years where nobody alive can touch a retirement account.
pub fn bridge_shortfall(rows: &[YearRow]) -> f64 {
    rows.iter()
        .filter(|row| {
            !row.people
                .iter()
                .any(|p| p.is_alive && p.has_access)
        })
        .filter(|row| row.surplus < 0.0)
        .map(|row| -row.surplus)
        .sum()
}

pub fn longevity(rows: &[YearRow], request: &RunRequest) -> Vec<PersonLongevity> {
    request
        .household
        .people
        .iter()
        .enumerate()
        .map(|(idx, person)| {
            let lived = rows
                .iter()
                .filter_map(|row| row.people.get(idx))
                .filter(|p| p.is_alive)
                .collect::<Vec<_>>();

            let balance_lasts_to_age = lived
                .iter()
                .filter(|p| p.retirement_balance >= DEPLETED_BALANCE)
                .map(|p| p.age)
                .max()
                .unwrap_or_else(|| person.age_in(request.horizon.start_year));
            let outlives_balance = lived
                .iter()
                .any(|p| p.has_access && p.retirement_balance < DEPLETED_BALANCE);

            PersonLongevity {
                person_id: person.id.clone(),
                balance_lasts_to_age,
                outlives_balance,
            }
        })
        .collect()
}

/// First year nobody works and both investment pools are gone.
pub fn exhaustion_year(rows: &[YearRow]) -> Option<i32> {
    rows.iter()
        .find(|row| {
            !row.people.iter().any(|p| p.is_working)
                && row.retirement_balance_total + row.non_retirement_balance < DEPLETED_BALANCE
        })
        .map(|row| row.year)
}

/// 0..=100 blend of surplus coverage, terminal wealth, pension support and
/// surplus stability.
pub fn feasibility_score(rows: &[YearRow]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }

    let covered = rows.iter().filter(|row| row.surplus >= 0.0).count() as f64;
    let mut score = SURPLUS_WEIGHT * covered / rows.len() as f64;

    if let Some(last) = rows.last() {
        if last.net_worth >= STRONG_NET_WORTH_MULTIPLE * last.expenses {
            score += NET_WORTH_BONUS;
        }
    }
    if rows.iter().any(|row| row.pension_eligible) {
        score += PENSION_BONUS;
    }
    score -= volatility_penalty(rows);

    score.clamp(0.0, 100.0)
}

fn volatility_penalty(rows: &[YearRow]) -> f64 {
    let surpluses = rows.iter().map(|row| row.surplus).collect::<Vec<_>>();
    let expenses = rows.iter().map(|row| row.expenses).collect::<Vec<_>>();
    let typical_expense = mean(&expenses);
    if typical_expense <= 0.0 {
        return 0.0;
    }
    (VOLATILITY_PENALTY_CAP * population_std_dev(&surpluses) / typical_expense)
        .min(VOLATILITY_PENALTY_CAP)
}

fn dollars(amount: f64) -> String {
    format!("${:.0}", amount.round())
}

/// Summarises a finished timeline.
pub fn analyze(rows: &[YearRow], request: &RunRequest) -> Metrics {
    let bridge_shortfall = bridge_shortfall(rows);
    let people = longevity(rows, request);
    let exhaustion_year = exhaustion_year(rows);
    let cumulative_pension = rows.iter().map(|row| row.pension_income).sum::<f64>();
    let surpluses = rows.iter().map(|row| row.surplus).collect::<Vec<_>>();
    let surplus_volatility = population_std_dev(&surpluses);
    let terminal_net_worth = rows.last().map(|row| row.net_worth).unwrap_or(0.0);
    let feasibility_score = feasibility_score(rows);
    let infeasible_years = rows.iter().filter(|row| !row.is_feasible).count();
    let is_feasible = !rows.is_empty() && infeasible_years == 0;

    let mut risks = Vec::new();
    if bridge_shortfall > 0.0 {
        risks.push(format!(
            "Bridge years before retirement accounts unlock run a cumulative shortfall of {}",
            dollars(bridge_shortfall)
        ));
    }
    if let Some(year) = exhaustion_year {
        risks.push(format!("All investments are exhausted in {year}"));
    }
    for p in people.iter().filter(|p| p.outlives_balance) {
        risks.push(format!(
            "{} outlives their retirement balance after age {}",
            p.person_id, p.balance_lasts_to_age
        ));
    }
    if infeasible_years > 0 {
        risks.push(format!(
            "{infeasible_years} year(s) cannot be funded from income or savings"
        ));
    }
    if volatility_penalty(rows) > VOLATILITY_PENALTY_CAP / 2.0 {
        risks.push("Cash flow swings sharply from year to year".to_string());
    }

    let mut optimizations = Vec::new();
    let strategy = &request.strategy;
    let under_cap = request
        .household
        .people
        .iter()
        .any(|p| p.salary > 0.0 && p.voluntary_rate.unwrap_or(0.0) <= 0.0);
    if under_cap && !strategy.tax.max_concessional {
        optimizations
            .push("Salary-sacrifice up to the concessional cap to speed up accumulation".to_string());
    }
    if bridge_shortfall > 0.0
        && strategy.bridge.part_time.is_none()
        && strategy.bridge.rental_properties.is_empty()
    {
        optimizations.push(
            "Part-time or rental income would reduce the bridge-period drawdown".to_string(),
        );
    }
    if let Some(last) = rows.last() {
        if last.retirement_balance_total > STRONG_NET_WORTH_MULTIPLE * last.expenses {
            optimizations.push(format!(
                "Retirement balances end at {}; there is room to spend more or stop work earlier",
                dollars(last.retirement_balance_total)
            ));
        }
    }
    if cumulative_pension <= 0.0 && is_feasible && !strategy.spenddown.minimum_only {
        optimizations.push(
            "Drawing balances down faster before pension age could unlock means-tested support"
                .to_string(),
        );
    }

    Metrics {
        bridge_shortfall,
        people,
        exhaustion_year,
        cumulative_pension,
        surplus_volatility,
        terminal_net_worth,
        feasibility_score,
        is_feasible,
        risks,
        optimizations,
    }
}
