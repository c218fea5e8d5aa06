use tracing::{debug, info};

use super::accumulation::accumulate;
use super::bridge::{BridgeContext, bridge_income};
use super::error::{CalcError, ensure_finite};
use super::pension::age_pension;
use super::spenddown::{WithdrawalContext, spend_down};
use super::tax::{person_tax, taxable_income};
use super::types::{
    ExpenseMode, Household, PersonYear, RetirementAccountRules, RetirementSequencing, RunRequest,
    YearRow,
};

/// Balances below this are treated as exhausted.
pub const DEPLETED_BALANCE: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Timeline {
    pub rows: Vec<YearRow>,
    pub terminated_early: bool,
}

/// Facts about a run that are fixed before the first year is projected.
#[derive(Debug, Clone)]
pub struct ProjectionPlan<'a> {
    request: &'a RunRequest,
    stop_years: Vec<i32>,
    bridge_start_year: i32,
    end_year: i32,
}

impl<'a> ProjectionPlan<'a> {
    pub fn new(request: &'a RunRequest) -> Self {
        let household = &request.household;
        let start_year = request.horizon.start_year;
        let stop_years = stop_work_years(
            household,
            request.strategy.sequencing,
            &request.assumptions.retirement_account,
        );

        let bridge_start_year = household
            .people
            .iter()
            .zip(&stop_years)
            .filter(|(person, _)| person.salary > 0.0)
            .map(|(_, year)| *year)
            .min()
            .unwrap_or(start_year)
            .max(start_year);

        let youngest = household.youngest_age_in(start_year);
        let end_year = start_year + request.horizon.end_age.saturating_sub(youngest) as i32;

        Self {
            request,
            stop_years,
            bridge_start_year,
            end_year,
        }
    }

    pub fn start_year(&self) -> i32 {
        self.request.horizon.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    /// Calendar year each person stops paid work.
    pub fn stop_years(&self) -> &[i32] {
        &self.stop_years
    }

    pub fn bridge_start_year(&self) -> i32 {
        self.bridge_start_year
    }
}

/// Calendar year each person stops work under the household sequencing.
///
/// People without a FIRE age work until the contribution age ceiling.
pub fn stop_work_years(
    household: &Household,
    sequencing: RetirementSequencing,
    rules: &RetirementAccountRules,
) -> Vec<i32> {
    let ceiling_year = |birth_year: i32| birth_year + rules.contribution_age_limit as i32;
    let own = household
        .people
        .iter()
        .map(|p| {
            p.birth_year
                + p.fire_age
                    .unwrap_or(rules.contribution_age_limit) as i32
        })
        .collect::<Vec<_>>();

    match sequencing {
        RetirementSequencing::Staggered => own,
        RetirementSequencing::Simultaneous => {
            let first = household
                .people
                .iter()
                .zip(&own)
                .filter(|(p, _)| p.fire_age.is_some())
                .map(|(_, year)| *year)
                .min();
            match first {
                Some(year) => vec![year; own.len()],
                None => own,
            }
        }
        RetirementSequencing::Single => household
            .people
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                if idx == 0 {
                    own[0]
                } else {
                    ceiling_year(p.birth_year)
                }
            })
            .collect(),
    }
}

/// Household spending for the year in start-year dollars.
pub fn base_expenses(
    household: &Household,
    mode: ExpenseMode,
    year: i32,
    anyone_working: bool,
    living: usize,
) -> f64 {
    let schedule = &household.expenses;
    match mode {
        ExpenseMode::Constant => schedule.current,
        ExpenseMode::SingleThenCouple { couple_from_year } => {
            if year < couple_from_year {
                schedule.single
            } else {
                schedule.couple
            }
        }
        ExpenseMode::Dynamic => {
            if anyone_working {
                schedule.current
            } else if living >= 2 {
                schedule.couple
            } else {
                schedule.single
            }
        }
    }
}

/// Moves the balance of anyone past life expectancy to the first survivor.
fn roll_over_deceased(balances: &mut [f64], alive: &[bool]) {
    let Some(survivor) = alive.iter().position(|a| *a) else {
        return;
    };
    for idx in 0..balances.len() {
        if !alive[idx] && balances[idx] > 0.0 {
            balances[survivor] += balances[idx];
            balances[idx] = 0.0;
        }
    }
}

/// Projects `year` from the previous snapshot (or the request's opening
/// position when `prev` is `None`).
///
/// Calculators run in a fixed order: bridge income, accumulation,
/// spenddown, pension, tax. Policy thresholds are in start-year dollars, so
/// the pension and tax calculators see deflated figures and their results
/// are re-inflated.
pub fn project_year(
    plan: &ProjectionPlan<'_>,
    prev: Option<&YearRow>,
    year: i32,
) -> Result<YearRow, CalcError> {
    let request = plan.request;
    let household = &request.household;
    let assumptions = &request.assumptions;
    let strategy = &request.strategy;
    let rules = &assumptions.retirement_account;

    let elapsed = (year - plan.start_year()).max(0);
    let price_index = (1.0 + assumptions.inflation_rate).powi(elapsed);

    let mut balances = match prev {
        Some(row) => row
            .people
            .iter()
            .map(|p| p.retirement_balance)
            .collect::<Vec<_>>(),
        None => household
            .people
            .iter()
            .map(|p| p.retirement_balance.max(0.0))
            .collect(),
    };
    let non_retirement_open = prev
        .map(|row| row.non_retirement_balance)
        .unwrap_or(household.assets.non_retirement_investments.max(0.0));

    let ages = household
        .people
        .iter()
        .map(|p| p.age_in(year))
        .collect::<Vec<_>>();
    let alive = household
        .people
        .iter()
        .zip(&ages)
        .map(|(p, age)| *age <= p.life_expectancy)
        .collect::<Vec<_>>();
    roll_over_deceased(&mut balances, &alive);

    let working = household
        .people
        .iter()
        .enumerate()
        .map(|(idx, p)| alive[idx] && p.salary > 0.0 && year < plan.stop_years[idx])
        .collect::<Vec<_>>();
    let access = ages
        .iter()
        .map(|age| *age >= rules.access_age)
        .collect::<Vec<_>>();
    let in_gap = (0..ages.len()).any(|idx| alive[idx] && !working[idx] && !access[idx]);

    let bridge = bridge_income(
        &strategy.bridge,
        &BridgeContext {
            household,
            year,
            start_year: plan.start_year(),
            bridge_start_year: Some(plan.bridge_start_year),
            in_gap,
            access_age: rules.access_age,
            working: &working,
        },
    )?;

    let mut people = Vec::with_capacity(household.people.len());
    for (idx, person) in household.people.iter().enumerate() {
        let salary = if working[idx] {
            person.salary * price_index
        } else {
            0.0
        };
        let accumulated = accumulate(
            person,
            salary,
            balances[idx],
            ages[idx],
            working[idx],
            rules,
            &strategy.tax,
            assumptions.return_rate,
            year,
        )?;
        let drawdown = spend_down(
            access[idx] && alive[idx],
            &strategy.spenddown,
            &rules.minimum_drawdown,
            &WithdrawalContext {
                age: ages[idx],
                balance: accumulated.balance,
                original_balance: person.retirement_balance,
                years_elapsed: elapsed as u32,
                return_rate: assumptions.return_rate,
                inflation_rate: assumptions.inflation_rate,
                longevity_planning_age: strategy.spenddown.longevity_planning_age,
            },
            year,
        )?;

        people.push(PersonYear {
            person_id: person.id.clone(),
            age: ages[idx],
            is_alive: alive[idx],
            is_working: working[idx],
            has_access: access[idx],
            salary,
            mandatory_contribution: accumulated.contributions.mandatory,
            voluntary_contribution: accumulated.contributions.voluntary,
            growth: accumulated.growth,
            minimum_drawdown: drawdown.minimum,
            withdrawal: drawdown.withdrawal,
            retirement_balance: drawdown.balance,
            taxable_income: 0.0,
            income_tax: 0.0,
            pension: 0.0,
        });
    }

    let retirement_balance_total = people.iter().map(|p| p.retirement_balance).sum::<f64>();
    let living = alive.iter().filter(|a| **a).count();
    let assessed_as_couple = household.is_couple() && living >= 2;

    let mut pension_eligible = false;
    for (idx, row) in people.iter_mut().enumerate() {
        if !alive[idx] {
            continue;
        }
        let outcome = age_pension(
            row.age,
            assessed_as_couple,
            retirement_balance_total / price_index,
            non_retirement_open / price_index,
            &household.assets,
            &assumptions.means_test,
            year,
        )?;
        row.pension = outcome.benefit * price_index;
        pension_eligible |= outcome.eligible;
    }

    for row in people.iter_mut() {
        let taxed_salary = if strategy.tax.salary_sacrifice {
            row.salary - row.voluntary_contribution
        } else {
            row.salary
        };
        let income = taxable_income(
            taxed_salary,
            row.is_working,
            row.withdrawal,
            row.age,
            rules.access_age,
            strategy.tax.tax_free_after_access,
        );
        let tax = person_tax(income / price_index, &assumptions.tax, year)?;
        row.taxable_income = income;
        row.income_tax = tax.total * price_index;
    }

    let anyone_working = working.iter().any(|w| *w);
    let expenses = base_expenses(
        household,
        household.expense_mode,
        year,
        anyone_working,
        living,
    ) * price_index;

    let salary_income = people
        .iter()
        .map(|p| p.salary - p.voluntary_contribution)
        .sum::<f64>();
    let withdrawals = people.iter().map(|p| p.withdrawal).sum::<f64>();
    let pension_income = people.iter().map(|p| p.pension).sum::<f64>();
    let total_tax = people.iter().map(|p| p.income_tax).sum::<f64>();
    let bridge_income = bridge.total();

    let net_income = ensure_finite(
        salary_income + withdrawals + bridge_income + pension_income - total_tax,
        "net income",
        year,
    )?;
    let surplus = net_income - expenses;
    let funded = non_retirement_open * (1.0 + assumptions.return_rate) + surplus;
    let non_retirement_balance = ensure_finite(funded.max(0.0), "non-retirement balance", year)?;

    let snapshot = &household.assets;
    let net_worth = retirement_balance_total + non_retirement_balance + snapshot.home_value.max(0.0)
        + snapshot.other_assets.max(0.0)
        - snapshot.debt.max(0.0);

    Ok(YearRow {
        year,
        people,
        bridge,
        bridge_income,
        salary_income,
        withdrawals,
        pension_income,
        total_tax,
        net_income,
        expenses,
        surplus,
        retirement_balance_total,
        non_retirement_balance,
        net_worth,
        pension_eligible,
        is_feasible: surplus >= 0.0 || funded >= 0.0,
    })
}

/// Nothing left to draw on and nothing coming in.
fn is_dead_plan(row: &YearRow) -> bool {
    row.retirement_balance_total < DEPLETED_BALANCE
        && row.non_retirement_balance < DEPLETED_BALANCE
        && row.bridge_income <= 0.0
        && row.pension_income <= 0.0
        && !row.people.iter().any(|p| p.is_working)
}

/// Runs the year loop from the start year to the horizon.
///
/// Stops early once everybody is past life expectancy or the plan is dead.
pub fn project_timeline(request: &RunRequest) -> Result<Timeline, CalcError> {
    project(request, true)
}

/// Like [`project_timeline`] but keeps going after the money runs out, so
/// every year somebody is alive has a row.
pub fn project_full_horizon(request: &RunRequest) -> Result<Timeline, CalcError> {
    project(request, false)
}

fn project(request: &RunRequest, stop_when_dead: bool) -> Result<Timeline, CalcError> {
    let plan = ProjectionPlan::new(request);
    let mut rows: Vec<YearRow> =
        Vec::with_capacity((plan.end_year() - plan.start_year() + 1).max(0) as usize);
    let mut terminated_early = false;

    for year in plan.start_year()..=plan.end_year() {
        let everyone_gone = request
            .household
            .people
            .iter()
            .all(|p| p.age_in(year) > p.life_expectancy);
        if everyone_gone {
            info!(year, "all household members past life expectancy");
            terminated_early = true;
            break;
        }

        let row = project_year(&plan, rows.last(), year)?;
        debug!(
            year,
            surplus = row.surplus,
            retirement = row.retirement_balance_total,
            "projected year"
        );
        let dead = is_dead_plan(&row);
        rows.push(row);

        if stop_when_dead && dead && year < plan.end_year() {
            info!(year, "plan exhausted; stopping projection");
            terminated_early = true;
            break;
        }
    }

    Ok(Timeline {
        rows,
        terminated_early,
    })
}
