use super::error::{CalcError, ensure_finite};
use super::types::{
    BridgeBreakdown, BridgeConfig, DecliningSalary, Household, LumpSumEvent, PartTimeIncome,
    RentalProperty,
};

/// Where the household stands in `year` with respect to the bridge gap.
#[derive(Debug, Clone, Copy)]
pub struct BridgeContext<'a> {
    pub household: &'a Household,
    pub year: i32,
    pub start_year: i32,
    /// First calendar year in which anybody has stopped work.
    pub bridge_start_year: Option<i32>,
    /// Somebody has stopped work and has not reached access age.
    pub in_gap: bool,
    pub access_age: u32,
    /// Who still draws a salary this year, aligned with `household.people`.
    pub working: &'a [bool],
}

/// Non-retirement-account income for the gap between stopping work and
/// reaching access age. Zero for years outside the gap.
pub fn bridge_income(
    config: &BridgeConfig,
    ctx: &BridgeContext<'_>,
) -> Result<BridgeBreakdown, CalcError> {
    let declining = match &config.declining_salary {
        Some(cfg) => declining_salary(cfg, ctx)?,
        None => 0.0,
    };

    if !ctx.in_gap {
        return Ok(BridgeBreakdown::default());
    }

    let part_time = config
        .part_time
        .as_ref()
        .map(|cfg| part_time_income(cfg, ctx.year, ctx.bridge_start_year))
        .unwrap_or(0.0);
    let rental = config
        .rental_properties
        .iter()
        .map(|p| rental_income(p, config.rental_growth_rate, ctx.year - ctx.start_year))
        .sum::<f64>();
    let lump_sums = expected_lump_sums(&config.lump_sums, ctx.year);

    let breakdown = BridgeBreakdown {
        declining_salary: declining,
        part_time,
        rental,
        lump_sums,
    };
    ensure_finite(breakdown.total(), "bridge income", ctx.year)?;
    Ok(breakdown)
}

/// A partner's salary, shrinking each year after the bridge starts and
/// paid only until that partner reaches access age. Nothing is paid while
/// the partner is still on their full salary.
fn declining_salary(cfg: &DecliningSalary, ctx: &BridgeContext<'_>) -> Result<f64, CalcError> {
    let idx = ctx
        .household
        .people
        .iter()
        .position(|p| p.id == cfg.person_id)
        .ok_or_else(|| CalcError::UnknownPerson(cfg.person_id.clone()))?;
    let partner = &ctx.household.people[idx];

    if ctx.working.get(idx).copied().unwrap_or(false) {
        return Ok(0.0);
    }
    let Some(bridge_start) = ctx.bridge_start_year else {
        return Ok(0.0);
    };
    let years_in = ctx.year - bridge_start;
    let years_remaining = ctx.access_age as i32 - partner.age_in(bridge_start) as i32;
    if years_in < 0 || years_in >= years_remaining {
        return Ok(0.0);
    }

    Ok(geometric_decline(cfg.annual_amount, cfg.decline_rate, years_in as u32))
}

pub fn part_time_income(cfg: &PartTimeIncome, year: i32, bridge_start_year: Option<i32>) -> f64 {
    let Some(start) = cfg.start_year.or(bridge_start_year) else {
        return 0.0;
    };
    let years_in = year - start;
    if years_in < 0 || years_in >= cfg.duration_years as i32 {
        return 0.0;
    }
    geometric_decline(cfg.annual_amount, cfg.decline_rate, years_in as u32)
}

pub fn rental_income(property: &RentalProperty, growth_rate: f64, years_elapsed: i32) -> f64 {
    let gross = property.weekly_rent.max(0.0) * 52.0 * (1.0 + growth_rate).powi(years_elapsed.max(0));
    let occupied = gross * (1.0 - property.vacancy_rate.clamp(0.0, 1.0));
    (occupied - property.annual_expenses.max(0.0)).max(0.0)
}

/// Probability-weighted, after-tax lump sums landing in `year`.
pub fn expected_lump_sums(events: &[LumpSumEvent], year: i32) -> f64 {
    events
        .iter()
        .filter(|e| e.year == year && e.allocate_to_bridge)
        .map(|e| {
            let expected = e.amount.max(0.0) * e.probability.clamp(0.0, 1.0);
            expected * (1.0 - e.tax_treatment.effective_rate())
        })
        .sum()
}

fn geometric_decline(amount: f64, decline_rate: f64, years: u32) -> f64 {
    (amount * (1.0 - decline_rate).powi(years as i32)).max(0.0)
}
