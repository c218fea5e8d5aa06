use super::error::{CalcError, ensure_finite};
use super::types::{AssetSnapshot, MeansTestRules};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeansTestOutcome {
    pub assessable_assets: f64,
    pub deemed_income: f64,
    pub assets_test: f64,
    pub income_test: f64,
    pub benefit: f64,
    pub eligible: bool,
}

/// Assets counted by the means test. The home is only counted when the
/// household does not live in it.
pub fn assessable_assets(
    retirement_balance: f64,
    non_retirement_balance: f64,
    snapshot: &AssetSnapshot,
) -> f64 {
    let home = if snapshot.is_homeowner {
        0.0
    } else {
        snapshot.home_value.max(0.0)
    };
    (retirement_balance.max(0.0) + non_retirement_balance.max(0.0) + home
        + snapshot.other_assets.max(0.0)
        - snapshot.debt.max(0.0))
    .max(0.0)
}

/// Income assumed on financial assets: the lower rate up to `threshold`,
/// the upper rate on the excess.
pub fn deemed_income(assets: f64, threshold: f64, lower_rate: f64, upper_rate: f64) -> f64 {
    let assets = assets.max(0.0);
    let lower_part = assets.min(threshold.max(0.0));
    let upper_part = (assets - lower_part).max(0.0);
    lower_part * lower_rate + upper_part * upper_rate
}

/// Couples split both the maximum payment and the reduction between them.
fn tapered_payment(max_payment: f64, excess: f64, taper: f64, is_couple: bool) -> f64 {
    let share = if is_couple { 0.5 } else { 1.0 };
    (max_payment * share - excess.max(0.0) * taper * share).max(0.0)
}

pub fn assets_test(assets: f64, is_couple: bool, is_homeowner: bool, rules: &MeansTestRules) -> f64 {
    let threshold = if is_homeowner {
        rules.asset_threshold_homeowner
    } else {
        rules.asset_threshold_non_homeowner
    }
    .pick(is_couple);
    tapered_payment(
        rules.max_payment.pick(is_couple),
        assets - threshold,
        rules.asset_taper,
        is_couple,
    )
}

pub fn income_test(income: f64, is_couple: bool, rules: &MeansTestRules) -> f64 {
    tapered_payment(
        rules.max_payment.pick(is_couple),
        income - rules.income_threshold.pick(is_couple),
        rules.income_taper,
        is_couple,
    )
}

/// Annual per-person government pension for someone of `age`.
///
/// Both tests are run independently on household assets and the lower
/// result is paid.
pub fn age_pension(
    age: u32,
    is_couple: bool,
    retirement_balance: f64,
    non_retirement_balance: f64,
    snapshot: &AssetSnapshot,
    rules: &MeansTestRules,
    year: i32,
) -> Result<MeansTestOutcome, CalcError> {
    if age < rules.pension_age {
        return Ok(MeansTestOutcome::default());
    }

    let assets = assessable_assets(retirement_balance, non_retirement_balance, snapshot);
    let deemed = deemed_income(
        assets,
        rules.deeming_threshold.pick(is_couple),
        rules.deeming_lower_rate,
        rules.deeming_upper_rate,
    );
    let by_assets = assets_test(assets, is_couple, snapshot.is_homeowner, rules);
    let by_income = income_test(deemed, is_couple, rules);
    let benefit = ensure_finite(by_assets.min(by_income).max(0.0), "pension", year)?;

    Ok(MeansTestOutcome {
        assessable_assets: assets,
        deemed_income: deemed,
        assets_test: by_assets,
        income_test: by_income,
        benefit,
        eligible: benefit > 0.0,
    })
}
