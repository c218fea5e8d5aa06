use super::error::{CalcError, ensure_finite};
use super::types::{DrawdownBand, SpenddownConfig, WithdrawalMethod};

const BASE_RATE: f64 = 0.04;
const SPEND_TO_ZERO_MIN_RATE: f64 = 0.02;
const SPEND_TO_ZERO_MAX_RATE: f64 = 0.15;
const DYNAMIC_TARGET_CAGR: f64 = 0.04;
const GUARDRAIL_FLOOR_RATE: f64 = 0.03;
const GUARDRAIL_CEILING_RATE: f64 = 0.06;

/// Market and history inputs a withdrawal method may look at.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalContext {
    pub age: u32,
    pub balance: f64,
    /// Balance at the start of the projection.
    pub original_balance: f64,
    pub years_elapsed: u32,
    pub return_rate: f64,
    pub inflation_rate: f64,
    pub longevity_planning_age: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawdown {
    pub minimum: f64,
    pub withdrawal: f64,
    pub balance: f64,
}

impl Drawdown {
    fn untouched(balance: f64) -> Self {
        Self {
            minimum: 0.0,
            withdrawal: 0.0,
            balance: balance.max(0.0),
        }
    }
}

/// Legislated minimum drawdown rate for `age`: the rate of the highest band
/// whose `min_age` is reached, or zero below the first band.
pub fn minimum_drawdown_rate(age: u32, table: &[DrawdownBand]) -> Result<f64, CalcError> {
    if table.is_empty() {
        return Err(CalcError::EmptyDrawdownTable);
    }
    Ok(table
        .iter()
        .filter(|band| age >= band.min_age)
        .max_by_key(|band| band.min_age)
        .map(|band| band.rate)
        .unwrap_or(0.0))
}

/// Level payment that exhausts a unit balance over `years` at `real_return`.
pub fn annuity_withdrawal_rate(real_return: f64, years: u32) -> f64 {
    let years = years.max(1) as f64;
    if real_return.abs() < 1e-9 {
        return 1.0 / years;
    }

    if real_return <= -0.99 {
        return 1.0;
    }

    let growth = (1.0 + real_return).powf(years);
    let denom = growth - 1.0;
    if denom.abs() <= 1e-12 {
        1.0 / years
    } else {
        real_return * growth / denom
    }
}

pub fn strategy_amount(method: WithdrawalMethod, ctx: &WithdrawalContext) -> f64 {
    let balance = ctx.balance.max(0.0);
    match method {
        WithdrawalMethod::FixedReal => balance * BASE_RATE * (1.0 + ctx.inflation_rate),
        WithdrawalMethod::FixedNominal => balance * BASE_RATE,
        WithdrawalMethod::SpendToZero => {
            let years = ctx.longevity_planning_age.saturating_sub(ctx.age).max(1);
            let real_return = ctx.return_rate - ctx.inflation_rate;
            let payment = balance * annuity_withdrawal_rate(real_return, years);
            payment.clamp(
                balance * SPEND_TO_ZERO_MIN_RATE,
                balance * SPEND_TO_ZERO_MAX_RATE,
            )
        }
        WithdrawalMethod::Dynamic => {
            let target =
                ctx.original_balance * (1.0 + DYNAMIC_TARGET_CAGR).powi(ctx.years_elapsed as i32);
            let rate = if target <= 0.0 {
                BASE_RATE
            } else if balance > target * 1.2 {
                0.05
            } else if balance < target * 0.8 {
                0.03
            } else {
                BASE_RATE
            };
            balance * rate
        }
        WithdrawalMethod::Guardrails => (balance * BASE_RATE).clamp(
            balance * GUARDRAIL_FLOOR_RATE,
            balance * GUARDRAIL_CEILING_RATE,
        ),
    }
}

/// One year of drawdown for a single person.
///
/// Nothing is withdrawn before access age. Otherwise the withdrawal is the
/// larger of the legislated minimum and the configured method's amount,
/// capped at the balance.
pub fn spend_down(
    has_access: bool,
    config: &SpenddownConfig,
    table: &[DrawdownBand],
    ctx: &WithdrawalContext,
    year: i32,
) -> Result<Drawdown, CalcError> {
    if !has_access || ctx.balance <= 0.0 {
        return Ok(Drawdown::untouched(ctx.balance));
    }

    let minimum = ctx.balance * minimum_drawdown_rate(ctx.age, table)?;
    let requested = if config.minimum_only {
        minimum
    } else {
        minimum.max(strategy_amount(config.method, ctx))
    };
    let withdrawal = ensure_finite(requested.min(ctx.balance), "withdrawal", year)?;

    Ok(Drawdown {
        minimum: minimum.min(ctx.balance),
        withdrawal,
        balance: (ctx.balance - withdrawal).max(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::default_drawdown_table;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn ctx(age: u32, balance: f64) -> WithdrawalContext {
        WithdrawalContext {
            age,
            balance,
            original_balance: balance,
            years_elapsed: 0,
            return_rate: 0.07,
            inflation_rate: 0.025,
            longevity_planning_age: 95,
        }
    }

    fn config(method: WithdrawalMethod) -> SpenddownConfig {
        SpenddownConfig {
            method,
            ..SpenddownConfig::default()
        }
    }

    #[test]
    fn minimum_drawdown_bands() {
        let table = default_drawdown_table();
        let expect = [
            (55, 0.0),
            (59, 0.0),
            (60, 0.04),
            (64, 0.04),
            (65, 0.05),
            (72, 0.05),
            (75, 0.06),
            (80, 0.07),
            (85, 0.09),
            (90, 0.11),
            (95, 0.14),
            (101, 0.14),
        ];
        for (age, rate) in expect {
            assert_approx(minimum_drawdown_rate(age, &table).expect("table"), rate);
        }
        assert_eq!(
            minimum_drawdown_rate(70, &[]),
            Err(CalcError::EmptyDrawdownTable)
        );
    }

    #[test]
    fn oracle_spend_to_zero_annuity_payment() {
        let mut c = ctx(65, 500_000.0);
        c.return_rate = 0.045;
        c.inflation_rate = 0.025;

        let growth = 1.02f64.powi(30);
        let expected = 500_000.0 * 0.02 * growth / (growth - 1.0);
        let amount = strategy_amount(WithdrawalMethod::SpendToZero, &c);
        assert_approx(amount, expected);
        assert!(amount >= 10_000.0 && amount <= 75_000.0);
        assert!((amount - 22_324.9).abs() < 1.0);

        // The age-65 minimum (5%) is higher, so it wins.
        let table = default_drawdown_table();
        let out = spend_down(true, &config(WithdrawalMethod::SpendToZero), &table, &c, 2050)
            .expect("ok");
        assert_approx(out.withdrawal, 25_000.0);
        assert_approx(out.balance, 475_000.0);
    }

    #[test]
    fn spend_to_zero_with_zero_real_return_divides_evenly_and_clamps() {
        let mut c = ctx(75, 100_000.0);
        c.return_rate = 0.03;
        c.inflation_rate = 0.03;
        // 20 years left -> 5,000
        assert_approx(strategy_amount(WithdrawalMethod::SpendToZero, &c), 5_000.0);

        c.age = 94;
        // 1 year left would be everything; clamped to 15%.
        assert_approx(strategy_amount(WithdrawalMethod::SpendToZero, &c), 15_000.0);
    }

    #[test]
    fn fixed_methods() {
        let c = ctx(62, 200_000.0);
        assert_approx(strategy_amount(WithdrawalMethod::FixedNominal, &c), 8_000.0);
        assert_approx(strategy_amount(WithdrawalMethod::FixedReal, &c), 8_200.0);
        assert_approx(strategy_amount(WithdrawalMethod::Guardrails, &c), 8_000.0);
    }

    #[test]
    fn dynamic_compares_against_four_percent_trajectory() {
        let mut c = ctx(62, 100_000.0);
        c.original_balance = 100_000.0;
        c.years_elapsed = 1;
        // target 104,000
        c.balance = 130_000.0;
        assert_approx(strategy_amount(WithdrawalMethod::Dynamic, &c), 6_500.0);
        c.balance = 80_000.0;
        assert_approx(strategy_amount(WithdrawalMethod::Dynamic, &c), 2_400.0);
        c.balance = 104_000.0;
        assert_approx(strategy_amount(WithdrawalMethod::Dynamic, &c), 4_160.0);
    }

    #[test]
    fn minimum_only_ignores_method() {
        let table = default_drawdown_table();
        let cfg = SpenddownConfig {
            method: WithdrawalMethod::SpendToZero,
            longevity_planning_age: 95,
            minimum_only: true,
        };
        let out = spend_down(true, &cfg, &table, &ctx(90, 100_000.0), 2060).expect("ok");
        assert_approx(out.withdrawal, 11_000.0);
    }

    #[test]
    fn no_withdrawal_before_access() {
        let table = default_drawdown_table();
        let out = spend_down(
            false,
            &config(WithdrawalMethod::FixedReal),
            &table,
            &ctx(55, 300_000.0),
            2040,
        )
        .expect("ok");
        assert_approx(out.withdrawal, 0.0);
        assert_approx(out.balance, 300_000.0);
    }

    proptest! {
        #[test]
        fn prop_withdrawal_at_least_minimum_and_balance_non_negative(
            age in 60u32..105,
            balance in 0.0f64..5_000_000.0,
            method_idx in 0usize..5,
            return_bp in 0i32..2000,
            inflation_bp in 0i32..800,
            elapsed in 0u32..40,
            minimum_only in proptest::bool::ANY
        ) {
            let methods = [
                WithdrawalMethod::FixedReal,
                WithdrawalMethod::FixedNominal,
                WithdrawalMethod::SpendToZero,
                WithdrawalMethod::Dynamic,
                WithdrawalMethod::Guardrails,
            ];
            let cfg = SpenddownConfig {
                method: methods[method_idx],
                longevity_planning_age: 95,
                minimum_only,
            };
            let mut c = ctx(age, balance);
            c.years_elapsed = elapsed;
            c.original_balance = 250_000.0;
            c.return_rate = return_bp as f64 / 10_000.0;
            c.inflation_rate = inflation_bp as f64 / 10_000.0;
            let table = default_drawdown_table();

            let out = spend_down(true, &cfg, &table, &c, 2060).expect("ok");
            let minimum = balance * minimum_drawdown_rate(age, &table).expect("table");
            prop_assert!(out.withdrawal + 1e-9 >= minimum.min(balance));
            prop_assert!(out.balance >= 0.0);
            prop_assert!(out.withdrawal <= balance + 1e-9);
        }
    }
}
