use super::error::{CalcError, ensure_finite};
use super::types::{LevyRules, OffsetRules, TaxBracket, TaxRules};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaxBreakdown {
    pub taxable_income: f64,
    pub bracket_tax: f64,
    pub levy: f64,
    pub offset: f64,
    pub total: f64,
}

/// Progressive tax: each bracket taxes only the slice of income between its
/// threshold and the next bracket's threshold. `brackets` must be ascending.
pub fn bracket_tax(income: f64, brackets: &[TaxBracket]) -> f64 {
    let income = income.max(0.0);
    brackets
        .iter()
        .enumerate()
        .map(|(idx, bracket)| {
            let upper = brackets
                .get(idx + 1)
                .map(|next| next.threshold)
                .unwrap_or(f64::INFINITY);
            let slice = (income.min(upper) - bracket.threshold).max(0.0);
            slice * bracket.rate
        })
        .sum()
}

/// Zero up to the lower threshold, phased in linearly to the full flat rate
/// at the upper threshold.
pub fn levy(income: f64, rules: &LevyRules) -> f64 {
    let income = income.max(0.0);
    if income <= rules.lower_threshold {
        return 0.0;
    }
    if income < rules.upper_threshold {
        let band = (rules.upper_threshold - rules.lower_threshold).max(1e-9);
        let full_at_upper = rules.rate * rules.upper_threshold;
        return full_at_upper * (income - rules.lower_threshold) / band;
    }
    income * rules.rate
}

pub fn offset(income: f64, rules: &OffsetRules) -> f64 {
    let income = income.max(0.0);
    if income <= rules.taper_start {
        return rules.max_offset;
    }
    if income < rules.taper_end {
        let band = (rules.taper_end - rules.taper_start).max(1e-9);
        return rules.max_offset * (1.0 - (income - rules.taper_start) / band);
    }
    0.0
}

pub fn income_tax(income: f64, rules: &TaxRules) -> TaxBreakdown {
    let taxable_income = income.max(0.0);
    let bracket_tax = bracket_tax(taxable_income, &rules.brackets);
    let levy = levy(taxable_income, &rules.levy);
    let offset = offset(taxable_income, &rules.offset);
    TaxBreakdown {
        taxable_income,
        bracket_tax,
        levy,
        offset,
        total: (bracket_tax + levy - offset).max(0.0),
    }
}

/// Salary while working plus the taxable part of this year's withdrawal.
pub fn taxable_income(
    salary: f64,
    is_working: bool,
    withdrawal: f64,
    age: u32,
    access_age: u32,
    tax_free_after_access: bool,
) -> f64 {
    let salary = if is_working { salary.max(0.0) } else { 0.0 };
    let taxable_withdrawal = if tax_free_after_access && age >= access_age {
        0.0
    } else {
        withdrawal.max(0.0)
    };
    salary + taxable_withdrawal
}

pub fn person_tax(income: f64, rules: &TaxRules, year: i32) -> Result<TaxBreakdown, CalcError> {
    let breakdown = income_tax(income, rules);
    ensure_finite(breakdown.total, "income tax", year)?;
    Ok(breakdown)
}
