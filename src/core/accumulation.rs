use super::error::{CalcError, ensure_finite};
use super::types::{Person, RetirementAccountRules, TaxOptimization};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContributionFlow {
    pub mandatory: f64,
    pub voluntary: f64,
}

impl ContributionFlow {
    pub const NONE: ContributionFlow = ContributionFlow {
        mandatory: 0.0,
        voluntary: 0.0,
    };

    pub fn total(self) -> f64 {
        self.mandatory + self.voluntary
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulation {
    pub contributions: ContributionFlow,
    pub growth: f64,
    pub balance: f64,
}

/// Employer and voluntary contributions for one year of salary.
///
/// The voluntary part is clipped so the total never exceeds the concessional
/// cap; the mandatory part is never reduced.
pub fn contributions_for(
    person: &Person,
    salary: f64,
    rules: &RetirementAccountRules,
    tax: &TaxOptimization,
) -> ContributionFlow {
    let salary = salary.max(0.0);
    let mandatory = salary * rules.guarantee_rate.max(0.0);
    let headroom = (rules.concessional_cap - mandatory).max(0.0);

    let requested_voluntary = if tax.max_concessional {
        headroom
    } else {
        salary * person.voluntary_rate.unwrap_or(0.0).max(0.0)
    };

    ContributionFlow {
        mandatory,
        voluntary: requested_voluntary.min(headroom),
    }
}

/// Next year's balance from `prior_balance`.
///
/// Growth accrues on the prior balance plus half of this year's
/// contributions, approximating contributions arriving mid-year.
#[allow(clippy::too_many_arguments)]
pub fn accumulate(
    person: &Person,
    salary: f64,
    prior_balance: f64,
    age: u32,
    is_working: bool,
    rules: &RetirementAccountRules,
    tax: &TaxOptimization,
    return_rate: f64,
    year: i32,
) -> Result<Accumulation, CalcError> {
    let prior = prior_balance.max(0.0);
    let contributions = if is_working && age < rules.contribution_age_limit {
        contributions_for(person, salary, rules, tax)
    } else {
        ContributionFlow::NONE
    };

    let growth = ensure_finite(
        (prior + contributions.total() * 0.5) * return_rate,
        "retirement growth",
        year,
    )?;
    let balance = ensure_finite(
        (prior + contributions.total() + growth).max(0.0),
        "retirement balance",
        year,
    )?;

    Ok(Accumulation {
        contributions,
        growth,
        balance,
    })
}
