use super::types::{
    AssetSnapshot, Assumptions, ExpenseMode, ExpenseSchedule, Horizon, Household,
    HouseholdStructure, Person, RunOptions, RunRequest, Strategy,
};

pub(crate) fn person(id: &str, birth_year: i32, balance: f64, salary: f64, fire_age: u32) -> Person {
    Person {
        id: id.to_string(),
        birth_year,
        retirement_balance: balance,
        salary,
        voluntary_rate: None,
        fire_age: Some(fire_age),
        life_expectancy: 90,
    }
}

/// 40-year-old earning 120k, stopping work at 50.
pub(crate) fn single_request() -> RunRequest {
    RunRequest {
        household: Household {
            structure: HouseholdStructure::Single,
            people: vec![person("a", 1985, 300_000.0, 120_000.0, 50)],
            expenses: ExpenseSchedule {
                single: 50_000.0,
                couple: 70_000.0,
                current: 60_000.0,
            },
            expense_mode: ExpenseMode::Constant,
            assets: AssetSnapshot {
                non_retirement_investments: 200_000.0,
                home_value: 800_000.0,
                is_homeowner: true,
                other_assets: 0.0,
                debt: 0.0,
            },
        },
        assumptions: Assumptions::default(),
        strategy: Strategy::default(),
        horizon: Horizon {
            start_year: 2025,
            end_age: 95,
        },
        options: RunOptions::default(),
    }
}

/// Adds a 38-year-old partner aiming to stop at 55.
pub(crate) fn couple_request() -> RunRequest {
    let mut request = single_request();
    request.household.structure = HouseholdStructure::Couple;
    let mut partner = person("b", 1987, 200_000.0, 90_000.0, 55);
    partner.life_expectancy = 92;
    request.household.people.push(partner);
    request.household.expenses = ExpenseSchedule {
        single: 55_000.0,
        couple: 80_000.0,
        current: 90_000.0,
    };
    request
}
