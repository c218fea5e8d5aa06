use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HouseholdStructure {
    Single,
    Couple,
}

impl HouseholdStructure {
    pub fn expected_people(self) -> usize {
        match self {
            HouseholdStructure::Single => 1,
            HouseholdStructure::Couple => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub birth_year: i32,
    #[serde(default)]
    pub retirement_balance: f64,
    #[serde(default)]
    pub salary: f64,
    #[serde(default)]
    pub voluntary_rate: Option<f64>,
    #[serde(default)]
    pub fire_age: Option<u32>,
    #[serde(default = "default_life_expectancy")]
    pub life_expectancy: u32,
}

impl Person {
    /// Age reached during `year`; never negative.
    pub fn age_in(&self, year: i32) -> u32 {
        (year - self.birth_year).max(0) as u32
    }
}

fn default_life_expectancy() -> u32 {
    90
}

/// Annual spending levels in start-year dollars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseSchedule {
    pub single: f64,
    pub couple: f64,
    pub current: f64,
}

impl Default for ExpenseSchedule {
    fn default() -> Self {
        Self {
            single: 50_000.0,
            couple: 70_000.0,
            current: 70_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(
    tag = "mode",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ExpenseMode {
    #[default]
    Constant,
    #[serde(alias = "singleThenCouple", alias = "single_then_couple")]
    SingleThenCouple { couple_from_year: i32 },
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetSnapshot {
    pub non_retirement_investments: f64,
    pub home_value: f64,
    pub is_homeowner: bool,
    pub other_assets: f64,
    pub debt: f64,
}

impl Default for AssetSnapshot {
    fn default() -> Self {
        Self {
            non_retirement_investments: 0.0,
            home_value: 0.0,
            is_homeowner: true,
            other_assets: 0.0,
            debt: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub structure: HouseholdStructure,
    pub people: Vec<Person>,
    #[serde(default)]
    pub expenses: ExpenseSchedule,
    #[serde(default)]
    pub expense_mode: ExpenseMode,
    #[serde(default)]
    pub assets: AssetSnapshot,
}

impl Household {
    pub fn is_couple(&self) -> bool {
        self.structure == HouseholdStructure::Couple
    }

    pub fn youngest_age_in(&self, year: i32) -> u32 {
        self.people
            .iter()
            .map(|p| p.age_in(year))
            .min()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    /// Income above which `rate` applies.
    pub threshold: f64,
    pub rate: f64,
}

/// Income-tested flat levy, phased in linearly between the two thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevyRules {
    pub rate: f64,
    pub lower_threshold: f64,
    pub upper_threshold: f64,
}

/// Income-tested offset: `max_offset` up to `taper_start`, zero from `taper_end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetRules {
    pub max_offset: f64,
    pub taper_start: f64,
    pub taper_end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxRules {
    pub brackets: Vec<TaxBracket>,
    pub levy: LevyRules,
    pub offset: OffsetRules,
}

impl Default for TaxRules {
    fn default() -> Self {
        Self {
            brackets: vec![
                TaxBracket {
                    threshold: 0.0,
                    rate: 0.0,
                },
                TaxBracket {
                    threshold: 18_200.0,
                    rate: 0.16,
                },
                TaxBracket {
                    threshold: 45_000.0,
                    rate: 0.30,
                },
                TaxBracket {
                    threshold: 135_000.0,
                    rate: 0.37,
                },
                TaxBracket {
                    threshold: 190_000.0,
                    rate: 0.45,
                },
            ],
            levy: LevyRules {
                rate: 0.02,
                lower_threshold: 26_000.0,
                upper_threshold: 32_500.0,
            },
            offset: OffsetRules {
                max_offset: 700.0,
                taper_start: 37_500.0,
                taper_end: 66_667.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownBand {
    pub min_age: u32,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetirementAccountRules {
    pub guarantee_rate: f64,
    pub concessional_cap: f64,
    pub access_age: u32,
    pub contribution_age_limit: u32,
    /// Ascending by `min_age`; ages below the first band draw nothing.
    pub minimum_drawdown: Vec<DrawdownBand>,
}

impl Default for RetirementAccountRules {
    fn default() -> Self {
        Self {
            guarantee_rate: 0.115,
            concessional_cap: 30_000.0,
            access_age: 60,
            contribution_age_limit: 67,
            minimum_drawdown: default_drawdown_table(),
        }
    }
}

pub fn default_drawdown_table() -> Vec<DrawdownBand> {
    [
        (60, 0.04),
        (65, 0.05),
        (70, 0.05),
        (75, 0.06),
        (80, 0.07),
        (85, 0.09),
        (90, 0.11),
        (95, 0.14),
    ]
    .into_iter()
    .map(|(min_age, rate)| DrawdownBand { min_age, rate })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoupleAmount {
    pub single: f64,
    /// Combined figure for both members of a couple.
    pub couple: f64,
}

impl CoupleAmount {
    pub fn pick(self, is_couple: bool) -> f64 {
        if is_couple { self.couple } else { self.single }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeansTestRules {
    pub pension_age: u32,
    /// Annual maximum payment.
    pub max_payment: CoupleAmount,
    pub asset_threshold_homeowner: CoupleAmount,
    pub asset_threshold_non_homeowner: CoupleAmount,
    /// Annual payment reduction per dollar of assets above the threshold.
    pub asset_taper: f64,
    pub income_threshold: CoupleAmount,
    /// Annual payment reduction per dollar of deemed income above the threshold.
    pub income_taper: f64,
    pub deeming_threshold: CoupleAmount,
    pub deeming_lower_rate: f64,
    pub deeming_upper_rate: f64,
}

impl Default for MeansTestRules {
    fn default() -> Self {
        Self {
            pension_age: 67,
            max_payment: CoupleAmount {
                single: 29_754.0,
                couple: 44_855.0,
            },
            asset_threshold_homeowner: CoupleAmount {
                single: 314_000.0,
                couple: 470_000.0,
            },
            asset_threshold_non_homeowner: CoupleAmount {
                single: 566_000.0,
                couple: 722_000.0,
            },
            asset_taper: 0.078,
            income_threshold: CoupleAmount {
                single: 5_512.0,
                couple: 9_672.0,
            },
            income_taper: 0.5,
            deeming_threshold: CoupleAmount {
                single: 60_400.0,
                couple: 100_200.0,
            },
            deeming_lower_rate: 0.0025,
            deeming_upper_rate: 0.0225,
        }
    }
}

/// Versioned policy and market bundle. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Assumptions {
    pub version: String,
    pub return_rate: f64,
    pub inflation_rate: f64,
    pub tax: TaxRules,
    pub retirement_account: RetirementAccountRules,
    pub means_test: MeansTestRules,
}

impl Default for Assumptions {
    fn default() -> Self {
        Self {
            version: "au-2024-25".to_string(),
            return_rate: 0.07,
            inflation_rate: 0.025,
            tax: TaxRules::default(),
            retirement_account: RetirementAccountRules::default(),
            means_test: MeansTestRules::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetirementSequencing {
    #[default]
    Simultaneous,
    Staggered,
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecliningSalary {
    pub person_id: String,
    pub annual_amount: f64,
    #[serde(default)]
    pub decline_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTimeIncome {
    pub annual_amount: f64,
    #[serde(default)]
    pub decline_rate: f64,
    /// First year of the window; defaults to the first year anybody stops work.
    #[serde(default)]
    pub start_year: Option<i32>,
    pub duration_years: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalProperty {
    pub weekly_rent: f64,
    #[serde(default)]
    pub vacancy_rate: f64,
    #[serde(default)]
    pub annual_expenses: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LumpSumTaxTreatment {
    #[serde(alias = "taxFree", alias = "tax_free")]
    TaxFree,
    #[serde(alias = "capitalGains", alias = "capital_gains")]
    CapitalGains,
    Income,
    #[serde(alias = "superContribution", alias = "super_contribution")]
    RetirementContribution,
}

impl LumpSumTaxTreatment {
    pub fn effective_rate(self) -> f64 {
        match self {
            LumpSumTaxTreatment::TaxFree => 0.0,
            LumpSumTaxTreatment::CapitalGains => 0.15,
            LumpSumTaxTreatment::Income => 0.325,
            LumpSumTaxTreatment::RetirementContribution => 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LumpSumEvent {
    pub year: i32,
    pub amount: f64,
    #[serde(default = "default_probability")]
    pub probability: f64,
    pub tax_treatment: LumpSumTaxTreatment,
    #[serde(default = "default_true")]
    pub allocate_to_bridge: bool,
}

fn default_probability() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub declining_salary: Option<DecliningSalary>,
    pub part_time: Option<PartTimeIncome>,
    pub rental_growth_rate: f64,
    pub rental_properties: Vec<RentalProperty>,
    pub lump_sums: Vec<LumpSumEvent>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalMethod {
    #[default]
    #[serde(alias = "fixedReal", alias = "fixed_real")]
    FixedReal,
    #[serde(alias = "fixedNominal", alias = "fixed_nominal")]
    FixedNominal,
    #[serde(alias = "spendToZero", alias = "spend_to_zero")]
    SpendToZero,
    Dynamic,
    Guardrails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpenddownConfig {
    pub method: WithdrawalMethod,
    pub longevity_planning_age: u32,
    /// Withdraw exactly the legislated minimum regardless of `method`.
    pub minimum_only: bool,
}

impl Default for SpenddownConfig {
    fn default() -> Self {
        Self {
            method: WithdrawalMethod::FixedReal,
            longevity_planning_age: 95,
            minimum_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxOptimization {
    pub tax_free_after_access: bool,
    /// Lift voluntary contributions until the concessional cap is filled.
    pub max_concessional: bool,
    /// Voluntary contributions come out of pre-tax salary. When off they are
    /// paid from take-home pay and the full salary is taxed.
    pub salary_sacrifice: bool,
}

impl Default for TaxOptimization {
    fn default() -> Self {
        Self {
            tax_free_after_access: true,
            max_concessional: false,
            salary_sacrifice: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Strategy {
    pub sequencing: RetirementSequencing,
    pub bridge: BridgeConfig,
    pub spenddown: SpenddownConfig,
    pub tax: TaxOptimization,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Horizon {
    /// The simulation clock: every "current year" computation is relative to this.
    pub start_year: i32,
    #[serde(default = "default_end_age")]
    pub end_age: u32,
}

fn default_end_age() -> u32 {
    95
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MonteCarloStrategy {
    #[default]
    #[serde(alias = "fixedReal", alias = "fixed_real")]
    FixedReal,
    #[serde(alias = "fixedNominal", alias = "fixed_nominal")]
    FixedNominal,
    Dynamic,
    Guardrails,
}

/// Percentages; must sum to 100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetAllocation {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl Default for AssetAllocation {
    fn default() -> Self {
        Self {
            stocks: 70.0,
            bonds: 25.0,
            cash: 5.0,
        }
    }
}

impl AssetAllocation {
    pub fn total(&self) -> f64 {
        self.stocks + self.bonds + self.cash
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetClass {
    pub mean: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub allocation: AssetAllocation,
    pub stocks: AssetClass,
    pub bonds: AssetClass,
    pub cash: AssetClass,
    pub inflation_mean: f64,
    pub inflation_volatility: f64,
    /// Correlation between the portfolio return and inflation draws.
    pub correlation: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            allocation: AssetAllocation::default(),
            stocks: AssetClass {
                mean: 0.085,
                volatility: 0.16,
            },
            bonds: AssetClass {
                mean: 0.045,
                volatility: 0.06,
            },
            cash: AssetClass {
                mean: 0.03,
                volatility: 0.01,
            },
            inflation_mean: 0.025,
            inflation_volatility: 0.01,
            correlation: -0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloOptions {
    pub enabled: bool,
    pub trials: u32,
    /// Caller-supplied bound on `trials`.
    pub max_trials: u32,
    pub seed: Option<u64>,
    pub strategy: MonteCarloStrategy,
    /// Initial withdrawal as a fraction of the portfolio at retirement;
    /// defaults to retirement expenses over that portfolio.
    pub withdrawal_rate: Option<f64>,
    pub guardrail_floor: f64,
    pub guardrail_ceiling: f64,
    pub market: MarketAssumptions,
}

impl Default for MonteCarloOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            trials: 1_000,
            max_trials: 10_000,
            seed: None,
            strategy: MonteCarloStrategy::FixedReal,
            withdrawal_rate: None,
            guardrail_floor: 0.9,
            guardrail_ceiling: 1.2,
            market: MarketAssumptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub include_timeline: bool,
    pub monte_carlo: MonteCarloOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            include_timeline: true,
            monte_carlo: MonteCarloOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub household: Household,
    #[serde(default)]
    pub assumptions: Assumptions,
    #[serde(default)]
    pub strategy: Strategy,
    pub horizon: Horizon,
    #[serde(default)]
    pub options: RunOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonYear {
    pub person_id: String,
    pub age: u32,
    pub is_alive: bool,
    pub is_working: bool,
    pub has_access: bool,
    pub salary: f64,
    pub mandatory_contribution: f64,
    pub voluntary_contribution: f64,
    pub growth: f64,
    pub minimum_drawdown: f64,
    pub withdrawal: f64,
    pub retirement_balance: f64,
    pub taxable_income: f64,
    pub income_tax: f64,
    pub pension: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeBreakdown {
    pub declining_salary: f64,
    pub part_time: f64,
    pub rental: f64,
    pub lump_sums: f64,
}

impl BridgeBreakdown {
    pub fn total(&self) -> f64 {
        self.declining_salary + self.part_time + self.rental + self.lump_sums
    }
}

/// One immutable snapshot per simulated year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub year: i32,
    pub people: Vec<PersonYear>,
    pub bridge: BridgeBreakdown,
    pub bridge_income: f64,
    pub salary_income: f64,
    pub withdrawals: f64,
    pub pension_income: f64,
    pub total_tax: f64,
    pub net_income: f64,
    pub expenses: f64,
    pub surplus: f64,
    pub retirement_balance_total: f64,
    pub non_retirement_balance: f64,
    pub net_worth: f64,
    pub pension_eligible: bool,
    pub is_feasible: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSeries {
    pub retirement: Vec<f64>,
    pub non_retirement: Vec<f64>,
    pub net_worth: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSeries {
    pub salary: Vec<f64>,
    pub withdrawals: Vec<f64>,
    pub bridge: Vec<f64>,
    pub pension: Vec<f64>,
    pub tax: Vec<f64>,
    pub expenses: Vec<f64>,
    pub surplus: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub years: Vec<i32>,
    pub assets: AssetSeries,
    pub income: IncomeSeries,
    pub feasible: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonLongevity {
    pub person_id: String,
    /// Last age at which the retirement balance was still positive.
    pub balance_lasts_to_age: u32,
    pub outlives_balance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub bridge_shortfall: f64,
    pub people: Vec<PersonLongevity>,
    pub exhaustion_year: Option<i32>,
    pub cumulative_pension: f64,
    pub surplus_volatility: f64,
    pub terminal_net_worth: f64,
    pub feasibility_score: f64,
    pub is_feasible: bool,
    pub risks: Vec<String>,
    pub optimizations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialYear {
    pub market_return: f64,
    pub inflation: f64,
    pub withdrawal: f64,
    pub balance: f64,
}

/// One Monte Carlo trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRun {
    pub trial: u32,
    pub seed: u64,
    pub years: Vec<TrialYear>,
    pub success: bool,
    pub ruin_year: Option<u32>,
    pub final_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBand {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceInterval {
    pub year_offset: u32,
    pub band: PercentileBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTest {
    /// Share of trials whose first third of years averaged below mean minus one sigma.
    pub early_sequence_risk: f64,
    pub early_sequence_success_rate: f64,
    pub arithmetic_mean_return: f64,
    pub geometric_mean_return: f64,
    pub volatility_drag: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub trials: u32,
    pub seed: u64,
    pub success_rate: f64,
    pub probability_of_ruin: f64,
    pub final_value: PercentileBand,
    pub initial_withdrawal_rate: f64,
    pub safe_withdrawal_rate: f64,
    pub conservative_withdrawal_rate: f64,
    pub median_ruin_year: Option<f64>,
    pub stress_test: StressTest,
    pub confidence_intervals: Vec<ConfidenceInterval>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub engine_version: String,
    pub assumptions_version: String,
    pub duration_ms: f64,
    pub years_projected: usize,
    pub terminated_early: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub timeline: Vec<YearRow>,
    pub series: ChartSeries,
    pub metrics: Metrics,
    pub monte_carlo: Option<MonteCarloSummary>,
    pub warnings: Vec<String>,
    pub metadata: RunMetadata,
}
