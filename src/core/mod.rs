mod budget;
mod engine;
mod error;
mod loan;
mod rates;
mod solver;
mod types;

pub use budget::{BudgetInput, BudgetSummary, summarize_budget};
pub use engine::{PathEnsemble, RandomSource, project, simulate, simulate_paths};
pub use error::{EngineError, Result};
pub use loan::{AmortizationRow, LoanInput, LoanMode, LoanSchedule, amortize};
pub use rates::{fraction, monthly_from_annual, monthly_from_monthly_pct};
pub use solver::{
    SamplingScheme, SolverConfig, growing_annuity_payment, solve_required_contribution,
};
pub use types::{
    EngineLimits, ForecastRequest, GoalOutcome, GoalQuery, GoalSolveIteration, GoalSolveResult,
    GoalTarget, MonteCarloRequest, MonthlyRates, PercentileBand, PercentileSeries, Projection,
    RateSpec, SimulationRates, SimulationSummary, SolveMethod, Trajectory, TrajectoryPoint,
    YearlyPercentiles,
};
