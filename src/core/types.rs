use serde::Serialize;

use super::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RateSpec {
    Annual { return_pct: f64, inflation_pct: f64 },
    Monthly { return_pct: f64, inflation_pct: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    pub initial: f64,
    pub monthly_contribution: f64,
    pub years: u32,
    pub rates: RateSpec,
    pub annual_fee_pct: f64,
    pub escalation_pct: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct GoalTarget {
    pub amount: f64,
    pub year: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloRequest {
    pub initial: f64,
    pub monthly_contribution: f64,
    pub years: u32,
    pub mean_return_pct: f64,
    pub stdev_return_pct: f64,
    pub inflation_pct: f64,
    pub annual_fee_pct: f64,
    pub escalation_pct: f64,
    pub simulations: u32,
    pub seed: u64,
    pub goal: Option<GoalTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoalQuery {
    pub target: f64,
    pub target_prob: f64,
    pub years: u32,
    pub initial: f64,
    pub mean_return_pct: f64,
    pub stdev_return_pct: f64,
    pub inflation_pct: f64,
    pub annual_fee_pct: f64,
    pub escalation_pct: f64,
    /// Zero selects the closed-form solver.
    pub simulations: u32,
    pub seed: u64,
}

impl GoalQuery {
    pub fn method(&self) -> SolveMethod {
        if self.simulations > 0 && self.target_prob > 0.0 {
            SolveMethod::MonteCarlo
        } else {
            SolveMethod::Deterministic
        }
    }

    pub fn months(&self) -> Result<u32> {
        horizon_months(self.years)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveMethod {
    MonteCarlo,
    Deterministic,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct MonthlyRates {
    pub r_month: f64,
    pub i_month: f64,
    pub fee_month: f64,
    pub esc_month: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    pub month: u32,
    pub nominal: f64,
    pub real: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    pub fn months(&self) -> Vec<u32> {
        self.points.iter().map(|p| p.month).collect()
    }

    pub fn nominal(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.nominal).collect()
    }

    pub fn real(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.real).collect()
    }

    pub fn ending(&self) -> TrajectoryPoint {
        self.points.last().copied().unwrap_or(TrajectoryPoint {
            month: 0,
            nominal: 0.0,
            real: 0.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub trajectory: Trajectory,
    pub rates: MonthlyRates,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct SimulationRates {
    pub mean_month: f64,
    pub sigma_month: f64,
    pub i_month: f64,
    pub fee_month: f64,
    pub esc_month: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PercentileBand {
    pub p5: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PercentileSeries {
    pub p5: Vec<f64>,
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
    pub p95: Vec<f64>,
}

impl PercentileSeries {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            p5: Vec::with_capacity(len),
            p10: Vec::with_capacity(len),
            p50: Vec::with_capacity(len),
            p90: Vec::with_capacity(len),
            p95: Vec::with_capacity(len),
        }
    }

    pub fn push(&mut self, band: PercentileBand) {
        self.p5.push(band.p5);
        self.p10.push(band.p10);
        self.p50.push(band.p50);
        self.p90.push(band.p90);
        self.p95.push(band.p95);
    }

    pub fn band(&self, index: usize) -> Option<PercentileBand> {
        Some(PercentileBand {
            p5: *self.p5.get(index)?,
            p10: *self.p10.get(index)?,
            p50: *self.p50.get(index)?,
            p90: *self.p90.get(index)?,
            p95: *self.p95.get(index)?,
        })
    }

    pub fn len(&self) -> usize {
        self.p50.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p50.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct YearlyPercentiles {
    pub year: u32,
    pub p5: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct GoalOutcome {
    pub target: f64,
    pub year: u32,
    pub success_probability: f64,
    pub mean_shortfall: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub months: u32,
    pub simulations: u32,
    pub rates: SimulationRates,
    pub monthly: PercentileSeries,
    pub yearly: Vec<YearlyPercentiles>,
    pub ending: PercentileBand,
    pub goal: Option<GoalOutcome>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub simulations: u32,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoalSolveResult {
    pub required_monthly: f64,
    pub method: SolveMethod,
    pub used_simulations: Option<u32>,
    pub achieved_success_rate: Option<f64>,
    pub success_ci_half_width: Option<f64>,
    pub target_reachable: bool,
    pub timed_out: bool,
    pub iterations: Vec<GoalSolveIteration>,
    pub message: String,
}

/// Hard caps applied before any expensive work starts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineLimits {
    pub max_simulations: u32,
    pub max_years: u32,
    pub max_path_cells: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_simulations: 50_000,
            max_years: 100,
            max_path_cells: 25_000_000,
        }
    }
}

/// Month count for a horizon, refusing horizons whose months do not fit a `u32`.
pub fn horizon_months(years: u32) -> Result<u32> {
    years.checked_mul(12).ok_or(EngineError::resource_exceeded(
        "years",
        years as u64,
        (u32::MAX / 12) as u64,
    ))
}

impl EngineLimits {
    /// Returns the month count of an accepted horizon.
    pub fn check_horizon(&self, years: u32) -> Result<u32> {
        if years > self.max_years {
            return Err(EngineError::resource_exceeded(
                "years",
                years as u64,
                self.max_years as u64,
            ));
        }
        horizon_months(years)
    }

    pub fn check_simulation(&self, simulations: u32, years: u32) -> Result<()> {
        let months = self.check_horizon(years)?;
        if simulations > self.max_simulations {
            return Err(EngineError::resource_exceeded(
                "simulations",
                simulations as u64,
                self.max_simulations as u64,
            ));
        }
        let cells = simulations as u64 * (months as u64 + 1);
        if cells > self.max_path_cells {
            return Err(EngineError::resource_exceeded(
                "path cells (simulations x months)",
                cells,
                self.max_path_cells,
            ));
        }
        Ok(())
    }
}
