use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::debug;

use super::error::{EngineError, Result};
use super::rates::{monthly_from_annual, monthly_from_monthly_pct};
use super::types::{
    EngineLimits, ForecastRequest, GoalOutcome, GoalTarget, MonteCarloRequest, MonthlyRates,
    PercentileBand, PercentileSeries, Projection, RateSpec, SimulationRates, SimulationSummary,
    Trajectory, TrajectoryPoint, YearlyPercentiles, horizon_months,
};

/// Handle to the randomness used by one request.
///
/// Every path draws from its own generator derived from the base seed, so
/// paths can be simulated in any order (or in parallel) and a seeded source
/// still reproduces the exact same draws.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RandomSource {
    base_seed: u64,
    reproducible: bool,
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        Self {
            base_seed: seed,
            reproducible: true,
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            base_seed: rand::random::<u64>(),
            reproducible: false,
        }
    }

    /// Zero means "no seed supplied".
    pub fn from_request_seed(seed: u64) -> Self {
        if seed == 0 {
            Self::from_entropy()
        } else {
            Self::seeded(seed)
        }
    }

    pub fn is_reproducible(&self) -> bool {
        self.reproducible
    }

    pub(crate) fn path_rng(&self, stream: u64, path: u64) -> StdRng {
        StdRng::seed_from_u64(derive_seed(self.base_seed, stream, path))
    }
}

pub fn project(request: &ForecastRequest, limits: &EngineLimits) -> Result<Projection> {
    let months = limits.check_horizon(request.years)?;
    ensure_finite("initial", request.initial)?;
    ensure_finite("monthly", request.monthly_contribution)?;

    let (r_month, i_month) = match request.rates {
        RateSpec::Annual {
            return_pct,
            inflation_pct,
        } => (
            monthly_from_annual(return_pct)?,
            monthly_from_annual(inflation_pct)?,
        ),
        RateSpec::Monthly {
            return_pct,
            inflation_pct,
        } => (
            monthly_from_monthly_pct(return_pct),
            monthly_from_monthly_pct(inflation_pct),
        ),
    };
    if 1.0 + i_month <= 0.0 {
        return Err(EngineError::domain_undefined(
            "monthly inflation at or below -100% leaves nothing to deflate by",
        ));
    }
    let fee_month = monthly_from_annual(request.annual_fee_pct)?;
    let esc_month = monthly_from_annual(request.escalation_pct)?;

    let growth = 1.0 + (r_month - fee_month);
    let mut points = Vec::with_capacity(months as usize + 1);
    let mut balance = request.initial;
    let mut real_factor = 1.0;
    let mut contribution = request.monthly_contribution;
    points.push(TrajectoryPoint {
        month: 0,
        nominal: balance,
        real: balance,
    });

    for month in 1..=months {
        balance = balance * growth + contribution;
        real_factor *= 1.0 + i_month;
        contribution *= 1.0 + esc_month;
        points.push(TrajectoryPoint {
            month,
            nominal: balance,
            real: balance / real_factor,
        });
    }

    let trajectory = Trajectory { points };
    let ending = trajectory.ending();
    if !ending.nominal.is_finite() || !ending.real.is_finite() {
        return Err(EngineError::domain_undefined(
            "projection overflowed; rates are too extreme for the horizon",
        ));
    }

    Ok(Projection {
        trajectory,
        rates: MonthlyRates {
            r_month,
            i_month,
            fee_month,
            esc_month,
        },
    })
}

/// Monthly return model shared by the path simulator and the goal solver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathModel {
    initial: f64,
    contribution: f64,
    months: usize,
    rates: SimulationRates,
    shocks: Normal<f64>,
}

impl PathModel {
    pub(crate) fn from_request(request: &MonteCarloRequest) -> Result<Self> {
        ensure_finite("initial", request.initial)?;
        ensure_finite("monthly", request.monthly_contribution)?;
        if !request.stdev_return_pct.is_finite() || request.stdev_return_pct < 0.0 {
            return Err(EngineError::invalid_input(format!(
                "stdev_annual_return_pct must be a finite value >= 0, got {}",
                request.stdev_return_pct
            )));
        }

        let fee_month = monthly_from_annual(request.annual_fee_pct)?;
        let mean_month = monthly_from_annual(request.mean_return_pct)? - fee_month;
        // i.i.d. monthly shocks: annual stdev scaled by 1/sqrt(12)
        let sigma_month = (request.stdev_return_pct / 100.0) / 12f64.sqrt();
        let i_month = monthly_from_annual(request.inflation_pct)?;
        let esc_month = monthly_from_annual(request.escalation_pct)?;

        let shocks = Normal::new(mean_month, sigma_month)
            .map_err(|e| EngineError::invalid_input(format!("return distribution: {e}")))?;

        Ok(Self {
            initial: request.initial,
            contribution: request.monthly_contribution,
            months: horizon_months(request.years)? as usize,
            rates: SimulationRates {
                mean_month,
                sigma_month,
                i_month,
                fee_month,
                esc_month,
            },
            shocks,
        })
    }

    pub(crate) fn with_contribution(mut self, contribution: f64) -> Self {
        self.contribution = contribution;
        self
    }

    pub(crate) fn months(&self) -> usize {
        self.months
    }

    pub(crate) fn rates(&self) -> SimulationRates {
        self.rates
    }

    fn deflators(&self) -> Vec<f64> {
        let mut factors = Vec::with_capacity(self.months + 1);
        let mut factor = 1.0;
        factors.push(factor);
        for _ in 0..self.months {
            factor *= 1.0 + self.rates.i_month;
            factors.push(factor);
        }
        factors
    }

    fn walk<F: FnMut(usize, f64)>(&self, rng: &mut StdRng, mut visit: F) -> f64 {
        let mut balance = self.initial;
        let mut contribution = self.contribution;
        visit(0, balance);
        for month in 1..=self.months {
            let shock = self.shocks.sample(rng);
            balance = balance * (1.0 + shock) + contribution;
            contribution *= 1.0 + self.rates.esc_month;
            visit(month, balance);
        }
        balance
    }

    /// Real ending balance of each of `simulations` paths, in path order.
    pub(crate) fn ending_real_balances(
        &self,
        simulations: u32,
        source: RandomSource,
        stream: u64,
    ) -> Vec<f64> {
        let deflator = self.deflators().last().copied().unwrap_or(1.0);
        (0..simulations.max(1) as usize)
            .into_par_iter()
            .map(|path| {
                let mut rng = source.path_rng(stream, path as u64);
                self.walk(&mut rng, |_, _| {}) / deflator
            })
            .collect()
    }
}

/// Nominal balances of every simulated path, `simulations` rows by
/// `months + 1` columns, plus the shared deflation factors.
#[derive(Debug, Clone)]
pub struct PathEnsemble {
    simulations: usize,
    months: usize,
    nominal: Vec<f64>,
    deflators: Vec<f64>,
    rates: SimulationRates,
}

impl PathEnsemble {
    pub fn simulations(&self) -> usize {
        self.simulations
    }

    pub fn months(&self) -> usize {
        self.months
    }

    pub fn rates(&self) -> SimulationRates {
        self.rates
    }

    pub fn nominal(&self, path: usize, month: usize) -> f64 {
        self.nominal[path * (self.months + 1) + month]
    }

    pub fn real(&self, path: usize, month: usize) -> f64 {
        self.nominal(path, month) / self.deflators[month]
    }

    pub fn real_column(&self, month: usize) -> Vec<f64> {
        (0..self.simulations)
            .map(|path| self.real(path, month))
            .collect()
    }

    pub fn percentiles_at(&self, month: usize) -> PercentileBand {
        let mut column = self.real_column(month);
        percentile_band(&mut column)
    }

    pub fn goal_outcome(&self, goal: GoalTarget) -> GoalOutcome {
        let year = goal.year.min((self.months / 12) as u32);
        let column = self.real_column(year as usize * 12);
        let (success_probability, mean_shortfall) = success_and_shortfall(&column, goal.amount);
        GoalOutcome {
            target: goal.amount,
            year,
            success_probability,
            mean_shortfall,
            success_ci_half_width: binomial_ci_half_width(
                success_probability,
                self.simulations as u32,
            ),
        }
    }

    pub fn summarize(&self, goal: Option<GoalTarget>) -> SimulationSummary {
        let bands = (0..=self.months)
            .into_par_iter()
            .map(|month| self.percentiles_at(month))
            .collect::<Vec<_>>();

        let mut monthly = PercentileSeries::with_capacity(bands.len());
        for band in &bands {
            monthly.push(*band);
        }

        let yearly = (0..=self.months / 12)
            .map(|year| {
                let band = bands[year * 12];
                YearlyPercentiles {
                    year: year as u32,
                    p5: band.p5,
                    p10: band.p10,
                    p50: band.p50,
                    p90: band.p90,
                    p95: band.p95,
                }
            })
            .collect();

        SimulationSummary {
            months: self.months as u32,
            simulations: self.simulations as u32,
            rates: self.rates,
            ending: bands[self.months],
            monthly,
            yearly,
            goal: goal.map(|g| self.goal_outcome(g)),
        }
    }
}

pub fn simulate_paths(
    request: &MonteCarloRequest,
    limits: &EngineLimits,
    source: RandomSource,
) -> Result<PathEnsemble> {
    let simulations = request.simulations.max(1);
    limits.check_simulation(simulations, request.years)?;
    let model = PathModel::from_request(request)?;

    let columns = model.months() + 1;
    let mut nominal = vec![0.0; simulations as usize * columns];
    nominal
        .par_chunks_mut(columns)
        .enumerate()
        .for_each(|(path, row)| {
            let mut rng = source.path_rng(0, path as u64);
            model.walk(&mut rng, |month, balance| row[month] = balance);
        });

    debug!(
        simulations,
        months = model.months(),
        reproducible = source.is_reproducible(),
        "simulated return paths"
    );

    Ok(PathEnsemble {
        simulations: simulations as usize,
        months: model.months(),
        nominal,
        deflators: model.deflators(),
        rates: model.rates(),
    })
}

pub fn simulate(
    request: &MonteCarloRequest,
    limits: &EngineLimits,
    source: RandomSource,
) -> Result<SimulationSummary> {
    let ensemble = simulate_paths(request, limits, source)?;
    let summary = ensemble.summarize(request.goal);
    if !summary.ending.p95.is_finite() || !summary.ending.p5.is_finite() {
        return Err(EngineError::domain_undefined(
            "simulated balances overflowed; return assumptions are too extreme",
        ));
    }
    Ok(summary)
}

/// Fraction of `values` at or above `target`, and the mean gap of the rest.
pub(crate) fn success_and_shortfall(values: &[f64], target: f64) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut hits = 0_usize;
    let mut shortfall = 0.0;
    for &value in values {
        if value >= target {
            hits += 1;
        } else {
            shortfall += target - value;
        }
    }
    let misses = values.len() - hits;
    let mean_shortfall = if misses == 0 {
        0.0
    } else {
        shortfall / misses as f64
    };
    (hits as f64 / values.len() as f64, mean_shortfall)
}

pub(crate) fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn ensure_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::invalid_input(format!(
            "{field} must be a finite number, got {value}"
        )))
    }
}

fn derive_seed(base_seed: u64, stream: u64, path: u64) -> u64 {
    let mixed = base_seed ^ (stream << 32) ^ path;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentile_band(values: &mut [f64]) -> PercentileBand {
    values.sort_by(|a, b| a.total_cmp(b));
    PercentileBand {
        p5: percentile_sorted(values, 5.0),
        p10: percentile_sorted(values, 10.0),
        p50: percentile_sorted(values, 50.0),
        p90: percentile_sorted(values, 90.0),
        p95: percentile_sorted(values, 95.0),
    }
}

// Linear interpolation between closest ranks, evaluated from whichever end
// is nearer so equal neighbours reproduce exactly and bands stay ordered.
fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        return values[lower];
    }
    let (a, b) = (values[lower], values[upper]);
    let w = rank - lower as f64;
    if w < 0.5 {
        a + (b - a) * w
    } else {
        b - (b - a) * (1.0 - w)
    }
}
