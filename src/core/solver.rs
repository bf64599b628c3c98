use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::engine::{PathModel, RandomSource, binomial_ci_half_width, success_and_shortfall};
use super::error::{EngineError, Result};
use super::rates::monthly_from_annual;
use super::types::{
    EngineLimits, GoalQuery, GoalSolveIteration, GoalSolveResult, MonteCarloRequest, SolveMethod,
};

/// How the Monte Carlo solver draws randomness across its evaluations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplingScheme {
    /// Fresh draws for every evaluation; each success rate carries its own noise.
    Independent,
    /// Every evaluation replays the same paths, so the sampled success rate is
    /// a monotone step function of the contribution.
    Common,
}

#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    pub refine_iterations: u32,
    pub expansion_factor: f64,
    pub cap_multiple: f64,
    pub min_expansion_simulations: u32,
    pub expansion_divisor: u32,
    pub sampling: SamplingScheme,
    pub time_budget: Option<Duration>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            refine_iterations: 18,
            expansion_factor: 1.7,
            cap_multiple: 10.0,
            min_expansion_simulations: 200,
            expansion_divisor: 10,
            sampling: SamplingScheme::Independent,
            time_budget: None,
        }
    }
}

pub fn solve_required_contribution(
    query: &GoalQuery,
    config: &SolverConfig,
    limits: &EngineLimits,
    source: RandomSource,
) -> Result<GoalSolveResult> {
    validate_query(query, config)?;
    match query.method() {
        SolveMethod::MonteCarlo => {
            limits.check_simulation(query.simulations, query.years)?;
            solve_monte_carlo(query, config, limits, source)
        }
        SolveMethod::Deterministic => {
            limits.check_horizon(query.years)?;
            solve_closed_form(query)
        }
    }
}

/// Level first payment of a monthly annuity growing at `esc_m` that, on top of
/// `initial` compounding at `r_m`, reaches `target` after `months` payments.
pub fn growing_annuity_payment(initial: f64, target: f64, months: u32, r_m: f64, esc_m: f64) -> f64 {
    if months == 0 {
        return 0.0;
    }
    let n = months as i32;
    let fv_initial = initial * (1.0 + r_m).powi(n);
    let need = (target - fv_initial).max(0.0);

    let denom = if (r_m - esc_m).abs() < 1e-9 {
        months as f64 * (1.0 + r_m).powi(n - 1)
    } else {
        ((1.0 + r_m).powi(n) - (1.0 + esc_m).powi(n)) / (r_m - esc_m)
    };
    if denom > 0.0 { need / denom } else { 0.0 }
}

fn solve_closed_form(query: &GoalQuery) -> Result<GoalSolveResult> {
    let months = query.months()?;
    let required_monthly = if months == 0 {
        0.0
    } else {
        let r_m = monthly_from_annual(query.mean_return_pct - query.annual_fee_pct)?;
        let esc_m = monthly_from_annual(query.escalation_pct)?;
        growing_annuity_payment(query.initial, query.target, months, r_m, esc_m)
    };
    if !required_monthly.is_finite() {
        return Err(EngineError::domain_undefined(
            "growing annuity has no finite payment for these rates",
        ));
    }

    let message = if months == 0 {
        "No horizon; nothing left to contribute toward.".to_string()
    } else if required_monthly == 0.0 {
        "Initial balance alone reaches the target.".to_string()
    } else {
        "Solved required contribution from the growing-annuity formula.".to_string()
    };

    Ok(GoalSolveResult {
        required_monthly,
        method: SolveMethod::Deterministic,
        used_simulations: None,
        achieved_success_rate: None,
        success_ci_half_width: None,
        target_reachable: true,
        timed_out: false,
        iterations: Vec::new(),
        message,
    })
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

struct Oracle {
    model: PathModel,
    target: f64,
    source: RandomSource,
    sampling: SamplingScheme,
    evaluations: u64,
    deadline: Option<Instant>,
}

impl Oracle {
    fn out_of_time(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn evaluate(&mut self, contribution: f64, simulations: u32) -> CandidateEval {
        let stream = match self.sampling {
            SamplingScheme::Independent => self.evaluations,
            SamplingScheme::Common => 0,
        };
        self.evaluations += 1;

        let endings = self
            .model
            .with_contribution(contribution)
            .ending_real_balances(simulations, self.source, stream);
        let (success_rate, _) = success_and_shortfall(&endings, self.target);
        CandidateEval {
            success_rate,
            success_ci_half_width: binomial_ci_half_width(success_rate, endings.len() as u32),
        }
    }
}

fn solve_monte_carlo(
    query: &GoalQuery,
    config: &SolverConfig,
    limits: &EngineLimits,
    source: RandomSource,
) -> Result<GoalSolveResult> {
    let base = MonteCarloRequest {
        initial: query.initial,
        monthly_contribution: 0.0,
        years: query.years,
        mean_return_pct: query.mean_return_pct,
        stdev_return_pct: query.stdev_return_pct,
        inflation_pct: query.inflation_pct,
        annual_fee_pct: query.annual_fee_pct,
        escalation_pct: query.escalation_pct,
        simulations: query.simulations,
        seed: query.seed,
        goal: None,
    };
    let mut oracle = Oracle {
        model: PathModel::from_request(&base)?,
        target: query.target,
        source,
        sampling: config.sampling,
        evaluations: 0,
        deadline: config.time_budget.map(|budget| Instant::now() + budget),
    };

    let simulations = query.simulations.max(1);
    let expansion_simulations = config
        .min_expansion_simulations
        .max(simulations / config.expansion_divisor.max(1))
        .min(limits.max_simulations)
        .max(1);
    let target_prob = query.target_prob;

    let mut iterations = Vec::new();
    let mut iteration = 0;
    let mut record = |lo: f64, hi: f64, candidate: f64, sims: u32, eval: CandidateEval| {
        iteration += 1;
        iterations.push(GoalSolveIteration {
            iteration,
            lower_bound: lo,
            upper_bound: hi,
            candidate_value: candidate,
            simulations: sims,
            success_rate: eval.success_rate,
            success_ci_half_width: eval.success_ci_half_width,
        });
    };

    let mut lo = 0.0;
    let mut hi = (query.target / query.years.max(1) as f64).max(1.0);
    let mut hi_eval = None;
    let mut hi_simulations = None;
    let mut timed_out = false;
    let mut target_reachable = false;
    let mut already_met = false;

    if oracle.out_of_time() {
        timed_out = true;
    } else {
        let low_eval = oracle.evaluate(0.0, expansion_simulations);
        record(lo, hi, 0.0, expansion_simulations, low_eval);
        if low_eval.success_rate + 1e-12 >= target_prob {
            // A pass on the reduced sample only counts once the full sample agrees.
            let confirmed = if expansion_simulations == simulations {
                Some(low_eval)
            } else if oracle.out_of_time() {
                timed_out = true;
                None
            } else {
                let eval = oracle.evaluate(0.0, simulations);
                record(lo, hi, 0.0, simulations, eval);
                (eval.success_rate + 1e-12 >= target_prob).then_some(eval)
            };
            if let Some(eval) = confirmed {
                hi = 0.0;
                hi_eval = Some(eval);
                hi_simulations = Some(simulations);
                target_reachable = true;
                already_met = true;
            }
        }
    }

    if !timed_out && !already_met {
        let cap = config.cap_multiple * query.target;
        loop {
            if oracle.out_of_time() {
                timed_out = true;
                break;
            }
            let eval = oracle.evaluate(hi, expansion_simulations);
            record(lo, hi, hi, expansion_simulations, eval);
            if eval.success_rate + 1e-12 >= target_prob {
                hi_eval = Some(eval);
                hi_simulations = Some(expansion_simulations);
                target_reachable = true;
                break;
            }
            if hi > cap {
                break;
            }
            hi *= config.expansion_factor;
        }
    }

    // Fixed iteration budget: the sampled success rate is noisy, so a
    // tolerance test on it cannot be relied on to terminate.
    if target_reachable && !already_met {
        for _ in 0..config.refine_iterations {
            if oracle.out_of_time() {
                timed_out = true;
                break;
            }
            let mid = (lo + hi) * 0.5;
            let eval = oracle.evaluate(mid, simulations);
            record(lo, hi, mid, simulations, eval);
            if eval.success_rate + 1e-12 >= target_prob {
                hi = mid;
                hi_eval = Some(eval);
                hi_simulations = Some(simulations);
            } else {
                lo = mid;
            }
        }
    }

    let message = if already_met {
        "Already meets target probability with no contribution.".to_string()
    } else if !target_reachable && !timed_out {
        warn!(
            target = query.target,
            target_prob,
            capped_bound = hi,
            "contribution search hit its cap without reaching the target probability"
        );
        "Target probability not reached even at the capped contribution; returning the cap."
            .to_string()
    } else if timed_out {
        warn!(evaluations = oracle.evaluations, "goal solver ran out of time");
        "Time budget exhausted; returning the best upper bound found so far.".to_string()
    } else {
        "Solved required contribution by Monte Carlo bisection.".to_string()
    };

    // Without a passing evaluation the answer rests on the largest sample drawn.
    let used_simulations =
        hi_simulations.or_else(|| iterations.iter().map(|it| it.simulations).max());

    debug!(
        required_monthly = hi,
        evaluations = oracle.evaluations,
        simulations,
        "monte carlo goal solve finished"
    );

    Ok(GoalSolveResult {
        required_monthly: hi,
        method: SolveMethod::MonteCarlo,
        used_simulations,
        achieved_success_rate: hi_eval.map(|e| e.success_rate),
        success_ci_half_width: hi_eval.map(|e| e.success_ci_half_width),
        target_reachable,
        timed_out,
        iterations,
        message,
    })
}

fn validate_query(query: &GoalQuery, config: &SolverConfig) -> Result<()> {
    for (name, value) in [
        ("target", query.target),
        ("initial", query.initial),
        ("target_prob", query.target_prob),
    ] {
        if !value.is_finite() {
            return Err(EngineError::invalid_input(format!(
                "{name} must be a finite number, got {value}"
            )));
        }
    }
    if query.method() == SolveMethod::MonteCarlo {
        if query.target_prob > 1.0 {
            return Err(EngineError::invalid_input(
                "target_prob must be between 0 and 1",
            ));
        }
        if config.refine_iterations == 0 {
            return Err(EngineError::invalid_input(
                "refine_iterations must be at least 1",
            ));
        }
    }
    if !config.expansion_factor.is_finite() || config.expansion_factor <= 1.0 {
        return Err(EngineError::invalid_input("expansion_factor must be > 1"));
    }
    if !config.cap_multiple.is_finite() || config.cap_multiple <= 0.0 {
        return Err(EngineError::invalid_input("cap_multiple must be > 0"));
    }
    Ok(())
}
