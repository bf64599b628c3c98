use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::core::{EngineLimits, SamplingScheme, SolverConfig};

#[derive(Debug, Parser)]
#[command(
    name = "fincast",
    version,
    about = "Personal-finance forecasting: compound projections, Monte Carlo bands and goal solving"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the JSON HTTP API.
    Serve(ServeArgs),
    /// Deterministic month-by-month projection.
    Project(OfflineArgs),
    /// Monte Carlo percentile bands.
    Simulate(OfflineArgs),
    /// Required monthly contribution for a goal.
    Solve(OfflineArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "PORT", default_value_t = 5001)]
    pub port: u16,
    #[arg(long, env = "FRONTEND_ORIGIN", default_value = "http://localhost:5173")]
    pub frontend_origin: String,
    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Offline commands read the same JSON body the HTTP routes accept.
#[derive(Debug, Args)]
pub struct OfflineArgs {
    #[arg(long, default_value = "-", help = "Request JSON file, or - for stdin")]
    pub input: String,
    #[arg(long)]
    pub pretty: bool,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    #[arg(long, default_value_t = 50_000)]
    pub max_simulations: u32,
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(0..=1_200))]
    pub max_years: u32,
    #[arg(
        long,
        default_value_t = 25_000_000,
        help = "Cap on simulations x (months + 1) for one request"
    )]
    pub max_path_cells: u64,
    #[arg(long, default_value_t = 18, value_parser = clap::value_parser!(u32).range(1..))]
    pub refine_iterations: u32,
    #[arg(long, help = "Wall-clock budget for one goal solve, in milliseconds")]
    pub solver_budget_ms: Option<u64>,
    #[arg(
        long,
        help = "Replay the same paths for every solver evaluation instead of fresh draws"
    )]
    pub common_random_numbers: bool,
}

impl EngineArgs {
    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            max_simulations: self.max_simulations,
            max_years: self.max_years,
            max_path_cells: self.max_path_cells,
        }
    }

    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            refine_iterations: self.refine_iterations,
            sampling: if self.common_random_numbers {
                SamplingScheme::Common
            } else {
                SamplingScheme::Independent
            },
            time_budget: self.solver_budget_ms.map(Duration::from_millis),
            ..SolverConfig::default()
        }
    }
}
