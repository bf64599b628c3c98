use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use fincast::api::{self, AppState, ServerConfig, coerce};
use fincast::cli::{Cli, Command, OfflineArgs};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig {
                port: args.port,
                frontend_origin: args.frontend_origin,
                state: AppState {
                    limits: args.engine.limits(),
                    solver: args.engine.solver_config(),
                },
            };
            api::run_http_server(config)
                .await
                .map_err(|e| format!("server error: {e}"))
        }
        Command::Project(args) => run_offline(&args, |payload, args| {
            to_output(api::compound_response(payload, &args.engine.limits()), args.pretty)
        }),
        Command::Simulate(args) => run_offline(&args, |payload, args| {
            to_output(api::montecarlo_response(payload, &args.engine.limits()), args.pretty)
        }),
        Command::Solve(args) => run_offline(&args, |payload, args| {
            to_output(
                api::goal_response(
                    payload,
                    &args.engine.limits(),
                    &args.engine.solver_config(),
                ),
                args.pretty,
            )
        }),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_offline<F>(args: &OfflineArgs, run: F) -> Result<(), String>
where
    F: FnOnce(&coerce::Payload, &OfflineArgs) -> Result<String, String>,
{
    let raw = read_input(&args.input)?;
    let payload = coerce::parse_payload(&raw);
    let rendered = run(&payload, args)?;
    println!("{rendered}");
    Ok(())
}

fn read_input(path: &str) -> Result<Vec<u8>, String> {
    if path == "-" {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        Ok(buf)
    } else {
        fs::read(path).map_err(|e| format!("failed to read {path}: {e}"))
    }
}

fn to_output<T: Serialize>(result: fincast::core::Result<T>, pretty: bool) -> Result<String, String> {
    let body = result.map_err(|e| e.to_string())?;
    let rendered = if pretty {
        serde_json::to_string_pretty(&body)
    } else {
        serde_json::to_string(&body)
    };
    rendered.map_err(|e| format!("failed to encode response: {e}"))
}
