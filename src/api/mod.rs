pub mod coerce;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::core::{
    BudgetSummary, EngineError, EngineLimits, GoalOutcome, GoalSolveIteration, LoanMode,
    LoanSchedule, MonthlyRates, PercentileBand, RandomSource, Result, SimulationRates, SolveMethod,
    SolverConfig, YearlyPercentiles, amortize, project, simulate, solve_required_contribution,
    summarize_budget,
};
use coerce::Payload;

const LOCAL_FRONTEND_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub limits: EngineLimits,
    pub solver: SolverConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub frontend_origin: String,
    pub state: AppState,
}

#[derive(Debug, Serialize)]
pub struct CompoundResponse {
    pub months: Vec<u32>,
    pub balances_nominal: Vec<f64>,
    pub balances_real: Vec<f64>,
    pub ending_nominal: f64,
    pub ending_real: f64,
    pub meta: MonthlyRates,
    pub inputs: Payload,
}

#[derive(Debug, Serialize)]
pub struct MonteCarloResponse {
    pub months: u32,
    pub simulations: u32,
    pub p5: Vec<f64>,
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
    pub p95: Vec<f64>,
    pub ending: PercentileBand,
    pub years: Vec<u32>,
    pub yearly_percentiles: Vec<YearlyPercentiles>,
    pub meta: SimulationRates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<GoalOutcome>,
    pub seeded: bool,
    pub inputs: Payload,
}

#[derive(Debug, Serialize)]
pub struct GoalResponse {
    pub required_monthly: f64,
    pub method: SolveMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_simulations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achieved_success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_ci_half_width: Option<f64>,
    pub target_reachable: bool,
    pub timed_out: bool,
    pub message: String,
    pub iterations: Vec<GoalSolveIteration>,
    pub inputs: Payload,
}

#[derive(Debug, Serialize)]
pub struct LoanResponse {
    pub mode: LoanMode,
    #[serde(flatten)]
    pub result: LoanSchedule,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn compound_response(payload: &Payload, limits: &EngineLimits) -> Result<CompoundResponse> {
    let request = coerce::forecast_request(payload);
    let projection = project(&request, limits)?;
    let ending = projection.trajectory.ending();
    Ok(CompoundResponse {
        months: projection.trajectory.months(),
        balances_nominal: projection.trajectory.nominal(),
        balances_real: projection.trajectory.real(),
        ending_nominal: ending.nominal,
        ending_real: ending.real,
        meta: projection.rates,
        inputs: payload.clone(),
    })
}

pub fn montecarlo_response(
    payload: &Payload,
    limits: &EngineLimits,
) -> Result<MonteCarloResponse> {
    let request = coerce::monte_carlo_request(payload);
    let source = RandomSource::from_request_seed(request.seed);
    let summary = simulate(&request, limits, source)?;
    Ok(MonteCarloResponse {
        months: summary.months,
        simulations: summary.simulations,
        p5: summary.monthly.p5,
        p10: summary.monthly.p10,
        p50: summary.monthly.p50,
        p90: summary.monthly.p90,
        p95: summary.monthly.p95,
        ending: summary.ending,
        years: summary.yearly.iter().map(|row| row.year).collect(),
        yearly_percentiles: summary.yearly,
        meta: summary.rates,
        goal: summary.goal,
        seeded: source.is_reproducible(),
        inputs: payload.clone(),
    })
}

pub fn goal_response(
    payload: &Payload,
    limits: &EngineLimits,
    solver: &SolverConfig,
) -> Result<GoalResponse> {
    let query = coerce::goal_query(payload);
    let source = RandomSource::from_request_seed(query.seed);
    let solved = solve_required_contribution(&query, solver, limits, source)?;
    Ok(GoalResponse {
        required_monthly: solved.required_monthly,
        method: solved.method,
        used_simulations: solved.used_simulations,
        achieved_success_rate: solved.achieved_success_rate,
        success_ci_half_width: solved.success_ci_half_width,
        target_reachable: solved.target_reachable,
        timed_out: solved.timed_out,
        message: solved.message,
        iterations: solved.iterations,
        inputs: payload.clone(),
    })
}

pub fn budget_response(payload: &Payload) -> BudgetSummary {
    summarize_budget(&coerce::budget_input(payload))
}

pub fn loan_response(payload: &Payload) -> Result<LoanResponse> {
    let input = coerce::loan_input(payload);
    Ok(LoanResponse {
        mode: input.mode,
        result: amortize(&input)?,
    })
}

pub fn router(state: AppState, frontend_origin: &str) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/forecast/compound", post(compound_handler))
        .route("/api/forecast/montecarlo", post(montecarlo_handler))
        .route("/api/goal/required-contribution", post(goal_handler))
        .route("/api/budget/summary", post(budget_handler))
        .route("/api/loan/amortize", post(loan_handler))
        .fallback(not_found_handler)
        .layer(cors_layer(frontend_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(config.state, &config.frontend_origin);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, frontend_origin = %config.frontend_origin, "forecast API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn cors_layer(frontend_origin: &str) -> CorsLayer {
    let mut origins = vec![HeaderValue::from_static(LOCAL_FRONTEND_ORIGIN)];
    if frontend_origin != LOCAL_FRONTEND_ORIGIN {
        match HeaderValue::from_str(frontend_origin) {
            Ok(origin) => origins.push(origin),
            Err(e) => warn!(frontend_origin, error = %e, "ignoring unusable frontend origin"),
        }
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            time: chrono::Utc::now().to_rfc3339(),
        },
    )
}

async fn compound_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload = coerce::parse_payload(&body);
    respond(compound_response(&payload, &state.limits))
}

async fn montecarlo_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload = coerce::parse_payload(&body);
    let limits = state.limits;
    run_blocking(move || montecarlo_response(&payload, &limits)).await
}

async fn goal_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload = coerce::parse_payload(&body);
    let (limits, solver) = (state.limits, state.solver);
    run_blocking(move || goal_response(&payload, &limits, &solver)).await
}

async fn budget_handler(body: Bytes) -> Response {
    let payload = coerce::parse_payload(&body);
    json_response(StatusCode::OK, budget_response(&payload))
}

async fn loan_handler(body: Bytes) -> Response {
    let payload = coerce::parse_payload(&body);
    respond(loan_response(&payload))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

/// Runs CPU-bound engine work off the async workers.
async fn run_blocking<T, F>(work: F) -> Response
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => respond(result),
        Err(e) => {
            error!(error = %e, "engine task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => {
            let status = status_for(&err);
            warn!(%status, error = %err, "request rejected");
            error_response(status, &err.to_string())
        }
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        EngineError::DomainUndefined { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::ResourceExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::default(), LOCAL_FRONTEND_ORIGIN)
    }

    async fn call(method: Method, uri: &str, body: &str) -> (StatusCode, Response) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app().oneshot(request).await.expect("router is infallible");
        (response.status(), response)
    }

    async fn post_json(uri: &str, body: Value) -> (StatusCode, Value) {
        let (status, response) = call(Method::POST, uri, &body.to_string()).await;
        (status, read_json(response).await)
    }

    async fn read_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn as_f64(value: &Value) -> f64 {
        value.as_f64().expect("number")
    }

    #[tokio::test]
    async fn health_reports_ok_with_timestamp() {
        let (status, response) = call(Method::GET, "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        let body = read_json(response).await;
        assert_eq!(body["status"], "ok");
        let time = body["time"].as_str().expect("time string");
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
    }

    #[tokio::test]
    async fn compound_returns_series_meta_and_echoed_inputs() {
        let (status, body) = post_json(
            "/api/forecast/compound",
            json!({
                "initial": 0,
                "monthly": "1000",
                "years": 10,
                "rate_mode": "monthly",
                "monthly_return_pct": 0.5,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["months"].as_array().expect("months").len(), 121);
        assert_eq!(body["balances_nominal"].as_array().expect("series").len(), 121);
        assert!((as_f64(&body["ending_nominal"]) - 163_879.346_8).abs() < 0.01);
        assert_eq!(as_f64(&body["ending_real"]), as_f64(&body["ending_nominal"]));
        assert!((as_f64(&body["meta"]["r_month"]) - 0.005).abs() < 1e-15);
        assert_eq!(body["inputs"]["monthly"], "1000");
    }

    #[tokio::test]
    async fn garbage_body_falls_back_to_defaults() {
        let (status, response) = call(Method::POST, "/api/forecast/compound", "{{nope").await;
        assert_eq!(status, StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["months"], json!([0]));
        assert_eq!(body["ending_nominal"], 0.0);
        assert_eq!(body["inputs"], json!({}));
    }

    #[tokio::test]
    async fn montecarlo_is_reproducible_with_a_seed() {
        let request = json!({
            "initial": 10000,
            "monthly": 300,
            "years": 5,
            "simulations": 200,
            "seed": 17,
            "goal_target": 30000,
        });
        let (status, first) = post_json("/api/forecast/montecarlo", request.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = post_json("/api/forecast/montecarlo", request).await;
        assert_eq!(first, second);

        assert_eq!(first["months"], 60);
        assert_eq!(first["seeded"], true);
        assert_eq!(first["p50"].as_array().expect("p50").len(), 61);
        assert_eq!(first["years"], json!([0, 1, 2, 3, 4, 5]));
        assert_eq!(
            first["yearly_percentiles"].as_array().expect("yearly").len(),
            6
        );
        assert_eq!(as_f64(&first["p5"][0]), 10_000.0);
        assert!(as_f64(&first["ending"]["p5"]) <= as_f64(&first["ending"]["p95"]));
        let probability = as_f64(&first["goal"]["success_probability"]);
        assert!((0.0..=1.0).contains(&probability));
    }

    #[tokio::test]
    async fn oversized_simulation_is_rejected_with_413() {
        let (status, body) = post_json(
            "/api/forecast/montecarlo",
            json!({ "years": 100, "simulations": 49_000 }),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().expect("message").contains("path cells"));
    }

    #[tokio::test]
    async fn undefined_rate_is_rejected_with_422() {
        let (status, body) = post_json(
            "/api/forecast/compound",
            json!({ "years": 1, "annual_return_pct": -150 }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn goal_uses_closed_form_without_simulations() {
        let (status, body) = post_json(
            "/api/goal/required-contribution",
            json!({ "target": 100000, "years": 10, "annual_return_pct": 6 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "deterministic");
        assert!((as_f64(&body["required_monthly"]) - 615.485_205).abs() < 1e-3);
        assert!(body.get("used_simulations").is_none());
        assert_eq!(body["inputs"]["target"], 100000);
    }

    #[tokio::test]
    async fn goal_runs_monte_carlo_when_asked() {
        let (status, body) = post_json(
            "/api/goal/required-contribution",
            json!({
                "target": 150000,
                "years": 12,
                "simulations": 200,
                "target_prob": 0.75,
                "seed": 3,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "montecarlo");
        assert_eq!(body["used_simulations"], 200);
        assert_eq!(body["target_reachable"], true);
        assert!(as_f64(&body["required_monthly"]) > 0.0);
        assert!(as_f64(&body["achieved_success_rate"]) >= 0.75);
    }

    #[tokio::test]
    async fn budget_summary_reports_totals_and_rate() {
        let (status, body) = post_json(
            "/api/budget/summary",
            json!({
                "monthly_income": 5000,
                "fixed_expenses": [2000],
                "variable_expenses": ["500", 250],
                "other_expenses": [],
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_expenses"], 2750.0);
        assert_eq!(body["savings"], 2250.0);
        assert_eq!(body["savings_rate_pct"], 45.0);
    }

    #[tokio::test]
    async fn loan_schedule_is_returned_with_totals() {
        let (status, body) = post_json(
            "/api/loan/amortize",
            json!({ "principal": 12000, "apr": 0, "years": 2, "freq": 12 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "payment");
        assert_eq!(body["periods"], 24);
        assert_eq!(body["payment"], 500.0);
        assert_eq!(body["schedule"].as_array().expect("rows").len(), 24);
        assert_eq!(body["never_amortizes"], false);
    }

    #[tokio::test]
    async fn unknown_route_is_404_json() {
        let (status, response) = call(Method::GET, "/api/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body = read_json(response).await;
        assert_eq!(body["error"], "Not found");
    }

    #[tokio::test]
    async fn cors_allows_the_local_frontend() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/forecast/compound")
            .header(header::ORIGIN, LOCAL_FRONTEND_ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .expect("request");
        let response = app().oneshot(request).await.expect("router is infallible");
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some(LOCAL_FRONTEND_ORIGIN)
        );
    }
}
