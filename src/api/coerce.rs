//! Lenient request decoding: every field falls back to its default instead of
//! failing the request, and alternate key spellings are honoured.

use serde_json::{Map, Value};

use crate::core::{
    BudgetInput, ForecastRequest, GoalQuery, GoalTarget, LoanInput, LoanMode, MonteCarloRequest,
    RateSpec,
};

pub type Payload = Map<String, Value>;

pub const DEFAULT_ANNUAL_RETURN_PCT: f64 = 7.0;
pub const DEFAULT_ANNUAL_INFLATION_PCT: f64 = 2.5;
pub const DEFAULT_STDEV_PCT: f64 = 15.0;
pub const DEFAULT_MC_SIMULATIONS: f64 = 1000.0;

const MONTHLY_KEYS: &[&str] = &["monthly", "monthly_contrib"];
const ESCALATION_KEYS: &[&str] = &["contrib_escalation_pct", "contribution_escalation_pct"];

/// Invalid JSON and non-object bodies decode as an empty payload.
pub fn parse_payload(body: &[u8]) -> Payload {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// First alias that holds a usable number wins.
pub fn number(payload: &Payload, keys: &[&str], default: f64) -> f64 {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find_map(coerce_f64)
        .unwrap_or(default)
}

fn whole(payload: &Payload, keys: &[&str], default: f64) -> f64 {
    number(payload, keys, default).trunc()
}

fn years(payload: &Payload) -> u32 {
    whole(payload, &["years"], 0.0).clamp(0.0, u32::MAX as f64) as u32
}

/// Zero, negative or unusable seeds mean "unseeded".
fn seed(payload: &Payload) -> u64 {
    let value = whole(payload, &["seed"], 0.0);
    if value > 0.0 { value as u64 } else { 0 }
}

fn text<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn number_list(payload: &Payload, key: &str) -> Vec<f64> {
    match payload.get(key) {
        Some(Value::Array(items)) => items.iter().map(|v| coerce_f64(v).unwrap_or(0.0)).collect(),
        _ => Vec::new(),
    }
}

pub fn forecast_request(payload: &Payload) -> ForecastRequest {
    let monthly_mode = text(payload, "rate_mode")
        .map(|mode| mode.trim().eq_ignore_ascii_case("monthly"))
        .unwrap_or(false);
    let rates = if monthly_mode {
        RateSpec::Monthly {
            return_pct: number(payload, &["monthly_return_pct"], 0.0),
            inflation_pct: number(payload, &["monthly_inflation_pct"], 0.0),
        }
    } else {
        RateSpec::Annual {
            return_pct: number(payload, &["annual_return_pct"], DEFAULT_ANNUAL_RETURN_PCT),
            inflation_pct: number(
                payload,
                &["annual_inflation_pct"],
                DEFAULT_ANNUAL_INFLATION_PCT,
            ),
        }
    };

    ForecastRequest {
        initial: number(payload, &["initial"], 0.0),
        monthly_contribution: number(payload, MONTHLY_KEYS, 0.0),
        years: years(payload),
        rates,
        annual_fee_pct: number(payload, &["annual_fee_pct"], 0.0),
        escalation_pct: number(payload, ESCALATION_KEYS, 0.0),
    }
}

pub fn monte_carlo_request(payload: &Payload) -> MonteCarloRequest {
    let years = years(payload);
    let simulations = whole(payload, &["simulations"], DEFAULT_MC_SIMULATIONS)
        .clamp(1.0, u32::MAX as f64) as u32;
    let goal = ["goal_target", "goal_amount"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find_map(coerce_f64)
        .map(|amount| GoalTarget {
            amount,
            year: whole(payload, &["goal_year"], years as f64).clamp(0.0, u32::MAX as f64) as u32,
        });

    MonteCarloRequest {
        initial: number(payload, &["initial"], 0.0),
        monthly_contribution: number(payload, MONTHLY_KEYS, 0.0),
        years,
        mean_return_pct: number(
            payload,
            &["mean_annual_return_pct"],
            DEFAULT_ANNUAL_RETURN_PCT,
        ),
        stdev_return_pct: number(payload, &["stdev_annual_return_pct"], DEFAULT_STDEV_PCT)
            .max(0.0),
        inflation_pct: number(
            payload,
            &["annual_inflation_pct"],
            DEFAULT_ANNUAL_INFLATION_PCT,
        ),
        annual_fee_pct: number(payload, &["annual_fee_pct"], 0.0),
        escalation_pct: number(payload, ESCALATION_KEYS, 0.0),
        simulations,
        seed: seed(payload),
        goal,
    }
}

pub fn goal_query(payload: &Payload) -> GoalQuery {
    GoalQuery {
        target: number(payload, &["target", "target_amount"], 0.0),
        target_prob: number(payload, &["target_prob"], 0.0).clamp(0.0, 1.0),
        years: years(payload),
        initial: number(payload, &["initial"], 0.0),
        mean_return_pct: number(
            payload,
            &["mean_annual_return_pct", "annual_return_pct"],
            DEFAULT_ANNUAL_RETURN_PCT,
        ),
        stdev_return_pct: number(payload, &["stdev_annual_return_pct"], DEFAULT_STDEV_PCT)
            .max(0.0),
        inflation_pct: number(
            payload,
            &["annual_inflation_pct"],
            DEFAULT_ANNUAL_INFLATION_PCT,
        ),
        annual_fee_pct: number(payload, &["annual_fee_pct"], 0.0),
        escalation_pct: number(payload, ESCALATION_KEYS, 0.0),
        simulations: whole(payload, &["simulations"], 0.0).clamp(0.0, u32::MAX as f64) as u32,
        seed: seed(payload),
    }
}

pub fn budget_input(payload: &Payload) -> BudgetInput {
    BudgetInput {
        monthly_income: number(payload, &["monthly_income"], 0.0),
        fixed_expenses: number_list(payload, "fixed_expenses"),
        variable_expenses: number_list(payload, "variable_expenses"),
        other_expenses: number_list(payload, "other_expenses"),
    }
}

pub fn loan_input(payload: &Payload) -> LoanInput {
    let mode = match text(payload, "mode") {
        Some(mode) if mode.trim().eq_ignore_ascii_case("term") => LoanMode::Term,
        _ => LoanMode::Payment,
    };
    LoanInput {
        mode,
        principal: number(payload, &["principal"], 0.0).max(0.0),
        apr_pct: number(payload, &["apr", "apr_pct", "rate"], 0.0).clamp(0.0, 100.0),
        years: number(payload, &["years"], 30.0).clamp(1.0, 50.0),
        payments_per_year: number(payload, &["freq", "payments_per_year"], 12.0)
            .round()
            .clamp(1.0, 52.0) as u32,
        extra_payment: number(payload, &["extra", "extra_payment"], 0.0).max(0.0),
        desired_payment: number(payload, &["desired_payment", "desiredPayment"], 0.0).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn garbage_bodies_decode_as_empty() {
        assert!(parse_payload(b"not json").is_empty());
        assert!(parse_payload(b"[1, 2, 3]").is_empty());
        assert!(parse_payload(b"").is_empty());
        assert_eq!(parse_payload(br#"{"years": 3}"#).len(), 1);
    }

    #[test]
    fn numbers_strings_and_bools_are_coerced() {
        assert_eq!(coerce_f64(&json!(4.5)), Some(4.5));
        assert_eq!(coerce_f64(&json!(" 12 ")), Some(12.0));
        assert_eq!(coerce_f64(&json!(true)), Some(1.0));
        assert_eq!(coerce_f64(&json!(false)), Some(0.0));
        assert_eq!(coerce_f64(&json!(null)), None);
        assert_eq!(coerce_f64(&json!("abc")), None);
        assert_eq!(coerce_f64(&json!("NaN")), None);
        assert_eq!(coerce_f64(&json!("inf")), None);
        assert_eq!(coerce_f64(&json!([1])), None);
    }

    #[test]
    fn forecast_defaults_to_annual_seven_and_two_and_a_half() {
        let request = forecast_request(&Payload::new());
        assert_eq!(request.years, 0);
        assert_eq!(request.initial, 0.0);
        assert_eq!(
            request.rates,
            RateSpec::Annual {
                return_pct: 7.0,
                inflation_pct: 2.5
            }
        );
    }

    #[test]
    fn forecast_honours_monthly_mode_and_aliases() {
        let request = forecast_request(&payload(json!({
            "rate_mode": "Monthly",
            "monthly_return_pct": "0.5",
            "monthly_contrib": 250,
            "contribution_escalation_pct": 3,
            "years": "20.9",
            "annual_fee_pct": null,
        })));
        assert_eq!(
            request.rates,
            RateSpec::Monthly {
                return_pct: 0.5,
                inflation_pct: 0.0
            }
        );
        assert_eq!(request.monthly_contribution, 250.0);
        assert_eq!(request.escalation_pct, 3.0);
        assert_eq!(request.years, 20);
        assert_eq!(request.annual_fee_pct, 0.0);
    }

    #[test]
    fn negative_years_clamp_to_zero() {
        let request = forecast_request(&payload(json!({ "years": -4 })));
        assert_eq!(request.years, 0);
    }

    #[test]
    fn first_usable_alias_wins() {
        let p = payload(json!({ "monthly": "oops", "monthly_contrib": 80 }));
        assert_eq!(number(&p, MONTHLY_KEYS, 0.0), 80.0);
        let p = payload(json!({ "monthly": 10, "monthly_contrib": 80 }));
        assert_eq!(number(&p, MONTHLY_KEYS, 0.0), 10.0);
    }

    #[test]
    fn monte_carlo_defaults_and_clamps() {
        let request = monte_carlo_request(&Payload::new());
        assert_eq!(request.simulations, 1000);
        assert_eq!(request.mean_return_pct, 7.0);
        assert_eq!(request.stdev_return_pct, 15.0);
        assert_eq!(request.inflation_pct, 2.5);
        assert_eq!(request.seed, 0);
        assert!(request.goal.is_none());

        let request = monte_carlo_request(&payload(json!({
            "simulations": 0,
            "stdev_annual_return_pct": -3,
            "seed": -7,
            "years": 10,
            "goal_target": 50000,
        })));
        assert_eq!(request.simulations, 1);
        assert_eq!(request.stdev_return_pct, 0.0);
        assert_eq!(request.seed, 0);
        assert_eq!(
            request.goal,
            Some(GoalTarget {
                amount: 50_000.0,
                year: 10
            })
        );
    }

    #[test]
    fn goal_query_reads_alias_keys() {
        let query = goal_query(&payload(json!({
            "target_amount": 100000,
            "annual_return_pct": 5,
            "target_prob": 1.7,
            "simulations": "500",
            "seed": 42.9,
        })));
        assert_eq!(query.target, 100_000.0);
        assert_eq!(query.mean_return_pct, 5.0);
        assert_eq!(query.target_prob, 1.0);
        assert_eq!(query.simulations, 500);
        assert_eq!(query.seed, 42);

        let query = goal_query(&Payload::new());
        assert_eq!(query.simulations, 0);
        assert_eq!(query.target_prob, 0.0);
    }

    #[test]
    fn budget_lists_coerce_each_entry() {
        let input = budget_input(&payload(json!({
            "monthly_income": "3000",
            "fixed_expenses": [1000, "200", null, "x"],
            "variable_expenses": "not a list",
        })));
        assert_eq!(input.monthly_income, 3_000.0);
        assert_eq!(input.fixed_expenses, vec![1_000.0, 200.0, 0.0, 0.0]);
        assert!(input.variable_expenses.is_empty());
        assert!(input.other_expenses.is_empty());
    }

    #[test]
    fn loan_input_clamps_like_the_calculator_form() {
        let input = loan_input(&payload(json!({
            "mode": "term",
            "principal": -5,
            "rate": 250,
            "freq": 0,
            "desiredPayment": 900,
        })));
        assert_eq!(input.mode, LoanMode::Term);
        assert_eq!(input.principal, 0.0);
        assert_eq!(input.apr_pct, 100.0);
        assert_eq!(input.payments_per_year, 1);
        assert_eq!(input.desired_payment, 900.0);

        let input = loan_input(&Payload::new());
        assert_eq!(input.mode, LoanMode::Payment);
        assert_eq!(input.payments_per_year, 12);
        assert_eq!(input.years, 30.0);
    }
}
