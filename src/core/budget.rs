use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetInput {
    pub monthly_income: f64,
    pub fixed_expenses: Vec<f64>,
    pub variable_expenses: Vec<f64>,
    pub other_expenses: Vec<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct BudgetSummary {
    pub monthly_income: f64,
    pub fixed_total: f64,
    pub variable_total: f64,
    pub other_total: f64,
    pub total_expenses: f64,
    pub savings: f64,
    pub savings_rate_pct: f64,
}

pub fn summarize_budget(input: &BudgetInput) -> BudgetSummary {
    let fixed_total: f64 = input.fixed_expenses.iter().sum();
    let variable_total: f64 = input.variable_expenses.iter().sum();
    let other_total: f64 = input.other_expenses.iter().sum();
    let total_expenses = fixed_total + variable_total + other_total;
    let savings = input.monthly_income - total_expenses;

    let savings_rate_pct = if input.monthly_income > 0.0 {
        round_to_cents(savings / input.monthly_income * 100.0)
    } else {
        0.0
    };

    BudgetSummary {
        monthly_income: input.monthly_income,
        fixed_total,
        variable_total,
        other_total,
        total_expenses,
        savings,
        savings_rate_pct,
    }
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
