use serde::Serialize;

use super::error::{EngineError, Result};
use super::rates::fraction;

const HARD_CAP_PERIODS: u32 = 72_000;
/// Once a payment stops covering interest the schedule is cut off here.
const STALLED_PERIOD_LIMIT: u32 = 600;
const PAID_OFF_BALANCE: f64 = 0.01;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanMode {
    /// Solve the level payment that clears the loan over `years`.
    Payment,
    /// Pay `desired_payment` each period and see how long it takes.
    Term,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoanInput {
    pub mode: LoanMode,
    pub principal: f64,
    pub apr_pct: f64,
    pub years: f64,
    pub payments_per_year: u32,
    pub extra_payment: f64,
    pub desired_payment: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct AmortizationRow {
    pub period: u32,
    pub payment: f64,
    pub interest: f64,
    pub principal: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanSchedule {
    pub payment: f64,
    pub periods: u32,
    pub total_paid: f64,
    pub total_interest: f64,
    pub never_amortizes: bool,
    pub paid_off: bool,
    pub schedule: Vec<AmortizationRow>,
}

pub fn amortize(input: &LoanInput) -> Result<LoanSchedule> {
    validate(input)?;

    let freq = input.payments_per_year as f64;
    let rate = fraction(input.apr_pct) / freq;
    let base_payment = match input.mode {
        LoanMode::Payment => level_payment(input.principal, rate, input.years, freq),
        LoanMode::Term => input.desired_payment,
    };
    let payment = base_payment + input.extra_payment;

    let mut schedule = Vec::new();
    let mut balance = input.principal;
    let mut never_amortizes = false;
    let mut period = 0;

    while balance > PAID_OFF_BALANCE && period < HARD_CAP_PERIODS {
        period += 1;
        let interest = rate * balance;
        let mut principal = payment - interest;

        // Unpaid interest is not capitalised; the balance just stops moving.
        if principal <= 0.0 {
            never_amortizes = true;
            if period > STALLED_PERIOD_LIMIT {
                break;
            }
            principal = 0.0;
        }

        let final_payment = principal > balance;
        principal = principal.min(balance);
        balance = (balance - principal).max(0.0);

        schedule.push(AmortizationRow {
            period,
            payment: if final_payment {
                interest + principal
            } else {
                payment
            },
            interest,
            principal,
            balance,
        });
    }

    let total_paid = schedule.iter().map(|row| row.payment).sum();
    let total_interest = schedule.iter().map(|row| row.interest).sum();

    Ok(LoanSchedule {
        payment,
        periods: schedule.len() as u32,
        total_paid,
        total_interest,
        never_amortizes,
        paid_off: balance <= PAID_OFF_BALANCE,
        schedule,
    })
}

fn level_payment(principal: f64, rate: f64, years: f64, freq: f64) -> f64 {
    let periods = (years.max(1.0) * freq).round();
    if rate == 0.0 {
        principal / periods
    } else {
        principal * rate / (1.0 - (1.0 + rate).powf(-periods))
    }
}

fn validate(input: &LoanInput) -> Result<()> {
    for (name, value) in [
        ("principal", input.principal),
        ("apr_pct", input.apr_pct),
        ("years", input.years),
        ("extra_payment", input.extra_payment),
        ("desired_payment", input.desired_payment),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::invalid_input(format!(
                "{name} must be a finite value >= 0, got {value}"
            )));
        }
    }
    if input.payments_per_year == 0 {
        return Err(EngineError::invalid_input("payments_per_year must be >= 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mortgage() -> LoanInput {
        LoanInput {
            mode: LoanMode::Payment,
            principal: 250_000.0,
            apr_pct: 6.5,
            years: 30.0,
            payments_per_year: 12,
            extra_payment: 0.0,
            desired_payment: 0.0,
        }
    }

    #[test]
    fn thirty_year_mortgage_pays_off_in_360_periods() {
        let loan = amortize(&mortgage()).expect("valid loan");
        assert!((loan.payment - 1_580.170_058_7).abs() < 1e-6);
        assert_eq!(loan.periods, 360);
        assert!(loan.paid_off);
        assert!(!loan.never_amortizes);
        assert!((loan.total_interest - 318_861.22).abs() < 0.01);
        assert!((loan.total_paid - 568_861.22).abs() < 0.01);
        let last = loan.schedule.last().expect("rows");
        assert_eq!(last.balance, 0.0);
    }

    #[test]
    fn extra_payment_shortens_the_schedule() {
        let mut input = mortgage();
        input.extra_payment = 200.0;
        let loan = amortize(&input).expect("valid loan");
        assert_eq!(loan.periods, 265);
        assert!((loan.total_interest - 221_243.10).abs() < 0.01);
        assert!(loan.paid_off);
    }

    #[test]
    fn final_row_pays_only_what_is_left() {
        let input = LoanInput {
            mode: LoanMode::Term,
            principal: 1_000.0,
            apr_pct: 0.0,
            years: 0.0,
            payments_per_year: 12,
            extra_payment: 0.0,
            desired_payment: 300.0,
        };
        let loan = amortize(&input).expect("valid loan");
        assert_eq!(loan.periods, 4);
        let last = loan.schedule[3];
        assert_eq!(last.payment, 100.0);
        assert_eq!(loan.total_paid, 1_000.0);
    }

    #[test]
    fn zero_rate_payment_mode_splits_principal_evenly() {
        let input = LoanInput {
            principal: 12_000.0,
            apr_pct: 0.0,
            years: 2.0,
            ..mortgage()
        };
        let loan = amortize(&input).expect("valid loan");
        assert_eq!(loan.payment, 500.0);
        assert_eq!(loan.periods, 24);
        assert_eq!(loan.total_interest, 0.0);
    }

    #[test]
    fn payment_below_interest_never_amortizes_and_stops_at_600() {
        let input = LoanInput {
            mode: LoanMode::Term,
            principal: 100_000.0,
            apr_pct: 5.0,
            desired_payment: 300.0,
            ..mortgage()
        };
        let loan = amortize(&input).expect("valid loan");
        assert!(loan.never_amortizes);
        assert!(!loan.paid_off);
        assert_eq!(loan.periods, 600);
        assert_eq!(loan.schedule.last().expect("rows").balance, 100_000.0);
    }

    #[test]
    fn zero_payment_without_interest_also_stops() {
        let input = LoanInput {
            mode: LoanMode::Term,
            apr_pct: 0.0,
            desired_payment: 0.0,
            ..mortgage()
        };
        let loan = amortize(&input).expect("valid loan");
        assert!(loan.never_amortizes);
        assert_eq!(loan.periods, 600);
    }

    #[test]
    fn tiny_payment_runs_into_the_hard_cap() {
        let input = LoanInput {
            mode: LoanMode::Term,
            principal: 1_000_000.0,
            apr_pct: 0.0,
            desired_payment: 1.0,
            ..mortgage()
        };
        let loan = amortize(&input).expect("valid loan");
        assert!(!loan.never_amortizes);
        assert!(!loan.paid_off);
        assert_eq!(loan.periods, HARD_CAP_PERIODS);
    }

    #[test]
    fn zero_principal_has_an_empty_schedule() {
        let input = LoanInput {
            principal: 0.0,
            ..mortgage()
        };
        let loan = amortize(&input).expect("valid loan");
        assert_eq!(loan.periods, 0);
        assert!(loan.paid_off);
        assert!(loan.schedule.is_empty());
    }

    #[test]
    fn rejects_negative_amounts_and_zero_frequency() {
        let mut input = mortgage();
        input.principal = -1.0;
        assert!(matches!(
            amortize(&input),
            Err(EngineError::InvalidInput { .. })
        ));

        let mut input = mortgage();
        input.payments_per_year = 0;
        assert!(amortize(&input).is_err());
    }
}
