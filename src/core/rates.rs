use super::error::{EngineError, Result};

/// Monthly effective rate that compounds to `annual_pct` over twelve months.
///
/// Negative rates are fine; a rate at or below -100% has no monthly
/// equivalent and is reported as [`EngineError::DomainUndefined`].
pub fn monthly_from_annual(annual_pct: f64) -> Result<f64> {
    if !annual_pct.is_finite() {
        return Err(EngineError::domain_undefined(format!(
            "annual rate {annual_pct}% is not a finite number"
        )));
    }
    let base = 1.0 + annual_pct / 100.0;
    if base <= 0.0 {
        return Err(EngineError::domain_undefined(format!(
            "annual rate {annual_pct}% has no monthly equivalent (must be > -100%)"
        )));
    }
    Ok(base.powf(1.0 / 12.0) - 1.0)
}

pub fn monthly_from_monthly_pct(monthly_pct: f64) -> f64 {
    fraction(monthly_pct)
}

pub fn fraction(pct: f64) -> f64 {
    pct / 100.0
}
