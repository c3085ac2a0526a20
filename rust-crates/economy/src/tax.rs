use serde::{
    Deserialize,
    Serialize,
};
use std::f64::consts::SQRT_2;

const GAS_DEFAULT: f64 = 0.0285;
const GAS_MODIFIER: f64 = SQRT_2;
const LOW_VOLUME_LIMIT: f64 = 10.0;

const BANK_REBATE_BELOW: f64 = 70.0;
const BANK_FREE_BELOW: f64 = 120.0;
const BANK_REBATE: i64 = -2;
const BANK_GAS_FLOOR: i64 = 4;
const BANK_GAS_CEIL: i64 = 25;

/// Daily multiplier step applied to the balance for each missed day.
const INACTIVITY_STEP: f64 = 0.04;

fn low_volume_gas(volume: f64) -> f64 {
    let base = volume + 1.0;
    f64::max(1.0, (base.powf(base.log10()) - 1.0) / 39.15)
}

/// Per-roll service fee for a trade of `volume` coins.
pub fn gas_tax(volume: f64) -> i64 {
    if volume < LOW_VOLUME_LIMIT {
        return (low_volume_gas(volume) * GAS_MODIFIER).round() as i64;
    }
    (volume * GAS_DEFAULT * GAS_MODIFIER).round() as i64
}

/// Tax charged for one idle day on a balance of `amount`. Small balances get a rebate.
pub fn bank_tax(amount: f64) -> i64 {
    if amount < BANK_REBATE_BELOW {
        return BANK_REBATE;
    }
    if amount < BANK_FREE_BELOW {
        return 0;
    }
    let clamped = gas_tax(amount).clamp(BANK_GAS_FLOOR, BANK_GAS_CEIL);
    (clamped as f64 / 2.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InactivityTax {
    pub total: i64,
    pub days: i64,
}

impl InactivityTax {
    pub fn is_charged(&self) -> bool {
        self.days > 0
    }
}

/// Compound the bank tax over `days` idle days, heaviest multiplier on the earliest day.
pub fn inactivity_tax(balance: i64, days: i64) -> InactivityTax {
    if days <= 0 {
        return InactivityTax::default();
    }
    let mut total = 0;
    let mut running = balance;
    for i in 0..days {
        let multiplier = 1.0 + (days - i) as f64 * INACTIVITY_STEP;
        let day_tax = bank_tax(running as f64 * multiplier);
        total += day_tax;
        running -= day_tax;
    }
    InactivityTax { total, days }
}
