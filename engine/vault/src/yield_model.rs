//! Simulated yield projections.
//!
//! Rates are a pure function of the asset symbol: a base APY per asset (or per
//! tier for unlisted assets) plus a small offset derived from the symbol's
//! characters. The result is stable across calls and needs no chain state.
//! These figures are display projections, not contractual rates.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::registry::AssetClass;

const DAYS_PER_YEAR: f64 = 365.0;
const MONTHS_PER_YEAR: f64 = 12.0;

fn listed_base_apy(symbol: &str) -> Option<f64> {
    let apy = match symbol {
        "MNT" => 4.8,
        "USDC" => 5.2,
        "USDT" => 5.0,
        "DAI" => 4.9,
        "AAPLx" => 7.2,
        "TSLAx" => 9.4,
        "NVDAx" => 8.6,
        _ => return None,
    };
    Some(apy)
}

fn tier_base_apy(class: AssetClass) -> f64 {
    match class {
        AssetClass::Native => 4.8,
        AssetClass::Stable => 5.0,
        AssetClass::Equity => 8.0,
    }
}

/// Offset in `[0.00, 0.19]` from the sum of the symbol's character codes.
fn symbol_offset(symbol: &str) -> f64 {
    let hash: u32 = symbol.chars().map(u32::from).sum();
    f64::from(hash % 20) / 100.0
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// APY percentage of `symbol`, treating unlisted assets as stablecoins.
pub fn get_apy(symbol: &str) -> f64 {
    apy_for(symbol, AssetClass::Stable)
}

/// APY percentage of `symbol`, falling back to `class` for unlisted assets.
pub fn apy_for(symbol: &str, class: AssetClass) -> f64 {
    let base = listed_base_apy(symbol).unwrap_or_else(|| tier_base_apy(class));
    round_to(base + symbol_offset(symbol), 2)
}

/// Daily compound rate, as a percentage, equivalent to `apy`.
pub fn daily_rate(apy: f64) -> f64 {
    ((1.0 + apy / 100.0).powf(1.0 / DAYS_PER_YEAR) - 1.0) * 100.0
}

/// Monthly compound rate, as a percentage, equivalent to `apy`.
pub fn monthly_rate(apy: f64) -> f64 {
    ((1.0 + apy / 100.0).powf(1.0 / MONTHS_PER_YEAR) - 1.0) * 100.0
}

/// Rates of one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldQuote {
    pub symbol: String,
    pub apy: f64,
    pub daily_rate: f64,
    pub monthly_rate: f64,
}

/// Expected gains on a deposited amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldProjection {
    pub daily_gain: Decimal,
    pub monthly_gain: Decimal,
}

impl YieldQuote {
    pub fn new(symbol: &str, class: AssetClass) -> Self {
        let apy = apy_for(symbol, class);
        Self {
            symbol: symbol.to_string(),
            apy,
            daily_rate: daily_rate(apy),
            monthly_rate: monthly_rate(apy),
        }
    }

    /// Daily rate rounded for display (4 places).
    pub fn daily_rate_display(&self) -> f64 {
        round_to(self.daily_rate, 4)
    }

    /// Monthly rate rounded for display (3 places).
    pub fn monthly_rate_display(&self) -> f64 {
        round_to(self.monthly_rate, 3)
    }

    /// Gains on `deposited` over one day and one month at the compound rates.
    pub fn project(&self, deposited: Decimal) -> YieldProjection {
        let gain = |rate: f64| {
            Decimal::from_f64(rate / 100.0)
                .map(|r| (deposited * r).round_dp(8))
                .unwrap_or(Decimal::ZERO)
        };
        YieldProjection {
            daily_gain: gain(self.daily_rate),
            monthly_gain: gain(self.monthly_rate),
        }
    }

    /// Projected balance after `days` days of daily compounding.
    pub fn compound(&self, deposited: Decimal, days: u32) -> Decimal {
        let growth = (1.0 + self.daily_rate / 100.0).powi(days as i32);
        deposited
            .to_f64()
            .and_then(|d| Decimal::from_f64(d * growth))
            .map(|d| d.round_dp(8))
            .unwrap_or(deposited)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn apy_is_deterministic() {
        assert_eq!(get_apy("USDC"), get_apy("USDC"));
        // 'U' + 'S' + 'D' + 'C' = 303, 303 % 20 = 3
        assert_eq!(get_apy("USDC"), 5.23);
        // 'M' + 'N' + 'T' = 239, 239 % 20 = 19
        assert_eq!(get_apy("MNT"), 4.99);
        assert_eq!(apy_for("TSLAx", AssetClass::Stable), apy_for("TSLAx", AssetClass::Equity));
    }

    #[test]
    fn tiers_differ_for_unlisted_assets() {
        let stable = apy_for("EURC", AssetClass::Stable);
        let equity = apy_for("EURC", AssetClass::Equity);
        assert!(equity > stable);
        assert!((stable - 5.0).abs() < 0.2);
    }

    #[test]
    fn daily_rate_compounds_to_apy() {
        for apy in [4.8, 5.23, 9.4, 25.0] {
            let daily = daily_rate(apy) / 100.0;
            let grown = (1.0 + daily).powi(365);
            assert!((grown - (1.0 + apy / 100.0)).abs() < 1e-9, "apy {apy}");
        }
    }

    #[test]
    fn monthly_rate_compounds_to_apy() {
        let monthly = monthly_rate(12.0) / 100.0;
        assert!(((1.0 + monthly).powi(12) - 1.12).abs() < 1e-12);
        assert!(monthly_rate(12.0) < 1.0);
    }

    #[test]
    fn projects_gains_on_a_position() {
        let quote = YieldQuote::new("USDC", AssetClass::Stable);
        let projection = quote.project(Decimal::from(1_000));
        assert!(projection.daily_gain > Decimal::ZERO);
        assert!(projection.monthly_gain > projection.daily_gain * Decimal::from(28));
        assert_eq!(quote.project(Decimal::ZERO).daily_gain, Decimal::ZERO);

        let year = quote.compound(Decimal::from(100), 365);
        let expected = Decimal::from_str("105.23").unwrap();
        assert!((year - expected).abs() < Decimal::from_str("0.0001").unwrap());
    }

    #[test]
    fn display_rounding() {
        let quote = YieldQuote::new("DAI", AssetClass::Stable);
        assert_eq!(quote.daily_rate_display(), round_to(quote.daily_rate, 4));
        assert!((quote.daily_rate_display() - quote.daily_rate).abs() < 0.00005 + f64::EPSILON);
    }
}
