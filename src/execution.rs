//! Fee & execution model (§4.G): bid/ask execution price, Kalshi-style fee
//! formula, fee rounding policy, slippage, and risk-neutral contract sizing.

use serde::{Deserialize, Serialize};

use crate::model::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeRounding {
    None,
    CeilToCent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostConfig {
    pub enable_fees: bool,
    pub slippage_rate: f64,
    pub bet_amount_dollars: f64,
    pub fee_rounding: FeeRounding,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            enable_fees: true,
            slippage_rate: 0.0,
            bet_amount_dollars: 20.0,
            fee_rounding: FeeRounding::None,
        }
    }
}

/// Entry price: LONG_HOME buys at ask, SHORT_HOME sells at bid.
pub fn entry_price(direction: Direction, bid: f64, ask: f64) -> f64 {
    match direction {
        Direction::LongHome => ask,
        Direction::ShortHome => bid,
    }
}

/// Exit price: flips sides relative to entry.
pub fn exit_price(direction: Direction, bid: f64, ask: f64) -> f64 {
    match direction {
        Direction::LongHome => bid,
        Direction::ShortHome => ask,
    }
}

/// Risk-neutral contract count: max loss equals `bet_amount_dollars`.
pub fn num_contracts(p_exec: f64, bet_amount_dollars: f64) -> f64 {
    bet_amount_dollars / p_exec.max(1.0 - p_exec)
}

/// Kalshi-style per-side fee: `0.07 * p * (1-p) * bet_amount_dollars`,
/// clamped to zero outside `(0,1)` or for non-positive bet amounts.
/// Symmetric around `p = 0.5` by construction.
pub fn fee(p: f64, bet_amount_dollars: f64, rounding: FeeRounding) -> f64 {
    if !(0.0..1.0).contains(&p) || p <= 0.0 || bet_amount_dollars <= 0.0 {
        return 0.0;
    }
    let raw = 0.07 * p * (1.0 - p) * bet_amount_dollars;
    match rounding {
        FeeRounding::None => raw,
        FeeRounding::CeilToCent => (raw * 100.0).ceil() / 100.0,
    }
}

/// One-side slippage cost.
pub fn slippage(bet_amount_dollars: f64, slippage_rate: f64) -> f64 {
    slippage_rate * bet_amount_dollars
}

/// Gross P&L for the direction.
pub fn gross_pnl(direction: Direction, entry: f64, exit: f64, contracts: f64) -> f64 {
    match direction {
        Direction::LongHome => (exit - entry) * contracts,
        Direction::ShortHome => (entry - exit) * contracts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fee_symmetry_property() {
        for p in [0.01, 0.1, 0.3, 0.49, 0.5, 0.51, 0.7, 0.9, 0.99] {
            assert_relative_eq!(
                fee(p, 20.0, FeeRounding::None),
                fee(1.0 - p, 20.0, FeeRounding::None),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn fee_clamped_to_zero_outside_valid_range() {
        assert_eq!(fee(0.0, 20.0, FeeRounding::None), 0.0);
        assert_eq!(fee(1.0, 20.0, FeeRounding::None), 0.0);
        assert_eq!(fee(0.5, -5.0, FeeRounding::None), 0.0);
        assert_eq!(fee(1.5, 20.0, FeeRounding::None), 0.0);
    }

    #[test]
    fn long_entry_is_ask_short_entry_is_bid() {
        assert_eq!(entry_price(Direction::LongHome, 0.60, 0.63), 0.63);
        assert_eq!(entry_price(Direction::ShortHome, 0.60, 0.63), 0.60);
    }

    #[test]
    fn scenario_s1_single_trade_convergence() {
        // Entry at snapshot 1: LONG_HOME at ask 0.63.
        let entry = entry_price(Direction::LongHome, 0.61, 0.63);
        assert_relative_eq!(entry, 0.63, epsilon = 1e-9);
        let contracts = num_contracts(entry, 20.0);
        assert_relative_eq!(contracts, 20.0 / 0.63, epsilon = 1e-6);

        // Exit at snapshot 3: bid 0.625.
        let exit = exit_price(Direction::LongHome, 0.625, 0.645);
        assert_relative_eq!(exit, 0.625, epsilon = 1e-9);

        let gross = gross_pnl(Direction::LongHome, entry, exit, contracts);
        assert_relative_eq!(gross, (0.625 - 0.63) * (20.0 / 0.63), epsilon = 1e-6);

        let entry_fee = fee(entry, 20.0, FeeRounding::None);
        assert_relative_eq!(entry_fee, 0.07 * 0.63 * 0.37 * 20.0, epsilon = 1e-9);
        let exit_fee = fee(exit, 20.0, FeeRounding::None);
        assert_relative_eq!(exit_fee, 0.07 * 0.625 * 0.375 * 20.0, epsilon = 1e-9);

        let net = gross - entry_fee - exit_fee;
        assert_relative_eq!(net, -0.813, epsilon = 2e-3);
    }
}
