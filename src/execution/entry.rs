use chrono::{DateTime, Utc};

use crate::execution::PositionBook;
use crate::models::Side;
use crate::risk::{calculate_position_size, RiskLimits, RiskState};

/// Where an entry idea came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntrySource {
    Opportunity { signal_strength: f64 },
    Fallback,
}

/// A proposed entry, before risk checks
#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub instrument: String,
    pub side: Side,
    pub source: EntrySource,
    /// Stop proposed by the opportunity's levels, if any
    pub stop_hint: Option<f64>,
    pub target_hint: Option<f64>,
    /// ATR as a fraction of price, used by the volatility filter
    pub atr_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryAction {
    Execute {
        side: Side,
        quantity: f64,
        stop_price: f64,
        take_profit_price: f64,
    },
    Skip,
}

#[derive(Debug, Clone)]
pub struct EntryDecision {
    pub action: EntryAction,
    pub reason: String,
}

impl EntryDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: EntryAction::Skip,
            reason: reason.into(),
        }
    }

    pub fn is_execute(&self) -> bool {
        matches!(self.action, EntryAction::Execute { .. })
    }
}

/// Run an entry candidate through the book and risk gates
///
/// `price` is the current market price and `stop_price` the stop already
/// chosen for it. The target is the candidate's hint when it sits on the
/// profitable side, else `price ± take_profit_rr × stop distance`.
#[allow(clippy::too_many_arguments)]
pub fn decide_entry(
    candidate: &EntryCandidate,
    price: f64,
    stop_price: f64,
    book: &PositionBook,
    state: &RiskState,
    limits: &RiskLimits,
    take_profit_rr: f64,
    now: DateTime<Utc>,
) -> EntryDecision {
    // Check 1: Do we already have this instrument?
    if book.has_open(&candidate.instrument) {
        return EntryDecision::skip("Already have open position");
    }

    // Check 2: Risk limits (daily loss, slots, cooldown, trade count)
    if let Err(trip) = limits.check(state, now) {
        return EntryDecision::skip(format!("Risk limit: {}", trip));
    }

    // Check 3: Too volatile to size sensibly
    if let Some(atr_pct) = candidate.atr_pct {
        if atr_pct > limits.max_volatility {
            return EntryDecision::skip(format!(
                "Volatility too high: ATR {:.2}% > {:.2}%",
                atr_pct * 100.0,
                limits.max_volatility * 100.0
            ));
        }
    }

    // Check 4: Stop must be on the losing side of the entry
    let side = candidate.side;
    let stop_distance = (price - stop_price) * side.sign();
    if !price.is_finite() || price <= 0.0 || stop_distance <= 0.0 {
        return EntryDecision::skip(format!(
            "Stop {:.4} is on the wrong side of a {} entry at {:.4}",
            stop_price,
            side.as_str(),
            price
        ));
    }

    // Check 5: Risk-based size
    let Some(quantity) = calculate_position_size(state.available_balance, price, stop_price, limits)
    else {
        return EntryDecision::skip("No valid position size for available balance");
    };

    let take_profit_price = candidate
        .target_hint
        .filter(|target| (target - price) * side.sign() > 0.0)
        .unwrap_or(price + side.sign() * stop_distance * take_profit_rr);

    EntryDecision {
        action: EntryAction::Execute {
            side,
            quantity,
            stop_price,
            take_profit_price,
        },
        reason: match candidate.source {
            EntrySource::Opportunity { signal_strength } => {
                format!("{} opportunity, strength {:.2}", side.as_str(), signal_strength)
            }
            EntrySource::Fallback => format!("{} technical signal", side.as_str()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::NewPosition;

    fn candidate(side: Side) -> EntryCandidate {
        EntryCandidate {
            instrument: "SOL/USDT".to_string(),
            side,
            source: EntrySource::Opportunity {
                signal_strength: 0.85,
            },
            stop_hint: None,
            target_hint: None,
            atr_pct: Some(0.02),
        }
    }

    fn state() -> RiskState {
        RiskState::new(10_000.0, Utc::now())
    }

    #[test]
    fn test_execute_long_when_valid() {
        let book = PositionBook::new(0.0);
        let decision = decide_entry(
            &candidate(Side::Long),
            100.0,
            98.0,
            &book,
            &state(),
            &RiskLimits::default(),
            2.0,
            Utc::now(),
        );

        match decision.action {
            EntryAction::Execute {
                side,
                quantity,
                stop_price,
                take_profit_price,
            } => {
                assert_eq!(side, Side::Long);
                // Risk 200 over a 2.0 distance is 100 units, capped at 20% of 10k / 100 = 20
                assert!((quantity - 20.0).abs() < 1e-9);
                assert_eq!(stop_price, 98.0);
                assert!((take_profit_price - 104.0).abs() < 1e-9);
            }
            EntryAction::Skip => panic!("expected execute, got skip: {}", decision.reason),
        }
    }

    #[test]
    fn test_short_target_below_entry() {
        let book = PositionBook::new(0.0);
        let decision = decide_entry(
            &candidate(Side::Short),
            100.0,
            101.0,
            &book,
            &state(),
            &RiskLimits::default(),
            2.0,
            Utc::now(),
        );

        assert!(matches!(
            decision.action,
            EntryAction::Execute { take_profit_price, .. } if (take_profit_price - 98.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_target_hint_used_when_on_profit_side() {
        let book = PositionBook::new(0.0);
        let mut long = candidate(Side::Long);
        long.target_hint = Some(110.0);
        let decision = decide_entry(&long, 100.0, 98.0, &book, &state(), &RiskLimits::default(), 2.0, Utc::now());
        assert!(matches!(
            decision.action,
            EntryAction::Execute { take_profit_price, .. } if take_profit_price == 110.0
        ));

        // A target below a long entry is ignored
        long.target_hint = Some(95.0);
        let decision = decide_entry(&long, 100.0, 98.0, &book, &state(), &RiskLimits::default(), 2.0, Utc::now());
        assert!(matches!(
            decision.action,
            EntryAction::Execute { take_profit_price, .. } if (take_profit_price - 104.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_skip_when_already_positioned() {
        let mut book = PositionBook::new(0.0);
        book.open(NewPosition {
            instrument: "SOL/USDT".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            quantity: 1.0,
            leverage: 10,
            stop_price: 98.0,
            take_profit_price: 104.0,
            opened_at: Utc::now(),
        });

        let decision = decide_entry(
            &candidate(Side::Long),
            100.0,
            98.0,
            &book,
            &state(),
            &RiskLimits::default(),
            2.0,
            Utc::now(),
        );
        assert_eq!(decision.action, EntryAction::Skip);
        assert!(decision.reason.contains("Already have"));
    }

    #[test]
    fn test_skip_on_risk_limit() {
        let book = PositionBook::new(0.0);
        let mut state = state();
        state.daily_realized_pnl = -600.0;

        let decision = decide_entry(
            &candidate(Side::Long),
            100.0,
            98.0,
            &book,
            &state,
            &RiskLimits::default(),
            2.0,
            Utc::now(),
        );
        assert_eq!(decision.action, EntryAction::Skip);
        assert!(decision.reason.contains("Risk limit"));
    }

    #[test]
    fn test_skip_wrong_side_stop() {
        let book = PositionBook::new(0.0);
        let decision = decide_entry(
            &candidate(Side::Long),
            100.0,
            101.0,
            &book,
            &state(),
            &RiskLimits::default(),
            2.0,
            Utc::now(),
        );
        assert_eq!(decision.action, EntryAction::Skip);
    }

    #[test]
    fn test_skip_too_volatile() {
        let book = PositionBook::new(0.0);
        let mut wild = candidate(Side::Long);
        wild.atr_pct = Some(0.15);

        let decision = decide_entry(&wild, 100.0, 98.0, &book, &state(), &RiskLimits::default(), 2.0, Utc::now());
        assert_eq!(decision.action, EntryAction::Skip);
        assert!(decision.reason.contains("Volatility"));
    }
}
