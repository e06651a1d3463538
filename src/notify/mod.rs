// Fire-and-forget engine notifications
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::execution::CloseReason;
use crate::models::Side;
use crate::risk::RiskLimitTrip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PositionOpened {
        position_id: Uuid,
        instrument: String,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_price: f64,
        take_profit_price: f64,
    },
    PositionClosed {
        position_id: Uuid,
        instrument: String,
        side: Side,
        exit_price: f64,
        pnl: f64,
        reason: CloseReason,
    },
    StopMoved {
        position_id: Uuid,
        instrument: String,
        stop_price: f64,
    },
    /// A gateway call failed after its retry; the action was skipped
    GatewayFailure {
        action: String,
        instrument: Option<String>,
        error: String,
    },
    EntriesHalted {
        trip: RiskLimitTrip,
    },
    EmergencyStop {
        closed: usize,
        failed: usize,
        realized_pnl: f64,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::PositionOpened { .. } => "position_opened",
            EngineEvent::PositionClosed { .. } => "position_closed",
            EngineEvent::StopMoved { .. } => "stop_moved",
            EngineEvent::GatewayFailure { .. } => "gateway_failure",
            EngineEvent::EntriesHalted { .. } => "entries_halted",
            EngineEvent::EmergencyStop { .. } => "emergency_stop",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            EngineEvent::PositionOpened { .. } | EngineEvent::StopMoved { .. } => Severity::Info,
            EngineEvent::PositionClosed { reason, .. } => match reason {
                CloseReason::Emergency | CloseReason::RiskLimit => Severity::Warn,
                _ => Severity::Info,
            },
            EngineEvent::GatewayFailure { .. } | EngineEvent::EntriesHalted { .. } => Severity::Warn,
            EngineEvent::EmergencyStop { .. } => Severity::Critical,
        }
    }
}

/// Delivery must never block or fail the caller
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &EngineEvent);
}

/// Writes events to the tracing log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &EngineEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        match event.severity() {
            Severity::Info => tracing::info!(event = event.name(), "📣 {}", payload),
            Severity::Warn => tracing::warn!(event = event.name(), "⚠️  {}", payload),
            Severity::Critical => tracing::error!(event = event.name(), "🚨 {}", payload),
        }
    }
}

/// Forwards events to a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &EngineEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tracing::debug!("Notification {} dropped: {}", event.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halted() -> EngineEvent {
        EngineEvent::EntriesHalted {
            trip: RiskLimitTrip::DailyLoss,
        }
    }

    #[test]
    fn test_severity() {
        assert_eq!(halted().severity(), Severity::Warn);
        let stop = EngineEvent::EmergencyStop {
            closed: 2,
            failed: 0,
            realized_pnl: -3.5,
        };
        assert_eq!(stop.severity(), Severity::Critical);
        assert_eq!(stop.name(), "emergency_stop");
    }

    #[test]
    fn test_payload_is_tagged() {
        let json = serde_json::to_value(halted()).unwrap();
        assert_eq!(json["event"], "entries_halted");
        assert_eq!(json["trip"], "DailyLoss");
    }

    #[tokio::test]
    async fn test_channel_notifier_drops_when_full() {
        let (notifier, mut rx) = ChannelNotifier::new(1);
        notifier.notify(&halted());
        notifier.notify(&halted());

        assert_eq!(rx.recv().await, Some(halted()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_log_notifier_never_panics() {
        LogNotifier.notify(&halted());
    }
}
