use rust_decimal::Decimal;

use super::PriceFeed;
use crate::models::{latest_alert, Alert, Position, PositionSnapshot, PriceSource, Row, SignalKind};

/// Link attached to actionable notifications (e.g. a wallet deep link)
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLink {
    pub url: String,
    pub label: String,
}

/// What the newest alert led to
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    /// Ledger has no signal rows
    NoAlert,
    Buy {
        price: Decimal,
        source: PriceSource,
    },
    Sell {
        price: Decimal,
        source: PriceSource,
        position: Position,
        profit: Decimal,
    },
    /// Alert conflicts with the single-position policy
    Suppressed { reason: String },
}

/// A notification the caller should deliver
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub kind: SignalKind,
    pub title: String,
    pub message: String,
    pub action: Option<ActionLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub alert: Option<Alert>,
    pub decision: AlertDecision,
    /// Zero or one entries
    pub intents: Vec<NotificationIntent>,
    /// Unrealized P&L per open position; empty when the feed was unavailable
    pub snapshots: Vec<PositionSnapshot>,
    /// Set when a sell was advised and the trade should be recorded by hand
    pub record_trade_reminder: Option<String>,
}

impl ProcessOutcome {
    /// Realized profit of the advised sell, if any
    pub fn profit(&self) -> Option<Decimal> {
        match &self.decision {
            AlertDecision::Sell { profit, .. } => Some(*profit),
            _ => None,
        }
    }
}

/// Interprets the newest alert against reconciled positions
#[derive(Debug, Clone)]
pub struct SignalProcessor {
    action_link: ActionLink,
    trade_log_url: String,
}

impl SignalProcessor {
    pub fn new(action_link: ActionLink, trade_log_url: String) -> Self {
        Self {
            action_link,
            trade_log_url,
        }
    }

    /// Decide on the newest alert and snapshot open positions
    ///
    /// The feed is queried at most once, and only when there is an alert or
    /// an open position to value. Delivery is left to the caller.
    pub async fn process<F: PriceFeed + ?Sized>(
        &self,
        rows: &[Row],
        positions: &[Position],
        feed: &F,
    ) -> ProcessOutcome {
        let alert = latest_alert(rows);

        let feed_price = if alert.is_some() || !positions.is_empty() {
            feed.current_price().await
        } else {
            None
        };

        let decision = match &alert {
            Some(alert) => self.decide(alert, positions, feed_price),
            None => AlertDecision::NoAlert,
        };

        let intents: Vec<NotificationIntent> = self.intent_for(&decision).into_iter().collect();

        // No ledger write happens here: the trade is recorded by hand
        let record_trade_reminder = if matches!(decision, AlertDecision::Sell { .. }) {
            tracing::info!("Log the sell trade at: {}", self.trade_log_url);
            Some(self.trade_log_url.clone())
        } else {
            None
        };

        let snapshots = snapshot_positions(positions, feed_price);

        ProcessOutcome {
            alert,
            decision,
            intents,
            snapshots,
            record_trade_reminder,
        }
    }

    fn decide(
        &self,
        alert: &Alert,
        positions: &[Position],
        feed_price: Option<Decimal>,
    ) -> AlertDecision {
        let (price, source) = match feed_price {
            Some(price) => (price, PriceSource::Feed),
            None => (alert.recorded_price(), PriceSource::AlertFallback),
        };

        tracing::info!(
            "Processing alert: {:?} (line {}), Price: ${:.2}, Current Price: ${:.2}",
            alert.kind,
            alert.line,
            alert.recorded_price(),
            price
        );

        match (alert.kind, positions.last()) {
            (SignalKind::Buy, None) => AlertDecision::Buy { price, source },
            (SignalKind::Sell, Some(position)) => AlertDecision::Sell {
                price,
                source,
                position: position.clone(),
                profit: position.profit_at(price),
            },
            (SignalKind::Buy, Some(_)) => {
                let reason = format!(
                    "Buy signal ignored - already holding {} open position(s)",
                    positions.len()
                );
                tracing::info!("{}", reason);
                AlertDecision::Suppressed { reason }
            }
            (SignalKind::Sell, None) => {
                let reason = "Sell signal ignored - no open position".to_string();
                tracing::info!("{}", reason);
                AlertDecision::Suppressed { reason }
            }
        }
    }

    fn intent_for(&self, decision: &AlertDecision) -> Option<NotificationIntent> {
        match decision {
            AlertDecision::Buy { price, .. } => Some(NotificationIntent {
                kind: SignalKind::Buy,
                title: "BTC Buy Signal".to_string(),
                message: format!(
                    "BUY SIGNAL: Consider buying at ${:.2}, log the trade if executed.",
                    price
                ),
                action: Some(self.action_link.clone()),
            }),
            AlertDecision::Sell { price, profit, .. } => Some(NotificationIntent {
                kind: SignalKind::Sell,
                title: "BTC Sell Signal".to_string(),
                message: format!(
                    "SELL SIGNAL: Close position at ${:.2}, Profit: ${:.2}",
                    price, profit
                ),
                action: Some(self.action_link.clone()),
            }),
            AlertDecision::NoAlert | AlertDecision::Suppressed { .. } => None,
        }
    }
}

/// Unrealized P&L for every open position at the feed price
fn snapshot_positions(positions: &[Position], feed_price: Option<Decimal>) -> Vec<PositionSnapshot> {
    if positions.is_empty() {
        return Vec::new();
    }

    let Some(current_price) = feed_price else {
        tracing::warn!("No current price available for open position updates");
        return Vec::new();
    };

    positions
        .iter()
        .map(|position| {
            let unrealized_pnl = position.profit_at(current_price);
            tracing::info!(
                "Open Position: {:.6} BTC at ${:.2}, Current: ${:.2}, Profit: ${:.2}",
                position.quantity,
                position.entry_price,
                current_price,
                unrealized_pnl
            );
            PositionSnapshot {
                position: position.clone(),
                current_price,
                unrealized_pnl,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::FixedPriceFeed;
    use crate::models::RowAction;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn processor() -> SignalProcessor {
        SignalProcessor::new(
            ActionLink {
                url: "chivo://".to_string(),
                label: "Open Chivo Wallet".to_string(),
            },
            "https://forms.example/trade-log".to_string(),
        )
    }

    fn signal(line: usize, action: RowAction, price: Option<&str>) -> Row {
        Row {
            line,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            action,
            quantity: None,
            price: price.map(d),
        }
    }

    fn position(entry: &str, qty: &str) -> Position {
        Position {
            line: 2,
            entry_price: d(entry),
            quantity: d(qty),
            opened_at: Utc::now(),
        }
    }

    /// Counts how often the feed is queried
    struct CountingFeed {
        price: Option<Decimal>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PriceFeed for CountingFeed {
        async fn current_price(&self) -> Option<Decimal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price
        }
    }

    #[tokio::test]
    async fn test_buy_signal_without_position_emits_one_intent() {
        let rows = vec![signal(2, RowAction::BuySignal, Some("100"))];
        let feed = FixedPriceFeed::new(d("101.5"));

        let outcome = processor().process(&rows, &[], &feed).await;

        assert_eq!(outcome.intents.len(), 1);
        let intent = &outcome.intents[0];
        assert_eq!(intent.kind, SignalKind::Buy);
        assert!(intent.message.contains("$101.50"));
        assert_eq!(intent.action.as_ref().unwrap().url, "chivo://");
        assert_eq!(
            outcome.decision,
            AlertDecision::Buy {
                price: d("101.5"),
                source: PriceSource::Feed
            }
        );
        assert!(outcome.record_trade_reminder.is_none());
    }

    #[tokio::test]
    async fn test_buy_signal_with_open_position_is_suppressed() {
        let rows = vec![signal(3, RowAction::BuySignal, Some("100"))];
        let feed = FixedPriceFeed::new(d("101"));

        let outcome = processor()
            .process(&rows, &[position("100", "0.5")], &feed)
            .await;

        assert!(outcome.intents.is_empty());
        assert!(matches!(outcome.decision, AlertDecision::Suppressed { .. }));
    }

    #[tokio::test]
    async fn test_sell_signal_profit_against_last_position() {
        let rows = vec![signal(4, RowAction::SellSignal, Some("118"))];
        let feed = FixedPriceFeed::new(d("120"));

        let outcome = processor()
            .process(&rows, &[position("100", "0.5")], &feed)
            .await;

        assert_eq!(outcome.profit(), Some(d("10.0")));
        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].kind, SignalKind::Sell);
        assert!(outcome.intents[0].message.contains("Profit: $10.00"));
        assert_eq!(
            outcome.record_trade_reminder.as_deref(),
            Some("https://forms.example/trade-log")
        );
    }

    #[tokio::test]
    async fn test_sell_uses_last_position_not_aggregate() {
        let rows = vec![signal(5, RowAction::SellSignal, None)];
        let feed = FixedPriceFeed::new(d("120"));
        let positions = vec![position("100", "0.5"), position("110", "2")];

        let outcome = processor().process(&rows, &positions, &feed).await;

        // 2 * (120 - 110)
        assert_eq!(outcome.profit(), Some(d("20")));
    }

    #[tokio::test]
    async fn test_sell_signal_without_position_is_suppressed() {
        let rows = vec![signal(2, RowAction::SellSignal, Some("120"))];
        let feed = FixedPriceFeed::new(d("120"));

        let outcome = processor().process(&rows, &[], &feed).await;

        assert!(outcome.intents.is_empty());
        assert!(outcome.record_trade_reminder.is_none());
        assert!(matches!(outcome.decision, AlertDecision::Suppressed { .. }));
    }

    #[tokio::test]
    async fn test_feed_unavailable_falls_back_to_alert_price() {
        let rows = vec![signal(2, RowAction::SellSignal, Some("115"))];
        let feed = FixedPriceFeed::unavailable();

        let outcome = processor()
            .process(&rows, &[position("100", "0.5")], &feed)
            .await;

        match outcome.decision {
            AlertDecision::Sell { price, source, profit, .. } => {
                assert_eq!(price, d("115"));
                assert_eq!(source, PriceSource::AlertFallback);
                assert_eq!(profit, d("7.5"));
            }
            other => panic!("expected sell, got {:?}", other),
        }
        // Snapshot needs a live price
        assert!(outcome.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_only_newest_alert_counts() {
        let rows = vec![
            signal(2, RowAction::SellSignal, Some("120")),
            signal(3, RowAction::BuySignal, Some("100")),
        ];
        let feed = FixedPriceFeed::new(d("100"));

        let outcome = processor().process(&rows, &[], &feed).await;

        assert_eq!(outcome.alert.unwrap().line, 3);
        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].kind, SignalKind::Buy);
    }

    #[tokio::test]
    async fn test_snapshot_without_alert() {
        let feed = CountingFeed {
            price: Some(d("130")),
            calls: AtomicU32::new(0),
        };
        let positions = vec![position("100", "0.5"), position("120", "1")];

        let outcome = processor().process(&[], &positions, &feed).await;

        assert_eq!(outcome.decision, AlertDecision::NoAlert);
        assert!(outcome.intents.is_empty());
        assert_eq!(outcome.snapshots.len(), 2);
        assert_eq!(outcome.snapshots[0].unrealized_pnl, d("15"));
        assert_eq!(outcome.snapshots[1].unrealized_pnl, d("10"));
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_feed_not_queried_when_nothing_to_do() {
        let feed = CountingFeed {
            price: Some(d("130")),
            calls: AtomicU32::new(0),
        };

        let outcome = processor().process(&[], &[], &feed).await;

        assert_eq!(outcome.decision, AlertDecision::NoAlert);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_feed_queried_once_with_alert_and_positions() {
        let feed = CountingFeed {
            price: Some(d("120")),
            calls: AtomicU32::new(0),
        };
        let rows = vec![signal(4, RowAction::SellSignal, None)];

        let outcome = processor()
            .process(&rows, &[position("100", "0.5")], &feed)
            .await;

        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.profit(), Some(d("10")));
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }
}
