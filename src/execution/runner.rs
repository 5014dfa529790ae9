use chrono::{DateTime, Utc};
use tokio::time::Duration;

use super::processor::{AlertDecision, SignalProcessor};
use super::reconciler::reconcile;
use super::scheduler::{wait_until, Clock, ExecutionScheduler, WakeBasis, WakePlan};
use super::PriceFeed;
use crate::ledger::{decode_rows, LedgerError, SignalLedger};
use crate::notify::{Notification, NotificationSink};

/// State carried from one cycle to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleState {
    /// Raw timestamp of the newest alert seen so far
    pub last_signal_time: Option<String>,
    pub cycles: u64,
}

/// What happened during one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub ledger_ok: bool,
    pub rows: usize,
    pub skipped_rows: usize,
    pub open_positions: usize,
    pub decision: Option<AlertDecision>,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub wake: WakePlan,
}

/// Everything a cycle needs, passed in rather than held globally
pub struct Runner {
    ledger: Box<dyn SignalLedger>,
    feed: Box<dyn PriceFeed>,
    sink: Box<dyn NotificationSink>,
    clock: Box<dyn Clock>,
    processor: SignalProcessor,
    scheduler: ExecutionScheduler,
    recipient: String,
    max_sleep_slice: Duration,
}

impl Runner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Box<dyn SignalLedger>,
        feed: Box<dyn PriceFeed>,
        sink: Box<dyn NotificationSink>,
        clock: Box<dyn Clock>,
        processor: SignalProcessor,
        scheduler: ExecutionScheduler,
        recipient: String,
        max_sleep_slice: Duration,
    ) -> Self {
        Self {
            ledger,
            feed,
            sink,
            clock,
            processor,
            scheduler,
            recipient,
            max_sleep_slice,
        }
    }

    /// Startup probe: the ledger must be reachable before the loop starts
    pub async fn check_ledger(&self) -> Result<usize, LedgerError> {
        let rows = self.ledger.fetch_rows().await?;
        tracing::info!("Successfully connected to ledger {}", self.ledger.name());
        Ok(rows.len())
    }

    /// Run one reconcile/process/schedule pass
    ///
    /// Each stage isolates its own failures; the cycle always ends with a
    /// wake plan.
    pub async fn run_cycle(&self, state: &mut CycleState) -> CycleReport {
        let started_at = self.clock.now();
        state.cycles += 1;
        tracing::info!("🔄 Starting cycle {} at {}", state.cycles, started_at.to_rfc3339());

        let mut report = CycleReport {
            started_at,
            ledger_ok: false,
            rows: 0,
            skipped_rows: 0,
            open_positions: 0,
            decision: None,
            notifications_sent: 0,
            notifications_failed: 0,
            // Replaced once the cycle has run
            wake: WakePlan {
                at: started_at,
                basis: WakeBasis::Fallback,
            },
        };

        match self.ledger.fetch_rows().await {
            Ok(raw) => {
                report.ledger_ok = true;
                tracing::info!("Retrieved {} rows from {}", raw.len(), self.ledger.name());
                self.process_rows(&raw, state, &mut report).await;
            }
            Err(e) => {
                // Keep the previous anchor so the grid survives a flaky ledger
                tracing::error!("Error in cycle: failed to read ledger: {}", e);
            }
        }

        report.wake = self
            .scheduler
            .plan(state.last_signal_time.as_deref(), self.clock.now());

        report
    }

    async fn process_rows(&self, raw: &[Vec<String>], state: &mut CycleState, report: &mut CycleReport) {
        let decoded = decode_rows(raw);
        for e in &decoded.errors {
            tracing::warn!("Skipping malformed row: {}", e);
        }
        for e in &decoded.warnings {
            tracing::warn!("Ignoring bad cell on signal row: {}", e);
        }

        let reconciliation = reconcile(&decoded.rows);
        for e in &reconciliation.errors {
            tracing::warn!("Skipping buy row: {}", e);
        }

        let outcome = self
            .processor
            .process(&decoded.rows, &reconciliation.positions, self.feed.as_ref())
            .await;

        tracing::info!(
            "Found {} open positions, {} new alerts",
            reconciliation.positions.len(),
            usize::from(outcome.alert.is_some())
        );

        state.last_signal_time = outcome.alert.as_ref().map(|a| a.timestamp.clone());

        for intent in &outcome.intents {
            let notification = Notification {
                title: intent.title.clone(),
                message: intent.message.clone(),
                recipient: self.recipient.clone(),
                action_url: intent.action.as_ref().map(|a| a.url.clone()),
                action_label: intent.action.as_ref().map(|a| a.label.clone()),
            };

            match self.sink.send(&notification).await {
                Ok(()) => report.notifications_sent += 1,
                Err(e) => {
                    tracing::error!("Failed to send notification: {}", e);
                    report.notifications_failed += 1;
                }
            }
        }

        report.rows = decoded.rows.len();
        report.skipped_rows = decoded.errors.len() + reconciliation.errors.len();
        report.open_positions = reconciliation.positions.len();
        report.decision = Some(outcome.decision);
    }

    /// Cycle forever, sleeping until each planned wake time
    pub async fn run(&self, mut state: CycleState) {
        loop {
            let report = self.run_cycle(&mut state).await;
            wait_until(self.clock.as_ref(), report.wake.at, self.max_sleep_slice).await;
            tracing::info!("Cycle completed, starting next cycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::processor::ActionLink;
    use crate::execution::FixedPriceFeed;
    use crate::notify::NotifyError;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::{Arc, Mutex};

    struct StaticLedger {
        rows: Mutex<Option<Vec<Vec<String>>>>,
    }

    impl StaticLedger {
        fn new(rows: &[&[&str]]) -> Self {
            Self {
                rows: Mutex::new(Some(
                    rows.iter()
                        .map(|r| r.iter().map(|c| c.to_string()).collect())
                        .collect(),
                )),
            }
        }

        fn fail_from_now_on(&self) {
            *self.rows.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl SignalLedger for Arc<StaticLedger> {
        async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, LedgerError> {
            let rows = self.rows.lock().unwrap().clone();
            rows.ok_or_else(|| LedgerError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Notification>>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Platform {
                    status: 500,
                    body: "down".to_string(),
                });
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct FrozenClock(DateTime<Utc>);

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn runner(ledger: Arc<StaticLedger>, sink: RecordingSink, now: &str) -> Runner {
        Runner::new(
            Box::new(ledger),
            Box::new(FixedPriceFeed::new(Decimal::from(120))),
            Box::new(sink),
            Box::new(FrozenClock(utc(now))),
            SignalProcessor::new(
                ActionLink {
                    url: "chivo://".to_string(),
                    label: "Open Chivo Wallet".to_string(),
                },
                "https://forms.example".to_string(),
            ),
            ExecutionScheduler::default(),
            "user-key".to_string(),
            Duration::from_secs(10),
        )
    }

    const HEADER: &[&str] = &["Timestamp", "Action", "Quantity", "Price"];

    #[tokio::test]
    async fn test_cycle_sends_sell_and_anchors_on_alert() {
        let ledger = Arc::new(StaticLedger::new(&[
            HEADER,
            &["01/01/2024 00:00:00", "buy", "0.5", "100"],
            &["2024-01-01T00:03:00Z", "sell_signal", "", "118"],
        ]));
        let sink = RecordingSink::default();
        let runner = runner(ledger, sink.clone(), "2024-01-01T00:04:00Z");
        let mut state = CycleState::default();

        let report = runner.run_cycle(&mut state).await;

        assert!(report.ledger_ok);
        assert_eq!(report.open_positions, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(state.last_signal_time.as_deref(), Some("2024-01-01T00:03:00Z"));
        assert_eq!(
            report.wake.basis,
            WakeBasis::Anchored {
                anchor: utc("2024-01-01T00:03:00Z")
            }
        );
        assert_eq!(report.wake.at, utc("2024-01-01T00:06:20Z"));

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0].recipient, "user-key");
        assert_eq!(sent[0].action_url.as_deref(), Some("chivo://"));
        assert!(sent[0].message.contains("Profit: $10.00"));
    }

    #[tokio::test]
    async fn test_ledger_failure_keeps_previous_anchor() {
        let ledger = Arc::new(StaticLedger::new(&[
            HEADER,
            &["2024-01-01T00:00:00Z", "buy_signal", "", "100"],
        ]));
        let runner = runner(ledger.clone(), RecordingSink::default(), "2024-01-01T00:01:00Z");
        let mut state = CycleState::default();

        runner.run_cycle(&mut state).await;
        ledger.fail_from_now_on();
        let report = runner.run_cycle(&mut state).await;

        assert!(!report.ledger_ok);
        assert_eq!(state.cycles, 2);
        assert_eq!(state.last_signal_time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert!(matches!(report.wake.basis, WakeBasis::Anchored { .. }));
    }

    #[tokio::test]
    async fn test_no_alert_schedules_fallback() {
        let ledger = Arc::new(StaticLedger::new(&[HEADER, &["2024-01-01T00:00:00Z", "buy", "0.5", "100"]]));
        let runner = runner(ledger, RecordingSink::default(), "2024-01-01T00:01:00Z");
        let mut state = CycleState {
            last_signal_time: Some("2023-12-31T23:00:00Z".to_string()),
            cycles: 0,
        };

        let report = runner.run_cycle(&mut state).await;

        assert_eq!(state.last_signal_time, None);
        assert_eq!(report.wake.basis, WakeBasis::Fallback);
        assert_eq!(report.decision, Some(AlertDecision::NoAlert));
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_abort_cycle() {
        let ledger = Arc::new(StaticLedger::new(&[
            HEADER,
            &["2024-01-01T00:00:00Z", "buy_signal", "", "100"],
        ]));
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let runner = runner(ledger, sink, "2024-01-01T00:01:00Z");
        let mut state = CycleState::default();

        let report = runner.run_cycle(&mut state).await;

        assert_eq!(report.notifications_failed, 1);
        assert_eq!(report.notifications_sent, 0);
        assert!(report.wake.at > utc("2024-01-01T00:01:00Z"));
    }

    #[tokio::test]
    async fn test_malformed_rows_are_counted() {
        let ledger = Arc::new(StaticLedger::new(&[
            HEADER,
            &["2024-01-01T00:00:00Z", "buy", "lots", "100"],
            &["whenever", "buy", "0.5", "100"],
        ]));
        let runner = runner(ledger, RecordingSink::default(), "2024-01-01T00:01:00Z");

        let report = runner.run_cycle(&mut CycleState::default()).await;

        assert_eq!(report.skipped_rows, 2);
        assert_eq!(report.open_positions, 0);
    }

    #[tokio::test]
    async fn test_bad_price_on_newest_signal_does_not_revive_older_alert() {
        let ledger = Arc::new(StaticLedger::new(&[
            HEADER,
            &["2024-01-01T00:00:00Z", "buy_signal", "", "100"],
            &["2024-01-01T00:03:00Z", "buy", "0.5", "100"],
            &["2024-01-01T00:06:00Z", "sell", "0.5", "110"],
            &["2024-01-01T00:09:00Z", "sell_signal", "", "n/a"],
        ]));
        let sink = RecordingSink::default();
        let runner = runner(ledger, sink.clone(), "2024-01-01T00:10:00Z");
        let mut state = CycleState::default();

        let report = runner.run_cycle(&mut state).await;

        assert_eq!(state.last_signal_time.as_deref(), Some("2024-01-01T00:09:00Z"));
        assert!(matches!(report.decision, Some(AlertDecision::Suppressed { .. })));
        assert_eq!(report.skipped_rows, 0);
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(report.wake.at, utc("2024-01-01T00:12:20Z"));
    }

    #[tokio::test]
    async fn test_check_ledger_propagates_failure() {
        let ledger = Arc::new(StaticLedger::new(&[HEADER]));
        ledger.fail_from_now_on();
        let runner = runner(ledger, RecordingSink::default(), "2024-01-01T00:00:00Z");

        assert!(runner.check_ledger().await.is_err());
    }
}
