use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::time::{sleep, Duration};

pub const DEFAULT_INTERVAL_SECS: i64 = 180; // 3-minute bars
pub const DEFAULT_OFFSET_SECS: i64 = 20; // Run 20 seconds after bar close
pub const DEFAULT_MAX_SLICE_SECS: u64 = 10;

const SHEET_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";
const NAIVE_ISO_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, Error, PartialEq)]
#[error("unparseable signal timestamp '{0}'")]
pub struct TimestampError(pub String);

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Which path produced a wake time
#[derive(Debug, Clone, PartialEq)]
pub enum WakeBasis {
    /// Phase-locked to the grid of the given signal time
    Anchored { anchor: DateTime<Utc> },
    /// Phase-locked to the epoch grid
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WakePlan {
    pub at: DateTime<Utc>,
    pub basis: WakeBasis,
}

/// Parse a ledger timestamp
///
/// Accepts the sheet's `MM/DD/YYYY HH:MM:SS` form, RFC 3339 (`Z` or an
/// explicit offset), and naive ISO-8601. Naive times are taken as UTC.
pub fn parse_signal_time(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let raw = raw.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, SHEET_TIMESTAMP_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_ISO_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| TimestampError(raw.to_string()))
}

/// Computes when the next cycle should run
///
/// Wake times sit `offset` seconds after a boundary of a fixed-width grid.
/// With a signal anchor the grid is the signal's own, so polling resumes on
/// the same phase after a restart. Without one the grid is epoch-aligned.
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    interval_secs: i64,
    offset_secs: i64,
}

impl Default for ExecutionScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_SECS, DEFAULT_OFFSET_SECS)
    }
}

impl ExecutionScheduler {
    /// `interval_secs` must be positive and `offset_secs` below it (checked at config load)
    pub fn new(interval_secs: i64, offset_secs: i64) -> Self {
        Self {
            interval_secs,
            offset_secs,
        }
    }

    /// Next wake instant
    pub fn next_wake(&self, last_signal_time: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
        self.plan(last_signal_time, now).at
    }

    /// Next wake instant together with the path that produced it
    pub fn plan(&self, last_signal_time: Option<&str>, now: DateTime<Utc>) -> WakePlan {
        let parsed = last_signal_time.map(|raw| (raw, parse_signal_time(raw)));

        let plan = match parsed {
            Some((_, Ok(anchor))) => WakePlan {
                at: self.anchored(anchor, now),
                basis: WakeBasis::Anchored { anchor },
            },
            Some((raw, Err(e))) => {
                tracing::error!("Failed to parse last signal time {}: {}", raw, e);
                self.fallback_plan(now)
            }
            None => self.fallback_plan(now),
        };

        match &plan.basis {
            WakeBasis::Anchored { anchor } => tracing::info!(
                "Calculated next execution from signal time {}: {}",
                anchor.to_rfc3339(),
                plan.at.to_rfc3339()
            ),
            WakeBasis::Fallback => tracing::info!(
                "Fallback to current time for next execution: {}",
                plan.at.to_rfc3339()
            ),
        }

        plan
    }

    fn fallback_plan(&self, now: DateTime<Utc>) -> WakePlan {
        WakePlan {
            at: self.fallback(now),
            basis: WakeBasis::Fallback,
        }
    }

    fn anchored(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let anchor_secs = anchor.timestamp();
        let elapsed = now.timestamp() - anchor_secs;
        let mut intervals = elapsed.div_euclid(self.interval_secs) + 1;

        let mut next = self.at_boundary(anchor_secs, intervals);
        if next <= now {
            tracing::warn!(
                "Calculated execution time {} is in the past, advancing to next interval",
                next.to_rfc3339()
            );
            intervals += 1;
            next = self.at_boundary(anchor_secs, intervals);
        }

        next
    }

    /// Earliest `k * interval + offset` strictly after `now`
    fn fallback(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let shifted = now.timestamp() - self.offset_secs;
        let k = shifted.div_euclid(self.interval_secs) + 1;
        self.at_boundary(0, k)
    }

    fn at_boundary(&self, origin_secs: i64, intervals: i64) -> DateTime<Utc> {
        let secs = origin_secs + intervals * self.interval_secs + self.offset_secs;
        DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Sleep until `target` in slices of at most `max_slice`
///
/// The remaining time is recomputed from the wall clock after every slice, so
/// clock adjustments and slow wakeups are absorbed. Returns the number of
/// slices slept.
pub async fn wait_until<C: Clock + ?Sized>(
    clock: &C,
    target: DateTime<Utc>,
    max_slice: Duration,
) -> u32 {
    let mut slices = 0;

    loop {
        let remaining = match (target - clock.now()).to_std() {
            Ok(d) if !d.is_zero() => d,
            _ => break,
        };

        tracing::info!(
            "Awaiting next execution... {} seconds remaining",
            remaining.as_secs()
        );
        sleep(remaining.min(max_slice)).await;
        slices += 1;
    }

    slices
}
