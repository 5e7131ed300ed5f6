//! Batched alert delivery.
//!
//! Alerts pile up in a priority queue between flushes so recipients get one
//! summary message instead of a burst of individual tick events. Flushes are
//! driven by the tick loop, at most once per interval, and hand the rendered
//! batch to the delivery task over a channel.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::tracker::Alert;

/// Heap entry ordered by (magnitude, timeframe): the strongest alert first,
/// and among equals the larger timeframe.
struct PendingAlert(Alert);

impl PendingAlert {
    fn key(&self) -> (u32, crate::timeframe::Timeframe) {
        (self.0.magnitude, self.0.timeframe)
    }
}

impl PartialEq for PendingAlert {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingAlert {}

impl PartialOrd for PendingAlert {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingAlert {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

pub struct NotificationManager {
    queue: BinaryHeap<PendingAlert>,
    flush_interval: TimeDelta,
    last_flush: Option<DateTime<Utc>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl NotificationManager {
    pub fn new(flush_interval: TimeDelta, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            queue: BinaryHeap::new(),
            flush_interval,
            last_flush: None,
            outbound,
        }
    }

    pub fn enqueue(&mut self, alert: Alert) {
        self.queue.push(PendingAlert(alert));
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Sends the batch if anything is pending and the interval has elapsed
    /// since the previous flush. Returns whether a batch went out.
    pub fn flush_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        if let Some(last) = self.last_flush {
            if now - last < self.flush_interval {
                return false;
            }
        }

        let alerts = self.drain();
        let message = format_batch(&alerts);
        self.last_flush = Some(now);

        match self.outbound.send(message) {
            Ok(()) => debug!("Flushed batch of {} alert(s)", alerts.len()),
            Err(_) => warn!("Notification channel closed, dropping batch"),
        }
        true
    }

    /// Pops all pending alerts in priority order, strongest first.
    fn drain(&mut self) -> Vec<Alert> {
        let mut alerts = Vec::with_capacity(self.queue.len());
        while let Some(PendingAlert(alert)) = self.queue.pop() {
            alerts.push(alert);
        }
        alerts
    }
}

/// Renders a batch: a headline line with one entry per symbol (in priority
/// order, exclamation marks scaled to magnitude), then one section per alert.
fn format_batch(alerts: &[Alert]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut headline: Vec<String> = Vec::new();
    for alert in alerts {
        if seen.contains(&alert.symbol.as_str()) {
            continue;
        }
        seen.push(&alert.symbol);
        let bangs = "!".repeat(alert.magnitude.clamp(1, 5) as usize);
        headline.push(format!("{} {} {}", alert.symbol, alert.direction, bangs));
    }

    let mut out = headline.join(" ");
    for alert in alerts {
        out.push_str(&format!(
            "\n\n# {} {} {}\nVolatility: {} pips (score {}), Activity: {} ticks (score {})",
            alert.symbol,
            alert.timeframe,
            alert.direction,
            alert.pip_change,
            alert.volatility_score,
            alert.tick_count,
            alert.activity_score,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;
    use crate::tracker::Direction;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    fn alert(symbol: &str, timeframe: Timeframe, volatility: u32, activity: u32) -> Alert {
        Alert {
            symbol: symbol.to_string(),
            timeframe,
            direction: Direction::Up,
            volatility_score: volatility,
            activity_score: activity,
            magnitude: volatility * (activity + 1),
            pip_change: 120,
            tick_count: 300,
            timestamp: at(12, 0, 0),
        }
    }

    fn manager(secs: i64) -> (NotificationManager, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NotificationManager::new(TimeDelta::seconds(secs), tx), rx)
    }

    #[test]
    fn drains_by_magnitude_then_timeframe() {
        let (mut manager, _rx) = manager(15);
        manager.enqueue(alert("EURUSD", Timeframe::M1, 1, 0)); // magnitude 1
        manager.enqueue(alert("GBPUSD", Timeframe::M1, 3, 1)); // magnitude 6
        manager.enqueue(alert("EURUSD", Timeframe::H1, 1, 0)); // magnitude 1, larger TF
        manager.enqueue(alert("BTCUSD", Timeframe::M5, 2, 1)); // magnitude 4

        let drained = manager.drain();
        let order: Vec<(&str, Timeframe)> = drained
            .iter()
            .map(|a| (a.symbol.as_str(), a.timeframe))
            .collect();
        assert_eq!(
            order,
            vec![
                ("GBPUSD", Timeframe::M1),
                ("BTCUSD", Timeframe::M5),
                ("EURUSD", Timeframe::H1),
                ("EURUSD", Timeframe::M1),
            ]
        );
    }

    #[test]
    fn first_flush_is_immediate_then_interval_gated() {
        let (mut manager, mut rx) = manager(15);

        manager.enqueue(alert("EURUSD", Timeframe::M1, 1, 0));
        assert!(manager.flush_due(at(12, 0, 0)));
        assert!(rx.try_recv().is_ok());

        // Within the interval nothing goes out, pending or not.
        manager.enqueue(alert("EURUSD", Timeframe::M1, 2, 0));
        assert!(!manager.flush_due(at(12, 0, 10)));
        assert_eq!(manager.pending(), 1);

        // Once the interval elapses the queue drains.
        assert!(manager.flush_due(at(12, 0, 15)));
        assert_eq!(manager.pending(), 0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn empty_queue_never_flushes() {
        let (mut manager, mut rx) = manager(15);
        assert!(!manager.flush_due(at(12, 0, 0)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn batch_format_headline_and_sections() {
        let mut big = alert("BTCUSD", Timeframe::M1, 2, 0); // magnitude 2
        big.pip_change = 120;
        big.tick_count = 300;
        let small = alert("GBPUSD", Timeframe::M5, 1, 0); // magnitude 1

        let text = format_batch(&[big, small]);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("BTCUSD UP !! GBPUSD UP !"));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("# BTCUSD M1 UP"));
        assert_eq!(
            lines.next(),
            Some("Volatility: 120 pips (score 2), Activity: 300 ticks (score 0)")
        );
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("# GBPUSD M5 UP"));
    }

    #[test]
    fn headline_lists_each_symbol_once() {
        let alerts = vec![
            alert("EURUSD", Timeframe::M5, 3, 0),
            alert("EURUSD", Timeframe::M1, 1, 0),
        ];
        let text = format_batch(&alerts);
        assert_eq!(text.lines().next(), Some("EURUSD UP !!!"));
        assert_eq!(text.matches("# EURUSD").count(), 2);
    }

    #[test]
    fn bangs_are_clamped_to_five() {
        let huge = alert("EURUSD", Timeframe::M1, 5, 3); // magnitude 20
        let text = format_batch(&[huge]);
        assert_eq!(text.lines().next(), Some("EURUSD UP !!!!!"));
    }
}
