//! Progress sinks, throttling and aggregation.
//!
//! Long-running operations report `(completed, total)` pairs to a
//! [`ProgressSink`]. When several operations run concurrently, each gets an
//! [`ItemSink`] from a shared [`ProgressHub`]; a single consumer task folds
//! the events into one monotonically increasing percentage and forwards it,
//! coalescing updates that arrive within the throttle window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receives `(completed, total)` progress pairs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, completed: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn report(&self, completed: u64, total: u64) {
        self(completed, total);
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _: u64, _: u64) {}
}

/// Integer percentage of `completed` over `total`. An empty total counts as done.
pub fn percentage(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = u128::from(completed.min(total)) * 100 / u128::from(total);
    pct as u8
}

/// Coalesces updates that arrive within `window` of the previous one.
///
/// The terminal 100% update always passes, exactly once.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_emit: Option<Instant>,
    last_percentage: Option<u8>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
            last_percentage: None,
        }
    }

    /// Should an update at `percentage` be emitted now?
    pub fn ready(&mut self, percentage: u8) -> bool {
        let emit = match (self.last_emit, self.last_percentage) {
            (_, Some(100)) => false,
            _ if percentage >= 100 => true,
            (None, _) => true,
            (Some(at), last) => at.elapsed() >= self.window && last != Some(percentage),
        };
        if emit {
            self.last_emit = Some(Instant::now());
            self.last_percentage = Some(percentage);
        }
        emit
    }
}

/// Folded view of every item reporting to a [`ProgressHub`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub completed: u64,
    pub total: u64,
    pub items_finished: usize,
    pub items_total: usize,
    pub percentage: u8,
}

#[derive(Debug)]
enum ProgressEvent {
    Advanced { item: usize, completed: u64, total: u64 },
    Finished { item: usize },
}

/// Fan-in point for concurrent progress producers.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressHub {
    /// Spawn the consumer task.
    ///
    /// `emit` is called with throttled aggregates; the handle resolves to
    /// the final aggregate once every hub and sink clone has been dropped.
    pub fn spawn<F>(items_total: usize, window: Duration, mut emit: F) -> (Self, JoinHandle<Aggregate>)
    where
        F: FnMut(Aggregate) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut items: HashMap<usize, (u64, u64)> = HashMap::new();
            let mut finished = std::collections::HashSet::new();
            let mut throttle = Throttle::new(window);
            let mut current = Aggregate {
                items_total,
                ..Aggregate::default()
            };
            let mut emitted: Option<Aggregate> = None;

            while let Some(event) = rx.recv().await {
                match event {
                    ProgressEvent::Advanced {
                        item,
                        completed,
                        total,
                    } => {
                        let slot = items.entry(item).or_insert((0, total));
                        slot.0 = slot.0.max(completed);
                        slot.1 = total;
                    }
                    ProgressEvent::Finished { item } => {
                        finished.insert(item);
                    }
                }

                let (completed, total) = items
                    .values()
                    .fold((0u64, 0u64), |(c, t), (ic, it)| (c + ic, t + it));
                // Failed items finish short of their total; the phase is still over.
                let pct = if finished.len() >= items_total {
                    100
                } else {
                    percentage(completed, total).min(99)
                };
                current = Aggregate {
                    completed,
                    total,
                    items_finished: finished.len(),
                    items_total,
                    percentage: pct.max(current.percentage),
                };

                if throttle.ready(current.percentage) {
                    emit(current);
                    emitted = Some(current);
                }
            }

            if emitted != Some(current) && current.percentage >= 100 {
                emit(current);
            }
            current
        });

        (Self { tx }, handle)
    }

    /// Sink for one item.
    pub fn sink(&self, item: usize) -> ItemSink {
        ItemSink {
            item,
            tx: self.tx.clone(),
        }
    }

    /// Mark an item as finished, successfully or not.
    pub fn finished(&self, item: usize) {
        let _ = self.tx.send(ProgressEvent::Finished { item });
    }
}

/// Progress sink bound to one item of a [`ProgressHub`].
#[derive(Debug, Clone)]
pub struct ItemSink {
    item: usize,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ItemSink {
    fn report(&self, completed: u64, total: u64) {
        let _ = self.tx.send(ProgressEvent::Advanced {
            item: self.item,
            completed,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn percentage_edges() {
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(0, 10), 0);
        assert_eq!(percentage(5, 10), 50);
        assert_eq!(percentage(20, 10), 100);
        assert_eq!(percentage(u64::MAX - 1, u64::MAX), 99);
    }

    #[test]
    fn throttle_coalesces_but_passes_terminal() {
        let mut throttle = Throttle::new(Duration::from_secs(3600));
        assert!(throttle.ready(1));
        assert!(!throttle.ready(2));
        assert!(!throttle.ready(50));
        assert!(throttle.ready(100));
        assert!(!throttle.ready(100));
    }

    #[test]
    fn zero_window_skips_repeats() {
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.ready(10));
        assert!(!throttle.ready(10));
        assert!(throttle.ready(11));
    }

    #[test]
    fn closure_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = move |c: u64, t: u64| captured.lock().unwrap().push((c, t));
        sink.report(1, 2);
        NullSink.report(1, 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2)]);
    }

    #[tokio::test]
    async fn hub_aggregates_monotonically() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let (hub, handle) = ProgressHub::spawn(2, Duration::ZERO, move |agg| {
            captured.lock().unwrap().push(agg.percentage);
        });

        let a = hub.sink(0);
        let b = hub.sink(1);
        a.report(50, 100);
        b.report(0, 100);
        b.report(100, 100);
        a.report(10, 100); // stale report must not move progress backwards
        a.report(100, 100);
        hub.finished(0);
        hub.finished(1);
        drop((a, b, hub));

        let last = handle.await.unwrap();
        assert_eq!(last.percentage, 100);
        assert_eq!(last.completed, 200);
        assert_eq!(last.items_finished, 2);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);
    }

    #[tokio::test]
    async fn failed_items_still_complete_the_hub() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let (hub, handle) = ProgressHub::spawn(2, Duration::ZERO, move |agg| {
            captured.lock().unwrap().push(agg.percentage);
        });

        hub.sink(0).report(100, 100);
        hub.sink(1).report(10, 100);
        hub.finished(0);
        hub.finished(1);
        drop(hub);

        let last = handle.await.unwrap();
        assert_eq!(last.percentage, 100);
        assert_eq!(last.completed, 110);
        assert_eq!(seen.lock().unwrap().last(), Some(&100));
    }

    #[tokio::test]
    async fn hub_without_completion_stays_below_100() {
        let (hub, handle) = ProgressHub::spawn(1, Duration::ZERO, |_| {});
        hub.sink(0).report(100, 100);
        drop(hub);
        let last = handle.await.unwrap();
        assert_eq!(last.percentage, 99);
    }
}
