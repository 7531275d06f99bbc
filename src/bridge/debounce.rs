//! Leading-edge debounce for per-path telemetry
//!
//! The first value after a quiet period goes out immediately. Every value that
//! arrives within `interval` of that emission is dropped, there is no trailing
//! flush. The next value after the window has closed is emitted and opens a new
//! window.
//!
//! ```text
//! values   x  x x   x         x   x
//!          |-------|          |-------|
//! emitted  x                  x
//! ```

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::binding::PathBinding;
use crate::telemetry::PathValue;

/// Per-binding debounce state
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_emitted_at: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted_at: None,
        }
    }

    /// Decides whether a value arriving at `now` is emitted
    pub fn offer(&mut self, now: Instant) -> bool {
        let open = match self.last_emitted_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if open {
            self.last_emitted_at = Some(now);
        }
        open
    }

    pub fn last_emitted_at(&self) -> Option<Instant> {
        self.last_emitted_at
    }
}

/// Runs the debounce loop for one binding until cancelled or the upstream closes
///
/// `deliver` receives the keyword and the formatted value once per emission.
pub async fn run_debounced<F>(
    binding: PathBinding,
    mut values: broadcast::Receiver<PathValue>,
    cancel: CancellationToken,
    mut deliver: F,
) where
    F: FnMut(&str, String) + Send,
{
    let mut debouncer = Debouncer::new(binding.interval);

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Publisher for {} cancelled", binding.path);
                break;
            }
            received = values.recv() => received,
        };

        match received {
            Ok(value) => {
                if debouncer.offer(Instant::now()) {
                    deliver(&binding.keyword, value.formatted());
                } else {
                    trace!("Suppressed value for {} inside debounce window", binding.path);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Publisher for {} lagged, skipped {} values", binding.path, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Telemetry stream for {} closed", binding.path);
                break;
            }
        }
    }
}

/// A running debounced publisher task
#[derive(Debug)]
pub struct DebouncedPublisher {
    path: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DebouncedPublisher {
    pub fn spawn<F>(
        binding: PathBinding,
        values: broadcast::Receiver<PathValue>,
        cancel: CancellationToken,
        deliver: F,
    ) -> Self
    where
        F: FnMut(&str, String) + Send + 'static,
    {
        let path = binding.path.clone();
        let task = tokio::spawn(run_debounced(binding, values, cancel.clone(), deliver));
        Self { path, cancel, task }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stops the task; no delivery happens after this returns
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{LocalBus, TelemetryBus};
    use tokio::sync::mpsc;

    const PATH: &str = "electrical.batteries.1.voltage";

    fn binding(interval: Duration) -> PathBinding {
        PathBinding {
            node_name: "plate".to_string(),
            path: PATH.to_string(),
            keyword: "p5b51.val".to_string(),
            interval,
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_collecting(
        bus: &LocalBus,
        interval: Duration,
    ) -> (DebouncedPublisher, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = DebouncedPublisher::spawn(
            binding(interval),
            bus.subscribe(PATH),
            CancellationToken::new(),
            move |keyword, value| {
                let _ = tx.send(format!("{}={}", keyword, value));
            },
        );
        (publisher, rx)
    }

    #[test]
    fn first_value_is_emitted_immediately() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        assert!(debouncer.offer(Instant::now()));
    }

    #[test]
    fn burst_inside_window_emits_only_first() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(2));

        let emitted: Vec<bool> = (0..20)
            .map(|i| debouncer.offer(start + Duration::from_millis(i * 100)))
            .collect();

        assert!(emitted[0]);
        assert!(emitted[1..].iter().all(|e| !e));
        assert_eq!(debouncer.last_emitted_at(), Some(start));
    }

    #[test]
    fn value_after_interval_is_emitted() {
        let start = Instant::now();
        let interval = Duration::from_secs(2);
        let mut debouncer = Debouncer::new(interval);

        assert!(debouncer.offer(start));
        assert!(debouncer.offer(start + interval + Duration::from_millis(1)));
    }

    #[test]
    fn value_just_before_interval_is_dropped() {
        let start = Instant::now();
        let interval = Duration::from_secs(2);
        let mut debouncer = Debouncer::new(interval);

        assert!(debouncer.offer(start));
        assert!(!debouncer.offer(start + interval - Duration::from_millis(1)));
    }

    #[test]
    fn window_restarts_from_last_emission() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(2));

        assert!(debouncer.offer(start));
        assert!(debouncer.offer(start + Duration::from_millis(2100)));
        // measured from 2.1s, not from 0s
        assert!(!debouncer.offer(start + Duration::from_millis(4000)));
        assert!(debouncer.offer(start + Duration::from_millis(4100)));
    }

    #[tokio::test(start_paused = true)]
    async fn publisher_emits_leading_values() {
        let bus = LocalBus::new();
        let (_publisher, mut rx) = spawn_collecting(&bus, Duration::from_secs(2));
        settle().await;

        bus.publish(PathValue::new(PATH, 12.6));
        settle().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        bus.publish(PathValue::new(PATH, 12.7));
        settle().await;
        tokio::time::advance(Duration::from_millis(2000)).await;
        bus.publish(PathValue::new(PATH, 12.8));
        settle().await;

        assert_eq!(rx.try_recv().unwrap(), "p5b51.val=12.6");
        assert_eq!(rx.try_recv().unwrap(), "p5b51.val=12.8");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn no_flush_when_stream_closes_mid_window() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (values_tx, values_rx) = broadcast::channel(8);

        let task = tokio::spawn(run_debounced(
            binding(Duration::from_secs(2)),
            values_rx,
            CancellationToken::new(),
            move |keyword, value| {
                let _ = tx.send(format!("{}={}", keyword, value));
            },
        ));

        values_tx.send(PathValue::new(PATH, 1)).unwrap();
        values_tx.send(PathValue::new(PATH, 2)).unwrap();
        drop(values_tx);
        task.await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), "p5b51.val=1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_publisher_stays_silent() {
        let bus = LocalBus::new();
        let (publisher, mut rx) = spawn_collecting(&bus, Duration::ZERO);
        settle().await;

        bus.publish(PathValue::new(PATH, 1));
        settle().await;
        publisher.cancel();
        assert_eq!(publisher.path(), PATH);

        for i in 0..5 {
            bus.publish(PathValue::new(PATH, i));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        settle().await;

        assert_eq!(rx.try_recv().unwrap(), "p5b51.val=1");
        assert!(rx.try_recv().is_err());
    }
}
