//! Periodic frame-rate samples as a stream

use futures::{Stream, ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::metrics::{Metrics, RateSample};

/// Stream of [`RateSample`]s, one per completed window, ending when the
/// session stops.
///
/// The stream is `Unpin`, so `StreamExt::next` works on it directly.
pub struct RateWindows {
    metrics: Arc<Metrics>,
    interval: Interval,
    stopped: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl RateWindows {
    /// Sample `metrics` every window until `stop` is cancelled.
    pub fn new(metrics: Arc<Metrics>, stop: CancellationToken) -> Self {
        let period = metrics.window();
        let start = Instant::from_std(metrics.started()) + period;
        let mut interval = interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { metrics, interval, stopped: Box::pin(stop.cancelled_owned()) }
    }
}

impl Stream for RateWindows {
    type Item = RateSample;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.stopped.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }

        loop {
            let tick = ready!(this.interval.poll_tick(cx));
            // A tick that lands a hair before the window closes yields no
            // sample; wait for the next one.
            if let Some(sample) = this.metrics.sample_window_at(tick.into_std()) {
                return Poll::Ready(Some(sample));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn emits_one_sample_per_window() {
        let metrics = Arc::new(Metrics::new(Duration::from_secs(1)));
        let stop = CancellationToken::new();
        let mut samples = RateWindows::new(Arc::clone(&metrics), stop.clone());

        for _ in 0..30 {
            metrics.record_video_arrival();
        }
        let first = samples.next().await.unwrap();
        assert_eq!(first.frames, 30);
        assert_eq!(first.elapsed, Duration::from_secs(1));

        for _ in 0..15 {
            metrics.record_video_arrival();
        }
        let second = samples.next().await.unwrap();
        assert_eq!(second.frames, 15);

        stop.cancel();
        assert!(samples.next().await.is_none());
    }

    fn assert_unpin<T: Unpin>() {}

    #[test]
    fn can_be_polled_without_pinning() {
        assert_unpin::<RateWindows>();
    }

    #[tokio::test(start_paused = true)]
    async fn ends_immediately_when_already_stopped() {
        let metrics = Arc::new(Metrics::new(Duration::from_secs(1)));
        let stop = CancellationToken::new();
        stop.cancel();

        let mut samples = RateWindows::new(metrics, stop);
        assert!(samples.next().await.is_none());
    }
}
