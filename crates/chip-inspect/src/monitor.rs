//! Advisory "3D done, 2D still pending" monitor.
//!
//! Purely for operator alerting: the monitor observes cycle progress and
//! raises an alert when the 2D pipeline lags the 3D completion beyond a
//! configured threshold. It never forces, skips or delays a judgement.

use std::time::Duration;

/// Where monitor alerts go. Pluggable so stations can wire a tower lamp or
/// HMI banner; the default sink logs a warning.
pub trait AlertSink: Send + Sync {
    fn alert(&self, message: &str);
}

/// Default sink: `log::warn!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, message: &str) {
        log::warn!("{message}");
    }
}

/// Progress snapshot of the running cycle, taken under the coordinator lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleProgress {
    pub cycle_id: u64,
    pub done_2d: bool,
    pub done_3d: bool,
    /// Time since the 3D completion signal, when it has arrived.
    pub since_3d_done: Option<Duration>,
}

/// Non-blocking lag detector, polled by the host application.
pub struct PendingTwoDMonitor {
    threshold: Duration,
    sink: Box<dyn AlertSink>,
}

impl PendingTwoDMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            sink: Box::new(LogAlertSink),
        }
    }

    pub fn with_sink(threshold: Duration, sink: Box<dyn AlertSink>) -> Self {
        Self { threshold, sink }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Inspect a snapshot; alert and return true when the 2D pipeline has
    /// been pending past the threshold since the 3D completion.
    pub fn check(&self, progress: Option<CycleProgress>) -> bool {
        let Some(p) = progress else {
            return false;
        };
        let lagging = p.done_3d
            && !p.done_2d
            && p.since_3d_done.is_some_and(|since| since >= self.threshold);
        if lagging {
            self.sink.alert(&format!(
                "cycle {}: 2D pipeline still pending {:.1}s after 3D completion",
                p.cycle_id,
                p.since_3d_done.unwrap_or_default().as_secs_f64()
            ));
        }
        lagging
    }
}
