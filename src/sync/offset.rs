//! Clock offset estimation
//!
//! During the sync phase the server streams its current time as 8-byte
//! datagrams. Each received sample yields a `server_time - local_time`
//! difference; once the server says "Stop Sync" the estimator averages the
//! steady-state tail of those differences into a single scalar offset that is
//! published exactly once per session.

use log::{info, warn};
use parking_lot::Mutex;

/// One timestamp exchange: the server's clock paired with the local clock at
/// the moment of receipt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampSample {
    pub server_time: f64,
    pub local_time: f64,
}

impl TimestampSample {
    pub fn new(server_time: f64, local_time: f64) -> Self {
        Self {
            server_time,
            local_time,
        }
    }

    /// Clock difference this sample observed.
    pub fn diff(&self) -> f64 {
        self.server_time - self.local_time
    }
}

/// The published clock correction. `value` is meaningful only once `computed`
/// is true; it never transitions back to false within a session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OffsetState {
    pub value: f64,
    pub computed: bool,
}

struct EstimatorInner {
    diffs: Vec<f64>,
    state: OffsetState,
}

/// Accumulates timestamp differences and computes a one-shot clock offset.
///
/// The diff history is written only by the sync listener's receive path and
/// read only during [`compute_once`](OffsetEstimator::compute_once); the mutex
/// also orders the publish of `OffsetState` before any subsequent read by the
/// recorder.
pub struct OffsetEstimator {
    inner: Mutex<EstimatorInner>,
    /// Fraction of the earliest diffs discarded before averaging.
    warmup_fraction: f64,
}

impl OffsetEstimator {
    /// Create an estimator keeping the later `1 - warmup_fraction` of samples.
    ///
    /// The fraction is clamped to `[0, 1)`; the default deployment value 0.5
    /// keeps the later half, under the assumption that early samples reflect
    /// transient network/startup jitter.
    pub fn new(warmup_fraction: f64) -> Self {
        let warmup_fraction = if warmup_fraction.is_finite() {
            warmup_fraction.clamp(0.0, 0.99)
        } else {
            0.5
        };
        Self {
            inner: Mutex::new(EstimatorInner {
                diffs: Vec::new(),
                state: OffsetState::default(),
            }),
            warmup_fraction,
        }
    }

    /// Append one timestamp sample's difference to the history.
    ///
    /// Samples arriving after the offset has been computed are recorded but
    /// can no longer influence the published value.
    pub fn add_sample(&self, sample: TimestampSample) {
        let mut inner = self.inner.lock();
        inner.diffs.push(sample.diff());
    }

    /// Number of samples accumulated so far.
    pub fn sample_count(&self) -> usize {
        self.inner.lock().diffs.len()
    }

    /// Compute and publish the offset. Idempotent: the first call wins and
    /// later calls are no-ops.
    ///
    /// With an empty history the offset degenerates to zero (still marked
    /// computed so recording can proceed).
    pub fn compute_once(&self) {
        let mut inner = self.inner.lock();
        if inner.state.computed {
            return;
        }

        if inner.diffs.is_empty() {
            warn!("No timestamp samples received; offset defaults to 0");
            inner.state = OffsetState {
                value: 0.0,
                computed: true,
            };
            return;
        }

        let skip = (inner.diffs.len() as f64 * self.warmup_fraction) as usize;
        let tail = &inner.diffs[skip..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;

        info!(
            "Computed clock offset {:.6}s from {} of {} samples",
            mean,
            tail.len(),
            inner.diffs.len()
        );
        inner.state = OffsetState {
            value: mean,
            computed: true,
        };
    }

    /// Current published state. `computed` stays false until
    /// [`compute_once`](OffsetEstimator::compute_once) runs.
    pub fn state(&self) -> OffsetState {
        self.inner.lock().state
    }
}
