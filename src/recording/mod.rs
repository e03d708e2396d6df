//! Buffer-then-commit recording pipeline
//!
//! Pose samples captured before the clock offset is known are held in an
//! in-memory FIFO; the moment the offset is published they are drained into
//! the trajectory log with the single published correction, and every later
//! sample is written straight through with that same correction.

pub mod log;
pub mod pose;

pub use log::{TrajectoryLog, LOG_HEADER};
pub use pose::{PoseSample, PoseSource, SyntheticPoseSource};

use crate::error::Result;
use crate::sync::offset::OffsetEstimator;
use ::log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

struct RecorderInner {
    buffer: VecDeque<PoseSample>,
    drained: bool,
    log: Option<TrajectoryLog>,
}

/// Session recorder: two modes gated by the published offset state.
///
/// One mutex over buffer, mode, and log handle enforces the single-writer
/// discipline: the drain transition and pass-through writes are mutually
/// exclusive, so a drained record can never land after a pass-through record
/// with an earlier capture time, and the two drain triggers (first sample
/// after the offset flips, or the compute event directly) cannot double-drain.
pub struct Recorder {
    inner: Mutex<RecorderInner>,
    estimator: Arc<OffsetEstimator>,
}

impl Recorder {
    pub fn new(estimator: Arc<OffsetEstimator>) -> Self {
        Self {
            inner: Mutex::new(RecorderInner {
                buffer: VecDeque::new(),
                drained: false,
                log: None,
            }),
            estimator,
        }
    }

    /// Attach the log destination chosen on first server contact. Creates the
    /// file and writes the header; failure is fatal to the session.
    pub fn attach_log(&self, path: impl Into<PathBuf>) -> Result<()> {
        let log = TrajectoryLog::create(path.into())?;
        let mut inner = self.inner.lock();
        info!("Recording to {}", log.path().display());
        inner.log = Some(log);
        // Offset may already be published (degenerate orderings); catch up
        self.drain_locked(&mut inner)?;
        Ok(())
    }

    /// Consume one pose sample from the capture driver.
    ///
    /// Buffers while the offset is unknown (or the log is not yet attached),
    /// otherwise drains any held samples and writes this one through.
    pub fn record(&self, sample: PoseSample) -> Result<()> {
        let mut inner = self.inner.lock();
        let offset = self.estimator.state();

        if offset.computed && inner.log.is_some() {
            self.drain_locked(&mut inner)?;
            let log = inner.log.as_mut().unwrap();
            log.append(
                sample.capture_time + offset.value,
                sample.position,
                sample.rotation,
            )?;
        } else {
            inner.buffer.push_back(sample);
        }
        Ok(())
    }

    /// Drain trigger for the compute event itself, so buffered samples reach
    /// the log even if no further pose sample ever arrives.
    pub fn drain_now(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.drain_locked(&mut inner)
    }

    /// One-time drain of the FIFO, in insertion order, with the single
    /// published offset. No-op until both the offset and the log exist.
    fn drain_locked(&self, inner: &mut RecorderInner) -> Result<()> {
        if inner.drained || inner.log.is_none() {
            return Ok(());
        }
        let offset = self.estimator.state();
        if !offset.computed {
            return Ok(());
        }

        let count = inner.buffer.len();
        let log = inner.log.as_mut().unwrap();
        while let Some(sample) = inner.buffer.pop_front() {
            log.append(
                sample.capture_time + offset.value,
                sample.position,
                sample.rotation,
            )?;
        }
        inner.drained = true;
        if count > 0 {
            debug!("Drained {} buffered samples (offset {:.6}s)", count, offset.value);
        }
        Ok(())
    }

    /// Flush buffered log writes to the OS. Called by the periodic flush task.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.log.as_mut() {
            log.flush()?;
        }
        Ok(())
    }

    /// Samples currently held in the FIFO.
    pub fn buffered_count(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Records written to the log so far.
    pub fn record_count(&self) -> u64 {
        self.inner
            .lock()
            .log
            .as_ref()
            .map(|l| l.record_count())
            .unwrap_or(0)
    }

    /// Seal the log for upload: drain anything still drainable, then fully
    /// flush and close. Returns `None` if no log destination was ever
    /// assigned (degenerate session).
    pub fn seal(&self) -> Result<Option<PathBuf>> {
        let mut inner = self.inner.lock();
        self.drain_locked(&mut inner)?;
        match inner.log.take() {
            Some(log) => {
                let records = log.record_count();
                let path = log.seal()?;
                info!("Sealed {} ({} records)", path.display(), records);
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}
