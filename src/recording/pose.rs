//! Pose samples and the pose-source seam
//!
//! Platform tracking (ARKit, OpenXR, ...) lives outside this crate. Each
//! device integration supplies a [`PoseSource`]; the crate ships a synthetic
//! implementation for hardware-free runs and tests.

use crate::clock::wall_clock_secs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One head-pose observation from the tracking collaborator.
///
/// `capture_time` is local wall-clock seconds and is monotonically
/// non-decreasing within a session. Position is meters; rotation is a unit
/// quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub capture_time: f64,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl PoseSample {
    pub fn new(capture_time: f64, position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            capture_time,
            position,
            rotation,
        }
    }
}

/// Blocking source of pose samples at the platform's native rate.
///
/// `next_pose` returns `None` once the source is exhausted or stopped; the
/// capture driver exits its loop at that point.
pub trait PoseSource: Send {
    fn next_pose(&mut self) -> Option<PoseSample>;
}

/// Synthetic pose source tracing a slow circle at a fixed rate.
///
/// Stands in for platform tracking: same interface, deterministic motion, no
/// sensors required.
pub struct SyntheticPoseSource {
    period: Duration,
    stop: Arc<AtomicBool>,
    ticks: u64,
}

impl SyntheticPoseSource {
    /// `rate_hz` samples per second until `stop` is set.
    pub fn new(rate_hz: f64, stop: Arc<AtomicBool>) -> Self {
        let rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 {
            rate_hz
        } else {
            90.0
        };
        Self {
            period: Duration::from_secs_f64(1.0 / rate_hz),
            stop,
            ticks: 0,
        }
    }
}

impl PoseSource for SyntheticPoseSource {
    fn next_pose(&mut self) -> Option<PoseSample> {
        if self.stop.load(Ordering::Relaxed) {
            return None;
        }
        thread::sleep(self.period);

        let t = self.ticks as f32 * self.period.as_secs_f32();
        self.ticks += 1;

        // 1 m radius circle at head height, identity-ish orientation wobble
        let angle = 0.2 * t;
        Some(PoseSample::new(
            wall_clock_secs(),
            [angle.cos(), 1.6, angle.sin()],
            [0.0, (0.5 * angle).sin() * 0.05, 0.0, 1.0],
        ))
    }
}
