//! Pipeline statistics and frame-rate tracking

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding one-second frame counter.
///
/// Call `tick()` once per processed frame; it reports the completed window's
/// count whenever a full second has elapsed.
#[derive(Debug)]
pub struct FpsTracker {
    window_start: Option<Instant>,
    count: u32,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            window_start: None,
            count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<u32> {
        let start = *self.window_start.get_or_insert(now);
        self.count += 1;
        if now.duration_since(start) >= Duration::from_secs(1) {
            let fps = self.count;
            self.count = 0;
            self.window_start = Some(now);
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared pipeline counters, updated lock-free by the producer worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
    nal_units: AtomicU64,
    fps: AtomicU32,
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub nal_units: u64,
    pub fps: u32,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_frame(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nal_units(&self, n: u64) {
        self.nal_units.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_fps(&self, fps: u32) {
        self.fps.store(fps, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            nal_units: self.nal_units.load(Ordering::Relaxed),
            fps: self.fps.load(Ordering::Relaxed),
        }
    }
}
