//! Frame pacing statistics.
//!
//! Every submitted frame is counted, and checked against the display time the runtime predicted
//! for it. Statistics are published in windows of [`REPORT_WINDOW`] frames.

use std::time::Instant;

use serde::Serialize;

/// Number of frames accumulated before a report is published.
pub const REPORT_WINDOW: u32 = 100;

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct FrameRefreshReport {
    /// Frames submitted after their predicted display time had passed.
    pub missed_frames: u32,
    pub total_frames: u32,
    /// Refresh rate the runtime asks for, derived from the predicted display period.
    pub expected_framerate: f32,
    /// Frames per second actually submitted over the window.
    pub measured_framerate: f32,
    #[serde(skip)]
    pub window_start: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct RefreshTracker {
    current: FrameRefreshReport,
    last: FrameRefreshReport,
}

impl RefreshTracker {
    /// The last complete window.
    pub fn last(&self) -> &FrameRefreshReport {
        &self.last
    }

    /// The window being accumulated.
    pub fn current(&self) -> &FrameRefreshReport {
        &self.current
    }

    /// Account for one submitted frame.
    ///
    /// Times and period are in nanoseconds of the runtime clock. `now` is `None` when the
    /// runtime can't tell us its current time, in which case missed deadlines aren't counted.
    pub fn record(
        &mut self,
        predicted_display_time: i64,
        predicted_display_period: i64,
        now: Option<i64>,
        wall: Instant,
    ) {
        let current = &mut self.current;
        let start = *current.window_start.get_or_insert(wall);
        if let Some(now) = now {
            if predicted_display_time - now < 0 {
                current.missed_frames += 1;
            }
        }
        current.total_frames += 1;
        current.expected_framerate = if predicted_display_period > 0 {
            1_000_000_000.0 / predicted_display_period as f32
        } else {
            0.0
        };

        if current.total_frames == REPORT_WINDOW {
            let elapsed = wall.saturating_duration_since(start).as_secs_f32();
            current.measured_framerate = if elapsed > 0.0 {
                current.total_frames as f32 / elapsed
            } else {
                0.0
            };
            log::debug!(
                "refresh report: {}/{} frames missed, expected {:.1} fps, measured {:.1} fps",
                current.missed_frames,
                current.total_frames,
                current.expected_framerate,
                current.measured_framerate
            );
            self.last = std::mem::take(&mut self.current);
        }
    }
}
