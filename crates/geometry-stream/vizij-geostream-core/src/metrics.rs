use serde::{Deserialize, Serialize};

/// Snapshot of streaming and playback counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackMetrics {
    /// Exponentially smoothed presentation rate
    pub smoothed_fps: f64,
    /// Drop counter since the last loop (or seek)
    pub dropped_frames: u64,
    /// Drop counter increments over the streamer's lifetime
    pub dropped_frames_total: u64,
    /// Frames never shown between consecutive shown frames, one count per gap
    pub skipped_frames: u64,
    pub frames_shown: u64,
    pub loops_completed: u64,
    /// Slots loaded and waiting to be shown
    pub buffered: usize,
    pub outstanding_jobs: usize,
    pub jobs_dispatched: u64,
    pub slots_reclaimed: u64,
    pub read_failures: u64,
    /// Bytes reserved by the slot pool
    pub memory_usage_bytes: usize,
}

impl PlaybackMetrics {
    #[inline]
    pub fn new(target_fps: f64) -> Self {
        Self {
            smoothed_fps: target_fps,
            dropped_frames: 0,
            dropped_frames_total: 0,
            skipped_frames: 0,
            frames_shown: 0,
            loops_completed: 0,
            buffered: 0,
            outstanding_jobs: 0,
            jobs_dispatched: 0,
            slots_reclaimed: 0,
            read_failures: 0,
            memory_usage_bytes: 0,
        }
    }

    /// Share of frames that reached the screen, in `[0, 1]`
    pub fn presentation_ratio(&self) -> f64 {
        let expected = self.frames_shown + self.skipped_frames;
        if expected == 0 {
            1.0
        } else {
            self.frames_shown as f64 / expected as f64
        }
    }
}

impl Default for PlaybackMetrics {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presentation_ratio() {
        let mut m = PlaybackMetrics::new(30.0);
        assert_eq!(m.presentation_ratio(), 1.0);
        m.frames_shown = 3;
        m.skipped_frames = 1;
        m.dropped_frames_total = 5;
        assert_eq!(m.presentation_ratio(), 0.75);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(PlaybackMetrics::new(24.0)).unwrap();
        assert_eq!(json["smoothedFps"], 24.0);
        assert_eq!(json["droppedFramesTotal"], 0);
    }
}
