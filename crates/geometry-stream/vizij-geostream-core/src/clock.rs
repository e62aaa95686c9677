//! Playback clock: wall time in, target frame index and drop data out.
//!
//! The clock only does time math. Drops are counted on every tick that moves
//! the target more than one frame past the last shown frame, whether or not
//! the target is ready. Showing a frame is confirmed back through
//! [`PlaybackClock::commit_shown`], which moves the last shown index and
//! smooths the frame rate.

use serde::{Deserialize, Serialize};

/// Weight kept from the previous smoothed FPS on each update
pub const DEFAULT_FPS_DECAY: f64 = 0.9;

/// Exponentially smoothed frame rate.
///
/// `decay * previous + (1 - decay) * (1000 / interval_ms)`
#[inline]
pub fn smooth_fps(previous: f64, interval_ms: f64, decay: f64) -> f64 {
    decay * previous + (1.0 - decay) * (1000.0 / interval_ms)
}

/// Frames between the last shown index and `target`, across the loop seam.
///
/// With nothing shown yet the next frame counts as a single step.
pub fn frames_in_advance(last_shown: Option<usize>, target: usize, total_frames: usize) -> usize {
    match last_shown {
        None => 1,
        Some(last) if target > last => target - last,
        Some(last) if target < last => (total_frames - last) + target,
        Some(_) => 0,
    }
}

/// Transport state of the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Playing,
    Paused,
    /// Reached the last frame with looping disabled
    Ended,
}

impl PlaybackState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Result of advancing the clock by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTick {
    pub target_frame: usize,
    pub frames_in_advance: usize,
    pub frame_dropped: bool,
    /// Elapsed time wrapped back to the start this tick
    pub looped: bool,
    /// Playback ended this tick (looping disabled)
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    total_frames: usize,
    target_frame_time_ms: f64,
    elapsed_ms: f64,
    target_frame: usize,
    last_shown_frame: Option<usize>,
    last_shown_slot: Option<usize>,
    target_fps: f64,
    smoothed_fps: f64,
    decay: f64,
    dropped_frame_counter: u64,
    /// Time since the last shown frame, used for the observed interval
    frame_timer_ms: f64,
    looping: bool,
    state: PlaybackState,
}

impl PlaybackClock {
    pub fn new(total_frames: usize, target_fps: f64) -> Self {
        Self {
            total_frames: total_frames.max(1),
            target_frame_time_ms: 1000.0 / target_fps,
            elapsed_ms: 0.0,
            target_frame: 0,
            last_shown_frame: None,
            last_shown_slot: None,
            target_fps,
            smoothed_fps: target_fps,
            decay: DEFAULT_FPS_DECAY,
            dropped_frame_counter: 0,
            frame_timer_ms: 0.0,
            looping: true,
            state: PlaybackState::Playing,
        }
    }

    #[inline]
    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    #[inline]
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Duration of one pass over the sequence
    #[inline]
    pub fn loop_duration_ms(&self) -> f64 {
        self.target_frame_time_ms * self.total_frames as f64
    }

    /// Advance by `dt_ms` of wall time and compute the new target.
    pub fn tick(&mut self, dt_ms: f64) -> ClockTick {
        let mut looped = false;
        let mut finished = false;

        if self.state.is_playing() && dt_ms.is_finite() && dt_ms > 0.0 {
            self.elapsed_ms += dt_ms;
            self.frame_timer_ms += dt_ms;

            let loop_ms = self.loop_duration_ms();
            if self.elapsed_ms > loop_ms {
                if self.looping {
                    self.elapsed_ms %= loop_ms;
                    self.dropped_frame_counter = 0;
                    looped = true;
                } else {
                    self.elapsed_ms = loop_ms;
                    self.state = PlaybackState::Ended;
                    finished = true;
                }
            }
        }

        self.target_frame = self.frame_at(self.elapsed_ms);
        let advance = frames_in_advance(self.last_shown_frame, self.target_frame, self.total_frames);
        let frame_dropped = advance > 1;
        if frame_dropped {
            self.dropped_frame_counter += (advance - 1) as u64;
        }

        ClockTick {
            target_frame: self.target_frame,
            frames_in_advance: advance,
            frame_dropped,
            looped,
            finished,
        }
    }

    /// Record that `tick.target_frame` is now on screen from `slot`.
    ///
    /// Returns the previously shown `(slot, frame)` so the caller can retire it.
    pub fn commit_shown(&mut self, tick: &ClockTick, slot: usize) -> Option<(usize, usize)> {
        let previous = self.last_shown_slot.zip(self.last_shown_frame);
        let skipped = tick.frames_in_advance.saturating_sub(1);

        if previous.is_some() {
            // Catching up after a stall is not a slow frame.
            let interval = self.frame_timer_ms - skipped as f64 * self.target_frame_time_ms;
            if interval > 0.0 {
                self.smoothed_fps = smooth_fps(self.smoothed_fps, interval, self.decay);
            }
        }

        self.frame_timer_ms = 0.0;
        self.last_shown_frame = Some(tick.target_frame);
        self.last_shown_slot = Some(slot);
        previous
    }

    /// Jump to `frame`, resetting shown/drop/smoothing state.
    pub fn seek(&mut self, frame: usize) {
        let frame = frame.min(self.total_frames - 1);
        self.elapsed_ms = frame as f64 * self.target_frame_time_ms;
        self.target_frame = frame;
        self.last_shown_frame = None;
        self.last_shown_slot = None;
        self.smoothed_fps = self.target_fps;
        self.dropped_frame_counter = 0;
        self.frame_timer_ms = 0.0;
        if self.state == PlaybackState::Ended {
            self.state = PlaybackState::Paused;
        }
    }

    /// Seek to the frame shown at `time_ms` into the sequence.
    pub fn seek_time(&mut self, time_ms: f64) {
        let time_ms = if time_ms.is_finite() { time_ms.max(0.0) } else { 0.0 };
        self.seek(self.frame_at(time_ms));
        self.elapsed_ms = time_ms.min(self.loop_duration_ms());
    }

    pub fn reset(&mut self) {
        self.seek(0);
    }

    pub fn play(&mut self) {
        if self.state == PlaybackState::Ended {
            self.seek(0);
        }
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Forget the shown slot without touching timing (the slot was reclaimed).
    pub fn clear_shown_slot(&mut self) {
        self.last_shown_slot = None;
    }

    fn frame_at(&self, elapsed_ms: f64) -> usize {
        let index = (elapsed_ms / self.target_frame_time_ms).round();
        if index <= 0.0 {
            0
        } else {
            (index as usize).min(self.total_frames - 1)
        }
    }

    #[inline]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    #[inline]
    pub fn target_frame(&self) -> usize {
        self.target_frame
    }

    #[inline]
    pub fn target_frame_time_ms(&self) -> f64 {
        self.target_frame_time_ms
    }

    #[inline]
    pub fn last_shown_frame(&self) -> Option<usize> {
        self.last_shown_frame
    }

    #[inline]
    pub fn last_shown_slot(&self) -> Option<usize> {
        self.last_shown_slot
    }

    #[inline]
    pub fn smoothed_fps(&self) -> f64 {
        self.smoothed_fps
    }

    #[inline]
    pub fn dropped_frame_counter(&self) -> u64 {
        self.dropped_frame_counter
    }

    #[inline]
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}
