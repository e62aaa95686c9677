//! Per-tick output of the streamer.
//!
//! A [`TickReport`] carries where the playhead is and what changed, plus a
//! list of semantic events for hosts that drive UI or logging off them.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Discrete signals emitted while ticking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StreamEvent {
    /// Preroll finished; the clock starts moving
    BufferReady { buffered: usize },
    FrameShown { frame: usize },
    /// The target ran `count` frames past the next one after the last shown frame
    FramesDropped { frame: usize, count: usize },
    LoopCompleted,
    /// Looping is off and the last frame was reached
    PlaybackFinished,
    FrameFailed { frame: usize, error: StreamError },
}

/// What happened during one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub target_frame: usize,
    /// Frame that became visible this tick, if any
    pub shown_frame: Option<usize>,
    pub frames_in_advance: usize,
    pub frame_dropped: bool,
    /// Holding at the start index until the window is loaded
    pub buffering: bool,
    pub events: Vec<StreamEvent>,
}

impl TickReport {
    #[inline]
    pub fn showed_new_frame(&self) -> bool {
        self.shown_frame.is_some()
    }
}
