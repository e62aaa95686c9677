//! Configuration for the sequence streamer

use serde::{Deserialize, Serialize};

use crate::descriptor::TexturePlatform;
use crate::error::StreamError;

/// How a per-frame texture read is scheduled relative to its geometry read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TextureJobMode {
    /// Geometry and texture are separate tasks that may run in parallel
    #[default]
    Independent,
    /// The texture is read by the geometry task once the geometry is in
    Chained,
}

/// Streamer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamerConfig {
    /// Number of frames kept ahead of the playhead
    pub buffer_size: usize,
    /// Playback rate of the sequence
    pub target_fps: f64,
    /// Background reader threads; `None` uses every available hardware thread
    pub worker_threads: Option<usize>,
    /// Selects which compressed texture format is required
    pub texture_platform: TexturePlatform,
    pub texture_job_mode: TextureJobMode,
    /// Wrap to frame 0 after the last frame instead of ending
    pub looping: bool,
    /// Hold the clock after open/seek until the initial window is loaded
    pub preroll: bool,
    /// Start in the playing state
    pub autoplay: bool,
    /// Exponential decay applied to the smoothed frame rate
    pub fps_smoothing: f64,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 30,
            target_fps: 30.0,
            worker_threads: None,
            texture_platform: TexturePlatform::current(),
            texture_job_mode: TextureJobMode::Independent,
            looping: true,
            preroll: true,
            autoplay: true,
            fps_smoothing: 0.9,
        }
    }
}

impl StreamerConfig {
    /// Small window, no preroll: first frame shows as soon as it is read
    pub fn low_latency() -> Self {
        Self {
            buffer_size: 8,
            preroll: false,
            ..Self::default()
        }
    }

    /// Keeps only a handful of frames resident
    pub fn low_memory() -> Self {
        Self {
            buffer_size: 4,
            worker_threads: Some(2),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.buffer_size == 0 {
            return Err(StreamError::InvalidConfig {
                reason: "Buffer size must be greater than 0".to_string(),
            });
        }

        if self.target_fps <= 0.0 || !self.target_fps.is_finite() {
            return Err(StreamError::InvalidConfig {
                reason: "Target FPS must be positive and finite".to_string(),
            });
        }

        if self.worker_threads == Some(0) {
            return Err(StreamError::InvalidConfig {
                reason: "Worker thread count must be greater than 0".to_string(),
            });
        }

        if !(0.0..1.0).contains(&self.fps_smoothing) {
            return Err(StreamError::InvalidConfig {
                reason: format!(
                    "FPS smoothing must be in [0, 1), got {}",
                    self.fps_smoothing
                ),
            });
        }

        Ok(())
    }

    /// Milliseconds each frame stays on screen
    #[inline]
    pub fn frame_time_ms(&self) -> f64 {
        1000.0 / self.target_fps
    }

    #[inline]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[inline]
    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.target_fps = fps;
        self
    }

    #[inline]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    #[inline]
    pub fn with_texture_platform(mut self, platform: TexturePlatform) -> Self {
        self.texture_platform = platform;
        self
    }

    #[inline]
    pub fn with_texture_job_mode(mut self, mode: TextureJobMode) -> Self {
        self.texture_job_mode = mode;
        self
    }

    #[inline]
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    #[inline]
    pub fn with_preroll(mut self, preroll: bool) -> Self {
        self.preroll = preroll;
        self
    }

    #[inline]
    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }
}
