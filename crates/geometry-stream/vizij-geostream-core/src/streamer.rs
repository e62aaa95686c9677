//! Owned handle over an opened sequence: ring buffer plus playback clock.
//!
//! Drive it from one thread by calling [`SequenceStreamer::tick`] with the
//! wall time elapsed since the previous call. Reads happen on the worker pool;
//! only [`SequenceStreamer::close`] (or drop) waits on them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{PlaybackClock, PlaybackState};
use crate::config::StreamerConfig;
use crate::descriptor::{SequenceDescriptor, TextureMode};
use crate::error::StreamError;
use crate::executor::{JobExecutor, RayonExecutor};
use crate::frame::{FrameConsumer, FrameView};
use crate::ids::SequenceId;
use crate::metrics::PlaybackMetrics;
use crate::outputs::{StreamEvent, TickReport};
use crate::reader::{read_texture_owned, TextureRead};
use crate::ring::{FrameStatus, RingBufferManager};
use crate::slot::SlotInfo;

#[derive(Debug)]
pub struct SequenceStreamer {
    id: SequenceId,
    path: PathBuf,
    config: StreamerConfig,
    ring: RingBufferManager,
    clock: PlaybackClock,
    /// Clock held until the window around the start index has loaded
    buffering: bool,
    frames_shown: u64,
    dropped_total: u64,
    /// Frames passed over between consecutive shown frames
    skipped_total: u64,
    loops_completed: u64,
    read_failures: u64,
    released: bool,
}

impl SequenceStreamer {
    /// Open the sequence in `path` with default settings and `buffer_size`
    /// frames of lookahead.
    pub fn open(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self, StreamError> {
        Self::open_with_config(path, StreamerConfig::default().with_buffer_size(buffer_size))
    }

    /// Open with a full configuration, reading on a rayon worker pool.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: StreamerConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let executor = RayonExecutor::new(config.worker_threads)?;
        Self::open_with_executor(path, config, Arc::new(executor))
    }

    /// Open with a caller-supplied executor.
    pub fn open_with_executor(
        path: impl AsRef<Path>,
        config: StreamerConfig,
        executor: Arc<dyn JobExecutor>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let descriptor = SequenceDescriptor::load(&path, config.texture_platform)?;

        let shared_texture = match descriptor.texture_mode {
            TextureMode::Single => {
                let req = TextureRead::for_frame(&descriptor, 0).ok_or_else(|| {
                    StreamError::io(0, "single texture mode without a texture file")
                })?;
                Some(read_texture_owned(&req)?)
            }
            _ => None,
        };

        let total_frames = descriptor.total_frames();
        let descriptor = Arc::new(descriptor);
        let mut ring = RingBufferManager::new(
            descriptor,
            config.buffer_size,
            executor,
            config.texture_job_mode,
        );
        if let Some(texture) = shared_texture {
            ring = ring.with_shared_texture(texture);
        }

        let mut clock = PlaybackClock::new(total_frames, config.target_fps)
            .with_decay(config.fps_smoothing)
            .with_looping(config.looping);
        if !config.autoplay {
            clock.pause();
        }

        let id = SequenceId::new();
        log::info!(
            "opened sequence {id} at {}: {total_frames} frames, {} slots, {} bytes reserved",
            path.display(),
            ring.slot_count(),
            ring.reserved_bytes()
        );

        let mut streamer = Self {
            id,
            path,
            buffering: config.preroll,
            config,
            ring,
            clock,
            frames_shown: 0,
            dropped_total: 0,
            skipped_total: 0,
            loops_completed: 0,
            read_failures: 0,
            released: false,
        };
        streamer.ring.advance(0);
        Ok(streamer)
    }

    #[inline]
    pub fn id(&self) -> SequenceId {
        self.id
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    #[inline]
    pub fn descriptor(&self) -> &SequenceDescriptor {
        self.ring.descriptor()
    }

    #[inline]
    pub fn total_frames(&self) -> usize {
        self.ring.total_frames()
    }

    /// Move the prefetch window to `target` without touching the clock.
    pub fn advance(&mut self, target: usize) {
        self.ring.advance(target);
    }

    /// Advance playback by `dt_ms` of wall time.
    pub fn tick(&mut self, dt_ms: f64) -> TickReport {
        let mut report = TickReport::default();
        let mut dt_ms = dt_ms;

        if self.buffering {
            let start = self.clock.target_frame();
            self.ring.advance(start);
            self.collect_failures(&mut report);
            if !self.ring.window_settled() {
                report.target_frame = start;
                report.buffering = true;
                return report;
            }
            self.buffering = false;
            let buffered = self.ring.buffered_count();
            log::info!("sequence {} buffered {buffered} frames from {start}", self.id);
            report.events.push(StreamEvent::BufferReady { buffered });
            // The tick that ends preroll shows the start frame instead of moving.
            dt_ms = 0.0;
        }

        let tick = self.clock.tick(dt_ms);

        if tick.looped {
            self.loops_completed += 1;
            report.events.push(StreamEvent::LoopCompleted);
        }

        self.ring.advance(tick.target_frame);
        self.collect_failures(&mut report);

        let skipped = tick.frames_in_advance.saturating_sub(1);
        if tick.frame_dropped {
            self.dropped_total += skipped as u64;
            log::debug!(
                "sequence {} dropped {skipped} frames before {}",
                self.id,
                tick.target_frame
            );
            report.events.push(StreamEvent::FramesDropped {
                frame: tick.target_frame,
                count: skipped,
            });
        }

        if tick.frames_in_advance > 0 {
            if let Some(slot) = self.ring.resolve_slot(tick.target_frame) {
                if let Some((prev_slot, prev_frame)) = self.clock.commit_shown(&tick, slot) {
                    self.ring.release_shown(prev_slot, prev_frame);
                }
                self.ring.mark_playing(slot);
                self.frames_shown += 1;
                self.skipped_total += skipped as u64;
                report.events.push(StreamEvent::FrameShown {
                    frame: tick.target_frame,
                });
                report.shown_frame = Some(tick.target_frame);
            }
        }

        if tick.finished {
            log::info!("sequence {} finished at frame {}", self.id, tick.target_frame);
            report.events.push(StreamEvent::PlaybackFinished);
        }

        report.target_frame = tick.target_frame;
        report.frames_in_advance = tick.frames_in_advance;
        report.frame_dropped = tick.frame_dropped;
        report
    }

    /// [`tick`](Self::tick), handing a newly shown frame to `consumer`.
    pub fn tick_with<C: FrameConsumer + ?Sized>(&mut self, dt_ms: f64, consumer: &mut C) -> TickReport {
        let report = self.tick(dt_ms);
        if report.shown_frame.is_some() {
            if report.frame_dropped {
                consumer.frames_dropped(report.frames_in_advance.saturating_sub(1));
            }
            if let Some(view) = self.current_frame() {
                consumer.present(&view);
            }
        }
        report
    }

    fn collect_failures(&mut self, report: &mut TickReport) {
        for error in self.ring.take_failures() {
            self.read_failures += 1;
            let frame = error.frame_index().unwrap_or(self.ring.target());
            report.events.push(StreamEvent::FrameFailed { frame, error });
        }
    }

    /// The frame at `index` if it is loaded.
    ///
    /// `None` covers both "not in the window" and "still loading"; see
    /// [`frame_status`](Self::frame_status).
    pub fn resolve(&mut self, index: usize) -> Option<FrameView<'_>> {
        self.ring.resolve(index)
    }

    pub fn frame_status(&mut self, index: usize) -> FrameStatus {
        self.ring.frame_status(index)
    }

    /// The frame currently on screen, while its slot still holds it.
    ///
    /// A late playhead can reclaim the shown slot before a newer frame is
    /// ready; consumers that must keep drawing copy the data at `present`.
    pub fn current_frame(&self) -> Option<FrameView<'_>> {
        let slot = self.clock.last_shown_slot()?;
        let frame = self.clock.last_shown_frame()?;
        self.ring.frame_view(slot).filter(|view| view.index == frame)
    }

    /// Loaded frames waiting to be shown
    pub fn buffered_count(&self) -> usize {
        self.ring.buffered_count()
    }

    /// Frames dropped since the last loop or seek, counted on every tick the
    /// target runs more than one frame ahead of the shown frame
    #[inline]
    pub fn dropped_frame_counter(&self) -> u64 {
        self.clock.dropped_frame_counter()
    }

    #[inline]
    pub fn smoothed_fps(&self) -> f64 {
        self.clock.smoothed_fps()
    }

    #[inline]
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    #[inline]
    pub fn target_frame(&self) -> usize {
        self.clock.target_frame()
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.clock.elapsed_ms()
    }

    pub fn slot_states(&self) -> Vec<SlotInfo> {
        self.ring.slot_states()
    }

    pub fn metrics(&self) -> PlaybackMetrics {
        PlaybackMetrics {
            smoothed_fps: self.clock.smoothed_fps(),
            dropped_frames: self.clock.dropped_frame_counter(),
            dropped_frames_total: self.dropped_total,
            skipped_frames: self.skipped_total,
            frames_shown: self.frames_shown,
            loops_completed: self.loops_completed,
            buffered: self.ring.buffered_count(),
            outstanding_jobs: self.ring.outstanding_jobs(),
            jobs_dispatched: self.ring.jobs_dispatched(),
            slots_reclaimed: self.ring.reclaimed_total(),
            read_failures: self.read_failures,
            memory_usage_bytes: self.ring.reserved_bytes(),
        }
    }

    /// Resume playback; after the end of a non-looping run this restarts
    /// from frame 0.
    pub fn play(&mut self) {
        if self.clock.state() == PlaybackState::Ended {
            self.seek(0);
        }
        self.clock.play();
    }

    pub fn pause(&mut self) {
        self.clock.pause();
    }

    #[inline]
    pub fn playback_state(&self) -> PlaybackState {
        self.clock.state()
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.config.looping = looping;
        self.clock.set_looping(looping);
    }

    /// Jump to `frame` (clamped to the last frame). Re-buffers when preroll
    /// is enabled.
    pub fn seek(&mut self, frame: usize) {
        self.retire_shown();
        self.clock.seek(frame);
        self.restart_window();
    }

    /// Jump to the frame displayed at `time_ms` into the sequence.
    pub fn seek_time(&mut self, time_ms: f64) {
        self.retire_shown();
        self.clock.seek_time(time_ms);
        self.restart_window();
    }

    fn retire_shown(&mut self) {
        if let (Some(slot), Some(frame)) = (self.clock.last_shown_slot(), self.clock.last_shown_frame()) {
            self.ring.release_shown(slot, frame);
        }
        self.clock.clear_shown_slot();
    }

    fn restart_window(&mut self) {
        let start = self.clock.target_frame();
        log::debug!("sequence {} seek to frame {start}", self.id);
        self.buffering = self.config.preroll;
        self.ring.advance(start);
    }

    /// Block until every outstanding read has finished.
    pub fn wait_idle(&mut self) {
        self.ring.wait_idle();
    }

    /// Drain outstanding reads and release every buffer.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.ring.release_all();
        log::info!(
            "closed sequence {} after {} frames shown ({} dropped)",
            self.id,
            self.frames_shown,
            self.dropped_total
        );
    }
}

impl Drop for SequenceStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
