use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use approx::assert_relative_eq;
use vizij_geostream::{
    FrameConsumer, FrameStatus, FrameView, InlineExecutor, JobExecutor, ManualExecutor,
    PlaybackState, SequenceStreamer, StreamEvent, StreamerConfig, TexturePlatform,
};
use vizij_test_fixtures::{sequences, SequenceFixture};

/// 10 fps, so every frame lasts exactly 100ms
fn config(buffer_size: usize) -> StreamerConfig {
    StreamerConfig::default()
        .with_buffer_size(buffer_size)
        .with_target_fps(10.0)
        .with_texture_platform(TexturePlatform::Desktop)
}

fn open(fixture: &SequenceFixture, config: StreamerConfig) -> SequenceStreamer {
    SequenceStreamer::open_with_executor(fixture.path(), config, Arc::new(InlineExecutor)).unwrap()
}

fn open_started(fixture: &SequenceFixture, config: StreamerConfig) -> SequenceStreamer {
    let mut streamer = open(fixture, config);
    let report = streamer.tick(0.0);
    assert_eq!(report.shown_frame, Some(0));
    streamer
}

fn count_events(events: &[StreamEvent], pred: impl Fn(&StreamEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

#[test]
fn preroll_then_first_frame() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open(&fixture, config(4));
    assert!(streamer.is_buffering());
    assert_eq!(streamer.total_frames(), 10);

    let report = streamer.tick(16.0);
    assert_eq!(
        report.events,
        vec![
            StreamEvent::BufferReady { buffered: 4 },
            StreamEvent::FrameShown { frame: 0 },
        ]
    );
    assert_eq!(report.shown_frame, Some(0));
    assert!(!report.frame_dropped);
    assert!(!streamer.is_buffering());
    // The tick that ends preroll does not move the clock.
    assert_eq!(streamer.elapsed_ms(), 0.0);
    assert_eq!(streamer.current_frame().map(|f| f.index), Some(0));
}

#[test]
fn steady_ticks_show_every_frame() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4));

    for frame in 1..10 {
        let report = streamer.tick(100.0);
        assert_eq!(report.shown_frame, Some(frame));
        assert_eq!(report.frames_in_advance, 1);
        assert!(!report.frame_dropped);
        let view = streamer.current_frame().unwrap();
        assert_eq!(view.positions().next(), Some([frame as f32, 0.0, 0.0]));
    }
    assert_eq!(streamer.dropped_frame_counter(), 0);
    assert_relative_eq!(streamer.smoothed_fps(), 10.0, epsilon = 1e-9);
    assert_eq!(streamer.metrics().frames_shown, 10);
}

#[test]
fn short_ticks_hold_the_current_frame() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4));

    let report = streamer.tick(30.0);
    assert_eq!(report.target_frame, 0);
    assert_eq!(report.frames_in_advance, 0);
    assert_eq!(report.shown_frame, None);
    assert!(report.events.is_empty());

    let report = streamer.tick(30.0);
    assert_eq!(report.shown_frame, Some(1));
}

#[test]
fn late_tick_skips_and_counts_dropped_frames() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4));

    let report = streamer.tick(300.0);
    assert_eq!(report.target_frame, 3);
    assert_eq!(report.frames_in_advance, 3);
    assert!(report.frame_dropped);
    assert_eq!(report.shown_frame, Some(3));
    assert!(report
        .events
        .contains(&StreamEvent::FramesDropped { frame: 3, count: 2 }));
    assert_eq!(streamer.dropped_frame_counter(), 2);

    let metrics = streamer.metrics();
    assert_eq!(metrics.dropped_frames_total, 2);
    assert_eq!(metrics.skipped_frames, 2);
    assert_eq!(metrics.frames_shown, 2);
}

#[test]
fn starved_ticks_still_count_dropped_frames() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let executor = Arc::new(ManualExecutor::new());
    let mut streamer =
        SequenceStreamer::open_with_executor(fixture.path(), config(4), executor.clone()).unwrap();
    executor.run_pending();
    assert_eq!(streamer.tick(0.0).shown_frame, Some(0));

    // Frame 5 was never requested, so it cannot be ready this tick.
    let report = streamer.tick(500.0);
    assert_eq!(report.target_frame, 5);
    assert_eq!(report.frames_in_advance, 5);
    assert!(report.frame_dropped);
    assert_eq!(report.shown_frame, None);
    assert!(report
        .events
        .contains(&StreamEvent::FramesDropped { frame: 5, count: 4 }));
    assert_eq!(streamer.dropped_frame_counter(), 4);

    // Still starved; the gap keeps growing from the last shown frame.
    let report = streamer.tick(300.0);
    assert_eq!(report.target_frame, 8);
    assert_eq!(report.frames_in_advance, 8);
    assert_eq!(report.shown_frame, None);
    assert_eq!(streamer.dropped_frame_counter(), 11);

    let metrics = streamer.metrics();
    assert_eq!(metrics.dropped_frames_total, 11);
    assert_eq!(metrics.skipped_frames, 0);
    assert_eq!(metrics.frames_shown, 1);

    // Crossing the loop resets the counter before the new gap is added.
    let report = streamer.tick(400.0);
    assert!(report.events.contains(&StreamEvent::LoopCompleted));
    assert_eq!(report.target_frame, 2);
    assert_eq!(report.frames_in_advance, 2);
    assert_eq!(streamer.dropped_frame_counter(), 1);

    executor.run_pending();
    streamer.close();
}

#[test]
fn wraparound_counts_drops_and_resets_on_loop() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4));
    streamer.tick(300.0);
    assert_eq!(streamer.dropped_frame_counter(), 2);

    // Seeking clears the counter.
    streamer.seek(8);
    assert_eq!(streamer.dropped_frame_counter(), 0);
    let report = streamer.tick(0.0);
    assert_eq!(report.shown_frame, Some(8));

    // Last shown 8, target 1 after the wrap: three frames ahead, two dropped.
    let report = streamer.tick(300.0);
    assert_eq!(report.target_frame, 1);
    assert_eq!(report.frames_in_advance, 3);
    assert!(report.frame_dropped);
    assert_eq!(report.shown_frame, Some(1));
    assert!(report.events.contains(&StreamEvent::LoopCompleted));
    assert_eq!(streamer.dropped_frame_counter(), 2);
    assert_eq!(streamer.metrics().loops_completed, 1);
    assert_eq!(streamer.metrics().dropped_frames_total, 4);
}

#[test]
fn non_looping_playback_ends_on_last_frame() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4).with_looping(false));

    let report = streamer.tick(2000.0);
    assert_eq!(report.target_frame, 9);
    assert_eq!(report.shown_frame, Some(9));
    assert!(report.events.contains(&StreamEvent::PlaybackFinished));
    assert_eq!(streamer.playback_state(), PlaybackState::Ended);

    let report = streamer.tick(100.0);
    assert_eq!(report.shown_frame, None);
    assert!(report.events.is_empty());

    streamer.play();
    assert_eq!(streamer.playback_state(), PlaybackState::Playing);
    let report = streamer.tick(0.0);
    assert_eq!(report.shown_frame, Some(0));
    assert_eq!(
        count_events(&report.events, |e| matches!(e, StreamEvent::BufferReady { .. })),
        1
    );
}

#[test]
fn pause_freezes_the_clock() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4));

    streamer.pause();
    assert_eq!(streamer.playback_state(), PlaybackState::Paused);
    let report = streamer.tick(500.0);
    assert_eq!(report.shown_frame, None);
    assert_eq!(streamer.elapsed_ms(), 0.0);

    streamer.play();
    let report = streamer.tick(100.0);
    assert_eq!(report.shown_frame, Some(1));
}

#[test]
fn without_autoplay_first_frame_is_shown_paused() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open(&fixture, config(4).with_autoplay(false));
    assert_eq!(streamer.playback_state(), PlaybackState::Paused);

    let report = streamer.tick(100.0);
    assert_eq!(report.shown_frame, Some(0));
    let report = streamer.tick(100.0);
    assert_eq!(report.shown_frame, None);
    assert_eq!(streamer.target_frame(), 0);
}

#[test]
fn preroll_waits_for_background_reads() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let executor = Arc::new(ManualExecutor::new());
    let mut streamer =
        SequenceStreamer::open_with_executor(fixture.path(), config(4), executor.clone()).unwrap();

    let report = streamer.tick(16.0);
    assert!(report.buffering);
    assert_eq!(report.shown_frame, None);
    assert!(report.events.is_empty());
    assert_eq!(streamer.frame_status(0), FrameStatus::Loading);

    assert_eq!(executor.run_pending(), 4);
    let report = streamer.tick(16.0);
    assert!(!report.buffering);
    assert_eq!(report.shown_frame, Some(0));
    assert_eq!(streamer.elapsed_ms(), 0.0);

    // A seek re-buffers around the new start frame.
    streamer.seek(6);
    assert!(streamer.is_buffering());
    let report = streamer.tick(50.0);
    assert!(report.buffering);
    assert_eq!(report.target_frame, 6);
    executor.run_pending();
    let report = streamer.tick(50.0);
    assert_eq!(report.shown_frame, Some(6));
    assert_relative_eq!(streamer.elapsed_ms(), 600.0);

    executor.run_pending();
    streamer.close();
}

#[test]
fn dropping_with_queued_reads_does_not_hang() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let executor = Arc::new(ManualExecutor::new());

    let streamer =
        SequenceStreamer::open_with_executor(fixture.path(), config(4), executor.clone()).unwrap();
    assert_eq!(executor.pending(), 4);
    drop(streamer);
    assert_eq!(executor.pending(), 0);

    // Unwinding out of a failed assertion drops the streamer the same way.
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut streamer =
            SequenceStreamer::open_with_executor(fixture.path(), config(4), executor.clone())
                .unwrap();
        assert!(streamer.tick(0.0).buffering);
        panic!("frame 0 never loaded");
    }));
    assert!(result.is_err());
    assert_eq!(executor.pending(), 0);
}

#[test]
fn wait_idle_runs_queued_reads() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let executor = Arc::new(ManualExecutor::new());
    let mut streamer =
        SequenceStreamer::open_with_executor(fixture.path(), config(4), executor.clone()).unwrap();

    streamer.wait_idle();
    assert_eq!(executor.pending(), 0);
    assert_eq!(streamer.frame_status(3), FrameStatus::Ready);
    assert_eq!(streamer.tick(0.0).shown_frame, Some(0));
}

#[test]
fn low_latency_preset_shows_frames_without_preroll() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let executor = Arc::new(ManualExecutor::new());
    let config = StreamerConfig::low_latency()
        .with_target_fps(10.0)
        .with_texture_platform(TexturePlatform::Desktop);
    let mut streamer =
        SequenceStreamer::open_with_executor(fixture.path(), config, executor.clone()).unwrap();
    assert!(!streamer.is_buffering());

    // Nothing ready yet: the clock keeps running and nothing is shown.
    let report = streamer.tick(100.0);
    assert!(!report.buffering);
    assert_eq!(report.shown_frame, None);

    executor.run_pending();
    let report = streamer.tick(100.0);
    assert_eq!(report.target_frame, 2);
    assert_eq!(report.shown_frame, Some(2));
    // Nothing had been shown before, so this is not a drop.
    assert!(!report.frame_dropped);

    executor.run_pending();
    streamer.close();
}

#[test]
fn seek_time_maps_to_nearest_frame() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(4));

    streamer.seek_time(449.0);
    assert_eq!(streamer.target_frame(), 4);
    let report = streamer.tick(0.0);
    assert_eq!(report.shown_frame, Some(4));

    streamer.seek(42);
    assert_eq!(streamer.target_frame(), 9);
}

#[test]
fn failed_frame_is_skipped_and_reported_once() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    fixture.truncate_geometry(2, 10).unwrap();
    let mut streamer = open(&fixture, config(4));

    let mut events = Vec::new();
    let report = streamer.tick(0.0);
    assert_eq!(report.shown_frame, Some(0));
    events.extend(report.events);

    let report = streamer.tick(100.0);
    assert_eq!(report.shown_frame, Some(1));
    events.extend(report.events);

    let report = streamer.tick(100.0);
    assert_eq!(report.target_frame, 2);
    assert_eq!(report.shown_frame, None);
    assert_eq!(streamer.frame_status(2), FrameStatus::Failed);
    assert!(streamer.resolve(2).is_none());
    events.extend(report.events);

    let report = streamer.tick(100.0);
    assert_eq!(report.shown_frame, Some(3));
    assert!(report
        .events
        .contains(&StreamEvent::FramesDropped { frame: 3, count: 1 }));
    events.extend(report.events);

    let failed = count_events(&events, |e| {
        matches!(e, StreamEvent::FrameFailed { frame: 2, .. })
    });
    assert_eq!(failed, 1);
    assert_eq!(streamer.metrics().read_failures, 1);
}

#[test]
fn whole_sequence_resident_streams_without_reloading() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open_started(&fixture, config(10));
    let dispatched = streamer.metrics().jobs_dispatched;
    assert_eq!(dispatched, 10);

    for _ in 0..25 {
        streamer.tick(100.0);
    }
    let metrics = streamer.metrics();
    assert_eq!(metrics.jobs_dispatched, dispatched);
    assert_eq!(metrics.slots_reclaimed, 0);
    // Every frame but the one on screen is waiting.
    assert_eq!(streamer.buffered_count(), 9);
}

#[derive(Default)]
struct Recorder {
    frames: Vec<(usize, f32)>,
    dropped: usize,
}

impl FrameConsumer for Recorder {
    fn present(&mut self, frame: &FrameView<'_>) {
        let x = frame.positions().next().map_or(-1.0, |p| p[0]);
        self.frames.push((frame.index, x));
    }

    fn frames_dropped(&mut self, count: usize) {
        self.dropped += count;
    }
}

#[test]
fn consumer_receives_each_shown_frame_once() {
    let fixture = sequences::materialize("points-basic").unwrap();
    let mut streamer = open(&fixture, config(4));
    let mut recorder = Recorder::default();

    for dt in [0.0, 100.0, 20.0, 80.0, 300.0] {
        streamer.tick_with(dt, &mut recorder);
    }
    assert_eq!(
        recorder.frames,
        vec![(0, 0.0), (1, 1.0), (2, 2.0), (5, 5.0)]
    );
    assert_eq!(recorder.dropped, 2);

    let mut seen = Vec::new();
    let mut closure = |f: &FrameView<'_>| seen.push(f.index);
    streamer.tick_with(100.0, &mut closure);
    assert_eq!(seen, vec![6]);
}

#[test]
fn reports_serialize_to_json() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut streamer = open(&fixture, config(4));
    let report = streamer.tick(0.0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["shown_frame"], 0);
    assert_eq!(json["events"][0]["BufferReady"]["buffered"], 4);

    let metrics = serde_json::to_value(streamer.metrics()).unwrap();
    assert_eq!(metrics["framesShown"], 1);
}

#[test]
fn close_drains_background_reads() {
    let fixture = sequences::materialize("points-basic").unwrap();
    let mut streamer = SequenceStreamer::open_with_config(
        fixture.path(),
        config(6).with_worker_threads(2),
    )
    .unwrap();
    streamer.wait_idle();
    let report = streamer.tick(0.0);
    assert_eq!(report.shown_frame, Some(0));
    streamer.tick(100.0);
    streamer.close();
}

#[test]
fn executor_is_shared_across_streamers() {
    let a = sequences::materialize("mesh-basic").unwrap();
    let b = sequences::materialize("points-basic").unwrap();
    let executor: Arc<dyn JobExecutor> = Arc::new(InlineExecutor);

    let mut first = SequenceStreamer::open_with_executor(a.path(), config(3), executor.clone()).unwrap();
    let mut second = SequenceStreamer::open_with_executor(b.path(), config(3), executor).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(first.tick(0.0).shown_frame, Some(0));
    assert_eq!(second.tick(0.0).shown_frame, Some(0));
}
