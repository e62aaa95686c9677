use std::collections::HashSet;
use std::sync::Arc;

use vizij_geostream::{
    FrameStatus, InlineExecutor, JobExecutor, ManualExecutor, RayonExecutor, RingBufferManager,
    SequenceDescriptor, SlotState, StreamError, TextureJobMode, TexturePlatform,
};
use vizij_test_fixtures::{sequences, SequenceFixture};

fn descriptor(fixture: &SequenceFixture) -> Arc<SequenceDescriptor> {
    Arc::new(SequenceDescriptor::load(fixture.path(), TexturePlatform::Desktop).unwrap())
}

fn ring(fixture: &SequenceFixture, buffer_size: usize, executor: Arc<dyn JobExecutor>) -> RingBufferManager {
    RingBufferManager::new(
        descriptor(fixture),
        buffer_size,
        executor,
        TextureJobMode::Independent,
    )
}

fn assigned_frames(ring: &RingBufferManager) -> Vec<usize> {
    let mut frames: Vec<usize> = ring
        .slot_states()
        .iter()
        .filter(|s| s.state.holds_assignment())
        .filter_map(|s| s.assigned_frame)
        .collect();
    frames.sort_unstable();
    frames
}

fn assert_unique_assignments(ring: &RingBufferManager) {
    let frames = assigned_frames(ring);
    let unique: HashSet<usize> = frames.iter().copied().collect();
    assert_eq!(unique.len(), frames.len(), "duplicate assignment in {frames:?}");
}

#[test]
fn fills_window_and_resolves_frames() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let recipe = fixture.recipe().clone();
    let mut ring = ring(&fixture, 4, Arc::new(InlineExecutor));

    assert_eq!(ring.slot_count(), 4);
    ring.advance(0);
    ring.poll_jobs();
    assert_eq!(ring.buffered_count(), 4);
    assert_eq!(assigned_frames(&ring), vec![0, 1, 2, 3]);

    for frame in 0..4 {
        let view = ring.resolve(frame).expect("frame should be loaded");
        assert_eq!(view.index, frame);
        assert_eq!(view.vertices, recipe.vertex_bytes(frame).as_slice());
        assert_eq!(view.indices, recipe.index_bytes(frame).as_slice());
        assert_eq!(view.positions().next(), Some([frame as f32, 0.0, 0.0]));
    }
    assert!(ring.resolve(4).is_none());
    assert_eq!(ring.frame_status(4), FrameStatus::NotResident);
}

#[test]
fn window_wraps_across_the_seam() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut ring = ring(&fixture, 4, Arc::new(InlineExecutor));

    ring.advance(0);
    ring.advance(8);
    assert_eq!(assigned_frames(&ring), vec![0, 1, 8, 9]);
    assert_eq!(ring.reclaimed_total(), 2);
    for frame in [8, 9, 0, 1] {
        assert_eq!(ring.resolve(frame).map(|v| v.index), Some(frame));
    }
    assert_unique_assignments(&ring);
}

#[test]
fn slot_reuse_keeps_assignments_unique() {
    let fixture = sequences::materialize("points-basic").unwrap();
    let mut ring = ring(&fixture, 5, Arc::new(InlineExecutor));
    let total = ring.total_frames();

    let mut target = 0;
    for step in 0..60 {
        target = (target + 1 + step % 4) % total;
        ring.advance(target);
        assert_unique_assignments(&ring);
        assert!(ring.buffered_count() <= ring.buffer_size());
        assert_eq!(ring.resolve(target).map(|v| v.index), Some(target));
    }
}

#[test]
fn loading_slots_are_not_reassigned_until_they_finish() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let executor = Arc::new(ManualExecutor::new());
    let mut ring = ring(&fixture, 4, executor.clone());

    ring.advance(0);
    assert_eq!(executor.pending(), 4);
    assert_eq!(ring.frame_status(0), FrameStatus::Loading);
    assert!(ring.resolve(0).is_none());
    assert_eq!(ring.buffered_count(), 0);

    // Jump away while every read is still in flight.
    ring.advance(5);
    assert_eq!(executor.pending(), 4, "no slot should be free yet");
    assert_eq!(assigned_frames(&ring), vec![0, 1, 2, 3]);
    assert_unique_assignments(&ring);

    assert_eq!(executor.run_pending(), 4);
    ring.advance(5);
    assert_eq!(assigned_frames(&ring), vec![5, 6, 7, 8]);
    assert_eq!(executor.run_pending(), 4);

    for frame in 5..9 {
        assert_eq!(ring.frame_status(frame), FrameStatus::Ready);
    }
    ring.release_all();
}

#[test]
fn whole_sequence_resident_never_reclaims() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut ring = ring(&fixture, 12, Arc::new(InlineExecutor));
    assert!(ring.all_resident());
    assert_eq!(ring.slot_count(), 10);

    ring.advance(0);
    ring.poll_jobs();
    assert_eq!(ring.buffered_count(), 10);
    let dispatched = ring.jobs_dispatched();

    for target in [3, 7, 9, 0, 5] {
        ring.advance(target);
        let slot = ring.resolve_slot(target).unwrap();
        ring.mark_playing(slot);
        ring.release_shown(slot, target);
    }
    assert_eq!(ring.reclaimed_total(), 0);
    assert_eq!(ring.jobs_dispatched(), dispatched);
    assert_eq!(ring.buffered_count(), 10);
}

#[test]
fn shown_slot_is_released_outside_resident_mode() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let mut ring = ring(&fixture, 4, Arc::new(InlineExecutor));

    ring.advance(0);
    ring.poll_jobs();
    let slot = ring.resolve_slot(0).unwrap();
    ring.mark_playing(slot);
    assert_eq!(ring.slot_states()[slot].state, SlotState::Playing);
    assert_eq!(ring.buffered_count(), 3);

    ring.release_shown(slot, 0);
    assert_eq!(ring.slot_states()[slot].state, SlotState::Consumed);

    // Stale release of a reassigned slot is ignored.
    ring.advance(1);
    let reused = ring.slot_states()[slot];
    assert_eq!(reused.assigned_frame, Some(4));
    ring.release_shown(slot, 0);
    ring.poll_jobs();
    assert_eq!(ring.slot_states()[slot].state, SlotState::Ready);
}

#[test]
fn failed_read_marks_slot_failed_without_stalling() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let desc = descriptor(&fixture);
    fixture.remove_geometry(3).unwrap();
    let mut ring = RingBufferManager::new(desc, 4, Arc::new(InlineExecutor), TextureJobMode::Independent);

    ring.advance(0);
    assert_eq!(ring.frame_status(3), FrameStatus::Failed);
    assert!(ring.resolve(3).is_none());
    assert!(ring.resolve(2).is_some());
    ring.poll_jobs();
    assert_eq!(ring.buffered_count(), 3);

    let failures = ring.take_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], StreamError::Io { frame_index: 3, .. }));

    // Not retried while it stays in the window.
    let dispatched = ring.jobs_dispatched();
    ring.advance(1);
    assert_eq!(ring.jobs_dispatched(), dispatched + 1);
    assert!(ring.take_failures().is_empty());

    // Retried on the next pass once it left the window.
    ring.advance(4);
    assert_eq!(ring.frame_status(3), FrameStatus::NotResident);
    ring.advance(0);
    assert_eq!(ring.frame_status(3), FrameStatus::Failed);
    assert_eq!(ring.take_failures().len(), 1);
}

#[test]
fn truncated_frame_fails_with_io() {
    let fixture = sequences::materialize("mesh-basic").unwrap();
    let header = fixture.recipe().header_size;
    fixture.truncate_geometry(1, header + 5).unwrap();
    let mut ring = ring(&fixture, 3, Arc::new(InlineExecutor));

    ring.advance(0);
    assert_eq!(ring.frame_status(1), FrameStatus::Failed);
    let failures = ring.take_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].frame_index(), Some(1));
    assert!(!failures[0].is_setup_error());
}

#[test]
fn frames_resolve_after_background_reads_finish() {
    let fixture = sequences::materialize("points-basic").unwrap();
    let executor = Arc::new(RayonExecutor::new(Some(2)).unwrap());
    let mut ring = ring(&fixture, 6, executor);

    ring.advance(9);
    ring.wait_idle();
    assert!(ring.window_settled());
    for frame in [9, 10, 11, 0, 1, 2] {
        let view = ring.resolve(frame).expect("frame should be loaded");
        assert_eq!(view.index, frame);
        assert_eq!(view.positions().next(), Some([frame as f32, 0.0, 0.0]));
    }
    assert_eq!(ring.outstanding_jobs(), 0);
    ring.release_all();
    assert!(ring.resolve(9).is_none());
}
