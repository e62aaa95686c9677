//! Ring buffer manager: keeps the frames just ahead of the playhead loaded.
//!
//! Per `advance(target)`:
//! - poll outstanding reads and settle finished slots (Ready or Failed)
//! - reclaim settled slots whose frame left the window `[target, target + n)`
//!   taken modulo the frame count
//! - plan the window indices that have no slot yet, nearest first
//! - hand reusable slots to the planned indices and submit the reads as one
//!   batch without waiting

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::config::TextureJobMode;
use crate::descriptor::{SequenceDescriptor, TextureMode};
use crate::error::StreamError;
use crate::executor::{Job, JobExecutor};
use crate::frame::FrameView;
use crate::job::FrameJobHandle;
use crate::pool::SlotPool;
use crate::reader::{read_geometry, read_texture, GeometryRead, TextureRead};
use crate::slot::{SlotInfo, SlotState};

/// Where a playback index stands in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameStatus {
    /// No slot holds this index
    NotResident,
    Loading,
    /// Loaded (waiting to be shown, or on screen)
    Ready,
    Failed,
}

/// Number of indices the window spans.
#[inline]
pub fn window_len(buffer_size: usize, total_frames: usize) -> usize {
    buffer_size.min(total_frames)
}

/// Whether `index` lies in `[target, target + buffer_size)` modulo `total_frames`.
pub fn window_contains(target: usize, buffer_size: usize, total_frames: usize, index: usize) -> bool {
    if total_frames == 0 {
        return false;
    }
    if buffer_size >= total_frames {
        return index < total_frames;
    }
    let end = target + buffer_size;
    if end <= total_frames {
        index >= target && index < end
    } else {
        // The window crosses the seam: [target, total) ∪ [0, end - total)
        index >= target || index < end - total_frames
    }
}

/// Window indices in ring order from `target` for which `is_resident` is false.
pub fn plan_window(
    target: usize,
    buffer_size: usize,
    total_frames: usize,
    is_resident: impl Fn(usize) -> bool,
) -> VecDeque<usize> {
    if total_frames == 0 {
        return VecDeque::new();
    }
    (0..window_len(buffer_size, total_frames))
        .map(|k| (target + k) % total_frames)
        .filter(|&i| !is_resident(i))
        .collect()
}

/// Owns the slot pool and schedules reads into it.
#[derive(Debug)]
pub struct RingBufferManager {
    descriptor: Arc<SequenceDescriptor>,
    pool: SlotPool,
    buffer_size: usize,
    total_frames: usize,
    executor: Arc<dyn JobExecutor>,
    texture_job_mode: TextureJobMode,
    shared_texture: Option<Vec<u8>>,
    target: usize,
    reclaimed_total: u64,
    jobs_dispatched: u64,
    failures: Vec<StreamError>,
}

impl RingBufferManager {
    /// Create a manager over a freshly allocated pool.
    ///
    /// A `buffer_size` at or above the frame count keeps the whole sequence
    /// resident: one slot per frame, nothing ever reclaimed.
    pub fn new(
        descriptor: Arc<SequenceDescriptor>,
        buffer_size: usize,
        executor: Arc<dyn JobExecutor>,
        texture_job_mode: TextureJobMode,
    ) -> Self {
        let total_frames = descriptor.total_frames();
        let buffer_size = buffer_size.max(1);
        let pool = SlotPool::allocate(&descriptor, window_len(buffer_size, total_frames));
        Self {
            descriptor,
            pool,
            buffer_size,
            total_frames,
            executor,
            texture_job_mode,
            shared_texture: None,
            target: 0,
            reclaimed_total: 0,
            jobs_dispatched: 0,
            failures: Vec::new(),
        }
    }

    /// Attach the single texture shared by every frame.
    pub fn with_shared_texture(mut self, texture: Vec<u8>) -> Self {
        self.shared_texture = Some(texture);
        self
    }

    #[inline]
    pub fn descriptor(&self) -> &SequenceDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.pool.len()
    }

    #[inline]
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Whole sequence resident mode
    #[inline]
    pub fn all_resident(&self) -> bool {
        self.buffer_size >= self.total_frames
    }

    #[inline]
    pub fn target(&self) -> usize {
        self.target
    }

    #[inline]
    pub fn reclaimed_total(&self) -> u64 {
        self.reclaimed_total
    }

    #[inline]
    pub fn jobs_dispatched(&self) -> u64 {
        self.jobs_dispatched
    }

    #[inline]
    pub fn reserved_bytes(&self) -> usize {
        self.pool.reserved_bytes()
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.pool.outstanding_jobs()
    }

    /// Move the window to `target` and schedule whatever it is missing.
    /// Never blocks.
    pub fn advance(&mut self, target: usize) {
        if self.total_frames == 0 || self.pool.is_released() {
            return;
        }
        let target = target % self.total_frames;
        self.target = target;

        self.poll_jobs();
        self.reclaim(target);
        let plan = self.plan(target);
        if !plan.is_empty() {
            self.dispatch(plan);
        }
    }

    /// Poll every loading slot and settle the finished ones.
    pub fn poll_jobs(&mut self) {
        for id in 0..self.pool.len() {
            self.poll_slot(id);
        }
    }

    /// Settle slot `id` if its job has completed. Returns the slot's state.
    fn poll_slot(&mut self, id: usize) -> Option<SlotState> {
        let slot = self.pool.slot_mut(id)?;
        if slot.state != SlotState::Loading {
            return Some(slot.state);
        }
        let finished = slot.job.as_mut().map_or(true, FrameJobHandle::is_complete);
        if !finished {
            return Some(SlotState::Loading);
        }

        let outcome = slot.job.take().map(FrameJobHandle::into_outcome);
        let (geometry, texture, error) = match outcome {
            Some(o) => (o.geometry, o.texture, o.error),
            None => (None, None, None),
        };
        match error {
            Some(err) => {
                log::warn!("frame read failed in slot {id}: {err}");
                slot.state = SlotState::Failed;
                slot.error = Some(err.clone());
                self.failures.push(err);
            }
            None => slot.state = SlotState::Ready,
        }
        let state = slot.state;
        self.pool.restore_buffers(id, geometry, texture);
        Some(state)
    }

    fn reclaim(&mut self, target: usize) {
        let (buffer_size, total) = (self.buffer_size, self.total_frames);
        let mut reclaimed = 0;
        for slot in self.pool.iter_mut() {
            let settled = matches!(
                slot.state,
                SlotState::Ready | SlotState::Playing | SlotState::Failed
            );
            if !settled {
                continue;
            }
            if let Some(frame) = slot.assigned {
                if !window_contains(target, buffer_size, total, frame) {
                    slot.consume();
                    reclaimed += 1;
                }
            }
        }
        self.reclaimed_total += reclaimed;
    }

    fn plan(&self, target: usize) -> VecDeque<usize> {
        let resident: HashSet<usize> = self
            .pool
            .iter()
            .filter(|s| s.state.holds_assignment())
            .filter_map(|s| s.assigned)
            .collect();
        plan_window(target, self.buffer_size, self.total_frames, |i| {
            resident.contains(&i)
        })
    }

    fn dispatch(&mut self, mut plan: VecDeque<usize>) {
        let per_frame_texture = self.descriptor.texture_mode == TextureMode::PerFrame;
        let mut jobs: Vec<Job> = Vec::new();

        for id in 0..self.pool.len() {
            if plan.is_empty() {
                break;
            }
            let Some(slot) = self.pool.slot_mut(id) else {
                continue;
            };
            if !slot.state.is_reusable() {
                continue;
            }
            let Some(frame) = plan.pop_front() else {
                break;
            };
            let Some(mut geometry) = slot.geometry.take() else {
                log::warn!("slot {id} has no geometry buffers; skipping");
                plan.push_front(frame);
                continue;
            };
            let Some(geo_req) = GeometryRead::for_frame(&self.descriptor, frame) else {
                slot.geometry = Some(geometry);
                continue;
            };

            let (handle, geo_done, tex_done) = FrameJobHandle::new(frame, per_frame_texture);
            let tex_job = tex_done.map(|done| {
                let req = TextureRead::for_frame(&self.descriptor, frame);
                let buffer = slot.texture.take().unwrap_or_default();
                (req, buffer, done)
            });

            match (tex_job, self.texture_job_mode) {
                (None, _) => jobs.push(Box::new(move || {
                    let result = read_geometry(&geo_req, &mut geometry);
                    geo_done.finish(geometry, result);
                })),
                (Some((tex_req, mut texture, tex_done)), TextureJobMode::Independent) => {
                    jobs.push(Box::new(move || {
                        let result = read_geometry(&geo_req, &mut geometry);
                        geo_done.finish(geometry, result);
                    }));
                    jobs.push(Box::new(move || {
                        let result = read_texture_for(frame, tex_req.as_ref(), &mut texture);
                        tex_done.finish(texture, result);
                    }));
                }
                (Some((tex_req, mut texture, tex_done)), TextureJobMode::Chained) => {
                    jobs.push(Box::new(move || {
                        let geo_result = read_geometry(&geo_req, &mut geometry);
                        let tex_result = if geo_result.is_ok() {
                            read_texture_for(frame, tex_req.as_ref(), &mut texture)
                        } else {
                            Err(StreamError::io(frame, "texture skipped: geometry read failed"))
                        };
                        geo_done.finish(geometry, geo_result);
                        tex_done.finish(texture, tex_result);
                    }));
                }
            }

            slot.state = SlotState::Loading;
            slot.assigned = Some(frame);
            slot.error = None;
            slot.job = Some(handle);
        }

        self.jobs_dispatched += jobs.len() as u64;
        self.executor.execute_batch(jobs);
    }

    /// Non-blocking: whether every read attached to slot `id` has finished
    /// successfully.
    pub fn is_ready(&mut self, id: usize) -> bool {
        matches!(
            self.poll_slot(id),
            Some(SlotState::Ready | SlotState::Playing)
        )
    }

    /// Slot holding `index`, if its reads have all completed successfully.
    pub fn resolve_slot(&mut self, index: usize) -> Option<usize> {
        let id = self
            .pool
            .iter()
            .find(|s| s.assigned == Some(index) && s.state.holds_assignment())
            .map(|s| s.id)?;
        self.is_ready(id).then_some(id)
    }

    /// The frame at `index` if it is loaded. Not-resident and still-loading
    /// both give `None`; use [`frame_status`](Self::frame_status) to tell
    /// them apart.
    pub fn resolve(&mut self, index: usize) -> Option<FrameView<'_>> {
        let id = self.resolve_slot(index)?;
        self.frame_view(id)
    }

    pub fn frame_status(&mut self, index: usize) -> FrameStatus {
        let Some(id) = self
            .pool
            .iter()
            .find(|s| s.assigned == Some(index) && s.state.holds_assignment())
            .map(|s| s.id)
        else {
            return FrameStatus::NotResident;
        };
        match self.poll_slot(id) {
            Some(SlotState::Loading) => FrameStatus::Loading,
            Some(SlotState::Ready | SlotState::Playing) => FrameStatus::Ready,
            Some(SlotState::Failed) => FrameStatus::Failed,
            _ => FrameStatus::NotResident,
        }
    }

    /// View of a loaded slot.
    pub fn frame_view(&self, id: usize) -> Option<FrameView<'_>> {
        let slot = self.pool.slot(id)?;
        if !slot.state.is_loaded() {
            return None;
        }
        let index = slot.assigned?;
        let layout = self.descriptor.frame(index)?;
        let geometry = slot.geometry.as_ref()?;
        let texture = match self.descriptor.texture_mode {
            TextureMode::PerFrame => slot.texture.as_ref().map(|t| t.as_slice()),
            TextureMode::Single => self.shared_texture.as_deref(),
            TextureMode::None => None,
        };
        Some(FrameView {
            index,
            slot: id,
            geometry_kind: self.descriptor.geometry_kind,
            vertex_count: layout.vertex_count,
            index_count: layout.index_count,
            vertex_stride: self.descriptor.vertex_stride(),
            vertices: geometry.vertices.as_slice(),
            indices: geometry.indices.as_slice(),
            texture,
            bounds: self.descriptor.bounds,
        })
    }

    /// Number of slots loaded and waiting to be shown.
    pub fn buffered_count(&self) -> usize {
        self.pool
            .iter()
            .filter(|s| s.state == SlotState::Ready)
            .count()
    }

    /// Whether every index of the current window has finished loading
    /// (successfully or not).
    pub fn window_settled(&self) -> bool {
        let settled = self
            .pool
            .iter()
            .filter(|s| {
                matches!(
                    s.state,
                    SlotState::Ready | SlotState::Playing | SlotState::Failed
                )
            })
            .filter(|s| {
                s.assigned.is_some_and(|f| {
                    window_contains(self.target, self.buffer_size, self.total_frames, f)
                })
            })
            .count();
        settled >= window_len(self.buffer_size, self.total_frames)
    }

    /// Make slot `id` the displayed one.
    pub fn mark_playing(&mut self, id: usize) {
        if let Some(slot) = self.pool.slot_mut(id) {
            if slot.state.is_loaded() {
                slot.state = SlotState::Playing;
            }
        }
    }

    /// Retire the previously shown slot, if it still shows `frame`.
    ///
    /// In whole-sequence-resident mode it goes back to Ready so it is never
    /// reloaded; otherwise it becomes reusable.
    pub fn release_shown(&mut self, id: usize, frame: usize) {
        let all_resident = self.all_resident();
        if let Some(slot) = self.pool.slot_mut(id) {
            if slot.state == SlotState::Playing && slot.assigned == Some(frame) {
                if all_resident {
                    slot.state = SlotState::Ready;
                } else {
                    slot.consume();
                }
            }
        }
    }

    /// Failures observed since the last call.
    pub fn take_failures(&mut self) -> Vec<StreamError> {
        std::mem::take(&mut self.failures)
    }

    pub fn slot_states(&self) -> Vec<SlotInfo> {
        self.pool.infos()
    }

    /// Block until every outstanding read finishes (without releasing).
    pub fn wait_idle(&mut self) {
        self.executor.flush();
        for id in 0..self.pool.len() {
            if let Some(job) = self.pool.slot_mut(id).and_then(|s| s.job.as_mut()) {
                job.wait();
            }
            self.poll_slot(id);
        }
    }

    /// Drain every outstanding read and free the pool.
    pub fn release_all(&mut self) {
        self.executor.flush();
        self.pool.release_all();
        self.shared_texture = None;
    }
}

impl Drop for RingBufferManager {
    fn drop(&mut self) {
        if !self.pool.is_released() {
            self.release_all();
        }
    }
}

fn read_texture_for(
    frame: usize,
    req: Option<&TextureRead>,
    buffer: &mut crate::slot::SlotBuffer,
) -> Result<(), StreamError> {
    match req {
        Some(req) => read_texture(req, buffer),
        None => Err(StreamError::io(frame, "no texture file for frame")),
    }
}
