//! Slot pool: every buffer the ring will ever use, allocated once per open.

use crate::descriptor::SequenceDescriptor;
use crate::slot::{GeometryBuffers, Slot, SlotBuffer, SlotInfo, SlotState};

/// Fixed set of slots sized to the sequence maximums.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Slot>,
    vertex_capacity: usize,
    index_capacity: usize,
    texture_capacity: usize,
    released: bool,
}

impl SlotPool {
    /// Allocate `slot_count` slots, each able to hold the largest frame.
    pub fn allocate(descriptor: &SequenceDescriptor, slot_count: usize) -> Self {
        let vertex_capacity = descriptor.max_vertex_bytes() as usize;
        let index_capacity = descriptor.max_index_bytes() as usize;
        let texture_capacity = descriptor.max_texture_bytes() as usize;
        let per_frame_texture = texture_capacity > 0;

        let slots = (0..slot_count)
            .map(|id| {
                Slot::new(
                    id,
                    GeometryBuffers::with_capacity(vertex_capacity, index_capacity),
                    per_frame_texture.then(|| SlotBuffer::with_capacity(texture_capacity)),
                )
            })
            .collect();

        log::debug!(
            "allocated {slot_count} slots ({} bytes each)",
            vertex_capacity + index_capacity + texture_capacity
        );

        Self {
            slots,
            vertex_capacity,
            index_capacity,
            texture_capacity,
            released: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total bytes reserved across all slots
    pub fn reserved_bytes(&self) -> usize {
        self.slots.len() * (self.vertex_capacity + self.index_capacity + self.texture_capacity)
    }

    pub fn slot(&self, id: usize) -> Option<&Slot> {
        self.slots.get(id)
    }

    pub(crate) fn slot_mut(&mut self, id: usize) -> Option<&mut Slot> {
        self.slots.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    pub fn infos(&self) -> Vec<SlotInfo> {
        self.slots.iter().map(SlotInfo::from).collect()
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.slots.iter().filter(|s| s.job.is_some()).count()
    }

    /// Give a slot back the buffers its job returned. A job that never
    /// reported has lost its buffers, so the slot gets fresh ones.
    pub(crate) fn restore_buffers(
        &mut self,
        id: usize,
        geometry: Option<GeometryBuffers>,
        texture: Option<SlotBuffer>,
    ) {
        let geometry = geometry.unwrap_or_else(|| {
            log::warn!("slot {id} lost its geometry buffers; reallocating");
            GeometryBuffers::with_capacity(self.vertex_capacity, self.index_capacity)
        });
        let texture = texture.or_else(|| {
            (self.texture_capacity > 0).then(|| SlotBuffer::with_capacity(self.texture_capacity))
        });
        if let Some(slot) = self.slots.get_mut(id) {
            slot.geometry = Some(geometry);
            slot.texture = texture;
        }
    }

    /// Wait for every outstanding job, then free all slot memory.
    pub fn release_all(&mut self) {
        if self.released {
            return;
        }
        let outstanding = self.outstanding_jobs();
        if outstanding > 0 {
            log::debug!("draining {outstanding} outstanding read jobs");
        }
        for slot in &mut self.slots {
            if let Some(mut job) = slot.job.take() {
                job.wait();
                drop(job.into_outcome());
            }
            slot.state = SlotState::Empty;
            slot.assigned = None;
        }
        self.slots.clear();
        self.released = true;
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        if !self.released {
            if self.outstanding_jobs() > 0 {
                log::warn!("slot pool dropped without release_all; draining jobs");
            }
            self.release_all();
        }
    }
}
