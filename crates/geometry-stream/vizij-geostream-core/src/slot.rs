//! Slots: fixed-capacity buffers that hold one frame at a time.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::job::FrameJobHandle;

/// Lifecycle of a slot for its current assignment.
///
/// `Empty → Loading → Ready → Playing → Consumed → Loading …`, with
/// `Loading → Failed → Consumed` when a read goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// Never assigned
    Empty,
    /// A read job is outstanding
    Loading,
    /// Loaded, not shown yet
    Ready,
    /// The frame currently on screen
    Playing,
    /// Done with its assignment; free for reuse
    Consumed,
    /// The read job finished with an error
    Failed,
}

impl SlotState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Consumed => "consumed",
            Self::Failed => "failed",
        }
    }

    /// Whether the manager may give this slot a new frame
    #[inline]
    pub fn is_reusable(&self) -> bool {
        matches!(self, Self::Empty | Self::Consumed)
    }

    /// Whether the slot still owns its assigned frame index
    #[inline]
    pub fn holds_assignment(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Ready | Self::Playing | Self::Failed
        )
    }

    /// Loaded data that may be handed to a consumer
    #[inline]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing)
    }
}

/// A byte buffer allocated once at full capacity; reads fill a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotBuffer {
    data: Vec<u8>,
    filled: usize,
}

impl SlotBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            filled: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.filled
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// The filled prefix
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Mutable prefix of `len` bytes to read into; never grows the buffer.
    pub(crate) fn prepare(&mut self, frame_index: usize, len: usize) -> Result<&mut [u8], StreamError> {
        if len > self.data.len() {
            self.filled = 0;
            return Err(StreamError::io(
                frame_index,
                format!(
                    "frame needs {len} bytes but slot capacity is {}",
                    self.data.len()
                ),
            ));
        }
        self.filled = len;
        Ok(&mut self.data[..len])
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.filled = 0;
    }
}

/// Vertex and index storage of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometryBuffers {
    pub vertices: SlotBuffer,
    pub indices: SlotBuffer,
}

impl GeometryBuffers {
    pub fn with_capacity(vertex_bytes: usize, index_bytes: usize) -> Self {
        Self {
            vertices: SlotBuffer::with_capacity(vertex_bytes),
            indices: SlotBuffer::with_capacity(index_bytes),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }
}

/// One reusable region of the pool.
///
/// While a job runs, its buffers live inside the job and `geometry` /
/// `texture` are `None`; they come back when the handle completes.
#[derive(Debug)]
pub struct Slot {
    pub(crate) id: usize,
    pub(crate) state: SlotState,
    pub(crate) assigned: Option<usize>,
    pub(crate) geometry: Option<GeometryBuffers>,
    pub(crate) texture: Option<SlotBuffer>,
    pub(crate) job: Option<FrameJobHandle>,
    pub(crate) error: Option<StreamError>,
}

impl Slot {
    pub(crate) fn new(id: usize, geometry: GeometryBuffers, texture: Option<SlotBuffer>) -> Self {
        Self {
            id,
            state: SlotState::Empty,
            assigned: None,
            geometry: Some(geometry),
            texture,
            job: None,
            error: None,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn assigned_frame(&self) -> Option<usize> {
        self.assigned
    }

    #[inline]
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    #[inline]
    pub fn has_outstanding_job(&self) -> bool {
        self.job.is_some()
    }

    /// Drop the assignment and make the slot reusable.
    pub(crate) fn consume(&mut self) {
        debug_assert!(self.job.is_none(), "consuming slot {} with a job in flight", self.id);
        self.state = SlotState::Consumed;
        self.error = None;
        if let Some(geometry) = self.geometry.as_mut() {
            geometry.clear();
        }
        if let Some(texture) = self.texture.as_mut() {
            texture.clear();
        }
    }
}

/// Read-only snapshot of a slot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: usize,
    pub state: SlotState,
    pub assigned_frame: Option<usize>,
}

impl From<&Slot> for SlotInfo {
    fn from(slot: &Slot) -> Self {
        Self {
            id: slot.id,
            state: slot.state,
            assigned_frame: slot.assigned,
        }
    }
}
