//! Vizij Geometry Stream Core (engine-agnostic)
//!
//! Plays back volumetric sequences stored as one geometry file per frame
//! (plus optional compressed textures). A fixed pool of slots is filled by
//! background reads just ahead of the playhead, and a wall-clock driven
//! playback clock picks the frame to show, skipping frames whose time has
//! passed. Rendering stays outside the crate behind [`FrameConsumer`].

pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod files;
pub mod frame;
pub mod ids;
pub mod job;
pub mod metrics;
pub mod outputs;
pub mod pool;
pub mod reader;
pub mod ring;
pub mod slot;
pub mod streamer;

// Re-exports for consumers (adapters)
pub use clock::{ClockTick, PlaybackClock, PlaybackState};
pub use config::{StreamerConfig, TextureJobMode};
pub use descriptor::{
    Bounds, FrameLayout, GeometryKind, SequenceDescriptor, TextureFormat, TextureMode,
    TexturePlatform, TextureSource, DESCRIPTOR_FILE_NAME, GEOMETRY_EXTENSION,
    MAX_SLOT_BUFFER_BYTES,
};
pub use error::StreamError;
pub use executor::{InlineExecutor, JobExecutor, ManualExecutor, RayonExecutor};
pub use frame::{FrameConsumer, FrameView};
pub use ids::SequenceId;
pub use metrics::PlaybackMetrics;
pub use outputs::{StreamEvent, TickReport};
pub use ring::{FrameStatus, RingBufferManager};
pub use slot::{SlotInfo, SlotState};
pub use streamer::SequenceStreamer;

/// Result type for streamer operations
pub type Result<T> = core::result::Result<T, StreamError>;
