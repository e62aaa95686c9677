//! Consumer boundary: borrowed frame views and the presenter trait.

use crate::descriptor::{Bounds, GeometryKind};

/// Read-only view of a loaded frame.
///
/// Borrowed from the streamer, so it cannot be held across the next call
/// that may reclaim the slot; consumers copy or upload what they need.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub index: usize,
    pub slot: usize,
    pub geometry_kind: GeometryKind,
    pub vertex_count: u64,
    pub index_count: u64,
    pub vertex_stride: u64,
    /// Raw vertex bytes in file layout
    pub vertices: &'a [u8],
    /// Raw u32 index bytes (empty for point clouds)
    pub indices: &'a [u8],
    /// Per-frame texture payload, or the shared texture in single mode
    pub texture: Option<&'a [u8]>,
    pub bounds: Bounds,
}

impl<'a> FrameView<'a> {
    #[inline]
    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    /// Vertex positions (the leading xyz f32 triple of each vertex).
    pub fn positions(&self) -> impl Iterator<Item = [f32; 3]> + 'a {
        let stride = self.vertex_stride.max(12) as usize;
        self.vertices.chunks_exact(stride).map(|v| {
            let f = |o: usize| f32::from_le_bytes([v[o], v[o + 1], v[o + 2], v[o + 3]]);
            [f(0), f(4), f(8)]
        })
    }

    /// Triangle indices decoded from little-endian u32.
    pub fn triangle_indices(&self) -> impl Iterator<Item = u32> + 'a {
        self.indices
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Implemented by the rendering side to receive newly shown frames.
pub trait FrameConsumer {
    /// Called once when a new frame becomes the displayed one.
    fn present(&mut self, frame: &FrameView<'_>);

    /// Called when the shown frame skipped `count` frames.
    fn frames_dropped(&mut self, _count: usize) {}
}

impl<F> FrameConsumer for F
where
    F: FnMut(&FrameView<'_>),
{
    fn present(&mut self, frame: &FrameView<'_>) {
        self(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_respect_stride() {
        let mut bytes = Vec::new();
        for v in [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            for c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
            bytes.extend_from_slice(&[255, 0, 0, 255]);
        }
        let view = FrameView {
            index: 0,
            slot: 0,
            geometry_kind: GeometryKind::Point,
            vertex_count: 2,
            index_count: 0,
            vertex_stride: 16,
            vertices: &bytes,
            indices: &[],
            texture: None,
            bounds: Bounds::default(),
        };
        let positions: Vec<[f32; 3]> = view.positions().collect();
        assert_eq!(positions, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(view.triangle_indices().count(), 0);
        assert!(!view.has_texture());
    }

    #[test]
    fn test_closure_consumer() {
        let mut seen = Vec::new();
        {
            let mut consumer = |f: &FrameView<'_>| seen.push(f.index);
            let view = FrameView {
                index: 7,
                slot: 1,
                geometry_kind: GeometryKind::Mesh,
                vertex_count: 0,
                index_count: 0,
                vertex_stride: 12,
                vertices: &[],
                indices: &[],
                texture: None,
                bounds: Bounds::default(),
            };
            consumer.present(&view);
        }
        assert_eq!(seen, vec![7]);
    }
}
