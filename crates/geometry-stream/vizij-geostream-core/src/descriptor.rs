//! Sequence descriptor: the immutable per-sequence layout loaded at open.
//!
//! A sequence directory holds `sequence.json`, one `.ply` geometry file per
//! frame and, depending on the texture mode, one shared texture or one
//! texture per frame in `.dds` and/or `.astc` form. Loading validates all of
//! it up front and either returns a complete [`SequenceDescriptor`] or an
//! error; nothing partially loaded escapes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::files::list_files_with_extension;

pub const DESCRIPTOR_FILE_NAME: &str = "sequence.json";
pub const GEOMETRY_EXTENSION: &str = "ply";
/// Largest buffer a descriptor may ask each slot to reserve
pub const MAX_SLOT_BUFFER_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeometryKind {
    Point,
    Mesh,
    TexturedMesh,
}

impl GeometryKind {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Mesh => "mesh",
            Self::TexturedMesh => "texturedMesh",
        }
    }

    /// Bytes per vertex as laid out in the geometry files
    #[inline]
    pub fn vertex_stride(&self, has_normals: bool) -> u64 {
        let normals = if has_normals { 12 } else { 0 };
        match self {
            // xyz f32 + rgba8
            Self::Point => 12 + 4,
            Self::Mesh => 12 + normals,
            // xyz f32 + uv f32
            Self::TexturedMesh => 12 + 8 + normals,
        }
    }

    /// Bytes per index (u32 indices; point clouds have none)
    #[inline]
    pub fn index_stride(&self) -> u64 {
        match self {
            Self::Point => 0,
            Self::Mesh | Self::TexturedMesh => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TextureMode {
    #[default]
    None,
    /// One texture shared by every frame
    Single,
    /// One texture per frame
    PerFrame,
}

/// Compressed texture container formats a sequence may ship with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextureFormat {
    Dds,
    Astc,
}

impl TextureFormat {
    #[inline]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Dds => "dds",
            Self::Astc => "astc",
        }
    }
}

/// Platform class, which decides the required texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TexturePlatform {
    Desktop,
    Mobile,
}

impl TexturePlatform {
    /// The platform this binary was built for
    pub fn current() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    #[inline]
    pub fn required_format(&self) -> TextureFormat {
        match self {
            Self::Desktop => TextureFormat::Dds,
            Self::Mobile => TextureFormat::Astc,
        }
    }
}

impl Default for TexturePlatform {
    fn default() -> Self {
        Self::current()
    }
}

/// Axis-aligned bounding volume of the whole sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Bounds {
    pub center: [f32; 3],
    pub size: [f32; 3],
}

impl Bounds {
    pub fn min(&self) -> [f32; 3] {
        std::array::from_fn(|i| self.center[i] - self.size[i] * 0.5)
    }

    pub fn max(&self) -> [f32; 3] {
        std::array::from_fn(|i| self.center[i] + self.size[i] * 0.5)
    }
}

/// Byte layout of one frame's geometry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub header_size: u64,
    pub vertex_count: u64,
    pub index_count: u64,
}

/// Where textures come from once the format is settled.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    None,
    Single(PathBuf),
    PerFrame(Vec<PathBuf>),
}

/// On-disk shape of `sequence.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    geometry_type: GeometryKind,
    #[serde(default)]
    texture_mode: TextureMode,
    #[serde(default)]
    dds: bool,
    #[serde(default)]
    astc: bool,
    #[serde(default)]
    has_normals: bool,
    max_vertex_count: u64,
    #[serde(default)]
    max_index_count: u64,
    #[serde(default)]
    texture_width: u32,
    #[serde(default)]
    texture_height: u32,
    #[serde(default)]
    texture_size_dds: u64,
    #[serde(default)]
    texture_size_astc: u64,
    #[serde(default)]
    bounds: Bounds,
    header_sizes: Vec<u64>,
    vertex_counts: Vec<u64>,
    #[serde(default)]
    index_counts: Vec<u64>,
}

/// Validated, immutable description of an opened sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDescriptor {
    pub directory: PathBuf,
    pub geometry_kind: GeometryKind,
    pub texture_mode: TextureMode,
    /// Format selected for this platform; `None` when the sequence is untextured
    pub texture_format: Option<TextureFormat>,
    pub has_normals: bool,
    pub max_vertex_count: u64,
    pub max_index_count: u64,
    pub texture_width: u32,
    pub texture_height: u32,
    /// Payload bytes of one texture in the selected format
    pub texture_size: u64,
    pub bounds: Bounds,
    pub frames: Vec<FrameLayout>,
    pub geometry_files: Vec<PathBuf>,
    pub textures: TextureSource,
}

impl SequenceDescriptor {
    /// Load and validate the sequence in `dir` for the given platform.
    pub fn load(dir: impl AsRef<Path>, platform: TexturePlatform) -> Result<Self, StreamError> {
        let dir = dir.as_ref();
        let descriptor_path = dir.join(DESCRIPTOR_FILE_NAME);
        let text = fs::read_to_string(&descriptor_path).map_err(|_| StreamError::ConfigNotFound {
            path: descriptor_path.display().to_string(),
        })?;
        Self::from_json(dir, &text, platform)
    }

    /// Validate descriptor JSON against the files present in `dir`.
    pub fn from_json(
        dir: impl AsRef<Path>,
        json: &str,
        platform: TexturePlatform,
    ) -> Result<Self, StreamError> {
        let dir = dir.as_ref();
        let descriptor_path = dir.join(DESCRIPTOR_FILE_NAME);
        let parse_err = |reason: String| StreamError::ConfigParse {
            path: descriptor_path.display().to_string(),
            reason,
        };

        let raw: RawDescriptor =
            serde_json::from_str(json).map_err(|e| parse_err(format!("parse error: {e}")))?;

        let geometry_files = list_files_with_extension(dir, GEOMETRY_EXTENSION)
            .map_err(|e| parse_err(format!("cannot list {}: {e}", dir.display())))?;
        if geometry_files.is_empty() {
            return Err(StreamError::NoGeometryFiles {
                path: dir.display().to_string(),
                extension: GEOMETRY_EXTENSION.to_string(),
            });
        }

        let frames = validate_layout(&raw, geometry_files.len()).map_err(&parse_err)?;

        if raw.geometry_type == GeometryKind::TexturedMesh && raw.texture_mode == TextureMode::None
        {
            return Err(parse_err(
                "textured mesh sequence declares no texture mode".to_string(),
            ));
        }

        let (texture_format, texture_size, textures) =
            resolve_textures(dir, &raw, frames.len(), platform, &parse_err)?;

        Ok(Self {
            directory: dir.to_path_buf(),
            geometry_kind: raw.geometry_type,
            texture_mode: raw.texture_mode,
            texture_format,
            has_normals: raw.has_normals,
            max_vertex_count: raw.max_vertex_count,
            max_index_count: raw.max_index_count,
            texture_width: raw.texture_width,
            texture_height: raw.texture_height,
            texture_size,
            bounds: raw.bounds,
            frames,
            geometry_files,
            textures,
        })
    }

    #[inline]
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn vertex_stride(&self) -> u64 {
        self.geometry_kind.vertex_stride(self.has_normals)
    }

    #[inline]
    pub fn index_stride(&self) -> u64 {
        self.geometry_kind.index_stride()
    }

    pub fn frame(&self, index: usize) -> Option<&FrameLayout> {
        self.frames.get(index)
    }

    pub fn vertex_bytes(&self, index: usize) -> u64 {
        self.frames
            .get(index)
            .map_or(0, |f| f.vertex_count * self.vertex_stride())
    }

    pub fn index_bytes(&self, index: usize) -> u64 {
        self.frames
            .get(index)
            .map_or(0, |f| f.index_count * self.index_stride())
    }

    /// Capacity every slot's vertex buffer is created with
    #[inline]
    pub fn max_vertex_bytes(&self) -> u64 {
        self.max_vertex_count * self.vertex_stride()
    }

    #[inline]
    pub fn max_index_bytes(&self) -> u64 {
        self.max_index_count * self.index_stride()
    }

    /// Per-slot texture capacity; zero unless textures are per frame
    #[inline]
    pub fn max_texture_bytes(&self) -> u64 {
        if self.texture_mode == TextureMode::PerFrame {
            self.texture_size
        } else {
            0
        }
    }

    /// Texture file backing frame `index` (the shared file in single mode)
    pub fn texture_path(&self, index: usize) -> Option<&Path> {
        match &self.textures {
            TextureSource::PerFrame(paths) => paths.get(index).map(PathBuf::as_path),
            TextureSource::Single(path) => Some(path.as_path()),
            TextureSource::None => None,
        }
    }
}

fn validate_layout(raw: &RawDescriptor, file_count: usize) -> Result<Vec<FrameLayout>, String> {
    let frame_count = raw.header_sizes.len();
    if raw.vertex_counts.len() != frame_count {
        return Err(format!(
            "headerSizes has {frame_count} entries but vertexCounts has {}",
            raw.vertex_counts.len()
        ));
    }

    check_slot_buffer(
        "maxVertexCount",
        raw.max_vertex_count,
        raw.geometry_type.vertex_stride(raw.has_normals),
    )?;
    check_slot_buffer(
        "maxIndexCount",
        raw.max_index_count,
        raw.geometry_type.index_stride(),
    )?;

    let has_indices = raw.geometry_type.index_stride() > 0;
    if has_indices && raw.index_counts.len() != frame_count {
        return Err(format!(
            "headerSizes has {frame_count} entries but indexCounts has {}",
            raw.index_counts.len()
        ));
    }
    if !has_indices && raw.index_counts.iter().any(|&c| c > 0) {
        return Err("point cloud sequence lists index counts".to_string());
    }

    if frame_count != file_count {
        return Err(format!(
            "descriptor lists {frame_count} frames but {file_count} geometry files were found"
        ));
    }

    let mut frames = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let vertex_count = raw.vertex_counts[i];
        let index_count = if has_indices { raw.index_counts[i] } else { 0 };
        if vertex_count > raw.max_vertex_count {
            return Err(format!(
                "frame {i} has {vertex_count} vertices, above maxVertexCount {}",
                raw.max_vertex_count
            ));
        }
        if index_count > raw.max_index_count {
            return Err(format!(
                "frame {i} has {index_count} indices, above maxIndexCount {}",
                raw.max_index_count
            ));
        }
        frames.push(FrameLayout {
            header_size: raw.header_sizes[i],
            vertex_count,
            index_count,
        });
    }
    Ok(frames)
}

fn check_slot_buffer(field: &str, count: u64, stride: u64) -> Result<(), String> {
    match count.checked_mul(stride) {
        Some(bytes) if bytes <= MAX_SLOT_BUFFER_BYTES => Ok(()),
        _ => Err(format!(
            "{field} {count} needs more than {MAX_SLOT_BUFFER_BYTES} bytes per slot"
        )),
    }
}

fn resolve_textures(
    dir: &Path,
    raw: &RawDescriptor,
    frame_count: usize,
    platform: TexturePlatform,
    parse_err: &dyn Fn(String) -> StreamError,
) -> Result<(Option<TextureFormat>, u64, TextureSource), StreamError> {
    if raw.texture_mode == TextureMode::None {
        return Ok((None, 0, TextureSource::None));
    }

    let format = platform.required_format();
    let missing = |reason: String| StreamError::MissingRequiredTextureFormat {
        path: dir.display().to_string(),
        format: format.extension().to_string(),
        reason,
    };

    let (flagged, size) = match format {
        TextureFormat::Dds => (raw.dds, raw.texture_size_dds),
        TextureFormat::Astc => (raw.astc, raw.texture_size_astc),
    };
    if !flagged {
        return Err(missing(format!(
            "sequence was not exported with {} textures",
            format.extension()
        )));
    }

    let size_field = match format {
        TextureFormat::Dds => "textureSizeDds",
        TextureFormat::Astc => "textureSizeAstc",
    };
    if size == 0 {
        return Err(parse_err(format!("{size_field} must be non-zero")));
    }
    check_slot_buffer(size_field, size, 1).map_err(parse_err)?;

    let files = list_files_with_extension(dir, format.extension())
        .map_err(|e| missing(format!("cannot list textures: {e}")))?;
    let source = match raw.texture_mode {
        TextureMode::Single => match files.into_iter().next() {
            Some(path) => TextureSource::Single(path),
            None => return Err(missing("no texture file found".to_string())),
        },
        TextureMode::PerFrame => {
            if files.len() < frame_count {
                return Err(missing(format!(
                    "{} texture files for {frame_count} frames",
                    files.len()
                )));
            }
            TextureSource::PerFrame(files.into_iter().take(frame_count).collect())
        }
        TextureMode::None => TextureSource::None,
    };

    Ok((Some(format), size, source))
}
