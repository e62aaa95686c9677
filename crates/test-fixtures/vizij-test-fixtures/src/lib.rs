use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    sequences: HashMap<String, String>,
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn resolve_path(rel: &str) -> PathBuf {
    fixtures_root().join(rel)
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = resolve_path(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

/// Recipe for a synthetic sequence directory.
///
/// Frame contents encode their own index so tests can check which frame a
/// slot really holds: vertex `v` of frame `f` starts with the position
/// `(f, v, 0)`, and every per-frame texture payload byte equals `f as u8`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceRecipe {
    /// `point`, `mesh` or `texturedMesh`
    pub geometry_type: String,
    /// `none`, `single` or `perFrame`
    #[serde(default = "default_texture_mode")]
    pub texture_mode: String,
    #[serde(default)]
    pub has_normals: bool,
    pub frames: usize,
    pub vertex_count: u64,
    #[serde(default)]
    pub index_count: u64,
    pub header_size: u64,
    #[serde(default)]
    pub texture_width: u32,
    #[serde(default)]
    pub texture_height: u32,
    #[serde(default)]
    pub texture_size: u64,
    /// Container bytes written before each texture payload
    #[serde(default)]
    pub texture_prefix_size: u64,
    #[serde(default)]
    pub dds: bool,
    #[serde(default)]
    pub astc: bool,
    /// Odd frames carry one vertex (and one triangle) fewer
    #[serde(default)]
    pub varying_counts: bool,
}

fn default_texture_mode() -> String {
    "none".to_string()
}

/// Byte written into the single shared texture payload
pub const SHARED_TEXTURE_BYTE: u8 = 0xEE;
const TEXTURE_PREFIX_BYTE: u8 = 0xAA;

impl SequenceRecipe {
    pub fn points(frames: usize, vertex_count: u64) -> Self {
        Self::new("point", frames, vertex_count, 0)
    }

    pub fn mesh(frames: usize, vertex_count: u64, index_count: u64) -> Self {
        Self::new("mesh", frames, vertex_count, index_count)
    }

    fn new(geometry_type: &str, frames: usize, vertex_count: u64, index_count: u64) -> Self {
        Self {
            geometry_type: geometry_type.to_string(),
            texture_mode: default_texture_mode(),
            has_normals: false,
            frames,
            vertex_count,
            index_count,
            header_size: 32,
            texture_width: 0,
            texture_height: 0,
            texture_size: 0,
            texture_prefix_size: 0,
            dds: false,
            astc: false,
            varying_counts: false,
        }
    }

    pub fn vertex_stride(&self) -> u64 {
        let normals = if self.has_normals { 12 } else { 0 };
        match self.geometry_type.as_str() {
            "point" => 16,
            "texturedMesh" => 20 + normals,
            _ => 12 + normals,
        }
    }

    pub fn index_stride(&self) -> u64 {
        if self.geometry_type == "point" {
            0
        } else {
            4
        }
    }

    pub fn vertex_count_of(&self, frame: usize) -> u64 {
        if self.varying_counts && frame % 2 == 1 {
            self.vertex_count.saturating_sub(1).max(1)
        } else {
            self.vertex_count
        }
    }

    pub fn index_count_of(&self, frame: usize) -> u64 {
        if self.index_stride() == 0 {
            0
        } else if self.varying_counts && frame % 2 == 1 {
            self.index_count.saturating_sub(3)
        } else {
            self.index_count
        }
    }

    /// Descriptor JSON matching the files this recipe writes.
    pub fn descriptor_json(&self) -> Value {
        let frames = 0..self.frames;
        json!({
            "geometryType": self.geometry_type,
            "textureMode": self.texture_mode,
            "dds": self.dds,
            "astc": self.astc,
            "hasNormals": self.has_normals,
            "maxVertexCount": self.vertex_count,
            "maxIndexCount": if self.index_stride() == 0 { 0 } else { self.index_count },
            "textureWidth": self.texture_width,
            "textureHeight": self.texture_height,
            "textureSizeDds": if self.dds { self.texture_size } else { 0 },
            "textureSizeAstc": if self.astc { self.texture_size } else { 0 },
            "bounds": { "center": [0.0, 0.0, 0.0], "size": [1.0, 1.0, 1.0] },
            "headerSizes": frames.clone().map(|_| self.header_size).collect::<Vec<_>>(),
            "vertexCounts": frames.clone().map(|f| self.vertex_count_of(f)).collect::<Vec<_>>(),
            "indexCounts": frames.map(|f| self.index_count_of(f)).collect::<Vec<_>>(),
        })
    }

    /// Expected vertex bytes of `frame`
    pub fn vertex_bytes(&self, frame: usize) -> Vec<u8> {
        let stride = self.vertex_stride() as usize;
        let mut out = Vec::with_capacity(stride * self.vertex_count_of(frame) as usize);
        for v in 0..self.vertex_count_of(frame) {
            let start = out.len();
            for c in [frame as f32, v as f32, 0.0] {
                out.extend_from_slice(&c.to_le_bytes());
            }
            if self.geometry_type == "point" {
                out.extend_from_slice(&[frame as u8, 0, 0, 255]);
            }
            out.resize(start + stride, 0);
        }
        out
    }

    /// Expected index bytes of `frame`
    pub fn index_bytes(&self, frame: usize) -> Vec<u8> {
        let vertices = self.vertex_count_of(frame).max(1);
        (0..self.index_count_of(frame))
            .flat_map(|k| ((k % vertices) as u32).to_le_bytes())
            .collect()
    }

    /// Expected texture payload of `frame`
    pub fn texture_payload(&self, frame: usize) -> Vec<u8> {
        let byte = if self.texture_mode == "single" {
            SHARED_TEXTURE_BYTE
        } else {
            frame as u8
        };
        vec![byte; self.texture_size as usize]
    }

    /// Write the sequence into a fresh temporary directory.
    pub fn build(&self) -> Result<SequenceFixture> {
        let dir = tempfile::Builder::new()
            .prefix("geostream-seq-")
            .tempdir()
            .context("failed to create temp dir for sequence fixture")?;
        let fixture = SequenceFixture {
            dir,
            recipe: self.clone(),
        };
        fixture.write_all()?;
        Ok(fixture)
    }
}

/// A sequence written to disk; removed when dropped.
#[derive(Debug)]
pub struct SequenceFixture {
    dir: TempDir,
    recipe: SequenceRecipe,
}

impl SequenceFixture {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn recipe(&self) -> &SequenceRecipe {
        &self.recipe
    }

    pub fn frames(&self) -> usize {
        self.recipe.frames
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.path().join("sequence.json")
    }

    /// Unpadded names so directory order differs from frame order past 9
    pub fn geometry_path(&self, frame: usize) -> PathBuf {
        self.path().join(format!("frame_{frame}.ply"))
    }

    pub fn texture_path(&self, frame: usize, extension: &str) -> PathBuf {
        if self.recipe.texture_mode == "single" {
            self.path().join(format!("texture.{extension}"))
        } else {
            self.path().join(format!("tex_{frame}.{extension}"))
        }
    }

    fn write_all(&self) -> Result<()> {
        self.write_descriptor(&self.recipe.descriptor_json())?;
        for frame in 0..self.recipe.frames {
            self.write_geometry(frame)?;
        }
        for (enabled, ext) in [(self.recipe.dds, "dds"), (self.recipe.astc, "astc")] {
            if !enabled {
                continue;
            }
            match self.recipe.texture_mode.as_str() {
                "single" => self.write_texture(0, ext)?,
                "perFrame" => {
                    for frame in 0..self.recipe.frames {
                        self.write_texture(frame, ext)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn write_descriptor(&self, descriptor: &Value) -> Result<()> {
        let text = serde_json::to_string_pretty(descriptor)?;
        self.write_descriptor_raw(&text)
    }

    pub fn write_descriptor_raw(&self, text: &str) -> Result<()> {
        let path = self.descriptor_path();
        fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))
    }

    fn write_geometry(&self, frame: usize) -> Result<()> {
        let header_size = self.recipe.header_size as usize;
        if header_size < 4 {
            bail!("header size {header_size} too small for a ply magic");
        }
        let mut bytes = b"ply\n".to_vec();
        bytes.resize(header_size, b' ');
        bytes[header_size - 1] = b'\n';
        bytes.extend(self.recipe.vertex_bytes(frame));
        bytes.extend(self.recipe.index_bytes(frame));

        let path = self.geometry_path(frame);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    fn write_texture(&self, frame: usize, extension: &str) -> Result<()> {
        let mut bytes = vec![TEXTURE_PREFIX_BYTE; self.recipe.texture_prefix_size as usize];
        bytes.extend(self.recipe.texture_payload(frame));
        let path = self.texture_path(frame, extension);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn remove_descriptor(&self) -> Result<()> {
        fs::remove_file(self.descriptor_path()).context("failed to remove descriptor")
    }

    pub fn remove_geometry(&self, frame: usize) -> Result<()> {
        let path = self.geometry_path(frame);
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))
    }

    pub fn remove_all_geometry(&self) -> Result<()> {
        (0..self.recipe.frames).try_for_each(|f| self.remove_geometry(f))
    }

    /// Cut frame `frame`'s geometry file to `len` bytes.
    pub fn truncate_geometry(&self, frame: usize, len: u64) -> Result<()> {
        let path = self.geometry_path(frame);
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.set_len(len)
            .with_context(|| format!("failed to truncate {}", path.display()))
    }

    pub fn remove_textures(&self, extension: &str) -> Result<()> {
        for entry in fs::read_dir(self.path())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

pub mod sequences {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.sequences.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.sequences, "sequence", name)?;
        read_to_string(rel)
    }

    pub fn recipe(name: &str) -> Result<SequenceRecipe> {
        let text = json(name)?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse sequence fixture {name}"))
    }

    pub fn path(name: &str) -> Result<PathBuf> {
        let rel = lookup(&MANIFEST.sequences, "sequence", name)?;
        Ok(resolve_path(rel))
    }

    /// Write the named recipe to a temporary directory.
    pub fn materialize(name: &str) -> Result<SequenceFixture> {
        recipe(name)?.build()
    }

    /// Like [`materialize`], adjusting the recipe first.
    pub fn materialize_with(
        name: &str,
        adjust: impl FnOnce(&mut SequenceRecipe),
    ) -> Result<SequenceFixture> {
        let mut recipe = recipe(name)?;
        adjust(&mut recipe);
        recipe.build()
    }
}
