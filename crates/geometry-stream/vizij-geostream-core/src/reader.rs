//! Raw frame reads. No decoding happens here: geometry bytes are copied out
//! at the offsets the descriptor gives, textures are the trailing payload of
//! their container file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::descriptor::SequenceDescriptor;
use crate::error::StreamError;
use crate::slot::{GeometryBuffers, SlotBuffer};

/// Everything a worker needs to read one frame's geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryRead {
    pub frame_index: usize,
    pub path: PathBuf,
    pub header_size: u64,
    pub vertex_bytes: usize,
    pub index_bytes: usize,
}

impl GeometryRead {
    pub fn for_frame(descriptor: &SequenceDescriptor, frame_index: usize) -> Option<Self> {
        let layout = descriptor.frame(frame_index)?;
        Some(Self {
            frame_index,
            path: descriptor.geometry_files.get(frame_index)?.clone(),
            header_size: layout.header_size,
            vertex_bytes: descriptor.vertex_bytes(frame_index) as usize,
            index_bytes: descriptor.index_bytes(frame_index) as usize,
        })
    }
}

/// One texture payload read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureRead {
    pub frame_index: usize,
    pub path: PathBuf,
    pub size: usize,
}

impl TextureRead {
    pub fn for_frame(descriptor: &SequenceDescriptor, frame_index: usize) -> Option<Self> {
        Some(Self {
            frame_index,
            path: descriptor.texture_path(frame_index)?.to_path_buf(),
            size: descriptor.texture_size as usize,
        })
    }
}

fn io_err(frame_index: usize, path: &Path, err: std::io::Error) -> StreamError {
    StreamError::io(frame_index, format!("{}: {err}", path.display()))
}

/// Fill `buffers` with the vertex then index bytes of the frame.
pub fn read_geometry(req: &GeometryRead, buffers: &mut GeometryBuffers) -> Result<(), StreamError> {
    let mut file = File::open(&req.path).map_err(|e| io_err(req.frame_index, &req.path, e))?;
    file.seek(SeekFrom::Start(req.header_size))
        .map_err(|e| io_err(req.frame_index, &req.path, e))?;

    let vertices = buffers.vertices.prepare(req.frame_index, req.vertex_bytes)?;
    file.read_exact(vertices)
        .map_err(|e| io_err(req.frame_index, &req.path, e))?;

    let indices = buffers.indices.prepare(req.frame_index, req.index_bytes)?;
    file.read_exact(indices)
        .map_err(|e| io_err(req.frame_index, &req.path, e))?;
    Ok(())
}

/// Fill `buffer` with the trailing `req.size` bytes of the texture file.
pub fn read_texture(req: &TextureRead, buffer: &mut SlotBuffer) -> Result<(), StreamError> {
    let mut file = File::open(&req.path).map_err(|e| io_err(req.frame_index, &req.path, e))?;
    seek_to_payload(&mut file, req)?;
    let dst = buffer.prepare(req.frame_index, req.size)?;
    file.read_exact(dst)
        .map_err(|e| io_err(req.frame_index, &req.path, e))
}

/// Read a texture payload into a fresh allocation (the shared texture).
pub fn read_texture_owned(req: &TextureRead) -> Result<Vec<u8>, StreamError> {
    let mut buffer = SlotBuffer::with_capacity(req.size);
    read_texture(req, &mut buffer)?;
    Ok(buffer.as_slice().to_vec())
}

fn seek_to_payload(file: &mut File, req: &TextureRead) -> Result<(), StreamError> {
    let len = file
        .metadata()
        .map_err(|e| io_err(req.frame_index, &req.path, e))?
        .len();
    let size = req.size as u64;
    if len < size {
        return Err(StreamError::io(
            req.frame_index,
            format!(
                "{}: texture file is {len} bytes, payload needs {size}",
                req.path.display()
            ),
        ));
    }
    file.seek(SeekFrom::Start(len - size))
        .map_err(|e| io_err(req.frame_index, &req.path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_geometry_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"HEADER".to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let path = write_tmp(&dir, "f.ply", &bytes);

        let mut buffers = GeometryBuffers::with_capacity(8, 8);
        let req = GeometryRead {
            frame_index: 0,
            path,
            header_size: 6,
            vertex_bytes: 4,
            index_bytes: 2,
        };
        read_geometry(&req, &mut buffers).unwrap();
        assert_eq!(buffers.vertices.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(buffers.indices.as_slice(), &[5, 6]);
    }

    #[test]
    fn test_short_geometry_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "f.ply", &[0; 4]);
        let mut buffers = GeometryBuffers::with_capacity(16, 0);
        let req = GeometryRead {
            frame_index: 5,
            path,
            header_size: 0,
            vertex_bytes: 16,
            index_bytes: 0,
        };
        let err = read_geometry(&req, &mut buffers).unwrap_err();
        assert_eq!(err.frame_index(), Some(5));
    }

    #[test]
    fn test_texture_reads_trailing_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "t.dds", &[0xAA, 0xAA, 0xAA, 7, 8, 9]);
        let req = TextureRead {
            frame_index: 1,
            path,
            size: 3,
        };
        assert_eq!(read_texture_owned(&req).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_texture_smaller_than_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "t.astc", &[1, 2]);
        let req = TextureRead {
            frame_index: 0,
            path,
            size: 3,
        };
        assert!(read_texture_owned(&req).is_err());
    }
}
