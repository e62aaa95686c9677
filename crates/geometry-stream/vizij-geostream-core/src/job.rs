//! Pollable completion handles for background frame reads.
//!
//! A job owns the slot buffers it writes into and hands them back over a
//! one-shot channel, so the manager regains the memory exactly when the
//! read is over and never before.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::StreamError;
use crate::slot::{GeometryBuffers, SlotBuffer};

/// What a finished job returns: the buffer it borrowed and how the read went.
#[derive(Debug)]
pub(crate) struct Completed<T> {
    pub buffer: T,
    pub result: Result<(), StreamError>,
}

/// Sending half given to the task.
#[derive(Debug)]
pub(crate) struct Completion<T> {
    tx: Sender<Completed<T>>,
}

impl<T> Completion<T> {
    pub fn finish(self, buffer: T, result: Result<(), StreamError>) {
        // The receiver only disappears when the handle itself was dropped,
        // in which case nobody is waiting for the buffer any more.
        let _ = self.tx.send(Completed { buffer, result });
    }
}

#[derive(Debug)]
enum Part<T> {
    Pending(Receiver<Completed<T>>),
    Done(Completed<T>),
    /// The task ended without reporting; its buffer is gone
    Lost,
}

impl<T> Part<T> {
    fn pending() -> (Completion<T>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (Completion { tx }, Part::Pending(rx))
    }

    fn poll(&mut self) -> bool {
        if let Part::Pending(rx) = self {
            match rx.try_recv() {
                Ok(done) => *self = Part::Done(done),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => *self = Part::Lost,
            }
        }
        true
    }

    fn wait(&mut self) {
        if let Part::Pending(rx) = self {
            *self = match rx.recv() {
                Ok(done) => Part::Done(done),
                Err(_) => Part::Lost,
            };
        }
    }

    fn take(self, frame_index: usize) -> (Option<T>, Result<(), StreamError>) {
        match self {
            Part::Done(Completed { buffer, result }) => (Some(buffer), result),
            Part::Lost => (
                None,
                Err(StreamError::io(frame_index, "read task ended without reporting")),
            ),
            Part::Pending(_) => (
                None,
                Err(StreamError::io(frame_index, "read task still running")),
            ),
        }
    }
}

/// Handle on the read(s) in flight for one slot: geometry, plus the texture
/// when the sequence has per-frame textures.
#[derive(Debug)]
pub struct FrameJobHandle {
    frame_index: usize,
    geometry: Part<GeometryBuffers>,
    texture: Option<Part<SlotBuffer>>,
}

/// Buffers and status recovered from a completed handle.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub geometry: Option<GeometryBuffers>,
    pub texture: Option<SlotBuffer>,
    pub error: Option<StreamError>,
}

impl FrameJobHandle {
    pub(crate) fn new(
        frame_index: usize,
        with_texture: bool,
    ) -> (
        Self,
        Completion<GeometryBuffers>,
        Option<Completion<SlotBuffer>>,
    ) {
        let (geo_tx, geometry) = Part::pending();
        let (tex_tx, texture) = if with_texture {
            let (tx, part) = Part::pending();
            (Some(tx), Some(part))
        } else {
            (None, None)
        };
        (
            Self {
                frame_index,
                geometry,
                texture,
            },
            geo_tx,
            tex_tx,
        )
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Non-blocking: true once every attached read has reported.
    pub fn is_complete(&mut self) -> bool {
        let geometry_done = self.geometry.poll();
        let texture_done = self.texture.as_mut().map_or(true, Part::poll);
        geometry_done && texture_done
    }

    /// Block until every attached read has reported.
    pub fn wait(&mut self) {
        self.geometry.wait();
        if let Some(texture) = self.texture.as_mut() {
            texture.wait();
        }
    }

    /// Recover buffers; call only after `is_complete` or `wait`.
    pub(crate) fn into_outcome(self) -> JobOutcome {
        let frame_index = self.frame_index;
        let (geometry, geo_result) = self.geometry.take(frame_index);
        let (texture, tex_result) = match self.texture {
            Some(part) => part.take(frame_index),
            None => (None, Ok(())),
        };
        JobOutcome {
            geometry,
            texture,
            error: geo_result.err().or_else(|| tex_result.err()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_after_both_parts_report() {
        let (mut handle, geo, tex) = FrameJobHandle::new(4, true);
        assert!(!handle.is_complete());

        geo.finish(GeometryBuffers::with_capacity(4, 4), Ok(()));
        assert!(!handle.is_complete());

        tex.expect("texture completion")
            .finish(SlotBuffer::with_capacity(8), Ok(()));
        assert!(handle.is_complete());

        let outcome = handle.into_outcome();
        assert!(outcome.geometry.is_some());
        assert_eq!(outcome.texture.map(|t| t.capacity()), Some(8));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_error_is_reported_with_buffers() {
        let (mut handle, geo, _) = FrameJobHandle::new(2, false);
        geo.finish(
            GeometryBuffers::with_capacity(4, 0),
            Err(StreamError::io(2, "short read")),
        );
        handle.wait();
        let outcome = handle.into_outcome();
        assert!(outcome.geometry.is_some());
        assert_eq!(outcome.error.and_then(|e| e.frame_index()), Some(2));
    }

    #[test]
    fn test_dropped_sender_counts_as_lost() {
        let (mut handle, geo, _) = FrameJobHandle::new(9, false);
        drop(geo);
        assert!(handle.is_complete());
        let outcome = handle.into_outcome();
        assert!(outcome.geometry.is_none());
        assert!(outcome.error.is_some());
    }
}
