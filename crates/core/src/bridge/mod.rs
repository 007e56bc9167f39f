//! Typed views over the DSP module's linear memory.
//!
//! Transforms operate on raw offsets, so every transfer across this
//! boundary is length-, bounds- and staleness-checked before a single byte
//! moves. A failed copy leaves the target region untouched.

use std::sync::Arc;

use crate::module::{DspModule, LinearMemory};
use crate::{RemixError, Result};

/// A read/write window over `len` little-endian `f32` samples starting at a
/// byte offset. No copy; the view aliases module memory and is invalidated
/// by any growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatView {
    offset: usize,
    len: usize,
    generation: u64,
}

impl FloatView {
    /// Byte offset of the window into linear memory.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of `f32` elements in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn byte_len(&self) -> usize {
        self.len * std::mem::size_of::<f32>()
    }
}

/// A read/write window over `len` raw bytes. Same validity rules as
/// [`FloatView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteView {
    offset: usize,
    len: usize,
    generation: u64,
}

impl ByteView {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Host-side access to one module's linear memory.
#[derive(Debug, Clone)]
pub struct MemoryBridge {
    module: Arc<DspModule>,
}

impl MemoryBridge {
    pub fn new(module: Arc<DspModule>) -> Self {
        Self { module }
    }

    /// The module this bridge operates on.
    pub fn module(&self) -> &Arc<DspModule> {
        &self.module
    }

    /// Constructs a float window at `offset` bytes, `len` elements long.
    pub fn as_float_view(&self, offset: usize, len: usize) -> Result<FloatView> {
        let memory = self.module.lock_memory()?;
        let byte_len = len * std::mem::size_of::<f32>();
        check_bounds(&memory, offset, byte_len)?;
        Ok(FloatView {
            offset,
            len,
            generation: memory.generation(),
        })
    }

    /// Constructs a byte window at `offset`, `len` bytes long.
    pub fn as_byte_view(&self, offset: usize, len: usize) -> Result<ByteView> {
        let memory = self.module.lock_memory()?;
        check_bounds(&memory, offset, len)?;
        Ok(ByteView {
            offset,
            len,
            generation: memory.generation(),
        })
    }

    /// Writes `source` into the window. The full array is copied or nothing
    /// is.
    pub fn copy_in(&self, view: &FloatView, source: &[f32]) -> Result<()> {
        let mut memory = self.module.lock_memory()?;
        validate_copy(&memory, view.generation, view.offset, view.byte_len(), view.len, source.len())?;

        let region = &mut memory.bytes_mut()[view.offset..view.offset + view.byte_len()];
        for (chunk, sample) in region.chunks_exact_mut(4).zip(source) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    /// Reads the window into `dest`. Same length contract as [`Self::copy_in`].
    pub fn copy_out(&self, view: &FloatView, dest: &mut [f32]) -> Result<()> {
        let memory = self.module.lock_memory()?;
        validate_copy(&memory, view.generation, view.offset, view.byte_len(), view.len, dest.len())?;

        let region = &memory.bytes()[view.offset..view.offset + view.byte_len()];
        for (chunk, slot) in region.chunks_exact(4).zip(dest) {
            *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    /// Raw-byte variant of [`Self::copy_in`].
    pub fn copy_in_bytes(&self, view: &ByteView, source: &[u8]) -> Result<()> {
        let mut memory = self.module.lock_memory()?;
        validate_copy(&memory, view.generation, view.offset, view.len, view.len, source.len())?;
        memory.bytes_mut()[view.offset..view.offset + view.len].copy_from_slice(source);
        Ok(())
    }

    /// Raw-byte variant of [`Self::copy_out`].
    pub fn copy_out_bytes(&self, view: &ByteView, dest: &mut [u8]) -> Result<()> {
        let memory = self.module.lock_memory()?;
        validate_copy(&memory, view.generation, view.offset, view.len, view.len, dest.len())?;
        dest.copy_from_slice(&memory.bytes()[view.offset..view.offset + view.len]);
        Ok(())
    }
}

fn check_bounds(memory: &LinearMemory, offset: usize, byte_len: usize) -> Result<()> {
    let end = offset.checked_add(byte_len);
    match end {
        Some(end) if end <= memory.len() => Ok(()),
        _ => Err(RemixError::OutOfBounds {
            offset,
            len: byte_len,
            size: memory.len(),
        }),
    }
}

fn validate_copy(
    memory: &LinearMemory,
    view_generation: u64,
    offset: usize,
    byte_len: usize,
    expected: usize,
    actual: usize,
) -> Result<()> {
    if view_generation != memory.generation() {
        return Err(RemixError::StaleView);
    }
    if expected != actual {
        return Err(RemixError::LengthMismatch { expected, actual });
    }
    check_bounds(memory, offset, byte_len)
}
