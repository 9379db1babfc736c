//! Growable dynamic buffers with per-frame discard/stall write semantics.
//!
//! Each logical vertex/index buffer owns a backing allocation that only
//! ever grows. Discard-style writes advance a cursor so that each
//! frame's worth of data lands in a fresh region while the GPU may still
//! be reading the previous one; policy-None writes against a buffer the
//! GPU already consumed this frame force a full pipeline stall instead.
//!
//! Buffers live in an arena and are addressed by generation-checked
//! [`BufferId`] handles.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::GpuError;
use crate::state::SetDataOptions;

/// Stable handle to a dynamic buffer. The generation guards against use
/// of a disposed-and-reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug)]
pub(crate) struct DynamicBuffer {
    pub handle: vk::Buffer,
    /// Host mirror of the backing allocation; source of truth for
    /// copy-forward on growth and partial-update preservation.
    contents: Vec<u8>,
    /// One frame's worth of data.
    pub size: u64,
    /// Write cursor into the backing allocation.
    pub internal_offset: u64,
    pub prev_internal_offset: u64,
    /// Length of the previous user-style write; consecutive user draws
    /// append by this amount.
    pub prev_data_length: u64,
    pub usage: vk::BufferUsageFlags,
    /// Consumed by a draw this frame. A policy-None write while set is
    /// the stall trigger.
    pub bound_this_frame: bool,
    /// Written this frame; makes the next discard write advance the
    /// cursor instead of overwriting in place.
    pub written_this_frame: bool,
}

impl DynamicBuffer {
    pub fn capacity(&self) -> u64 {
        self.contents.len() as u64
    }

    pub(crate) fn reset_for_frame(&mut self) {
        self.internal_offset = 0;
        self.prev_internal_offset = 0;
        self.prev_data_length = 0;
        self.bound_this_frame = false;
        self.written_this_frame = false;
    }

    fn grow<B: GpuBackend>(&mut self, backend: &mut B, new_capacity: u64) -> Result<(), GpuError> {
        let old_capacity = self.capacity();
        let new_handle = backend.create_buffer(new_capacity, self.usage)?;
        self.contents.resize(new_capacity as usize, 0);
        // Carry the already-written bytes into the new allocation before
        // the old one goes away.
        backend.write_buffer(new_handle, 0, &self.contents[..old_capacity as usize])?;
        backend.destroy_buffer(self.handle);
        self.handle = new_handle;
        Ok(())
    }
}

struct Slot {
    generation: u32,
    buffer: Option<DynamicBuffer>,
}

/// Arena of live dynamic buffers.
#[derive(Default)]
pub(crate) struct BufferRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl BufferRegistry {
    pub fn create<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<BufferId, GpuError> {
        let handle = backend.create_buffer(size, usage)?;
        let buffer = DynamicBuffer {
            handle,
            contents: vec![0; size as usize],
            size,
            internal_offset: 0,
            prev_internal_offset: 0,
            prev_data_length: 0,
            usage,
            bound_this_frame: false,
            written_this_frame: false,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].buffer = Some(buffer);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    buffer: Some(buffer),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Ok(BufferId {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn dispose<B: GpuBackend>(&mut self, backend: &mut B, id: BufferId) -> Result<(), GpuError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(GpuError::UnknownBuffer(id))?;
        let buffer = slot.buffer.take().ok_or(GpuError::UnknownBuffer(id))?;
        backend.destroy_buffer(buffer.handle);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    pub fn get(&self, id: BufferId) -> Result<&DynamicBuffer, GpuError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_ref())
            .ok_or(GpuError::UnknownBuffer(id))
    }

    pub fn get_mut(&mut self, id: BufferId) -> Result<&mut DynamicBuffer, GpuError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_mut())
            .ok_or(GpuError::UnknownBuffer(id))
    }

    /// Reset every live buffer's cursor and frame flags. Called on stall
    /// and at frame submission.
    pub fn reset_all_for_frame(&mut self) {
        for slot in &mut self.slots {
            if let Some(buffer) = slot.buffer.as_mut() {
                buffer.reset_for_frame();
            }
        }
    }

    /// Write into a retained buffer. Any required stall has already been
    /// taken by the orchestrator; this only implements the cursor/grow
    /// algebra and the upload.
    pub fn write_retained<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        id: BufferId,
        offset_in_bytes: u64,
        data: &[u8],
        options: SetDataOptions,
    ) -> Result<(), GpuError> {
        let buffer = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_mut())
            .ok_or(GpuError::UnknownBuffer(id))?;

        let len = data.len() as u64;

        if options == SetDataOptions::Discard
            && (buffer.bound_this_frame || buffer.written_this_frame)
        {
            buffer.internal_offset += buffer.size;
        }

        let required = buffer.internal_offset + (offset_in_bytes + len).max(buffer.size);
        if required > buffer.capacity() {
            let new_capacity = (buffer.capacity() * 2).max(required);
            buffer.grow(backend, new_capacity)?;
        }

        // A partial update of a freshly advanced region must still see
        // the rest of last frame's data.
        if len < buffer.size && buffer.prev_internal_offset != buffer.internal_offset {
            let src = buffer.prev_internal_offset as usize;
            let dst = buffer.internal_offset as usize;
            let span = buffer.size as usize;
            buffer.contents.copy_within(src..src + span, dst);
        }

        let write_start = (buffer.internal_offset + offset_in_bytes) as usize;
        buffer.contents[write_start..write_start + data.len()].copy_from_slice(data);

        let region_len = buffer.size.max(offset_in_bytes + len) as usize;
        let region_start = buffer.internal_offset as usize;
        backend.write_buffer(
            buffer.handle,
            buffer.internal_offset,
            &buffer.contents[region_start..region_start + region_len],
        )?;

        buffer.prev_internal_offset = buffer.internal_offset;
        buffer.written_this_frame = true;
        Ok(())
    }

    /// Write caller-supplied vertex/index data into a user buffer. The
    /// cursor advances past the previous write first so consecutive
    /// draws append rather than overwrite.
    pub fn write_user<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        id: BufferId,
        data: &[u8],
        data_offset: usize,
        len: u64,
    ) -> Result<(), GpuError> {
        let buffer = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_mut())
            .ok_or(GpuError::UnknownBuffer(id))?;

        buffer.internal_offset += buffer.prev_data_length;
        let required = buffer.internal_offset + len;
        if required > buffer.capacity() {
            let new_capacity = (buffer.capacity() * 2).max(required);
            buffer.grow(backend, new_capacity)?;
        }

        let start = buffer.internal_offset as usize;
        buffer.contents[start..start + len as usize]
            .copy_from_slice(&data[data_offset..data_offset + len as usize]);
        backend.write_buffer(
            buffer.handle,
            buffer.internal_offset,
            &buffer.contents[start..start + len as usize],
        )?;

        buffer.prev_data_length = len;
        buffer.written_this_frame = true;
        Ok(())
    }

    /// Destroy every live buffer. Device teardown path.
    pub fn destroy_all<B: GpuBackend>(&mut self, backend: &mut B) {
        for slot in &mut self.slots {
            if let Some(buffer) = slot.buffer.take() {
                backend.destroy_buffer(buffer.handle);
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).collect();
    }

    #[cfg(test)]
    pub fn contents_of(&self, id: BufferId) -> &[u8] {
        &self.slots[id.index as usize]
            .buffer
            .as_ref()
            .unwrap()
            .contents
    }
}
