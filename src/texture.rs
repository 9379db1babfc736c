//! Texture resources and their sampler-affecting state.

use ash::vk;

use crate::backend::{GpuBackend, GpuImage, ImageDescriptor};
use crate::error::GpuError;
use crate::state::{SamplerState, SurfaceFormat, TextureAddressMode, TextureFilter};

/// Stable handle to a texture. Generation-checked like [`BufferId`].
///
/// [`BufferId`]: crate::buffer::BufferId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug)]
pub(crate) struct Texture {
    pub image: GpuImage,
    pub format: SurfaceFormat,
    pub width: u32,
    pub height: u32,
    pub level_count: u32,
    pub is_render_target: bool,
    // Mutable sampler-affecting state, compared against the incoming
    // sampler snapshot on each verify to decide whether a rebind is due.
    pub wrap_s: TextureAddressMode,
    pub wrap_t: TextureAddressMode,
    pub wrap_r: TextureAddressMode,
    pub filter: TextureFilter,
    pub anisotropy: u8,
    pub max_mip_level: u32,
    pub lod_bias: f32,
}

impl Texture {
    /// Fold the incoming sampler state into this texture's fields.
    /// Returns true when anything sampler-affecting changed.
    pub fn absorb_sampler_state(&mut self, sampler: &SamplerState) -> bool {
        let changed = self.wrap_s != sampler.address_u
            || self.wrap_t != sampler.address_v
            || self.wrap_r != sampler.address_w
            || self.filter != sampler.filter
            || self.anisotropy != sampler.max_anisotropy
            || self.max_mip_level != sampler.max_mip_level
            || self.lod_bias != sampler.mip_map_level_of_detail_bias;
        if changed {
            self.wrap_s = sampler.address_u;
            self.wrap_t = sampler.address_v;
            self.wrap_r = sampler.address_w;
            self.filter = sampler.filter;
            self.anisotropy = sampler.max_anisotropy;
            self.max_mip_level = sampler.max_mip_level;
            self.lod_bias = sampler.mip_map_level_of_detail_bias;
        }
        changed
    }
}

struct Slot {
    generation: u32,
    texture: Option<Texture>,
}

#[derive(Default)]
pub(crate) struct TextureRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl TextureRegistry {
    pub fn create_2d<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        format: SurfaceFormat,
        width: u32,
        height: u32,
        level_count: u32,
        is_render_target: bool,
    ) -> Result<TextureId, GpuError> {
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if is_render_target {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = backend.create_image(&ImageDescriptor {
            format: format.to_vk(),
            width,
            height,
            mip_levels: level_count,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
        })?;

        let default_sampler = SamplerState::default();
        let texture = Texture {
            image,
            format,
            width,
            height,
            level_count,
            is_render_target,
            wrap_s: default_sampler.address_u,
            wrap_t: default_sampler.address_v,
            wrap_r: default_sampler.address_w,
            filter: default_sampler.filter,
            anisotropy: default_sampler.max_anisotropy,
            max_mip_level: default_sampler.max_mip_level,
            lod_bias: default_sampler.mip_map_level_of_detail_bias,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].texture = Some(texture);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    texture: Some(texture),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Ok(TextureId {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn dispose<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        id: TextureId,
    ) -> Result<(), GpuError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(GpuError::UnknownTexture(id))?;
        let texture = slot.texture.take().ok_or(GpuError::UnknownTexture(id))?;
        backend.destroy_image(texture.image);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    pub fn get(&self, id: TextureId) -> Result<&Texture, GpuError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.texture.as_ref())
            .ok_or(GpuError::UnknownTexture(id))
    }

    pub fn get_mut(&mut self, id: TextureId) -> Result<&mut Texture, GpuError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.texture.as_mut())
            .ok_or(GpuError::UnknownTexture(id))
    }

    pub fn destroy_all<B: GpuBackend>(&mut self, backend: &mut B) {
        for slot in &mut self.slots {
            if let Some(texture) = slot.texture.take() {
                backend.destroy_image(texture.image);
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).collect();
    }
}
