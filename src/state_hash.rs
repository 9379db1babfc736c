//! Structural hashing of render state snapshots.
//!
//! Each hash covers exactly the fields that are baked into a pipeline or
//! sampler object as *static* state. Fields that become dynamic command
//! buffer state (blend constants, depth bias, stencil reference) are
//! deliberately left out so that changing them never causes a cache miss.
//!
//! Hashes are 128-bit xxh3 digests of a canonical little-endian encoding,
//! wide enough that the caches can key on the digest alone.

use xxhash_rust::xxh3::xxh3_128;

use crate::state::{BlendState, DepthStencilState, RasterizerState, SamplerState};

/// 128-bit structural hash of a render state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateHash(pub u128);

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    fn finish(self) -> StateHash {
        StateHash(xxh3_128(&self.buf))
    }
}

/// Hash of the static blend pipeline state. `blend_factor` is dynamic
/// state and not included.
pub fn blend_state_hash(state: &BlendState) -> StateHash {
    let mut enc = Encoder::new();
    enc.u8(state.color_source_blend as u8);
    enc.u8(state.color_destination_blend as u8);
    enc.u8(state.color_blend_function as u8);
    enc.u8(state.alpha_source_blend as u8);
    enc.u8(state.alpha_destination_blend as u8);
    enc.u8(state.alpha_blend_function as u8);
    enc.u8(state.color_write_enable.bits());
    enc.u8(state.color_write_enable1.bits());
    enc.u8(state.color_write_enable2.bits());
    enc.u8(state.color_write_enable3.bits());
    enc.finish()
}

/// Hash of the static rasterizer pipeline state. Depth bias values are
/// dynamic state and not included.
pub fn rasterizer_state_hash(state: &RasterizerState) -> StateHash {
    let mut enc = Encoder::new();
    enc.u8(state.cull_mode as u8);
    enc.u8(state.fill_mode as u8);
    enc.bool(state.scissor_test_enable);
    enc.u8(state.multi_sample_anti_alias);
    enc.finish()
}

/// Hash of the static depth-stencil pipeline state. The stencil
/// reference is dynamic state and not included.
pub fn depth_stencil_state_hash(state: &DepthStencilState) -> StateHash {
    let mut enc = Encoder::new();
    enc.bool(state.depth_buffer_enable);
    enc.bool(state.depth_buffer_write_enable);
    enc.u8(state.depth_buffer_function as u8);
    enc.bool(state.stencil_enable);
    enc.u32(state.stencil_mask);
    enc.u32(state.stencil_write_mask);
    enc.u8(state.stencil_fail as u8);
    enc.u8(state.stencil_depth_buffer_fail as u8);
    enc.u8(state.stencil_pass as u8);
    enc.u8(state.stencil_function as u8);
    enc.bool(state.two_sided_stencil_mode);
    enc.u8(state.ccw_stencil_fail as u8);
    enc.u8(state.ccw_stencil_depth_buffer_fail as u8);
    enc.u8(state.ccw_stencil_pass as u8);
    enc.u8(state.ccw_stencil_function as u8);
    enc.finish()
}

/// Hash of every sampler-object-affecting field.
pub fn sampler_state_hash(state: &SamplerState) -> StateHash {
    let mut enc = Encoder::new();
    enc.u8(state.address_u as u8);
    enc.u8(state.address_v as u8);
    enc.u8(state.address_w as u8);
    enc.u8(state.filter as u8);
    enc.u8(state.max_anisotropy);
    enc.u32(state.max_mip_level);
    enc.f32(state.mip_map_level_of_detail_bias);
    enc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Blend, Color, CullMode};

    #[test]
    fn identical_states_hash_identically() {
        let a = BlendState::default();
        let b = BlendState::default();
        assert_eq!(blend_state_hash(&a), blend_state_hash(&b));
    }

    #[test]
    fn static_field_changes_the_hash() {
        let base = BlendState::default();
        let mut changed = base;
        changed.color_source_blend = Blend::SourceAlpha;
        assert_ne!(blend_state_hash(&base), blend_state_hash(&changed));
    }

    #[test]
    fn dynamic_fields_do_not_change_the_hash() {
        let base = BlendState::default();
        let mut factor_changed = base;
        factor_changed.blend_factor = Color {
            r: 1,
            g: 2,
            b: 3,
            a: 4,
        };
        assert_eq!(blend_state_hash(&base), blend_state_hash(&factor_changed));

        let raster = RasterizerState::default();
        let mut bias_changed = raster;
        bias_changed.depth_bias = 4.0;
        bias_changed.slope_scale_depth_bias = 1.5;
        assert_eq!(
            rasterizer_state_hash(&raster),
            rasterizer_state_hash(&bias_changed)
        );

        let ds = DepthStencilState::default();
        let mut ref_changed = ds;
        ref_changed.reference_stencil = 42;
        assert_eq!(
            depth_stencil_state_hash(&ds),
            depth_stencil_state_hash(&ref_changed)
        );
    }

    #[test]
    fn distinct_rasterizer_states_diverge() {
        let base = RasterizerState::default();
        let mut cull = base;
        cull.cull_mode = CullMode::None;
        assert_ne!(rasterizer_state_hash(&base), rasterizer_state_hash(&cull));
    }

    #[test]
    fn sampler_hash_covers_lod_bias() {
        let base = SamplerState::default();
        let mut biased = base;
        biased.mip_map_level_of_detail_bias = 0.5;
        assert_ne!(sampler_state_hash(&base), sampler_state_hash(&biased));
    }
}
