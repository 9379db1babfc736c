//! `magma-gpu` translates a retained, XNA-style rendering API (draw
//! calls, render states, render targets, buffers, effects) into command
//! sequences for Vulkan.
//!
//! The crate is the runtime resource-cache and frame-execution engine of
//! that translation:
//! - hash-keyed, process-lifetime caches for pipelines, render passes,
//!   framebuffers and samplers (see [`cache`]);
//! - growable dynamic buffers with discard/stall write semantics (see
//!   [`buffer`]);
//! - the frame → render-pass → command-buffer state machine with
//!   per-swapchain-image binding shadows (see [`Renderer`]);
//! - table-driven image layout transitions (see [`barrier`]);
//! - pooled occlusion query allocation (see [`query`]).
//!
//! Device/swapchain bring-up and shader reflection are external; they
//! hand the core a [`GpuBackend`] (the shipped driver-backed one is
//! [`VulkanBackend`]) and [`ShaderEffect`] implementations.

pub mod backend;
pub mod barrier;
pub mod buffer;
pub mod cache;
pub mod effect;
pub mod error;
pub mod query;
pub mod renderer;
pub mod state;
pub mod state_hash;
pub mod texture;

#[cfg(test)]
mod tests;

pub use backend::vulkan::{VulkanBackend, VulkanBackendInfo};
pub use backend::GpuBackend;
pub use buffer::BufferId;
pub use effect::{EffectId, ShaderEffect, UniformBinding, UniformRegion};
pub use error::GpuError;
pub use query::QueryHandle;
pub use renderer::{PresentationParameters, RenderTargetBinding, Renderer, VertexBufferBinding};
pub use state::{
    Blend, BlendFunction, BlendState, ClearOptions, Color, ColorWriteChannels, CompareFunction,
    CullMode, DepthFormat, DepthStencilState, FillMode, IndexElementSize, PrimitiveType,
    RasterizerState, Rect, SamplerState, SetDataOptions, StencilOperation, SurfaceFormat,
    TextureAddressMode, TextureFilter, Vec4, Viewport,
};
pub use texture::TextureId;

/// Color attachments bindable at once.
pub const MAX_RENDERTARGET_BINDINGS: usize = 4;
/// Color attachments plus the depth-stencil attachment.
pub const MAX_TOTAL_ATTACHMENTS: usize = MAX_RENDERTARGET_BINDINGS + 1;
/// Combined texture/sampler slots.
pub const MAX_TEXTURE_SAMPLERS: usize = 16;
/// Vertex input bindings.
pub const MAX_BOUND_VERTEX_BUFFERS: usize = 16;
