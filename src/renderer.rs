//! The frame/pass orchestrator.
//!
//! [`Renderer`] is the retained-mode driver surface: stateful setters,
//! draw calls, render-target binding and present. Underneath it drives
//! the frame → render-pass → command-buffer state machine, feeds the
//! object caches, and owns the explicit stall fallback used when a
//! buffer write cannot proceed safely.
//!
//! One thread drives a `Renderer`; the only asynchrony is CPU/GPU
//! overlap, gated by the backend's frame fence and present semaphores.

use ash::vk;
use tracing::{debug, error, warn};

use crate::backend::{
    AttachmentClear, DepthStencilDescriptor, FramebufferDescriptor, GpuBackend, GpuImage,
    ImageDescriptor, PipelineDescriptor, RenderPassDescriptor, SamplerDescriptor, SubmitKind,
};
use crate::barrier;
use crate::buffer::{BufferId, BufferRegistry};
use crate::cache::{
    CacheStats, FramebufferKey, ObjectCaches, PipelineKey, RenderPassKey, SamplerKey,
};
use crate::effect::{EffectId, EffectRegistry, ShaderEffect, UniformRegion};
use crate::error::GpuError;
use crate::query::{QueryAllocator, QueryHandle};
use crate::state::{
    sample_count_to_vk, BlendState, ClearOptions, DepthFormat, DepthStencilState, IndexElementSize,
    PrimitiveType, RasterizerState, Rect, SamplerState, SetDataOptions, SurfaceFormat,
    TextureFilter, Vec4, Viewport,
};
use crate::state_hash::{
    blend_state_hash, depth_stencil_state_hash, rasterizer_state_hash, sampler_state_hash,
};
use crate::texture::{TextureId, TextureRegistry};
use crate::{MAX_BOUND_VERTEX_BUFFERS, MAX_RENDERTARGET_BINDINGS, MAX_TEXTURE_SAMPLERS,
    MAX_TOTAL_ATTACHMENTS};

/// Swapchain-independent presentation setup for the logical backbuffer.
#[derive(Debug, Clone, Copy)]
pub struct PresentationParameters {
    pub backbuffer_width: u32,
    pub backbuffer_height: u32,
    pub backbuffer_format: SurfaceFormat,
    pub depth_format: DepthFormat,
    pub multi_sample_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetBinding {
    pub texture: TextureId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: BufferId,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
struct AttachmentRef {
    image: GpuImage,
    format: vk::Format,
}

#[derive(Debug, Clone, Copy, Default)]
struct TextureSlot {
    texture: Option<TextureId>,
    sampler: Option<vk::Sampler>,
}

/// Shadow of the bindings last written into one swapchain image's
/// descriptor set and vertex-input state. Kept per image-in-flight so
/// one frame's in-flight writes are never clobbered by the next.
struct ImageShadow {
    ld_vertex_buffers: [Option<(vk::Buffer, u64)>; MAX_BOUND_VERTEX_BUFFERS],
    ld_vert_uniform: Option<UniformRegion>,
    ld_frag_uniform: Option<UniformRegion>,
    texture_needs_update: [bool; MAX_TEXTURE_SAMPLERS],
    sampler_needs_update: [bool; MAX_TEXTURE_SAMPLERS],
}

impl Default for ImageShadow {
    fn default() -> Self {
        Self {
            ld_vertex_buffers: [None; MAX_BOUND_VERTEX_BUFFERS],
            ld_vert_uniform: None,
            ld_frag_uniform: None,
            texture_needs_update: [false; MAX_TEXTURE_SAMPLERS],
            sampler_needs_update: [false; MAX_TEXTURE_SAMPLERS],
        }
    }
}

pub struct Renderer<B: GpuBackend> {
    backend: B,

    // Render state snapshot.
    blend_state: BlendState,
    depth_stencil_state: DepthStencilState,
    rasterizer_state: RasterizerState,
    primitive_type: PrimitiveType,
    multi_sample_mask: u32,
    viewport: Viewport,
    scissor_rect: Rect,
    stencil_ref: u32,

    caches: ObjectCaches,
    buffers: BufferRegistry,
    textures: TextureRegistry,
    effects: EffectRegistry,
    queries: QueryAllocator,

    // Logical backbuffer (blitted into the swapchain at present).
    backbuffer_color: AttachmentRef,
    backbuffer_depth: Option<GpuImage>,
    backbuffer_width: u32,
    backbuffer_height: u32,
    backbuffer_format: SurfaceFormat,
    backbuffer_depth_format: DepthFormat,
    backbuffer_multi_sample_count: u8,

    // Current attachment set.
    color_attachments: [Option<AttachmentRef>; MAX_RENDERTARGET_BINDINGS],
    color_attachment_count: usize,
    depth_stencil_attachment: Option<GpuImage>,
    depth_stencil_attachment_active: bool,
    current_depth_format: DepthFormat,

    // Objects of the pass currently being recorded.
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,

    // Frame/pass state machine.
    frame_in_progress: bool,
    render_pass_in_progress: bool,
    need_new_render_pass: bool,
    command_buffer_created_this_pass: bool,
    pipeline_bound_this_pass: bool,
    current_swapchain_index: u32,
    command_buffers: Vec<vk::CommandBuffer>,
    command_buffer_count: usize,

    // Deferred clear, replayed when the next pass begins.
    should_clear_color: bool,
    should_clear_depth: bool,
    should_clear_stencil: bool,
    clear_color: Vec4,
    clear_depth_value: f32,
    clear_stencil_value: u32,

    texture_slots: [TextureSlot; MAX_TEXTURE_SAMPLERS],
    per_image: Vec<ImageShadow>,
    pending_vertex_buffers: [Option<VertexBufferBinding>; MAX_BOUND_VERTEX_BUFFERS],

    // Backing stores for caller-supplied draw data.
    user_vertex_buffer: Option<BufferId>,
    user_index_buffer: Option<BufferId>,

    // Effect interop.
    current_effect: Option<EffectId>,
    current_technique: u32,
    current_pass: u32,

    debug_mode: bool,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(mut backend: B, params: PresentationParameters) -> Result<Self, GpuError> {
        let color_format = params.backbuffer_format.to_vk();
        let color = backend.create_image(&ImageDescriptor {
            format: color_format,
            width: params.backbuffer_width,
            height: params.backbuffer_height,
            mip_levels: 1,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        })?;

        let depth = match params.depth_format.to_vk() {
            Some(format) => {
                let aspect = if params.depth_format == DepthFormat::Depth24Stencil8 {
                    vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
                } else {
                    vk::ImageAspectFlags::DEPTH
                };
                Some(backend.create_image(&ImageDescriptor {
                    format,
                    width: params.backbuffer_width,
                    height: params.backbuffer_height,
                    mip_levels: 1,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    aspect,
                })?)
            }
            None => None,
        };

        let image_count = backend.swapchain_info().image_count();
        let backbuffer_color = AttachmentRef {
            image: color,
            format: color_format,
        };

        let mut renderer = Self {
            backend,
            blend_state: BlendState::default(),
            depth_stencil_state: DepthStencilState::default(),
            rasterizer_state: RasterizerState::default(),
            primitive_type: PrimitiveType::TriangleList,
            multi_sample_mask: u32::MAX,
            viewport: Viewport {
                x: 0,
                y: 0,
                w: params.backbuffer_width as i32,
                h: params.backbuffer_height as i32,
                ..Viewport::default()
            },
            scissor_rect: Rect {
                x: 0,
                y: 0,
                w: params.backbuffer_width as i32,
                h: params.backbuffer_height as i32,
            },
            stencil_ref: 0,
            caches: ObjectCaches::default(),
            buffers: BufferRegistry::default(),
            textures: TextureRegistry::default(),
            effects: EffectRegistry::default(),
            queries: QueryAllocator::default(),
            backbuffer_color,
            backbuffer_depth: depth,
            backbuffer_width: params.backbuffer_width,
            backbuffer_height: params.backbuffer_height,
            backbuffer_format: params.backbuffer_format,
            backbuffer_depth_format: params.depth_format,
            backbuffer_multi_sample_count: params.multi_sample_count,
            color_attachments: [None; MAX_RENDERTARGET_BINDINGS],
            color_attachment_count: 0,
            depth_stencil_attachment: None,
            depth_stencil_attachment_active: false,
            current_depth_format: params.depth_format,
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            frame_in_progress: false,
            render_pass_in_progress: false,
            need_new_render_pass: true,
            command_buffer_created_this_pass: false,
            pipeline_bound_this_pass: false,
            current_swapchain_index: 0,
            command_buffers: Vec::new(),
            command_buffer_count: 0,
            should_clear_color: false,
            should_clear_depth: false,
            should_clear_stencil: false,
            clear_color: Vec4::default(),
            clear_depth_value: 0.0,
            clear_stencil_value: 0,
            texture_slots: [TextureSlot::default(); MAX_TEXTURE_SAMPLERS],
            per_image: (0..image_count).map(|_| ImageShadow::default()).collect(),
            pending_vertex_buffers: [None; MAX_BOUND_VERTEX_BUFFERS],
            user_vertex_buffer: None,
            user_index_buffer: None,
            current_effect: None,
            current_technique: 0,
            current_pass: 0,
            debug_mode: cfg!(debug_assertions),
        };
        renderer.bind_backbuffer();
        Ok(renderer)
    }

    /// Drain the queue and release every resource this renderer owns.
    pub fn destroy(mut self) -> Result<(), GpuError> {
        self.backend.queue_wait_idle()?;
        self.buffers.destroy_all(&mut self.backend);
        self.textures.destroy_all(&mut self.backend);
        self.queries.destroy_all(&mut self.backend);
        self.backend.destroy_image(self.backbuffer_color.image);
        if let Some(depth) = self.backbuffer_depth.take() {
            self.backend.destroy_image(depth);
        }
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn set_debug_mode(&mut self, enabled: bool) {
        self.debug_mode = enabled;
    }

    // ------------------------------------------------------------------
    // Frame state machine
    // ------------------------------------------------------------------

    /// Open a frame: wait out the previous one, reclaim its command
    /// buffers and acquire the next swapchain image. Idempotent while a
    /// frame is already in progress.
    pub fn begin_frame(&mut self) -> Result<(), GpuError> {
        if self.frame_in_progress {
            return Ok(());
        }

        if let Err(err) = self.backend.wait_for_frame_fence() {
            error!(%err, "frame fence wait failed");
        }
        if let Err(err) = self.backend.reset_frame_fence() {
            error!(%err, "frame fence reset failed");
        }
        self.backend.reset_command_pool()?;

        match self.backend.acquire_next_image() {
            Ok(index) => self.current_swapchain_index = index,
            Err(err) => {
                // Transient: the caller retries next tick.
                error!(%err, "swapchain image acquisition failed, aborting frame");
                return Err(err);
            }
        }

        // The pool reset reclaimed every command buffer recorded so far,
        // including any opened outside a pass (query resets).
        self.command_buffer_count = 0;
        self.command_buffer_created_this_pass = false;
        self.pipeline_bound_this_pass = false;
        self.frame_in_progress = true;
        Ok(())
    }

    /// Blit the logical backbuffer into the acquired swapchain image,
    /// submit the frame and present it.
    pub fn swap_buffers(
        &mut self,
        source: Option<Rect>,
        destination: Option<Rect>,
    ) -> Result<(), GpuError> {
        self.begin_frame()?;
        self.set_render_targets(None, self.backbuffer_depth_format)?;
        self.end_pass()?;

        let swapchain = self.backend.swapchain_info();
        let src_rect = source.unwrap_or(Rect {
            x: 0,
            y: 0,
            w: self.backbuffer_width as i32,
            h: self.backbuffer_height as i32,
        });
        let dst_rect = destination.unwrap_or(Rect {
            x: 0,
            y: 0,
            w: swapchain.extent.width as i32,
            h: swapchain.extent.height as i32,
        });
        let swap_image = swapchain.images[self.current_swapchain_index as usize];

        let result = self
            .blit_to_swapchain(swap_image, src_rect, dst_rect)
            .and_then(|_| {
                let count = self.command_buffer_count;
                self.backend
                    .submit(&self.command_buffers[..count], SubmitKind::Frame)
            })
            .and_then(|_| self.backend.present(self.current_swapchain_index));

        if let Err(err) = &result {
            error!(%err, "frame submission/present failed");
        }

        // The next frame must be able to proceed regardless of how this
        // one ended.
        self.buffers.reset_all_for_frame();
        self.frame_in_progress = false;
        result
    }

    fn blit_to_swapchain(
        &mut self,
        swap_image: vk::Image,
        src_rect: Rect,
        dst_rect: Rect,
    ) -> Result<(), GpuError> {
        let cb = self.allocate_and_begin_command_buffer()?;
        let backbuffer = self.backbuffer_color.image.image;

        barrier::transition(
            &mut self.backend,
            cb,
            backbuffer,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )?;
        barrier::transition(
            &mut self.backend,
            cb,
            swap_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        self.backend.cmd_blit_image(
            cb,
            backbuffer,
            swap_image,
            src_rect,
            dst_rect,
            vk::Filter::LINEAR,
        );

        barrier::transition(
            &mut self.backend,
            cb,
            swap_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        barrier::transition(
            &mut self.backend,
            cb,
            backbuffer,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;

        self.backend.end_command_buffer(cb)
    }

    /// The full CPU/GPU synchronization fallback: flush everything
    /// recorded so far, wait for the queue to go idle, and start over
    /// with fresh command buffers and rewound dynamic buffers.
    fn stall(&mut self) -> Result<(), GpuError> {
        self.end_pass()?;

        let count = self.command_buffer_count;
        self.backend
            .submit(&self.command_buffers[..count], SubmitKind::Immediate)?;
        self.backend.queue_wait_idle()?;

        self.command_buffer_count = 0;
        self.allocate_and_begin_command_buffer()?;
        self.command_buffer_created_this_pass = true;
        self.need_new_render_pass = true;
        self.buffers.reset_all_for_frame();
        Ok(())
    }

    fn current_command_buffer(&self) -> vk::CommandBuffer {
        debug_assert!(self.command_buffer_count > 0);
        self.command_buffers[self.command_buffer_count - 1]
    }

    fn allocate_and_begin_command_buffer(&mut self) -> Result<vk::CommandBuffer, GpuError> {
        self.command_buffer_count += 1;
        if self.command_buffer_count > self.command_buffers.len() {
            let cb = self.backend.allocate_command_buffer()?;
            self.command_buffers.push(cb);
        }
        let cb = self.command_buffers[self.command_buffer_count - 1];
        self.backend.begin_command_buffer(cb)?;
        Ok(cb)
    }

    fn ensure_command_buffer(&mut self) -> Result<(), GpuError> {
        if !self.command_buffer_created_this_pass {
            self.allocate_and_begin_command_buffer()?;
            self.command_buffer_created_this_pass = true;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Render passes
    // ------------------------------------------------------------------

    fn begin_render_pass(&mut self) -> Result<(), GpuError> {
        self.ensure_command_buffer()?;

        self.render_pass_in_progress = true;
        self.pipeline_bound_this_pass = false;

        let render_pass = self.fetch_render_pass()?;
        let framebuffer = self.fetch_framebuffer(render_pass)?;
        self.render_pass = render_pass;
        self.framebuffer = framebuffer;

        let cb = self.current_command_buffer();
        self.backend.cmd_set_viewport(cb, self.viewport.to_vk());
        self.set_scissor_rect_command();
        self.set_stencil_reference_command();
        self.backend
            .cmd_set_blend_constants(cb, self.blend_state.blend_factor.to_float4());
        self.backend.cmd_set_depth_bias(
            cb,
            self.rasterizer_state.depth_bias,
            self.rasterizer_state.slope_scale_depth_bias,
        );

        // A new pass may pair with a different pipeline, so every live
        // binding of this swapchain image has to be re-established.
        let shadow = &mut self.per_image[self.current_swapchain_index as usize];
        for slot in 0..MAX_TEXTURE_SAMPLERS {
            if self.texture_slots[slot].texture.is_some() {
                shadow.texture_needs_update[slot] = true;
            }
            if self.texture_slots[slot].sampler.is_some() {
                shadow.sampler_needs_update[slot] = true;
            }
        }
        shadow.ld_vertex_buffers = [None; MAX_BOUND_VERTEX_BUFFERS];

        let extent = self.attachment_extent();
        self.backend.cmd_begin_render_pass(
            cb,
            self.render_pass,
            self.framebuffer,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );

        self.need_new_render_pass = false;
        Ok(())
    }

    fn update_render_pass(&mut self) -> Result<(), GpuError> {
        if !self.need_new_render_pass {
            return Ok(());
        }
        self.begin_frame()?;
        if self.render_pass_in_progress {
            self.end_pass()?;
        }
        self.begin_render_pass()?;

        if self.should_clear_color || self.should_clear_depth || self.should_clear_stencil {
            self.record_clear(
                self.clear_color,
                self.clear_depth_value,
                self.clear_stencil_value,
                self.should_clear_color,
                self.should_clear_depth,
                self.should_clear_stencil,
            );
            self.should_clear_color = false;
            self.should_clear_depth = false;
            self.should_clear_stencil = false;
        }
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), GpuError> {
        if self.render_pass_in_progress && self.command_buffer_count > 0 {
            let cb = self.current_command_buffer();
            self.backend.cmd_end_render_pass(cb);
            if let Err(err) = self.backend.end_command_buffer(cb) {
                error!(%err, "ending command buffer failed");
            }
            self.render_pass_in_progress = false;
            self.command_buffer_created_this_pass = false;
        }
        Ok(())
    }

    fn attachment_extent(&self) -> vk::Extent2D {
        self.color_attachments
            .iter()
            .flatten()
            .map(|a| a.image.extent)
            .next()
            .unwrap_or(vk::Extent2D {
                width: self.backbuffer_width,
                height: self.backbuffer_height,
            })
    }

    // ------------------------------------------------------------------
    // Object cache fetches
    // ------------------------------------------------------------------

    fn fetch_render_pass(&mut self) -> Result<vk::RenderPass, GpuError> {
        self.depth_stencil_attachment_active = self.depth_stencil_attachment.is_some()
            && self.current_depth_format != DepthFormat::None;

        let mut color_formats = [None; MAX_RENDERTARGET_BINDINGS];
        for (dst, attachment) in color_formats.iter_mut().zip(self.color_attachments.iter()) {
            *dst = attachment.map(|a| a.format);
        }
        let depth_format = if self.depth_stencil_attachment_active {
            self.current_depth_format.to_vk()
        } else {
            None
        };
        let key = RenderPassKey {
            color_formats,
            depth_format,
            sample_count: self.rasterizer_state.multi_sample_anti_alias.max(1),
        };

        let desc = RenderPassDescriptor {
            color_formats: color_formats.iter().flatten().copied().collect(),
            depth_format,
            sample_count: sample_count_to_vk(key.sample_count),
        };
        let backend = &mut self.backend;
        self.caches.render_passes.get_or_create_with(key, || {
            debug!(?key, "render pass cache miss");
            backend.create_render_pass(&desc)
        })
    }

    fn fetch_framebuffer(&mut self, render_pass: vk::RenderPass) -> Result<vk::Framebuffer, GpuError> {
        let mut attachments = [None; MAX_TOTAL_ATTACHMENTS];
        let mut count = 0;
        for attachment in self.color_attachments.iter().flatten() {
            attachments[count] = Some(attachment.image.view);
            count += 1;
        }
        if self.depth_stencil_attachment_active {
            if let Some(depth) = &self.depth_stencil_attachment {
                attachments[count] = Some(depth.view);
                count += 1;
            }
        }

        let extent = self.attachment_extent();
        let key = FramebufferKey {
            render_pass,
            attachments,
            width: extent.width,
            height: extent.height,
        };
        let desc = FramebufferDescriptor {
            render_pass,
            attachments: attachments.iter().flatten().copied().collect(),
            width: extent.width,
            height: extent.height,
        };
        let backend = &mut self.backend;
        self.caches.framebuffers.get_or_create_with(key, || {
            debug!("framebuffer cache miss");
            backend.create_framebuffer(&desc)
        })
    }

    fn fetch_pipeline(&mut self) -> Result<vk::Pipeline, GpuError> {
        let key = PipelineKey {
            blend: blend_state_hash(&self.blend_state),
            rasterizer: rasterizer_state_hash(&self.rasterizer_state),
            depth_stencil: depth_stencil_state_hash(&self.depth_stencil_state),
            primitive_type: self.primitive_type,
            sample_mask: self.multi_sample_mask,
            render_pass: self.render_pass,
        };

        let blend = &self.blend_state;
        let blend_attachments = (0..self.color_attachment_count.max(1))
            .map(|i| vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::TRUE,
                src_color_blend_factor: blend.color_source_blend.to_vk(),
                dst_color_blend_factor: blend.color_destination_blend.to_vk(),
                color_blend_op: blend.color_blend_function.to_vk(),
                src_alpha_blend_factor: blend.alpha_source_blend.to_vk(),
                dst_alpha_blend_factor: blend.alpha_destination_blend.to_vk(),
                alpha_blend_op: blend.alpha_blend_function.to_vk(),
                color_write_mask: blend.write_mask(i).to_vk(),
            })
            .collect();

        let depth_stencil = if self.depth_stencil_attachment_active {
            let ds = &self.depth_stencil_state;
            let front = vk::StencilOpState {
                fail_op: ds.stencil_fail.to_vk(),
                pass_op: ds.stencil_pass.to_vk(),
                depth_fail_op: ds.stencil_depth_buffer_fail.to_vk(),
                compare_op: ds.stencil_function.to_vk(),
                compare_mask: ds.stencil_mask,
                write_mask: ds.stencil_write_mask,
                reference: 0,
            };
            let back = if ds.two_sided_stencil_mode {
                vk::StencilOpState {
                    fail_op: ds.ccw_stencil_fail.to_vk(),
                    pass_op: ds.ccw_stencil_pass.to_vk(),
                    depth_fail_op: ds.ccw_stencil_depth_buffer_fail.to_vk(),
                    compare_op: ds.ccw_stencil_function.to_vk(),
                    compare_mask: ds.stencil_mask,
                    write_mask: ds.stencil_write_mask,
                    reference: 0,
                }
            } else {
                front
            };
            Some(DepthStencilDescriptor {
                depth_test_enable: ds.depth_buffer_enable,
                depth_write_enable: ds.depth_buffer_write_enable,
                depth_compare_op: ds.depth_buffer_function.to_vk(),
                stencil_test_enable: ds.stencil_enable,
                front,
                back,
            })
        } else {
            None
        };

        let desc = PipelineDescriptor {
            topology: self.primitive_type.to_vk(),
            polygon_mode: self.rasterizer_state.fill_mode.to_vk(),
            cull_mode: self.rasterizer_state.cull_mode.to_vk(),
            front_face: vk::FrontFace::CLOCKWISE,
            sample_count: sample_count_to_vk(self.rasterizer_state.multi_sample_anti_alias),
            sample_mask: self.multi_sample_mask,
            blend_attachments,
            depth_stencil,
            render_pass: self.render_pass,
        };

        let backend = &mut self.backend;
        self.caches.pipelines.get_or_create_with(key, || {
            debug!("pipeline cache miss");
            backend.create_pipeline(&desc)
        })
    }

    fn fetch_sampler(&mut self, state: &SamplerState) -> Result<vk::Sampler, GpuError> {
        let key = SamplerKey(sampler_state_hash(state));
        let (mag, min, mipmap) = state.filter.to_vk();
        let desc = SamplerDescriptor {
            mag_filter: mag,
            min_filter: min,
            mipmap_mode: mipmap,
            address_u: state.address_u.to_vk(),
            address_v: state.address_v.to_vk(),
            address_w: state.address_w.to_vk(),
            mip_lod_bias: state.mip_map_level_of_detail_bias,
            max_anisotropy: if state.filter == TextureFilter::Anisotropic {
                f32::from(state.max_anisotropy)
            } else {
                0.0
            },
            max_lod: if state.max_mip_level == 0 {
                vk::LOD_CLAMP_NONE
            } else {
                state.max_mip_level as f32
            },
        };
        let backend = &mut self.backend;
        self.caches.samplers.get_or_create_with(key, || {
            debug!("sampler cache miss");
            backend.create_sampler(&desc)
        })
    }

    // ------------------------------------------------------------------
    // Draws
    // ------------------------------------------------------------------

    fn bind_pipeline(&mut self) -> Result<(), GpuError> {
        let pipeline = self.fetch_pipeline()?;
        let cb = self.current_command_buffer();
        self.backend.cmd_bind_pipeline(cb, pipeline);
        self.pipeline_bound_this_pass = true;
        Ok(())
    }

    /// Topology is baked into the pipeline, so a primitive-type change
    /// means fetching (or rebuilding) the pipeline.
    fn check_primitive_type_and_bind_pipeline(
        &mut self,
        primitive_type: PrimitiveType,
    ) -> Result<bool, GpuError> {
        if !self.pipeline_bound_this_pass || primitive_type != self.primitive_type {
            self.primitive_type = primitive_type;
            self.bind_pipeline()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn flush_vertex_bindings(&mut self) -> Result<(), GpuError> {
        let cb = self.current_command_buffer();
        let image = self.current_swapchain_index as usize;
        for slot in 0..MAX_BOUND_VERTEX_BUFFERS {
            let Some(binding) = self.pending_vertex_buffers[slot] else {
                continue;
            };
            let buffer = self.buffers.get_mut(binding.buffer)?;
            buffer.bound_this_frame = true;
            let handle = buffer.handle;
            let offset = binding.offset + buffer.internal_offset;

            let shadow = &mut self.per_image[image].ld_vertex_buffers[slot];
            if *shadow != Some((handle, offset)) {
                self.backend
                    .cmd_bind_vertex_buffer(cb, slot as u32, handle, offset);
                *shadow = Some((handle, offset));
            }
        }
        Ok(())
    }

    /// Resolve every dirty texture/sampler/uniform slot of the current
    /// swapchain image into one batched descriptor update.
    fn flush_descriptor_updates(&mut self) -> Result<bool, GpuError> {
        let image = self.current_swapchain_index as usize;
        let mut writes = Vec::new();

        {
            let shadow = &mut self.per_image[image];
            for slot in 0..MAX_TEXTURE_SAMPLERS {
                if !shadow.texture_needs_update[slot] && !shadow.sampler_needs_update[slot] {
                    continue;
                }
                if let TextureSlot {
                    texture: Some(texture),
                    sampler: Some(sampler),
                } = self.texture_slots[slot]
                {
                    let view = self.textures.get(texture)?.image.view;
                    writes.push(crate::backend::DescriptorWrite::TextureSampler {
                        slot: slot as u32,
                        view,
                        sampler,
                    });
                }
                shadow.texture_needs_update[slot] = false;
                shadow.sampler_needs_update[slot] = false;
            }
        }

        if let Some(effect_id) = self.current_effect {
            let binding = self.effects.get_mut(effect_id)?.uniform_buffers();
            let shadow = &mut self.per_image[image];
            if shadow.ld_vert_uniform != binding.vertex {
                if let Some(region) = binding.vertex {
                    writes.push(crate::backend::DescriptorWrite::VertexUniform {
                        buffer: region.buffer,
                        offset: region.offset,
                        range: region.range,
                    });
                }
                shadow.ld_vert_uniform = binding.vertex;
            }
            if shadow.ld_frag_uniform != binding.fragment {
                if let Some(region) = binding.fragment {
                    writes.push(crate::backend::DescriptorWrite::FragmentUniform {
                        buffer: region.buffer,
                        offset: region.offset,
                        range: region.range,
                    });
                }
                shadow.ld_frag_uniform = binding.fragment;
            }
        }

        if writes.is_empty() {
            return Ok(false);
        }
        self.backend.update_descriptors(image as u32, &writes);
        Ok(true)
    }

    fn prepare_draw(&mut self, primitive_type: PrimitiveType) -> Result<(), GpuError> {
        self.begin_frame()?;
        self.update_render_pass()?;
        if !self.render_pass_in_progress {
            self.begin_render_pass()?;
        }

        self.flush_vertex_bindings()?;
        let descriptors_written = self.flush_descriptor_updates()?;
        let pipeline_rebound = self.check_primitive_type_and_bind_pipeline(primitive_type)?;

        if descriptors_written || pipeline_rebound {
            let cb = self.current_command_buffer();
            self.backend
                .cmd_bind_descriptor_sets(cb, self.current_swapchain_index);
        }
        Ok(())
    }

    pub fn draw_primitives(
        &mut self,
        primitive_type: PrimitiveType,
        vertex_start: u32,
        primitive_count: u32,
    ) -> Result<(), GpuError> {
        self.prepare_draw(primitive_type)?;
        let cb = self.current_command_buffer();
        self.backend.cmd_draw(
            cb,
            primitive_type.vertex_count(primitive_count),
            1,
            vertex_start,
            0,
        );
        Ok(())
    }

    pub fn draw_indexed_primitives(
        &mut self,
        primitive_type: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
        indices: BufferId,
        index_element_size: IndexElementSize,
    ) -> Result<(), GpuError> {
        self.draw_instanced_primitives(
            primitive_type,
            base_vertex,
            start_index,
            primitive_count,
            1,
            indices,
            index_element_size,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_instanced_primitives(
        &mut self,
        primitive_type: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
        instance_count: u32,
        indices: BufferId,
        index_element_size: IndexElementSize,
    ) -> Result<(), GpuError> {
        self.prepare_draw(primitive_type)?;

        let buffer = self.buffers.get_mut(indices)?;
        buffer.bound_this_frame = true;
        let handle = buffer.handle;
        let offset = buffer.internal_offset;

        let cb = self.current_command_buffer();
        self.backend
            .cmd_bind_index_buffer(cb, handle, offset, index_element_size.to_vk());
        self.backend.cmd_draw_indexed(
            cb,
            primitive_type.vertex_count(primitive_count),
            instance_count,
            start_index,
            base_vertex,
            0,
        );
        Ok(())
    }

    pub fn draw_user_primitives(
        &mut self,
        primitive_type: PrimitiveType,
        vertex_data: &[u8],
        vertex_offset: u32,
        primitive_count: u32,
        vertex_stride: u32,
    ) -> Result<(), GpuError> {
        self.prepare_draw(primitive_type)?;
        let vertex_count = primitive_type.vertex_count(primitive_count);
        self.bind_user_vertex_buffer(vertex_data, vertex_count, vertex_offset, vertex_stride)?;

        // The upload already skipped `vertex_offset` vertices of the
        // source data, so the draw starts at the region base.
        let cb = self.current_command_buffer();
        self.backend.cmd_draw(cb, vertex_count, 1, 0, 0);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_user_indexed_primitives(
        &mut self,
        primitive_type: PrimitiveType,
        vertex_data: &[u8],
        vertex_offset: u32,
        num_vertices: u32,
        index_data: &[u8],
        index_offset: u32,
        index_element_size: IndexElementSize,
        primitive_count: u32,
        vertex_stride: u32,
    ) -> Result<(), GpuError> {
        self.prepare_draw(primitive_type)?;
        self.bind_user_vertex_buffer(vertex_data, num_vertices, vertex_offset, vertex_stride)?;

        let index_count = primitive_type.vertex_count(primitive_count);
        let index_size = index_element_size.byte_size();
        let len = u64::from(index_count) * u64::from(index_size);

        let id = match self.user_index_buffer {
            Some(id) => id,
            None => {
                let id = self.buffers.create(
                    &mut self.backend,
                    len,
                    vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                )?;
                self.user_index_buffer = Some(id);
                id
            }
        };
        self.buffers.write_user(
            &mut self.backend,
            id,
            index_data,
            (index_offset * index_size) as usize,
            len,
        )?;

        let buffer = self.buffers.get_mut(id)?;
        buffer.bound_this_frame = true;
        let handle = buffer.handle;
        let offset = buffer.internal_offset;

        let cb = self.current_command_buffer();
        self.backend
            .cmd_bind_index_buffer(cb, handle, offset, index_element_size.to_vk());
        self.backend.cmd_draw_indexed(cb, index_count, 1, 0, 0, 0);
        Ok(())
    }

    fn bind_user_vertex_buffer(
        &mut self,
        vertex_data: &[u8],
        vertex_count: u32,
        vertex_offset: u32,
        vertex_stride: u32,
    ) -> Result<(), GpuError> {
        let len = u64::from(vertex_count) * u64::from(vertex_stride);
        let id = match self.user_vertex_buffer {
            Some(id) => id,
            None => {
                let id = self.buffers.create(
                    &mut self.backend,
                    len,
                    vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                )?;
                self.user_vertex_buffer = Some(id);
                id
            }
        };

        self.buffers.write_user(
            &mut self.backend,
            id,
            vertex_data,
            (vertex_offset * vertex_stride) as usize,
            len,
        )?;

        let buffer = self.buffers.get_mut(id)?;
        buffer.bound_this_frame = true;
        let handle = buffer.handle;
        let offset = buffer.internal_offset;

        let cb = self.current_command_buffer();
        let shadow = &mut self.per_image[self.current_swapchain_index as usize].ld_vertex_buffers[0];
        if *shadow != Some((handle, offset)) {
            self.backend.cmd_bind_vertex_buffer(cb, 0, handle, offset);
            *shadow = Some((handle, offset));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clears
    // ------------------------------------------------------------------

    pub fn clear(
        &mut self,
        options: ClearOptions,
        color: Vec4,
        depth: f32,
        stencil: u32,
    ) -> Result<(), GpuError> {
        let clear_color = options.contains(ClearOptions::TARGET);
        let clear_depth = options.contains(ClearOptions::DEPTH_BUFFER);
        let clear_stencil = options.contains(ClearOptions::STENCIL);

        if self.render_pass_in_progress {
            self.record_clear(color, depth, stencil, clear_color, clear_depth, clear_stencil);
        } else {
            // Deferred: replayed right after the next pass begins, which
            // is the cheapest point to clear at.
            self.need_new_render_pass = true;
            self.should_clear_color = clear_color;
            self.clear_color = color;
            self.should_clear_depth = clear_depth;
            self.clear_depth_value = depth;
            self.should_clear_stencil = clear_stencil;
            self.clear_stencil_value = stencil;
        }
        Ok(())
    }

    fn record_clear(
        &mut self,
        color: Vec4,
        depth: f32,
        stencil: u32,
        clear_color: bool,
        clear_depth: bool,
        clear_stencil: bool,
    ) {
        let mut clears = Vec::new();
        let mut extent = vk::Extent2D::default();

        if clear_color {
            self.clear_color = color;
            for (i, attachment) in self
                .color_attachments
                .iter()
                .flatten()
                .enumerate()
                .take(self.color_attachment_count)
            {
                extent.width = extent.width.max(attachment.image.extent.width);
                extent.height = extent.height.max(attachment.image.extent.height);
                clears.push(AttachmentClear::Color {
                    attachment: i as u32,
                    value: [color.x, color.y, color.z, color.w],
                });
            }
        }

        if (clear_depth || clear_stencil) && self.depth_stencil_attachment_active {
            if let Some(ds) = &self.depth_stencil_attachment {
                extent.width = extent.width.max(ds.extent.width);
                extent.height = extent.height.max(ds.extent.height);
            }
            if clear_depth {
                self.clear_depth_value = depth;
            }
            if clear_stencil {
                self.clear_stencil_value = stencil;
            }
            clears.push(AttachmentClear::DepthStencil {
                depth: clear_depth.then_some(depth),
                stencil: clear_stencil.then_some(stencil),
            });
        }

        if clears.is_empty() {
            return;
        }
        if extent.width == 0 || extent.height == 0 {
            extent = self.attachment_extent();
        }
        let cb = self.current_command_buffer();
        self.backend.cmd_clear_attachments(
            cb,
            &clears,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );
    }

    // ------------------------------------------------------------------
    // Render targets
    // ------------------------------------------------------------------

    fn bind_backbuffer(&mut self) {
        self.color_attachments = [None; MAX_RENDERTARGET_BINDINGS];
        self.color_attachments[0] = Some(self.backbuffer_color);
        self.color_attachment_count = 1;
        self.depth_stencil_attachment = self.backbuffer_depth;
        self.depth_stencil_attachment_active =
            self.backbuffer_depth.is_some() && self.backbuffer_depth_format != DepthFormat::None;
        self.current_depth_format = self.backbuffer_depth_format;
    }

    /// Rebind the attachment set. `None` selects the logical backbuffer
    /// and its depth buffer.
    pub fn set_render_targets(
        &mut self,
        render_targets: Option<&[RenderTargetBinding]>,
        depth_format: DepthFormat,
    ) -> Result<(), GpuError> {
        // Pending clears target the attachments they were requested
        // against; perform them before switching away.
        if self.should_clear_color || self.should_clear_depth || self.should_clear_stencil {
            self.update_render_pass()?;
        }

        self.need_new_render_pass = true;
        self.color_attachments = [None; MAX_RENDERTARGET_BINDINGS];
        self.color_attachment_count = 0;
        self.depth_stencil_attachment = None;
        self.depth_stencil_attachment_active = false;

        match render_targets {
            None => self.bind_backbuffer(),
            Some(targets) => {
                for (slot, target) in targets.iter().take(MAX_RENDERTARGET_BINDINGS).enumerate() {
                    let texture = self.textures.get(target.texture)?;
                    if !texture.is_render_target {
                        warn!(slot, "binding a texture created without render-target usage");
                    }
                    self.color_attachments[slot] = Some(AttachmentRef {
                        image: texture.image,
                        format: texture.format.to_vk(),
                    });
                }
                self.color_attachment_count = targets.len().min(MAX_RENDERTARGET_BINDINGS);
                // Offscreen depth-stencil attachments come from
                // renderbuffers, which are out of scope; record the
                // requested format for pipeline compatibility only.
                self.current_depth_format = depth_format;
            }
        }
        Ok(())
    }

    pub fn backbuffer_size(&self) -> (u32, u32) {
        (self.backbuffer_width, self.backbuffer_height)
    }

    pub fn backbuffer_surface_format(&self) -> SurfaceFormat {
        self.backbuffer_format
    }

    pub fn backbuffer_depth_format(&self) -> DepthFormat {
        self.backbuffer_depth_format
    }

    pub fn backbuffer_multi_sample_count(&self) -> u8 {
        self.backbuffer_multi_sample_count
    }

    // ------------------------------------------------------------------
    // Mutable render state (dynamic pipeline state)
    // ------------------------------------------------------------------

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport == self.viewport {
            return;
        }
        self.viewport = viewport;
        if self.render_pass_in_progress {
            let cb = self.current_command_buffer();
            self.backend.cmd_set_viewport(cb, viewport.to_vk());
        }
    }

    pub fn set_scissor_rect(&mut self, scissor: Rect) {
        if scissor == self.scissor_rect {
            return;
        }
        self.scissor_rect = scissor;
        self.set_scissor_rect_command();
    }

    fn set_scissor_rect_command(&mut self) {
        if !self.render_pass_in_progress {
            return;
        }
        let rect = if self.rasterizer_state.scissor_test_enable {
            vk::Rect2D {
                offset: vk::Offset2D {
                    x: self.scissor_rect.x,
                    y: self.scissor_rect.y,
                },
                extent: vk::Extent2D {
                    width: self.scissor_rect.w.max(0) as u32,
                    height: self.scissor_rect.h.max(0) as u32,
                },
            }
        } else {
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.attachment_extent(),
            }
        };
        let cb = self.current_command_buffer();
        self.backend.cmd_set_scissor(cb, rect);
    }

    pub fn blend_factor(&self) -> crate::state::Color {
        self.blend_state.blend_factor
    }

    pub fn set_blend_factor(&mut self, factor: crate::state::Color) {
        if factor == self.blend_state.blend_factor {
            return;
        }
        self.blend_state.blend_factor = factor;
        if self.render_pass_in_progress {
            let cb = self.current_command_buffer();
            self.backend.cmd_set_blend_constants(cb, factor.to_float4());
        }
    }

    pub fn multi_sample_mask(&self) -> u32 {
        self.multi_sample_mask
    }

    pub fn set_multi_sample_mask(&mut self, mask: u32) -> Result<(), GpuError> {
        if mask == self.multi_sample_mask {
            return Ok(());
        }
        if self.debug_mode && self.render_pass_in_progress {
            warn!("binding new pipeline to change multisample mask mid-pass; this may degrade performance");
        }
        self.multi_sample_mask = mask;
        if self.render_pass_in_progress {
            self.bind_pipeline()?;
        } else {
            self.pipeline_bound_this_pass = false;
        }
        Ok(())
    }

    pub fn reference_stencil(&self) -> u32 {
        self.stencil_ref
    }

    pub fn set_reference_stencil(&mut self, reference: u32) {
        if reference == self.stencil_ref {
            return;
        }
        self.stencil_ref = reference;
        self.set_stencil_reference_command();
    }

    fn set_stencil_reference_command(&mut self) {
        if self.render_pass_in_progress {
            let cb = self.current_command_buffer();
            self.backend.cmd_set_stencil_reference(cb, self.stencil_ref);
        }
    }

    fn set_depth_bias_command(&mut self) {
        if self.render_pass_in_progress {
            let cb = self.current_command_buffer();
            self.backend.cmd_set_depth_bias(
                cb,
                self.rasterizer_state.depth_bias,
                self.rasterizer_state.slope_scale_depth_bias,
            );
        }
    }

    // ------------------------------------------------------------------
    // Immutable render state (static pipeline state)
    // ------------------------------------------------------------------

    pub fn set_blend_state(&mut self, state: &BlendState) {
        let factor_changed = state.blend_factor != self.blend_state.blend_factor;
        let static_changed = blend_state_hash(state) != blend_state_hash(&self.blend_state);
        self.blend_state = *state;
        if factor_changed && self.render_pass_in_progress {
            let cb = self.current_command_buffer();
            self.backend
                .cmd_set_blend_constants(cb, state.blend_factor.to_float4());
        }
        if static_changed {
            self.pipeline_bound_this_pass = false;
        }
    }

    pub fn set_depth_stencil_state(&mut self, state: &DepthStencilState) {
        let reference_changed = state.reference_stencil != self.stencil_ref;
        let static_changed =
            depth_stencil_state_hash(state) != depth_stencil_state_hash(&self.depth_stencil_state);
        self.depth_stencil_state = *state;
        if reference_changed {
            self.stencil_ref = state.reference_stencil;
            self.set_stencil_reference_command();
        }
        if static_changed {
            self.pipeline_bound_this_pass = false;
        }
    }

    pub fn apply_rasterizer_state(&mut self, state: &RasterizerState) -> Result<(), GpuError> {
        if state.scissor_test_enable != self.rasterizer_state.scissor_test_enable {
            self.rasterizer_state.scissor_test_enable = state.scissor_test_enable;
            self.set_scissor_rect_command();
        }

        let real_depth_bias = state.depth_bias * self.current_depth_format.bias_scale();
        if real_depth_bias != self.rasterizer_state.depth_bias
            || state.slope_scale_depth_bias != self.rasterizer_state.slope_scale_depth_bias
        {
            self.rasterizer_state.depth_bias = real_depth_bias;
            self.rasterizer_state.slope_scale_depth_bias = state.slope_scale_depth_bias;
            self.set_depth_bias_command();
        }

        if state.cull_mode != self.rasterizer_state.cull_mode
            || state.fill_mode != self.rasterizer_state.fill_mode
            || state.multi_sample_anti_alias != self.rasterizer_state.multi_sample_anti_alias
        {
            if self.debug_mode && self.render_pass_in_progress {
                if state.cull_mode != self.rasterizer_state.cull_mode {
                    warn!("binding new pipeline to change cull mode mid-pass; this may degrade performance");
                }
                if state.fill_mode != self.rasterizer_state.fill_mode {
                    warn!("binding new pipeline to change fill mode mid-pass; this may degrade performance");
                }
                if state.multi_sample_anti_alias
                    != self.rasterizer_state.multi_sample_anti_alias
                {
                    warn!("binding new pipeline to change multisample count mid-pass; this may degrade performance");
                }
            }
            self.rasterizer_state.cull_mode = state.cull_mode;
            self.rasterizer_state.fill_mode = state.fill_mode;
            self.rasterizer_state.multi_sample_anti_alias = state.multi_sample_anti_alias;

            if self.render_pass_in_progress {
                self.bind_pipeline()?;
            } else {
                self.pipeline_bound_this_pass = false;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Samplers / textures
    // ------------------------------------------------------------------

    /// Reconcile one texture slot with the incoming texture + sampler
    /// state, marking the slot for a descriptor rebind when anything
    /// sampler-affecting changed.
    pub fn verify_sampler(
        &mut self,
        index: usize,
        texture: Option<TextureId>,
        sampler: &SamplerState,
    ) -> Result<(), GpuError> {
        let image = self.current_swapchain_index as usize;
        let Some(texture_id) = texture else {
            if self.texture_slots[index].texture.is_some() {
                self.texture_slots[index] = TextureSlot::default();
                self.per_image[image].texture_needs_update[index] = true;
            }
            return Ok(());
        };

        let slot_changed = self.texture_slots[index].texture != Some(texture_id);
        let sampler_changed = self
            .textures
            .get_mut(texture_id)?
            .absorb_sampler_state(sampler);

        if slot_changed || sampler_changed || self.texture_slots[index].sampler.is_none() {
            let vk_sampler = self.fetch_sampler(sampler)?;
            self.texture_slots[index] = TextureSlot {
                texture: Some(texture_id),
                sampler: Some(vk_sampler),
            };
            let shadow = &mut self.per_image[image];
            shadow.texture_needs_update[index] = true;
            shadow.sampler_needs_update[index] = true;
        }
        Ok(())
    }

    pub fn create_texture_2d(
        &mut self,
        format: SurfaceFormat,
        width: u32,
        height: u32,
        level_count: u32,
        is_render_target: bool,
    ) -> Result<TextureId, GpuError> {
        self.textures.create_2d(
            &mut self.backend,
            format,
            width,
            height,
            level_count,
            is_render_target,
        )
    }

    pub fn texture_size(&self, id: TextureId) -> Result<(u32, u32), GpuError> {
        let texture = self.textures.get(id)?;
        Ok((texture.width, texture.height))
    }

    pub fn texture_level_count(&self, id: TextureId) -> Result<u32, GpuError> {
        Ok(self.textures.get(id)?.level_count)
    }

    pub fn dispose_texture(&mut self, id: TextureId) -> Result<(), GpuError> {
        let image = self.current_swapchain_index as usize;
        for (slot, entry) in self.texture_slots.iter_mut().enumerate() {
            if entry.texture == Some(id) {
                *entry = TextureSlot::default();
                self.per_image[image].texture_needs_update[slot] = true;
            }
        }
        self.textures.dispose(&mut self.backend, id)
    }

    // ------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------

    pub fn create_vertex_buffer(&mut self, size: u64) -> Result<BufferId, GpuError> {
        self.buffers.create(
            &mut self.backend,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )
    }

    pub fn create_index_buffer(&mut self, size: u64) -> Result<BufferId, GpuError> {
        self.buffers.create(
            &mut self.backend,
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )
    }

    pub fn dispose_buffer(&mut self, id: BufferId) -> Result<(), GpuError> {
        for binding in self.pending_vertex_buffers.iter_mut() {
            if binding.map(|b| b.buffer) == Some(id) {
                *binding = None;
            }
        }
        self.buffers.dispose(&mut self.backend, id)
    }

    /// Write into a dynamic buffer under the given policy. A policy-None
    /// write against a buffer the GPU already consumed this frame takes
    /// the stall path first.
    pub fn set_buffer_data(
        &mut self,
        id: BufferId,
        offset_in_bytes: u64,
        data: &[u8],
        options: SetDataOptions,
    ) -> Result<(), GpuError> {
        let must_stall =
            options == SetDataOptions::None && self.buffers.get(id)?.bound_this_frame;
        if must_stall {
            if self.debug_mode {
                warn!(
                    "pipeline stall triggered by writing an already-bound buffer with \
                     SetDataOptions::None; this degrades throughput to CPU/GPU lockstep"
                );
            }
            self.stall()?;
        }

        self.buffers
            .write_retained(&mut self.backend, id, offset_in_bytes, data, options)?;

        if must_stall {
            self.buffers.get_mut(id)?.bound_this_frame = true;
        }
        Ok(())
    }

    pub fn apply_vertex_buffer_bindings(
        &mut self,
        bindings: &[VertexBufferBinding],
    ) -> Result<(), GpuError> {
        for slot in 0..MAX_BOUND_VERTEX_BUFFERS {
            self.pending_vertex_buffers[slot] = bindings.get(slot).copied();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    pub fn create_effect(&mut self, effect: Box<dyn ShaderEffect>) -> EffectId {
        self.effects.register(effect)
    }

    pub fn dispose_effect(&mut self, id: EffectId) -> Result<(), GpuError> {
        if self.current_effect == Some(id) {
            let effect = self.effects.get_mut(id)?;
            effect.end_pass();
            effect.end();
            self.current_effect = None;
        }
        self.effects.remove(id).map(drop)
    }

    /// Apply an effect pass, driving the external shader-reflection
    /// component's begin/commit/end protocol.
    pub fn apply_effect(&mut self, id: EffectId, pass: u32) -> Result<(), GpuError> {
        self.begin_frame()?;

        if self.current_effect == Some(id) {
            let effect = self.effects.get_mut(id)?;
            let technique = effect.technique();
            if technique == self.current_technique && pass == self.current_pass {
                effect.commit_changes();
                return Ok(());
            }
            effect.end_pass();
            effect.begin_pass(pass);
            self.current_technique = technique;
            self.current_pass = pass;
            return Ok(());
        }

        if let Some(previous) = self.current_effect {
            if let Ok(effect) = self.effects.get_mut(previous) {
                effect.end_pass();
                effect.end();
            }
        }

        let effect = self.effects.get_mut(id)?;
        effect.begin();
        effect.begin_pass(pass);
        let technique = effect.technique();
        self.current_effect = Some(id);
        self.current_technique = technique;
        self.current_pass = pass;
        Ok(())
    }

    pub fn begin_pass_restore(&mut self, id: EffectId) -> Result<(), GpuError> {
        self.begin_frame()?;
        let effect = self.effects.get_mut(id)?;
        effect.begin();
        effect.begin_pass(0);
        Ok(())
    }

    pub fn end_pass_restore(&mut self, id: EffectId) -> Result<(), GpuError> {
        let effect = self.effects.get_mut(id)?;
        effect.end_pass();
        effect.end();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn create_query(&mut self) -> Result<QueryHandle, GpuError> {
        self.ensure_command_buffer()?;
        let cb = self.current_command_buffer();
        self.queries.acquire(&mut self.backend, cb)
    }

    pub fn dispose_query(&mut self, handle: QueryHandle) -> Result<(), GpuError> {
        // Query slot resets must happen between passes.
        self.end_pass()?;
        self.ensure_command_buffer()?;
        let cb = self.current_command_buffer();
        let pool = self.queries.resolve(handle)?.handle;
        self.backend.cmd_reset_query_pool(cb, pool, handle.index, 1);
        self.queries.release(handle)
    }

    pub fn query_begin(&mut self, handle: QueryHandle) -> Result<(), GpuError> {
        self.end_pass()?;
        self.ensure_command_buffer()?;
        let cb = self.current_command_buffer();
        let pool = self.queries.resolve(handle)?.handle;
        self.backend.cmd_begin_query(cb, pool, handle.index);
        Ok(())
    }

    pub fn query_end(&mut self, handle: QueryHandle) -> Result<(), GpuError> {
        self.end_pass()?;
        self.ensure_command_buffer()?;
        let cb = self.current_command_buffer();
        let pool = self.queries.resolve(handle)?.handle;
        self.backend.cmd_end_query(cb, pool, handle.index);
        Ok(())
    }

    /// Non-blocking completion poll.
    pub fn query_complete(&mut self, handle: QueryHandle) -> Result<bool, GpuError> {
        let pool = self.queries.resolve(handle)?.handle;
        Ok(self
            .backend
            .get_query_result(pool, handle.index)?
            .is_some())
    }

    /// Samples that passed the query, or 0 while still in flight.
    pub fn query_pixel_count(&mut self, handle: QueryHandle) -> Result<u32, GpuError> {
        let pool = self.queries.resolve(handle)?.handle;
        Ok(self
            .backend
            .get_query_result(pool, handle.index)?
            .unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn pipeline_cache_stats(&self) -> CacheStats {
        self.caches.pipelines.stats()
    }

    pub fn render_pass_cache_stats(&self) -> CacheStats {
        self.caches.render_passes.stats()
    }

    pub fn framebuffer_cache_stats(&self) -> CacheStats {
        self.caches.framebuffers.stats()
    }

    pub fn sampler_cache_stats(&self) -> CacheStats {
        self.caches.samplers.stats()
    }

    #[cfg(test)]
    pub(crate) fn buffer_state(&self, id: BufferId) -> (u64, bool, u64) {
        let buffer = self.buffers.get(id).unwrap();
        (
            buffer.internal_offset,
            buffer.bound_this_frame,
            buffer.capacity(),
        )
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[cfg(test)]
    pub(crate) fn query_location(&self, handle: QueryHandle) -> (vk::QueryPool, u32) {
        (self.queries.resolve(handle).unwrap().handle, handle.index)
    }
}
