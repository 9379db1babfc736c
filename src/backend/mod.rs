//! The explicit-API seam.
//!
//! Device, swapchain and shader-reflection bring-up happen outside this
//! crate; what the core receives is a [`GpuBackend`]: the slice of the
//! explicit graphics API it consumes, expressed with `ash::vk` vocabulary
//! types but without raw pointers, so that a recording implementation can
//! stand in for the driver under test.
//!
//! The shipped driver-backed implementation is [`vulkan::VulkanBackend`].

pub mod vulkan;

use ash::vk;

use crate::error::GpuError;
use crate::state::Rect;

/// A native image together with its default view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub sample_count: vk::SampleCountFlags,
}

#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DepthStencilDescriptor {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub stencil_test_enable: bool,
    pub front: vk::StencilOpState,
    pub back: vk::StencilOpState,
}

/// Full static state of a graphics pipeline. Everything the pipeline
/// cache keys on must be derivable from this; viewport, scissor, blend
/// constants, depth bias and stencil reference are dynamic state and
/// intentionally absent.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub sample_count: vk::SampleCountFlags,
    pub sample_mask: u32,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub depth_stencil: Option<DepthStencilDescriptor>,
    pub render_pass: vk::RenderPass,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDescriptor {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_u: vk::SamplerAddressMode,
    pub address_v: vk::SamplerAddressMode,
    pub address_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    /// 0 disables anisotropic filtering.
    pub max_anisotropy: f32,
    pub max_lod: f32,
}

/// One image-layout transition, fully resolved to access/stage masks by
/// the layout transition engine. Single subresource: mip 0, layer 0.
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttachmentClear {
    Color { attachment: u32, value: [f32; 4] },
    DepthStencil { depth: Option<f32>, stencil: Option<u32> },
}

/// Batched descriptor update, addressed to one swapchain image's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    VertexUniform {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    FragmentUniform {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    TextureSampler {
        slot: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

/// Synchronization attached to a queue submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKind {
    /// Wait on image-available, signal render-finished, signal the frame
    /// fence. The per-frame present submission.
    Frame,
    /// No semaphores, no fence. Used by the stall path, which follows the
    /// submission with a blocking queue-idle wait.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

impl SwapchainInfo {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// The explicit graphics API as consumed by the core.
///
/// Object factories and synchronization are fallible; command recording
/// is not (recording errors surface at end/submit time through the
/// driver). The backend owns the frame fence, the image-available and
/// render-finished semaphores, the command pool, and one descriptor set
/// per swapchain image.
pub trait GpuBackend {
    // Object factories.
    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> Result<vk::Pipeline, GpuError>;
    fn create_render_pass(&mut self, desc: &RenderPassDescriptor)
        -> Result<vk::RenderPass, GpuError>;
    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor)
        -> Result<vk::Framebuffer, GpuError>;
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<vk::Sampler, GpuError>;
    fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<vk::Buffer, GpuError>;
    fn destroy_buffer(&mut self, buffer: vk::Buffer);
    fn write_buffer(&mut self, buffer: vk::Buffer, offset: u64, data: &[u8])
        -> Result<(), GpuError>;
    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<GpuImage, GpuError>;
    fn destroy_image(&mut self, image: GpuImage);
    fn create_query_pool(&mut self, query_count: u32) -> Result<vk::QueryPool, GpuError>;
    fn destroy_query_pool(&mut self, pool: vk::QueryPool);

    /// Non-blocking result poll: `Ok(None)` while the query is still in
    /// flight.
    fn get_query_result(
        &mut self,
        pool: vk::QueryPool,
        index: u32,
    ) -> Result<Option<u32>, GpuError>;

    // Command buffers.
    fn allocate_command_buffer(&mut self) -> Result<vk::CommandBuffer, GpuError>;
    fn begin_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), GpuError>;
    fn end_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), GpuError>;
    /// Releases every command buffer previously allocated from the pool.
    fn reset_command_pool(&mut self) -> Result<(), GpuError>;

    // Recorded commands.
    fn cmd_begin_render_pass(
        &mut self,
        cb: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
    );
    fn cmd_end_render_pass(&mut self, cb: vk::CommandBuffer);
    fn cmd_bind_pipeline(&mut self, cb: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_set_viewport(&mut self, cb: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&mut self, cb: vk::CommandBuffer, rect: vk::Rect2D);
    fn cmd_set_blend_constants(&mut self, cb: vk::CommandBuffer, constants: [f32; 4]);
    fn cmd_set_depth_bias(&mut self, cb: vk::CommandBuffer, constant: f32, slope: f32);
    fn cmd_set_stencil_reference(&mut self, cb: vk::CommandBuffer, reference: u32);
    fn cmd_bind_vertex_buffer(
        &mut self,
        cb: vk::CommandBuffer,
        slot: u32,
        buffer: vk::Buffer,
        offset: u64,
    );
    fn cmd_bind_index_buffer(
        &mut self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    );
    fn cmd_bind_descriptor_sets(&mut self, cb: vk::CommandBuffer, image_index: u32);
    fn cmd_draw(
        &mut self,
        cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &mut self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_clear_attachments(
        &mut self,
        cb: vk::CommandBuffer,
        clears: &[AttachmentClear],
        rect: vk::Rect2D,
    );
    fn cmd_pipeline_barrier(&mut self, cb: vk::CommandBuffer, barrier: &ImageBarrier);
    fn cmd_blit_image(
        &mut self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_rect: Rect,
        dst_rect: Rect,
        filter: vk::Filter,
    );
    fn cmd_begin_query(&mut self, cb: vk::CommandBuffer, pool: vk::QueryPool, index: u32);
    fn cmd_end_query(&mut self, cb: vk::CommandBuffer, pool: vk::QueryPool, index: u32);
    fn cmd_reset_query_pool(
        &mut self,
        cb: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    );

    /// One batched descriptor update for the given swapchain image's set.
    fn update_descriptors(&mut self, image_index: u32, writes: &[DescriptorWrite]);

    // Frame synchronization. The backend owns the sync objects.
    fn wait_for_frame_fence(&mut self) -> Result<(), GpuError>;
    fn reset_frame_fence(&mut self) -> Result<(), GpuError>;
    fn acquire_next_image(&mut self) -> Result<u32, GpuError>;
    fn submit(&mut self, command_buffers: &[vk::CommandBuffer], kind: SubmitKind)
        -> Result<(), GpuError>;
    fn present(&mut self, image_index: u32) -> Result<(), GpuError>;
    fn queue_wait_idle(&mut self) -> Result<(), GpuError>;

    fn swapchain_info(&self) -> SwapchainInfo;
}
